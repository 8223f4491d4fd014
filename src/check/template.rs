//! Random-value template tokens for check requests
//!
//! Supported tokens, each taking a length argument:
//! - `{rand(N)}`     alphanumeric
//! - `{randWord(N)}` letters only
//! - `{randNum(N)}`  digits only
//!
//! Anything that does not parse as one of these is left in place verbatim.

use std::sync::OnceLock;

use rand::distributions::{Alphanumeric, DistString};
use rand::Rng;
use regex::{Captures, Regex};

const LETTERS: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";
const DIGITS: &[u8] = b"0123456789";

/// Longest value a single token may expand to
pub const MAX_TOKEN_LEN: usize = 64 * 1024;

/// The closed set of token kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Alphanumeric,
    Letters,
    Digits,
}

impl TokenKind {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "rand" => Some(Self::Alphanumeric),
            "randWord" => Some(Self::Letters),
            "randNum" => Some(Self::Digits),
            _ => None,
        }
    }

    /// Generate a random string of `len` characters of this kind
    pub fn generate(&self, len: usize) -> String {
        let mut rng = rand::thread_rng();
        let charset = match self {
            Self::Alphanumeric => return Alphanumeric.sample_string(&mut rng, len),
            Self::Letters => LETTERS,
            Self::Digits => DIGITS,
        };
        (0..len)
            .map(|_| charset[rng.gen_range(0..charset.len())] as char)
            .collect()
    }
}

fn token_regex() -> &'static Regex {
    static TOKEN_RE: OnceLock<Regex> = OnceLock::new();
    TOKEN_RE.get_or_init(|| {
        Regex::new(r"\{(rand|randWord|randNum)\((\d+)\)\}").expect("token regex is valid")
    })
}

/// Replace every template token in `input` with a fresh random value
pub fn resolve(input: &str) -> String {
    token_regex()
        .replace_all(input, |caps: &Captures<'_>| {
            let verbatim = caps[0].to_string();

            let Some(kind) = TokenKind::from_name(&caps[1]) else {
                return verbatim;
            };
            match caps[2].parse::<usize>() {
                Ok(len) if len <= MAX_TOKEN_LEN => kind.generate(len),
                _ => verbatim,
            }
        })
        .into_owned()
}

//! Gateway authentication
//!
//! Clients authenticate with Basic credentials: the username names the sticky
//! identity, the password must be the shared secret.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use tracing::{debug, warn};

use crate::error::{PoolError, Result};

const BASIC_PREFIX: &str = "basic ";

/// Proxy authentication handler
#[derive(Clone)]
pub struct ProxyAuth {
    /// Shared secret every client must present as its password
    secret: String,
}

impl ProxyAuth {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// Validate a `Proxy-Authorization` value and return the client identity
    pub fn authenticate(&self, header: Option<&[u8]>) -> Result<String> {
        let header = header.ok_or(PoolError::MissingAuthHeader)?;
        let header = std::str::from_utf8(header).map_err(|_| PoolError::InvalidAuthHeader)?;

        let scheme = header.get(..BASIC_PREFIX.len()).unwrap_or_default();
        if !scheme.eq_ignore_ascii_case(BASIC_PREFIX) {
            debug!("Unsupported proxy auth scheme");
            return Err(PoolError::InvalidAuthHeader);
        }

        let decoded = BASE64
            .decode(header[BASIC_PREFIX.len()..].trim())
            .map_err(|_| PoolError::InvalidCredentials)?;
        let credentials = String::from_utf8(decoded).map_err(|_| PoolError::InvalidCredentials)?;

        let (identity, password) = credentials
            .split_once(':')
            .ok_or(PoolError::InvalidCredentials)?;

        if password != self.secret {
            warn!(identity, "Proxy authentication failed");
            return Err(PoolError::InvalidCredentials);
        }

        Ok(identity.to_string())
    }

    /// Headers accompanying a 407 response
    pub fn challenge_headers(&self) -> Vec<(&'static str, String)> {
        vec![("Proxy-Authenticate", "Basic realm=\"Proxy\"".to_string())]
    }
}

use serde::{Deserialize, Serialize};

/// An external feed of newline-separated `host:port` candidates
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxySource {
    pub url: String,
    /// Scheme prefixed to every entry of the feed (`http`, `socks5`, ...)
    #[serde(rename = "type", alias = "scheme")]
    pub scheme: String,
}

impl ProxySource {
    pub fn new(url: impl Into<String>, scheme: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            scheme: scheme.into(),
        }
    }

    /// Turn a raw feed body into candidate addresses
    ///
    /// Tolerates `\r\n` line endings and surrounding whitespace; blank lines are
    /// dropped.
    pub fn parse_feed(&self, body: &str) -> Vec<String> {
        body.lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(|line| format!("{}://{}", self.scheme, line))
            .collect()
    }
}

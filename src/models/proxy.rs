use url::{Host, Url};

use crate::error::{PoolError, Result};

/// Upstream proxy protocol type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyProtocol {
    Http,
    Https,
    Socks4,
    Socks4a,
    Socks5,
    Socks5h,
}

impl ProxyProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProxyProtocol::Http => "http",
            ProxyProtocol::Https => "https",
            ProxyProtocol::Socks4 => "socks4",
            ProxyProtocol::Socks4a => "socks4a",
            ProxyProtocol::Socks5 => "socks5",
            ProxyProtocol::Socks5h => "socks5h",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "http" => Some(ProxyProtocol::Http),
            "https" => Some(ProxyProtocol::Https),
            "socks4" => Some(ProxyProtocol::Socks4),
            "socks4a" => Some(ProxyProtocol::Socks4a),
            "socks5" => Some(ProxyProtocol::Socks5),
            "socks5h" => Some(ProxyProtocol::Socks5h),
            _ => None,
        }
    }

    /// Port assumed when a candidate address omits one
    pub fn default_port(&self) -> u16 {
        match self {
            ProxyProtocol::Http => 80,
            ProxyProtocol::Https => 443,
            _ => 1080,
        }
    }
}

impl std::fmt::Display for ProxyProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A candidate address (`scheme://[user:pass@]host[:port]`) broken into the parts
/// the gateway needs to dial through it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamProxy {
    pub protocol: ProxyProtocol,
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl UpstreamProxy {
    /// Parse a candidate address
    pub fn parse(candidate: &str) -> Result<Self> {
        let url = Url::parse(candidate.trim())?;

        let protocol = ProxyProtocol::from_str(url.scheme())
            .ok_or_else(|| PoolError::UnsupportedProtocol(url.scheme().to_string()))?;

        let host = match url.host() {
            Some(Host::Domain(domain)) => domain.to_string(),
            Some(Host::Ipv4(ip)) => ip.to_string(),
            Some(Host::Ipv6(ip)) => ip.to_string(),
            None => {
                return Err(PoolError::InvalidProxyAddress(format!(
                    "missing host in {}",
                    candidate
                )))
            }
        };
        if host.is_empty() {
            return Err(PoolError::InvalidProxyAddress(format!(
                "missing host in {}",
                candidate
            )));
        }

        let username = if url.username().is_empty() {
            None
        } else {
            Some(url.username().to_string())
        };

        Ok(Self {
            protocol,
            port: url.port().unwrap_or_else(|| protocol.default_port()),
            host,
            username,
            password: url.password().map(|p| p.to_string()),
        })
    }

    /// `host:port` suitable for `TcpStream::connect`
    pub fn socket_addr(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

use std::env;
use std::fs;
use std::path::Path;

use rand::seq::SliceRandom;

use crate::error::{PoolError, Result};
use crate::models::{CheckSpec, ProxySource};

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Gateway listener configuration
    pub gateway: GatewayConfig,
    /// Pool engine configuration
    pub pool: PoolConfig,
    /// Logging configuration
    pub log: LogConfig,
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Port for the gateway (default: 8888)
    pub port: u16,
    /// Host to bind to (default: 0.0.0.0)
    pub host: String,
    /// Shared secret clients present as the Basic password
    pub secret: String,
    /// Upstream dial timeout in seconds
    pub dial_timeout: u64,
    /// How long a client waits for the pool to hand out a proxy, in seconds.
    /// Unset means wait indefinitely.
    pub assign_timeout: Option<u64>,
    /// Enable per-identity rate limiting
    pub rate_limit_enabled: bool,
    /// Rate limit requests per second
    pub rate_limit_per_second: u32,
    /// Rate limit burst size
    pub rate_limit_burst: u32,
}

#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum number of validated proxies held ready
    pub max_size: usize,
    /// How long an identity keeps its assigned proxy, in seconds
    pub cache_secs: u64,
    /// Per-probe timeout in seconds
    pub check_timeout: u64,
    /// Feed download timeout in seconds
    pub source_timeout: u64,
    /// Pause between fetch cycles in seconds
    pub fetch_pause: u64,
    /// Endpoint that echoes the caller's public IP
    pub ip_echo_url: String,
    /// JSON file holding the check list
    pub checks_file: String,
    /// JSON file holding the source list
    pub sources_file: String,
}

impl PoolConfig {
    /// Capacity of each validation queue and its worker pool
    pub fn queue_capacity(&self) -> usize {
        crate::pool::queue_capacity(self.max_size)
    }
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Log level (debug, info, warn, error)
    pub level: String,
    /// Output format (json, pretty)
    pub format: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let secret = get_env_or("GATEWAY_SECRET", "");
        if secret.is_empty() {
            return Err(PoolError::InvalidConfig(
                "GATEWAY_SECRET must be set".into(),
            ));
        }

        let assign_timeout = match env::var("GATEWAY_ASSIGN_TIMEOUT") {
            Ok(raw) if !raw.trim().is_empty() => Some(raw.trim().parse().map_err(|_| {
                PoolError::InvalidConfig(
                    "GATEWAY_ASSIGN_TIMEOUT must be a number of seconds".into(),
                )
            })?),
            _ => None,
        };

        Ok(Config {
            gateway: GatewayConfig {
                port: get_env_or("GATEWAY_PORT", "8888").parse().map_err(|_| {
                    PoolError::InvalidConfig("GATEWAY_PORT must be a valid port number".into())
                })?,
                host: get_env_or("GATEWAY_HOST", "0.0.0.0"),
                secret,
                dial_timeout: get_env_or("GATEWAY_DIAL_TIMEOUT", "15")
                    .parse()
                    .unwrap_or(15),
                assign_timeout,
                rate_limit_enabled: get_env_or("GATEWAY_RATE_LIMIT_ENABLED", "false")
                    .parse()
                    .unwrap_or(false),
                rate_limit_per_second: get_env_or("GATEWAY_RATE_LIMIT_PER_SECOND", "50")
                    .parse()
                    .unwrap_or(50),
                rate_limit_burst: get_env_or("GATEWAY_RATE_LIMIT_BURST", "100")
                    .parse()
                    .unwrap_or(100),
            },
            pool: PoolConfig {
                max_size: get_env_or("POOL_MAX_SIZE", "1000").parse().map_err(|_| {
                    PoolError::InvalidConfig("POOL_MAX_SIZE must be a valid number".into())
                })?,
                cache_secs: get_env_or("POOL_CACHE_SECS", "300")
                    .parse()
                    .unwrap_or(300),
                check_timeout: get_env_or("POOL_CHECK_TIMEOUT", "10")
                    .parse()
                    .unwrap_or(10),
                source_timeout: get_env_or("POOL_SOURCE_TIMEOUT", "5")
                    .parse()
                    .unwrap_or(5),
                fetch_pause: get_env_or("POOL_FETCH_PAUSE", "5").parse().unwrap_or(5),
                ip_echo_url: get_env_or("POOL_IP_ECHO_URL", "https://api.ipify.org"),
                checks_file: get_env_or("POOL_CHECKS_FILE", "./assets/checks.json"),
                sources_file: get_env_or("POOL_SOURCES_FILE", "./assets/proxy_list.json"),
            },
            log: LogConfig {
                level: get_env_or("LOG_LEVEL", "info"),
                format: get_env_or("LOG_FORMAT", "pretty"),
            },
        })
    }

    /// Get the gateway listen address
    pub fn gateway_addr(&self) -> String {
        format!("{}:{}", self.gateway.host, self.gateway.port)
    }
}

/// Read the check list
pub fn load_checks(path: impl AsRef<Path>) -> Result<Vec<CheckSpec>> {
    let raw = read_file(path.as_ref())?;
    Ok(serde_json::from_str(&raw)?)
}

/// Read the source list, shuffled so no feed is always fetched first
pub fn load_sources(path: impl AsRef<Path>) -> Result<Vec<ProxySource>> {
    let raw = read_file(path.as_ref())?;
    let mut sources: Vec<ProxySource> = serde_json::from_str(&raw)?;
    sources.shuffle(&mut rand::thread_rng());
    Ok(sources)
}

fn read_file(path: &Path) -> Result<String> {
    fs::read_to_string(path).map_err(|e| {
        PoolError::InvalidConfig(format!("cannot read {}: {}", path.display(), e))
    })
}

/// Get environment variable with a default value
fn get_env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

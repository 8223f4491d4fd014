//! Check rule refresh service
//!
//! Periodically resolves the host's public IP and recompiles the check
//! patterns that refer to it.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::interval;
use tracing::{debug, error, info, instrument, warn};

use crate::check::{CheckRules, FALLBACK_OUTER_IP};
use crate::error::{PoolError, Result};

/// Rule refresh service configuration
#[derive(Clone)]
pub struct RuleRefreshConfig {
    /// Endpoint answering with the caller's public IP as plain text
    pub ip_echo_url: String,
    /// Timeout for the lookup
    pub timeout: Duration,
    /// How often to refresh (in seconds)
    pub interval_secs: u64,
}

impl Default for RuleRefreshConfig {
    fn default() -> Self {
        Self {
            ip_echo_url: "https://api.ipify.org".to_string(),
            timeout: Duration::from_secs(10),
            interval_secs: 60,
        }
    }
}

/// Keeps the compiled check rules in step with the host's outer IP
pub struct RuleRefreshService {
    rules: Arc<CheckRules>,
    config: RuleRefreshConfig,
    http: reqwest::Client,
}

impl RuleRefreshService {
    pub fn new(rules: Arc<CheckRules>, config: RuleRefreshConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.timeout)
            .no_proxy()
            .build()?;
        Ok(Self {
            rules,
            config,
            http,
        })
    }

    /// Run the rule refresh service
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Starting rule refresh service (interval: {}s)",
            self.config.interval_secs
        );

        let mut ticker = interval(Duration::from_secs(self.config.interval_secs.max(1)));
        ticker.tick().await; // Skip immediate tick

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.refresh_once().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Rule refresh service shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Resolve the outer IP and recompile the rules against it
    ///
    /// Falls back to the loopback address when the lookup fails. Returns the
    /// address the rules were compiled for.
    pub async fn refresh_once(&self) -> String {
        let outer_ip = match self.resolve_outer_ip().await {
            Ok(ip) => ip,
            Err(e) => {
                warn!(error = %e, "Outer IP lookup failed, using {}", FALLBACK_OUTER_IP);
                FALLBACK_OUTER_IP.to_string()
            }
        };

        if let Err(e) = self.rules.recompile(&outer_ip) {
            error!(error = %e, "Failed to recompile check rules, keeping previous set");
            return self.rules.outer_ip();
        }

        debug!(outer_ip = %outer_ip, "Check rules refreshed");
        outer_ip
    }

    async fn resolve_outer_ip(&self) -> Result<String> {
        let body = self
            .http
            .get(&self.config.ip_echo_url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        let ip: IpAddr = body.trim().parse().map_err(|_| {
            PoolError::InvalidRequest(format!("IP echo returned {:?}", body.trim()))
        })?;
        Ok(ip.to_string())
    }
}

/// Handle for managing the rule refresh service
pub struct RuleRefreshHandle {
    shutdown_tx: watch::Sender<bool>,
}

impl RuleRefreshHandle {
    pub fn new() -> (Self, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        (Self { shutdown_tx: tx }, rx)
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

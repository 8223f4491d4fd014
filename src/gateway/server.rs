//! Gateway listener
//!
//! Accepts client connections and serves each on its own task.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::time::interval;
use tracing::{debug, error, info, instrument};

use super::cache::AssignmentCache;
use super::handler::{GatewayHandler, GatewayHandlerConfig};
use super::middleware::{ProxyAuth, RateLimiter};
use crate::config::GatewayConfig;
use crate::error::{PoolError, Result};
use crate::pool::ProxyProvider;

/// How often idle rate-limit state is dropped
const HOUSEKEEPING_INTERVAL: Duration = Duration::from_secs(60);

pub struct GatewayServer {
    config: GatewayConfig,
    handler: Arc<GatewayHandler>,
}

impl GatewayServer {
    pub fn new(config: GatewayConfig, provider: Arc<dyn ProxyProvider>, cache_ttl: Duration) -> Self {
        let handler_config = GatewayHandlerConfig {
            dial_timeout: Duration::from_secs(config.dial_timeout),
            assign_timeout: config.assign_timeout.map(Duration::from_secs),
        };

        let rate_limiter = if config.rate_limit_enabled {
            RateLimiter::new(true, config.rate_limit_per_second, config.rate_limit_burst)
        } else {
            RateLimiter::disabled()
        };

        let handler = Arc::new(GatewayHandler::new(
            provider,
            Arc::new(AssignmentCache::new(cache_ttl)),
            ProxyAuth::new(config.secret.clone()),
            rate_limiter,
            handler_config,
        ));

        Self { config, handler }
    }

    /// Bind the configured listen address
    pub async fn bind(&self) -> Result<TcpListener> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        TcpListener::bind(&addr)
            .await
            .map_err(|e| PoolError::InvalidConfig(format!("cannot listen on {}: {}", addr, e)))
    }

    /// Serve clients from `listener` until shutdown
    #[instrument(skip(self, listener, shutdown))]
    pub async fn run(&self, listener: TcpListener, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!("Gateway listening on {}", listener.local_addr()?);

        let mut housekeeping = interval(HOUSEKEEPING_INTERVAL);
        housekeeping.tick().await; // Skip immediate tick

        loop {
            tokio::select! {
                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, client_addr)) => {
                            let handler = self.handler.clone();
                            tokio::spawn(async move {
                                handler.handle(stream, client_addr).await;
                            });
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = housekeeping.tick() => {
                    let limiter = self.handler.rate_limiter();
                    limiter.cleanup();
                    debug!(identities = limiter.identity_count(), "Gateway housekeeping");
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Gateway shutting down");
                        break;
                    }
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::ProxyChannel;
    use crate::testing;
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    fn config() -> GatewayConfig {
        GatewayConfig {
            port: 0,
            host: "127.0.0.1".to_string(),
            secret: "s3cret".to_string(),
            dial_timeout: 5,
            assign_timeout: None,
            rate_limit_enabled: false,
            rate_limit_per_second: 50,
            rate_limit_burst: 100,
        }
    }

    #[tokio::test]
    async fn test_serves_connect_over_tcp() {
        let upstream = testing::spawn_connect_echo_proxy().await;
        let channel = Arc::new(ProxyChannel::new(4));
        channel.push(format!("http://{}", upstream)).await;

        let server = GatewayServer::new(config(), channel.clone(), Duration::from_secs(60));
        let listener = server.bind().await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(async move { server.run(listener, shutdown_rx).await });

        let mut client = TcpStream::connect(addr).await.unwrap();
        let request = format!(
            "CONNECT example.com:443 HTTP/1.1\r\nProxy-Authorization: Basic {}\r\n\r\n",
            BASE64.encode("alice:s3cret")
        );
        client.write_all(request.as_bytes()).await.unwrap();

        let mut established = vec![0u8; crate::gateway::request::CONNECT_ESTABLISHED.len()];
        client.read_exact(&mut established).await.unwrap();
        assert!(established.starts_with(b"HTTP/1.1 200"));

        client.write_all(b"hello").await.unwrap();
        let mut echoed = [0u8; 5];
        client.read_exact(&mut echoed).await.unwrap();
        assert_eq!(&echoed, b"hello");

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_bind_failure_reported() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut config = config();
        config.port = taken.local_addr().unwrap().port();

        let server = GatewayServer::new(config, Arc::new(ProxyChannel::new(1)), Duration::from_secs(1));
        assert!(matches!(server.bind().await, Err(PoolError::InvalidConfig(_))));
    }
}

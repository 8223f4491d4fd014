//! Per-connection gateway logic
//!
//! Authenticates the client, resolves its sticky upstream proxy, dials the
//! target through it and then bridges bytes until either side closes.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use http::StatusCode;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info, instrument, warn};

use super::cache::AssignmentCache;
use super::middleware::{ProxyAuth, RateLimiter};
use super::request::{
    read_request, render_response, RequestHead, CONNECT_ESTABLISHED, HEAD_READ_TIMEOUT,
};
use super::transport::{format_authority, ProxyTransport};
use super::tunnel::copy_bidirectional;
use crate::error::{PoolError, Result};
use crate::models::UpstreamProxy;
use crate::pool::ProxyProvider;

/// Configuration for the gateway handler
#[derive(Clone)]
pub struct GatewayHandlerConfig {
    /// Timeout for reaching the target through the upstream proxy
    pub dial_timeout: Duration,
    /// How long a client may wait for the pool; `None` waits indefinitely
    pub assign_timeout: Option<Duration>,
}

impl Default for GatewayHandlerConfig {
    fn default() -> Self {
        Self {
            dial_timeout: Duration::from_secs(15),
            assign_timeout: None,
        }
    }
}

pub struct GatewayHandler {
    provider: Arc<dyn ProxyProvider>,
    cache: Arc<AssignmentCache>,
    auth: ProxyAuth,
    rate_limiter: RateLimiter,
    config: GatewayHandlerConfig,
}

impl GatewayHandler {
    pub fn new(
        provider: Arc<dyn ProxyProvider>,
        cache: Arc<AssignmentCache>,
        auth: ProxyAuth,
        rate_limiter: RateLimiter,
        config: GatewayHandlerConfig,
    ) -> Self {
        Self {
            provider,
            cache,
            auth,
            rate_limiter,
            config,
        }
    }

    pub fn cache(&self) -> &Arc<AssignmentCache> {
        &self.cache
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }

    /// Serve one client connection to completion
    #[instrument(skip(self, client))]
    pub async fn handle<S>(&self, mut client: S, client_addr: SocketAddr)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let mut head = match tokio::time::timeout(HEAD_READ_TIMEOUT, read_request(&mut client)).await
        {
            Ok(Ok(Some(head))) => head,
            Ok(Ok(None)) => return,
            Ok(Err(e)) => {
                debug!(error = %e, "Dropping unreadable request");
                return;
            }
            Err(_) => {
                debug!("Timed out waiting for request head");
                return;
            }
        };

        let upstream = match self.open_upstream(&mut head).await {
            Ok(upstream) => upstream,
            Err(e) => {
                self.reject(&mut client, &e).await;
                return;
            }
        };

        if let Err(e) = Self::bridge(client, upstream, &head).await {
            debug!(error = %e, "Bridge ended with error");
        }
    }

    /// Authenticate, resolve the assigned proxy and dial the target through it
    async fn open_upstream(&self, head: &mut RequestHead) -> Result<TcpStream> {
        let identity = self.auth.authenticate(head.header("proxy-authorization"))?;
        self.rate_limiter.check(&identity)?;
        head.remove_header("proxy-authorization");

        let (host, port) = head.target_authority()?;
        let target = format_authority(&host, port);

        let wait = self.config.assign_timeout;
        let proxy = self
            .cache
            .get_or_load(&identity, || self.provider.acquire(wait))
            .await?;

        info!(identity = %identity, proxy = %proxy, target = %target, "Using proxy");

        match self.dial(&proxy, &host, port).await {
            Ok(upstream) => Ok(upstream),
            Err(e) => {
                warn!(identity = %identity, proxy = %proxy, target = %target, error = %e, "Upstream dial failed, evicting assignment");
                self.cache.invalidate(&identity, &proxy).await;
                Err(PoolError::ProxyConnectionFailed(target))
            }
        }
    }

    async fn dial(&self, proxy: &str, host: &str, port: u16) -> Result<TcpStream> {
        let upstream = UpstreamProxy::parse(proxy)?;
        tokio::time::timeout(
            self.config.dial_timeout,
            ProxyTransport::connect(&upstream, host, port),
        )
        .await
        .map_err(|_| PoolError::Timeout)?
    }

    /// Send whatever must precede the raw byte stream, then bridge
    async fn bridge<S>(mut client: S, mut upstream: TcpStream, head: &RequestHead) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        if head.is_connect() {
            client.write_all(CONNECT_ESTABLISHED).await?;
            if !head.leftover.is_empty() {
                upstream.write_all(&head.leftover).await?;
            }
        } else {
            upstream.write_all(&head.serialize_upstream()?).await?;
        }

        copy_bidirectional(client, upstream).await;
        Ok(())
    }

    async fn reject<S>(&self, client: &mut S, err: &PoolError)
    where
        S: AsyncWrite + Unpin + Send,
    {
        let status = err.status_code();
        debug!(status = status.as_u16(), error = %err, "Rejecting request");

        let headers = if err.is_auth_error() {
            self.auth.challenge_headers()
        } else {
            Vec::new()
        };
        let response = if status == StatusCode::SERVICE_UNAVAILABLE {
            render_response(status, "text/plain", &err.to_string(), &headers)
        } else {
            render_response(status, "application/json", &err.to_json_body(), &headers)
        };

        let _ = client.write_all(&response).await;
        let _ = client.shutdown().await;
    }
}

//! Proxy transport layer for HTTP and SOCKS protocols
//!
//! Opens a TCP stream to a target through an upstream proxy. After `connect`
//! returns, the stream carries raw bytes to and from the target.

use std::net::{IpAddr, SocketAddr};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{lookup_host, TcpStream};
use tokio_socks::tcp::{Socks4Stream, Socks5Stream};
use tracing::{debug, instrument};

use crate::error::{PoolError, Result};
use crate::models::{ProxyProtocol, UpstreamProxy};

/// Upper bound on an upstream's CONNECT response head
const MAX_CONNECT_RESPONSE: usize = 8 * 1024;

pub struct ProxyTransport;

impl ProxyTransport {
    /// Connect to `target_host:target_port` through `proxy`
    #[instrument(skip(proxy), fields(proxy = %proxy.socket_addr(), protocol = %proxy.protocol))]
    pub async fn connect(
        proxy: &UpstreamProxy,
        target_host: &str,
        target_port: u16,
    ) -> Result<TcpStream> {
        let stream = TcpStream::connect(proxy.socket_addr())
            .await
            .map_err(|e| PoolError::ProxyConnectionFailed(format!("TCP connect failed: {}", e)))?;

        match proxy.protocol {
            ProxyProtocol::Http | ProxyProtocol::Https => {
                Self::connect_http(stream, proxy, target_host, target_port).await
            }
            ProxyProtocol::Socks4 | ProxyProtocol::Socks4a => {
                Self::connect_socks4(stream, proxy, target_host, target_port).await
            }
            ProxyProtocol::Socks5 | ProxyProtocol::Socks5h => {
                Self::connect_socks5(stream, proxy, target_host, target_port).await
            }
        }
    }

    async fn connect_http(
        mut stream: TcpStream,
        proxy: &UpstreamProxy,
        target_host: &str,
        target_port: u16,
    ) -> Result<TcpStream> {
        let request = Self::build_connect_request(proxy, target_host, target_port);
        stream.write_all(request.as_bytes()).await.map_err(|e| {
            PoolError::ProxyConnectionFailed(format!("Failed to send CONNECT: {}", e))
        })?;

        let head = Self::read_response_head(&mut stream).await?;

        let mut headers = [httparse::EMPTY_HEADER; 32];
        let mut response = httparse::Response::new(&mut headers);
        match response.parse(&head) {
            Ok(httparse::Status::Complete(_)) => {}
            _ => {
                return Err(PoolError::ProxyConnectionFailed(
                    "Malformed CONNECT response".to_string(),
                ))
            }
        }

        match response.code {
            Some(code) if (200..300).contains(&code) => {
                debug!("HTTP CONNECT tunnel established");
                Ok(stream)
            }
            code => Err(PoolError::ProxyConnectionFailed(format!(
                "CONNECT failed: {} {}",
                code.unwrap_or_default(),
                response.reason.unwrap_or_default()
            ))),
        }
    }

    /// Build the CONNECT request, with Basic credentials when the proxy has them
    fn build_connect_request(proxy: &UpstreamProxy, target_host: &str, target_port: u16) -> String {
        let authority = format_authority(target_host, target_port);
        let mut request = format!(
            "CONNECT {} HTTP/1.1\r\nHost: {}\r\n",
            authority, authority
        );

        if let Some(username) = &proxy.username {
            let credentials = format!(
                "{}:{}",
                username,
                proxy.password.as_deref().unwrap_or_default()
            );
            request.push_str(&format!(
                "Proxy-Authorization: Basic {}\r\n",
                BASE64.encode(credentials.as_bytes())
            ));
        }

        request.push_str("\r\n");
        request
    }

    /// Read exactly the response head so no tunnel bytes are consumed
    async fn read_response_head(stream: &mut TcpStream) -> Result<Vec<u8>> {
        let mut head = Vec::with_capacity(256);
        let mut byte = [0u8; 1];

        while !head.ends_with(b"\r\n\r\n") {
            if head.len() >= MAX_CONNECT_RESPONSE {
                return Err(PoolError::ProxyConnectionFailed(
                    "CONNECT response too large".to_string(),
                ));
            }
            let n = stream.read(&mut byte).await.map_err(|e| {
                PoolError::ProxyConnectionFailed(format!("Failed to read CONNECT response: {}", e))
            })?;
            if n == 0 {
                return Err(PoolError::ProxyConnectionFailed(
                    "Upstream closed during CONNECT".to_string(),
                ));
            }
            head.push(byte[0]);
        }

        Ok(head)
    }

    async fn connect_socks4(
        stream: TcpStream,
        proxy: &UpstreamProxy,
        target_host: &str,
        target_port: u16,
    ) -> Result<TcpStream> {
        let user_id = proxy.username.as_deref().unwrap_or_default();

        // Plain SOCKS4 only carries IPv4 targets; SOCKS4a lets the proxy resolve
        let result = if proxy.protocol == ProxyProtocol::Socks4 {
            let target = resolve_ipv4(target_host, target_port).await?;
            if user_id.is_empty() {
                Socks4Stream::connect_with_socket(stream, target).await
            } else {
                Socks4Stream::connect_with_userid_and_socket(stream, target, user_id).await
            }
        } else if user_id.is_empty() {
            Socks4Stream::connect_with_socket(stream, (target_host, target_port)).await
        } else {
            Socks4Stream::connect_with_userid_and_socket(stream, (target_host, target_port), user_id)
                .await
        };

        let stream = result.map_err(|e| {
            PoolError::ProxyConnectionFailed(format!("{} connect failed: {}", proxy.protocol, e))
        })?;

        debug!("SOCKS4 connection established");
        Ok(stream.into_inner())
    }

    async fn connect_socks5(
        stream: TcpStream,
        proxy: &UpstreamProxy,
        target_host: &str,
        target_port: u16,
    ) -> Result<TcpStream> {
        let credentials = proxy
            .username
            .as_deref()
            .map(|user| (user, proxy.password.as_deref().unwrap_or_default()));

        // socks5 resolves locally, socks5h hands the hostname to the proxy
        let result = if proxy.protocol == ProxyProtocol::Socks5 {
            let target = resolve(target_host, target_port).await?;
            match credentials {
                Some((user, pass)) => {
                    Socks5Stream::connect_with_password_and_socket(stream, target, user, pass).await
                }
                None => Socks5Stream::connect_with_socket(stream, target).await,
            }
        } else {
            let target = (target_host, target_port);
            match credentials {
                Some((user, pass)) => {
                    Socks5Stream::connect_with_password_and_socket(stream, target, user, pass).await
                }
                None => Socks5Stream::connect_with_socket(stream, target).await,
            }
        };

        let stream = result.map_err(|e| {
            PoolError::ProxyConnectionFailed(format!("{} connect failed: {}", proxy.protocol, e))
        })?;

        debug!("SOCKS5 connection established");
        Ok(stream.into_inner())
    }
}

/// `host:port`, bracketing IPv6 literals
pub fn format_authority(host: &str, port: u16) -> String {
    if host.contains(':') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

async fn resolve(host: &str, port: u16) -> Result<SocketAddr> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, port));
    }
    lookup_host((host, port))
        .await?
        .next()
        .ok_or_else(|| PoolError::InvalidRequest(format!("cannot resolve {}", host)))
}

async fn resolve_ipv4(host: &str, port: u16) -> Result<SocketAddr> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return match ip {
            IpAddr::V4(_) => Ok(SocketAddr::new(ip, port)),
            IpAddr::V6(_) => Err(PoolError::InvalidRequest(
                "SOCKS4 cannot reach IPv6 targets".to_string(),
            )),
        };
    }
    lookup_host((host, port))
        .await?
        .find(SocketAddr::is_ipv4)
        .ok_or_else(|| PoolError::InvalidRequest(format!("no IPv4 address for {}", host)))
}

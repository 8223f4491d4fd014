//! Raw HTTP/1.x request heads as seen by the gateway
//!
//! The gateway never terminates the client's HTTP session. It reads just the
//! request head, decides where to send it, and then hands the socket to the byte
//! bridge. Non-CONNECT requests are re-serialized in origin form first.

use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use http::{Method, StatusCode, Uri};
use tokio::io::{AsyncRead, AsyncReadExt};

use super::transport::format_authority;
use crate::error::{PoolError, Result};

/// Largest request head the gateway accepts
pub const MAX_HEAD_SIZE: usize = 64 * 1024;
/// How long a client may take to send its request head
pub const HEAD_READ_TIMEOUT: Duration = Duration::from_secs(30);

const MAX_HEADERS: usize = 100;

/// Headers that only concern the hop between client and gateway
const HOP_HEADERS: &[&str] = &["proxy-authorization", "proxy-connection"];

#[derive(Debug, Clone)]
pub struct RequestHead {
    pub method: Method,
    /// Request target exactly as sent (absolute URI, authority or origin form)
    pub target: String,
    /// Minor HTTP version (`1` for HTTP/1.1)
    pub version: u8,
    pub headers: Vec<(String, Vec<u8>)>,
    /// Bytes the client sent after the head, typically the start of a body
    pub leftover: Bytes,
}

impl RequestHead {
    /// Parse a complete head out of `buf`, or `Ok(None)` when more bytes are needed
    pub fn parse(buf: &[u8]) -> Result<Option<Self>> {
        let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut request = httparse::Request::new(&mut headers);

        let head_len = match request.parse(buf) {
            Ok(httparse::Status::Complete(len)) => len,
            Ok(httparse::Status::Partial) => return Ok(None),
            Err(e) => return Err(PoolError::InvalidRequest(e.to_string())),
        };

        let method = request
            .method
            .ok_or_else(|| PoolError::InvalidRequest("missing method".to_string()))?;
        let method = Method::from_bytes(method.as_bytes())
            .map_err(|_| PoolError::InvalidRequest(format!("invalid method {}", method)))?;

        Ok(Some(Self {
            method,
            target: request.path.unwrap_or_default().to_string(),
            version: request.version.unwrap_or(1),
            headers: request
                .headers
                .iter()
                .map(|h| (h.name.to_string(), h.value.to_vec()))
                .collect(),
            leftover: Bytes::copy_from_slice(&buf[head_len..]),
        }))
    }

    pub fn is_connect(&self) -> bool {
        self.method == Method::CONNECT
    }

    /// First value of the named header, matched case-insensitively
    pub fn header(&self, name: &str) -> Option<&[u8]> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_slice())
    }

    /// Drop every occurrence of the named header
    pub fn remove_header(&mut self, name: &str) {
        self.headers.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
    }

    /// Host and port the request is addressed to
    ///
    /// CONNECT targets default to port 443, everything else to port 80
    /// whatever the scheme. Origin-form requests fall back to the Host header.
    pub fn target_authority(&self) -> Result<(String, u16)> {
        if self.is_connect() {
            return parse_authority(&self.target, 443);
        }

        let uri: Uri = self
            .target
            .parse()
            .map_err(|_| PoolError::InvalidRequest(format!("invalid target {}", self.target)))?;

        if let Some(authority) = uri.authority() {
            return parse_authority(authority.as_str(), 80);
        }

        match self.header("host") {
            Some(host) if !host.is_empty() => {
                let host = std::str::from_utf8(host)
                    .map_err(|_| PoolError::InvalidRequest("invalid Host header".to_string()))?;
                parse_authority(host, 80)
            }
            _ => Err(PoolError::InvalidRequest("missing target host".to_string())),
        }
    }

    /// The head as it should reach the target: origin-form request line,
    /// hop-by-hop proxy headers removed, Host filled in, followed by any
    /// leftover body bytes
    pub fn serialize_upstream(&self) -> Result<Bytes> {
        let (host, port) = self.target_authority()?;

        let path = match self.target.parse::<Uri>() {
            Ok(uri) => uri
                .path_and_query()
                .map(|pq| pq.as_str().to_string())
                .filter(|pq| !pq.is_empty())
                .unwrap_or_else(|| "/".to_string()),
            Err(_) => "/".to_string(),
        };

        let mut out = BytesMut::with_capacity(256 + self.leftover.len());
        out.put_slice(
            format!("{} {} HTTP/1.{}\r\n", self.method, path, self.version).as_bytes(),
        );

        if self.header("host").is_none() {
            out.put_slice(format!("Host: {}\r\n", host_header(&host, port)).as_bytes());
        }

        for (name, value) in &self.headers {
            if HOP_HEADERS.iter().any(|h| name.eq_ignore_ascii_case(h)) {
                continue;
            }
            out.put_slice(name.as_bytes());
            out.put_slice(b": ");
            out.put_slice(value);
            out.put_slice(b"\r\n");
        }
        out.put_slice(b"\r\n");
        out.put_slice(&self.leftover);

        Ok(out.freeze())
    }
}

fn host_header(host: &str, port: u16) -> String {
    match port {
        80 | 443 if host.contains(':') => format!("[{}]", host),
        80 | 443 => host.to_string(),
        _ => format_authority(host, port),
    }
}

/// Split `host[:port]`, stripping IPv6 brackets
pub fn parse_authority(authority: &str, default_port: u16) -> Result<(String, u16)> {
    let authority = authority.trim();
    if authority.is_empty() {
        return Err(PoolError::InvalidRequest("missing target host".to_string()));
    }

    let parsed: http::uri::Authority = authority
        .parse()
        .map_err(|_| PoolError::InvalidRequest(format!("invalid authority {}", authority)))?;

    let host = parsed.host().trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() {
        return Err(PoolError::InvalidRequest("missing target host".to_string()));
    }

    Ok((host.to_string(), parsed.port_u16().unwrap_or(default_port)))
}

/// Read a request head from the client
///
/// Returns `Ok(None)` when the client disconnects before sending anything.
pub async fn read_request<S>(stream: &mut S) -> Result<Option<RequestHead>>
where
    S: AsyncRead + Unpin,
{
    let mut buf = BytesMut::with_capacity(4096);

    loop {
        let n = stream.read_buf(&mut buf).await?;
        if n == 0 {
            if buf.is_empty() {
                return Ok(None);
            }
            return Err(PoolError::InvalidRequest(
                "connection closed mid-request".to_string(),
            ));
        }

        if let Some(head) = RequestHead::parse(&buf)? {
            return Ok(Some(head));
        }

        if buf.len() >= MAX_HEAD_SIZE {
            return Err(PoolError::InvalidRequest("request head too large".to_string()));
        }
    }
}

/// A complete `Connection: close` response written by the gateway itself
pub fn render_response(
    status: StatusCode,
    content_type: &str,
    body: &str,
    extra_headers: &[(&str, String)],
) -> Bytes {
    let mut out = BytesMut::with_capacity(128 + body.len());
    out.put_slice(
        format!(
            "HTTP/1.1 {} {}\r\n",
            status.as_u16(),
            status.canonical_reason().unwrap_or_default()
        )
        .as_bytes(),
    );
    for (name, value) in extra_headers {
        out.put_slice(format!("{}: {}\r\n", name, value).as_bytes());
    }
    out.put_slice(
        format!(
            "Content-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            content_type,
            body.len()
        )
        .as_bytes(),
    );
    out.put_slice(body.as_bytes());
    out.freeze()
}

/// Reply sent to a CONNECT client once the upstream tunnel is up
pub const CONNECT_ESTABLISHED: &[u8] = b"HTTP/1.1 200 Connection established\r\n\r\n";

#[cfg(test)]
mod tests {
    use super::*;

    fn head(raw: &str) -> RequestHead {
        RequestHead::parse(raw.as_bytes()).unwrap().unwrap()
    }

    #[test]
    fn test_partial_head() {
        assert!(RequestHead::parse(b"GET http://a/ HTTP/1.1\r\nHost: a\r\n")
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_malformed_head() {
        assert!(RequestHead::parse(b"\x00\x01garbage\r\n\r\n").is_err());
    }

    #[test]
    fn test_connect_authority() {
        let req = head("CONNECT example.com:8443 HTTP/1.1\r\nHost: example.com:8443\r\n\r\n");
        assert!(req.is_connect());
        assert_eq!(
            req.target_authority().unwrap(),
            ("example.com".to_string(), 8443)
        );

        let req = head("CONNECT [2001:db8::1]:443 HTTP/1.1\r\n\r\n");
        assert_eq!(
            req.target_authority().unwrap(),
            ("2001:db8::1".to_string(), 443)
        );

        let req = head("CONNECT example.com HTTP/1.1\r\n\r\n");
        assert_eq!(req.target_authority().unwrap().1, 443);
    }

    #[test]
    fn test_absolute_uri_authority() {
        let req = head("GET http://example.com/a?b=c HTTP/1.1\r\n\r\n");
        assert_eq!(
            req.target_authority().unwrap(),
            ("example.com".to_string(), 80)
        );

        let req = head("GET https://example.com/ HTTP/1.1\r\n\r\n");
        assert_eq!(req.target_authority().unwrap().1, 80);

        let req = head("GET https://example.com:443/ HTTP/1.1\r\n\r\n");
        assert_eq!(req.target_authority().unwrap().1, 443);

        let req = head("GET http://example.com:8080/ HTTP/1.1\r\n\r\n");
        assert_eq!(req.target_authority().unwrap().1, 8080);
    }

    #[test]
    fn test_origin_form_uses_host_header() {
        let req = head("GET /path HTTP/1.1\r\nHost: example.org:81\r\n\r\n");
        assert_eq!(
            req.target_authority().unwrap(),
            ("example.org".to_string(), 81)
        );

        let req = head("GET /path HTTP/1.1\r\n\r\n");
        assert!(matches!(
            req.target_authority(),
            Err(PoolError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_serialize_upstream() {
        let raw = "POST http://example.com/submit?x=1 HTTP/1.1\r\n\
                   Proxy-Authorization: Basic Zm9vOmJhcg==\r\n\
                   Proxy-Connection: keep-alive\r\n\
                   Content-Length: 5\r\n\r\nhello";
        let out = head(raw).serialize_upstream().unwrap();
        let text = std::str::from_utf8(&out).unwrap();

        assert!(text.starts_with("POST /submit?x=1 HTTP/1.1\r\nHost: example.com\r\n"));
        assert!(text.contains("Content-Length: 5\r\n"));
        assert!(!text.to_ascii_lowercase().contains("proxy-"));
        assert!(text.ends_with("\r\n\r\nhello"));
    }

    #[test]
    fn test_serialize_keeps_existing_host() {
        let out = head("GET http://example.com:8080 HTTP/1.0\r\nHost: example.com:8080\r\n\r\n")
            .serialize_upstream()
            .unwrap();
        let text = std::str::from_utf8(&out).unwrap();
        assert!(text.starts_with("GET / HTTP/1.0\r\nHost: example.com:8080\r\n\r\n"));
    }

    #[test]
    fn test_render_response() {
        let out = render_response(
            StatusCode::PROXY_AUTHENTICATION_REQUIRED,
            "application/json",
            "{}",
            &[("Proxy-Authenticate", "Basic realm=\"Proxy\"".to_string())],
        );
        let text = std::str::from_utf8(&out).unwrap();
        assert!(text.starts_with("HTTP/1.1 407 Proxy Authentication Required\r\n"));
        assert!(text.contains("Proxy-Authenticate: Basic realm=\"Proxy\"\r\n"));
        assert!(text.contains("Content-Length: 2\r\n"));
        assert!(text.ends_with("\r\n\r\n{}"));
    }

    #[tokio::test]
    async fn test_read_request_across_chunks() {
        let mut client = tokio_test::io::Builder::new()
            .read(b"CONNECT a.test:443 HTTP/1.1\r\n")
            .read(b"Host: a.test:443\r\n\r\nearly")
            .build();

        let req = read_request(&mut client).await.unwrap().unwrap();
        assert_eq!(req.target, "a.test:443");
        assert_eq!(req.header("HOST"), Some(&b"a.test:443"[..]));
        assert_eq!(&req.leftover[..], b"early");
    }

    #[tokio::test]
    async fn test_read_request_truncated() {
        let mut client = tokio_test::io::Builder::new()
            .read(b"GET http://a.test/ HTTP/1.1\r\nHost: a")
            .build();

        assert!(matches!(
            read_request(&mut client).await,
            Err(PoolError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_read_request_eof() {
        let (client, mut server) = tokio::io::duplex(64);
        drop(client);
        assert!(read_request(&mut server).await.unwrap().is_none());
    }
}

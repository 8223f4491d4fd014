//! Issues a single templated probe through a candidate proxy

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, COOKIE};
use reqwest::{Client, Method};
use tracing::{debug, instrument};

use super::rules::CompiledCheck;
use super::template;
use crate::error::{PoolError, Result};

/// Headers every probe carries unless a check overrides them
const DEFAULT_HEADERS: &[(&str, &str)] = &[
    ("accept", "text/plain,application/json"),
    ("accept-language", "ja,en-US;q=0.9,en;q=0.8"),
    ("cache-control", "no-cache"),
    ("pragma", "no-cache"),
    (
        "user-agent",
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    ),
];

fn default_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (name, value) in DEFAULT_HEADERS {
        headers.insert(
            HeaderName::from_static(name),
            HeaderValue::from_static(value),
        );
    }
    headers
}

/// Build a client whose every request goes through `candidate`
pub fn build_probe_client(candidate: &str, timeout: Duration) -> Result<Client> {
    let proxy = reqwest::Proxy::all(candidate)?;

    Ok(Client::builder()
        .proxy(proxy)
        .timeout(timeout)
        .connect_timeout(timeout)
        .pool_max_idle_per_host(0)
        .danger_accept_invalid_certs(true)
        .default_headers(default_headers())
        .build()?)
}

/// Decide a check's outcome from the response
///
/// Passes on the expected status code alone; otherwise normal mode needs the
/// pattern to be found in the body and reverse mode needs it to be absent.
pub fn evaluate(check: &CompiledCheck, status: u16, body: &[u8]) -> bool {
    if status == check.spec.rsp_code {
        return true;
    }
    check.pattern.is_match(body) != check.spec.rsp_reverse_re
}

fn build_request(client: &Client, check: &CompiledCheck) -> Result<reqwest::Request> {
    let spec = &check.spec;

    let method = Method::from_bytes(spec.req_method.to_uppercase().as_bytes())
        .map_err(|_| PoolError::CheckFailed(format!("invalid method {}", spec.req_method)))?;

    let mut builder = client.request(method, template::resolve(&spec.req_url));

    if let Some(body) = &spec.req_body {
        builder = builder.body(template::resolve(body));
    }

    if let Some(head) = &spec.req_head {
        let mut headers = HeaderMap::new();
        for (name, value) in head {
            let name = HeaderName::from_bytes(template::resolve(name).as_bytes())
                .map_err(|e| PoolError::CheckFailed(format!("invalid header name: {}", e)))?;
            let value = HeaderValue::from_str(&template::resolve(value))
                .map_err(|e| PoolError::CheckFailed(format!("invalid header value: {}", e)))?;
            headers.insert(name, value);
        }
        builder = builder.headers(headers);
    }

    if let Some(cookie) = &spec.req_cookie {
        let value = HeaderValue::from_str(&template::resolve(cookie))
            .map_err(|e| PoolError::CheckFailed(format!("invalid cookie: {}", e)))?;
        builder = builder.header(COOKIE, value);
    }

    Ok(builder.build()?)
}

/// Run one check; `Ok(())` means it passed
#[instrument(skip(client, check), fields(url = %check.spec.req_url))]
pub async fn run_check(client: &Client, check: &CompiledCheck) -> Result<()> {
    let request = build_request(client, check)?;
    let response = client.execute(request).await?;

    let status = response.status().as_u16();
    if status == check.spec.rsp_code {
        return Ok(());
    }

    let body = response.bytes().await?;
    if evaluate(check, status, &body) {
        Ok(())
    } else {
        debug!(status, "Response did not satisfy check pattern");
        Err(PoolError::CheckFailed(format!(
            "status {} and body did not satisfy /{}/",
            status, check.spec.rsp_body_re
        )))
    }
}

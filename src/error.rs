use std::sync::Arc;

use http::StatusCode;
use serde_json::json;
use thiserror::Error;

/// Unified error type for the proxy pool and gateway
#[derive(Error, Debug)]
pub enum PoolError {
    // Pool errors
    #[error("No proxies available")]
    NoProxiesAvailable,

    #[error("Proxy connection failed: {0}")]
    ProxyConnectionFailed(String),

    #[error("Invalid proxy address: {0}")]
    InvalidProxyAddress(String),

    #[error("Unsupported proxy protocol: {0}")]
    UnsupportedProtocol(String),

    // Check errors
    #[error("Check failed: {0}")]
    CheckFailed(String),

    #[error("Invalid pattern: {0}")]
    Pattern(#[from] regex::Error),

    // Authentication errors
    #[error("Missing proxy authorization")]
    MissingAuthHeader,

    #[error("Unsupported authorization method")]
    InvalidAuthHeader,

    #[error("Wrong authorization")]
    InvalidCredentials,

    // Rate limiting
    #[error("Rate limit exceeded for {identity}")]
    RateLimitExceeded { identity: String },

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // Request errors
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Operation timed out")]
    Timeout,

    // I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // HTTP client errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // An error from a load other requests were waiting on
    #[error(transparent)]
    Shared(Arc<PoolError>),
}

/// Result type alias for pool operations
pub type Result<T> = std::result::Result<T, PoolError>;

impl PoolError {
    /// Get the HTTP status code the gateway answers with for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            PoolError::InvalidRequest(_) => StatusCode::BAD_REQUEST,

            // 407 Proxy Authentication Required
            PoolError::MissingAuthHeader
            | PoolError::InvalidAuthHeader
            | PoolError::InvalidCredentials => StatusCode::PROXY_AUTHENTICATION_REQUIRED,

            // 429 Too Many Requests
            PoolError::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,

            // 503 Service Unavailable
            PoolError::NoProxiesAvailable
            | PoolError::ProxyConnectionFailed(_)
            | PoolError::InvalidProxyAddress(_)
            | PoolError::UnsupportedProtocol(_)
            | PoolError::Timeout => StatusCode::SERVICE_UNAVAILABLE,

            // 500 Internal Server Error
            PoolError::CheckFailed(_)
            | PoolError::Pattern(_)
            | PoolError::InvalidConfig(_)
            | PoolError::Io(_)
            | PoolError::Http(_)
            | PoolError::Json(_) => StatusCode::INTERNAL_SERVER_ERROR,

            PoolError::Shared(inner) => inner.status_code(),
        }
    }

    /// Check if this is an authentication failure
    pub fn is_auth_error(&self) -> bool {
        self.status_code() == StatusCode::PROXY_AUTHENTICATION_REQUIRED
    }

    /// Render the error as the JSON body sent to gateway clients
    pub fn to_json_body(&self) -> String {
        json!({ "error": self.to_string() }).to_string()
    }
}

impl From<url::ParseError> for PoolError {
    fn from(err: url::ParseError) -> Self {
        PoolError::InvalidProxyAddress(err.to_string())
    }
}

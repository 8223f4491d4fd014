pub mod auth;
pub mod rate_limit;

pub use auth::ProxyAuth;
pub use rate_limit::RateLimiter;

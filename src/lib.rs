//! Proxy Pool - self-validating upstream proxy pool
//!
//! Harvests candidate proxies from public feeds, keeps only those that pass
//! every configured health check, and hands them out through a sticky
//! authenticating gateway.
//!
//! ## Features
//!
//! - Periodic feed harvesting with per-cycle deduplication
//! - Templated health checks with outer-IP aware response patterns
//! - Bounded validation worker pools and a bounded distribution channel
//! - Continuous revalidation of the ready pool
//! - HTTP, HTTPS, SOCKS4, SOCKS4a, SOCKS5 and SOCKS5h upstreams
//! - Basic-auth gateway with per-identity sticky assignments

pub mod check;
pub mod config;
pub mod error;
pub mod gateway;
pub mod models;
pub mod pool;
pub mod services;

#[cfg(test)]
pub(crate) mod testing;

pub use config::Config;
pub use error::{PoolError, Result};

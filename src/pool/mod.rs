//! Proxy pool: fetching, validation and distribution of upstream proxies

pub mod channel;
pub mod dedup;
pub mod engine;
pub mod validator;

use std::time::Duration;

use async_trait::async_trait;

pub use channel::ProxyChannel;
pub use dedup::DedupSet;
pub use engine::{PoolEngine, FETCH_BATCH_SIZE, REVALIDATE_BATCH_SIZE};
pub use validator::CandidateValidator;

use crate::error::Result;

/// Source of validated proxies for the gateway
#[async_trait]
pub trait ProxyProvider: Send + Sync {
    /// Take one proxy, waiting at most `wait` when given
    async fn acquire(&self, wait: Option<Duration>) -> Result<String>;
}

#[async_trait]
impl ProxyProvider for ProxyChannel {
    async fn acquire(&self, wait: Option<Duration>) -> Result<String> {
        self.pop_timeout(wait).await
    }
}

/// Capacity of each validation queue and its worker pool
pub fn queue_capacity(max_pool: usize) -> usize {
    (max_pool / 50).clamp(1, 1000)
}

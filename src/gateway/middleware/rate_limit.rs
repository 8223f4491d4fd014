//! Per-identity rate limiting for gateway connections
//!
//! Uses the governor crate for efficient, lock-free rate limiting.

use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter as GovRateLimiter};
use tracing::{debug, warn};

use crate::error::{PoolError, Result};

type DirectLimiter = GovRateLimiter<NotKeyed, InMemoryState, DefaultClock>;

#[derive(Debug)]
struct IdentityLimiter {
    limiter: Arc<DirectLimiter>,
    last_seen_ms: AtomicU64,
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Rate limiter keyed by authenticated identity
#[derive(Clone)]
pub struct RateLimiter {
    enabled: bool,
    limiters: Arc<DashMap<String, IdentityLimiter>>,
    quota: Quota,
    /// How long to keep per-identity state without activity
    max_idle: Duration,
}

impl RateLimiter {
    pub fn new(enabled: bool, requests_per_second: u32, burst_size: u32) -> Self {
        let per_second = NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN);
        let burst = NonZeroU32::new(burst_size).unwrap_or(NonZeroU32::MIN);
        Self {
            enabled,
            limiters: Arc::new(DashMap::new()),
            quota: Quota::per_second(per_second).allow_burst(burst),
            max_idle: Duration::from_secs(10 * 60),
        }
    }

    pub fn disabled() -> Self {
        Self::new(false, 100, 100)
    }

    /// Check whether `identity` may open another connection
    pub fn check(&self, identity: &str) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }

        match self.limiter_for(identity).check() {
            Ok(_) => {
                debug!(identity, "Rate limit check passed");
                Ok(())
            }
            Err(_) => {
                warn!(identity, "Rate limit exceeded");
                Err(PoolError::RateLimitExceeded {
                    identity: identity.to_string(),
                })
            }
        }
    }

    fn limiter_for(&self, identity: &str) -> Arc<DirectLimiter> {
        let now_ms = now_ms();
        let entry = self
            .limiters
            .entry(identity.to_string())
            .or_insert_with(|| IdentityLimiter {
                limiter: Arc::new(GovRateLimiter::direct(self.quota)),
                last_seen_ms: AtomicU64::new(now_ms),
            });

        entry.last_seen_ms.store(now_ms, Ordering::Relaxed);
        entry.limiter.clone()
    }

    /// Forget identities idle for longer than the retention window
    pub fn cleanup(&self) {
        let now_ms = now_ms();
        let max_idle_ms = self.max_idle.as_millis() as u64;

        self.limiters.retain(|_, entry| {
            let last_seen = entry.last_seen_ms.load(Ordering::Relaxed);
            now_ms.saturating_sub(last_seen) <= max_idle_ms
        });
    }

    /// Number of identities currently tracked
    pub fn identity_count(&self) -> usize {
        self.limiters.len()
    }
}

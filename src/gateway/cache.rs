//! Sticky identity -> proxy assignments
//!
//! Each identity keeps the proxy it was handed until the entry has gone unused
//! for the configured TTL or is invalidated after a failed dial. Loads are
//! coalesced per identity so concurrent requests from one client consume a
//! single proxy between them.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;
use moka::ops::compute::{CompResult, Op};
use tracing::debug;

use crate::error::{PoolError, Result};

pub struct AssignmentCache {
    assignments: Cache<String, String>,
}

impl AssignmentCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            assignments: Cache::builder().time_to_idle(ttl).build(),
        }
    }

    /// Current assignment for `identity`, running `loader` on a miss
    ///
    /// Every hit slides the expiry forward. A loader error leaves the identity
    /// unassigned and is returned to every request that waited on it.
    pub async fn get_or_load<F, Fut>(&self, identity: &str, loader: F) -> Result<String>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<String>>,
    {
        let proxy = self
            .assignments
            .try_get_with_by_ref(identity, async {
                let proxy = loader().await?;
                debug!(identity, proxy = %proxy, "Assigned proxy");
                Ok::<_, PoolError>(proxy)
            })
            .await
            .map_err(|e| Arc::try_unwrap(e).unwrap_or_else(PoolError::Shared))?;
        Ok(proxy)
    }

    /// Live assignment for `identity`; counts as a use
    pub async fn peek(&self, identity: &str) -> Option<String> {
        self.assignments.get(identity).await
    }

    /// Drop the assignment for `identity` if it still points at `proxy`
    ///
    /// Returns whether an entry was removed. A newer assignment made by a
    /// concurrent request is left alone.
    pub async fn invalidate(&self, identity: &str, proxy: &str) -> bool {
        let outcome = self
            .assignments
            .entry_by_ref(identity)
            .and_compute_with(|current| {
                let stale = current.is_some_and(|e| e.value().as_str() == proxy);
                std::future::ready(if stale { Op::Remove } else { Op::Nop })
            })
            .await;
        matches!(outcome, CompResult::Removed(_))
    }
}

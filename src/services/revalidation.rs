//! Pool revalidation service
//!
//! Every interval the whole distribution channel is drained and pushed back
//! through the checks, so proxies that went bad stop being handed out.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::interval;
use tracing::{info, instrument};

use crate::pool::PoolEngine;

/// Revalidation service configuration
#[derive(Clone)]
pub struct RevalidationConfig {
    /// How often to revalidate (in seconds)
    pub interval_secs: u64,
}

impl Default for RevalidationConfig {
    fn default() -> Self {
        Self { interval_secs: 60 }
    }
}

pub struct RevalidationService {
    engine: Arc<PoolEngine>,
    config: RevalidationConfig,
}

impl RevalidationService {
    pub fn new(engine: Arc<PoolEngine>, config: RevalidationConfig) -> Self {
        Self { engine, config }
    }

    /// Run the revalidation service
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Starting revalidation service (interval: {}s)",
            self.config.interval_secs
        );

        let mut ticker = interval(Duration::from_secs(self.config.interval_secs.max(1)));
        ticker.tick().await; // Skip immediate tick

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.revalidate_once().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Revalidation service shutting down");
                        break;
                    }
                }
            }
        }
    }

    pub async fn revalidate_once(&self) -> usize {
        let resubmitted = self.engine.revalidate().await;
        info!(
            resubmitted,
            accepted_this_cycle = self.engine.seen_count(),
            outer_ip = %self.engine.rules().outer_ip(),
            "Pool revalidation started"
        );
        resubmitted
    }
}

/// Handle for managing the revalidation service
pub struct RevalidationHandle {
    shutdown_tx: watch::Sender<bool>,
}

impl RevalidationHandle {
    pub fn new() -> (Self, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        (Self { shutdown_tx: tx }, rx)
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

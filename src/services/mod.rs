//! Background services

pub mod revalidation;
pub mod rule_refresh;

pub use revalidation::{RevalidationHandle, RevalidationService};
pub use rule_refresh::{RuleRefreshHandle, RuleRefreshService};

use tokio::sync::watch;

/// Resolve once shutdown has been signalled or the sender is gone
pub async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

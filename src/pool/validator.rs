//! Candidate validation: every configured check must pass

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tracing::{debug, instrument};

use super::dedup::DedupSet;
use crate::check::{build_probe_client, run_check, CheckRules};

/// Runs the configured checks against candidates
#[derive(Clone)]
pub struct CandidateValidator {
    rules: Arc<CheckRules>,
    check_timeout: Duration,
}

impl CandidateValidator {
    pub fn new(rules: Arc<CheckRules>, check_timeout: Duration) -> Self {
        Self {
            rules,
            check_timeout,
        }
    }

    /// Validate one candidate
    ///
    /// Unless `force` is set, a candidate already accepted this cycle is
    /// confirmed without touching the network.
    #[instrument(skip(self, seen))]
    pub async fn validate(&self, candidate: &str, seen: &DedupSet, force: bool) -> bool {
        if !force && seen.contains(candidate) {
            return true;
        }
        self.probe(candidate).await
    }

    /// Validate a whole batch concurrently
    pub async fn validate_batch(
        &self,
        batch: &[String],
        seen: &DedupSet,
        force: bool,
    ) -> Vec<(String, bool)> {
        join_all(batch.iter().map(|candidate| async move {
            let accepted = self.validate(candidate, seen, force).await;
            (candidate.clone(), accepted)
        }))
        .await
    }

    /// Run every check through one client bound to `candidate`
    ///
    /// All checks run to completion; the candidate passes only if none failed.
    pub async fn probe(&self, candidate: &str) -> bool {
        let checks = self.rules.snapshot();
        if checks.is_empty() {
            return true;
        }

        let client = match build_probe_client(candidate, self.check_timeout) {
            Ok(client) => client,
            Err(e) => {
                debug!(candidate, error = %e, "Cannot build probe client");
                return false;
            }
        };

        let results = join_all(checks.iter().map(|check| run_check(&client, check))).await;

        let failed = results.iter().filter(|r| r.is_err()).count();
        if failed > 0 {
            debug!(candidate, failed, total = checks.len(), "Candidate rejected");
            return false;
        }

        debug!(candidate, "Candidate passed all checks");
        true
    }
}

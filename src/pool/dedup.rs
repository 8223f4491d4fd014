use std::collections::HashSet;

use parking_lot::Mutex;

/// Candidates accepted during the current fetch cycle
#[derive(Debug, Default)]
pub struct DedupSet {
    inner: Mutex<HashSet<String>>,
}

impl DedupSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, candidate: &str) -> bool {
        self.inner.lock().contains(candidate)
    }

    /// Record `candidate`; returns false if it was already recorded
    pub fn insert(&self, candidate: &str) -> bool {
        self.inner.lock().insert(candidate.to_string())
    }

    /// Forget everything (start of a fetch cycle)
    pub fn clear(&self) {
        self.inner.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

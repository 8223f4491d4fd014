//! Bounded FIFO of accepted proxies
//!
//! `push` waits while the channel is full and `pop` waits while it is empty, so
//! the channel is where pool saturation throttles acquisition and where an empty
//! pool holds back client admission.

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Semaphore;

use crate::error::{PoolError, Result};

pub struct ProxyChannel {
    items: Mutex<VecDeque<String>>,
    /// One permit per queued item
    filled: Semaphore,
    /// One permit per free slot
    free: Semaphore,
    capacity: usize,
}

impl ProxyChannel {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity)),
            filled: Semaphore::new(0),
            free: Semaphore::new(capacity),
            capacity,
        }
    }

    /// Append a proxy, waiting for room if the channel is full
    pub async fn push(&self, candidate: String) {
        match self.free.acquire().await {
            Ok(permit) => permit.forget(),
            // Semaphores are never closed
            Err(_) => return,
        }
        self.items.lock().push_back(candidate);
        self.filled.add_permits(1);
    }

    /// Append a proxy only if there is room right now
    #[cfg(test)]
    pub(crate) fn try_push(&self, candidate: String) -> bool {
        match self.free.try_acquire() {
            Ok(permit) => permit.forget(),
            Err(_) => return false,
        }
        self.items.lock().push_back(candidate);
        self.filled.add_permits(1);
        true
    }

    /// Take the oldest proxy, waiting until one is available
    pub async fn pop(&self) -> String {
        loop {
            if let Ok(permit) = self.filled.acquire().await {
                permit.forget();
            }
            if let Some(candidate) = self.take_front() {
                return candidate;
            }
        }
    }

    /// Like `pop`, but gives up after `wait` when one is given
    pub async fn pop_timeout(&self, wait: Option<Duration>) -> Result<String> {
        match wait {
            None => Ok(self.pop().await),
            Some(wait) => tokio::time::timeout(wait, self.pop())
                .await
                .map_err(|_| PoolError::NoProxiesAvailable),
        }
    }

    /// Take the oldest proxy if one is queued
    pub fn try_pop(&self) -> Option<String> {
        let permit = self.filled.try_acquire().ok()?;
        permit.forget();
        self.take_front()
    }

    /// Remove and return everything currently queued
    pub fn drain(&self) -> Vec<String> {
        let mut drained = Vec::new();
        while let Some(candidate) = self.try_pop() {
            drained.push(candidate);
        }
        drained
    }

    fn take_front(&self) -> Option<String> {
        let candidate = self.items.lock().pop_front();
        if candidate.is_some() {
            self.free.add_permits(1);
        }
        candidate
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_fifo_order() {
        let channel = ProxyChannel::new(4);
        channel.push("a".to_string()).await;
        channel.push("b".to_string()).await;
        channel.push("c".to_string()).await;

        assert_eq!(channel.len(), 3);
        assert_eq!(channel.pop().await, "a");
        assert_eq!(channel.pop().await, "b");
        assert_eq!(channel.pop().await, "c");
        assert!(channel.is_empty());
    }

    #[tokio::test]
    async fn test_pop_waits_for_push() {
        let channel = Arc::new(ProxyChannel::new(2));

        let waiter = {
            let channel = channel.clone();
            tokio::spawn(async move { channel.pop().await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        channel.push("socks5://1.2.3.4:1080".to_string()).await;
        let popped = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("pop should complete after push")
            .unwrap();
        assert_eq!(popped, "socks5://1.2.3.4:1080");
    }

    #[tokio::test]
    async fn test_pop_timeout_on_empty() {
        let channel = ProxyChannel::new(1);
        let result = channel.pop_timeout(Some(Duration::from_millis(20))).await;
        assert!(matches!(result, Err(PoolError::NoProxiesAvailable)));

        channel.push("a".to_string()).await;
        assert_eq!(channel.pop_timeout(Some(Duration::from_millis(20))).await.unwrap(), "a");
    }

    #[tokio::test]
    async fn test_push_waits_when_full() {
        let channel = Arc::new(ProxyChannel::new(1));
        channel.push("a".to_string()).await;
        assert!(!channel.try_push("b".to_string()));

        let pusher = {
            let channel = channel.clone();
            tokio::spawn(async move { channel.push("b".to_string()).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!pusher.is_finished());

        assert_eq!(channel.pop().await, "a");
        tokio::time::timeout(Duration::from_secs(1), pusher)
            .await
            .expect("push should complete after pop")
            .unwrap();
        assert_eq!(channel.pop().await, "b");
    }

    #[tokio::test]
    async fn test_drain_empties_and_frees_capacity() {
        let channel = ProxyChannel::new(3);
        for name in ["a", "b", "c"] {
            assert!(channel.try_push(name.to_string()));
        }

        assert_eq!(channel.drain(), vec!["a", "b", "c"]);
        assert!(channel.is_empty());
        assert!(channel.try_pop().is_none());

        for name in ["d", "e", "f"] {
            assert!(channel.try_push(name.to_string()));
        }
        assert_eq!(channel.len(), 3);
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        assert_eq!(ProxyChannel::new(0).capacity(), 1);
    }
}

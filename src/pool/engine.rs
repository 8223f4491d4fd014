//! The proxy pool engine
//!
//! Owns the fetch loop, the per-cycle dedup set, the two validation queues with
//! their bounded worker pools, and the distribution channel the gateway draws
//! from.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use super::channel::ProxyChannel;
use super::dedup::DedupSet;
use super::validator::CandidateValidator;
use super::ProxyProvider;
use crate::check::CheckRules;
use crate::config::PoolConfig;
use crate::error::Result;
use crate::models::ProxySource;
use crate::services::shutdown_requested;

/// Candidates per batch when enqueuing a freshly fetched feed
pub const FETCH_BATCH_SIZE: usize = 500;
/// Candidates per batch when resubmitting the pool for revalidation
pub const REVALIDATE_BATCH_SIZE: usize = 50;

type Batch = Vec<String>;

struct Queues {
    fresh: mpsc::Receiver<Batch>,
    revalidate: mpsc::Receiver<Batch>,
}

pub struct PoolEngine {
    config: PoolConfig,
    sources: Vec<ProxySource>,
    rules: Arc<CheckRules>,
    validator: CandidateValidator,
    seen: DedupSet,
    channel: ProxyChannel,
    fresh_tx: mpsc::Sender<Batch>,
    revalidate_tx: mpsc::Sender<Batch>,
    queues: Mutex<Option<Queues>>,
    http: reqwest::Client,
}

impl PoolEngine {
    pub fn new(
        config: PoolConfig,
        sources: Vec<ProxySource>,
        rules: Arc<CheckRules>,
    ) -> Result<Arc<Self>> {
        let queue_capacity = config.queue_capacity();
        let (fresh_tx, fresh) = mpsc::channel(queue_capacity);
        let (revalidate_tx, revalidate) = mpsc::channel(queue_capacity);

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.source_timeout))
            .connect_timeout(Duration::from_secs(config.source_timeout))
            .pool_max_idle_per_host(0)
            .danger_accept_invalid_certs(true)
            .no_proxy()
            .build()?;

        let validator =
            CandidateValidator::new(rules.clone(), Duration::from_secs(config.check_timeout));

        Ok(Arc::new(Self {
            channel: ProxyChannel::new(config.max_size),
            config,
            sources,
            rules,
            validator,
            seen: DedupSet::new(),
            fresh_tx,
            revalidate_tx,
            queues: Mutex::new(Some(Queues { fresh, revalidate })),
            http,
        }))
    }

    pub fn rules(&self) -> &Arc<CheckRules> {
        &self.rules
    }

    /// Number of proxies waiting in the distribution channel
    pub fn len(&self) -> usize {
        self.channel.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channel.is_empty()
    }

    /// Number of candidates accepted in the current fetch cycle
    pub fn seen_count(&self) -> usize {
        self.seen.len()
    }

    /// Take one proxy, waiting until one has been validated
    pub async fn pop(&self) -> String {
        self.channel.pop().await
    }

    fn take_queues(&self) -> Option<Queues> {
        self.queues.lock().take()
    }

    /// Spawn the fetch loop and both validation worker pools
    ///
    /// Only the first call starts anything.
    pub fn start(self: &Arc<Self>, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let Some(queues) = self.take_queues() else {
            warn!("Pool engine already started");
            return Vec::new();
        };

        info!(
            sources = self.sources.len(),
            checks = self.rules.len(),
            max_pool = self.channel.capacity(),
            workers = self.config.queue_capacity(),
            "Starting proxy pool engine"
        );

        vec![
            tokio::spawn(self.clone().run_fetcher(shutdown.clone())),
            tokio::spawn(
                self.clone()
                    .run_validation_queue(queues.fresh, false, shutdown.clone()),
            ),
            tokio::spawn(
                self.clone()
                    .run_validation_queue(queues.revalidate, true, shutdown),
            ),
        ]
    }

    #[instrument(skip(self, shutdown))]
    async fn run_fetcher(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let pause = Duration::from_secs(self.config.fetch_pause);

        loop {
            tokio::select! {
                enqueued = self.fetch_cycle() => {
                    debug!(enqueued, "Fetch cycle complete");
                }
                _ = shutdown_requested(&mut shutdown) => break,
            }

            tokio::select! {
                _ = tokio::time::sleep(pause) => {}
                _ = shutdown_requested(&mut shutdown) => break,
            }
        }

        info!("Fetch loop shutting down");
    }

    /// One full fetch cycle: reset the dedup set, then pull every source and
    /// enqueue its candidates in batches
    ///
    /// A failing source is logged and skipped. Returns the number of candidates
    /// enqueued.
    pub async fn fetch_cycle(&self) -> usize {
        self.seen.clear();

        let mut enqueued = 0;
        for source in &self.sources {
            let candidates = match self.fetch_source(source).await {
                Ok(candidates) => candidates,
                Err(e) => {
                    warn!(url = %source.url, error = %e, "Failed to fetch proxy source");
                    continue;
                }
            };

            debug!(url = %source.url, count = candidates.len(), "Fetched proxy source");

            for batch in candidates.chunks(FETCH_BATCH_SIZE) {
                if self.fresh_tx.send(batch.to_vec()).await.is_err() {
                    warn!("Validation queue closed, abandoning fetch cycle");
                    return enqueued;
                }
                enqueued += batch.len();
            }
        }

        enqueued
    }

    async fn fetch_source(&self, source: &ProxySource) -> Result<Vec<String>> {
        let response = self.http.get(&source.url).send().await?.error_for_status()?;
        let body = response.text().await?;
        Ok(source.parse_feed(&body))
    }

    /// Drain one validation queue, keeping at most `queue_capacity` batches in
    /// flight
    #[instrument(skip(self, queue, shutdown))]
    async fn run_validation_queue(
        self: Arc<Self>,
        mut queue: mpsc::Receiver<Batch>,
        force: bool,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let permits = Arc::new(Semaphore::new(self.config.queue_capacity()));

        loop {
            let batch = tokio::select! {
                batch = queue.recv() => batch,
                _ = shutdown_requested(&mut shutdown) => None,
            };
            let Some(batch) = batch else {
                break;
            };

            let permit = tokio::select! {
                permit = permits.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
                _ = shutdown_requested(&mut shutdown) => break,
            };

            let engine = self.clone();
            tokio::spawn(async move {
                let _permit = permit;
                engine.process_batch(&batch, force).await;
            });
        }

        debug!(force, "Validation workers shutting down");
    }

    /// Validate a batch and accept whatever passed
    pub async fn process_batch(&self, batch: &[String], force: bool) -> usize {
        let results = self.validator.validate_batch(batch, &self.seen, force).await;
        let pushed = self.accept(results).await;
        if pushed > 0 {
            debug!(batch = batch.len(), pushed, force, "Accepted validated proxies");
        }
        pushed
    }

    /// Record accepted candidates and push them to the distribution channel
    ///
    /// Fresh and revalidated results share this path: a candidate already
    /// recorded this cycle is not pushed again.
    pub async fn accept(&self, results: Vec<(String, bool)>) -> usize {
        let mut pushed = 0;
        for (candidate, accepted) in results {
            if !accepted || !self.seen.insert(&candidate) {
                continue;
            }
            self.channel.push(candidate).await;
            pushed += 1;
        }
        pushed
    }

    /// Drain the distribution channel and resubmit everything for a forced
    /// re-check; returns how many proxies were resubmitted
    pub async fn revalidate(&self) -> usize {
        let drained = self.channel.drain();
        let count = drained.len();

        for batch in drained.chunks(REVALIDATE_BATCH_SIZE) {
            if self.revalidate_tx.send(batch.to_vec()).await.is_err() {
                warn!("Revalidation queue closed");
                break;
            }
        }

        count
    }
}

#[async_trait]
impl ProxyProvider for PoolEngine {
    async fn acquire(&self, wait: Option<Duration>) -> Result<String> {
        self.channel.pop_timeout(wait).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CheckSpec;
    use crate::testing;

    fn config(max_size: usize) -> PoolConfig {
        PoolConfig {
            max_size,
            cache_secs: 300,
            check_timeout: 2,
            source_timeout: 2,
            fetch_pause: 5,
            ip_echo_url: "http://127.0.0.1:1".to_string(),
            checks_file: String::new(),
            sources_file: String::new(),
        }
    }

    fn engine(sources: Vec<ProxySource>, specs: Vec<CheckSpec>) -> Arc<PoolEngine> {
        PoolEngine::new(config(100), sources, Arc::new(CheckRules::new(specs).unwrap())).unwrap()
    }

    fn candidates(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| format!("socks5://{}", n)).collect()
    }

    #[tokio::test]
    async fn test_duplicate_across_sources_pushed_once() {
        let engine = engine(vec![], vec![]);

        let first_feed = candidates(&["1.1.1.1:1080", "2.2.2.2:1080"]);
        let second_feed = candidates(&["2.2.2.2:1080", "3.3.3.3:1080"]);

        assert_eq!(engine.process_batch(&first_feed, false).await, 2);
        assert_eq!(engine.process_batch(&second_feed, false).await, 1);

        assert_eq!(engine.len(), 3);
        assert_eq!(engine.seen_count(), 3);
    }

    #[tokio::test]
    async fn test_rejected_candidates_not_pushed() {
        let engine = engine(vec![], vec![]);
        let pushed = engine
            .accept(
                vec![
                    ("socks5://1.1.1.1:1080".to_string(), true),
                    ("socks5://2.2.2.2:1080".to_string(), false),
                ],
            )
            .await;
        assert_eq!(pushed, 1);
        assert_eq!(engine.pop().await, "socks5://1.1.1.1:1080");
    }

    #[tokio::test]
    async fn test_fetch_cycle_skips_failing_source_and_resets_dedup() {
        let feed = testing::spawn_http_responder(|_| {
            (200, "10.0.0.1:1080\r\n10.0.0.2:1080\r\n\r\n".to_string())
        })
        .await;
        let dead = testing::refused_addr().await;

        let engine = engine(
            vec![
                ProxySource::new(format!("http://{}/list.txt", dead), "socks5"),
                ProxySource::new(format!("http://{}/list.txt", feed), "socks5"),
            ],
            vec![],
        );
        let mut queues = engine.take_queues().unwrap();

        engine.seen.insert("socks5://stale:1");
        assert_eq!(engine.fetch_cycle().await, 2);
        assert_eq!(engine.seen_count(), 0);

        let batch = queues.fresh.recv().await.unwrap();
        assert_eq!(batch, candidates(&["10.0.0.1:1080", "10.0.0.2:1080"]));
    }

    #[tokio::test]
    async fn test_fetch_cycle_ignores_error_status() {
        let feed = testing::spawn_http_responder(|_| (500, "1.2.3.4:80".to_string())).await;
        let engine = engine(
            vec![ProxySource::new(format!("http://{}/", feed), "http")],
            vec![],
        );
        let _queues = engine.take_queues();
        assert_eq!(engine.fetch_cycle().await, 0);
    }

    #[tokio::test]
    async fn test_revalidate_drains_and_repushes_passing() {
        let engine = engine(vec![], vec![]);
        let mut queues = engine.take_queues().unwrap();

        let accepted = candidates(&["1.1.1.1:1080", "2.2.2.2:1080", "3.3.3.3:1080"]);
        engine.process_batch(&accepted, false).await;
        assert_eq!(engine.len(), 3);

        // A new fetch cycle has started since these were accepted
        engine.seen.clear();

        assert_eq!(engine.revalidate().await, 3);
        assert!(engine.is_empty());

        let batch = queues.revalidate.recv().await.unwrap();
        assert_eq!(batch.len(), 3);

        assert_eq!(engine.process_batch(&batch, true).await, 3);
        assert_eq!(engine.len(), 3);
        assert_eq!(engine.seen_count(), 3);
    }

    #[tokio::test]
    async fn test_fresh_and_revalidated_result_pushed_once_per_cycle() {
        let engine = engine(vec![], vec![]);
        let proxy = "socks5://4.4.4.4:1080".to_string();

        assert_eq!(engine.accept(vec![(proxy.clone(), true)]).await, 1);
        assert_eq!(engine.accept(vec![(proxy.clone(), true)]).await, 0);
        assert_eq!(engine.len(), 1);

        // Revalidated before the fresh path re-accepts it in the next cycle
        engine.seen.clear();
        assert_eq!(engine.process_batch(&[proxy.clone()], true).await, 1);
        assert_eq!(engine.process_batch(&[proxy.clone()], false).await, 0);
        assert_eq!(engine.len(), 2);
        assert_eq!(engine.seen_count(), 1);
    }

    #[tokio::test]
    async fn test_revalidate_chunks_batches() {
        let engine = engine(vec![], vec![]);
        let mut queues = engine.take_queues().unwrap();

        let names: Vec<String> = (0..75).map(|i| format!("10.0.0.{}:1080", i)).collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        engine.process_batch(&candidates(&refs), false).await;

        assert_eq!(engine.revalidate().await, 75);
        assert_eq!(queues.revalidate.recv().await.unwrap().len(), REVALIDATE_BATCH_SIZE);
        assert_eq!(queues.revalidate.recv().await.unwrap().len(), 25);
    }

    #[tokio::test]
    async fn test_revalidation_drops_decayed_proxy() {
        let dead = format!("http://{}", testing::refused_addr().await);
        let engine = engine(
            vec![],
            vec![CheckSpec {
                req_url: "http://probe.test/".to_string(),
                req_method: "GET".to_string(),
                req_body: None,
                req_head: None,
                req_cookie: None,
                rsp_code: 200,
                rsp_body_re: String::new(),
                rsp_reverse_re: false,
            }],
        );
        let mut queues = engine.take_queues().unwrap();

        // Accepted earlier in this cycle, so the fresh path would short-circuit
        engine.accept(vec![(dead.clone(), true)]).await;
        assert_eq!(engine.revalidate().await, 1);

        let batch = queues.revalidate.recv().await.unwrap();
        assert_eq!(engine.process_batch(&batch, true).await, 0);
        assert!(engine.is_empty());
    }

    #[tokio::test]
    async fn test_acquire_waits_for_validated_proxy() {
        let engine = engine(vec![], vec![]);

        let waiter = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.acquire(None).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        engine
            .process_batch(&candidates(&["9.9.9.9:1080"]), false)
            .await;
        let proxy = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(proxy, "socks5://9.9.9.9:1080");
    }

    #[tokio::test]
    async fn test_start_only_once() {
        let engine = engine(vec![], vec![]);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handles = engine.start(shutdown_rx.clone());
        assert_eq!(handles.len(), 3);
        assert!(engine.start(shutdown_rx).is_empty());

        shutdown_tx.send(true).unwrap();
        for handle in handles {
            tokio::time::timeout(Duration::from_secs(2), handle)
                .await
                .expect("engine task should stop on shutdown")
                .unwrap();
        }
    }
}

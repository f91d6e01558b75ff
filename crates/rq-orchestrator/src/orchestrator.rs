use crate::config::OrchestratorConfig;
use crate::Result;

use rq_core::backoff::{self, Backoff};
use rq_store::{QueueStore, StoreError};
use serde::Serialize;
use std::sync::Arc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Calls made for a transient store failure before a worker is skipped for
/// this sweep
const STORE_CALL_ATTEMPTS: u32 = 3;

/// Tasks handed back to the pending queue for one worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Recovery {
    pub worker_id: String,
    pub recovered: usize,
}

/// Detects workers whose heartbeat expired and returns their in-flight tasks
/// to the pending queue.
///
/// Liveness is decided only by the heartbeat key. Any identity found through
/// an in-flight queue or the known-workers set without a live heartbeat is
/// dead, even if it never heartbeated at all.
pub struct Orchestrator {
    config: OrchestratorConfig,
    store: Arc<dyn QueueStore>,
    shutdown: CancellationToken,
}

impl Orchestrator {
    pub fn new(config: OrchestratorConfig, store: Arc<dyn QueueStore>) -> Result<Self> {
        config.validate()?;
        Ok(Orchestrator {
            config,
            store,
            shutdown: CancellationToken::new(),
        })
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Poll until shutdown; the first sweep runs immediately.
    pub async fn run(&self) {
        info!(
            component = "orchestrator",
            event = "starting",
            poll_interval_secs = self.config.poll_interval_secs,
            "Starting orchestrator"
        );

        let mut interval = tokio::time::interval(self.config.poll_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = interval.tick() => {
                    if let Err(e) = self.check_workers().await {
                        error!(
                            component = "orchestrator",
                            event = "poll_failed",
                            error = %e,
                            "Liveness sweep failed, retrying next poll"
                        );
                    }
                }
            }
        }

        info!(component = "orchestrator", event = "stopped", "Orchestrator stopped");
    }

    /// One liveness sweep over every discovered worker identity.
    ///
    /// Returns the recoveries performed, including dead workers whose
    /// in-flight queue was already empty. Transient store errors are retried
    /// per call; a worker whose calls still fail is logged and skipped so the
    /// rest of the sweep goes ahead. Only a failure to list workers is
    /// returned.
    pub async fn check_workers(&self) -> std::result::Result<Vec<Recovery>, StoreError> {
        let worker_ids = self.with_retry(|| self.store.list_worker_ids()).await?;
        debug!(component = "orchestrator", count = worker_ids.len(), "Checking workers");

        let mut recoveries = Vec::new();
        for worker_id in worker_ids {
            match self.with_retry(|| self.store.is_alive(&worker_id)).await {
                Ok(true) => continue,
                Ok(false) => {}
                Err(e) => {
                    error!(
                        component = "orchestrator",
                        event = "liveness_check_failed",
                        worker_id = %worker_id,
                        error = %e,
                        "Liveness check failed, skipping worker until next poll"
                    );
                    continue;
                }
            }

            warn!(
                component = "orchestrator",
                event = "worker_unresponsive",
                worker_id = %worker_id,
                "Worker unresponsive"
            );
            match self.recover_worker(&worker_id).await {
                Ok(recovery) => recoveries.push(recovery),
                Err(e) => error!(
                    component = "orchestrator",
                    event = "recovery_failed",
                    worker_id = %worker_id,
                    error = %e,
                    "Recovery failed, retrying next poll"
                ),
            }
        }
        Ok(recoveries)
    }

    /// Move everything in the worker's in-flight queue to the pending tail and
    /// retire the identity.
    ///
    /// Does not check liveness; draining a live worker causes its current
    /// task to run twice.
    pub async fn recover_worker(&self, worker_id: &str) -> std::result::Result<Recovery, StoreError> {
        let keys = self.store.keys();
        let in_flight = keys.in_flight(worker_id);
        let pending = keys.pending();
        // draining is idempotent, so a retried drain never moves a task twice
        let recovered = self
            .with_retry(|| self.store.drain_all(&in_flight, &pending))
            .await?;

        info!(
            component = "orchestrator",
            event = "recovery_complete",
            worker_id = %worker_id,
            count = recovered,
            "Recovery complete"
        );

        // a worker that comes back re-registers with its next heartbeat
        self.with_retry(|| self.store.forget_worker(worker_id)).await?;

        Ok(Recovery {
            worker_id: worker_id.to_string(),
            recovered,
        })
    }

    async fn with_retry<T, F, Fut>(&self, op: F) -> std::result::Result<T, StoreError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = std::result::Result<T, StoreError>>,
    {
        backoff::retry(
            Backoff::default(),
            STORE_CALL_ATTEMPTS,
            StoreError::is_transient,
            op,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use rq_store::MemoryQueueStore;
    use std::collections::BTreeSet;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn orchestrator(store: Arc<MemoryQueueStore>) -> Orchestrator {
        Orchestrator::new(OrchestratorConfig::default(), store).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_dead_worker_drained() {
        let store = Arc::new(MemoryQueueStore::new());
        let orchestrator = orchestrator(store.clone());
        let keys = store.keys().clone();

        store.heartbeat("w1", Duration::from_secs(5)).await.unwrap();
        store.enqueue(&keys.in_flight("w1"), "t1").await.unwrap();
        tokio::time::advance(Duration::from_secs(6)).await;

        let recoveries = orchestrator.check_workers().await.unwrap();

        assert_eq!(
            recoveries,
            vec![Recovery {
                worker_id: "w1".to_string(),
                recovered: 1
            }]
        );
        assert_eq!(store.list_members(&keys.pending()).await.unwrap(), vec!["t1"]);
        assert!(store.list_worker_ids().await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_alive_worker_untouched() {
        let store = Arc::new(MemoryQueueStore::new());
        let orchestrator = orchestrator(store.clone());
        let keys = store.keys().clone();

        store.heartbeat("w1", Duration::from_secs(5)).await.unwrap();
        store.enqueue(&keys.in_flight("w1"), "t1").await.unwrap();

        assert!(orchestrator.check_workers().await.unwrap().is_empty());
        assert_eq!(store.queue_len(&keys.in_flight("w1")).await.unwrap(), 1);
        assert_eq!(store.queue_len(&keys.pending()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_stale_queue_without_heartbeat_is_dead() {
        let store = Arc::new(MemoryQueueStore::new());
        let orchestrator = orchestrator(store.clone());
        let keys = store.keys().clone();

        store.enqueue(&keys.in_flight("ghost"), "orphan").await.unwrap();

        let recoveries = orchestrator.check_workers().await.unwrap();
        assert_eq!(recoveries.len(), 1);
        assert_eq!(recoveries[0].worker_id, "ghost");
        assert_eq!(store.list_members(&keys.pending()).await.unwrap(), vec!["orphan"]);
    }

    #[tokio::test]
    async fn test_recover_is_idempotent() {
        let store = Arc::new(MemoryQueueStore::new());
        let orchestrator = orchestrator(store.clone());
        let keys = store.keys().clone();

        store.enqueue(&keys.in_flight("w1"), "a").await.unwrap();
        store.enqueue(&keys.in_flight("w1"), "b").await.unwrap();

        assert_eq!(orchestrator.recover_worker("w1").await.unwrap().recovered, 2);
        assert_eq!(orchestrator.recover_worker("w1").await.unwrap().recovered, 0);
        assert_eq!(
            store.list_members(&keys.pending()).await.unwrap(),
            vec!["a", "b"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_sweeps_until_shutdown() {
        let store = Arc::new(MemoryQueueStore::new());
        let orchestrator = Arc::new(orchestrator(store.clone()));
        let keys = store.keys().clone();

        let running = {
            let orchestrator = orchestrator.clone();
            tokio::spawn(async move { orchestrator.run().await })
        };

        tokio::time::sleep(Duration::from_secs(1)).await;
        store.enqueue(&keys.in_flight("late"), "t").await.unwrap();
        tokio::time::sleep(Duration::from_secs(3)).await;

        assert_eq!(store.list_members(&keys.pending()).await.unwrap(), vec!["t"]);

        orchestrator.shutdown();
        running.await.unwrap();
    }

    /// Fails `is_alive` for one worker a set number of times, then delegates
    struct FlakyStore {
        inner: MemoryQueueStore,
        flaky_worker: String,
        failures_left: AtomicU32,
    }

    impl FlakyStore {
        fn new(flaky_worker: &str, failures: u32) -> Self {
            FlakyStore {
                inner: MemoryQueueStore::new(),
                flaky_worker: flaky_worker.to_string(),
                failures_left: AtomicU32::new(failures),
            }
        }
    }

    #[async_trait]
    impl QueueStore for FlakyStore {
        fn keys(&self) -> &rq_core::KeySpace {
            self.inner.keys()
        }
        async fn enqueue(&self, queue: &str, value: &str) -> rq_store::Result<()> {
            self.inner.enqueue(queue, value).await
        }
        async fn reserve(&self, from: &str, to: &str, timeout: Duration) -> rq_store::Result<Option<String>> {
            self.inner.reserve(from, to, timeout).await
        }
        async fn acknowledge(&self, queue: &str, value: &str) -> rq_store::Result<bool> {
            self.inner.acknowledge(queue, value).await
        }
        async fn heartbeat(&self, worker_id: &str, ttl: Duration) -> rq_store::Result<()> {
            self.inner.heartbeat(worker_id, ttl).await
        }
        async fn is_alive(&self, worker_id: &str) -> rq_store::Result<bool> {
            if worker_id == self.flaky_worker {
                let left = self.failures_left.load(Ordering::SeqCst);
                if left > 0 {
                    self.failures_left.store(left - 1, Ordering::SeqCst);
                    return Err(StoreError::Unavailable("connection reset".into()));
                }
            }
            self.inner.is_alive(worker_id).await
        }
        async fn list_worker_ids(&self) -> rq_store::Result<BTreeSet<String>> {
            self.inner.list_worker_ids().await
        }
        async fn forget_worker(&self, worker_id: &str) -> rq_store::Result<()> {
            self.inner.forget_worker(worker_id).await
        }
        async fn drain_all(&self, from: &str, to: &str) -> rq_store::Result<usize> {
            self.inner.drain_all(from, to).await
        }
        async fn quarantine(&self, queue: &str, value: &str) -> rq_store::Result<bool> {
            self.inner.quarantine(queue, value).await
        }
        async fn list_members(&self, queue: &str) -> rq_store::Result<Vec<String>> {
            self.inner.list_members(queue).await
        }
        async fn queue_len(&self, queue: &str) -> rq_store::Result<usize> {
            self.inner.queue_len(queue).await
        }
    }

    async fn strand_tasks(store: &FlakyStore) {
        let keys = store.keys().clone();
        store.enqueue(&keys.in_flight("a"), "task-a").await.unwrap();
        store.enqueue(&keys.in_flight("b"), "task-b").await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_liveness_error_is_retried() {
        let store = Arc::new(FlakyStore::new("a", 1));
        strand_tasks(&store).await;
        let orchestrator = Orchestrator::new(OrchestratorConfig::default(), store.clone()).unwrap();

        let recoveries = orchestrator.check_workers().await.unwrap();

        let ids: Vec<_> = recoveries.iter().map(|r| r.worker_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(
            store.list_members(&store.keys().pending()).await.unwrap(),
            vec!["task-a", "task-b"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_worker_does_not_stop_sweep() {
        let store = Arc::new(FlakyStore::new("a", u32::MAX));
        strand_tasks(&store).await;
        let orchestrator = Orchestrator::new(OrchestratorConfig::default(), store.clone()).unwrap();
        let keys = store.keys().clone();

        let recoveries = orchestrator.check_workers().await.unwrap();

        assert_eq!(
            recoveries,
            vec![Recovery {
                worker_id: "b".to_string(),
                recovered: 1
            }]
        );
        assert_eq!(store.list_members(&keys.pending()).await.unwrap(), vec!["task-b"]);
        assert_eq!(store.list_members(&keys.in_flight("a")).await.unwrap(), vec!["task-a"]);
    }
}

use crate::config::WorkerConfig;
use crate::executor::TaskExecutor;
use crate::handler::TaskHandler;
use crate::stats::{StatsSnapshot, WorkerStats};
use crate::{Result, WorkerError};

use rq_core::backoff::{self, Backoff};
use rq_core::{TaskId, TaskRecord};
use rq_store::{QueueStore, StoreError};

use std::sync::Arc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Calls made for a transient store failure before an acknowledgement or
/// quarantine gives up for this pass
const STORE_CALL_ATTEMPTS: u32 = 5;

/// What a single [`Worker::step`] did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// Nothing arrived within the reserve timeout
    Idle,
    /// Handler succeeded; `acknowledged` is false when the task had already
    /// left the in-flight queue
    Completed { task_id: TaskId, acknowledged: bool },
    /// Handler failed; the task stays in the in-flight queue
    Failed { task_id: TaskId, error: String },
    /// The reserved bytes were not a valid record and were quarantined
    Quarantined,
}

/// Worker process that executes tasks
pub struct Worker {
    config: WorkerConfig,
    worker_id: String,
    store: Arc<dyn QueueStore>,
    executor: TaskExecutor,
    stats: WorkerStats,
    shutdown: CancellationToken,
    pending_queue: String,
    in_flight_queue: String,
}

impl Worker {
    /// Build a worker; the identity is fixed here for the life of the process
    pub fn new(
        config: WorkerConfig,
        store: Arc<dyn QueueStore>,
        handler: Arc<dyn TaskHandler>,
    ) -> Result<Self> {
        config.validate()?;
        let worker_id = config.generate_worker_id();
        rq_core::keys::validate_identifier(&worker_id)?;

        let keys = store.keys();
        let pending_queue = keys.pending();
        let in_flight_queue = keys.in_flight(&worker_id);
        let executor = TaskExecutor::new(handler, config.execution_timeout());

        Ok(Worker {
            config,
            worker_id,
            store,
            executor,
            stats: WorkerStats::new(),
            shutdown: CancellationToken::new(),
            pending_queue,
            in_flight_queue,
        })
    }

    pub fn id(&self) -> &str {
        &self.worker_id
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Token that stops [`run`](Self::run) when cancelled
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Run the worker until shutdown.
    ///
    /// Writes the first heartbeat before touching the pending queue, then
    /// runs heartbeat refresh and the reserve/execute loop side by side.
    /// Heartbeating continues after shutdown is requested, until the loop has
    /// finished the task in hand. Shutdown then leaves no trace: the heartbeat
    /// is not deleted and an in-flight task is not returned, so recovery
    /// treats it like a crash.
    pub async fn run(&self) -> Result<()> {
        info!(
            component = "worker",
            event = "starting",
            worker_id = %self.worker_id,
            ttl_secs = self.config.heartbeat_ttl_secs,
            interval_secs = self.config.heartbeat_interval_secs,
            "Starting worker"
        );

        self.store
            .heartbeat(&self.worker_id, self.config.heartbeat_ttl())
            .await
            .map_err(WorkerError::Heartbeat)?;

        // Heartbeats outlive shutdown until the task in hand is finished
        let processing_done = CancellationToken::new();
        let process = async {
            self.process_loop().await;
            processing_done.cancel();
        };
        tokio::join!(self.heartbeat_loop(&processing_done), process);

        let stats = self.stats.snapshot();
        info!(
            component = "worker",
            event = "stopped",
            worker_id = %self.worker_id,
            completed = stats.completed,
            failed = stats.failed,
            quarantined = stats.quarantined,
            ack_races = stats.ack_races,
            "Worker stopped"
        );
        Ok(())
    }

    async fn heartbeat_loop(&self, stop: &CancellationToken) {
        let mut interval = tokio::time::interval(self.config.heartbeat_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // first tick fires immediately; the startup heartbeat covered it
        interval.tick().await;

        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                _ = interval.tick() => {
                    match self.store.heartbeat(&self.worker_id, self.config.heartbeat_ttl()).await {
                        Ok(()) => {
                            let stats = self.stats.snapshot();
                            debug!(
                                component = "worker",
                                event = "heartbeat",
                                worker_id = %self.worker_id,
                                completed = stats.completed,
                                failed = stats.failed,
                                "Heartbeat written"
                            );
                        }
                        Err(e) => warn!(
                            component = "worker",
                            event = "heartbeat_failed",
                            worker_id = %self.worker_id,
                            error = %e,
                            "Failed to write heartbeat"
                        ),
                    }
                }
            }
        }
    }

    async fn process_loop(&self) {
        let mut backoff = Backoff::default();

        while !self.shutdown.is_cancelled() {
            match self.step().await {
                Ok(_) => backoff.reset(),
                Err(e) => {
                    let delay = backoff.next_delay();
                    warn!(
                        component = "worker",
                        event = "store_error",
                        worker_id = %self.worker_id,
                        error = %e,
                        delay_ms = delay.as_millis() as u64,
                        "Store call failed, backing off"
                    );
                    tokio::select! {
                        _ = self.shutdown.cancelled() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    /// One reserve / execute / acknowledge pass.
    ///
    /// A store error leaves the task (if any) where it is: either still
    /// pending or in this worker's in-flight queue.
    pub async fn step(&self) -> std::result::Result<StepOutcome, StoreError> {
        let reserved = self
            .store
            .reserve(
                &self.pending_queue,
                &self.in_flight_queue,
                self.config.reserve_timeout(),
            )
            .await?;
        let Some(raw) = reserved else {
            return Ok(StepOutcome::Idle);
        };

        let record = match TaskRecord::decode(&raw) {
            Ok(record) => record,
            Err(e) => {
                error!(
                    component = "worker",
                    event = "malformed_record",
                    worker_id = %self.worker_id,
                    error = %e,
                    "Quarantining malformed record"
                );
                self.with_retry(|| self.store.quarantine(&self.in_flight_queue, &raw))
                    .await?;
                self.stats.record_quarantined();
                return Ok(StepOutcome::Quarantined);
            }
        };

        let task_id = record.id();
        info!(
            component = "worker",
            event = "task_reserved",
            worker_id = %self.worker_id,
            %task_id,
            "Executing task"
        );

        match self.executor.execute(&record).await {
            Ok(()) => {
                // the reserved bytes, never a re-encoding
                let acknowledged = self
                    .with_retry(|| self.store.acknowledge(&self.in_flight_queue, &raw))
                    .await?;
                self.stats.record_completed();

                if acknowledged {
                    info!(
                        component = "worker",
                        event = "task_completed",
                        worker_id = %self.worker_id,
                        %task_id,
                        "Task completed"
                    );
                } else {
                    self.stats.record_ack_race();
                    info!(
                        component = "worker",
                        event = "ack_missing",
                        worker_id = %self.worker_id,
                        %task_id,
                        "Task completed but was no longer in flight"
                    );
                }
                Ok(StepOutcome::Completed { task_id, acknowledged })
            }
            Err(error) => {
                self.stats.record_failed();
                error!(
                    component = "worker",
                    event = "task_failed",
                    worker_id = %self.worker_id,
                    %task_id,
                    error = %error,
                    "Task failed, leaving it in flight"
                );
                Ok(StepOutcome::Failed { task_id, error })
            }
        }
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

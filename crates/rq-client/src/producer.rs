use crate::Result;
use rq_core::backoff::{self, Backoff};
use rq_core::{TaskPayload, TaskRecord};
use rq_store::{QueueStore, StoreConfig, StoreError};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

const ENQUEUE_ATTEMPTS: u32 = 3;

/// Submits tasks to the pending queue.
///
/// Fire-and-forget: once `submit` returns the task is durable in the store,
/// but there is no way to learn when (or how many times) it ran.
#[derive(Clone)]
pub struct Producer {
    store: Arc<dyn QueueStore>,
    pending_queue: String,
}

impl Producer {
    pub fn new(store: Arc<dyn QueueStore>) -> Self {
        let pending_queue = store.keys().pending();
        Producer {
            store,
            pending_queue,
        }
    }

    /// Connect to the Redis store described by `config`
    pub async fn connect(config: &StoreConfig) -> Result<Self> {
        let store = config.connect(Duration::ZERO).await?;
        Ok(Producer::new(Arc::new(store)))
    }

    /// Wrap `payload` in a new record and enqueue it
    pub async fn submit(&self, payload: TaskPayload) -> Result<TaskRecord> {
        let record = TaskRecord::new(payload);
        self.submit_record(&record).await?;
        Ok(record)
    }

    /// Enqueue an existing record, e.g. one restored from the quarantine queue
    pub async fn submit_record(&self, record: &TaskRecord) -> Result<()> {
        let raw = record.encode()?;
        backoff::retry(
            Backoff::default(),
            ENQUEUE_ATTEMPTS,
            StoreError::is_transient,
            || self.store.enqueue(&self.pending_queue, &raw),
        )
        .await?;

        info!(
            component = "producer",
            event = "task_submitted",
            task_id = %record.id(),
            "Task submitted"
        );
        Ok(())
    }

    /// Submit every payload in order; stops at the first failure, leaving the
    /// earlier ones enqueued
    pub async fn submit_batch<I>(&self, payloads: I) -> Result<Vec<TaskRecord>>
    where
        I: IntoIterator<Item = TaskPayload>,
    {
        let mut records = Vec::new();
        for payload in payloads {
            records.push(self.submit(payload).await?);
        }
        Ok(records)
    }
}

use crate::handler::{TaskHandler, TaskResult};
use rq_core::TaskRecord;
use std::sync::Arc;
use std::time::Duration;
use tracing::error;

/// Runs a handler with panic containment and an optional time limit
pub struct TaskExecutor {
    handler: Arc<dyn TaskHandler>,
    timeout: Option<Duration>,
}

impl TaskExecutor {
    pub fn new(handler: Arc<dyn TaskHandler>, timeout: Option<Duration>) -> Self {
        TaskExecutor { handler, timeout }
    }

    /// Execute the record's payload.
    ///
    /// The handler runs on its own task, so a panic surfaces here as an
    /// error instead of taking the worker down. An overrun aborts the
    /// handler task and counts as a failure.
    pub async fn execute(&self, record: &TaskRecord) -> TaskResult {
        let task_id = record.id();
        let handler = self.handler.clone();
        let payload = record.payload().clone();
        let mut handle = tokio::spawn(async move { handler.execute(payload).await });

        let joined = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, &mut handle).await {
                Ok(joined) => joined,
                Err(_) => {
                    handle.abort();
                    error!(component = "worker", %task_id, timeout = ?limit, "Task timed out");
                    return Err(format!("Task execution timed out after {:?}", limit));
                }
            },
            None => handle.await,
        };

        match joined {
            Ok(result) => result,
            Err(e) if e.is_panic() => {
                error!(component = "worker", %task_id, "Task panicked");
                Err("Task panicked during execution".to_string())
            }
            Err(_) => Err("Task was cancelled".to_string()),
        }
    }
}

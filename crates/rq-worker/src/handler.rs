use async_trait::async_trait;
use rq_core::TaskPayload;
use std::time::Duration;
use tracing::info;

/// Result type for task handlers; the error is a human-readable reason
pub type TaskResult = Result<(), String>;

/// Business logic run for each reserved task.
///
/// A handler may be called more than once for the same task (delivery is
/// at-least-once), so it should be idempotent.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn execute(&self, payload: TaskPayload) -> TaskResult;
}

/// Logs the payload and succeeds
pub struct EchoHandler;

#[async_trait]
impl TaskHandler for EchoHandler {
    async fn execute(&self, payload: TaskPayload) -> TaskResult {
        info!(component = "handler", %payload, "Echo");
        Ok(())
    }
}

/// Simulates work by sleeping
pub struct SleepHandler {
    duration: Duration,
}

impl SleepHandler {
    pub fn new(duration_ms: u64) -> Self {
        SleepHandler {
            duration: Duration::from_millis(duration_ms),
        }
    }
}

#[async_trait]
impl TaskHandler for SleepHandler {
    async fn execute(&self, _payload: TaskPayload) -> TaskResult {
        tokio::time::sleep(self.duration).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_echo_handler() {
        let handler = EchoHandler;
        assert!(handler.execute(json!({"n": 1})).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_handler() {
        let handler = SleepHandler::new(3000);
        let started = tokio::time::Instant::now();
        handler.execute(json!(null)).await.unwrap();
        assert!(started.elapsed() >= Duration::from_secs(3));
    }
}

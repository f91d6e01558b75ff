//! Worker side of the reliable queue.
//!
//! A [`Worker`] moves one task at a time from the shared pending queue into
//! its own in-flight queue, runs it through a [`TaskHandler`], and removes it
//! only after the handler succeeded. A concurrent heartbeat keeps the
//! worker's liveness key alive; when the process dies the key expires and the
//! orchestrator hands the in-flight queue back to pending.

pub mod config;
pub mod executor;
pub mod handler;
pub mod stats;
pub mod worker;

pub use config::WorkerConfig;
pub use executor::TaskExecutor;
pub use handler::{TaskHandler, TaskResult};
pub use stats::{StatsSnapshot, WorkerStats};
pub use worker::{StepOutcome, Worker};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Invalid worker configuration: {0}")]
    InvalidConfig(String),

    /// The first heartbeat could not be written, so the worker never started
    #[error("Initial heartbeat failed: {0}")]
    Heartbeat(#[source] rq_store::StoreError),
}

impl From<rq_core::TaskError> for WorkerError {
    fn from(err: rq_core::TaskError) -> Self {
        WorkerError::InvalidConfig(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, WorkerError>;

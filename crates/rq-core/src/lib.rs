mod task;
mod error;
pub mod backoff;
pub mod keys;
pub mod telemetry;

pub use task::{TaskRecord, TaskId, TaskPayload};
pub use error::{TaskError, Result};
pub use keys::KeySpace;
pub use backoff::Backoff;
pub use telemetry::LogFormat;

pub const MAX_RECORD_SIZE: usize = 10 * 1024 * 1024; // 10MB

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TaskError {
    #[error("Encoded record exceeds maximum allowed size of {max} bytes (got {actual})")]
    PayloadTooLarge { max: usize, actual: usize },

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Invalid identifier {value:?}: {reason}")]
    InvalidIdentifier { value: String, reason: &'static str },

    #[error("Invalid log format: {0}")]
    InvalidLogFormat(String),
}

pub type Result<T> = std::result::Result<T, TaskError>;

mod producer;

pub use producer::Producer;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Failed to encode task: {0}")]
    Encode(#[from] rq_core::TaskError),

    #[error("Store error: {0}")]
    Store(#[from] rq_store::StoreError),
}

pub type Result<T> = std::result::Result<T, ClientError>;

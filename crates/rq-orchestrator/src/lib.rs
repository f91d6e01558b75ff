pub mod config;
pub mod orchestrator;

pub use config::OrchestratorConfig;
pub use orchestrator::{Orchestrator, Recovery};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Invalid orchestrator configuration: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;

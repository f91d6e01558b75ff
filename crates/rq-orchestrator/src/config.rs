use crate::{OrchestratorError, Result};
use rq_core::LogFormat;
use rq_store::StoreConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub store: StoreConfig,
    /// Time between liveness sweeps; detection latency is at most
    /// heartbeat TTL plus this
    pub poll_interval_secs: u64,
    pub log_format: LogFormat,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        OrchestratorConfig {
            store: StoreConfig::default(),
            poll_interval_secs: 3,
            log_format: LogFormat::default(),
        }
    }
}

impl OrchestratorConfig {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: OrchestratorConfig = serde_yaml::from_str(&contents)?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_secs == 0 {
            return Err(OrchestratorError::InvalidConfig(
                "poll_interval_secs must be at least 1".to_string(),
            ));
        }
        self.store
            .key_space()
            .map_err(|e| OrchestratorError::InvalidConfig(e.to_string()))?;
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.poll_interval(), Duration::from_secs(3));
        assert_eq!(config.store.redis_url, "redis://127.0.0.1:6379");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_poll_interval_rejected() {
        let config = OrchestratorConfig {
            poll_interval_secs: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_file_partial() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "poll_interval_secs: 10").unwrap();

        let config = OrchestratorConfig::from_file(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.poll_interval_secs, 10);
        assert_eq!(config.store, StoreConfig::default());
    }
}

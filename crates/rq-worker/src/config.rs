use crate::{Result, WorkerError};
use rq_core::LogFormat;
use rq_store::StoreConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub store: StoreConfig,
    pub worker_id: Option<String>,
    pub heartbeat_ttl_secs: u64,
    pub heartbeat_interval_secs: u64,
    /// Longest a single reserve waits for work; also bounds shutdown latency
    pub reserve_timeout_secs: u64,
    /// 0 disables the limit
    pub execution_timeout_secs: u64,
    pub log_format: LogFormat,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        WorkerConfig {
            store: StoreConfig::default(),
            worker_id: None,
            heartbeat_ttl_secs: 5,
            heartbeat_interval_secs: 2,
            reserve_timeout_secs: 1,
            execution_timeout_secs: 0,
            log_format: LogFormat::default(),
        }
    }
}

impl WorkerConfig {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: WorkerConfig = serde_yaml::from_str(&contents)?;
        Ok(config)
    }

    /// Check timing relationships and identifiers.
    ///
    /// The heartbeat must be refreshed before it expires, and a blocking
    /// reserve must return well inside one TTL.
    pub fn validate(&self) -> Result<()> {
        if self.heartbeat_ttl_secs == 0 {
            return Err(WorkerError::InvalidConfig(
                "heartbeat_ttl_secs must be at least 1".to_string(),
            ));
        }
        if self.heartbeat_interval_secs == 0 {
            return Err(WorkerError::InvalidConfig(
                "heartbeat_interval_secs must be at least 1".to_string(),
            ));
        }
        if self.heartbeat_interval_secs >= self.heartbeat_ttl_secs {
            return Err(WorkerError::InvalidConfig(format!(
                "heartbeat_interval_secs ({}) must be less than heartbeat_ttl_secs ({})",
                self.heartbeat_interval_secs, self.heartbeat_ttl_secs
            )));
        }
        if self.heartbeat_ttl_secs < 2 * self.heartbeat_interval_secs {
            warn!(
                component = "worker",
                ttl_secs = self.heartbeat_ttl_secs,
                interval_secs = self.heartbeat_interval_secs,
                "Heartbeat TTL is less than twice the interval; a single slow write may mark this worker dead"
            );
        }
        if self.reserve_timeout_secs == 0 || self.reserve_timeout_secs >= self.heartbeat_ttl_secs {
            return Err(WorkerError::InvalidConfig(format!(
                "reserve_timeout_secs ({}) must be at least 1 and less than heartbeat_ttl_secs ({})",
                self.reserve_timeout_secs, self.heartbeat_ttl_secs
            )));
        }
        if let Some(id) = &self.worker_id {
            rq_core::keys::validate_identifier(id)?;
        }
        self.store.key_space().map_err(|e| WorkerError::InvalidConfig(e.to_string()))?;
        Ok(())
    }

    pub fn heartbeat_ttl(&self) -> Duration {
        Duration::from_secs(self.heartbeat_ttl_secs)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn reserve_timeout(&self) -> Duration {
        Duration::from_secs(self.reserve_timeout_secs)
    }

    pub fn execution_timeout(&self) -> Option<Duration> {
        (self.execution_timeout_secs > 0).then(|| Duration::from_secs(self.execution_timeout_secs))
    }

    /// The configured id, or `{hostname}-{pid}-{random}`
    pub fn generate_worker_id(&self) -> String {
        use std::process;
        use uuid::Uuid;

        if let Some(id) = &self.worker_id {
            return id.clone();
        }

        let hostname = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .map(|h| h.replace(|c: char| c.is_whitespace() || "*?[]\\".contains(c), "_"))
            .filter(|h| !h.is_empty())
            .unwrap_or_else(|| "unknown".to_string());

        let pid = process::id();
        let random = Uuid::new_v4().simple().to_string();

        format!("{}-{}-{}", hostname, pid, &random[..8])
    }
}

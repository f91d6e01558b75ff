//! Key layout shared by every process that talks to the backing store.
//!
//! | Key | Type | Purpose |
//! |-----|------|---------|
//! | `[ns:]queue:pending` | list | shared pending queue |
//! | `[ns:]queue:processing:{worker_id}` | list | a worker's in-flight queue |
//! | `[ns:]worker:heartbeat:{worker_id}` | string with TTL | liveness marker |
//! | `[ns:]workers:known` | set | identities that have written a heartbeat |
//! | `[ns:]queue:quarantine` | list | malformed records kept for inspection |

use crate::{Result, TaskError};

pub const PENDING_QUEUE: &str = "queue:pending";
pub const IN_FLIGHT_PREFIX: &str = "queue:processing:";
pub const HEARTBEAT_PREFIX: &str = "worker:heartbeat:";
pub const KNOWN_WORKERS: &str = "workers:known";
pub const QUARANTINE_QUEUE: &str = "queue:quarantine";

const FORBIDDEN: &[char] = &['*', '?', '[', ']', '\\'];

/// Check that a worker id (or namespace) is safe to embed in a key and in a
/// `KEYS` glob pattern.
pub fn validate_identifier(value: &str) -> Result<()> {
    let reason = if value.is_empty() {
        "must not be empty"
    } else if value.chars().any(char::is_whitespace) {
        "must not contain whitespace"
    } else if value.contains(FORBIDDEN) {
        "must not contain glob characters (* ? [ ] \\)"
    } else {
        return Ok(());
    };

    Err(TaskError::InvalidIdentifier {
        value: value.to_string(),
        reason,
    })
}

/// Builds store keys, optionally scoped under a namespace.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeySpace {
    prefix: String,
}

impl KeySpace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scope every key under `namespace:`
    pub fn with_namespace(namespace: &str) -> Result<Self> {
        validate_identifier(namespace)?;
        Ok(KeySpace {
            prefix: format!("{}:", namespace),
        })
    }

    pub fn namespace(&self) -> Option<&str> {
        self.prefix.strip_suffix(':')
    }

    pub fn pending(&self) -> String {
        format!("{}{}", self.prefix, PENDING_QUEUE)
    }

    pub fn in_flight(&self, worker_id: &str) -> String {
        format!("{}{}{}", self.prefix, IN_FLIGHT_PREFIX, worker_id)
    }

    /// Glob matching every in-flight queue
    pub fn in_flight_pattern(&self) -> String {
        format!("{}{}*", self.prefix, IN_FLIGHT_PREFIX)
    }

    /// Recover the worker id from an in-flight queue key
    pub fn worker_id_from_in_flight<'a>(&self, key: &'a str) -> Option<&'a str> {
        key.strip_prefix(self.prefix.as_str())?
            .strip_prefix(IN_FLIGHT_PREFIX)
            .filter(|id| !id.is_empty())
    }

    pub fn heartbeat(&self, worker_id: &str) -> String {
        format!("{}{}{}", self.prefix, HEARTBEAT_PREFIX, worker_id)
    }

    pub fn known_workers(&self) -> String {
        format!("{}{}", self.prefix, KNOWN_WORKERS)
    }

    pub fn quarantine(&self) -> String {
        format!("{}{}", self.prefix, QUARANTINE_QUEUE)
    }
}

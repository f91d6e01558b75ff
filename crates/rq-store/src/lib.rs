//! Queue primitives the reliable-delivery protocol is built on.
//!
//! [`QueueStore`] is a thin adapter over a backing store that offers two
//! things: an atomic "move the head of one list to the tail of another" and
//! keys that expire. Values are opaque strings (encoded
//! [`TaskRecord`](rq_core::TaskRecord)s); the store never interprets them,
//! and removal matches on exact value equality.
//!
//! Two implementations ship here:
//!
//! * [`RedisQueueStore`] for production, mapping each operation onto a single
//!   atomic Redis command, pipeline or Lua script;
//! * [`MemoryQueueStore`], an in-process twin with identical semantics used by
//!   tests and single-process runs.

mod memory;
mod redis;

pub use self::memory::MemoryQueueStore;
pub use self::redis::RedisQueueStore;

use async_trait::async_trait;
use rq_core::KeySpace;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    /// The store could not be reached (connection refused, dropped, timed out)
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// The store answered with an error
    #[error("Store command failed: {0}")]
    Command(String),

    #[error("Invalid store configuration: {0}")]
    InvalidConfig(String),
}

impl StoreError {
    /// Whether retrying the same call later can reasonably succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

impl From<rq_core::TaskError> for StoreError {
    fn from(err: rq_core::TaskError) -> Self {
        StoreError::InvalidConfig(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Atomic list and TTL operations the protocol relies on.
///
/// Lists have a head (where [`reserve`](QueueStore::reserve) takes from) and a
/// tail (where [`enqueue`](QueueStore::enqueue), `reserve` and
/// [`drain_all`](QueueStore::drain_all) put elements).
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Key layout this store was built with
    fn keys(&self) -> &KeySpace;

    /// Append `value` to the tail of `queue`
    async fn enqueue(&self, queue: &str, value: &str) -> Result<()>;

    /// Atomically pop the head of `from` and push it to the tail of `to`.
    ///
    /// Waits up to `timeout` for an element; `Ok(None)` if none arrived. A
    /// zero timeout makes a single attempt and never blocks.
    async fn reserve(&self, from: &str, to: &str, timeout: Duration) -> Result<Option<String>>;

    /// Remove the first occurrence of exactly `value` from `queue`.
    ///
    /// Returns `false` when the value is no longer there.
    async fn acknowledge(&self, queue: &str, value: &str) -> Result<bool>;

    /// Set or refresh the worker's liveness key with `ttl`, and record the
    /// worker in the known-workers set
    async fn heartbeat(&self, worker_id: &str, ttl: Duration) -> Result<()>;

    /// Whether the worker's liveness key currently exists
    async fn is_alive(&self, worker_id: &str) -> Result<bool>;

    /// Every worker identity worth checking: ids with an in-flight queue plus
    /// ids in the known-workers set
    async fn list_worker_ids(&self) -> Result<BTreeSet<String>>;

    /// Drop a worker from the known-workers set
    async fn forget_worker(&self, worker_id: &str) -> Result<()>;

    /// Atomically move every element of `from` to the tail of `to`.
    ///
    /// Returns the number moved; an empty or missing `from` yields 0.
    async fn drain_all(&self, from: &str, to: &str) -> Result<usize>;

    /// Atomically move one occurrence of `value` from `queue` to the
    /// quarantine queue. Returns `false` when the value is not in `queue`.
    async fn quarantine(&self, queue: &str, value: &str) -> Result<bool>;

    /// Snapshot of a list, head first
    async fn list_members(&self, queue: &str) -> Result<Vec<String>>;

    async fn queue_len(&self, queue: &str) -> Result<usize>;
}

/// Connection settings shared by every process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// `redis://[:<password>@]<host>:<port>[/<db>]`
    pub redis_url: String,
    /// Optional prefix isolating this deployment's keys
    pub namespace: Option<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            redis_url: "redis://127.0.0.1:6379".to_string(),
            namespace: None,
        }
    }
}

impl StoreConfig {
    pub fn key_space(&self) -> Result<KeySpace> {
        match &self.namespace {
            Some(ns) => Ok(KeySpace::with_namespace(ns)?),
            None => Ok(KeySpace::new()),
        }
    }

    /// Open a Redis-backed store.
    ///
    /// `max_block` is the longest reserve timeout the caller will use.
    pub async fn connect(&self, max_block: Duration) -> Result<RedisQueueStore> {
        RedisQueueStore::connect(&self.redis_url, self.key_space()?, max_block).await
    }
}

//! Redis implementation of [`QueueStore`].
//!
//! | Operation | Redis |
//! |-----------|-------|
//! | `enqueue` | `LPUSH` |
//! | `reserve` | `BLMOVE from to RIGHT LEFT timeout` (`LMOVE` for a zero timeout) |
//! | `acknowledge` | `LREM queue 1 value` |
//! | `heartbeat` | `MULTI` / `SET key ts EX ttl` / `SADD known id` / `EXEC` |
//! | `is_alive` | `EXISTS` |
//! | `list_worker_ids` | `KEYS queue:processing:*` + `SMEMBERS` |
//! | `drain_all` | Lua loop of `LMOVE RIGHT LEFT` |
//! | `quarantine` | Lua `LREM` + `LPUSH` |
//!
//! The left end of a list is its tail and the right end its head, so
//! `LPUSH` + `RIGHT → LEFT` moves keep FIFO order.
//!
//! # Connection Model
//!
//! Two multiplexed connections are held. Blocking reserves get their own,
//! with a response timeout longer than any reserve wait; everything else
//! (heartbeats in particular) goes over the shared one so it is never queued
//! behind a `BLMOVE` parked on the server. The shared connection has its own
//! response timeout, long enough for a drain script over a large list.

use std::collections::BTreeSet;
use std::time::Duration;

use ::redis::aio::MultiplexedConnection;
use ::redis::{AsyncCommands, AsyncConnectionConfig, Direction, RedisError, Script};
use async_trait::async_trait;
use chrono::Utc;
use rq_core::KeySpace;
use tracing::debug;

use crate::{QueueStore, Result, StoreError};

/// Move everything from KEYS[1] to the tail of KEYS[2] in one atomic step.
/// Returns the number of elements moved.
const LUA_DRAIN: &str = r#"
local moved = 0
while true do
    local value = redis.call('LMOVE', KEYS[1], KEYS[2], 'RIGHT', 'LEFT')
    if not value then
        break
    end
    moved = moved + 1
end
return moved
"#;

/// Remove one ARGV[1] from KEYS[1] and, if it was there, push it onto KEYS[2].
/// Returns the number removed (0 or 1).
const LUA_QUARANTINE: &str = r#"
local removed = redis.call('LREM', KEYS[1], 1, ARGV[1])
if removed > 0 then
    redis.call('LPUSH', KEYS[2], ARGV[1])
end
return removed
"#;

/// Response timeout for non-blocking commands. A `drain_all` script over a
/// long in-flight list has to finish inside it.
const COMMAND_RESPONSE_TIMEOUT: Duration = Duration::from_secs(10);

/// Headroom added on top of the longest reserve wait before the client gives
/// up on a blocking call.
const BLOCKING_RESPONSE_SLACK: Duration = Duration::from_secs(2);

/// Response timeouts for the shared and the blocking connection
fn response_timeouts(max_block: Duration) -> (Duration, Duration) {
    (COMMAND_RESPONSE_TIMEOUT, max_block + BLOCKING_RESPONSE_SLACK)
}

#[derive(Clone)]
pub struct RedisQueueStore {
    conn: MultiplexedConnection,
    blocking_conn: MultiplexedConnection,
    keys: KeySpace,
}

impl std::fmt::Debug for RedisQueueStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisQueueStore")
            .field("keys", &self.keys)
            .finish_non_exhaustive()
    }
}

impl RedisQueueStore {
    /// Connect to Redis at `url`.
    ///
    /// `max_block` is the longest timeout that will be passed to
    /// [`reserve`](QueueStore::reserve). Fails fast if either connection
    /// cannot be established.
    pub async fn connect(url: &str, keys: KeySpace, max_block: Duration) -> Result<Self> {
        let client = ::redis::Client::open(url)
            .map_err(|e| StoreError::InvalidConfig(format!("invalid Redis URL {url}: {e}")))?;

        let (command_timeout, blocking_timeout) = response_timeouts(max_block);

        let config = AsyncConnectionConfig::new().set_response_timeout(Some(command_timeout));
        let conn = client
            .get_multiplexed_async_connection_with_config(&config)
            .await
            .map_err(map_redis_error)?;

        let blocking_config = AsyncConnectionConfig::new().set_response_timeout(Some(blocking_timeout));
        let blocking_conn = client
            .get_multiplexed_async_connection_with_config(&blocking_config)
            .await
            .map_err(map_redis_error)?;

        debug!(namespace = ?keys.namespace(), "Connected to Redis");

        Ok(RedisQueueStore {
            conn,
            blocking_conn,
            keys,
        })
    }
}

/// Connection-level failures are worth retrying, anything else is a command error.
fn map_redis_error(err: RedisError) -> StoreError {
    if err.is_io_error()
        || err.is_timeout()
        || err.is_connection_dropped()
        || err.is_connection_refusal()
    {
        StoreError::Unavailable(err.to_string())
    } else {
        StoreError::Command(err.to_string())
    }
}

#[async_trait]
impl QueueStore for RedisQueueStore {
    fn keys(&self) -> &KeySpace {
        &self.keys
    }

    async fn enqueue(&self, queue: &str, value: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: usize = conn.lpush(queue, value).await.map_err(map_redis_error)?;
        Ok(())
    }

    async fn reserve(&self, from: &str, to: &str, timeout: Duration) -> Result<Option<String>> {
        if timeout.is_zero() {
            // BLMOVE treats 0 as "wait forever"
            let mut conn = self.conn.clone();
            return conn
                .lmove(from, to, Direction::Right, Direction::Left)
                .await
                .map_err(map_redis_error);
        }

        let mut conn = self.blocking_conn.clone();
        conn.blmove(from, to, Direction::Right, Direction::Left, timeout.as_secs_f64())
            .await
            .map_err(map_redis_error)
    }

    async fn acknowledge(&self, queue: &str, value: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let removed: usize = conn.lrem(queue, 1, value).await.map_err(map_redis_error)?;
        Ok(removed > 0)
    }

    async fn heartbeat(&self, worker_id: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = ::redis::pipe()
            .atomic()
            .set_ex(self.keys.heartbeat(worker_id), Utc::now().to_rfc3339(), ttl.as_secs().max(1))
            .ignore()
            .sadd(self.keys.known_workers(), worker_id)
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(map_redis_error)?;
        Ok(())
    }

    async fn is_alive(&self, worker_id: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        conn.exists(self.keys.heartbeat(worker_id))
            .await
            .map_err(map_redis_error)
    }

    async fn list_worker_ids(&self) -> Result<BTreeSet<String>> {
        let mut conn = self.conn.clone();

        let queue_keys: Vec<String> = conn
            .keys(self.keys.in_flight_pattern())
            .await
            .map_err(map_redis_error)?;
        let known: Vec<String> = conn
            .smembers(self.keys.known_workers())
            .await
            .map_err(map_redis_error)?;

        let mut ids: BTreeSet<String> = queue_keys
            .iter()
            .filter_map(|key| self.keys.worker_id_from_in_flight(key))
            .map(str::to_string)
            .collect();
        ids.extend(known);
        Ok(ids)
    }

    async fn forget_worker(&self, worker_id: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: usize = conn
            .srem(self.keys.known_workers(), worker_id)
            .await
            .map_err(map_redis_error)?;
        Ok(())
    }

    async fn drain_all(&self, from: &str, to: &str) -> Result<usize> {
        let moved: usize = Script::new(LUA_DRAIN)
            .key(from)
            .key(to)
            .invoke_async(&mut self.conn.clone())
            .await
            .map_err(map_redis_error)?;
        Ok(moved)
    }

    async fn quarantine(&self, queue: &str, value: &str) -> Result<bool> {
        let removed: usize = Script::new(LUA_QUARANTINE)
            .key(queue)
            .key(self.keys.quarantine())
            .arg(value)
            .invoke_async(&mut self.conn.clone())
            .await
            .map_err(map_redis_error)?;
        Ok(removed > 0)
    }

    async fn list_members(&self, queue: &str) -> Result<Vec<String>> {
        let mut conn = self.conn.clone();
        let mut members: Vec<String> = conn.lrange(queue, 0, -1).await.map_err(map_redis_error)?;
        // LRANGE lists tail first
        members.reverse();
        Ok(members)
    }

    async fn queue_len(&self, queue: &str) -> Result<usize> {
        let mut conn = self.conn.clone();
        conn.llen(queue).await.map_err(map_redis_error)
    }
}

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rq_core::KeySpace;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::{QueueStore, Result};

#[derive(Default)]
struct State {
    /// Front is the tail, back is the head (mirrors LPUSH / RPOP)
    lists: HashMap<String, VecDeque<String>>,
    /// Heartbeat key -> expiry
    heartbeats: HashMap<String, Instant>,
    known: BTreeSet<String>,
}

impl State {
    fn push_tail(&mut self, queue: &str, value: String) {
        self.lists
            .entry(queue.to_string())
            .or_default()
            .push_front(value);
    }

    fn pop_head(&mut self, queue: &str) -> Option<String> {
        let list = self.lists.get_mut(queue)?;
        let value = list.pop_back();
        if list.is_empty() {
            // Redis deletes empty lists; keep discovery consistent with it
            self.lists.remove(queue);
        }
        value
    }

    fn move_one(&mut self, from: &str, to: &str) -> Option<String> {
        let value = self.pop_head(from)?;
        self.push_tail(to, value.clone());
        Some(value)
    }

    fn remove_one(&mut self, queue: &str, value: &str) -> bool {
        let Some(list) = self.lists.get_mut(queue) else {
            return false;
        };
        // LREM with a positive count scans from the left (tail) end
        let Some(pos) = list.iter().position(|v| v == value) else {
            return false;
        };
        list.remove(pos);
        if list.is_empty() {
            self.lists.remove(queue);
        }
        true
    }
}

/// In-process [`QueueStore`] with the same semantics as the Redis backend.
///
/// Every operation holds a single lock, so each is atomic exactly like its
/// Redis counterpart. Heartbeat expiry is measured on the tokio clock, which
/// lets tests drive TTLs with `tokio::time::pause`.
pub struct MemoryQueueStore {
    keys: KeySpace,
    state: Mutex<State>,
    pushed: Notify,
}

impl MemoryQueueStore {
    pub fn new() -> Self {
        Self::with_keys(KeySpace::new())
    }

    pub fn with_keys(keys: KeySpace) -> Self {
        MemoryQueueStore {
            keys,
            state: Mutex::new(State::default()),
            pushed: Notify::new(),
        }
    }
}

impl Default for MemoryQueueStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QueueStore for MemoryQueueStore {
    fn keys(&self) -> &KeySpace {
        &self.keys
    }

    async fn enqueue(&self, queue: &str, value: &str) -> Result<()> {
        self.state.lock().push_tail(queue, value.to_string());
        self.pushed.notify_waiters();
        Ok(())
    }

    async fn reserve(&self, from: &str, to: &str, timeout: Duration) -> Result<Option<String>> {
        let deadline = Instant::now() + timeout;

        loop {
            // Register for wakeups before looking, so a push between the check
            // and the wait is not missed
            let pushed = self.pushed.notified();
            tokio::pin!(pushed);
            pushed.as_mut().enable();

            if let Some(value) = self.state.lock().move_one(from, to) {
                self.pushed.notify_waiters();
                return Ok(Some(value));
            }

            if tokio::time::timeout_at(deadline, pushed).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn acknowledge(&self, queue: &str, value: &str) -> Result<bool> {
        Ok(self.state.lock().remove_one(queue, value))
    }

    async fn heartbeat(&self, worker_id: &str, ttl: Duration) -> Result<()> {
        let mut state = self.state.lock();
        state
            .heartbeats
            .insert(self.keys.heartbeat(worker_id), Instant::now() + ttl);
        state.known.insert(worker_id.to_string());
        Ok(())
    }

    async fn is_alive(&self, worker_id: &str) -> Result<bool> {
        let key = self.keys.heartbeat(worker_id);
        let mut state = self.state.lock();
        match state.heartbeats.get(&key) {
            Some(expires) if *expires > Instant::now() => Ok(true),
            Some(_) => {
                state.heartbeats.remove(&key);
                Ok(false)
            }
            None => Ok(false),
        }
    }

    async fn list_worker_ids(&self) -> Result<BTreeSet<String>> {
        let state = self.state.lock();
        let mut ids: BTreeSet<String> = state
            .lists
            .keys()
            .filter_map(|key| self.keys.worker_id_from_in_flight(key))
            .map(str::to_string)
            .collect();
        ids.extend(state.known.iter().cloned());
        Ok(ids)
    }

    async fn forget_worker(&self, worker_id: &str) -> Result<()> {
        self.state.lock().known.remove(worker_id);
        Ok(())
    }

    async fn drain_all(&self, from: &str, to: &str) -> Result<usize> {
        let moved = {
            let mut state = self.state.lock();
            let mut moved = 0;
            while state.move_one(from, to).is_some() {
                moved += 1;
            }
            moved
        };
        if moved > 0 {
            self.pushed.notify_waiters();
        }
        Ok(moved)
    }

    async fn quarantine(&self, queue: &str, value: &str) -> Result<bool> {
        let mut state = self.state.lock();
        if !state.remove_one(queue, value) {
            return Ok(false);
        }
        let quarantine = self.keys.quarantine();
        state.push_tail(&quarantine, value.to_string());
        Ok(true)
    }

    async fn list_members(&self, queue: &str) -> Result<Vec<String>> {
        let state = self.state.lock();
        Ok(state
            .lists
            .get(queue)
            .map(|list| list.iter().rev().cloned().collect())
            .unwrap_or_default())
    }

    async fn queue_len(&self, queue: &str) -> Result<usize> {
        Ok(self.state.lock().lists.get(queue).map_or(0, VecDeque::len))
    }
}

//! Read-only views over the store, plus manual recovery.

use chrono::{DateTime, Utc};
use comfy_table::{presets::UTF8_FULL, Table};
use rq_core::{TaskId, TaskPayload, TaskRecord};
use rq_orchestrator::{Orchestrator, OrchestratorConfig, Recovery};
use rq_store::{QueueStore, StoreError};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Serialize)]
pub struct QueueDepth {
    pub pending: usize,
    pub quarantine: usize,
    /// Keyed by worker id
    pub in_flight: BTreeMap<String, usize>,
}

#[derive(Debug, Serialize)]
pub struct WorkerRow {
    pub worker_id: String,
    pub alive: bool,
    pub in_flight: usize,
}

/// One list element; `raw` is set only when the bytes are not a valid record
#[derive(Debug, Serialize)]
pub struct QueueEntry {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<TaskId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<TaskPayload>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw: Option<String>,
}

impl QueueEntry {
    fn from_raw(raw: String) -> Self {
        match TaskRecord::decode(&raw) {
            Ok(record) => QueueEntry {
                task_id: Some(record.id()),
                created_at: Some(record.created_at()),
                payload: Some(record.into_payload()),
                raw: None,
            },
            Err(_) => QueueEntry {
                task_id: None,
                created_at: None,
                payload: None,
                raw: Some(raw),
            },
        }
    }
}

pub async fn queue_depth(store: &dyn QueueStore) -> Result<QueueDepth, StoreError> {
    let keys = store.keys();
    let mut in_flight = BTreeMap::new();
    for worker_id in store.list_worker_ids().await? {
        let len = store.queue_len(&keys.in_flight(&worker_id)).await?;
        in_flight.insert(worker_id, len);
    }

    Ok(QueueDepth {
        pending: store.queue_len(&keys.pending()).await?,
        quarantine: store.queue_len(&keys.quarantine()).await?,
        in_flight,
    })
}

pub async fn workers(store: &dyn QueueStore) -> Result<Vec<WorkerRow>, StoreError> {
    let keys = store.keys();
    let mut rows = Vec::new();
    for worker_id in store.list_worker_ids().await? {
        rows.push(WorkerRow {
            alive: store.is_alive(&worker_id).await?,
            in_flight: store.queue_len(&keys.in_flight(&worker_id)).await?,
            worker_id,
        });
    }
    Ok(rows)
}

/// First `limit` elements of `queue`, head first
pub async fn entries(
    store: &dyn QueueStore,
    queue: &str,
    limit: usize,
) -> Result<Vec<QueueEntry>, StoreError> {
    Ok(store
        .list_members(queue)
        .await?
        .into_iter()
        .take(limit)
        .map(QueueEntry::from_raw)
        .collect())
}

/// Drain a worker's in-flight queue back to pending.
///
/// Refuses a worker with a live heartbeat unless `force`, since its current
/// task would then run twice.
pub async fn recover(
    store: Arc<dyn QueueStore>,
    worker_id: &str,
    force: bool,
) -> anyhow::Result<Recovery> {
    rq_core::keys::validate_identifier(worker_id)?;
    if !force && store.is_alive(worker_id).await? {
        anyhow::bail!("worker {worker_id} is alive; pass --force to recover it anyway");
    }

    let orchestrator = Orchestrator::new(OrchestratorConfig::default(), store)?;
    Ok(orchestrator.recover_worker(worker_id).await?)
}

fn table() -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table
}

pub fn depth_table(depth: &QueueDepth) -> Table {
    let mut table = table();
    table.set_header(vec!["Queue", "Length"]);
    table.add_row(vec!["pending".to_string(), depth.pending.to_string()]);
    table.add_row(vec!["quarantine".to_string(), depth.quarantine.to_string()]);
    for (worker_id, len) in &depth.in_flight {
        table.add_row(vec![format!("in-flight: {worker_id}"), len.to_string()]);
    }
    table
}

pub fn workers_table(rows: &[WorkerRow]) -> Table {
    let mut table = table();
    table.set_header(vec!["Worker ID", "Alive", "In Flight"]);
    for row in rows {
        table.add_row(vec![
            row.worker_id.clone(),
            if row.alive { "yes" } else { "no" }.to_string(),
            row.in_flight.to_string(),
        ]);
    }
    table
}

pub fn entries_table(entries: &[QueueEntry]) -> Table {
    let mut table = table();
    table.set_header(vec!["Task ID", "Created", "Payload"]);
    for entry in entries {
        match (&entry.task_id, &entry.created_at, &entry.payload) {
            (Some(id), Some(created), Some(payload)) => table.add_row(vec![
                id.to_string(),
                created.to_rfc3339(),
                payload.to_string(),
            ]),
            _ => table.add_row(vec![
                "(malformed)".to_string(),
                String::new(),
                entry.raw.clone().unwrap_or_default(),
            ]),
        };
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use rq_store::MemoryQueueStore;
    use serde_json::json;
    use std::time::Duration;

    async fn seeded() -> Arc<MemoryQueueStore> {
        let store = Arc::new(MemoryQueueStore::new());
        let keys = store.keys().clone();
        for n in 0..3 {
            let raw = TaskRecord::new(json!({ "n": n })).encode().unwrap();
            store.enqueue(&keys.pending(), &raw).await.unwrap();
        }
        store.enqueue(&keys.in_flight("dead"), "{broken").await.unwrap();
        store.heartbeat("live", Duration::from_secs(30)).await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_queue_depth() {
        let store = seeded().await;
        let depth = queue_depth(store.as_ref()).await.unwrap();

        assert_eq!(depth.pending, 3);
        assert_eq!(depth.quarantine, 0);
        assert_eq!(depth.in_flight.get("dead"), Some(&1));
        assert_eq!(depth.in_flight.get("live"), Some(&0));
    }

    #[tokio::test]
    async fn test_workers() {
        let store = seeded().await;
        let rows = workers(store.as_ref()).await.unwrap();

        let summary: Vec<_> = rows
            .iter()
            .map(|r| (r.worker_id.as_str(), r.alive, r.in_flight))
            .collect();
        assert_eq!(summary, vec![("dead", false, 1), ("live", true, 0)]);
    }

    #[tokio::test]
    async fn test_entries_decode_and_limit() {
        let store = seeded().await;
        let keys = store.keys().clone();

        let pending = entries(store.as_ref(), &keys.pending(), 2).await.unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].payload, Some(json!({ "n": 0 })));

        let broken = entries(store.as_ref(), &keys.in_flight("dead"), 10).await.unwrap();
        assert_eq!(broken[0].raw.as_deref(), Some("{broken"));
        assert!(broken[0].task_id.is_none());
    }

    #[tokio::test]
    async fn test_recover_refuses_live_worker() {
        let store = seeded().await;
        let keys = store.keys().clone();
        store.enqueue(&keys.in_flight("live"), "busy").await.unwrap();

        assert!(recover(store.clone(), "live", false).await.is_err());
        assert_eq!(store.queue_len(&keys.in_flight("live")).await.unwrap(), 1);

        let forced = recover(store.clone(), "live", true).await.unwrap();
        assert_eq!(forced.recovered, 1);

        let dead = recover(store.clone(), "dead", false).await.unwrap();
        assert_eq!(dead.recovered, 1);
        assert_eq!(store.queue_len(&keys.pending()).await.unwrap(), 5);
    }
}

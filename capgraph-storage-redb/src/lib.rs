//! # capgraph-storage-redb
//!
//! A persistent implementation of `capgraph-core`'s collaborator traits
//! (`TraceReader`, `TraceSink`, `PriorityWriter`, `EpisodicEventSink`,
//! `ParameterCheckpointer`) backed by an embedded [redb](https://docs.rs/redb)
//! database, laid out as the three logical tables from the persisted
//! state layout: `nodes`, `traces`, and `episodic_events`.
//!
//! Values are serialized with `serde_json` rather than a non-self-describing
//! binary format: both [`ExecutionTrace`](capgraph_core::types::ExecutionTrace)
//! and [`EpisodicEvent`](capgraph_core::types::EpisodicEvent) carry an opaque
//! `serde_json::Value` payload field, whose `Deserialize` impl requires
//! `deserialize_any` — a capability postcard's wire format cannot offer.
//!
//! Read/write operations are synchronous where the trait they implement is
//! synchronous (redb itself is a synchronous API); the few genuinely async
//! traits (`TraceSink`, `EpisodicEventSink`, `ParameterCheckpointer`) run
//! their redb calls inside `spawn_blocking` so a slow disk flush never
//! stalls the async runtime.

mod tables;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use redb::{Database, ReadableDatabase, ReadableTable, ReadableTableMetadata};
use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use capgraph_core::collaborators::{
    ParameterCheckpointer, PriorityWriter, TraceReader, TraceSavedEvent, TraceSink, TraceSubscriber,
};
use capgraph_core::episodic::{EpisodicEventSink, RetrieveOptions};
use capgraph_core::error::{Error, Result};
use capgraph_core::types::{EpisodicEvent, EventType, ExecutionTrace, Node, TraceId, WorkflowId};

use tables::{EVENTS_TABLE, MAX_VALUE_SIZE, NODES_TABLE, PARAMS_KEY, PARAMS_TABLE, TRACES_TABLE};

fn to_storage_error<E: std::fmt::Display>(context: &str) -> impl Fn(E) -> Error + '_ {
    move |e| Error::Storage(format!("{context}: {e}"))
}

fn node_key(node: &Node) -> String {
    match node {
        Node::Tool(t) => t.id.to_string(),
        Node::Capability(c) => c.id.to_string(),
    }
}

fn serialize<T: Serialize>(value: &T, what: &str) -> Result<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| Error::Storage(format!("failed to serialize {what}: {e}")))
}

fn deserialize<T: DeserializeOwned>(bytes: &[u8], what: &str) -> Result<T> {
    if bytes.len() > MAX_VALUE_SIZE {
        return Err(Error::Storage(format!("{what} payload exceeds {MAX_VALUE_SIZE} bytes")));
    }
    serde_json::from_slice(bytes).map_err(|e| Error::Storage(format!("failed to deserialize {what}: {e}")))
}

/// Persistent store for the three logical tables in the persisted state
/// layout. Implements every collaborator trait `capgraph-core` needs to
/// run against durable storage instead of the in-process defaults.
pub struct RedbStore {
    db: Arc<Database>,
    sender: broadcast::Sender<TraceSavedEvent>,
}

impl RedbStore {
    /// Open (creating if absent) a redb database at `path` and ensure all
    /// tables exist.
    pub async fn open(path: &Path) -> Result<Self> {
        let path = path.to_path_buf();
        let db = tokio::task::spawn_blocking(move || -> Result<Database> {
            let db = Database::create(&path).map_err(to_storage_error("failed to open database"))?;
            let write_txn = db.begin_write().map_err(to_storage_error("failed to begin write transaction"))?;
            {
                write_txn.open_table(NODES_TABLE).map_err(to_storage_error("failed to open nodes table"))?;
                write_txn.open_table(TRACES_TABLE).map_err(to_storage_error("failed to open traces table"))?;
                write_txn.open_table(EVENTS_TABLE).map_err(to_storage_error("failed to open episodic_events table"))?;
                write_txn.open_table(PARAMS_TABLE).map_err(to_storage_error("failed to open params table"))?;
            }
            write_txn.commit().map_err(to_storage_error("failed to commit table creation"))?;
            Ok(db)
        })
        .await
        .map_err(to_storage_error("task join error"))??;

        Ok(Self {
            db: Arc::new(db),
            sender: broadcast::channel(256).0,
        })
    }

    /// Subscribe to the `execution.trace.saved` signal published by
    /// [`TraceSink::publish_saved`].
    #[must_use]
    pub fn subscribe(&self) -> RedbTraceSubscriber {
        RedbTraceSubscriber { rx: self.sender.subscribe() }
    }

    /// Upsert a tool or capability node (idempotent registration).
    pub fn upsert_node(&self, node: &Node) -> Result<()> {
        let key = node_key(node);
        let bytes = serialize(node, "node")?;
        let write_txn = self.db.begin_write().map_err(to_storage_error("failed to begin write transaction"))?;
        {
            let mut table = write_txn.open_table(NODES_TABLE).map_err(to_storage_error("failed to open nodes table"))?;
            table.insert(key.as_str(), bytes.as_slice()).map_err(to_storage_error("failed to insert node"))?;
        }
        write_txn.commit().map_err(to_storage_error("failed to commit node write"))?;
        Ok(())
    }

    /// Fetch a single node by its string id.
    pub fn get_node(&self, id: &str) -> Result<Option<Node>> {
        let read_txn = self.db.begin_read().map_err(to_storage_error("failed to begin read transaction"))?;
        let table = read_txn.open_table(NODES_TABLE).map_err(to_storage_error("failed to open nodes table"))?;
        match table.get(id).map_err(to_storage_error("failed to read node"))? {
            Some(guard) => Ok(Some(deserialize(guard.value(), "node")?)),
            None => Ok(None),
        }
    }

    /// Every stored node, insertion order is not preserved by redb — callers
    /// that need insertion order rebuild it from `created_at`.
    pub fn all_nodes(&self) -> Result<Vec<Node>> {
        let read_txn = self.db.begin_read().map_err(to_storage_error("failed to begin read transaction"))?;
        let table = read_txn.open_table(NODES_TABLE).map_err(to_storage_error("failed to open nodes table"))?;
        let mut nodes = Vec::with_capacity(table.len().unwrap_or(0) as usize);
        for entry in table.iter().map_err(to_storage_error("failed to iterate nodes"))? {
            let (_, guard) = entry.map_err(to_storage_error("failed to read node entry"))?;
            nodes.push(deserialize(guard.value(), "node")?);
        }
        Ok(nodes)
    }

    /// Append-or-replace a trace.
    pub fn insert_trace(&self, trace: &ExecutionTrace) -> Result<()> {
        let key = trace.trace_id.to_string();
        let bytes = serialize(trace, "trace")?;
        let write_txn = self.db.begin_write().map_err(to_storage_error("failed to begin write transaction"))?;
        {
            let mut table = write_txn.open_table(TRACES_TABLE).map_err(to_storage_error("failed to open traces table"))?;
            table.insert(key.as_str(), bytes.as_slice()).map_err(to_storage_error("failed to insert trace"))?;
        }
        write_txn.commit().map_err(to_storage_error("failed to commit trace write"))?;
        Ok(())
    }

    fn all_traces(&self) -> Result<Vec<ExecutionTrace>> {
        let read_txn = self.db.begin_read().map_err(to_storage_error("failed to begin read transaction"))?;
        let table = read_txn.open_table(TRACES_TABLE).map_err(to_storage_error("failed to open traces table"))?;
        let mut traces = Vec::with_capacity(table.len().unwrap_or(0) as usize);
        for entry in table.iter().map_err(to_storage_error("failed to iterate traces"))? {
            let (_, guard) = entry.map_err(to_storage_error("failed to read trace entry"))?;
            traces.push(deserialize(guard.value(), "trace")?);
        }
        Ok(traces)
    }
}

impl TraceReader for RedbStore {
    fn get(&self, id: TraceId) -> Option<ExecutionTrace> {
        let key = id.to_string();
        let read_txn = self.db.begin_read().ok()?;
        let table = read_txn.open_table(TRACES_TABLE).ok()?;
        let guard = table.get(key.as_str()).ok()??;
        deserialize(guard.value(), "trace").ok()
    }

    fn sample_by_priority(&self, max_count: usize, min_priority: f32, alpha: f32) -> Vec<ExecutionTrace> {
        let Ok(traces) = self.all_traces() else { return Vec::new() };
        let mut candidates: Vec<(usize, f32)> = traces
            .iter()
            .enumerate()
            .filter(|(_, t)| t.priority() >= min_priority)
            .map(|(i, t)| (i, t.priority().max(f32::EPSILON).powf(alpha)))
            .collect();
        candidates.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        candidates.into_iter().take(max_count).map(|(i, _)| traces[i].clone()).collect()
    }

    fn children_of(&self, parent: TraceId) -> Vec<ExecutionTrace> {
        self.all_traces()
            .unwrap_or_default()
            .into_iter()
            .filter(|t| t.parent_trace_id == Some(parent))
            .collect()
    }

    fn count(&self) -> usize {
        let Ok(read_txn) = self.db.begin_read() else { return 0 };
        let Ok(table) = read_txn.open_table(TRACES_TABLE) else { return 0 };
        table.len().unwrap_or(0) as usize
    }

    fn prune(&self, max_count: usize) -> usize {
        let Ok(mut traces) = self.all_traces() else { return 0 };
        if traces.len() <= max_count {
            return 0;
        }
        traces.sort_by(|a, b| b.priority().partial_cmp(&a.priority()).unwrap_or(std::cmp::Ordering::Equal));
        let to_remove: Vec<String> = traces.split_off(max_count).iter().map(|t| t.trace_id.to_string()).collect();

        let Ok(write_txn) = self.db.begin_write() else { return 0 };
        let removed = {
            let Ok(mut table) = write_txn.open_table(TRACES_TABLE) else { return 0 };
            let mut removed = 0;
            for key in &to_remove {
                if table.remove(key.as_str()).ok().flatten().is_some() {
                    removed += 1;
                }
            }
            removed
        };
        if write_txn.commit().is_err() {
            warn!("failed to commit trace prune");
            return 0;
        }
        removed
    }
}

impl PriorityWriter for RedbStore {
    fn set_priority(&self, trace_id: TraceId, priority: f32) {
        let Some(mut trace) = self.get(trace_id) else { return };
        trace.set_priority(priority);
        if let Err(err) = self.insert_trace(&trace) {
            warn!(error = %err, "failed to persist updated trace priority");
        }
    }
}

#[async_trait]
impl TraceSink for RedbStore {
    async fn publish_saved(&self, event: TraceSavedEvent) -> Result<()> {
        // No subscribers is not an error: the signal is fire-and-forget.
        let _ = self.sender.send(event);
        Ok(())
    }
}

/// A live subscription to [`RedbStore::subscribe`].
pub struct RedbTraceSubscriber {
    rx: broadcast::Receiver<TraceSavedEvent>,
}

#[async_trait]
impl TraceSubscriber for RedbTraceSubscriber {
    async fn recv(&mut self) -> Option<TraceSavedEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "trace-saved subscriber lagged, skipping missed events");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[async_trait]
impl EpisodicEventSink for RedbStore {
    async fn persist(&self, events: &[EpisodicEvent]) -> Result<()> {
        let db = Arc::clone(&self.db);
        let encoded: Vec<(String, Vec<u8>)> = events
            .iter()
            .map(|e| Ok((e.event_id.to_string(), serialize(e, "episodic event")?)))
            .collect::<Result<_>>()?;

        tokio::task::spawn_blocking(move || {
            let write_txn = db.begin_write().map_err(to_storage_error("failed to begin write transaction"))?;
            {
                let mut table = write_txn.open_table(EVENTS_TABLE).map_err(to_storage_error("failed to open episodic_events table"))?;
                for (key, bytes) in &encoded {
                    table.insert(key.as_str(), bytes.as_slice()).map_err(to_storage_error("failed to insert episodic event"))?;
                }
            }
            write_txn.commit().map_err(to_storage_error("failed to commit episodic event write"))
        })
        .await
        .map_err(to_storage_error("task join error"))??;
        debug!(count = events.len(), "persisted episodic events to redb");
        Ok(())
    }

    async fn query_by_context(&self, context_hash: u64, options: &RetrieveOptions) -> Result<Vec<EpisodicEvent>> {
        let mut matched = self.scan_events().await?;
        matched.retain(|e| e.context_hash == context_hash);
        matched.retain(|e| options.event_types.as_ref().is_none_or(|types| types.contains(&e.event_type)));
        matched.retain(|e| options.after_ts.is_none_or(|after| e.timestamp >= after));
        matched.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        if options.limit > 0 {
            matched.truncate(options.limit);
        }
        Ok(matched)
    }

    async fn query_workflow(&self, workflow_id: WorkflowId) -> Result<Vec<EpisodicEvent>> {
        let mut matched = self.scan_events().await?;
        matched.retain(|e| e.workflow_id == workflow_id);
        matched.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        Ok(matched)
    }

    async fn query_type(&self, event_type: EventType, limit: usize) -> Result<Vec<EpisodicEvent>> {
        let mut matched = self.scan_events().await?;
        matched.retain(|e| e.event_type == event_type);
        matched.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        if limit > 0 {
            matched.truncate(limit);
        }
        Ok(matched)
    }

    async fn prune(&self, retention: ChronoDuration, max_events: usize) -> Result<usize> {
        let cutoff: DateTime<Utc> = Utc::now() - retention;
        let mut keep = self.scan_events().await?;
        let before = keep.len();
        keep.retain(|e| e.timestamp >= cutoff);
        if keep.len() > max_events {
            keep.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
            let excess = keep.len() - max_events;
            keep.drain(0..excess);
        }
        let removed = before - keep.len();
        if removed == 0 {
            return Ok(0);
        }
        let keep_ids: std::collections::HashSet<String> = keep.iter().map(|e| e.event_id.to_string()).collect();
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || {
            let write_txn = db.begin_write().map_err(to_storage_error("failed to begin write transaction"))?;
            {
                let mut table = write_txn.open_table(EVENTS_TABLE).map_err(to_storage_error("failed to open episodic_events table"))?;
                let stale: Vec<String> = table
                    .iter()
                    .map_err(to_storage_error("failed to iterate episodic events"))?
                    .filter_map(|entry| entry.ok().map(|(k, _)| k.value().to_string()))
                    .filter(|k| !keep_ids.contains(k))
                    .collect();
                for key in stale {
                    table.remove(key.as_str()).map_err(to_storage_error("failed to remove episodic event"))?;
                }
            }
            write_txn.commit().map_err(to_storage_error("failed to commit episodic event prune"))
        })
        .await
        .map_err(to_storage_error("task join error"))??;
        Ok(removed)
    }
}

impl RedbStore {
    async fn scan_events(&self) -> Result<Vec<EpisodicEvent>> {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || {
            let read_txn = db.begin_read().map_err(to_storage_error("failed to begin read transaction"))?;
            let table = read_txn.open_table(EVENTS_TABLE).map_err(to_storage_error("failed to open episodic_events table"))?;
            let mut events = Vec::with_capacity(table.len().unwrap_or(0) as usize);
            for entry in table.iter().map_err(to_storage_error("failed to iterate episodic events"))? {
                let (_, guard) = entry.map_err(to_storage_error("failed to read episodic event entry"))?;
                events.push(deserialize::<EpisodicEvent>(guard.value(), "episodic event")?);
            }
            Ok(events)
        })
        .await
        .map_err(to_storage_error("task join error"))?
    }
}

#[async_trait]
impl ParameterCheckpointer for RedbStore {
    async fn save(&self, bytes: &[u8]) -> Result<()> {
        let db = Arc::clone(&self.db);
        let bytes = bytes.to_vec();
        tokio::task::spawn_blocking(move || {
            let write_txn = db.begin_write().map_err(to_storage_error("failed to begin write transaction"))?;
            {
                let mut table = write_txn.open_table(PARAMS_TABLE).map_err(to_storage_error("failed to open params table"))?;
                table.insert(PARAMS_KEY, bytes.as_slice()).map_err(to_storage_error("failed to insert params"))?;
            }
            write_txn.commit().map_err(to_storage_error("failed to commit params write"))
        })
        .await
        .map_err(to_storage_error("task join error"))??;
        Ok(())
    }

    async fn load(&self) -> Result<Option<Vec<u8>>> {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || {
            let read_txn = db.begin_read().map_err(to_storage_error("failed to begin read transaction"))?;
            let table = read_txn.open_table(PARAMS_TABLE).map_err(to_storage_error("failed to open params table"))?;
            match table.get(PARAMS_KEY).map_err(to_storage_error("failed to read params"))? {
                Some(guard) => Ok(Some(guard.value().to_vec())),
                None => Ok(None),
            }
        })
        .await
        .map_err(to_storage_error("task join error"))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use capgraph_core::episodic::context_hash;
    use capgraph_core::types::{CapabilityId, RetrievalContext, ToolId, ToolNode};

    async fn temp_store() -> (RedbStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = RedbStore::open(&dir.path().join("test.redb")).await.unwrap();
        (store, dir)
    }

    fn test_tool_node() -> Node {
        Node::Tool(ToolNode {
            id: ToolId::from("fs:read"),
            embedding: vec![0.1, 0.2, 0.3],
            server: Some("fs".into()),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        })
    }

    #[tokio::test]
    async fn node_round_trips() {
        let (store, _dir) = temp_store().await;
        let tool = test_tool_node();
        store.upsert_node(&tool).unwrap();
        let fetched = store.get_node(&node_key(&tool)).unwrap();
        assert!(fetched.is_some());
    }

    #[tokio::test]
    async fn trace_insert_and_sample_by_priority() {
        let (store, _dir) = temp_store().await;
        let low = ExecutionTrace::new(None, None, vec![], true, 1, 0.1);
        let high = ExecutionTrace::new(None, None, vec![], true, 1, 0.9);
        store.insert_trace(&low).unwrap();
        store.insert_trace(&high).unwrap();

        let sampled = store.sample_by_priority(1, 0.0, 1.0);
        assert_eq!(sampled.len(), 1);
        assert!((sampled[0].priority() - 0.9).abs() < 1e-6);
        assert_eq!(store.count(), 2);
    }

    #[tokio::test]
    async fn priority_writer_persists_through_reader() {
        let (store, _dir) = temp_store().await;
        let trace = ExecutionTrace::new(None, None, vec![], true, 1, 0.2);
        let trace_id = trace.trace_id;
        store.insert_trace(&trace).unwrap();

        store.set_priority(trace_id, 0.95);
        let reloaded = TraceReader::get(&store, trace_id).unwrap();
        assert!((reloaded.priority() - 0.95).abs() < 1e-6);
    }

    #[tokio::test]
    async fn prune_keeps_highest_priority_traces() {
        let (store, _dir) = temp_store().await;
        for p in [0.1, 0.2, 0.9, 0.5] {
            store.insert_trace(&ExecutionTrace::new(None, None, vec![], true, 1, p)).unwrap();
        }
        let removed = TraceReader::prune(&store, 2);
        assert_eq!(removed, 2);
        assert_eq!(store.count(), 2);
    }

    #[tokio::test]
    async fn episodic_events_round_trip_and_query_by_context() {
        let (store, _dir) = temp_store().await;
        let workflow_id = WorkflowId(uuid::Uuid::new_v4());
        let context = RetrievalContext::new(Some("build".into()), Some("rust".into()), None);
        let hash = context_hash(&context);
        let event = EpisodicEvent::new(workflow_id, EventType::WorkflowStart, hash, None, serde_json::json!({"ok": true}));
        store.persist(&[event]).await.unwrap();

        let events = store.query_by_context(hash, &RetrieveOptions::default()).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, serde_json::json!({"ok": true}));
    }

    #[tokio::test]
    async fn params_round_trip() {
        let (store, _dir) = temp_store().await;
        assert!(store.load().await.unwrap().is_none());
        store.save(&[1, 2, 3, 4]).await.unwrap();
        assert_eq!(store.load().await.unwrap(), Some(vec![1, 2, 3, 4]));
    }

    #[tokio::test]
    async fn publish_saved_reaches_subscriber() {
        let (store, _dir) = temp_store().await;
        let mut sub = store.subscribe();
        store
            .publish_saved(TraceSavedEvent { trace_id: TraceId::new(), capability_id: Some(CapabilityId::new()), success: true })
            .await
            .unwrap();
        let received = sub.recv().await.unwrap();
        assert!(received.success);
    }

    #[test]
    fn node_key_uses_tool_id() {
        let tool = test_tool_node();
        assert_eq!(node_key(&tool), "fs:read");
    }
}

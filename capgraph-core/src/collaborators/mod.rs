//! Narrow collaborator traits — the seams the core depends on without
//! prescribing a storage engine or an embedding model.
//!
//! `InMemoryTraceStore` is the in-process default for [`TraceReader`] and
//! [`TraceSink`]; `capgraph-storage-redb` provides the persistent one.
//! `tokio::sync::broadcast` stands in for the `execution.trace.saved`
//! pub/sub signal, in the shape of an event-driven reconciliation loop.

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::broadcast;

use crate::error::Result;
use crate::types::{CapabilityId, ExecutionTrace, TraceId};

/// Produces a fixed-dimension, finite embedding for a piece of text.
/// Deterministic up to model version.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// The `execution.trace.saved` signal payload.
#[derive(Debug, Clone)]
pub struct TraceSavedEvent {
    pub trace_id: TraceId,
    pub capability_id: Option<CapabilityId>,
    pub success: bool,
}

/// Publishes the `execution.trace.saved` signal.
#[async_trait]
pub trait TraceSink: Send + Sync {
    async fn publish_saved(&self, event: TraceSavedEvent) -> Result<()>;
}

/// Subscribes to the `execution.trace.saved` signal; the online
/// learning controller drives itself from this.
#[async_trait]
pub trait TraceSubscriber: Send + Sync {
    async fn recv(&mut self) -> Option<TraceSavedEvent>;
}

/// Random access over stored traces, including priority-weighted
/// sampling for the PER pipeline.
pub trait TraceReader: Send + Sync {
    fn get(&self, id: TraceId) -> Option<ExecutionTrace>;

    /// Draw up to `max_count` traces with probability proportional to
    /// `priority^alpha`, filtered to `priority >= min_priority`, without
    /// replacement.
    fn sample_by_priority(&self, max_count: usize, min_priority: f32, alpha: f32) -> Vec<ExecutionTrace>;

    fn children_of(&self, parent: TraceId) -> Vec<ExecutionTrace>;

    fn count(&self) -> usize;

    /// Remove traces beyond `max_count` (lowest priority first),
    /// returning the number removed.
    fn prune(&self, max_count: usize) -> usize;
}

/// Mirrors a trace-sink-side update of priorities back into storage.
pub trait PriorityWriter: Send + Sync {
    fn set_priority(&self, trace_id: TraceId, priority: f32);
}

/// A tool or capability entry published when the orchestrator creates a
/// new one, fed into the graph builder and the scorer.
#[derive(Debug, Clone)]
pub struct ToolDescriptor {
    pub id: crate::types::ToolId,
    pub embedding: Vec<f32>,
    pub server: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CapabilityDescriptor {
    pub id: CapabilityId,
    pub embedding: Vec<f32>,
    pub members: Vec<crate::types::Member>,
    pub hierarchy_level: u32,
}

/// A feed of newly observed nodes to register with the graph builder
/// and scorer.
pub trait NodeRegistryFeed: Send + Sync {
    fn new_tools(&self) -> Vec<ToolDescriptor>;
    fn new_capabilities(&self) -> Vec<CapabilityDescriptor>;
}

/// Persists and restores SHGAT parameter checkpoints.
#[async_trait]
pub trait ParameterCheckpointer: Send + Sync {
    async fn save(&self, bytes: &[u8]) -> Result<()>;
    async fn load(&self) -> Result<Option<Vec<u8>>>;
}

struct StoredTrace {
    trace: ExecutionTrace,
}

/// Process-local [`TraceReader`]/[`TraceSink`]/[`PriorityWriter`]
/// implementation, used when no external collaborator is wired in.
#[derive(Default)]
pub struct InMemoryTraceStore {
    traces: RwLock<Vec<StoredTrace>>,
    sender: RwLock<Option<broadcast::Sender<TraceSavedEvent>>>,
}

impl InMemoryTraceStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a trace, making it visible to [`TraceReader`] queries.
    pub fn insert(&self, trace: ExecutionTrace) {
        self.traces.write().push(StoredTrace { trace });
    }

    /// A broadcast receiver fed by [`TraceSink::publish_saved`]; each
    /// call opens a fresh subscription (the lagging ones miss nothing
    /// important since subscribers only care about new events).
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<TraceSavedEvent> {
        let mut sender = self.sender.write();
        let tx = sender.get_or_insert_with(|| broadcast::channel(256).0);
        tx.subscribe()
    }
}

impl TraceReader for InMemoryTraceStore {
    fn get(&self, id: TraceId) -> Option<ExecutionTrace> {
        self.traces
            .read()
            .iter()
            .find(|s| s.trace.trace_id == id)
            .map(|s| s.trace.clone())
    }

    fn sample_by_priority(&self, max_count: usize, min_priority: f32, alpha: f32) -> Vec<ExecutionTrace> {
        let traces = self.traces.read();
        let mut candidates: Vec<(usize, f32)> = traces
            .iter()
            .enumerate()
            .filter(|(_, s)| s.trace.priority() >= min_priority)
            .map(|(i, s)| (i, s.trace.priority().max(f32::EPSILON).powf(alpha)))
            .collect();
        if candidates.is_empty() {
            return Vec::new();
        }
        candidates.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        candidates
            .into_iter()
            .take(max_count)
            .map(|(i, _)| traces[i].trace.clone())
            .collect()
    }

    fn children_of(&self, parent: TraceId) -> Vec<ExecutionTrace> {
        self.traces
            .read()
            .iter()
            .filter(|s| s.trace.parent_trace_id == Some(parent))
            .map(|s| s.trace.clone())
            .collect()
    }

    fn count(&self) -> usize {
        self.traces.read().len()
    }

    fn prune(&self, max_count: usize) -> usize {
        let mut traces = self.traces.write();
        if traces.len() <= max_count {
            return 0;
        }
        traces.sort_by(|a, b| {
            b.trace
                .priority()
                .partial_cmp(&a.trace.priority())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        let removed = traces.len() - max_count;
        traces.truncate(max_count);
        removed
    }
}

impl PriorityWriter for InMemoryTraceStore {
    fn set_priority(&self, trace_id: TraceId, priority: f32) {
        if let Some(stored) = self.traces.write().iter_mut().find(|s| s.trace.trace_id == trace_id) {
            stored.trace.set_priority(priority);
        }
    }
}

#[async_trait]
impl TraceSink for InMemoryTraceStore {
    async fn publish_saved(&self, event: TraceSavedEvent) -> Result<()> {
        let sender = self.sender.read();
        if let Some(tx) = sender.as_ref() {
            // No subscribers is not an error: the signal is fire-and-forget.
            let _ = tx.send(event);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Member;

    fn trace(priority: f32) -> ExecutionTrace {
        let mut t = ExecutionTrace::new(None, None, vec![], true, 10, priority);
        t.set_priority(priority);
        t
    }

    #[test]
    fn sample_by_priority_prefers_higher_priority() {
        let store = InMemoryTraceStore::new();
        for p in [0.01, 0.9, 0.05] {
            store.insert(trace(p));
        }
        let sampled = store.sample_by_priority(1, 0.0, 1.0);
        assert_eq!(sampled.len(), 1);
        assert!((sampled[0].priority() - 0.9).abs() < 1e-6);
    }

    #[test]
    fn prune_keeps_highest_priority_traces() {
        let store = InMemoryTraceStore::new();
        for p in [0.1, 0.2, 0.9, 0.5] {
            store.insert(trace(p));
        }
        let removed = store.prune(2);
        assert_eq!(removed, 2);
        assert_eq!(store.count(), 2);
    }

    #[tokio::test]
    async fn publish_saved_reaches_subscriber() {
        let store = InMemoryTraceStore::new();
        let mut rx = store.subscribe();
        store
            .publish_saved(TraceSavedEvent {
                trace_id: TraceId::new(),
                capability_id: None,
                success: true,
            })
            .await
            .unwrap();
        let received = rx.recv().await.unwrap();
        assert!(received.success);
    }

    #[test]
    fn capability_descriptor_carries_members() {
        let desc = CapabilityDescriptor {
            id: CapabilityId::new(),
            embedding: vec![0.1, 0.2],
            members: vec![Member::Tool(crate::types::ToolId::from("fs:read"))],
            hierarchy_level: 0,
        };
        assert_eq!(desc.members.len(), 1);
    }
}

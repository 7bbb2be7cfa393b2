//! Episodic events — the append-only log entries captured by
//! [`crate::episodic::EpisodicMemoryStore`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ids::EventId;

/// Workflow identifier; events belonging to the same workflow are ordered
/// relative to each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkflowId(pub Uuid);

/// The six event types the episodic store distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    SpeculationStart,
    TaskComplete,
    AilDecision,
    HilDecision,
    WorkflowStart,
    WorkflowComplete,
}

/// A single captured event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpisodicEvent {
    pub event_id: EventId,
    pub workflow_id: WorkflowId,
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
    pub task_id: Option<String>,
    /// Stable hash of the retrieval context this event was captured under
    /// (workflow type, domain, complexity). Computed by
    /// [`crate::episodic::context_hash`].
    pub context_hash: u64,
    /// Opaque collaborator-owned payload.
    #[serde(default)]
    pub data: serde_json::Value,
}

impl EpisodicEvent {
    /// Construct a new event stamped with the current time and a fresh id.
    #[must_use]
    pub fn new(
        workflow_id: WorkflowId,
        event_type: EventType,
        context_hash: u64,
        task_id: Option<String>,
        data: serde_json::Value,
    ) -> Self {
        Self {
            event_id: EventId::new(),
            workflow_id,
            event_type,
            timestamp: Utc::now(),
            task_id,
            context_hash,
            data,
        }
    }
}

/// The context keys `retrieve_relevant` matches against exactly.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct RetrievalContext {
    pub workflow_type: String,
    pub domain: String,
    pub complexity: String,
}

impl RetrievalContext {
    /// Build a context, defaulting any unset field to `"default"`.
    #[must_use]
    pub fn new(
        workflow_type: Option<String>,
        domain: Option<String>,
        complexity: Option<String>,
    ) -> Self {
        Self {
            workflow_type: workflow_type.unwrap_or_else(|| "default".to_string()),
            domain: domain.unwrap_or_else(|| "default".to_string()),
            complexity: complexity.unwrap_or_else(|| "default".to_string()),
        }
    }
}

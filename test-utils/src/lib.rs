//! Shared fixtures for exercising the procedural memory core across crates:
//! deterministic embeddings, tool/capability registrations, traces, and
//! episodic events, without pulling every consuming crate's own builder
//! boilerplate.

use capgraph_core::graph::CapabilityRegistration;
use capgraph_core::scorer::ScorerCapabilityRegistration;
use capgraph_core::types::{
    CapabilityId, EpisodicEvent, EventType, ExecutionTrace, Member, RetrievalContext, ToolId,
};
use chrono::Utc;
use uuid::Uuid;

/// A deterministic unit-ish vector of `dim` floats, distinct for different
/// `seed` values so fixtures don't collide in similarity comparisons.
#[must_use]
pub fn test_embedding(dim: usize, seed: u64) -> Vec<f32> {
    (0..dim)
        .map(|i| {
            let x = (seed.wrapping_mul(31).wrapping_add(i as u64)) as f32;
            (x.sin() + 1.0) / 2.0
        })
        .collect()
}

/// A tool id namespaced as `server:tool`.
#[must_use]
pub fn test_tool_id(server: &str, tool: &str) -> ToolId {
    ToolId::new(server, tool)
}

/// A single-tool capability registration over `tool_id`.
#[must_use]
pub fn test_capability_registration(id: CapabilityId, tool_id: ToolId, embedding: Vec<f32>) -> CapabilityRegistration {
    CapabilityRegistration {
        id,
        embedding,
        members: vec![Member::Tool(tool_id)],
        hierarchy_level: 0,
        success_rate: Some(1.0),
        children: vec![],
        parents: vec![],
        fqdn: None,
        code_hash: None,
    }
}

/// The scorer-side mirror of [`test_capability_registration`], kept in
/// sync so callers don't have to repeat the member list twice.
#[must_use]
pub fn test_scorer_registration(id: CapabilityId, tool_id: ToolId, embedding: Vec<f32>) -> ScorerCapabilityRegistration {
    ScorerCapabilityRegistration {
        id,
        embedding,
        members: vec![Member::Tool(tool_id)],
        hierarchy_level: 0,
        success_rate: 1.0,
        children: vec![],
        last_used_at: None,
    }
}

/// A completed, successful execution trace over a single tool, with a
/// fresh intent embedding and unit priority.
#[must_use]
pub fn test_trace(capability_id: Option<CapabilityId>, tool_id: ToolId, intent_dim: usize, seed: u64) -> ExecutionTrace {
    ExecutionTrace::new(
        capability_id,
        Some(test_embedding(intent_dim, seed)),
        vec![Member::Tool(tool_id)],
        true,
        50,
        1.0,
    )
}

/// A failed execution trace, otherwise identical to [`test_trace`].
#[must_use]
pub fn test_failed_trace(capability_id: Option<CapabilityId>, tool_id: ToolId, intent_dim: usize, seed: u64) -> ExecutionTrace {
    ExecutionTrace::new(
        capability_id,
        Some(test_embedding(intent_dim, seed)),
        vec![Member::Tool(tool_id)],
        false,
        500,
        1.0,
    )
}

/// A `TaskComplete` event for a fresh workflow, with the default retrieval
/// context.
#[must_use]
pub fn test_episodic_event(workflow_id: Uuid, data: serde_json::Value) -> EpisodicEvent {
    let context = RetrievalContext::default();
    let hash = capgraph_core::episodic::context_hash(&context);
    EpisodicEvent::new(
        capgraph_core::types::WorkflowId(workflow_id),
        EventType::TaskComplete,
        hash,
        None,
        data,
    )
}

/// `n` episodic events for the same workflow, stamped in order (useful for
/// exercising `query_workflow`'s chronological ordering).
#[must_use]
pub fn test_episodic_events(workflow_id: Uuid, n: usize) -> Vec<EpisodicEvent> {
    (0..n)
        .map(|i| {
            let mut event = test_episodic_event(workflow_id, serde_json::json!({ "step": i }));
            event.timestamp = Utc::now() + chrono::Duration::milliseconds(i as i64);
            event
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embeddings_differ_by_seed() {
        let a = test_embedding(8, 1);
        let b = test_embedding(8, 2);
        assert_ne!(a, b);
        assert_eq!(a.len(), 8);
    }

    #[test]
    fn registrations_share_the_same_member_list() {
        let cap_id = CapabilityId::new();
        let tool_id = test_tool_id("fs", "read");
        let embedding = test_embedding(4, 7);
        let graph_reg = test_capability_registration(cap_id, tool_id.clone(), embedding.clone());
        let scorer_reg = test_scorer_registration(cap_id, tool_id, embedding);
        assert_eq!(graph_reg.members, scorer_reg.members);
    }

    #[test]
    fn episodic_events_are_ordered() {
        let workflow_id = Uuid::new_v4();
        let events = test_episodic_events(workflow_id, 3);
        assert!(events[0].timestamp <= events[1].timestamp);
        assert!(events[1].timestamp <= events[2].timestamp);
    }
}

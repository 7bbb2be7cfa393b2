//! Hypergraph Model & Flattening.
//!
//! A hyperedge is the multiset of members attached to a capability. For
//! algorithms it is a directed hyperedge from the capability to each of its
//! members. This module provides the derived view and the two flattening
//! operations the rest of the engine relies on:
//!
//! - [`flatten_executed_path`] inlines a *trace's* executed path, following
//!   child traces.
//! - [`flatten_capability_members`] inlines a *capability's* hyperedge
//!   members into a flat list of leaf tools (data model invariant 5),
//!   used by the negative miner and the pathfinder.

use std::collections::HashSet;

use crate::graph::GraphBuilder;
use crate::types::{CapabilityId, ExecutionTrace, Member, ToolId, MAX_FLATTEN_DEPTH};

/// Diagnostics recorded while flattening: how many cycles were broken and
/// whether the recursion-depth guard truncated the expansion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlattenStats {
    pub cycles_broken: u64,
    pub truncated: bool,
}

/// The derived hyperedge view over a capability: the capability itself
/// plus its ordered member list. Rebuilt on demand from the graph builder
/// rather than cached, since members change whenever the capability is
/// re-registered.
#[derive(Debug, Clone)]
pub struct Hyperedge {
    pub capability_id: CapabilityId,
    pub members: Vec<Member>,
}

impl Hyperedge {
    /// Build the hyperedge for `capability_id`, or `None` if the
    /// capability does not exist.
    #[must_use]
    pub fn for_capability(graph: &GraphBuilder, capability_id: CapabilityId) -> Option<Self> {
        graph.get_capability(&capability_id).map(|node| Self {
            capability_id,
            members: node.members,
        })
    }
}

/// A source of "child traces" for a capability: the most relevant
/// previously-observed trace whose `capability_id` matches, used to inline
/// sub-paths during flattening. [`crate::collaborators::TraceReader`]
/// implementations provide this via their own lookup.
pub trait TraceLookup {
    /// The trace to inline when `capability_id` appears in a path being
    /// flattened, if any.
    fn trace_for_capability(&self, capability_id: &CapabilityId) -> Option<ExecutionTrace>;
}

/// Flatten a trace's executed path by inlining child capability traces
/// immediately after their id.
///
/// Deterministic and total: always returns, even in the presence of
/// cycles or missing child traces.
#[must_use]
pub fn flatten_executed_path(
    trace: &ExecutionTrace,
    lookup: &dyn TraceLookup,
) -> (Vec<Member>, FlattenStats) {
    let mut stats = FlattenStats::default();
    let mut stack = HashSet::new();
    let out = flatten_path_inner(&trace.executed_path, lookup, &mut stack, 0, &mut stats);
    (out, stats)
}

fn flatten_path_inner(
    path: &[Member],
    lookup: &dyn TraceLookup,
    stack: &mut HashSet<CapabilityId>,
    depth: usize,
    stats: &mut FlattenStats,
) -> Vec<Member> {
    let mut out = Vec::with_capacity(path.len());
    for member in path {
        out.push(member.clone());
        if let Member::Capability(cap_id) = member {
            if stack.contains(cap_id) {
                stats.cycles_broken += 1;
                continue;
            }
            if depth >= MAX_FLATTEN_DEPTH {
                stats.truncated = true;
                continue;
            }
            let Some(child_trace) = lookup.trace_for_capability(cap_id) else {
                continue;
            };
            stack.insert(*cap_id);
            let nested = flatten_path_inner(
                &child_trace.executed_path,
                lookup,
                stack,
                depth + 1,
                stats,
            );
            stack.remove(cap_id);
            out.extend(nested);
        }
    }
    out
}

/// Flatten a capability's hyperedge recursively into its leaf tool ids,
/// left to right, breaking cycles by first-occurrence suppression (data
/// model invariant 5).
#[must_use]
pub fn flatten_capability_members(
    graph: &GraphBuilder,
    capability_id: CapabilityId,
) -> (Vec<ToolId>, FlattenStats) {
    let mut stats = FlattenStats::default();
    let mut stack = HashSet::new();
    let out = flatten_members_inner(graph, capability_id, &mut stack, 0, &mut stats);
    (out, stats)
}

fn flatten_members_inner(
    graph: &GraphBuilder,
    capability_id: CapabilityId,
    stack: &mut HashSet<CapabilityId>,
    depth: usize,
    stats: &mut FlattenStats,
) -> Vec<ToolId> {
    if stack.contains(&capability_id) {
        stats.cycles_broken += 1;
        return Vec::new();
    }
    if depth >= MAX_FLATTEN_DEPTH {
        stats.truncated = true;
        return Vec::new();
    }
    let Some(node) = graph.get_capability(&capability_id) else {
        return Vec::new();
    };
    stack.insert(capability_id);
    let mut out = Vec::with_capacity(node.members.len());
    for member in &node.members {
        match member {
            Member::Tool(tool_id) => out.push(tool_id.clone()),
            Member::Capability(child_id) => {
                out.extend(flatten_members_inner(
                    graph, *child_id, stack, depth + 1, stats,
                ));
            }
        }
    }
    stack.remove(&capability_id);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::CapabilityRegistration;
    use crate::types::ToolId;
    use std::collections::HashMap;

    struct MapLookup(HashMap<CapabilityId, ExecutionTrace>);
    impl TraceLookup for MapLookup {
        fn trace_for_capability(&self, id: &CapabilityId) -> Option<ExecutionTrace> {
            self.0.get(id).cloned()
        }
    }

    fn embedding() -> Vec<f32> {
        vec![0.1, 0.2, 0.3, 0.4]
    }

    #[test]
    fn flatten_inlines_child_trace_after_its_id() {
        let child_id = CapabilityId::new();
        let child_trace = ExecutionTrace::new(
            Some(child_id),
            None,
            vec![
                Member::Tool(ToolId::from("a:x")),
                Member::Tool(ToolId::from("a:y")),
            ],
            true,
            10,
            1.0,
        );
        let lookup = MapLookup(HashMap::from([(child_id, child_trace)]));

        let parent_trace = ExecutionTrace::new(
            None,
            None,
            vec![
                Member::Tool(ToolId::from("a:pre")),
                Member::Capability(child_id),
                Member::Tool(ToolId::from("a:post")),
            ],
            true,
            10,
            1.0,
        );

        let (flattened, stats) = flatten_executed_path(&parent_trace, &lookup);
        assert_eq!(
            flattened,
            vec![
                Member::Tool(ToolId::from("a:pre")),
                Member::Capability(child_id),
                Member::Tool(ToolId::from("a:x")),
                Member::Tool(ToolId::from("a:y")),
                Member::Tool(ToolId::from("a:post")),
            ]
        );
        assert_eq!(stats.cycles_broken, 0);
    }

    #[test]
    fn flatten_keeps_capability_id_when_child_trace_missing() {
        let lone_id = CapabilityId::new();
        let lookup = MapLookup(HashMap::new());
        let trace = ExecutionTrace::new(
            None,
            None,
            vec![Member::Capability(lone_id)],
            true,
            10,
            1.0,
        );
        let (flattened, _) = flatten_executed_path(&trace, &lookup);
        assert_eq!(flattened, vec![Member::Capability(lone_id)]);
    }

    #[test]
    fn flatten_breaks_self_referencing_cycle() {
        let cap_id = CapabilityId::new();
        let self_trace = ExecutionTrace::new(
            Some(cap_id),
            None,
            vec![Member::Capability(cap_id)],
            true,
            10,
            1.0,
        );
        let lookup = MapLookup(HashMap::from([(cap_id, self_trace.clone())]));
        let (flattened, stats) = flatten_executed_path(&self_trace, &lookup);
        assert_eq!(flattened, vec![Member::Capability(cap_id)]);
        assert_eq!(stats.cycles_broken, 1);
    }

    #[test]
    fn flatten_capability_members_expands_recursively() {
        let graph = GraphBuilder::new();
        let tool = ToolId::from("fs:read");
        graph.register_tool(tool.clone(), embedding(), None).unwrap();

        let leaf_cap = CapabilityId::new();
        graph
            .register_capability(CapabilityRegistration {
                id: leaf_cap,
                embedding: embedding(),
                members: vec![Member::Tool(tool.clone())],
                hierarchy_level: 0,
                success_rate: None,
                children: vec![],
                parents: vec![],
                fqdn: None,
                code_hash: None,
            })
            .unwrap();

        let meta_cap = CapabilityId::new();
        graph
            .register_capability(CapabilityRegistration {
                id: meta_cap,
                embedding: embedding(),
                members: vec![Member::Capability(leaf_cap), Member::Tool(tool.clone())],
                hierarchy_level: 1,
                success_rate: None,
                children: vec![leaf_cap],
                parents: vec![],
                fqdn: None,
                code_hash: None,
            })
            .unwrap();

        let (flattened, stats) = flatten_capability_members(&graph, meta_cap);
        assert_eq!(flattened, vec![tool.clone(), tool]);
        assert_eq!(stats.cycles_broken, 0);
    }
}

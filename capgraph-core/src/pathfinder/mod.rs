//! DR-DSP Pathfinder — shortest directed hyperpath from a source tool to
//! a target tool.
//!
//! A priority-queue relaxation over mixed node/edge weights, in the shape
//! of a Dijkstra search generalized from plain depth-first reachability.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};

use crate::graph::GraphBuilder;
use crate::types::{cosine_similarity, CapabilityId, Member, Node, ToolId};

const NODE_WEIGHT_EPSILON: f32 = 1e-6;
const TIE_TOLERANCE: f32 = 1e-6;

/// A node in the hyperpath search space: either a tool or the capability
/// that was entered to reach it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathNode {
    Tool(ToolId),
    Capability(CapabilityId),
}

/// The outcome of [`find_shortest_hyperpath`].
#[derive(Debug, Clone)]
pub struct HyperpathResult {
    pub found: bool,
    pub node_sequence: Vec<PathNode>,
    pub hyperedges: Vec<CapabilityId>,
    pub total_weight: f32,
}

impl HyperpathResult {
    fn not_found() -> Self {
        Self {
            found: false,
            node_sequence: Vec::new(),
            hyperedges: Vec::new(),
            total_weight: f32::INFINITY,
        }
    }
}

#[derive(Debug, Clone)]
struct Frontier {
    weight: f32,
    length: usize,
    node: PathNode,
}

impl PartialEq for Frontier {
    fn eq(&self, other: &Self) -> bool {
        self.weight == other.weight && self.length == other.length
    }
}
impl Eq for Frontier {}

impl Ord for Frontier {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; reverse so the smallest weight pops first.
        other
            .weight
            .partial_cmp(&self.weight)
            .unwrap_or(Ordering::Equal)
            .then_with(|| other.length.cmp(&self.length))
    }
}
impl PartialOrd for Frontier {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

fn node_embedding<'a>(graph_nodes: &'a HashMap<PathNode, Node>, node: &PathNode) -> Option<&'a [f32]> {
    graph_nodes.get(node).map(Node::embedding)
}

fn node_weight(node: &PathNode, graph_nodes: &HashMap<PathNode, Node>) -> f32 {
    match node {
        PathNode::Tool(_) => 0.0,
        PathNode::Capability(_) => {
            let success_rate = match graph_nodes.get(node) {
                Some(Node::Capability(c)) => c.success_rate,
                _ => 0.0,
            };
            -(success_rate + NODE_WEIGHT_EPSILON).ln()
        }
    }
}

/// `1 - cosine(a, b)`; `cosine_similarity` returns the `[-1, 1]` cosine
/// remapped to `[0, 1]`, so it is un-mapped first.
fn edge_weight(a: &[f32], b: &[f32]) -> f32 {
    let raw_cosine = cosine_similarity(a, b) * 2.0 - 1.0;
    (1.0 - raw_cosine).clamp(0.0, 1.0)
}

/// Shortest hyperpath from `source` to `target`.
///
/// Out of scope: multi-precondition hyperedges (all members of a
/// capability being simultaneously required before traversal); this
/// expands a hyperedge as the union of its unit edges.
#[must_use]
pub fn find_shortest_hyperpath(graph: &GraphBuilder, source: &ToolId, target: &ToolId) -> HyperpathResult {
    if source == target {
        return HyperpathResult {
            found: true,
            node_sequence: vec![PathNode::Tool(source.clone())],
            hyperedges: Vec::new(),
            total_weight: 0.0,
        };
    }

    let mut graph_nodes: HashMap<PathNode, Node> = HashMap::new();
    for tool in graph.get_tool_nodes() {
        graph_nodes.insert(PathNode::Tool(tool.id.clone()), Node::Tool(tool));
    }
    for cap in graph.get_capability_nodes() {
        graph_nodes.insert(PathNode::Capability(cap.id), Node::Capability(cap));
    }

    // Adjacency: tool -> [(next_node, via_capability_if_any)]. A capability
    // hyperedge connects every pair of its members (MVP: union of unit
    // edges), weighted by cosine distance between their embeddings, plus
    // the capability's node weight paid once on first entry.
    let mut adjacency: HashMap<PathNode, Vec<(PathNode, f32, Option<CapabilityId>)>> = HashMap::new();
    for cap_node in graph.get_capability_nodes() {
        let cap_weight = node_weight(&PathNode::Capability(cap_node.id), &graph_nodes);
        for (i, member_a) in cap_node.members.iter().enumerate() {
            for member_b in cap_node.members.iter().skip(i + 1) {
                let Some(node_a) = member_to_path_node(member_a) else { continue };
                let Some(node_b) = member_to_path_node(member_b) else { continue };
                let Some(emb_a) = node_embedding(&graph_nodes, &node_a) else { continue };
                let Some(emb_b) = node_embedding(&graph_nodes, &node_b) else { continue };
                let weight = edge_weight(emb_a, emb_b) + cap_weight;
                adjacency
                    .entry(node_a.clone())
                    .or_default()
                    .push((node_b.clone(), weight, Some(cap_node.id)));
                adjacency
                    .entry(node_b)
                    .or_default()
                    .push((node_a, weight, Some(cap_node.id)));
            }
        }
    }

    let source_node = PathNode::Tool(source.clone());
    let target_node = PathNode::Tool(target.clone());
    if !graph_nodes.contains_key(&source_node) || !graph_nodes.contains_key(&target_node) {
        return HyperpathResult::not_found();
    }

    let mut best: HashMap<PathNode, f32> = HashMap::new();
    let mut prev: HashMap<PathNode, (PathNode, Option<CapabilityId>)> = HashMap::new();
    let mut heap = BinaryHeap::new();

    best.insert(source_node.clone(), 0.0);
    heap.push(Frontier {
        weight: 0.0,
        length: 0,
        node: source_node.clone(),
    });

    while let Some(Frontier { weight, length, node }) = heap.pop() {
        if node == target_node {
            return reconstruct(&prev, &target_node, &source_node, weight);
        }
        if weight > *best.get(&node).unwrap_or(&f32::INFINITY) + TIE_TOLERANCE {
            continue;
        }
        let Some(edges) = adjacency.get(&node) else { continue };
        for (next, edge_w, via) in edges {
            let candidate = weight + edge_w;
            let current_best = *best.get(next).unwrap_or(&f32::INFINITY);
            let better = candidate < current_best - TIE_TOLERANCE;
            let tie_prefers_capability = (candidate - current_best).abs() <= TIE_TOLERANCE
                && via.is_some()
                && !matches!(prev.get(next), Some((_, Some(_))));
            if better || tie_prefers_capability {
                best.insert(next.clone(), candidate);
                prev.insert(next.clone(), (node.clone(), *via));
                heap.push(Frontier {
                    weight: candidate,
                    length: length + 1,
                    node: next.clone(),
                });
            }
        }
    }

    HyperpathResult::not_found()
}

fn member_to_path_node(member: &Member) -> Option<PathNode> {
    match member {
        Member::Tool(id) => Some(PathNode::Tool(id.clone())),
        Member::Capability(_) => None,
    }
}

fn reconstruct(
    prev: &HashMap<PathNode, (PathNode, Option<CapabilityId>)>,
    target: &PathNode,
    source: &PathNode,
    total_weight: f32,
) -> HyperpathResult {
    let mut sequence = vec![target.clone()];
    let mut hyperedges = Vec::new();
    let mut current = target.clone();
    while current != *source {
        let Some((parent, via)) = prev.get(&current) else { break };
        if let Some(cap_id) = via {
            sequence.push(PathNode::Capability(*cap_id));
            hyperedges.push(*cap_id);
        }
        sequence.push(parent.clone());
        current = parent.clone();
    }
    sequence.reverse();
    hyperedges.reverse();
    HyperpathResult {
        found: true,
        node_sequence: sequence,
        hyperedges,
        total_weight,
    }
}

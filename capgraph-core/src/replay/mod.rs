//! PER Replay & Training Pipeline — builds training examples from real
//! traces and feeds them to the scorer with prioritized sampling and
//! semi-hard negative mining.
//!
//! Sampling simplification: [`crate::collaborators::InMemoryTraceStore`]
//! (and, by contract, any [`TraceReader`]) performs deterministic top-k
//! selection weighted by `priority^alpha` rather than proportional
//! random draws, so pipeline tests stay deterministic without seeding a
//! sampler through the collaborator seam. Importance weights are
//! normalized within the sampled batch, since the reader contract does
//! not expose the full corpus's priority mass.

use std::collections::{HashMap, HashSet};

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::{info, instrument};

use crate::collaborators::{PriorityWriter, TraceReader};
use crate::error::Result;
use crate::graph::GraphBuilder;
use crate::hypergraph::{flatten_executed_path, TraceLookup};
use crate::scorer::{ShgatScorer, TrainingExample};
use crate::types::{cosine_similarity, CapabilityId, ExecutionTrace, Member, Node, PerConfig, TraceId, PRIORITY_EPSILON};

/// Result of [`train_from_traces`].
#[derive(Debug, Clone, Default)]
pub struct TrainFromTracesResult {
    pub loss: f32,
    pub accuracy: f32,
    pub traces_processed: usize,
    pub examples_generated: usize,
    pub priorities_updated: usize,
    /// `Some("tool-level")` when there was not enough data to train —
    /// degraded learning, not an error.
    pub fallback: Option<&'static str>,
}

impl TrainFromTracesResult {
    fn insufficient_data() -> Self {
        Self {
            fallback: Some("tool-level"),
            ..Self::default()
        }
    }
}

struct BatchLookup<'a> {
    by_capability: HashMap<CapabilityId, &'a ExecutionTrace>,
}

impl TraceLookup for BatchLookup<'_> {
    fn trace_for_capability(&self, capability_id: &CapabilityId) -> Option<ExecutionTrace> {
        self.by_capability.get(capability_id).map(|t| (*t).clone())
    }
}

fn percentile(sorted: &[f32], p: f32) -> f32 {
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = ((sorted.len() - 1) as f32 * p).round() as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn similarity_band(intents: &[&[f32]], nodes: &[(Member, Vec<f32>)], min_spread: f32) -> (f32, f32) {
    let mut values: Vec<f32> = Vec::with_capacity(intents.len() * nodes.len());
    for intent in intents {
        for (_, embedding) in nodes {
            values.push(cosine_similarity(intent, embedding));
        }
    }
    if values.is_empty() {
        return (0.0, 1.0);
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mut low = percentile(&values, 0.25);
    let mut high = percentile(&values, 0.75);
    if high - low < min_spread {
        let mid = (low + high) / 2.0;
        low = mid - min_spread / 2.0;
        high = mid + min_spread / 2.0;
    }
    (low.clamp(0.0, 1.0), high.clamp(0.0, 1.0))
}

fn all_nodes(graph: &GraphBuilder) -> Vec<(Member, Vec<f32>)> {
    graph
        .get_all_embeddings()
        .into_iter()
        .map(|node| match node {
            Node::Tool(t) => (Member::Tool(t.id), t.embedding),
            Node::Capability(c) => (Member::Capability(c.id), c.embedding),
        })
        .collect()
}

/// `cluster_similarity` is a raw cosine threshold in `[-1, 1]`, not the
/// `[0, 1]`-remapped `cosine_similarity` output — un-mapped before the
/// comparison below, the same way the pathfinder un-maps its edge weight.
fn exclusion_set(graph: &GraphBuilder, trace: &ExecutionTrace, flattened: &[Member], cluster_similarity: f32) -> HashSet<Member> {
    let mut excluded: HashSet<Member> = flattened.iter().cloned().collect();
    if let Some(cap_id) = trace.capability_id {
        if let Some(cap) = graph.get_capability(&cap_id) {
            excluded.extend(cap.members.iter().cloned());
        }
    }

    let excluded_tools: Vec<_> = excluded.iter().filter_map(Member::as_tool).cloned().collect();
    if !excluded_tools.is_empty() {
        let tool_nodes = graph.get_tool_nodes();
        let excluded_embeddings: Vec<Vec<f32>> = excluded_tools
            .iter()
            .filter_map(|id| tool_nodes.iter().find(|t| &t.id == id).map(|t| t.embedding.clone()))
            .collect();
        for tool in &tool_nodes {
            if excluded_embeddings.iter().any(|e| {
                let raw_cosine = cosine_similarity(e, &tool.embedding) * 2.0 - 1.0;
                raw_cosine >= cluster_similarity
            }) {
                excluded.insert(Member::Tool(tool.id.clone()));
            }
        }
    }
    excluded
}

fn mine_negatives(
    intent: &[f32],
    nodes: &[(Member, Vec<f32>)],
    excluded: &HashSet<Member>,
    band: (f32, f32),
    count: usize,
) -> Vec<Member> {
    let mut candidates: Vec<(Member, f32)> = nodes
        .iter()
        .filter(|(member, _)| !excluded.contains(member))
        .map(|(member, embedding)| (member.clone(), cosine_similarity(intent, embedding)))
        .collect();
    candidates.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    let mut chosen: Vec<Member> = candidates
        .iter()
        .filter(|(_, sim)| *sim >= band.0 && *sim <= band.1)
        .take(count)
        .map(|(m, _)| m.clone())
        .collect();

    if chosen.len() < count {
        let chosen_set: HashSet<Member> = chosen.iter().cloned().collect();
        for (member, _) in &candidates {
            if chosen.len() >= count {
                break;
            }
            if !chosen_set.contains(member) && !chosen.contains(member) {
                chosen.push(member.clone());
            }
        }
    }
    chosen
}

struct TaggedExample {
    example: TrainingExample,
    weight: f32,
    source_trace: TraceId,
}

/// Gate → sample → flatten → mine negatives → generate examples → train
/// → write back priorities.
#[instrument(skip(scorer, graph, reader, priority_writer, config))]
pub fn train_from_traces<R: TraceReader, P: PriorityWriter>(
    scorer: &ShgatScorer,
    graph: &GraphBuilder,
    reader: &R,
    priority_writer: &P,
    config: &PerConfig,
) -> Result<TrainFromTracesResult> {
    if reader.count() < config.min_traces {
        return Ok(TrainFromTracesResult::insufficient_data());
    }

    let sampled = reader.sample_by_priority(config.max_traces, config.min_priority, config.alpha);
    if sampled.is_empty() {
        return Ok(TrainFromTracesResult::insufficient_data());
    }

    // Path-level features: success rate and dominance of the exact
    // flattened path across the sampled batch.
    let lookup = BatchLookup {
        by_capability: sampled
            .iter()
            .filter_map(|t| t.capability_id.map(|id| (id, t)))
            .collect(),
    };
    let flattened: Vec<(Vec<Member>, crate::hypergraph::FlattenStats)> =
        sampled.iter().map(|t| flatten_executed_path(t, &lookup)).collect();

    let mut path_stats: HashMap<Vec<Member>, (u32, u32)> = HashMap::new();
    for (path, (flat, _)) in sampled.iter().zip(flattened.iter()) {
        let entry = path_stats.entry(flat.clone()).or_default();
        entry.1 += 1;
        if path.success {
            entry.0 += 1;
        }
    }
    let path_success_rate = |flat: &[Member]| -> f32 {
        path_stats
            .get(flat)
            .map(|(successes, total)| *successes as f32 / *total as f32)
            .unwrap_or(1.0)
    };

    let nodes = all_nodes(graph);
    let intents: Vec<&[f32]> = sampled.iter().filter_map(|t| t.intent_embedding.as_deref()).collect();
    let band = similarity_band(&intents, &nodes, config.min_similarity_spread);

    // Importance sampling weights (normalized within the sampled batch).
    let priority_weights: Vec<f32> = sampled.iter().map(|t| t.priority().max(PRIORITY_EPSILON).powf(config.alpha)).collect();
    let priority_sum: f32 = priority_weights.iter().sum();
    let n = sampled.len() as f32;
    let mut trace_weights: Vec<f32> = priority_weights
        .iter()
        .map(|pw| {
            let p_i = if priority_sum > 0.0 { pw / priority_sum } else { 1.0 / n };
            (n * p_i).powf(-config.beta)
        })
        .collect();
    let max_weight = trace_weights.iter().copied().fold(0.0_f32, f32::max);
    if max_weight > 0.0 {
        for w in &mut trace_weights {
            *w /= max_weight;
        }
    }

    let mut examples = Vec::new();
    for (i, trace) in sampled.iter().enumerate() {
        let Some(intent) = trace.intent_embedding.as_deref() else {
            continue;
        };
        let (flat, _) = &flattened[i];
        let success_rate = path_success_rate(flat);
        let outcome = if trace.success { success_rate } else { 0.0 };
        let excluded = exclusion_set(graph, trace, flat, config.negative_cluster_similarity);
        let negatives: Vec<CapabilityId> = mine_negatives(intent, &nodes, &excluded, band, config.negatives_per_trace)
            .into_iter()
            .filter_map(|m| m.as_capability().copied())
            .collect();

        for position in 0..flat.len() {
            let Member::Capability(candidate_id) = flat[position] else {
                continue;
            };
            examples.push(TaggedExample {
                example: TrainingExample {
                    intent_embedding: intent.to_vec(),
                    target_capability_id: candidate_id,
                    outcome,
                },
                weight: trace_weights[i],
                source_trace: trace.trace_id,
            });
        }
        for negative_id in &negatives {
            examples.push(TaggedExample {
                example: TrainingExample {
                    intent_embedding: intent.to_vec(),
                    target_capability_id: *negative_id,
                    outcome: 0.0,
                },
                weight: trace_weights[i],
                source_trace: trace.trace_id,
            });
        }
    }

    if examples.is_empty() {
        return Ok(TrainFromTracesResult {
            traces_processed: sampled.len(),
            fallback: Some("tool-level"),
            ..TrainFromTracesResult::default()
        });
    }

    let mut rng = ChaCha8Rng::seed_from_u64(0x5045_5228);
    let mut max_td_error: HashMap<TraceId, f32> = HashMap::new();
    let mut total_loss = 0.0_f32;
    let mut total_accuracy = 0.0_f32;
    let mut batches_run = 0usize;

    for _ in 0..config.epochs.max(1) {
        examples.shuffle(&mut rng);
        for chunk in examples.chunks(config.batch_size.max(1)) {
            let batch_examples: Vec<TrainingExample> = chunk.iter().map(|t| t.example.clone()).collect();
            let batch_weights: Vec<f32> = chunk.iter().map(|t| t.weight).collect();
            let result = scorer.train_batch(&batch_examples, &batch_weights)?;
            total_loss += result.loss;
            total_accuracy += result.accuracy;
            batches_run += 1;
            for (tagged, td_error) in chunk.iter().zip(result.td_errors.iter()) {
                let entry = max_td_error.entry(tagged.source_trace).or_insert(PRIORITY_EPSILON);
                if *td_error > *entry {
                    *entry = *td_error;
                }
            }
        }
    }

    let mut priorities_updated = 0usize;
    for (trace_id, td_error) in &max_td_error {
        priority_writer.set_priority(*trace_id, td_error.max(PRIORITY_EPSILON));
        priorities_updated += 1;
    }

    info!(
        traces = sampled.len(),
        examples = examples.len(),
        priorities_updated,
        "completed PER training pass"
    );

    Ok(TrainFromTracesResult {
        loss: total_loss / batches_run.max(1) as f32,
        accuracy: total_accuracy / batches_run.max(1) as f32,
        traces_processed: sampled.len(),
        examples_generated: examples.len(),
        priorities_updated,
        fallback: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::InMemoryTraceStore;
    use crate::graph::CapabilityRegistration;
    use crate::types::{ScorerConfig, ToolId};

    fn build_graph_and_scorer() -> (GraphBuilder, ShgatScorer, CapabilityId, ToolId) {
        let graph = GraphBuilder::new();
        let scorer = ShgatScorer::new(ScorerConfig {
            intent_dim: 4,
            hidden_dim: 4,
            num_heads: 2,
            ..ScorerConfig::default()
        });
        let tool = ToolId::from("fs:read");
        graph.register_tool(tool.clone(), vec![0.1, 0.2, 0.3, 0.4], None).unwrap();
        scorer.register_tool(tool.clone(), vec![0.1, 0.2, 0.3, 0.4]).unwrap();

        let cap_id = CapabilityId::new();
        graph
            .register_capability(CapabilityRegistration {
                id: cap_id,
                embedding: vec![0.2, 0.1, 0.4, 0.3],
                members: vec![Member::Tool(tool.clone())],
                hierarchy_level: 0,
                success_rate: Some(0.6),
                children: vec![],
                parents: vec![],
                fqdn: None,
                code_hash: None,
            })
            .unwrap();
        scorer
            .register_capability(crate::scorer::ScorerCapabilityRegistration {
                id: cap_id,
                embedding: vec![0.2, 0.1, 0.4, 0.3],
                members: vec![Member::Tool(tool.clone())],
                hierarchy_level: 0,
                success_rate: 0.6,
                children: vec![],
                last_used_at: None,
            })
            .unwrap();
        (graph, scorer, cap_id, tool)
    }

    #[test]
    fn returns_fallback_when_too_few_traces() {
        let (graph, scorer, _cap_id, _tool) = build_graph_and_scorer();
        let reader = InMemoryTraceStore::new();
        let config = PerConfig::default();
        let result = train_from_traces(&scorer, &graph, &reader, &reader, &config).unwrap();
        assert_eq!(result.fallback, Some("tool-level"));
        assert_eq!(result.priorities_updated, 0);
    }

    #[test]
    fn trains_and_updates_priorities_once_enough_traces_exist() {
        let (graph, scorer, cap_id, _tool) = build_graph_and_scorer();
        let reader = InMemoryTraceStore::new();
        let config = PerConfig {
            min_traces: 5,
            max_traces: 20,
            batch_size: 4,
            negatives_per_trace: 2,
            ..PerConfig::default()
        };
        for i in 0..10 {
            let intent = vec![0.2 + (i as f32) * 0.001, 0.1, 0.4, 0.3];
            let trace = ExecutionTrace::new(Some(cap_id), Some(intent), vec![Member::Tool(_tool.clone())], true, 10, 1.0);
            reader.insert(trace);
        }

        let result = train_from_traces(&scorer, &graph, &reader, &reader, &config).unwrap();
        assert!(result.fallback.is_none());
        assert_eq!(result.traces_processed, 10);
        assert!(result.examples_generated > 0);
        assert!(result.priorities_updated > 0);
    }
}

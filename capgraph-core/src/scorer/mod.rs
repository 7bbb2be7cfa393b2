//! SHGAT Scorer — K-head attention scoring over the hypergraph,
//! conditioned on an intent embedding.
//!
//! The scorer keeps its own mirror of tool and capability nodes rather
//! than borrowing [`crate::graph::GraphBuilder`] directly: the two are
//! meant to be independently deployable collaborators, kept in sync by
//! whoever owns both (the orchestrator, in this crate).
//!
//! Trainable parameters are the head-weighting projection and a per-head
//! scale/bias; the per-head query/key/value projections and the
//! depth/positional encoding are initialized once from a fixed seed and
//! then frozen (documented in DESIGN.md). This keeps the optimizer step
//! an exact analytic gradient instead of backpropagating through
//! attention, while still satisfying the "single optimizer step over a
//! batch" contract.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rand::{RngExt, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{instrument, trace};

use crate::error::{Error, Result};
use crate::types::{
    cosine_similarity, validate_embedding, CapabilityId, Member, ScorerConfig, ToolId,
};

const SEED: u64 = 0x5347_4154;
const TEMPORAL_HALF_LIFE_HOURS: f64 = 24.0;
const SCORE_EPSILON: f32 = 1e-6;

/// Per-score feature decomposition, normalized to sum to 1.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FeatureContributions {
    pub semantic: f32,
    pub structure: f32,
    pub temporal: f32,
    pub reliability: f32,
}

/// A single capability's score with full attribution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityMatch {
    pub capability_id: CapabilityId,
    pub score: f32,
    pub head_scores: Vec<f32>,
    pub head_weights: Vec<f32>,
    pub recursive_contribution: f32,
    pub feature_contributions: FeatureContributions,
}

/// A labeled training example.
#[derive(Debug, Clone)]
pub struct TrainingExample {
    pub intent_embedding: Vec<f32>,
    pub target_capability_id: CapabilityId,
    pub outcome: f32,
}

/// Result of [`ShgatScorer::train_batch`].
#[derive(Debug, Clone)]
pub struct TrainBatchResult {
    pub loss: f32,
    pub accuracy: f32,
    pub td_errors: Vec<f32>,
}

/// Result of [`ShgatScorer::train_single`].
#[derive(Debug, Clone, Copy)]
pub struct TrainSingleResult {
    pub loss: f32,
    pub grad_norm: f32,
}

/// Fields mirrored from [`crate::graph::CapabilityRegistration`] that the
/// scorer needs for scoring and attribution.
#[derive(Debug, Clone)]
pub struct ScorerCapabilityRegistration {
    pub id: CapabilityId,
    pub embedding: Vec<f32>,
    pub members: Vec<Member>,
    pub hierarchy_level: u32,
    pub success_rate: f32,
    pub children: Vec<CapabilityId>,
    pub last_used_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
struct CapabilityMirror {
    embedding: Vec<f32>,
    members: Vec<Member>,
    hierarchy_level: u32,
    success_rate: f32,
    children: Vec<CapabilityId>,
    last_used_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct NodeRegistry {
    tools: HashMap<ToolId, Vec<f32>>,
    capabilities: HashMap<CapabilityId, CapabilityMirror>,
    capability_order: Vec<CapabilityId>,
}

impl NodeRegistry {
    fn member_embedding(&self, member: &Member) -> Option<&[f32]> {
        match member {
            Member::Tool(id) => self.tools.get(id).map(Vec::as_slice),
            Member::Capability(id) => self.capabilities.get(id).map(|c| c.embedding.as_slice()),
        }
    }
}

/// Serializable network state for `export_params`/`import_params`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShgatParams {
    pub intent_dim: usize,
    pub hidden_dim: usize,
    pub num_heads: usize,
    pub recursive_mix: f32,
    query_weights: Vec<Vec<Vec<f32>>>,
    key_weights: Vec<Vec<Vec<f32>>>,
    value_weights: Vec<Vec<Vec<f32>>>,
    /// `[tool_depth, capability_depth]`, each of length `hidden_dim`.
    depth_bias: Vec<Vec<f32>>,
    pub head_weight_matrix: Vec<Vec<f32>>,
    pub head_scale: Vec<f32>,
    pub head_bias: Vec<f32>,
}

impl ShgatParams {
    /// Fresh parameters, deterministically seeded so two scorers built
    /// from the same config start identical.
    #[must_use]
    pub fn new(config: &ScorerConfig) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(SEED);
        let scale = 1.0 / (config.intent_dim as f32).sqrt();
        let random_matrix = |rng: &mut ChaCha8Rng, rows: usize, cols: usize| -> Vec<f32> {
            (0..rows * cols)
                .map(|_| rng.random_range(-scale..scale))
                .collect::<Vec<_>>()
        };
        let random_projection = |rng: &mut ChaCha8Rng| -> Vec<Vec<f32>> {
            (0..config.hidden_dim)
                .map(|_| {
                    (0..config.intent_dim)
                        .map(|_| rng.random_range(-scale..scale))
                        .collect()
                })
                .collect()
        };
        let query_weights = (0..config.num_heads)
            .map(|_| random_projection(&mut rng))
            .collect();
        let key_weights = (0..config.num_heads)
            .map(|_| random_projection(&mut rng))
            .collect();
        let value_weights = (0..config.num_heads)
            .map(|_| random_projection(&mut rng))
            .collect();
        let head_weight_matrix = (0..config.num_heads)
            .map(|_| random_matrix(&mut rng, 1, config.intent_dim))
            .collect();
        let depth_bias = vec![vec![0.0; config.hidden_dim]; 2];

        Self {
            intent_dim: config.intent_dim,
            hidden_dim: config.hidden_dim,
            num_heads: config.num_heads,
            recursive_mix: config.recursive_mix,
            query_weights,
            key_weights,
            value_weights,
            depth_bias,
            head_weight_matrix,
            head_scale: vec![1.0; config.num_heads],
            head_bias: vec![0.0; config.num_heads],
        }
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

fn mat_vec(matrix: &[Vec<f32>], x: &[f32]) -> Vec<f32> {
    matrix.iter().map(|row| dot(row, x)).collect()
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

fn softmax(logits: &[f32]) -> Vec<f32> {
    if logits.is_empty() {
        return Vec::new();
    }
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|x| (x - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    if sum <= 0.0 {
        vec![1.0 / logits.len() as f32; logits.len()]
    } else {
        exps.into_iter().map(|e| e / sum).collect()
    }
}

/// Everything the attention pass over one capability's members produces,
/// kept around so gradients can be derived without recomputing the
/// forward pass.
struct ForwardOutput {
    raw_logits: Vec<f32>,
    head_scores: Vec<f32>,
    head_weights: Vec<f32>,
    aggregated: f32,
}

fn forward_heads(params: &ShgatParams, registry: &NodeRegistry, intent: &[f32], members: &[Member]) -> ForwardOutput {
    let h = params.hidden_dim as f32;
    let scale = h.sqrt().max(1.0);

    let mut raw_logits = Vec::with_capacity(params.num_heads);
    let mut head_scores = Vec::with_capacity(params.num_heads);

    for k in 0..params.num_heads {
        let query = mat_vec(&params.query_weights[k], intent);
        if members.is_empty() {
            raw_logits.push(0.0);
            head_scores.push(sigmoid(params.head_bias[k]));
            continue;
        }

        let mut keys = Vec::with_capacity(members.len());
        let mut values = Vec::with_capacity(members.len());
        for member in members {
            let Some(embedding) = registry.member_embedding(member) else {
                continue;
            };
            let depth: usize = if member.is_capability() { 1 } else { 0 };
            let mut key = mat_vec(&params.key_weights[k], embedding);
            for (slot, bias) in key.iter_mut().zip(params.depth_bias[depth].iter()) {
                *slot += bias;
            }
            values.push(mat_vec(&params.value_weights[k], embedding));
            keys.push(key);
        }
        if keys.is_empty() {
            raw_logits.push(0.0);
            head_scores.push(sigmoid(params.head_bias[k]));
            continue;
        }

        let logits: Vec<f32> = keys.iter().map(|key| dot(&query, key) / scale).collect();
        let weights = softmax(&logits);
        let mut context = vec![0.0_f32; params.hidden_dim];
        for (w, value) in weights.iter().zip(values.iter()) {
            for (slot, v) in context.iter_mut().zip(value.iter()) {
                *slot += w * v;
            }
        }
        let raw_logit = dot(&query, &context) / scale;
        raw_logits.push(raw_logit);
        head_scores.push(sigmoid(params.head_scale[k] * raw_logit + params.head_bias[k]));
    }

    let head_logits = mat_vec(&params.head_weight_matrix, intent);
    let head_weights = softmax(&head_logits);
    let aggregated = head_weights
        .iter()
        .zip(head_scores.iter())
        .map(|(w, s)| w * s)
        .sum();

    ForwardOutput {
        raw_logits,
        head_scores,
        head_weights,
        aggregated,
    }
}

fn combine_final(aggregated: f32, recursive: f32, mix: f32, is_meta: bool) -> f32 {
    if is_meta {
        ((aggregated + mix * recursive) / (1.0 + mix)).clamp(0.0, 1.0)
    } else {
        aggregated.clamp(0.0, 1.0)
    }
}

fn temporal_feature(last_used_at: Option<DateTime<Utc>>) -> f32 {
    match last_used_at {
        None => 0.0,
        Some(ts) => {
            let hours = (Utc::now() - ts).num_seconds() as f64 / 3600.0;
            let decay = (-hours.max(0.0) / TEMPORAL_HALF_LIFE_HOURS).exp();
            decay.clamp(0.0, 1.0) as f32
        }
    }
}

fn structure_feature(registry: &NodeRegistry, capability_id: CapabilityId, cap: &CapabilityMirror) -> f32 {
    if cap.members.is_empty() || registry.capability_order.len() <= 1 {
        return 0.0;
    }
    let mut overlapping = 0usize;
    for other_id in &registry.capability_order {
        if *other_id == capability_id {
            continue;
        }
        if let Some(other) = registry.capabilities.get(other_id) {
            if other.members.iter().any(|m| cap.members.contains(m)) {
                overlapping += 1;
            }
        }
    }
    overlapping as f32 / (registry.capability_order.len() - 1) as f32
}

fn normalized_features(raw: [f32; 4]) -> FeatureContributions {
    let sum: f32 = raw.iter().sum();
    let n = if sum > SCORE_EPSILON {
        raw.map(|v| v / sum)
    } else {
        [0.25; 4]
    };
    FeatureContributions {
        semantic: n[0],
        structure: n[1],
        temporal: n[2],
        reliability: n[3],
    }
}

fn predict(
    params: &ShgatParams,
    registry: &NodeRegistry,
    intent: &[f32],
    capability_id: CapabilityId,
) -> Option<(f32, ForwardOutput, f32)> {
    let cap = registry.capabilities.get(&capability_id)?;
    let own = forward_heads(params, registry, intent, &cap.members);
    let recursive = if cap.hierarchy_level >= 1 && !cap.children.is_empty() {
        let child_scores: Vec<f32> = cap
            .children
            .iter()
            .filter_map(|child_id| registry.capabilities.get(child_id))
            .map(|child| forward_heads(params, registry, intent, &child.members).aggregated)
            .collect();
        if child_scores.is_empty() {
            0.0
        } else {
            child_scores.iter().sum::<f32>() / child_scores.len() as f32
        }
    } else {
        0.0
    };
    let final_score = combine_final(own.aggregated, recursive, params.recursive_mix, cap.hierarchy_level >= 1);
    Some((final_score, own, recursive))
}

#[derive(Debug, Clone)]
struct Gradient {
    head_weight_matrix: Vec<Vec<f32>>,
    head_scale: Vec<f32>,
    head_bias: Vec<f32>,
}

impl Gradient {
    fn zero(params: &ShgatParams) -> Self {
        Self {
            head_weight_matrix: params
                .head_weight_matrix
                .iter()
                .map(|row| vec![0.0; row.len()])
                .collect(),
            head_scale: vec![0.0; params.num_heads],
            head_bias: vec![0.0; params.num_heads],
        }
    }

    fn l2_norm(&self) -> f32 {
        let mut sum = 0.0_f32;
        for row in &self.head_weight_matrix {
            sum += row.iter().map(|v| v * v).sum::<f32>();
        }
        sum += self.head_scale.iter().map(|v| v * v).sum::<f32>();
        sum += self.head_bias.iter().map(|v| v * v).sum::<f32>();
        sum.sqrt()
    }

    fn scale(&mut self, factor: f32) {
        for row in &mut self.head_weight_matrix {
            for v in row.iter_mut() {
                *v *= factor;
            }
        }
        for v in &mut self.head_scale {
            *v *= factor;
        }
        for v in &mut self.head_bias {
            *v *= factor;
        }
    }

    fn add(&mut self, other: &Gradient) {
        for (row, other_row) in self.head_weight_matrix.iter_mut().zip(other.head_weight_matrix.iter()) {
            for (v, o) in row.iter_mut().zip(other_row.iter()) {
                *v += o;
            }
        }
        for (v, o) in self.head_scale.iter_mut().zip(other.head_scale.iter()) {
            *v += o;
        }
        for (v, o) in self.head_bias.iter_mut().zip(other.head_bias.iter()) {
            *v += o;
        }
    }

    fn apply(&self, params: &mut ShgatParams, learning_rate: f32) {
        for (row, grad_row) in params.head_weight_matrix.iter_mut().zip(self.head_weight_matrix.iter()) {
            for (v, g) in row.iter_mut().zip(grad_row.iter()) {
                *v -= learning_rate * g;
            }
        }
        for (v, g) in params.head_scale.iter_mut().zip(self.head_scale.iter()) {
            *v -= learning_rate * g;
        }
        for (v, g) in params.head_bias.iter_mut().zip(self.head_bias.iter()) {
            *v -= learning_rate * g;
        }
    }
}

/// Analytic gradient of the weighted BCE loss for one example, plus the
/// predicted probability and `|outcome - predicted|`.
fn example_gradient(
    params: &ShgatParams,
    registry: &NodeRegistry,
    example: &TrainingExample,
    weight: f32,
) -> Option<(Gradient, f32, f32, f32)> {
    let (final_score, forward, _recursive) = predict(params, registry, &example.intent_embedding, example.target_capability_id)?;
    let is_meta = registry
        .capabilities
        .get(&example.target_capability_id)
        .is_some_and(|c| c.hierarchy_level >= 1);

    let p = final_score.clamp(SCORE_EPSILON, 1.0 - SCORE_EPSILON);
    let y = example.outcome;
    let loss = -(y * p.ln() + (1.0 - y) * (1.0 - p).ln());
    let td_error = (y - p).abs();

    let d_loss_d_p = (p - y) / (p * (1.0 - p));
    let d_final_d_agg = if is_meta { 1.0 / (1.0 + params.recursive_mix) } else { 1.0 };
    let d_loss_d_agg = weight * d_loss_d_p * d_final_d_agg;

    let mut grad = Gradient::zero(params);
    for j in 0..params.num_heads {
        let w_j = forward.head_weights[j];
        let s_j = forward.head_scores[j];
        let d_agg_d_logit_j = w_j * (s_j - forward.aggregated);
        let d_loss_d_logit_j = d_loss_d_agg * d_agg_d_logit_j;
        for (g, x) in grad.head_weight_matrix[j].iter_mut().zip(example.intent_embedding.iter()) {
            *g += d_loss_d_logit_j * x;
        }

        let sigmoid_grad = s_j * (1.0 - s_j);
        let d_loss_d_s_j = d_loss_d_agg * w_j;
        grad.head_scale[j] += d_loss_d_s_j * sigmoid_grad * forward.raw_logits[j];
        grad.head_bias[j] += d_loss_d_s_j * sigmoid_grad;
    }

    Some((grad, loss * weight, td_error, p))
}

/// The K-head attention scorer.
pub struct ShgatScorer {
    params: RwLock<Arc<ShgatParams>>,
    nodes: RwLock<NodeRegistry>,
    config: ScorerConfig,
}

impl ShgatScorer {
    #[must_use]
    pub fn new(config: ScorerConfig) -> Self {
        let params = ShgatParams::new(&config);
        Self {
            params: RwLock::new(Arc::new(params)),
            nodes: RwLock::new(NodeRegistry::default()),
            config,
        }
    }

    /// Mirror a tool registration from the graph builder.
    pub fn register_tool(&self, id: ToolId, embedding: Vec<f32>) -> Result<()> {
        validate_embedding(&embedding, None)?;
        self.nodes.write().tools.insert(id, embedding);
        Ok(())
    }

    /// Mirror a capability registration from the graph builder.
    pub fn register_capability(&self, registration: ScorerCapabilityRegistration) -> Result<()> {
        validate_embedding(&registration.embedding, None)?;
        let mut nodes = self.nodes.write();
        let id = registration.id;
        if !nodes.capabilities.contains_key(&id) {
            nodes.capability_order.push(id);
        }
        nodes.capabilities.insert(
            id,
            CapabilityMirror {
                embedding: registration.embedding,
                members: registration.members,
                hierarchy_level: registration.hierarchy_level,
                success_rate: registration.success_rate.clamp(0.0, 1.0),
                children: registration.children,
                last_used_at: registration.last_used_at,
            },
        );
        Ok(())
    }

    /// Update the mirrored reliability/recency signals after an
    /// observed outcome, without a full re-registration round trip.
    pub fn record_capability_observation(&self, id: CapabilityId, success: bool) -> Result<()> {
        let mut nodes = self.nodes.write();
        let cap = nodes
            .capabilities
            .get_mut(&id)
            .ok_or_else(|| Error::InvalidInput(format!("unknown capability {id}")))?;
        let outcome = if success { 1.0 } else { 0.0 };
        let decay = 0.1_f32;
        cap.success_rate = ((1.0 - decay) * cap.success_rate + decay * outcome).clamp(0.0, 1.0);
        cap.last_used_at = Some(Utc::now());
        Ok(())
    }

    /// Score every registered capability against an intent embedding,
    /// descending by score.
    #[instrument(skip(self, intent_embedding))]
    pub fn score_all_capabilities(&self, intent_embedding: &[f32]) -> Result<Vec<CapabilityMatch>> {
        validate_embedding(intent_embedding, None)?;
        let params = self.params_snapshot();
        let registry = self.nodes.read();

        let mut matches = Vec::with_capacity(registry.capability_order.len());
        for capability_id in &registry.capability_order {
            let Some((score, forward, recursive)) = predict(&params, &registry, intent_embedding, *capability_id) else {
                continue;
            };
            let cap = &registry.capabilities[capability_id];
            let semantic = cosine_similarity(intent_embedding, &cap.embedding);
            let structure = structure_feature(&registry, *capability_id, cap);
            let temporal = temporal_feature(cap.last_used_at);
            let reliability = cap.success_rate;
            let feature_contributions = normalized_features([semantic, structure, temporal, reliability]);

            matches.push(CapabilityMatch {
                capability_id: *capability_id,
                score,
                head_scores: forward.head_scores,
                head_weights: forward.head_weights,
                recursive_contribution: recursive.clamp(0.0, 1.0),
                feature_contributions,
            });
        }
        matches.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        Ok(matches)
    }

    /// One optimizer step over a labeled batch, weighted by per-example
    /// importance sampling weights.
    #[instrument(skip(self, examples, importance_weights))]
    pub fn train_batch(&self, examples: &[TrainingExample], importance_weights: &[f32]) -> Result<TrainBatchResult> {
        if examples.len() != importance_weights.len() {
            return Err(Error::InvalidInput(
                "examples and importance_weights must have equal length".into(),
            ));
        }
        if examples.is_empty() {
            return Ok(TrainBatchResult {
                loss: 0.0,
                accuracy: 0.0,
                td_errors: Vec::new(),
            });
        }

        let params = self.params_snapshot();
        let registry = self.nodes.read();

        let mut total_gradient = Gradient::zero(&params);
        let mut total_loss = 0.0_f32;
        let mut correct = 0usize;
        let mut td_errors = Vec::with_capacity(examples.len());
        let mut skipped = 0u64;

        for (example, &weight) in examples.iter().zip(importance_weights.iter()) {
            match example_gradient(&params, &registry, example, weight) {
                Some((grad, weighted_loss, td_error, p)) => {
                    total_gradient.add(&grad);
                    total_loss += weighted_loss;
                    td_errors.push(td_error.clamp(0.0, 1.0));
                    if (p >= 0.5) == (example.outcome >= 0.5) {
                        correct += 1;
                    }
                }
                None => {
                    skipped += 1;
                    td_errors.push(SCORE_EPSILON);
                }
            }
        }
        drop(registry);
        if skipped > 0 {
            trace!(skipped, "training examples skipped: unknown target capability");
        }

        let n = examples.len() as f32;
        total_gradient.scale(1.0 / n);
        let grad_norm = total_gradient.l2_norm();
        if grad_norm > self.config.grad_clip_norm && grad_norm > 0.0 {
            total_gradient.scale(self.config.grad_clip_norm / grad_norm);
        }

        let mut next_params = (*params).clone();
        total_gradient.apply(&mut next_params, self.config.learning_rate);
        *self.params.write() = Arc::new(next_params);

        Ok(TrainBatchResult {
            loss: total_loss / n,
            accuracy: correct as f32 / n,
            td_errors,
        })
    }

    /// A single-example gradient step, used by the online learning
    /// controller.
    pub fn train_single(&self, example: TrainingExample) -> Result<TrainSingleResult> {
        let result = self.train_batch(std::slice::from_ref(&example), &[1.0])?;
        let params = self.params_snapshot();
        let registry = self.nodes.read();
        let grad_norm = example_gradient(&params, &registry, &example, 1.0)
            .map(|(grad, _, _, _)| grad.l2_norm())
            .unwrap_or(0.0);
        Ok(TrainSingleResult {
            loss: result.loss,
            grad_norm,
        })
    }

    /// A cheap `Arc` clone of the current parameters, used for scoring
    /// without holding the write lock.
    #[must_use]
    pub fn params_snapshot(&self) -> Arc<ShgatParams> {
        Arc::clone(&self.params.read())
    }

    /// Serialize the full network state.
    #[must_use]
    pub fn export_params(&self) -> ShgatParams {
        (*self.params_snapshot()).clone()
    }

    /// Replace the network state wholesale (checkpoint restore).
    pub fn import_params(&self, params: ShgatParams) {
        *self.params.write() = Arc::new(params);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ScorerConfig {
        ScorerConfig {
            intent_dim: 4,
            hidden_dim: 4,
            num_heads: 2,
            grad_clip_norm: 5.0,
            learning_rate: 0.5,
            recursive_mix: 0.3,
        }
    }

    fn embedding(seed: f32) -> Vec<f32> {
        vec![seed, 1.0 - seed, seed * 0.5, 0.2]
    }

    fn scorer_with_capability() -> (ShgatScorer, ToolId, CapabilityId) {
        let scorer = ShgatScorer::new(config());
        let tool = ToolId::from("fs:read");
        scorer.register_tool(tool.clone(), embedding(0.1)).unwrap();
        let cap_id = CapabilityId::new();
        scorer
            .register_capability(ScorerCapabilityRegistration {
                id: cap_id,
                embedding: embedding(0.3),
                members: vec![Member::Tool(tool.clone())],
                hierarchy_level: 0,
                success_rate: 0.7,
                children: vec![],
                last_used_at: None,
            })
            .unwrap();
        (scorer, tool, cap_id)
    }

    #[test]
    fn scores_are_sorted_and_bounded() {
        let (scorer, _tool, cap_id) = scorer_with_capability();
        let matches = scorer.score_all_capabilities(&embedding(0.25)).unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].capability_id, cap_id);
        assert!((0.0..=1.0).contains(&matches[0].score));
        let weight_sum: f32 = matches[0].head_weights.iter().sum();
        assert!((weight_sum - 1.0).abs() < 1e-5);
    }

    #[test]
    fn feature_contributions_sum_to_one() {
        let (scorer, _tool, _cap_id) = scorer_with_capability();
        let matches = scorer.score_all_capabilities(&embedding(0.25)).unwrap();
        let fc = matches[0].feature_contributions;
        let sum = fc.semantic + fc.structure + fc.temporal + fc.reliability;
        assert!((sum - 1.0).abs() < 1e-5);
    }

    #[test]
    fn training_reduces_loss_on_repeated_example() {
        let (scorer, _tool, cap_id) = scorer_with_capability();
        let example = TrainingExample {
            intent_embedding: embedding(0.25),
            target_capability_id: cap_id,
            outcome: 1.0,
        };
        let first = scorer.train_batch(&[example.clone()], &[1.0]).unwrap();
        for _ in 0..10 {
            scorer.train_batch(&[example.clone()], &[1.0]).unwrap();
        }
        let last = scorer.train_batch(&[example], &[1.0]).unwrap();
        assert!(last.loss <= first.loss);
    }

    #[test]
    fn train_batch_rejects_mismatched_weights() {
        let (scorer, _tool, cap_id) = scorer_with_capability();
        let example = TrainingExample {
            intent_embedding: embedding(0.25),
            target_capability_id: cap_id,
            outcome: 1.0,
        };
        let result = scorer.train_batch(&[example], &[]);
        assert!(result.is_err());
    }

    #[test]
    fn recursive_contribution_is_zero_for_leaf_capability() {
        let (scorer, _tool, _cap_id) = scorer_with_capability();
        let matches = scorer.score_all_capabilities(&embedding(0.25)).unwrap();
        assert_eq!(matches[0].recursive_contribution, 0.0);
    }

    #[test]
    fn meta_capability_uses_child_scores() {
        let (scorer, tool, leaf_id) = scorer_with_capability();
        let meta_id = CapabilityId::new();
        scorer
            .register_capability(ScorerCapabilityRegistration {
                id: meta_id,
                embedding: embedding(0.4),
                members: vec![Member::Capability(leaf_id), Member::Tool(tool)],
                hierarchy_level: 1,
                success_rate: 0.5,
                children: vec![leaf_id],
                last_used_at: None,
            })
            .unwrap();
        let matches = scorer.score_all_capabilities(&embedding(0.25)).unwrap();
        let meta_match = matches.iter().find(|m| m.capability_id == meta_id).unwrap();
        assert!((0.0..=1.0).contains(&meta_match.recursive_contribution));
    }

    #[test]
    fn export_then_import_round_trips_scores() {
        let (scorer, _tool, _cap_id) = scorer_with_capability();
        let intent = embedding(0.25);
        let before = scorer.score_all_capabilities(&intent).unwrap();
        let params = scorer.export_params();

        let scorer2 = ShgatScorer::new(config());
        scorer2.register_tool(ToolId::from("fs:read"), embedding(0.1)).unwrap();
        for (id, cap) in &scorer.nodes.read().capabilities {
            scorer2
                .register_capability(ScorerCapabilityRegistration {
                    id: *id,
                    embedding: cap.embedding.clone(),
                    members: cap.members.clone(),
                    hierarchy_level: cap.hierarchy_level,
                    success_rate: cap.success_rate,
                    children: cap.children.clone(),
                    last_used_at: cap.last_used_at,
                })
                .unwrap();
        }
        scorer2.import_params(params);

        let after = scorer2.score_all_capabilities(&intent).unwrap();
        assert_eq!(before.len(), after.len());
        assert!((before[0].score - after[0].score).abs() < 1e-5);
    }
}

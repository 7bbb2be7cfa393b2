//! Engine-wide configuration. Nothing here touches the filesystem —
//! loading a `CoreConfig` from TOML/env is the CLI's job (see
//! `capgraph-cli::config`).

use serde::{Deserialize, Serialize};

/// Episodic Memory Store tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EpisodicConfig {
    pub buffer_flush_size: usize,
    pub flush_interval_secs: u64,
    pub retention_days: i64,
    pub max_events: usize,
}

impl Default for EpisodicConfig {
    fn default() -> Self {
        Self {
            buffer_flush_size: 50,
            flush_interval_secs: 5,
            retention_days: 30,
            max_events: 10_000,
        }
    }
}

/// SHGAT scorer architecture tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScorerConfig {
    /// Intent embedding dimension D.
    pub intent_dim: usize,
    /// Hidden projection dimension H.
    pub hidden_dim: usize,
    /// Number of parallel attention heads K.
    pub num_heads: usize,
    /// Gradient clipping norm.
    pub grad_clip_norm: f32,
    /// Learning rate for mini-batch gradient descent.
    pub learning_rate: f32,
    /// Mixing coefficient between the aggregated head score and the
    /// recursive contribution of child capabilities. Fixed at 0.3 rather
    /// than learned (see DESIGN.md).
    pub recursive_mix: f32,
}

impl Default for ScorerConfig {
    fn default() -> Self {
        Self {
            intent_dim: 1024,
            hidden_dim: 64,
            num_heads: 4,
            grad_clip_norm: 5.0,
            learning_rate: 0.01,
            recursive_mix: 0.3,
        }
    }
}

/// PER replay & training pipeline tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PerConfig {
    pub min_traces: usize,
    pub max_traces: usize,
    pub alpha: f32,
    pub min_priority: f32,
    pub beta: f32,
    pub batch_size: usize,
    pub epochs: usize,
    pub negatives_per_trace: usize,
    pub min_similarity_spread: f32,
    pub negative_cluster_similarity: f32,
}

impl Default for PerConfig {
    fn default() -> Self {
        Self {
            min_traces: 20,
            max_traces: 100,
            alpha: 0.6,
            min_priority: 0.1,
            beta: 0.4,
            batch_size: 32,
            epochs: 1,
            negatives_per_trace: 8,
            min_similarity_spread: 0.30,
            negative_cluster_similarity: 0.7,
        }
    }
}

/// Adaptive threshold tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdConfig {
    pub prior_alpha: f64,
    pub prior_beta: f64,
    pub min_threshold: f32,
    pub max_threshold: f32,
    /// Default explicit threshold used before any outcomes are observed.
    pub default_explicit_threshold: f32,
    pub default_suggestion_threshold: f32,
    pub ema_decay: f64,
    /// Derivation strategy for the global thresholds (see DESIGN.md).
    pub derivation: ThresholdDerivation,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            prior_alpha: 1.0,
            prior_beta: 1.0,
            min_threshold: 0.3,
            max_threshold: 0.95,
            default_explicit_threshold: 0.6,
            default_suggestion_threshold: 0.5,
            ema_decay: 0.9,
            derivation: ThresholdDerivation::Ema,
        }
    }
}

/// Which derivation produces the global thresholds from per-tool Beta
/// posteriors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ThresholdDerivation {
    /// Exponential moving average of recent per-tool means.
    Ema,
    /// Thompson sample of the mean of a configured reference tool set.
    ThompsonSample,
}

/// Flattening recursion guard against stack overflow on cyclic members.
pub const MAX_FLATTEN_DEPTH: usize = 20;

/// Top-level configuration bundling every component's tunables.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub episodic: EpisodicConfig,
    pub scorer: ScorerConfig,
    pub per: PerConfig,
    pub thresholds: ThresholdConfig,
}

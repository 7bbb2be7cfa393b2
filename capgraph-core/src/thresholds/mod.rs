//! Adaptive Thresholds — per-tool Beta(α, β) posteriors updated from many
//! sites without cross-tool coordination.
//!
//! Beta-posterior bookkeeping generalized to also derive two global
//! thresholds by one of two configured strategies (see DESIGN.md).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use rand::{RngExt, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::types::{ThresholdConfig, ThresholdDerivation, ToolId};

/// Atomic success/failure counters for one tool's Beta posterior.
#[derive(Debug, Default)]
struct ToolCounters {
    successes: AtomicU64,
    failures: AtomicU64,
}

impl ToolCounters {
    fn mean(&self, prior_alpha: f64, prior_beta: f64) -> f64 {
        let alpha = prior_alpha + self.successes.load(Ordering::Relaxed) as f64;
        let beta = prior_beta + self.failures.load(Ordering::Relaxed) as f64;
        alpha / (alpha + beta)
    }

    fn sample(&self, prior_alpha: f64, prior_beta: f64, rng: &mut ChaCha8Rng) -> f64 {
        let alpha = prior_alpha + self.successes.load(Ordering::Relaxed) as f64;
        let beta = prior_beta + self.failures.load(Ordering::Relaxed) as f64;
        sample_beta(alpha, beta, rng)
    }
}

/// Sample from Beta(alpha, beta) via two Gamma draws (Marsaglia-Tsang).
fn sample_gamma(shape: f64, rng: &mut ChaCha8Rng) -> f64 {
    if shape < 1.0 {
        let u: f64 = rng.random_range(0.0..1.0);
        return sample_gamma(shape + 1.0, rng) * u.powf(1.0 / shape);
    }
    let d = shape - 1.0 / 3.0;
    let c = 1.0 / (9.0 * d).sqrt();
    loop {
        let mut x;
        let mut v;
        loop {
            x = sample_normal(rng);
            v = 1.0 + c * x;
            if v > 0.0 {
                break;
            }
        }
        v = v * v * v;
        let u: f64 = rng.random_range(0.0..1.0);
        if u < 1.0 - 0.0331 * x * x * x * x {
            return d * v;
        }
        if u.ln() < 0.5 * x * x + d * (1.0 - v + v.ln()) {
            return d * v;
        }
    }
}

fn sample_normal(rng: &mut ChaCha8Rng) -> f64 {
    let u1: f64 = rng.random_range(f64::EPSILON..1.0);
    let u2: f64 = rng.random_range(0.0..1.0);
    (-2.0 * u1.ln()).sqrt() * (std::f64::consts::TAU * u2).cos()
}

fn sample_beta(alpha: f64, beta: f64, rng: &mut ChaCha8Rng) -> f64 {
    let x = sample_gamma(alpha, rng);
    let y = sample_gamma(beta, rng);
    if x + y <= 0.0 {
        0.5
    } else {
        x / (x + y)
    }
}

/// The two global thresholds read by the suggestion orchestrator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    pub suggestion_threshold: f32,
    pub explicit_threshold: f32,
}

/// Owns every tool's Beta posterior and derives the global thresholds.
pub struct AdaptiveThresholds {
    counters: RwLock<HashMap<ToolId, ToolCounters>>,
    config: ThresholdConfig,
    ema_suggestion: RwLock<f64>,
    ema_explicit: RwLock<f64>,
    rng: RwLock<ChaCha8Rng>,
    reference_tools: Vec<ToolId>,
}

impl AdaptiveThresholds {
    #[must_use]
    pub fn new(config: ThresholdConfig, reference_tools: Vec<ToolId>) -> Self {
        let suggestion = f64::from(config.default_suggestion_threshold);
        let explicit = f64::from(config.default_explicit_threshold);
        Self {
            counters: RwLock::new(HashMap::new()),
            ema_suggestion: RwLock::new(suggestion),
            ema_explicit: RwLock::new(explicit),
            rng: RwLock::new(ChaCha8Rng::seed_from_u64(0x7468_7265)),
            config,
            reference_tools,
        }
    }

    /// Record an outcome for `tool_id`: `α ← α + success`, `β ← β + (1 −
    /// success)`.
    pub fn record_tool_outcome(&self, tool_id: &ToolId, success: bool) {
        let counters = self.counters.read();
        if let Some(counter) = counters.get(tool_id) {
            if success {
                counter.successes.fetch_add(1, Ordering::Relaxed);
            } else {
                counter.failures.fetch_add(1, Ordering::Relaxed);
            }
            return;
        }
        drop(counters);
        let mut counters = self.counters.write();
        let counter = counters.entry(tool_id.clone()).or_default();
        if success {
            counter.successes.fetch_add(1, Ordering::Relaxed);
        } else {
            counter.failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// The two global thresholds, clamped to `[min_threshold,
    /// max_threshold]`.
    pub fn get_thresholds(&self) -> Thresholds {
        let raw = match self.config.derivation {
            ThresholdDerivation::Ema => self.ema_derivation(),
            ThresholdDerivation::ThompsonSample => self.thompson_derivation(),
        };
        Thresholds {
            suggestion_threshold: (raw.0 as f32).clamp(self.config.min_threshold, self.config.max_threshold),
            explicit_threshold: (raw.1 as f32).clamp(self.config.min_threshold, self.config.max_threshold),
        }
    }

    fn ema_derivation(&self) -> (f64, f64) {
        let counters = self.counters.read();
        if counters.is_empty() {
            return (
                f64::from(self.config.default_suggestion_threshold),
                f64::from(self.config.default_explicit_threshold),
            );
        }
        let mean: f64 = counters
            .values()
            .map(|c| c.mean(self.config.prior_alpha, self.config.prior_beta))
            .sum::<f64>()
            / counters.len() as f64;
        drop(counters);

        let decay = self.config.ema_decay;
        let mut suggestion = self.ema_suggestion.write();
        *suggestion = decay * *suggestion + (1.0 - decay) * mean;
        let mut explicit = self.ema_explicit.write();
        *explicit = decay * *explicit + (1.0 - decay) * mean;
        (*suggestion, *explicit * 1.1)
    }

    fn thompson_derivation(&self) -> (f64, f64) {
        let counters = self.counters.read();
        let mut rng = self.rng.write();
        let samples: Vec<f64> = self
            .reference_tools
            .iter()
            .filter_map(|id| counters.get(id))
            .map(|c| c.sample(self.config.prior_alpha, self.config.prior_beta, &mut rng))
            .collect();
        if samples.is_empty() {
            return (
                f64::from(self.config.default_suggestion_threshold),
                f64::from(self.config.default_explicit_threshold),
            );
        }
        let mean = samples.iter().sum::<f64>() / samples.len() as f64;
        (mean, mean * 1.1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_before_any_outcomes() {
        let thresholds = AdaptiveThresholds::new(ThresholdConfig::default(), vec![]);
        let result = thresholds.get_thresholds();
        assert!((0.3..=0.95).contains(&result.suggestion_threshold));
        assert!((0.3..=0.95).contains(&result.explicit_threshold));
    }

    #[test]
    fn outcomes_move_ema_threshold() {
        let thresholds = AdaptiveThresholds::new(ThresholdConfig::default(), vec![]);
        let tool = ToolId::from("fs:read");
        for _ in 0..50 {
            thresholds.record_tool_outcome(&tool, true);
        }
        let after_success = thresholds.get_thresholds();

        let thresholds2 = AdaptiveThresholds::new(ThresholdConfig::default(), vec![]);
        for _ in 0..50 {
            thresholds2.record_tool_outcome(&tool, false);
        }
        let after_failure = thresholds2.get_thresholds();

        assert!(after_success.suggestion_threshold >= after_failure.suggestion_threshold);
    }

    #[test]
    fn thresholds_are_always_clamped() {
        let config = ThresholdConfig {
            min_threshold: 0.3,
            max_threshold: 0.95,
            ..ThresholdConfig::default()
        };
        let thresholds = AdaptiveThresholds::new(config, vec![]);
        let tool = ToolId::from("fs:read");
        for _ in 0..1000 {
            thresholds.record_tool_outcome(&tool, true);
        }
        let result = thresholds.get_thresholds();
        assert!(result.suggestion_threshold <= 0.95);
        assert!(result.explicit_threshold <= 0.95);
    }

    #[test]
    fn thompson_sample_derivation_is_bounded() {
        let config = ThresholdConfig {
            derivation: ThresholdDerivation::ThompsonSample,
            ..ThresholdConfig::default()
        };
        let tool = ToolId::from("fs:read");
        let thresholds = AdaptiveThresholds::new(config, vec![tool.clone()]);
        for _ in 0..20 {
            thresholds.record_tool_outcome(&tool, true);
        }
        let result = thresholds.get_thresholds();
        assert!((0.3..=0.95).contains(&result.suggestion_threshold));
    }
}

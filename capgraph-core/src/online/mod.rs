//! Online Learning Controller — turns each persisted trace into a
//! single SHGAT gradient step.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{debug, instrument, warn};

use crate::collaborators::{TraceReader, TraceSubscriber};
use crate::scorer::{ShgatScorer, TrainSingleResult, TrainingExample};

/// Emitted after each successful single-example update (the "learning
/// trained" signal).
#[derive(Debug, Clone, Copy)]
pub struct LearningTrainedSignal {
    pub loss: f32,
    pub grad_norm: f32,
}

/// Running counters, useful for health/status reporting.
#[derive(Debug, Default)]
pub struct OnlineLearningStats {
    pub events_seen: AtomicU64,
    pub events_trained: AtomicU64,
    pub events_skipped_no_capability: AtomicU64,
    pub events_skipped_no_embedding: AtomicU64,
}

/// Drives [`ShgatScorer::train_single`] from the trace-saved signal.
pub struct OnlineLearningController<R: TraceReader> {
    scorer: Arc<ShgatScorer>,
    reader: Arc<R>,
    pub stats: OnlineLearningStats,
}

impl<R: TraceReader> OnlineLearningController<R> {
    #[must_use]
    pub fn new(scorer: Arc<ShgatScorer>, reader: Arc<R>) -> Self {
        Self {
            scorer,
            reader,
            stats: OnlineLearningStats::default(),
        }
    }

    /// Process one `execution.trace.saved` event: drop it if its
    /// capability id or intent embedding is missing, otherwise run a
    /// single SHGAT gradient step. Training the same event twice is safe
    /// and simply applies a second update.
    #[instrument(skip(self))]
    pub fn handle_trace_saved(&self, event: &crate::collaborators::TraceSavedEvent) -> Option<LearningTrainedSignal> {
        self.stats.events_seen.fetch_add(1, Ordering::Relaxed);

        let Some(capability_id) = event.capability_id else {
            self.stats.events_skipped_no_capability.fetch_add(1, Ordering::Relaxed);
            debug!("skipping trace-saved event with no capability id");
            return None;
        };
        let Some(trace) = self.reader.get(event.trace_id) else {
            self.stats.events_skipped_no_embedding.fetch_add(1, Ordering::Relaxed);
            return None;
        };
        let Some(intent_embedding) = trace.intent_embedding else {
            self.stats.events_skipped_no_embedding.fetch_add(1, Ordering::Relaxed);
            debug!("skipping trace-saved event with no intent embedding");
            return None;
        };

        let example = TrainingExample {
            intent_embedding,
            target_capability_id: capability_id,
            outcome: if event.success { 1.0 } else { 0.0 },
        };
        match self.scorer.train_single(example) {
            Ok(TrainSingleResult { loss, grad_norm }) => {
                self.stats.events_trained.fetch_add(1, Ordering::Relaxed);
                Some(LearningTrainedSignal { loss, grad_norm })
            }
            Err(err) => {
                warn!(error = %err, "online learning step failed");
                None
            }
        }
    }

    /// Drain `subscriber` until the channel closes, applying
    /// [`Self::handle_trace_saved`] to each event.
    pub async fn run(&self, mut subscriber: impl TraceSubscriber) {
        while let Some(event) = subscriber.recv().await {
            let _ = self.handle_trace_saved(&event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{InMemoryTraceStore, TraceSavedEvent};
    use crate::types::{CapabilityId, ExecutionTrace, Member, ScorerConfig, ToolId};

    fn scorer_with_capability() -> (Arc<ShgatScorer>, CapabilityId) {
        let scorer = Arc::new(ShgatScorer::new(ScorerConfig {
            intent_dim: 4,
            hidden_dim: 4,
            num_heads: 2,
            ..ScorerConfig::default()
        }));
        let tool = ToolId::from("fs:read");
        scorer.register_tool(tool.clone(), vec![0.1, 0.2, 0.3, 0.4]).unwrap();
        let cap_id = CapabilityId::new();
        scorer
            .register_capability(crate::scorer::ScorerCapabilityRegistration {
                id: cap_id,
                embedding: vec![0.2, 0.1, 0.4, 0.3],
                members: vec![Member::Tool(tool)],
                hierarchy_level: 0,
                success_rate: 0.5,
                children: vec![],
                last_used_at: None,
            })
            .unwrap();
        (scorer, cap_id)
    }

    #[test]
    fn skips_events_without_capability_id() {
        let (scorer, _cap_id) = scorer_with_capability();
        let reader = Arc::new(InMemoryTraceStore::new());
        let controller = OnlineLearningController::new(scorer, reader);

        let event = TraceSavedEvent {
            trace_id: crate::types::TraceId::new(),
            capability_id: None,
            success: true,
        };
        let result = controller.handle_trace_saved(&event);
        assert!(result.is_none());
        assert_eq!(controller.stats.events_skipped_no_capability.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn trains_on_valid_event() {
        let (scorer, cap_id) = scorer_with_capability();
        let reader = Arc::new(InMemoryTraceStore::new());
        let trace = ExecutionTrace::new(Some(cap_id), Some(vec![0.25, 0.25, 0.25, 0.25]), vec![], true, 5, 1.0);
        let trace_id = trace.trace_id;
        reader.insert(trace);

        let controller = OnlineLearningController::new(scorer, reader);
        let event = TraceSavedEvent {
            trace_id,
            capability_id: Some(cap_id),
            success: true,
        };
        let signal = controller.handle_trace_saved(&event);
        assert!(signal.is_some());
        assert_eq!(controller.stats.events_trained.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn repeated_training_is_idempotent_in_shape() {
        let (scorer, cap_id) = scorer_with_capability();
        let reader = Arc::new(InMemoryTraceStore::new());
        let trace = ExecutionTrace::new(Some(cap_id), Some(vec![0.25, 0.25, 0.25, 0.25]), vec![], true, 5, 1.0);
        let trace_id = trace.trace_id;
        reader.insert(trace);

        let controller = OnlineLearningController::new(scorer, reader);
        let event = TraceSavedEvent {
            trace_id,
            capability_id: Some(cap_id),
            success: true,
        };
        let first = controller.handle_trace_saved(&event).unwrap();
        let second = controller.handle_trace_saved(&event).unwrap();
        assert!(first.loss.is_finite());
        assert!(second.loss.is_finite());
        assert_eq!(controller.stats.events_trained.load(Ordering::Relaxed), 2);
    }
}

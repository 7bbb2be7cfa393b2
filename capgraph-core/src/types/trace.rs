//! Execution trace — the unit of evidence the PER pipeline and the online
//! learner train on.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{CapabilityId, TraceId};
use super::member::Member;

/// Priority floor — invariant is `priority > 0` at all times.
pub const PRIORITY_EPSILON: f32 = 1e-6;

/// A completed (or partially completed) execution, as reported by the
/// external trace sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionTrace {
    pub trace_id: TraceId,
    pub capability_id: Option<CapabilityId>,
    /// Intent embedding at the time this trace was recorded, dimension D.
    pub intent_embedding: Option<Vec<f32>>,
    /// Ordered members actually invoked, before flattening.
    pub executed_path: Vec<Member>,
    pub success: bool,
    pub duration_ms: u64,
    /// Free-form task-level outcome payload (exact shape is owned by the
    /// collaborator that produced the trace; the core never interprets it).
    #[serde(default)]
    pub task_outcomes: serde_json::Value,
    priority: f32,
    pub parent_trace_id: Option<TraceId>,
    pub created_at: DateTime<Utc>,
}

impl ExecutionTrace {
    /// Construct a new trace with a valid priority (clamped to the
    /// epsilon floor).
    #[must_use]
    pub fn new(
        capability_id: Option<CapabilityId>,
        intent_embedding: Option<Vec<f32>>,
        executed_path: Vec<Member>,
        success: bool,
        duration_ms: u64,
        priority: f32,
    ) -> Self {
        Self {
            trace_id: TraceId::new(),
            capability_id,
            intent_embedding,
            executed_path,
            success,
            duration_ms,
            task_outcomes: serde_json::Value::Null,
            priority: priority.max(PRIORITY_EPSILON),
            parent_trace_id: None,
            created_at: Utc::now(),
        }
    }

    /// Current priority; always `>= PRIORITY_EPSILON`.
    #[must_use]
    pub fn priority(&self) -> f32 {
        self.priority
    }

    /// Replace the priority, clamping to the epsilon floor (invariant 4).
    pub fn set_priority(&mut self, priority: f32) {
        self.priority = if priority.is_finite() {
            priority.max(PRIORITY_EPSILON)
        } else {
            PRIORITY_EPSILON
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_never_drops_to_zero() {
        let mut trace = ExecutionTrace::new(None, None, vec![], true, 10, 1.0);
        trace.set_priority(0.0);
        assert!(trace.priority() >= PRIORITY_EPSILON);

        trace.set_priority(-5.0);
        assert!(trace.priority() >= PRIORITY_EPSILON);

        trace.set_priority(f32::NAN);
        assert!(trace.priority() >= PRIORITY_EPSILON);
    }

    #[test]
    fn constructor_clamps_non_positive_priority() {
        let trace = ExecutionTrace::new(None, None, vec![], true, 10, 0.0);
        assert!(trace.priority() >= PRIORITY_EPSILON);
    }
}

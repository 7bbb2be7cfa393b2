//! Suggestion Orchestrator — the one entry point that ties the scorer,
//! adaptive thresholds, and the pathfinder together into a single ranked
//! answer for an intent.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, instrument};

use crate::collaborators::Embedder;
use crate::error::Result;
use crate::graph::GraphBuilder;
use crate::pathfinder::{find_shortest_hyperpath, HyperpathResult};
use crate::scorer::{CapabilityMatch, FeatureContributions, ShgatScorer};
use crate::thresholds::AdaptiveThresholds;
use crate::types::{is_all_zero, CapabilityId, Member};

/// How the caller supplies the intent to score.
#[derive(Debug)]
pub enum IntentInput {
    /// Pre-computed embedding, dimension D.
    Embedding(Vec<f32>),
    /// Raw text, embedded via the configured [`Embedder`].
    Text(String),
}

/// One [`SuggestionOrchestrator::suggest`] call.
#[derive(Default)]
pub struct SuggestionRequest {
    pub excluded_capabilities: HashSet<CapabilityId>,
}

impl SuggestionRequest {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

/// Why a candidate did or didn't make it into the ranked list, as logged
/// per candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateDecision {
    Accepted,
    RejectedByThreshold,
    FilteredByPolicy,
}

#[derive(Debug, Clone)]
pub struct RankedSuggestion {
    pub capability_id: CapabilityId,
    pub score: f32,
    pub attribution: FeatureContributions,
}

/// Result of [`SuggestionOrchestrator::suggest`].
#[derive(Debug, Clone, Default)]
pub struct SuggestionResult {
    pub ranked: Vec<RankedSuggestion>,
    pub best: Option<RankedSuggestion>,
    pub path: Option<HyperpathResult>,
    pub confidence: f32,
}

const TOP_CANDIDATES_LOGGED: usize = 10;

/// Ties the scorer, adaptive thresholds, and pathfinder together behind a
/// single `suggest` call.
pub struct SuggestionOrchestrator {
    scorer: Arc<ShgatScorer>,
    graph: Arc<GraphBuilder>,
    thresholds: Arc<AdaptiveThresholds>,
    embedder: Option<Arc<dyn Embedder>>,
    pathfinder_enabled: bool,
}

impl SuggestionOrchestrator {
    #[must_use]
    pub fn new(
        scorer: Arc<ShgatScorer>,
        graph: Arc<GraphBuilder>,
        thresholds: Arc<AdaptiveThresholds>,
        embedder: Option<Arc<dyn Embedder>>,
        pathfinder_enabled: bool,
    ) -> Self {
        Self {
            scorer,
            graph,
            thresholds,
            embedder,
            pathfinder_enabled,
        }
    }

    /// Rank capabilities against an intent, validate the best match with
    /// DR-DSP when it spans multiple tools, and return the suggestion.
    #[instrument(skip(self, request))]
    pub async fn suggest(&self, intent: IntentInput, request: &SuggestionRequest) -> Result<SuggestionResult> {
        let embedding = match self.resolve_embedding(intent).await? {
            Some(embedding) => embedding,
            None => return Ok(SuggestionResult::default()),
        };

        let matches = self.scorer.score_all_capabilities(&embedding)?;
        let thresholds = self.thresholds.get_thresholds();

        let mut ranked = Vec::new();
        for (position, candidate) in matches.iter().enumerate() {
            let decision = self.classify(candidate, request, thresholds.explicit_threshold);
            if position < TOP_CANDIDATES_LOGGED {
                debug!(
                    mode = "active_search",
                    capability_id = %candidate.capability_id,
                    semantic = candidate.feature_contributions.semantic,
                    structure = candidate.feature_contributions.structure,
                    temporal = candidate.feature_contributions.temporal,
                    reliability = candidate.feature_contributions.reliability,
                    threshold = thresholds.explicit_threshold,
                    decision = ?decision,
                    "scored suggestion candidate"
                );
            }
            if decision == CandidateDecision::Accepted {
                ranked.push(RankedSuggestion {
                    capability_id: candidate.capability_id,
                    score: candidate.score,
                    attribution: candidate.feature_contributions,
                });
            }
        }

        let Some(mut best_index) = (!ranked.is_empty()).then_some(0) else {
            return Ok(SuggestionResult::default());
        };

        let path = self.validate_path(&mut ranked, &mut best_index);
        let best = ranked[best_index].clone();
        let confidence = best.score;

        Ok(SuggestionResult {
            ranked,
            best: Some(best),
            path,
            confidence,
        })
    }

    async fn resolve_embedding(&self, intent: IntentInput) -> Result<Option<Vec<f32>>> {
        let embedding = match intent {
            IntentInput::Embedding(embedding) => embedding,
            IntentInput::Text(text) => {
                let Some(embedder) = &self.embedder else {
                    return Ok(None);
                };
                match embedder.embed(&text).await {
                    Ok(embedding) => embedding,
                    Err(_) => return Ok(None),
                }
            }
        };
        if embedding.is_empty() || is_all_zero(&embedding) {
            return Ok(None);
        }
        Ok(Some(embedding))
    }

    fn classify(&self, candidate: &CapabilityMatch, request: &SuggestionRequest, explicit_threshold: f32) -> CandidateDecision {
        if request.excluded_capabilities.contains(&candidate.capability_id) {
            CandidateDecision::FilteredByPolicy
        } else if candidate.score >= explicit_threshold {
            CandidateDecision::Accepted
        } else {
            CandidateDecision::RejectedByThreshold
        }
    }

    /// Validate the current best candidate's path; demote and re-rank on
    /// failure. `best_index` is updated in place.
    fn validate_path(&self, ranked: &mut [RankedSuggestion], best_index: &mut usize) -> Option<HyperpathResult> {
        if !self.pathfinder_enabled {
            return None;
        }
        let best_capability_id = ranked[*best_index].capability_id;
        let Some(cap) = self.graph.get_capability(&best_capability_id) else {
            return None;
        };
        let tool_members: Vec<_> = cap.members.iter().filter_map(Member::as_tool).cloned().collect();
        if tool_members.len() < 2 {
            return None;
        }

        let source = tool_members.first().unwrap();
        let target = tool_members.last().unwrap();
        let result = find_shortest_hyperpath(&self.graph, source, target);
        debug!(
            capability_id = %best_capability_id,
            found = result.found,
            total_weight = result.total_weight,
            "validated suggestion path"
        );

        if result.found && result.total_weight.is_finite() {
            return Some(result);
        }

        ranked[*best_index].score *= 0.5;
        ranked.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        *best_index = 0;
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::CapabilityRegistration;
    use crate::scorer::ScorerCapabilityRegistration;
    use crate::types::{ScorerConfig, ThresholdConfig, ToolId};
    use async_trait::async_trait;

    struct FixedEmbedder(Vec<f32>);

    #[async_trait]
    impl Embedder for FixedEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Ok(self.0.clone())
        }
    }

    fn setup() -> (SuggestionOrchestrator, CapabilityId) {
        let graph = Arc::new(GraphBuilder::new());
        let scorer = Arc::new(ShgatScorer::new(ScorerConfig {
            intent_dim: 4,
            hidden_dim: 4,
            num_heads: 2,
            ..ScorerConfig::default()
        }));
        let thresholds = Arc::new(AdaptiveThresholds::new(
            ThresholdConfig {
                default_explicit_threshold: 0.0,
                ..ThresholdConfig::default()
            },
            vec![],
        ));

        let tool_a = ToolId::from("fs:read");
        let tool_b = ToolId::from("fs:write");
        graph.register_tool(tool_a.clone(), vec![0.1, 0.2, 0.3, 0.4], None).unwrap();
        graph.register_tool(tool_b.clone(), vec![0.15, 0.25, 0.3, 0.3], None).unwrap();
        scorer.register_tool(tool_a.clone(), vec![0.1, 0.2, 0.3, 0.4]).unwrap();
        scorer.register_tool(tool_b.clone(), vec![0.15, 0.25, 0.3, 0.3]).unwrap();

        let cap_id = CapabilityId::new();
        let members = vec![Member::Tool(tool_a.clone()), Member::Tool(tool_b.clone())];
        graph
            .register_capability(CapabilityRegistration {
                id: cap_id,
                embedding: vec![0.2, 0.1, 0.4, 0.3],
                members: members.clone(),
                hierarchy_level: 0,
                success_rate: Some(0.9),
                children: vec![],
                parents: vec![],
                fqdn: None,
                code_hash: None,
            })
            .unwrap();
        scorer
            .register_capability(ScorerCapabilityRegistration {
                id: cap_id,
                embedding: vec![0.2, 0.1, 0.4, 0.3],
                members,
                hierarchy_level: 0,
                success_rate: 0.9,
                children: vec![],
                last_used_at: None,
            })
            .unwrap();

        let orchestrator = SuggestionOrchestrator::new(scorer, graph, thresholds, None, true);
        (orchestrator, cap_id)
    }

    #[tokio::test]
    async fn empty_embedding_returns_no_suggestions() {
        let (orchestrator, _cap_id) = setup();
        let result = orchestrator
            .suggest(IntentInput::Embedding(vec![0.0, 0.0, 0.0, 0.0]), &SuggestionRequest::new())
            .await
            .unwrap();
        assert!(result.ranked.is_empty());
        assert!(result.best.is_none());
    }

    #[tokio::test]
    async fn text_intent_without_embedder_returns_empty() {
        let (orchestrator, _cap_id) = setup();
        let result = orchestrator
            .suggest(IntentInput::Text("do the thing".into()), &SuggestionRequest::new())
            .await
            .unwrap();
        assert!(result.ranked.is_empty());
    }

    #[tokio::test]
    async fn accepted_candidate_gets_a_validated_path() {
        let (orchestrator, cap_id) = setup();
        let result = orchestrator
            .suggest(IntentInput::Embedding(vec![0.2, 0.1, 0.4, 0.3]), &SuggestionRequest::new())
            .await
            .unwrap();
        assert!(!result.ranked.is_empty());
        let best = result.best.unwrap();
        assert_eq!(best.capability_id, cap_id);
        assert!(result.path.is_some());
    }

    #[tokio::test]
    async fn excluded_capability_is_filtered_by_policy() {
        let (orchestrator, cap_id) = setup();
        let mut request = SuggestionRequest::new();
        request.excluded_capabilities.insert(cap_id);
        let result = orchestrator
            .suggest(IntentInput::Embedding(vec![0.2, 0.1, 0.4, 0.3]), &request)
            .await
            .unwrap();
        assert!(result.ranked.is_empty());
    }

    #[tokio::test]
    async fn threshold_rejection_yields_no_best() {
        let graph = Arc::new(GraphBuilder::new());
        let scorer = Arc::new(ShgatScorer::new(ScorerConfig {
            intent_dim: 4,
            hidden_dim: 4,
            num_heads: 2,
            ..ScorerConfig::default()
        }));
        let thresholds = Arc::new(AdaptiveThresholds::new(
            ThresholdConfig {
                default_explicit_threshold: 0.99,
                ..ThresholdConfig::default()
            },
            vec![],
        ));
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
                success_rate: Some(0.1),
                children: vec![],
                parents: vec![],
                fqdn: None,
                code_hash: None,
            })
            .unwrap();
        scorer
            .register_capability(ScorerCapabilityRegistration {
                id: cap_id,
                embedding: vec![0.2, 0.1, 0.4, 0.3],
                members: vec![Member::Tool(tool)],
                hierarchy_level: 0,
                success_rate: 0.1,
                children: vec![],
                last_used_at: None,
            })
            .unwrap();

        let orchestrator = SuggestionOrchestrator::new(scorer, graph, thresholds, None, true);
        let result = orchestrator
            .suggest(IntentInput::Embedding(vec![0.2, 0.1, 0.4, 0.3]), &SuggestionRequest::new())
            .await
            .unwrap();
        assert!(result.ranked.is_empty());
        assert!(result.best.is_none());
    }
}

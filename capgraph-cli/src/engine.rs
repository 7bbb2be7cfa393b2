//! Wires the core's collaborator traits to a [`RedbStore`] and exposes the
//! handful of operations the CLI's subcommands drive.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use capgraph_core::collaborators::{ParameterCheckpointer, TraceSavedEvent, TraceSink};
use capgraph_core::episodic::{context_hash, EpisodicMemoryStore};
use capgraph_core::graph::{CapabilityRegistration, GraphBuilder};
use capgraph_core::orchestrator::{IntentInput, SuggestionOrchestrator, SuggestionRequest, SuggestionResult};
use capgraph_core::replay::{train_from_traces, TrainFromTracesResult};
use capgraph_core::scorer::{ScorerCapabilityRegistration, ShgatParams, ShgatScorer};
use capgraph_core::thresholds::AdaptiveThresholds;
use capgraph_core::types::{
    CoreConfig, EpisodicEvent, EventType, ExecutionTrace, Node, PerConfig, RetrievalContext, ToolId,
};
use capgraph_storage_redb::RedbStore;

pub struct Engine {
    pub graph: Arc<GraphBuilder>,
    pub scorer: Arc<ShgatScorer>,
    pub thresholds: Arc<AdaptiveThresholds>,
    pub orchestrator: SuggestionOrchestrator,
    pub store: Arc<RedbStore>,
    pub episodic: Arc<EpisodicMemoryStore<RedbStore>>,
    pub config: CoreConfig,
}

impl Engine {
    pub async fn open(db_path: &Path, config: CoreConfig) -> Result<Self> {
        let store = Arc::new(RedbStore::open(db_path).await.context("opening redb store")?);
        let graph = Arc::new(GraphBuilder::new());
        let scorer = Arc::new(ShgatScorer::new(config.scorer.clone()));

        let mut nodes = store.all_nodes().context("reading persisted nodes")?;
        // Tools first, then capabilities in ascending hierarchy order, so a
        // meta-capability's members are already registered when it loads.
        nodes.sort_by_key(|n| match n {
            Node::Tool(_) => (0, 0),
            Node::Capability(c) => (1, c.hierarchy_level),
        });
        for node in nodes {
            rehydrate_node(&graph, &scorer, node)?;
        }

        if let Some(bytes) = store.load().await.context("loading parameter checkpoint")? {
            let params: ShgatParams = serde_json::from_slice(&bytes).context("decoding parameter checkpoint")?;
            scorer.import_params(params);
        }

        let reference_tools: Vec<ToolId> = graph.get_tool_nodes().into_iter().map(|t| t.id).collect();
        let thresholds = Arc::new(AdaptiveThresholds::new(config.thresholds.clone(), reference_tools));
        let orchestrator = SuggestionOrchestrator::new(scorer.clone(), graph.clone(), thresholds.clone(), None, true);
        let episodic = EpisodicMemoryStore::new(store.clone(), config.episodic.clone());

        Ok(Self {
            graph,
            scorer,
            thresholds,
            orchestrator,
            store,
            episodic,
            config,
        })
    }

    pub fn register_tool(&self, id: ToolId, embedding: Vec<f32>, server: Option<String>) -> Result<()> {
        self.graph.register_tool(id.clone(), embedding.clone(), server.clone())?;
        self.scorer.register_tool(id.clone(), embedding.clone())?;
        let tool = self.graph.get_tool(&id).context("tool missing immediately after registration")?;
        self.store.upsert_node(&Node::Tool(tool))?;
        Ok(())
    }

    pub fn register_capability(&self, registration: CapabilityRegistration) -> Result<()> {
        let scorer_registration = ScorerCapabilityRegistration {
            id: registration.id,
            embedding: registration.embedding.clone(),
            members: registration.members.clone(),
            hierarchy_level: registration.hierarchy_level,
            success_rate: registration.success_rate.unwrap_or(0.5),
            children: registration.children.clone(),
            last_used_at: None,
        };
        self.graph.register_capability(registration.clone())?;
        self.scorer.register_capability(scorer_registration)?;
        let cap = self
            .graph
            .get_capability(&registration.id)
            .context("capability missing immediately after registration")?;
        self.store.upsert_node(&Node::Capability(cap))?;
        Ok(())
    }

    pub async fn suggest(&self, embedding: Vec<f32>) -> Result<SuggestionResult> {
        Ok(self
            .orchestrator
            .suggest(IntentInput::Embedding(embedding), &SuggestionRequest::new())
            .await?)
    }

    pub fn train(&self, overrides: PerConfigOverrides) -> Result<TrainFromTracesResult> {
        let per = overrides.apply(self.config.per.clone());
        Ok(train_from_traces(&self.scorer, &self.graph, self.store.as_ref(), self.store.as_ref(), &per)?)
    }

    pub async fn ingest_trace(&self, trace: ExecutionTrace) -> Result<()> {
        let capability_id = trace.capability_id;
        let success = trace.success;
        let trace_id = trace.trace_id;
        self.store.insert_trace(&trace)?;
        self.store
            .publish_saved(TraceSavedEvent {
                trace_id,
                capability_id,
                success,
            })
            .await?;
        Ok(())
    }

    pub fn capture_event(
        &self,
        workflow_id: uuid::Uuid,
        event_type: EventType,
        task_id: Option<String>,
        context: RetrievalContext,
        data: serde_json::Value,
    ) -> capgraph_core::types::EventId {
        let hash = context_hash(&context);
        let event = EpisodicEvent::new(capgraph_core::types::WorkflowId(workflow_id), event_type, hash, task_id, data);
        self.episodic.capture(event)
    }

    pub fn record_tool_outcome(&self, tool_id: &ToolId, success: bool) {
        self.thresholds.record_tool_outcome(tool_id, success);
    }

    pub fn export_params(&self) -> ShgatParams {
        self.scorer.export_params()
    }

    pub fn import_params(&self, params: ShgatParams) {
        self.scorer.import_params(params);
    }

    /// Drain the episodic buffer and persist the current parameter
    /// snapshot. A one-shot CLI invokes this once at the end of every
    /// command rather than on a signal handler.
    pub async fn shutdown(&self) -> Result<usize> {
        let flushed = self.episodic.flush().await?;
        let params = self.scorer.export_params();
        let bytes = serde_json::to_vec(&params).context("encoding parameter checkpoint")?;
        self.store.save(&bytes).await?;
        Ok(flushed)
    }
}

fn rehydrate_node(graph: &GraphBuilder, scorer: &ShgatScorer, node: Node) -> Result<()> {
    match node {
        Node::Tool(tool) => {
            graph.register_tool(tool.id.clone(), tool.embedding.clone(), tool.server.clone())?;
            scorer.register_tool(tool.id, tool.embedding)?;
        }
        Node::Capability(cap) => {
            let registration = CapabilityRegistration {
                id: cap.id,
                embedding: cap.embedding.clone(),
                members: cap.members.clone(),
                hierarchy_level: cap.hierarchy_level,
                success_rate: Some(cap.success_rate),
                children: cap.children.clone(),
                parents: cap.parents,
                fqdn: cap.fqdn,
                code_hash: cap.code_hash,
            };
            let scorer_registration = ScorerCapabilityRegistration {
                id: cap.id,
                embedding: cap.embedding,
                members: cap.members,
                hierarchy_level: cap.hierarchy_level,
                success_rate: cap.success_rate,
                children: cap.children,
                last_used_at: cap.last_used_at,
            };
            graph.register_capability(registration)?;
            scorer.register_capability(scorer_registration)?;
        }
    }
    Ok(())
}

/// CLI flag overrides layered onto the configured [`PerConfig`] defaults.
#[derive(Debug, Clone, Default)]
pub struct PerConfigOverrides {
    pub min_traces: Option<usize>,
    pub max_traces: Option<usize>,
    pub batch_size: Option<usize>,
    pub min_priority: Option<f32>,
    pub alpha: Option<f32>,
    pub epochs: Option<usize>,
}

impl PerConfigOverrides {
    fn apply(self, mut base: PerConfig) -> PerConfig {
        if let Some(v) = self.min_traces {
            base.min_traces = v;
        }
        if let Some(v) = self.max_traces {
            base.max_traces = v;
        }
        if let Some(v) = self.batch_size {
            base.batch_size = v;
        }
        if let Some(v) = self.min_priority {
            base.min_priority = v;
        }
        if let Some(v) = self.alpha {
            base.alpha = v;
        }
        if let Some(v) = self.epochs {
            base.epochs = v;
        }
        base
    }
}

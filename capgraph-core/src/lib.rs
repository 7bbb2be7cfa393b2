#![allow(clippy::cast_precision_loss)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_docs_in_private_items)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

//! # capgraph-core
//!
//! Procedural memory for tool-using agents: learns which tool/capability
//! combinations solve which intents by watching execution traces, and
//! ranks reusable capabilities against new intents.
//!
//! ## Core concepts
//!
//! - **Tools** are leaf actions; **capabilities** are learned, reusable
//!   hyperedges over tools and other capabilities ([`hypergraph`]).
//! - The [`graph`] module is the single-writer/many-readers node catalog.
//! - The [`scorer`] module (SHGAT) ranks capabilities against an intent
//!   embedding with per-feature attribution.
//! - The [`pathfinder`] module (DR-DSP) validates a ranked capability by
//!   finding the shortest hyperpath between its member tools.
//! - The [`replay`] module turns batches of [`types::ExecutionTrace`]
//!   into SHGAT training examples (prioritized replay, semi-hard
//!   negative mining); [`online`] does the same one trace at a time.
//! - [`thresholds`] derives the two global acceptance thresholds from
//!   per-tool Beta posteriors.
//! - [`episodic`] is a buffered, lossy-but-durable log of raw events,
//!   separate from the learned graph.
//! - [`orchestrator`] ties scoring, thresholds, and pathfinding together
//!   behind one `suggest` call.
//!
//! ## Collaborators
//!
//! This crate owns no storage engine and no embedding model. It depends
//! on narrow traits in [`collaborators`] (`Embedder`, `TraceReader`,
//! `TraceSink`, `PriorityWriter`, `ParameterCheckpointer`, ...); an
//! in-process default is provided for development and tests, and
//! `capgraph-storage-redb` supplies a persistent implementation.
//!
//! ## Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use capgraph_core::collaborators::InMemoryTraceStore;
//! use capgraph_core::graph::GraphBuilder;
//! use capgraph_core::orchestrator::{IntentInput, SuggestionOrchestrator, SuggestionRequest};
//! use capgraph_core::scorer::ShgatScorer;
//! use capgraph_core::thresholds::AdaptiveThresholds;
//! use capgraph_core::types::{CoreConfig, ThresholdConfig};
//!
//! # async fn example() -> capgraph_core::error::Result<()> {
//! let config = CoreConfig::default();
//! let graph = Arc::new(GraphBuilder::new());
//! let scorer = Arc::new(ShgatScorer::new(config.scorer.clone()));
//! let thresholds = Arc::new(AdaptiveThresholds::new(ThresholdConfig::default(), vec![]));
//! let _traces = InMemoryTraceStore::new();
//!
//! let orchestrator = SuggestionOrchestrator::new(scorer, graph, thresholds, None, true);
//! let suggestion = orchestrator
//!     .suggest(IntentInput::Embedding(vec![0.1; config.scorer.intent_dim]), &SuggestionRequest::new())
//!     .await?;
//! println!("confidence: {}", suggestion.confidence);
//! # Ok(())
//! # }
//! ```

pub mod collaborators;
pub mod episodic;
pub mod error;
pub mod graph;
pub mod hypergraph;
pub mod online;
pub mod orchestrator;
pub mod pathfinder;
pub mod replay;
pub mod scorer;
pub mod thresholds;
pub mod types;

pub use collaborators::{Embedder, InMemoryTraceStore, TraceReader, TraceSink};
pub use episodic::{EpisodicEventSink, EpisodicMemoryStore, InMemoryEventSink, RetrieveOptions};
pub use error::{Error, Result};
pub use graph::{CapabilityRegistration, GraphBuilder};
pub use hypergraph::{flatten_capability_members, flatten_executed_path, Hyperedge, TraceLookup};
pub use online::{LearningTrainedSignal, OnlineLearningController, OnlineLearningStats};
pub use orchestrator::{CandidateDecision, IntentInput, SuggestionOrchestrator, SuggestionRequest, SuggestionResult};
pub use pathfinder::{find_shortest_hyperpath, HyperpathResult, PathNode};
pub use replay::{train_from_traces, TrainFromTracesResult};
pub use scorer::{CapabilityMatch, FeatureContributions, ShgatScorer, TrainingExample};
pub use thresholds::{AdaptiveThresholds, Thresholds};
pub use types::{CapabilityId, CoreConfig, EventId, ExecutionTrace, Member, Node, ToolId, TraceId};

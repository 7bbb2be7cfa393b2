use std::path::PathBuf;

use anyhow::{Context, Result};
use capgraph_cli::config::{default_data_dir, load_config};
use capgraph_cli::engine::{Engine, PerConfigOverrides};
use capgraph_cli::output::OutputFormat;
use capgraph_core::graph::CapabilityRegistration;
use capgraph_core::types::{CapabilityId, EventType, ExecutionTrace, Member, RetrievalContext, ToolId};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "capgraph")]
#[command(about = "Procedural memory core for tool-using agents")]
#[command(version, long_about = None)]
struct Cli {
    /// TOML configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Database directory (defaults to the platform data dir)
    #[arg(long, value_name = "DIR")]
    data_dir: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Human)]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a tool node.
    RegisterTool {
        /// Namespaced id, `server:tool`.
        #[arg(long)]
        id: String,
        /// Embedding vector as a JSON array of floats.
        #[arg(long)]
        embedding: String,
        #[arg(long)]
        server: Option<String>,
    },
    /// Register or re-observe a capability node.
    RegisterCapability {
        /// Existing capability id (UUID); a fresh one is generated if omitted.
        #[arg(long)]
        id: Option<Uuid>,
        #[arg(long)]
        embedding: String,
        /// JSON array of members, e.g. `[{"Tool":"fs:read"},{"Capability":"..."}]`.
        #[arg(long)]
        members: String,
        #[arg(long, default_value_t = 0)]
        hierarchy_level: u32,
        #[arg(long)]
        success_rate: Option<f32>,
    },
    /// Rank capabilities against an intent embedding and validate the best
    /// match's path.
    Suggest {
        /// Intent embedding as a JSON array of floats.
        #[arg(long)]
        embedding: String,
    },
    /// Append a completed execution trace and emit `execution.trace.saved`.
    IngestTrace {
        #[arg(long)]
        capability_id: Option<Uuid>,
        /// JSON array of floats, omit for an untargeted trace.
        #[arg(long)]
        intent_embedding: Option<String>,
        /// JSON array of members actually invoked.
        #[arg(long)]
        executed_path: String,
        #[arg(long, action = clap::ArgAction::Set)]
        success: bool,
        #[arg(long)]
        duration_ms: u64,
        #[arg(long, default_value_t = 1.0)]
        priority: f32,
    },
    /// Run one pass of sample → flatten → mine negatives → train → rewrite
    /// priorities over stored traces.
    Train {
        #[arg(long)]
        min_traces: Option<usize>,
        #[arg(long)]
        max_traces: Option<usize>,
        #[arg(long)]
        batch_size: Option<usize>,
        #[arg(long)]
        min_priority: Option<f32>,
        #[arg(long)]
        alpha: Option<f32>,
        #[arg(long)]
        epochs: Option<usize>,
    },
    /// Buffer an episodic event for later retrieval.
    CaptureEvent {
        #[arg(long)]
        workflow_id: Uuid,
        #[arg(long, value_enum)]
        event_type: CliEventType,
        #[arg(long)]
        task_id: Option<String>,
        #[arg(long)]
        workflow_type: Option<String>,
        #[arg(long)]
        domain: Option<String>,
        #[arg(long)]
        complexity: Option<String>,
        /// Opaque payload as a JSON value.
        #[arg(long, default_value = "null")]
        data: String,
    },
    /// Record a tool-level success/failure outcome against the adaptive
    /// threshold posteriors.
    RecordOutcome {
        #[arg(long)]
        tool_id: String,
        #[arg(long, action = clap::ArgAction::Set)]
        success: bool,
    },
    /// Write the current SHGAT parameter snapshot to a file.
    ExportParams {
        #[arg(long, value_name = "FILE")]
        out: PathBuf,
    },
    /// Load a SHGAT parameter snapshot from a file and make it current.
    ImportParams {
        #[arg(long, value_name = "FILE")]
        file: PathBuf,
    },
    /// Flush buffered episodic events and persist the parameter checkpoint.
    Shutdown,
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum CliEventType {
    SpeculationStart,
    TaskComplete,
    AilDecision,
    HilDecision,
    WorkflowStart,
    WorkflowComplete,
}

impl From<CliEventType> for EventType {
    fn from(value: CliEventType) -> Self {
        match value {
            CliEventType::SpeculationStart => EventType::SpeculationStart,
            CliEventType::TaskComplete => EventType::TaskComplete,
            CliEventType::AilDecision => EventType::AilDecision,
            CliEventType::HilDecision => EventType::HilDecision,
            CliEventType::WorkflowStart => EventType::WorkflowStart,
            CliEventType::WorkflowComplete => EventType::WorkflowComplete,
        }
    }
}

#[derive(Serialize)]
#[serde(untagged)]
enum Reply {
    Message(String),
    Json(serde_json::Value),
}

impl capgraph_cli::output::Output for Reply {
    fn write_human(&self) -> String {
        match self {
            Reply::Message(text) => text.clone(),
            Reply::Json(value) => serde_json::to_string_pretty(value).unwrap_or_default(),
        }
    }
}

fn parse_embedding(raw: &str) -> Result<Vec<f32>> {
    serde_json::from_str(raw).context("parsing embedding as a JSON array of floats")
}

fn parse_members(raw: &str) -> Result<Vec<Member>> {
    serde_json::from_str(raw).context("parsing members as a JSON array")
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    let data_dir = cli.data_dir.unwrap_or_else(default_data_dir);
    std::fs::create_dir_all(&data_dir).with_context(|| format!("creating data directory {}", data_dir.display()))?;
    let db_path = data_dir.join("capgraph.redb");
    let engine = Engine::open(&db_path, config).await?;

    let reply = dispatch(&engine, cli.command).await?;
    engine.shutdown().await?;

    use capgraph_cli::output::Output;
    println!("{}", reply.write(cli.format)?);
    Ok(())
}

async fn dispatch(engine: &Engine, command: Commands) -> Result<Reply> {
    match command {
        Commands::RegisterTool { id, embedding, server } => {
            let embedding = parse_embedding(&embedding)?;
            engine.register_tool(ToolId::from(id.as_str()), embedding, server)?;
            Ok(Reply::Message(format!("registered tool {id}")))
        }
        Commands::RegisterCapability {
            id,
            embedding,
            members,
            hierarchy_level,
            success_rate,
        } => {
            let embedding = parse_embedding(&embedding)?;
            let members = parse_members(&members)?;
            let id = CapabilityId(id.unwrap_or_else(Uuid::new_v4));
            engine.register_capability(CapabilityRegistration {
                id,
                embedding,
                members,
                hierarchy_level,
                success_rate,
                children: vec![],
                parents: vec![],
                fqdn: None,
                code_hash: None,
            })?;
            Ok(Reply::Message(format!("registered capability {}", id.0)))
        }
        Commands::Suggest { embedding } => {
            let embedding = parse_embedding(&embedding)?;
            let result = engine.suggest(embedding).await?;
            Ok(Reply::Json(serde_json::json!({
                "best": result.best.map(|b| serde_json::json!({
                    "capability_id": b.capability_id.0,
                    "score": b.score,
                })),
                "ranked_count": result.ranked.len(),
                "confidence": result.confidence,
                "path_found": result.path.as_ref().map(|p| p.found),
            })))
        }
        Commands::IngestTrace {
            capability_id,
            intent_embedding,
            executed_path,
            success,
            duration_ms,
            priority,
        } => {
            let intent_embedding = intent_embedding.as_deref().map(parse_embedding).transpose()?;
            let executed_path = parse_members(&executed_path)?;
            let trace = ExecutionTrace::new(
                capability_id.map(CapabilityId),
                intent_embedding,
                executed_path,
                success,
                duration_ms,
                priority,
            );
            let trace_id = trace.trace_id;
            engine.ingest_trace(trace).await?;
            Ok(Reply::Message(format!("ingested trace {}", trace_id.0)))
        }
        Commands::Train {
            min_traces,
            max_traces,
            batch_size,
            min_priority,
            alpha,
            epochs,
        } => {
            let result = engine.train(PerConfigOverrides {
                min_traces,
                max_traces,
                batch_size,
                min_priority,
                alpha,
                epochs,
            })?;
            Ok(Reply::Json(serde_json::json!({
                "loss": result.loss,
                "accuracy": result.accuracy,
                "traces_processed": result.traces_processed,
                "examples_generated": result.examples_generated,
                "priorities_updated": result.priorities_updated,
                "fallback": result.fallback,
            })))
        }
        Commands::CaptureEvent {
            workflow_id,
            event_type,
            task_id,
            workflow_type,
            domain,
            complexity,
            data,
        } => {
            let data: serde_json::Value = serde_json::from_str(&data).context("parsing event data as JSON")?;
            let context = RetrievalContext::new(workflow_type, domain, complexity);
            let event_id = engine.capture_event(workflow_id, event_type.into(), task_id, context, data);
            Ok(Reply::Message(format!("captured event {}", event_id.0)))
        }
        Commands::RecordOutcome { tool_id, success } => {
            engine.record_tool_outcome(&ToolId::from(tool_id.as_str()), success);
            Ok(Reply::Message(format!("recorded outcome for {tool_id}: success={success}")))
        }
        Commands::ExportParams { out } => {
            let params = engine.export_params();
            let bytes = serde_json::to_vec_pretty(&params).context("encoding parameters")?;
            std::fs::write(&out, bytes).with_context(|| format!("writing {}", out.display()))?;
            Ok(Reply::Message(format!("exported parameters to {}", out.display())))
        }
        Commands::ImportParams { file } => {
            let bytes = std::fs::read(&file).with_context(|| format!("reading {}", file.display()))?;
            let params = serde_json::from_slice(&bytes).context("decoding parameters")?;
            engine.import_params(params);
            Ok(Reply::Message(format!("imported parameters from {}", file.display())))
        }
        Commands::Shutdown => Ok(Reply::Message("shutdown requested".to_string())),
    }
}

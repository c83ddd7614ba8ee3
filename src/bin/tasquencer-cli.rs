//! `tasquencer-cli`: a thin `clap` wrapper translating subcommands into
//! [`tasquencer::Engine`] public operations (§6.B). Mirrors the teacher's
//! `knhk-workflow` binary: one subcommand per engine operation, JSON in,
//! JSON (or a short summary line) out.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tasquencer::config::EngineConfig;
use tasquencer::ids::WorkflowId;
use tasquencer::model::DefinitionRegistry;
use tasquencer::storage::Storage;
use tasquencer::Engine;

#[derive(Parser)]
#[command(name = "tasquencer-cli", about = "Drive a Tasquencer workflow engine instance")]
struct Cli {
    /// `memory` or `sled:<path>`.
    #[arg(long, default_value = "memory")]
    store: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Initialize a root workflow instance.
    Init {
        workflow_name: String,
        #[arg(long, default_value = "v1")]
        version: String,
        #[arg(long)]
        payload: Option<String>,
    },
    StartItem {
        work_item_id: String,
        #[arg(long)]
        payload: Option<String>,
    },
    CompleteItem {
        work_item_id: String,
        #[arg(long)]
        payload: Option<String>,
    },
    FailItem {
        work_item_id: String,
        #[arg(long)]
        payload: Option<String>,
    },
    CancelItem {
        work_item_id: String,
        #[arg(long)]
        payload: Option<String>,
    },
    ResetItem {
        work_item_id: String,
        #[arg(long)]
        payload: Option<String>,
    },
    CancelWorkflow {
        workflow_id: String,
    },
    /// Print a workflow's tasks and conditions.
    Show {
        workflow_id: String,
    },
    /// Print the audit trace captured for a workflow's most recent step.
    Trace {
        trace_id: String,
    },
}

fn parse_payload(raw: Option<String>) -> Result<Option<Value>> {
    raw.map(|s| serde_json::from_str(&s).context("payload must be valid JSON")).transpose()
}

async fn build_storage(spec: &str) -> Result<Arc<dyn Storage>> {
    if let Some(path) = spec.strip_prefix("sled:") {
        #[cfg(feature = "sled-store")]
        {
            let store = tasquencer::storage::SledStore::open(path).context("opening sled store")?;
            return Ok(Arc::new(store));
        }
        #[cfg(not(feature = "sled-store"))]
        {
            anyhow::bail!("sled store requested ({path}) but the sled-store feature is disabled");
        }
    }
    Ok(Arc::new(tasquencer::storage::MemoryStore::new()))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let storage = build_storage(&cli.store).await?;

    let mut registry = DefinitionRegistry::new();
    tasquencer::demo::register_demo_workflows(&mut registry);

    let engine = Engine::new(storage, registry, EngineConfig::from_env());

    match cli.command {
        Command::Init { workflow_name, version, payload } => {
            let id = engine.initialize_root_workflow(&workflow_name, &version, parse_payload(payload)?).await?;
            println!("{id}");
        }
        Command::StartItem { work_item_id, payload } => {
            let id = parse_work_item_id(&work_item_id)?;
            engine.start_work_item(id, parse_payload(payload)?).await?;
        }
        Command::CompleteItem { work_item_id, payload } => {
            let id = parse_work_item_id(&work_item_id)?;
            engine.complete_work_item(id, parse_payload(payload)?).await?;
        }
        Command::FailItem { work_item_id, payload } => {
            let id = parse_work_item_id(&work_item_id)?;
            engine.fail_work_item(id, parse_payload(payload)?).await?;
        }
        Command::CancelItem { work_item_id, payload } => {
            let id = parse_work_item_id(&work_item_id)?;
            engine.cancel_work_item(id, parse_payload(payload)?).await?;
        }
        Command::ResetItem { work_item_id, payload } => {
            let id = parse_work_item_id(&work_item_id)?;
            engine.reset_work_item(id, parse_payload(payload)?).await?;
        }
        Command::CancelWorkflow { workflow_id } => {
            let id = WorkflowId::parse_str(&workflow_id)?;
            engine.cancel_workflow(id, None).await?;
        }
        Command::Show { workflow_id } => {
            let id = WorkflowId::parse_str(&workflow_id)?;
            let workflow = engine.get_workflow_by_id(id).await?.context("workflow not found")?;
            let tasks = engine.get_workflow_tasks(id).await?;
            let conditions = engine.get_workflow_conditions(id).await?;
            println!("{}", serde_json::to_string_pretty(&serde_json::json!({
                "workflow": {"name": workflow.name, "state": workflow.state, "version": workflow.version_name},
                "tasks": tasks.iter().map(|t| serde_json::json!({"name": t.name, "state": t.state, "generation": t.generation})).collect::<Vec<_>>(),
                "conditions": conditions.iter().map(|c| serde_json::json!({"name": c.name, "marking": c.marking})).collect::<Vec<_>>(),
            }))?);
        }
        Command::Trace { trace_id } => {
            let id = tasquencer::ids::TraceId::parse_str(&trace_id)?;
            let spans = engine.get_trace_spans(id).await?;
            for span in spans {
                println!("{:>3} {:<24} {:?}", span.sequence_number, span.operation, span.state);
            }
        }
    }

    Ok(())
}

fn parse_work_item_id(raw: &str) -> Result<tasquencer::ids::WorkItemId> {
    tasquencer::ids::WorkItemId::parse_str(raw).map_err(Into::into)
}

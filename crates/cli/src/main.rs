//! `graphflow` CLI entry-point.
//!
//! Available sub-commands:
//! - `validate`: load a graph and print the load report.
//! - `run`: execute a graph with the built-in node types.
//! - `resume`: resume an interrupted task recorded in a SQLite database.
//! - `history`: print recorded executions or one execution's tasks.
//! - `migrate`: apply the recorder schema to a SQLite database.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use serde_json::{Map, Value};
use tracing::info;
use tracing_subscriber::EnvFilter;

use engine::{ExecuteRequest, FlowConfig, FlowModel, ResumeRequest};
use nodes::builtin::register_builtins;
use nodes::NodeRegistry;
use recorder::{Recorder, SqliteRecorder};

#[derive(Parser)]
#[command(name = "graphflow", about = "Graph-driven workflow execution", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Load a graph JSON file and report dropped nodes and dangling edges.
    Validate {
        path: PathBuf,
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Execute a graph until it completes, interrupts or fails.
    Run {
        path: PathBuf,
        /// TOML flow configuration.
        #[arg(long)]
        config: Option<PathBuf>,
        /// JSON object merged over the configured global data.
        #[arg(long)]
        global_data: Option<String>,
        /// Start from this node instead of the start nodes.
        #[arg(long)]
        node_id: Option<String>,
        #[arg(long)]
        execution_id: Option<String>,
        /// JSON handed to the seed activations.
        #[arg(long)]
        data: Option<String>,
        /// SQLite URL for a durable recorder, e.g. `sqlite://graphflow.db`.
        #[arg(long, env = "GRAPHFLOW_DB")]
        db: Option<String>,
    },
    /// Resume an interrupted task.
    Resume {
        path: PathBuf,
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long)]
        execution_id: String,
        #[arg(long)]
        task_id: String,
        #[arg(long)]
        node_id: String,
        /// JSON handed to the node's resume logic.
        #[arg(long)]
        data: Option<String>,
        #[arg(long, env = "GRAPHFLOW_DB")]
        db: String,
    },
    /// Print recorded executions, or the records of one execution.
    History {
        #[arg(long, env = "GRAPHFLOW_DB")]
        db: String,
        #[arg(long)]
        execution_id: Option<String>,
    },
    /// Apply the recorder schema.
    Migrate {
        #[arg(long, env = "GRAPHFLOW_DB")]
        database_url: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("cli=info,engine=info,recorder=info,warn")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Validate { path, config } => {
            let config = load_config(config.as_deref())?;
            let model = FlowModel::builder(builtin_registry()).config(config).build();
            let report = model.load_json(&read_graph(&path)?)?;
            let graph = model.graph().context("graph was not installed")?;

            print_json(&serde_json::json!({
                "nodes": graph.len(),
                "startNodes": graph.start_nodes(),
                "report": report,
            }))?;
            if graph.start_nodes().is_empty() {
                bail!("graph has no start node");
            }
        }
        Command::Run { path, config, global_data, node_id, execution_id, data, db } => {
            let mut config = load_config(config.as_deref())?;
            if let Some(raw) = global_data {
                config.global_data.extend(parse_object(&raw, "--global-data")?);
            }
            let model = build_model(config, db.as_deref()).await?;
            model.load_json(&read_graph(&path)?)?;

            let request = ExecuteRequest {
                execution_id,
                node_id,
                data: data.map(|raw| parse_json(&raw, "--data")).transpose()?,
            };
            let result = model.execute(request).await?;
            let records = model.execution_records(&result.execution_id).await?;
            print_json(&serde_json::json!({ "result": result, "records": records }))?;
        }
        Command::Resume { path, config, execution_id, task_id, node_id, data, db } => {
            let config = load_config(config.as_deref())?;
            let model = build_model(config, Some(&db)).await?;
            model.load_json(&read_graph(&path)?)?;

            let mut request = ResumeRequest::new(execution_id, task_id, node_id);
            if let Some(raw) = data {
                request = request.data(parse_json(&raw, "--data")?);
            }
            let result = model.resume(request).await?;
            let records = model.execution_records(&result.execution_id).await?;
            print_json(&serde_json::json!({ "result": result, "records": records }))?;
        }
        Command::History { db, execution_id } => {
            let recorder = SqliteRecorder::connect(&db, recorder::DEFAULT_MAX_EXECUTIONS).await?;
            match execution_id {
                Some(id) => print_json(&recorder.get_execution_records(&id).await?)?,
                None => print_json(&recorder.get_executions().await?)?,
            }
        }
        Command::Migrate { database_url } => {
            info!("Running recorder migrations");
            let pool = recorder::sqlite::create_pool(&database_url, 1).await?;
            recorder::sqlite::run_migrations(&pool).await?;
            info!("Migrations applied successfully");
        }
    }

    Ok(())
}

fn builtin_registry() -> NodeRegistry {
    let mut registry = NodeRegistry::new();
    register_builtins(&mut registry);
    registry
}

async fn build_model(config: FlowConfig, db: Option<&str>) -> anyhow::Result<FlowModel> {
    let builder = FlowModel::builder(builtin_registry());
    let builder = match db {
        Some(url) => {
            let recorder = SqliteRecorder::connect(url, config.max_executions)
                .await
                .with_context(|| format!("cannot open recorder database {url}"))?;
            builder.recorder(Arc::new(recorder))
        }
        None => builder,
    };
    Ok(builder.config(config).build())
}

fn load_config(path: Option<&Path>) -> anyhow::Result<FlowConfig> {
    match path {
        Some(path) => Ok(FlowConfig::load(path)?),
        None => Ok(FlowConfig::default()),
    }
}

fn read_graph(path: &Path) -> anyhow::Result<String> {
    std::fs::read_to_string(path)
        .with_context(|| format!("cannot read graph file {}", path.display()))
}

fn parse_json(raw: &str, flag: &str) -> anyhow::Result<Value> {
    serde_json::from_str(raw).with_context(|| format!("{flag} is not valid JSON"))
}

fn parse_object(raw: &str, flag: &str) -> anyhow::Result<Map<String, Value>> {
    match parse_json(raw, flag)? {
        Value::Object(map) => Ok(map),
        other => bail!("{flag} must be a JSON object, got {other}"),
    }
}

fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

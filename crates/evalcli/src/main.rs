use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use evalcore::{
    ExecutionEvent, FlowEdge, FlowExecutionResult, FlowNode, FlowRequest, FlowStatus, LogLevel,
    Map, NodeEvent, NodeType, Value,
};
use evalruntime::{
    ActionRegistry, FileSnapshotStore, FlowRuntime, ReviewDecision, RuntimeConfig,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "evalflow")]
#[command(about = "Evaluation flow engine CLI", long_about = None)]
struct Cli {
    /// Show verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a flow file
    Run {
        /// Path to flow JSON file
        #[arg(short, long)]
        file: PathBuf,

        /// Params as a JSON object, merged over the file's params
        #[arg(short, long)]
        params: Option<String>,

        /// Where runs paused for review are stored
        #[arg(long, default_value = ".evalflow/snapshots")]
        snapshot_dir: PathBuf,

        /// Per-node timeout in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
    },

    /// Continue a run paused at a review gate
    Resume {
        /// Execution id printed when the run paused
        execution_id: uuid::Uuid,

        /// Reject the goldens instead of approving them
        #[arg(long)]
        reject: bool,

        #[arg(long)]
        reviewer: Option<String>,

        #[arg(long)]
        comment: Option<String>,

        /// Edited goldens as JSON
        #[arg(long)]
        goldens: Option<String>,

        #[arg(long, default_value = ".evalflow/snapshots")]
        snapshot_dir: PathBuf,
    },

    /// Validate a flow file and print its execution order
    Validate {
        /// Path to flow JSON file
        file: PathBuf,
    },

    /// List available actions
    Actions {
        /// Only actions for this node type, e.g. ACTION or FILE_UPLOAD
        #[arg(long)]
        node_type: Option<NodeType>,
    },

    /// List flow templates in a directory
    Templates {
        #[arg(default_value = "templates")]
        dir: PathBuf,
    },

    /// Create a new example flow
    Init {
        /// Output file path
        #[arg(short, long, default_value = "flow.json")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    match cli.command {
        Commands::Run {
            file,
            params,
            snapshot_dir,
            timeout_ms,
        } => run_flow(file, params, snapshot_dir, timeout_ms, cli.verbose).await,

        Commands::Resume {
            execution_id,
            reject,
            reviewer,
            comment,
            goldens,
            snapshot_dir,
        } => {
            let goldens = goldens
                .map(|g| serde_json::from_str::<serde_json::Value>(&g).map(Value::from))
                .transpose()
                .context("--goldens must be valid JSON")?;
            let decision = ReviewDecision {
                approved: !reject,
                reviewer,
                comment,
                goldens,
            };
            resume_flow(execution_id, decision, snapshot_dir, cli.verbose).await
        }

        Commands::Validate { file } => validate_flow(&file),

        Commands::Actions { node_type } => {
            list_actions(node_type);
            Ok(())
        }

        Commands::Templates { dir } => list_templates(&dir).await,

        Commands::Init { output } => create_example_flow(output),
    }
}

fn standard_registry() -> Result<ActionRegistry> {
    let mut builder = ActionRegistry::builder();
    evalactions::register_all(&mut builder)?;
    Ok(builder.build())
}

fn build_runtime(snapshot_dir: PathBuf, timeout_ms: Option<u64>) -> Result<FlowRuntime> {
    let mut config = RuntimeConfig::default();
    if let Some(ms) = timeout_ms {
        config.defaults.node_timeout_ms = ms;
    }
    Ok(FlowRuntime::with_snapshot_store(
        Arc::new(standard_registry()?),
        config,
        Arc::new(FileSnapshotStore::new(snapshot_dir)),
    ))
}

fn load_request(file: &Path) -> Result<FlowRequest> {
    let json = std::fs::read_to_string(file)
        .with_context(|| format!("cannot read {}", file.display()))?;
    serde_json::from_str(&json).with_context(|| format!("{} is not a valid flow", file.display()))
}

fn parse_params(raw: &str) -> Result<Map> {
    match Value::from(serde_json::from_str::<serde_json::Value>(raw)?) {
        Value::Object(map) => Ok(map),
        _ => bail!("Params must be a JSON object"),
    }
}

async fn run_flow(
    file: PathBuf,
    params: Option<String>,
    snapshot_dir: PathBuf,
    timeout_ms: Option<u64>,
    verbose: bool,
) -> Result<()> {
    println!("🚀 Loading flow from: {}", file.display());

    let mut request = load_request(&file)?;
    if let Some(raw) = params {
        request.params.extend(parse_params(&raw)?);
    }
    if let (Some(ms), Some(settings)) = (timeout_ms, request.settings.as_mut()) {
        settings.node_timeout_ms = ms;
    }

    println!("   Nodes: {}", request.nodes.len());
    println!("   Edges: {}", request.edges.len());
    println!();

    let runtime = build_runtime(snapshot_dir, timeout_ms)?;
    let cancel = cancel_on_ctrl_c();
    let events = spawn_event_printer(&runtime, verbose);

    let result = runtime.execute_flow_with_cancel(request, cancel).await?;

    // let the printer drain
    tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    events.abort();

    report(&result, verbose)
}

async fn resume_flow(
    execution_id: uuid::Uuid,
    decision: ReviewDecision,
    snapshot_dir: PathBuf,
    verbose: bool,
) -> Result<()> {
    println!(
        "🔁 Resuming {} ({})",
        execution_id,
        if decision.approved { "approved" } else { "rejected" }
    );

    let runtime = build_runtime(snapshot_dir, None)?;
    let cancel = cancel_on_ctrl_c();
    let events = spawn_event_printer(&runtime, verbose);

    let result = runtime
        .resume_with_cancel(execution_id, decision, cancel)
        .await?;

    tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    events.abort();

    report(&result, verbose)
}

fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            println!("🛑 Cancelling...");
            trigger.cancel();
        }
    });
    token
}

fn spawn_event_printer(runtime: &FlowRuntime, verbose: bool) -> tokio::task::JoinHandle<()> {
    let mut events = runtime.subscribe_events();

    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                ExecutionEvent::FlowStarted { node_count, .. } => {
                    println!("▶️  Flow started ({} nodes)", node_count);
                }
                ExecutionEvent::NodeStarted { node_id, node_type, .. } => {
                    println!("  ⚡ Starting node: {} ({})", node_id, node_type);
                }
                ExecutionEvent::NodeCompleted { node_id, duration_ms, .. } => {
                    println!("  ✅ Node {} completed in {}ms", node_id, duration_ms);
                }
                ExecutionEvent::NodeFailed { node_id, error, .. } => {
                    println!("  ❌ Node {} failed: {}", node_id, error);
                }
                ExecutionEvent::NodeSkipped { node_id, reason, .. } => {
                    println!("  ⏭️  Node {} skipped: {}", node_id, reason);
                }
                ExecutionEvent::NodeEvent { node_id, event, .. } => match event {
                    NodeEvent::Log { level, message } => match level {
                        LogLevel::Warn | LogLevel::Error => {
                            println!("     ⚠️  [{}] {}", node_id, message)
                        }
                        LogLevel::Debug if !verbose => {}
                        _ => println!("     ℹ️  [{}] {}", node_id, message),
                    },
                    NodeEvent::Progress { percent, message } => match message {
                        Some(msg) => println!("     📊 [{}] {}% - {}", node_id, percent, msg),
                        None => println!("     📊 [{}] {}%", node_id, percent),
                    },
                    NodeEvent::Data { port, .. } if verbose => {
                        println!("     📦 [{}] data on '{}'", node_id, port);
                    }
                    NodeEvent::Data { .. } => {}
                },
                ExecutionEvent::FlowSuspended { node_id, .. } => {
                    println!("⏸️  Waiting for review at {}", node_id);
                }
                ExecutionEvent::FlowFinished {
                    status, duration_ms, ..
                } => match status {
                    FlowStatus::Completed => {
                        println!("✨ Flow completed successfully in {}ms", duration_ms)
                    }
                    other => println!("💥 Flow {} after {}ms", other, duration_ms),
                },
            }
        }
    })
}

fn report(result: &FlowExecutionResult, verbose: bool) -> Result<()> {
    println!();
    println!("📊 Execution Summary:");
    println!("   Execution ID: {}", result.execution_id);
    println!("   Status: {}", result.status);
    println!("   Executed: {}", result.executed_nodes.join(" → "));

    let failed = result.failed_nodes();
    if !failed.is_empty() {
        println!();
        println!("❌ Failed nodes:");
        for node_id in &failed {
            let error = result.results[*node_id].error.as_deref().unwrap_or_default();
            println!("   {}: {}", node_id, error);
        }
    }

    if verbose {
        println!();
        println!("📤 Outputs:");
        for node_id in &result.executed_nodes {
            if let Some(output) = result.output_of(node_id).filter(|o| !o.is_empty()) {
                println!("   Node {}:", node_id);
                let json = serde_json::to_string_pretty(&Value::Object(output.clone()).to_json())?;
                for line in json.lines() {
                    println!("     {}", line);
                }
            }
        }
    }

    match result.status {
        FlowStatus::Suspended => {
            println!();
            println!(
                "Approve with:\n  evalflow resume {}\nor reject with:\n  evalflow resume {} --reject --comment \"...\"",
                result.execution_id, result.execution_id
            );
            Ok(())
        }
        FlowStatus::Completed => Ok(()),
        other => bail!("flow {}", other),
    }
}

fn validate_flow(file: &Path) -> Result<()> {
    println!("🔍 Validating flow: {}", file.display());

    let request = load_request(file)?;
    let order = evalruntime::validate(&request.nodes, &request.edges)?
        .order()
        .to_vec();
    let registry = standard_registry()?;

    println!("✅ Flow is valid:");
    println!("   Nodes: {}", request.nodes.len());
    println!("   Edges: {}", request.edges.len());
    println!("   Order: {}", order.join(" → "));

    for node in request.nodes.iter().filter(|n| n.node_type.dispatches_action()) {
        match node.action_id() {
            Some(id) if registry.definition(id).is_none() => {
                println!("   ⚠️  {} uses unknown action '{}'", node.id, id)
            }
            None => println!("   ⚠️  {} has no actionId", node.id),
            _ => {}
        }
    }

    Ok(())
}

fn list_actions(node_type: Option<NodeType>) {
    println!("📦 Available Actions:");
    println!();

    let registry = match standard_registry() {
        Ok(registry) => registry,
        Err(e) => {
            eprintln!("cannot build registry: {e}");
            return;
        }
    };
    let actions = match node_type {
        Some(t) => registry.actions_for_node_type(t),
        None => registry.list_actions(),
    };

    for action in actions {
        println!("  • {} ({})", action.id, action.node_type);
        if !action.description.is_empty() {
            println!("    {}", action.description);
        }
        for param in &action.params {
            println!(
                "      - {}: {:?}{}",
                param.name,
                param.param_type,
                if param.required { "" } else { " (optional)" }
            );
        }
    }
}

async fn list_templates(dir: &Path) -> Result<()> {
    let templates = evalruntime::load_templates(dir).await?;

    println!("📚 Flow templates in {}:", dir.display());
    println!();
    for template in templates {
        println!(
            "  • {} [{}] {}",
            template.id,
            template.category.as_deref().unwrap_or("general"),
            template.name
        );
        if let Some(description) = &template.description {
            println!("    {}", description);
        }
        println!("    {} nodes, {} edges", template.nodes.len(), template.edges.len());
    }
    Ok(())
}

fn create_example_flow(output: PathBuf) -> Result<()> {
    let items = Value::Array(vec!["What is ownership?".into(), "What is borrowing?".into()]);
    let request = FlowRequest::new(
        vec![
            FlowNode::new("start", NodeType::Start),
            FlowNode::new("questions", NodeType::Loop)
                .with_data("items", "${start.questions}")
                .with_data("body", Value::Array(vec!["draft".into()])),
            FlowNode::action("draft", "debug.echo")
                .with_data("question", "${questions.item}")
                .with_data("golden", "Draft answer for: ${questions.item}"),
            FlowNode::new("enough", NodeType::Condition)
                .with_data("expression", "${questions.count} >= 2"),
            FlowNode::new("review", NodeType::ReviewGoldens),
            FlowNode::action("publish", "debug.log")
                .with_data("message", "Publishing ${questions.count} goldens"),
            FlowNode::action("warn", "debug.log")
                .with_data("message", "Not enough goldens")
                .with_data("level", "warn"),
            FlowNode::new("end", NodeType::End),
        ],
        vec![
            FlowEdge::new("start", "questions"),
            FlowEdge::new("questions", "draft"),
            FlowEdge::new("questions", "enough"),
            FlowEdge::new("enough", "review").with_branch("true"),
            FlowEdge::new("enough", "warn").with_branch("false"),
            FlowEdge::new("review", "publish"),
            FlowEdge::new("publish", "end"),
        ],
    )
    .with_param("questions", items);

    let json = serde_json::to_string_pretty(&request)?;
    std::fs::write(&output, json)?;

    println!("✨ Created example flow: {}", output.display());
    println!();
    println!("Run it with:");
    println!("  evalflow run --file {}", output.display());

    Ok(())
}

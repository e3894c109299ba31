//! `autoflow` CLI entry-point.
//!
//! Available sub-commands:
//! - `validate` — build and topologically sort a workflow JSON file.
//! - `run`      — execute a workflow JSON file with the built-in handlers.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use engine::{
    build_graph, topological_sort, ExecutorConfig, NodeRegistry, WorkflowDefinition,
    WorkflowExecutor,
};
use nodes::{Delivery, WaiterTable};

#[derive(Parser)]
#[command(name = "autoflow", about = "Sequential workflow orchestration engine", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Validate a workflow definition JSON file.
    Validate {
        /// Path to the workflow JSON file.
        path: PathBuf,
    },
    /// Execute a workflow definition JSON file.
    Run {
        /// Path to the workflow JSON file.
        path: PathBuf,
        /// Back-off unit between retries, in milliseconds.
        #[arg(long, env = "AUTOFLOW_BACKOFF_MS", default_value_t = 500)]
        backoff_ms: u64,
        /// Per-attempt deadline for nodes without `timeoutMs`.
        #[arg(long, env = "AUTOFLOW_DEFAULT_TIMEOUT_MS", default_value_t = 30_000)]
        default_timeout_ms: u64,
        /// Deadline for the whole run; unbounded when omitted.
        #[arg(long, env = "AUTOFLOW_RUN_TIMEOUT_MS")]
        run_timeout_ms: Option<u64>,
        /// Maximum number of node executions.
        #[arg(long, env = "AUTOFLOW_MAX_STEPS", default_value_t = 10_000)]
        max_steps: usize,
        /// Skip the cycle check (allows intentional decision loops).
        #[arg(long)]
        no_preflight: bool,
        /// Inbound message for a waiting node. Repeatable; delivered in order,
        /// each as soon as a waiting node matches it.
        #[arg(long = "event", value_name = "TEXT")]
        events: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("autoflow=info,engine=info,nodes=info,warn")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Validate { path } => {
            let workflow = load(&path)?;
            let built = build_graph(&workflow.nodes, &workflow.connections, &workflow.aliases)?;
            for edge in &built.dropped {
                warn!(source = %edge.source, target = %edge.target, "edge dropped");
            }

            match topological_sort(&built) {
                Ok(sorted) if built.dangling.is_empty() => {
                    println!("✅ Workflow is valid. Execution order: {:?}", sorted.order);
                    for (i, layer) in sorted.layers.iter().enumerate() {
                        println!("   layer {i}: {layer:?}");
                    }
                    print!("{}", built.debug_string());
                }
                Ok(_) => {
                    for edge in &built.dangling {
                        eprintln!("❌ Edge {} -> {} points at no node", edge.source, edge.target);
                    }
                    std::process::exit(1);
                }
                Err(e) => {
                    eprintln!("❌ Validation failed: {e}");
                    std::process::exit(1);
                }
            }
        }
        Command::Run {
            path,
            backoff_ms,
            default_timeout_ms,
            run_timeout_ms,
            max_steps,
            no_preflight,
            events,
        } => {
            let workflow = load(&path)?;
            let config = ExecutorConfig {
                retry_base_delay: Duration::from_millis(backoff_ms),
                default_timeout: Duration::from_millis(default_timeout_ms),
                run_timeout: run_timeout_ms.map(Duration::from_millis),
                max_steps,
                preflight_sort: !no_preflight,
            };

            let waiters = Arc::new(WaiterTable::new());
            let registry = Arc::new(NodeRegistry::with_builtins(Arc::clone(&waiters)));
            let executor = WorkflowExecutor::new(registry, config);

            let cancel = CancellationToken::new();
            let on_ctrl_c = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("interrupt received, cancelling run");
                    on_ctrl_c.cancel();
                }
            });

            let inbox = tokio::spawn(feed_events(waiters, events, cancel.clone()));

            info!(workflow = %workflow.name, id = %workflow.id, "starting run");
            let report = executor.execute(&workflow, cancel.clone()).await?;
            cancel.cancel();
            inbox.abort();

            println!("{}", report.to_json().context("serializing run report")?);
            if !report.is_success() {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

fn load(path: &Path) -> Result<WorkflowDefinition> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read file {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("invalid workflow JSON in {}", path.display()))
}

/// Hand each event to the first waiter that accepts it, in order.
async fn feed_events(waiters: Arc<WaiterTable>, events: Vec<String>, cancel: CancellationToken) {
    let mut poll = tokio::time::interval(Duration::from_millis(100));
    for text in events {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = poll.tick() => {}
            }
            match waiters.deliver_text(&text) {
                Delivery::Exact(key) | Delivery::Fuzzy(key) => {
                    info!(%key, "event delivered");
                    break;
                }
                Delivery::Undelivered => {}
            }
        }
    }
}

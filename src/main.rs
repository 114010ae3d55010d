use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use plangraph::config::Config;
use plangraph::core::{NodeId, TaskGraph, TaskGraphSnapshot};
use plangraph::gateway::HttpGateway;
use plangraph::schema::{task_graph_schema, SchemaRules};
use plangraph::util::cancellable_with_timeout;
use plangraph::{plog, plog_warn, Orchestrator, PlanOutcome, PlannerOptions, Result};

/// plangraph - decompose goals into dependency-checked task graphs
#[derive(Parser, Debug)]
#[command(name = "plangraph")]
#[command(version, about, long_about = None)]
#[command(after_help = "ENVIRONMENT:\n    PLANGRAPH_DEBUG=1     Enable debug logging (alternative to --debug)\n    CEREBRAS_API_KEY      Gateway credential (name configurable via gateway.api_key_env)")]
pub struct Cli {
    /// Enable debug logging (writes to ~/.plangraph/plangraph.log)
    #[arg(short = 'd', long, global = true)]
    pub debug: bool,

    /// Config file (defaults to ~/.plangraph/plangraph.toml)
    #[arg(short = 'c', long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Ask the model to decompose a goal into a task graph
    Plan {
        /// The goal in natural language
        goal: String,

        /// Upper bound on tasks stated in the prompt
        #[arg(long)]
        max_tasks: Option<usize>,

        /// Write the snapshot here instead of stdout
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Extend a saved graph with tasks that recover from failures
    Replan {
        /// Snapshot JSON file
        snapshot: PathBuf,

        /// Ids of the failed tasks
        #[arg(long = "failed", required = true, num_args = 1..)]
        failed: Vec<String>,

        #[arg(long)]
        max_tasks: Option<usize>,

        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Print the JSON Schema submitted with every request
    Schema,

    /// Print the heaviest chain of hard dependencies in a saved graph
    CriticalPath {
        /// Snapshot JSON file
        snapshot: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    plangraph::log::init_with_debug(cli.debug);

    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    match cli.command {
        Command::Plan {
            goal,
            max_tasks,
            out,
        } => run_plan(&config, goal, max_tasks, out),
        Command::Replan {
            snapshot,
            failed,
            max_tasks,
            out,
        } => run_replan(&config, &snapshot, failed, max_tasks, out),
        Command::Schema => run_schema(),
        Command::CriticalPath { snapshot } => run_critical_path(&snapshot),
    }
}

fn run_plan(config: &Config, goal: String, max_tasks: Option<usize>, out: Option<PathBuf>) -> Result<()> {
    plog!("Plan command: goal={:?}", goal);
    let orchestrator = build_orchestrator(config, max_tasks)?;

    let rt = tokio::runtime::Runtime::new()?;
    let cancel = cancel_on_ctrl_c(&rt);
    let deadline = overall_deadline(config);
    let outcome = rt.block_on(cancellable_with_timeout(
        deadline,
        &cancel,
        orchestrator.plan(&goal, &cancel),
    ))?;

    report(&outcome, "Planned");
    write_snapshot(&outcome.graph.snapshot(), out.as_deref())
}

fn run_replan(
    config: &Config,
    snapshot: &Path,
    failed: Vec<String>,
    max_tasks: Option<usize>,
    out: Option<PathBuf>,
) -> Result<()> {
    plog!("Replan command: snapshot={} failed={:?}", snapshot.display(), failed);
    let base = read_snapshot(snapshot)?;
    let failures: Vec<NodeId> = failed.into_iter().map(NodeId::from).collect();
    let orchestrator = build_orchestrator(config, max_tasks)?;

    let rt = tokio::runtime::Runtime::new()?;
    let cancel = cancel_on_ctrl_c(&rt);
    let deadline = overall_deadline(config);
    let outcome = rt.block_on(cancellable_with_timeout(
        deadline,
        &cancel,
        orchestrator.replan(base, &failures, &cancel),
    ))?;

    report(&outcome, "Added");
    write_snapshot(&outcome.graph.snapshot(), out.as_deref())
}

fn run_schema() -> Result<()> {
    let schema = task_graph_schema(&SchemaRules::strict())?;
    println!("{}", serde_json::to_string_pretty(schema.as_value())?);
    Ok(())
}

fn run_critical_path(snapshot: &Path) -> Result<()> {
    let graph = TaskGraph::from_snapshot(read_snapshot(snapshot)?)?;
    for (step, id) in graph.critical_path().iter().enumerate() {
        if let Some(node) = graph.node(id) {
            println!(
                "{:>3}. [{}] {} ({}, weight {})",
                step + 1,
                id.short(),
                node.description,
                node.status,
                node.weight()
            );
        }
    }
    Ok(())
}

fn build_orchestrator(config: &Config, max_tasks: Option<usize>) -> Result<Orchestrator<HttpGateway>> {
    let gateway = HttpGateway::from_config(&config.gateway)?;
    let mut options = PlannerOptions::from_config(config);
    if let Some(max_tasks) = max_tasks {
        options.max_tasks = max_tasks;
    }
    Orchestrator::new(gateway, options)
}

/// Token that fires on the first Ctrl-C.
fn cancel_on_ctrl_c(rt: &tokio::runtime::Runtime) -> CancellationToken {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    rt.spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            plog_warn!("Interrupted, cancelling in-flight request");
            trigger.cancel();
        }
    });
    cancel
}

/// Upper bound for a whole planning run: every attempt timing out plus the
/// longest backoff between each.
fn overall_deadline(config: &Config) -> Duration {
    let retry = &config.gateway.retry;
    let attempts = u64::from(retry.max_attempts.max(1));
    let per_attempt_ms = config
        .gateway
        .timeout_secs
        .saturating_mul(1_000)
        .saturating_add(retry.max_backoff_ms);
    Duration::from_millis(per_attempt_ms.saturating_mul(attempts))
}

fn report(outcome: &PlanOutcome, verb: &str) {
    eprintln!(
        "{} {} tasks and {} dependencies ({} tasks total)",
        verb,
        outcome.diff.added_nodes.len(),
        outcome.diff.added_edges.len(),
        outcome.graph.node_count()
    );
    for (key, id) in &outcome.diff.key_map {
        if let Some(node) = outcome.graph.node(id) {
            eprintln!("  {} -> [{}] {}", key, id.short(), node.description);
        }
    }
}

fn read_snapshot(path: &Path) -> Result<TaskGraphSnapshot> {
    let text = std::fs::read_to_string(path)?;
    TaskGraphSnapshot::from_json(&text)
}

fn write_snapshot(snapshot: &TaskGraphSnapshot, out: Option<&Path>) -> Result<()> {
    let json = snapshot.to_json_pretty()?;
    match out {
        Some(path) => {
            std::fs::write(path, json + "\n")?;
            eprintln!("Snapshot written to {}", path.display());
        }
        None => println!("{}", json),
    }
    Ok(())
}

//! weft CLI
//!
//! Validate, run and audit execution plans from the command line using the
//! builtin tool registry.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod render;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{bail, WrapErr};
use color_eyre::Result;
use console::style;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;
use weft_plan::ExecutionPlan;
use weft_progress::{LifecycleAuditor, ProgressEvent};
use weft_runtime::{Engine, EngineConfig};
use weft_tool::builtin;

/// Environment variable holding the log filter
const LOG_ENV: &str = "WEFT_LOG";

#[derive(Parser)]
#[command(name = "weft")]
#[command(about = "Run tool DAGs with bounded parallelism and live progress", long_about = None)]
#[command(version)]
struct Cli {
    /// Log as JSON instead of plain text
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check a plan and print its execution order
    Validate {
        /// Path to the plan JSON
        plan: PathBuf,
    },
    /// Execute a plan
    Run {
        /// Path to the plan JSON
        plan: PathBuf,
        /// Engine configuration JSON
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Append every progress event to this file as JSON lines
        #[arg(short, long)]
        events: Option<PathBuf>,
        /// Print the report as JSON instead of a table
        #[arg(long)]
        json: bool,
        /// Cap on concurrently running steps
        #[arg(long)]
        max_parallel: Option<usize>,
        /// Grace period for in-flight steps after Ctrl-C
        #[arg(long)]
        grace_ms: Option<u64>,
    },
    /// List builtin tools
    Tools,
    /// Check a recorded event log against the step lifecycle rules
    Audit {
        /// JSON-lines event log written by `weft run --events`
        events: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    color_eyre::install()?;
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let success = match cli.command {
        Commands::Validate { plan } => validate(&plan)?,
        Commands::Run {
            plan,
            config,
            events,
            json,
            max_parallel,
            grace_ms,
        } => {
            let config = load_config(config.as_deref(), max_parallel, grace_ms)?;
            run(&plan, config, events.as_deref(), json).await?
        }
        Commands::Tools => {
            tools();
            true
        }
        Commands::Audit { events } => audit(&events)?,
    };

    Ok(if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("weft=info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    // Ignore an already-installed subscriber
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}

fn load_plan(path: &Path) -> Result<ExecutionPlan> {
    let text = std::fs::read_to_string(path)
        .wrap_err_with(|| format!("reading plan {}", path.display()))?;
    ExecutionPlan::from_json(&text).wrap_err_with(|| format!("invalid plan {}", path.display()))
}

fn load_config(path: Option<&Path>, max_parallel: Option<usize>, grace_ms: Option<u64>) -> Result<EngineConfig> {
    let mut config = match path {
        Some(path) => EngineConfig::from_json_file(path)
            .wrap_err_with(|| format!("loading config {}", path.display()))?,
        None => EngineConfig::default(),
    };
    if let Some(cap) = max_parallel {
        if cap == 0 {
            bail!("--max-parallel must be at least 1");
        }
        config = config.with_max_parallel_cap(cap);
    }
    if let Some(grace) = grace_ms {
        config = config.with_cancel_grace_ms(grace);
    }
    Ok(config)
}

fn validate(path: &Path) -> Result<bool> {
    let plan = load_plan(path)?;
    println!(
        "{} plan {} ({} steps, maxParallel {})",
        style("valid").green().bold(),
        plan.id(),
        plan.len(),
        plan.max_parallel()
    );

    for (position, idx) in plan.topological_order().into_iter().enumerate() {
        let step = plan.step(idx);
        let after = if step.dependencies.is_empty() {
            String::new()
        } else {
            let deps: Vec<&str> = step.dependencies.iter().map(|d| d.as_str()).collect();
            format!(" after {}", deps.join(", "))
        };
        let exclusive = if step.can_parallelize { "" } else { " [exclusive]" };
        println!("{:>3}. {} ({}){}{}", position + 1, step.id, step.tool_id, after, exclusive);
    }

    for (key, producers) in plan.shared_producers() {
        let names: Vec<&str> = producers.iter().map(|p| p.as_str()).collect();
        println!(
            "{} context key '{}' is produced by {}; the last to complete wins",
            style("warning:").yellow().bold(),
            key,
            names.join(", ")
        );
    }
    Ok(true)
}

/// Run a plan, returning whether every step completed
async fn run(path: &Path, config: EngineConfig, events_path: Option<&Path>, json: bool) -> Result<bool> {
    let plan = load_plan(path)?;
    let total = plan.len();
    let engine = Engine::new(builtin::registry()).with_config(config);

    let mut sink = match events_path {
        Some(path) => Some(BufWriter::new(
            File::create(path).wrap_err_with(|| format!("creating event log {}", path.display()))?,
        )),
        None => None,
    };

    let handle = engine.spawn(plan);
    let mut events = handle.subscribe();

    let token = handle.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, cancelling run");
            token.cancel();
        }
    });

    let progress = (!json).then(|| render::RunProgress::new(total));
    while let Some(event) = events.recv().await {
        if let Some(writer) = sink.as_mut() {
            serde_json::to_writer(&mut *writer, &event)?;
            writeln!(writer)?;
        }
        if let Some(progress) = &progress {
            progress.observe(&event);
        }
    }
    if let Some(progress) = &progress {
        progress.abandon();
    }
    if let Some(mut writer) = sink {
        writer.flush()?;
    }
    if events.lost() > 0 {
        tracing::warn!(lost = events.lost(), "progress display missed events");
    }

    let report = handle.wait().await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", render::report_table(&report));
    }

    Ok(report.is_success())
}

fn tools() {
    let registry = builtin::registry();
    let width = registry.names().iter().map(|n| n.len()).max().unwrap_or(0);
    for tool in registry.iter() {
        let name = format!("{:<width$}", tool.name(), width = width);
        println!("{}  {}", style(name).bold(), tool.description());
    }
}

fn read_events(path: &Path) -> Result<Vec<ProgressEvent>> {
    let file = File::open(path).wrap_err_with(|| format!("opening event log {}", path.display()))?;
    let mut events = Vec::new();
    for (number, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let event = serde_json::from_str(&line)
            .wrap_err_with(|| format!("{}:{}: malformed event", path.display(), number + 1))?;
        events.push(event);
    }
    Ok(events)
}

fn audit(path: &Path) -> Result<bool> {
    let events = read_events(path)?;
    match LifecycleAuditor::new().validate_sequence(&events) {
        Ok(summary) => {
            println!("{}", render::audit_line(&summary));
            Ok(true)
        }
        Err(err) => {
            eprintln!("{} {}", style("lifecycle violation:").red().bold(), err);
            Ok(false)
        }
    }
}

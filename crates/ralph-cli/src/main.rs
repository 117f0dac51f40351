mod config;
#[cfg(feature = "tui")]
mod tui;

use anyhow::Context;
use clap::Parser;
use ralph_agent::ClaudeAgent;
use ralph_engine::{Controller, ControllerConfig, PlanSource, RunEvent, RunOutcome};
use ralph_store::{paths, Store};
use ralph_vcs::JjVcs;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "ralph", version, about = "Iterative AI development driver")]
struct Cli {
    /// Plan file to run
    #[arg(value_name = "PLAN_FILE", conflicts_with_all = ["prompt", "resume", "list"])]
    plan_file: Option<PathBuf>,

    /// Inline plan prompt
    #[arg(short, long, conflicts_with_all = ["resume", "list"])]
    prompt: Option<String>,

    /// Resume an existing plan by id
    #[arg(short, long, value_name = "PLAN_ID", conflicts_with = "list")]
    resume: Option<String>,

    /// Iteration limit override
    #[arg(long, value_name = "N")]
    max_iterations: Option<u64>,

    /// List stored plans and exit
    #[arg(long)]
    list: bool,

    /// Run without the TUI
    #[arg(long)]
    no_tui: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

enum Mode {
    New(PlanSource),
    Resume(String),
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Error: {e:#}");
            std::process::exit(1);
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "ralph=debug" } else { "ralph=info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: Cli) -> anyhow::Result<i32> {
    let config = config::load()?;
    let projects_dir = config
        .projects_dir
        .clone()
        .unwrap_or_else(paths::default_projects_dir);
    let db_path = paths::ensure_db_path(&projects_dir)
        .with_context(|| format!("projects dir {}", projects_dir.display()))?;
    let store = Store::open(&db_path)?;

    if cli.list {
        return list_plans(&store);
    }

    let mode = match (cli.plan_file, cli.prompt, cli.resume) {
        (Some(path), None, None) => Mode::New(PlanSource::File(path)),
        (None, Some(text), None) => Mode::New(PlanSource::Inline(text)),
        (None, None, Some(id)) => Mode::Resume(id),
        _ => anyhow::bail!("provide exactly one of a plan file, --prompt, or --resume"),
    };

    let agent = ClaudeAgent::new(&config.agent.model, config.agent.max_turns);
    agent.verify_available()?;
    let distiller = ClaudeAgent::new(&config.agent.distill_model, 3);

    let cwd = std::env::current_dir()?;
    let vcs = Arc::new(JjVcs::new(cwd));

    let controller_config = ControllerConfig {
        max_iterations: cli.max_iterations.or(config.max_iterations).unwrap_or(25),
        developer_instructions: config::role_instructions(&config, "developer")?,
    };

    let rt = tokio::runtime::Runtime::new()?;

    // Setup check: jj present and this is a repository.
    rt.block_on(vcs.verify_repo(CancellationToken::new()))
        .context("version control check failed")?;

    let mut controller = Controller::new(
        store,
        Arc::new(agent),
        Arc::new(distiller),
        vcs,
        controller_config,
    );
    let cancel = controller.cancel_token();

    let ctrlc_cancel = cancel.clone();
    let _ = ctrlc::set_handler(move || {
        ctrlc_cancel.cancel();
    });

    let use_tui = !cli.no_tui && std::io::stdout().is_terminal() && cfg!(feature = "tui");
    let (tx, rx) = tokio::sync::mpsc::channel(256);
    controller = controller.with_tui(tx);
    let consumer = if use_tui {
        spawn_consumer(rx, cancel.clone())
    } else {
        spawn_printer(rx, cli.verbose || config.agent.verbose)
    };

    let report = match mode {
        Mode::Resume(plan_id) => rt.block_on(controller.resume(&plan_id))?,
        Mode::New(source) => rt.block_on(controller.run_new(source))?,
    };

    let _ = consumer.join();

    Ok(match report.outcome {
        RunOutcome::Completed => {
            println!(
                "Plan {} completed after {} iteration(s).",
                report.plan_id, report.iterations
            );
            0
        }
        RunOutcome::Stopped => {
            println!(
                "Plan {} stopped at the iteration limit ({}). Resume with: ralph -r {}",
                report.plan_id, report.iterations, report.plan_id
            );
            0
        }
        RunOutcome::Cancelled => {
            println!("Cancelled. Resume with: ralph -r {}", report.plan_id);
            130
        }
    })
}

fn list_plans(store: &Store) -> anyhow::Result<i32> {
    let plans = store.list_plans()?;
    if plans.is_empty() {
        println!("No plans found.");
        return Ok(0);
    }
    for plan in plans {
        let origin = if plan.source_path.is_empty() {
            "(inline)".to_string()
        } else {
            plan.source_path.clone()
        };
        println!(
            "{}  {:<9}  {}  {}",
            plan.id,
            plan.status.as_str(),
            plan.updated_at,
            origin
        );
    }
    Ok(0)
}

/// TUI consumer on its own thread; returns after the event channel closes.
#[cfg(feature = "tui")]
fn spawn_consumer(
    rx: tokio::sync::mpsc::Receiver<RunEvent>,
    cancel: CancellationToken,
) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        if let Err(e) = tui::run(rx, cancel) {
            eprintln!("tui error: {e:#}");
        }
    })
}

#[cfg(not(feature = "tui"))]
fn spawn_consumer(
    rx: tokio::sync::mpsc::Receiver<RunEvent>,
    _cancel: CancellationToken,
) -> std::thread::JoinHandle<()> {
    spawn_printer(rx, true)
}

/// Headless consumer: one line per noteworthy event. Agent activity is only
/// shown when verbose.
fn spawn_printer(
    mut rx: tokio::sync::mpsc::Receiver<RunEvent>,
    verbose: bool,
) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        while let Some(event) = rx.blocking_recv() {
            match event {
                RunEvent::PlanStarted {
                    plan_id,
                    first_iteration,
                    max_iterations,
                } => println!("Plan {plan_id} (iteration {first_iteration}, limit {max_iterations})"),
                RunEvent::AgentEvent { kind, summary, .. } if verbose => {
                    println!("  {:<17} {summary}", kind.as_str())
                }
                RunEvent::IterationCompleted {
                    iteration,
                    commit_message,
                } => match commit_message {
                    Some(msg) => println!("✓ iteration {iteration} committed: {msg}"),
                    None => println!("✓ iteration {iteration} done"),
                },
                RunEvent::IterationFailed { iteration, error } => {
                    println!("✗ iteration {iteration} failed: {error}")
                }
                _ => {}
            }
        }
    })
}

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use futures::StreamExt;

use marshal::core::{expr, plan, MaxParallel, Options, SchedulerKind};
use marshal::log::Logger;
use marshal::orchestration::{LogProgress, ProgressSink, Scheduler, Workspace};
use marshal::{mlog, Error, Result};

/// Marshal - composable target scheduler
#[derive(Parser, Debug)]
#[command(name = "marshal")]
#[command(version, about, long_about = None)]
#[command(after_help = "ENVIRONMENT:\n    MARSHAL_DEBUG=1     Enable debug logging (alternative to --debug)")]
pub struct Cli {
    /// Enable debug logging (writes to ~/.marshal/marshal.log)
    #[arg(short = 'd', long)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Run a target plan
    Run {
        /// Plan file (.json or .toml)
        plan: PathBuf,

        /// Isolation strategy: in-process, spawn, worker or respawn
        #[arg(short, long)]
        scheduler: Option<SchedulerKind>,

        /// Workspace root (defaults to the current directory)
        #[arg(short, long)]
        workspace: Option<PathBuf>,

        /// Extra option passed to every target, as key=value
        #[arg(long = "set", value_name = "KEY=VALUE", value_parser = parse_option)]
        options: Vec<(String, serde_json::Value)>,
    },

    /// Evaluate a parallelism expression
    Eval {
        /// Expression such as "cpuCount / 2"
        expression: String,
    },

    /// Count the leaves of a plan
    Count {
        /// Plan file (.json or .toml)
        plan: PathBuf,
    },
}

fn parse_option(raw: &str) -> std::result::Result<(String, serde_json::Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{raw}'"))?;
    if key.is_empty() {
        return Err(format!("empty key in '{raw}'"));
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| serde_json::Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

/// Prints one line per finished leaf to stderr, and mirrors it to the log.
struct TerminalProgress;

impl ProgressSink for TerminalProgress {
    fn started(&self, total: usize) {
        LogProgress.started(total);
        eprintln!("Scheduling {} targets", total);
    }

    fn leaf_finished(&self, label: &str, success: bool, completed: usize, total: usize) {
        LogProgress.leaf_finished(label, success, completed, total);
        let outcome = if success { "ok" } else { "FAILED" };
        eprintln!("[{}/{}] {} {}", completed, total, label, outcome);
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    marshal::log::init_with_debug(cli.debug);

    if cli.debug {
        mlog!("Marshal starting (debug mode enabled)");
    } else {
        mlog!("Marshal starting");
    }

    match cli.command {
        Command::Run {
            plan,
            scheduler,
            workspace,
            options,
        } => run_plan(plan, scheduler, workspace, options.into_iter().collect()),
        Command::Eval { expression } => run_eval(&expression),
        Command::Count { plan } => run_count(plan),
    }
}

fn run_plan(
    plan_path: PathBuf,
    kind: Option<SchedulerKind>,
    workspace_root: Option<PathBuf>,
    options: Options,
) -> Result<()> {
    let root = match workspace_root {
        Some(root) => root,
        None => std::env::current_dir()?,
    };
    let workspace = Workspace::open(&root)?;
    let kind = kind.unwrap_or_else(|| workspace.config.effective_scheduler());
    let tree = plan::load(&plan_path)?;
    mlog!(
        "Run command: plan={}, scheduler={}, workspace={}",
        plan_path.display(),
        kind,
        root.display()
    );

    let scheduler = Scheduler::for_kind(kind, &workspace, Logger::global())?
        .with_progress(Arc::new(TerminalProgress))
        .with_extra_options(options);

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let mut stream = scheduler.run(tree);
        let mut succeeded = 0usize;
        while let Some(item) = stream.next().await {
            match item {
                Ok(_) => succeeded += 1,
                Err(e) => {
                    eprintln!("Run failed: {}", e);
                    return Err(e);
                }
            }
        }
        println!(
            "{} of {} targets finished, {} results",
            stream.completed(),
            stream.total(),
            succeeded
        );
        Ok(())
    })
}

fn run_eval(expression: &str) -> Result<()> {
    let value = expr::evaluate(expression)?;
    match MaxParallel::from(expression).resolve() {
        Ok(slots) => println!("{} (max_parallel {})", value, slots),
        Err(Error::InvalidBound { .. }) => println!("{} (not a valid max_parallel)", value),
        Err(e) => return Err(e),
    }
    Ok(())
}

fn run_count(plan_path: PathBuf) -> Result<()> {
    let tree = plan::load(&plan_path)?;
    println!("{}", tree.count_leaves());
    Ok(())
}

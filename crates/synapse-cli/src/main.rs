//! Synapse CLI
//!
//! The `synapse` command drives the orchestration engine from scripted
//! worker fixtures.
//!
//! ## Commands
//!
//! - `run`: plan, build and review a task, printing the run result as JSON
//! - `check-plan`: derive the subtasks of a planner result without running it
//! - `config`: print the effective configuration

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};

use synapse_core::worker::PlannerOutput;
use synapse_core::{
    FsMaterializer, RunStatus, ScriptedResponse, ScriptedWorker, Synapse, SynapseConfig, Task,
    TaskGraph, WorkerRegistry, WorkerRole,
};

#[derive(Parser)]
#[command(name = "synapse")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Plan, build and review a task with a pipeline of workers", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(flatten)]
    overrides: ConfigOverrides,

    #[command(subcommand)]
    command: Commands,
}

/// Individual settings that take precedence over the config file.
#[derive(clap::Args, Debug, Default)]
struct ConfigOverrides {
    /// Maximum number of subtasks generated at once
    #[arg(long, global = true, env = "SYNAPSE_MAX_CONCURRENCY")]
    max_concurrency: Option<usize>,

    /// Attempts per worker call, including the first
    #[arg(long, global = true, env = "SYNAPSE_MAX_ATTEMPTS")]
    max_attempts: Option<u32>,

    /// Tolerated share of failed subtasks (0.0 - 1.0)
    #[arg(long, global = true, env = "SYNAPSE_FAILURE_RATIO")]
    max_failure_ratio: Option<f64>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a task through plan, build and review
    Run {
        /// Task file (JSON: requirements, language, constraints)
        #[arg(short, long)]
        task: PathBuf,

        /// Planner script (JSON list of scripted responses)
        #[arg(long)]
        planner: PathBuf,

        /// Generator script
        #[arg(long)]
        generator: PathBuf,

        /// Reviewer script
        #[arg(long)]
        reviewer: PathBuf,

        /// Write generated files below this directory when the run succeeds
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Cancel the run after this many seconds
        #[arg(long)]
        timeout_secs: Option<u64>,
    },

    /// Derive and list the subtasks of a planner result
    CheckPlan {
        /// Planner result file (JSON: structure, dependencies)
        plan: PathBuf,
    },

    /// Print the effective configuration
    Config,
}

/// On-disk task description.
#[derive(Debug, Deserialize)]
struct TaskFile {
    requirements: String,
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    constraints: BTreeMap<String, String>,
}

impl TaskFile {
    fn into_task(self) -> Result<Task> {
        let mut task = Task::new(self.requirements)?;
        if let Some(language) = self.language {
            task = task.with_language(language);
        }
        for (name, value) in self.constraints {
            task = task.with_constraint(name, value)?;
        }
        Ok(task)
    }
}

/// A worker script: either a plain list of responses, or shared responses
/// plus per-path scripts.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ScriptFile {
    List(Vec<ScriptedResponse>),
    Detailed {
        #[serde(default)]
        responses: Vec<ScriptedResponse>,
        #[serde(default)]
        paths: BTreeMap<String, Vec<ScriptedResponse>>,
    },
}

impl ScriptFile {
    fn into_worker(self, role: WorkerRole) -> ScriptedWorker {
        match self {
            ScriptFile::List(responses) => ScriptedWorker::new(role, responses),
            ScriptFile::Detailed { responses, paths } => paths.into_iter().fold(
                ScriptedWorker::new(role, responses),
                |worker, (path, script)| worker.with_path_script(path, script),
            ),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    synapse_core::init_tracing(cli.json, level);

    let config = load_config(cli.config.as_deref(), &cli.overrides)?;

    match cli.command {
        Commands::Run {
            task,
            planner,
            generator,
            reviewer,
            out,
            timeout_secs,
        } => {
            let scripts = Scripts {
                planner,
                generator,
                reviewer,
            };
            cmd_run(config, &task, &scripts, out, timeout_secs).await
        }
        Commands::CheckPlan { plan } => cmd_check_plan(&plan),
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

fn load_config(path: Option<&Path>, overrides: &ConfigOverrides) -> Result<SynapseConfig> {
    let mut config = match path {
        Some(path) => SynapseConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => SynapseConfig::default(),
    };
    if let Some(v) = overrides.max_concurrency {
        config.max_concurrency = v;
    }
    if let Some(v) = overrides.max_attempts {
        config.max_attempts = v;
    }
    if let Some(v) = overrides.max_failure_ratio {
        config.max_failure_ratio = v;
    }
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

struct Scripts {
    planner: PathBuf,
    generator: PathBuf,
    reviewer: PathBuf,
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path, what: &str) -> Result<T> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {what} file {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("Invalid {what} file {}", path.display()))
}

fn build_registry(scripts: &Scripts) -> Result<WorkerRegistry> {
    let mut registry = WorkerRegistry::new();
    for (role, path) in [
        (WorkerRole::Planner, &scripts.planner),
        (WorkerRole::Generator, &scripts.generator),
        (WorkerRole::Reviewer, &scripts.reviewer),
    ] {
        let script: ScriptFile = read_json(path, &format!("{role} script"))?;
        registry.register(Arc::new(script.into_worker(role)));
    }
    Ok(registry)
}

async fn cmd_run(
    config: SynapseConfig,
    task_path: &Path,
    scripts: &Scripts,
    out: Option<PathBuf>,
    timeout_secs: Option<u64>,
) -> Result<()> {
    let task = read_json::<TaskFile>(task_path, "task")?.into_task()?;
    let registry = build_registry(scripts)?;

    let mut synapse = Synapse::new(registry, config);
    if let Some(dir) = out {
        info!(out = %dir.display(), "generated files will be materialized");
        synapse = synapse.with_materializer(Arc::new(FsMaterializer::new(dir)));
    }

    let cancel = CancellationToken::new();
    let watchdog = spawn_watchdog(cancel.clone(), timeout_secs.map(Duration::from_secs));

    let result = synapse.run(task, cancel).await;
    watchdog.abort();

    println!("{}", serde_json::to_string_pretty(&result)?);

    if let Some(report) = &result.materialization {
        if let Some(err) = &report.error {
            warn!(error = %err, "generated files were not written");
        }
    }

    match result.status {
        RunStatus::Done => Ok(()),
        status => {
            let reason = result
                .failure
                .as_ref()
                .map(|f| format!(" at {}: {}", f.stage, f.message))
                .unwrap_or_default();
            bail!("run {status}{reason}")
        }
    }
}

/// Cancel `cancel` on Ctrl-C or once `timeout` elapses.
fn spawn_watchdog(
    cancel: CancellationToken,
    timeout: Option<Duration>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let deadline = async {
            match timeout {
                Some(t) => tokio::time::sleep(t).await,
                None => std::future::pending().await,
            }
        };
        tokio::select! {
            _ = deadline => warn!("timeout reached, cancelling run"),
            _ = tokio::signal::ctrl_c() => warn!("interrupted, cancelling run"),
        }
        cancel.cancel();
    })
}

fn cmd_check_plan(path: &Path) -> Result<()> {
    let output: PlannerOutput = read_json(path, "plan")?;
    let plan = output.into_plan();
    let subtasks = TaskGraph::derive(&plan).context("Plan is malformed")?;
    if subtasks.is_empty() {
        bail!("Plan declares no files");
    }

    println!("{} subtask(s)", subtasks.len());
    for subtask in &subtasks {
        println!(
            "  {:>3}  {:<8} {}",
            subtask.index,
            subtask.role.to_string(),
            subtask.path
        );
    }
    if !plan.dependencies.is_empty() {
        println!("dependencies: {}", plan.dependencies.join(", "));
    }
    Ok(())
}

//! taskloop: drive the task runtime from a scripted model and print workflow envelopes

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use taskloop_agent::AgentCoordinator;
use taskloop_core::{
    EventListener, ExecutionContext, RunIds, RuntimeConfig, TaskResult, WorkflowEnvelope,
};
use taskloop_llm::{LlmProvider, RetryingProvider, ScriptedProvider};
use taskloop_tools::create_default_registry;
use tokio_util::sync::CancellationToken;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "taskloop", about = "Taskloop ReAct task runtime harness", version)]
struct Cli {
    /// Runtime config (TOML). Missing or invalid files fall back to defaults.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Also write logs to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one task against a scripted model
    Run {
        /// The task to run
        task: String,
        /// JSON array of scripted model turns
        #[arg(short, long)]
        script: PathBuf,
        /// Session to load history from and save it to
        #[arg(long, default_value = "cli")]
        session: String,
        #[arg(long)]
        max_iterations: Option<usize>,
        #[arg(long)]
        concurrency: Option<usize>,
        /// Persist checkpoints here so a paused run can be resumed later
        #[arg(long)]
        checkpoint_dir: Option<PathBuf>,
        /// Approve every dangerous tool call
        #[arg(long)]
        auto_approve: bool,
    },
    /// Resume a run that paused for user input
    Resume {
        run_id: String,
        /// The user's answer to the pending question
        reply: String,
        #[arg(short, long)]
        script: PathBuf,
        #[arg(long)]
        checkpoint_dir: PathBuf,
    },
    /// Print the effective config as TOML
    Config,
}

/// Writes every envelope to stdout as one JSON line.
struct JsonLinesListener;

impl EventListener for JsonLinesListener {
    fn on_event(&self, envelope: &WorkflowEnvelope) -> taskloop_core::Result<()> {
        let line = serde_json::to_string(envelope)?;
        let mut out = std::io::stdout().lock();
        writeln!(out, "{}", line)?;
        Ok(())
    }
}

fn init_tracing(log_file: Option<&Path>) -> anyhow::Result<Option<WorkerGuard>> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "taskloop=info".into());
    let stderr = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    let Some(path) = log_file else {
        tracing_subscriber::registry().with(filter).with(stderr).init();
        return Ok(None);
    };

    let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
    let name = path
        .file_name()
        .context("--log-file must name a file")?;
    let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(dir, name));
    tracing_subscriber::registry()
        .with(filter)
        .with(stderr)
        .with(tracing_subscriber::fmt::layer().with_ansi(false).with_writer(writer))
        .init();
    Ok(Some(guard))
}

fn load_config(path: Option<&Path>) -> RuntimeConfig {
    match path {
        Some(path) => RuntimeConfig::load(path),
        None => RuntimeConfig::default(),
    }
}

fn load_script(path: &Path, config: &RuntimeConfig) -> anyhow::Result<Arc<dyn LlmProvider>> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read script {}", path.display()))?;
    let scripted = ScriptedProvider::from_json(&json)
        .with_context(|| format!("invalid script {}", path.display()))?;
    Ok(Arc::new(RetryingProvider::new(
        Arc::new(scripted),
        config.llm_retry.clone(),
    )))
}

/// Cancels the token on Ctrl-C.
fn cancel_on_interrupt() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupted, cancelling run");
            token.cancel();
        }
    });
    cancel
}

fn report(result: &TaskResult) {
    tracing::info!(
        run_id = %result.run_id,
        stop_reason = result.stop_reason.as_str(),
        iterations = result.iterations,
        tokens = result.usage.total(),
        "run finished"
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _guard = init_tracing(cli.log_file.as_deref())?;
    let mut config = load_config(cli.config.as_deref());

    match cli.command {
        Commands::Run {
            task,
            script,
            session,
            max_iterations,
            concurrency,
            checkpoint_dir,
            auto_approve,
        } => {
            if let Some(max) = max_iterations {
                config.max_iterations = max;
            }
            if let Some(concurrency) = concurrency {
                config.tool_concurrency = concurrency;
            }
            if checkpoint_dir.is_some() {
                config.checkpoint_dir = checkpoint_dir;
            }
            config.approval.auto_approve |= auto_approve;

            let provider = load_script(&script, &config)?;
            let coordinator = Arc::new(AgentCoordinator::new(
                provider,
                Arc::new(create_default_registry()),
                config,
            ));
            let ctx = ExecutionContext::new(RunIds::root(session)).with_cancel(cancel_on_interrupt());
            let result = coordinator
                .execute_task(ctx, &task, Arc::new(JsonLinesListener))
                .await?;
            report(&result);
        }
        Commands::Resume {
            run_id,
            reply,
            script,
            checkpoint_dir,
        } => {
            config.checkpoint_dir = Some(checkpoint_dir);
            let provider = load_script(&script, &config)?;
            let coordinator = Arc::new(AgentCoordinator::new(
                provider,
                Arc::new(create_default_registry()),
                config,
            ));
            let result = coordinator
                .resume_task(&run_id, &reply, cancel_on_interrupt(), Arc::new(JsonLinesListener))
                .await?;
            report(&result);
        }
        Commands::Config => {
            print!("{}", config.to_toml());
        }
    }

    Ok(())
}

//! # foreman-agent
//!
//! Foreman CLI binary — wires the workspace store, interpreter, runtime,
//! and channel together behind three subcommands: `run` (the role loop),
//! `sprint` (plan and execute one sprint cycle), and `serve` (the
//! heartbeat/command channel server).

#![deny(unsafe_code)]

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use foreman_core::constants::{FEATURE_LIST_FILE, SPRINT_PLAN_FILE};
use foreman_core::settings::ForemanSettings;
use foreman_interp::{parse_blocks, Interpreter, TokioProcessRunner};
use foreman_runtime::{
    prompts, AgentCli, CliAgentClient, ControlState, SessionRunner, SprintTaskWorker,
};
use foreman_server::{ChannelServer, HeartbeatClient};
use foreman_sprint::{SprintPlan, SprintScheduler, TaskWorker};
use foreman_workspace::{FsSignalStore, SignalStore, WorkspaceStore};

/// Foreman agent orchestration engine.
#[derive(Parser, Debug)]
#[command(name = "foreman", about = "Agent orchestration engine")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the role loop against a workspace until a terminal state.
    Run {
        /// Workspace root directory.
        workspace: PathBuf,
        /// Session id reported over the channel (defaults to the workspace
        /// directory name).
        #[arg(long)]
        session_id: Option<String>,
        /// Iteration budget override.
        #[arg(long)]
        max_iterations: Option<u32>,
        /// Manager review frequency override.
        #[arg(long)]
        manager_frequency: Option<u32>,
        /// Agent CLI command override.
        #[arg(long)]
        cli_command: Option<String>,
        /// Run headless, without heartbeat/command reporting.
        #[arg(long)]
        no_channel: bool,
    },
    /// Plan (if no plan exists) and execute one sprint cycle.
    Sprint {
        /// Workspace root directory.
        workspace: PathBuf,
        /// Session id prefix for worker heartbeats.
        #[arg(long)]
        session_id: Option<String>,
        /// Concurrent worker cap override.
        #[arg(long)]
        max_workers: Option<usize>,
        /// Run headless, without heartbeat/command reporting.
        #[arg(long)]
        no_channel: bool,
    },
    /// Start the heartbeat/command channel server.
    Serve {
        /// Bind host override.
        #[arg(long)]
        host: Option<String>,
        /// Bind port override.
        #[arg(long)]
        port: Option<u16>,
    },
}

/// Bundle of per-workspace plumbing shared by `run` and `sprint`.
struct Wiring {
    workspace: PathBuf,
    settings: ForemanSettings,
    session_id: String,
    store: WorkspaceStore,
    signals: Arc<dyn SignalStore>,
    interpreter: Interpreter,
    cli: Arc<dyn AgentCli>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for Wiring {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Wiring")
            .field("workspace", &self.workspace)
            .field("session_id", &self.session_id)
            .finish_non_exhaustive()
    }
}

impl Wiring {
    fn build(workspace: &Path, session_id: Option<String>) -> Result<Self> {
        let workspace = workspace
            .canonicalize()
            .with_context(|| format!("workspace not found: {}", workspace.display()))?;
        let settings = ForemanSettings::load(&workspace)?;
        let session_id = session_id.unwrap_or_else(|| default_session_id(&workspace));

        let store = WorkspaceStore::new(&workspace, settings.interp.max_write_bytes);
        let signals: Arc<dyn SignalStore> = Arc::new(FsSignalStore::new(&workspace));
        let interpreter = Interpreter::new(
            store.clone(),
            signals.clone(),
            Arc::new(TokioProcessRunner),
            settings.interp.clone(),
        );
        let cli: Arc<dyn AgentCli> = Arc::new(
            CliAgentClient::new(&settings.agent, &workspace).with_retry(settings.retry.clone()),
        );

        let cancel = CancellationToken::new();
        spawn_interrupt_watch(cancel.clone());

        Ok(Self {
            workspace,
            settings,
            session_id,
            store,
            signals,
            interpreter,
            cli,
            cancel,
        })
    }

    fn channel(&self, disabled: bool) -> Option<HeartbeatClient> {
        if disabled {
            return None;
        }
        match HeartbeatClient::new(&self.settings.channel.url, &self.session_id) {
            Ok(client) => Some(client),
            Err(err) => {
                warn!(error = %err, "heartbeat channel disabled");
                None
            }
        }
    }
}

/// Fall back to the workspace directory name for the session id.
fn default_session_id(workspace: &Path) -> String {
    workspace
        .file_name()
        .map_or_else(|| "workspace".to_string(), |n| n.to_string_lossy().into_owned())
}

/// Ctrl-C cancels the token; the loops stop at the next turn boundary.
fn spawn_interrupt_watch(cancel: CancellationToken) {
    drop(tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, stopping at the next turn boundary");
            cancel.cancel();
        }
    }));
}

async fn run_session(
    workspace: &Path,
    session_id: Option<String>,
    max_iterations: Option<u32>,
    manager_frequency: Option<u32>,
    cli_command: Option<String>,
    no_channel: bool,
) -> Result<ExitCode> {
    let mut wiring = Wiring::build(workspace, session_id)?;
    if let Some(n) = max_iterations {
        wiring.settings.agent.max_iterations = Some(n);
    }
    if let Some(n) = manager_frequency {
        wiring.settings.agent.manager_frequency = n;
    }
    if let Some(cmd) = cli_command {
        wiring.settings.agent.cli_command = cmd;
        // The override must reach the already-built client too.
        wiring.cli = Arc::new(
            CliAgentClient::new(&wiring.settings.agent, &wiring.workspace)
                .with_retry(wiring.settings.retry.clone()),
        );
    }
    let channel = wiring.channel(no_channel);

    let mut runner = SessionRunner::new(
        wiring.session_id.clone(),
        wiring.settings.agent.clone(),
        wiring.store,
        wiring.signals,
        wiring.interpreter,
        wiring.cli,
        Arc::new(ControlState::new()),
        channel,
        wiring.cancel,
    );
    let report = runner.run().await;
    info!(
        iterations = report.iterations,
        reason = ?report.reason,
        "session finished"
    );
    Ok(if report.reason.is_graceful() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn run_sprint(
    workspace: &Path,
    session_id: Option<String>,
    max_workers: Option<usize>,
    no_channel: bool,
) -> Result<ExitCode> {
    let mut wiring = Wiring::build(workspace, session_id)?;
    if let Some(n) = max_workers {
        wiring.settings.sprint.max_workers = n;
    }
    let interpreter = Arc::new(wiring.interpreter);
    let workspace_str = wiring.workspace.display().to_string();

    // Planning phase: if no plan exists, one planner turn writes it. The
    // plan loader can still recover a fenced JSON block from the raw
    // response if the model described the plan without writing the file.
    let plan_path = wiring.workspace.join(SPRINT_PLAN_FILE);
    let response = if plan_path.exists() {
        String::new()
    } else {
        info!("no sprint plan, running the planning turn");
        let features = wiring
            .store
            .read_file(FEATURE_LIST_FILE)
            .await
            .unwrap_or_else(|_| "[]".to_string());
        let prompt = prompts::sprint_planner(&workspace_str, &features);
        let response = wiring.cli.complete(&prompt, &wiring.cancel).await?;
        let _ = interpreter
            .execute(&parse_blocks(&response), &wiring.cancel)
            .await;
        response
    };
    let plan = SprintPlan::load_or_recover(&plan_path, &response)?;
    info!(goal = %plan.sprint_goal, tasks = plan.tasks.len(), "sprint plan ready");
    let graph = plan.into_graph()?;

    let channel_url = if no_channel {
        None
    } else {
        Some(wiring.settings.channel.url.clone())
    };
    let worker = Arc::new(SprintTaskWorker::new(
        workspace_str,
        wiring.settings.sprint.clone(),
        interpreter,
        wiring.cli,
        channel_url,
        wiring.session_id.clone(),
    )) as Arc<dyn TaskWorker>;

    let scheduler = SprintScheduler::new(wiring.settings.sprint.clone(), wiring.cancel.clone());
    let summary = scheduler.run(graph, worker).await?;
    info!(
        completed = summary.completed.len(),
        failed = summary.failed.len(),
        skipped = summary.skipped.len(),
        verdict = ?summary.verdict(),
        "sprint finished"
    );
    for (id, reason) in &summary.failed {
        warn!(task = %id, reason = %reason, "task failed");
    }
    Ok(if summary.failed.is_empty() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn run_server(host: Option<String>, port: Option<u16>) -> Result<()> {
    let mut settings = ForemanSettings::load(Path::new("."))?;
    if let Some(host) = host {
        settings.channel.host = host;
    }
    if let Some(port) = port {
        settings.channel.port = port;
    }

    let handle = foreman_server::metrics::install_recorder();
    let server = ChannelServer::new(settings.channel, handle);

    let cancel = CancellationToken::new();
    spawn_interrupt_watch(cancel.clone());
    server.serve(cancel).await?;
    info!("channel server stopped");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    foreman_core::logging::init_subscriber("info");
    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            workspace,
            session_id,
            max_iterations,
            manager_frequency,
            cli_command,
            no_channel,
        } => {
            run_session(
                &workspace,
                session_id,
                max_iterations,
                manager_frequency,
                cli_command,
                no_channel,
            )
            .await
        }
        Command::Sprint {
            workspace,
            session_id,
            max_workers,
            no_channel,
        } => run_sprint(&workspace, session_id, max_workers, no_channel).await,
        Command::Serve { host, port } => {
            run_server(host, port).await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn cli_run_defaults() {
        let cli = Cli::parse_from(["foreman", "run", "/tmp/ws"]);
        match cli.command {
            Command::Run {
                workspace,
                session_id,
                max_iterations,
                no_channel,
                ..
            } => {
                assert_eq!(workspace, PathBuf::from("/tmp/ws"));
                assert_eq!(session_id, None);
                assert_eq!(max_iterations, None);
                assert!(!no_channel);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn cli_run_overrides() {
        let cli = Cli::parse_from([
            "foreman",
            "run",
            "/tmp/ws",
            "--session-id",
            "alpha",
            "--max-iterations",
            "50",
            "--manager-frequency",
            "5",
            "--no-channel",
        ]);
        match cli.command {
            Command::Run {
                session_id,
                max_iterations,
                manager_frequency,
                no_channel,
                ..
            } => {
                assert_eq!(session_id.as_deref(), Some("alpha"));
                assert_eq!(max_iterations, Some(50));
                assert_eq!(manager_frequency, Some(5));
                assert!(no_channel);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn cli_sprint_max_workers() {
        let cli = Cli::parse_from(["foreman", "sprint", "/tmp/ws", "--max-workers", "4"]);
        match cli.command {
            Command::Sprint { max_workers, .. } => assert_eq!(max_workers, Some(4)),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn cli_serve_port() {
        let cli = Cli::parse_from(["foreman", "serve", "--port", "9000"]);
        match cli.command {
            Command::Serve { host, port } => {
                assert_eq!(host, None);
                assert_eq!(port, Some(9000));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn session_id_defaults_to_directory_name() {
        assert_eq!(default_session_id(Path::new("/work/projects/demo")), "demo");
    }

    #[test]
    fn wiring_requires_an_existing_workspace() {
        let err = Wiring::build(Path::new("/no/such/workspace"), None).unwrap_err();
        assert!(err.to_string().contains("workspace not found"));
    }

    #[tokio::test]
    async fn wiring_builds_against_a_real_directory() {
        let dir = tempfile::tempdir().unwrap();
        let wiring = Wiring::build(dir.path(), Some("s1".to_string())).unwrap();
        assert_eq!(wiring.session_id, "s1");
        assert!(wiring.channel(true).is_none());
        assert!(wiring.channel(false).is_some());
    }
}

mod cli;

use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use cli::{Cli, Command};
use shepherd::config::ProjectConfig;
use shepherd::dashboard::Dashboard;
use shepherd::git::GitDeltaTracker;
use shepherd::paths::{resolve_repo_root, resolve_under};
use shepherd::session::{RunSession, SessionOutcome, generate_run_id, run_session};
use shepherd::snapshot::{SnapshotCollector, SqliteRowSource};
use shepherd::supervisor::{CommandLauncher, LaunchSpec, SupervisorConfig, WorkflowState};

/// Nested-agent guards that make the workflow's own agents refuse to start.
const STRIPPED_ENV: &[&str] = &["CLAUDECODE", "CLAUDE_CODE"];

fn config_source_label(config_path: Option<&Path>) -> String {
    config_path
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "(defaults, no .shepherd/config.toml found)".to_string())
}

fn push_kv(output: &mut String, key: &str, value: impl std::fmt::Display) {
    output.push_str(&format!("  {key:<20} {value}\n"));
}

fn render_config_human(config: &ProjectConfig, config_path: Option<&Path>) -> String {
    let mut output = String::new();
    output.push_str("Workflow\n");
    push_kv(&mut output, "program", &config.workflow.program);
    if config.workflow.args.is_empty() {
        push_kv(&mut output, "args", "(none)");
    } else {
        push_kv(&mut output, "args", config.workflow.args.join(", "));
    }
    push_kv(&mut output, "max_concurrency", config.workflow.max_concurrency);
    push_kv(&mut output, "db_path", config.workflow.db_path.display());
    push_kv(&mut output, "prompt_label", &config.workflow.prompt_label);
    output.push('\n');

    output.push_str("Supervisor\n");
    push_kv(&mut output, "max_attempts", config.supervisor.max_attempts);
    push_kv(&mut output, "backoff", format!("{}s", config.supervisor.backoff_secs));
    output.push('\n');

    output.push_str("Snapshot\n");
    push_kv(&mut output, "interval", format!("{}s", config.snapshot.interval().as_secs()));
    push_kv(&mut output, "tick", format!("{}s", config.snapshot.tick().as_secs()));
    output.push('\n');

    output.push_str("Dashboard\n");
    push_kv(&mut output, "enabled", config.dashboard.enabled);
    push_kv(&mut output, "generated_dir", config.generated_dir.display());
    output.push('\n');

    output.push_str("Source Path\n");
    push_kv(&mut output, "path", config_source_label(config_path));

    output
}

fn render_config_json(config: &ProjectConfig, config_path: Option<&Path>) -> Result<String> {
    let payload = serde_json::json!({
        "workflow": &config.workflow,
        "supervisor": &config.supervisor,
        "snapshot": {
            "interval_secs": config.snapshot.interval().as_secs(),
            "tick_secs": config.snapshot.tick().as_secs()
        },
        "dashboard": &config.dashboard,
        "generated_dir": &config.generated_dir,
        "source_path": config_source_label(config_path)
    });

    serde_json::to_string_pretty(&payload).context("failed to serialize config to JSON")
}

/// `--db` wins over the configured path; both anchor at the repo root.
fn workflow_db(repo_root: &Path, flag: Option<&Path>, config: &ProjectConfig) -> PathBuf {
    resolve_under(repo_root, flag.unwrap_or(config.workflow.db_path.as_path()))
}

/// Process exit status for a finished session.
fn exit_status(state: WorkflowState) -> u8 {
    match state {
        WorkflowState::Finished => 0,
        WorkflowState::Cancelled => 2,
        WorkflowState::WaitingApproval => 3,
        _ => 1,
    }
}

fn summary_line(outcome: &SessionOutcome) -> String {
    let result = &outcome.result;
    let mut line = format!(
        "shepherd: {} after {} attempt(s), last exit code {}",
        result.state, result.attempts, result.exit_code
    );
    if let Some(label) = &result.status_label {
        line.push_str(&format!(", status {label}"));
    }
    if outcome.interrupted {
        line.push_str(", interrupted");
    }
    if let Some(path) = &outcome.issue_draft {
        line.push_str(&format!(
            ", {} issue(s) drafted in {}",
            outcome.issue_count,
            path.display()
        ));
    }
    line
}

async fn interrupted() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("cannot listen for ctrl-c: {e}");
        std::future::pending::<()>().await;
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let full_screen = match &cli.command {
        Command::Run { no_dashboard, .. } => !no_dashboard && std::io::stdout().is_terminal(),
        _ => false,
    };
    let is_config_command = matches!(&cli.command, Command::Config { .. });

    let filter = match cli.verbose {
        0 if is_config_command || full_screen => "shepherd=warn",
        0 => "shepherd=info",
        1 => "shepherd=debug",
        _ => "shepherd=trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cwd = std::env::current_dir().context("failed to get current directory (was it deleted?)")?;
    let (config, config_path) = ProjectConfig::load(&cwd)?;
    if !is_config_command || cli.verbose > 0 {
        match config_path {
            Some(ref p) => info!("loaded config from {}", p.display()),
            None => info!("no .shepherd/config.toml found, using defaults"),
        }
    }
    let repo_root = resolve_repo_root(&cwd);

    match cli.command {
        Command::Config { json } => {
            if json {
                println!("{}", render_config_json(&config, config_path.as_deref())?);
            } else {
                print!("{}", render_config_human(&config, config_path.as_deref()));
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Snapshot { run_id, db } => {
            let db_path = workflow_db(&repo_root, db.as_deref(), &config);
            let rows = Arc::new(SqliteRowSource::new(db_path));
            let mut collector =
                SnapshotCollector::new(run_id, rows).with_git(GitDeltaTracker::new(repo_root));
            collector.maybe_emit(true).await;
            if let Some(report) = collector.latest_report() {
                print!("{report}");
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Run {
            run_id,
            db,
            label,
            no_dashboard,
            interval_secs,
            max_concurrency,
        } => {
            let run_id = run_id.unwrap_or_else(generate_run_id);
            let db_path = workflow_db(&repo_root, db.as_deref(), &config);
            let report_interval = interval_secs
                .map(Duration::from_secs)
                .unwrap_or_else(|| config.snapshot.interval());

            let session = RunSession {
                run_id: run_id.clone(),
                repo_root: repo_root.clone(),
                db_path: db_path.clone(),
                prompt_label: label.unwrap_or_else(|| config.workflow.prompt_label.clone()),
                report_interval,
                dashboard_enabled: config.dashboard.enabled && !no_dashboard,
                generated_dir: resolve_under(&repo_root, &config.generated_dir),
                tick: config.snapshot.tick(),
            };
            let launcher = CommandLauncher::new(LaunchSpec {
                program: config.workflow.program.clone(),
                args: config.workflow.args.clone(),
                work_dir: repo_root.clone(),
                run_id: run_id.clone(),
                max_concurrency: max_concurrency.unwrap_or(config.workflow.max_concurrency),
                env: vec![("SHEPHERD_SUPERVISED".to_string(), "1".to_string())],
                env_remove: STRIPPED_ENV.iter().map(|s| s.to_string()).collect(),
            });
            let supervisor = SupervisorConfig {
                max_attempts: config.supervisor.max_attempts,
                backoff: Duration::from_secs(config.supervisor.backoff_secs),
            };

            info!(run_id = %run_id, db = %db_path.display(), "starting supervised run");
            let dashboard = Dashboard::start(session.dashboard_enabled);
            let outcome = run_session(
                session,
                supervisor,
                Arc::new(launcher),
                Arc::new(SqliteRowSource::new(db_path)),
                dashboard,
                interrupted(),
            )
            .await;

            println!("{}", summary_line(&outcome));
            Ok(ExitCode::from(exit_status(outcome.result.state)))
        }
    }
}

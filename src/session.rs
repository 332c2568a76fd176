//! One supervised run, end to end.
//!
//! [`Monitor`] holds all per-run state (event log, issue notes, snapshot
//! collector, execution log) and exposes the narrow surface an embedding
//! orchestrator needs: feed a line, read the latest snapshot, stop.
//! [`run_session`] is the driver: it launches the supervisor, applies its
//! events as they arrive, ticks the snapshot collector, and cleans up on
//! every exit path.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{info, warn};
use uuid::Uuid;

use crate::dashboard::{Dashboard, DashboardView};
use crate::detector::{IssueDetector, IssueNote};
use crate::events::{EventLine, EventLog, EventTag};
use crate::git::GitDeltaTracker;
use crate::issues::{DraftContext, write_issue_draft};
use crate::log::{ExecutionLog, LogEvent};
use crate::paths::execution_log_path;
use crate::snapshot::{RowSource, Snapshot, SnapshotCollector};
use crate::supervisor::{
    AttemptLauncher, NO_EXIT_CODE, ProcessSupervisor, SupervisorConfig, SupervisorEvent,
    SupervisorResult, WorkflowState,
};

/// Identity and settings of one supervised execution. Fixed for the run.
#[derive(Debug, Clone)]
pub struct RunSession {
    pub run_id: String,
    pub repo_root: PathBuf,
    pub db_path: PathBuf,
    pub prompt_label: String,
    /// Minimum spacing between unforced snapshots.
    pub report_interval: Duration,
    pub dashboard_enabled: bool,
    pub generated_dir: PathBuf,
    /// How often the snapshot timer fires.
    pub tick: Duration,
}

/// `run-` plus a short random suffix.
pub fn generate_run_id() -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!("run-{}", &id[..12])
}

/// What a single update added, for the presentation layer.
#[derive(Debug, Clone, Default)]
pub struct Applied {
    pub line: Option<EventLine>,
    pub issue: Option<IssueNote>,
}

/// Per-run state. Nothing here is global, so several runs can coexist.
pub struct Monitor {
    session: RunSession,
    max_attempts: u32,
    events: EventLog,
    issues: IssueDetector,
    collector: SnapshotCollector,
    state: WorkflowState,
    attempt: u32,
    last_exit_code: Option<i32>,
    log: Option<ExecutionLog>,
}

impl Monitor {
    pub fn new(session: RunSession, rows: Arc<dyn RowSource>, max_attempts: u32) -> Self {
        let collector = SnapshotCollector::new(session.run_id.clone(), rows)
            .with_git(GitDeltaTracker::new(session.repo_root.clone()))
            .with_interval(session.report_interval);

        let log_path = execution_log_path(&session.generated_dir, &session.run_id);
        let log = match ExecutionLog::open(&log_path, session.run_id.clone()) {
            Ok(log) => Some(log),
            Err(e) => {
                warn!("execution log disabled: {e:#}");
                None
            }
        };

        let mut monitor = Self {
            session,
            max_attempts,
            events: EventLog::default(),
            issues: IssueDetector::default(),
            collector,
            state: WorkflowState::Run,
            attempt: 0,
            last_exit_code: None,
            log,
        };
        monitor.log_event(LogEvent::SessionStarted {
            repo_root: monitor.session.repo_root.display().to_string(),
            db_path: monitor.session.db_path.display().to_string(),
            prompt_label: monitor.session.prompt_label.clone(),
        });
        monitor
    }

    pub fn session(&self) -> &RunSession {
        &self.session
    }

    pub fn state(&self) -> WorkflowState {
        self.state
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    pub fn issues(&self) -> &IssueDetector {
        &self.issues
    }

    pub fn latest_snapshot(&self) -> Option<&Snapshot> {
        self.collector.latest()
    }

    pub fn latest_report(&self) -> Option<&str> {
        self.collector.latest_report()
    }

    fn log_event(&mut self, event: LogEvent) {
        let Some(log) = self.log.as_mut() else {
            return;
        };
        if let Err(e) = log.record(&event) {
            warn!("execution log write failed: {e:#}");
        }
    }

    /// Record a line and run it through issue detection.
    pub fn feed_line(&mut self, tag: EventTag, text: impl Into<String>) -> Applied {
        let line = self.events.push(tag, text);
        let issue = self.issues.observe(&line.text);
        if let Some(note) = &issue {
            self.log_event(LogEvent::IssueDetected {
                line: note.source_line.clone(),
                suggestion: note.suggestion.clone(),
            });
        }
        Applied {
            line: Some(line),
            issue,
        }
    }

    /// Record a bookkeeping line that is never treated as an issue.
    pub fn note(&mut self, tag: EventTag, text: impl Into<String>) -> Applied {
        Applied {
            line: Some(self.events.push(tag, text)),
            issue: None,
        }
    }

    pub fn apply(&mut self, event: SupervisorEvent) -> Applied {
        match event {
            SupervisorEvent::Line { stream, text } => {
                let tag = match stream {
                    crate::supervisor::OutputStream::Stdout => EventTag::Stdout,
                    crate::supervisor::OutputStream::Stderr => EventTag::Stderr,
                };
                self.feed_line(tag, text)
            }
            SupervisorEvent::Notice(text) => self.feed_line(EventTag::Launcher, text),
            SupervisorEvent::AttemptStarted { attempt, mode } => {
                self.attempt = attempt;
                self.log_event(LogEvent::AttemptStarted {
                    attempt,
                    mode: mode.to_string(),
                });
                let max = self.max_attempts;
                self.note(
                    EventTag::Launcher,
                    format!("attempt {attempt}/{max} in {mode} mode"),
                )
            }
            SupervisorEvent::AttemptExited { attempt, exit_code } => {
                self.last_exit_code = Some(exit_code);
                self.log_event(LogEvent::AttemptExited { attempt, exit_code });
                Applied::default()
            }
            SupervisorEvent::StateChanged { state } => {
                self.state = state;
                self.log_event(LogEvent::StateChanged {
                    state: state.to_string(),
                });
                self.note(EventTag::Launcher, format!("state → {state}"))
            }
        }
    }

    /// Collect a snapshot if due (or forced). Returns the new report text.
    pub async fn maybe_emit_snapshot(&mut self, force: bool) -> Option<String> {
        let snapshot = self.collector.maybe_emit(force).await?.clone();
        self.log_event(LogEvent::SnapshotEmitted {
            report_total: snapshot.report_total,
            report_complete: snapshot.report_complete,
            land_merged: snapshot.land_merged,
            new_reports: snapshot.new_reports.len(),
            new_land_events: snapshot.new_land_events.len(),
            new_commits: snapshot.new_git_commits.len(),
        });
        self.events.push(
            EventTag::Snapshot,
            format!(
                "{} new reports, {} new land events, {} new commits",
                snapshot.new_reports.len(),
                snapshot.new_land_events.len(),
                snapshot.new_git_commits.len()
            ),
        );
        self.collector.latest_report().map(str::to_string)
    }

    pub fn view(&self) -> DashboardView<'_> {
        DashboardView {
            run_id: &self.session.run_id,
            prompt_label: &self.session.prompt_label,
            repo_root: &self.session.repo_root,
            state: self.state,
            attempt: self.attempt,
            max_attempts: self.max_attempts,
            last_exit_code: self.last_exit_code,
            events: &self.events,
            issues: &self.issues,
            snapshot: self.collector.latest(),
            report: self.collector.latest_report(),
        }
    }

    /// Finish the run: record the result and write an issue draft when any
    /// issues were seen.
    pub fn stop(&mut self, result: &SupervisorResult) -> Option<PathBuf> {
        self.state = result.state;
        let notes: Vec<IssueNote> = self.issues.notes().cloned().collect();
        let ctx = DraftContext {
            run_id: &self.session.run_id,
            repo_root: &self.session.repo_root,
            prompt_label: &self.session.prompt_label,
        };
        let draft = match write_issue_draft(
            &self.session.generated_dir,
            &ctx,
            &notes,
            self.collector.latest_report(),
        ) {
            Ok(path) => path,
            Err(e) => {
                warn!("failed to write issue draft: {e:#}");
                None
            }
        };

        if let Some(path) = &draft {
            self.log_event(LogEvent::IssueDraftWritten {
                path: path.display().to_string(),
            });
        }
        self.log_event(LogEvent::SessionEnded {
            state: result.state.to_string(),
            attempts: result.attempts,
            exit_code: result.exit_code,
            status_label: result.status_label.clone(),
        });
        draft
    }
}

/// How a session ended.
#[derive(Debug, Clone)]
pub struct SessionOutcome {
    pub result: SupervisorResult,
    /// The operator stopped the session before the workflow exited.
    pub interrupted: bool,
    pub issue_draft: Option<PathBuf>,
    pub issue_count: usize,
}

/// Upper bound on events applied between two renders, so timer ticks and
/// shutdown still get polled under a flood of output.
const MAX_EVENT_BATCH: usize = 512;

/// Apply `first` plus whatever is already queued (up to the batch limit),
/// then render once. Returns how many events were applied.
fn absorb_batch(
    monitor: &mut Monitor,
    dashboard: &mut Dashboard,
    first: SupervisorEvent,
    rx: &mut mpsc::UnboundedReceiver<SupervisorEvent>,
) -> usize {
    let mut applied_count = 0;
    let mut next = Some(first);
    while let Some(event) = next {
        let applied = monitor.apply(event);
        present(dashboard, &applied);
        applied_count += 1;
        next = if applied_count < MAX_EVENT_BATCH {
            rx.try_recv().ok()
        } else {
            None
        };
    }
    dashboard.render(&monitor.view());
    applied_count
}

fn present(dashboard: &mut Dashboard, applied: &Applied) {
    if let Some(line) = &applied.line {
        dashboard.on_event_line(line);
    }
    if let Some(note) = &applied.issue {
        dashboard.on_issue(note);
    }
}

/// Supervise one workflow run until it reaches a terminal state or
/// `shutdown` resolves.
pub async fn run_session(
    session: RunSession,
    supervisor: SupervisorConfig,
    launcher: Arc<dyn AttemptLauncher>,
    rows: Arc<dyn RowSource>,
    mut dashboard: Dashboard,
    shutdown: impl Future<Output = ()>,
) -> SessionOutcome {
    let tick = session.tick;
    let mut monitor = Monitor::new(session, rows, supervisor.max_attempts);

    let intro = format!(
        "run {} in {} (db {})",
        monitor.session().run_id,
        monitor.session().repo_root.display(),
        monitor.session().db_path.display()
    );
    let applied = monitor.note(EventTag::Bootstrap, intro);
    present(&mut dashboard, &applied);
    if let Some(report) = monitor.maybe_emit_snapshot(true).await {
        dashboard.on_snapshot(&report);
    }
    dashboard.render(&monitor.view());

    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut task = tokio::spawn(ProcessSupervisor::new(supervisor, launcher, tx).run());

    let mut ticker = tokio::time::interval_at(Instant::now() + tick, tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tokio::pin!(shutdown);

    let (result, interrupted) = loop {
        tokio::select! {
            Some(event) = rx.recv() => {
                absorb_batch(&mut monitor, &mut dashboard, event, &mut rx);
            }
            _ = ticker.tick() => {
                if let Some(report) = monitor.maybe_emit_snapshot(false).await {
                    dashboard.on_snapshot(&report);
                }
                dashboard.render(&monitor.view());
            }
            joined = &mut task => {
                let result = match joined {
                    Ok(result) => result,
                    Err(e) => {
                        warn!("supervisor task ended abnormally: {e}");
                        SupervisorResult {
                            state: WorkflowState::Failed,
                            attempts: monitor.attempt,
                            exit_code: monitor.last_exit_code.unwrap_or(NO_EXIT_CODE),
                            status_label: None,
                        }
                    }
                };
                break (result, false);
            }
            _ = &mut shutdown => {
                task.abort();
                let _ = (&mut task).await;
                break (
                    SupervisorResult {
                        state: WorkflowState::Cancelled,
                        attempts: monitor.attempt,
                        exit_code: monitor.last_exit_code.unwrap_or(NO_EXIT_CODE),
                        status_label: None,
                    },
                    true,
                );
            }
        }
    };
    drop(ticker);

    while let Ok(event) = rx.try_recv() {
        let applied = monitor.apply(event);
        present(&mut dashboard, &applied);
    }
    if interrupted {
        let applied = monitor.note(EventTag::Launcher, "stopped by operator");
        present(&mut dashboard, &applied);
    }

    if let Some(report) = monitor.maybe_emit_snapshot(true).await {
        dashboard.on_snapshot(&report);
    }
    dashboard.render(&monitor.view());

    let issue_draft = monitor.stop(&result);
    if let Some(path) = &issue_draft {
        let applied = monitor.note(
            EventTag::Launcher,
            format!("issue draft written to {}", path.display()),
        );
        present(&mut dashboard, &applied);
    }
    dashboard.shutdown();

    info!(
        state = %result.state,
        attempts = result.attempts,
        exit_code = result.exit_code,
        "session finished"
    );
    SessionOutcome {
        issue_count: monitor.issues().len(),
        result,
        interrupted,
        issue_draft,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::RowSet;
    use crate::supervisor::{OutputStream, RunMode};

    struct NoRows;

    impl RowSource for NoRows {
        fn load(&self, _run_id: &str) -> RowSet {
            RowSet::default()
        }
    }

    fn monitor(root: &std::path::Path) -> Monitor {
        let session = RunSession {
            run_id: "run-unit".to_string(),
            repo_root: root.to_path_buf(),
            db_path: root.join("wf.db"),
            prompt_label: "unit".to_string(),
            report_interval: Duration::from_secs(300),
            dashboard_enabled: false,
            generated_dir: root.join("gen"),
            tick: Duration::from_secs(10),
        };
        Monitor::new(session, Arc::new(NoRows), 5)
    }

    #[test]
    fn run_ids_are_prefixed_and_unique() {
        let a = generate_run_id();
        let b = generate_run_id();
        assert!(a.starts_with("run-"));
        assert_eq!(a.len(), "run-".len() + 12);
        assert_ne!(a, b);
    }

    #[test]
    fn failed_state_is_not_an_issue() {
        let tmp = tempfile::tempdir().unwrap();
        let mut m = monitor(tmp.path());

        let applied = m.apply(SupervisorEvent::StateChanged {
            state: WorkflowState::Failed,
        });
        assert!(applied.issue.is_none());
        assert_eq!(m.state(), WorkflowState::Failed);
        assert!(m.issues().is_empty());

        let applied = m.apply(SupervisorEvent::Line {
            stream: OutputStream::Stderr,
            text: "merge conflict in src/lib.rs: failed".to_string(),
        });
        let note = applied.issue.expect("flagged");
        assert!(note.suggestion.to_lowercase().contains("conflict"));
        assert_eq!(applied.line.unwrap().tag, EventTag::Stderr);
        assert_eq!(m.issues().len(), 1);
    }

    #[test]
    fn attempt_events_update_view() {
        let tmp = tempfile::tempdir().unwrap();
        let mut m = monitor(tmp.path());

        m.apply(SupervisorEvent::AttemptStarted {
            attempt: 2,
            mode: RunMode::Resume,
        });
        m.apply(SupervisorEvent::AttemptExited {
            attempt: 2,
            exit_code: 7,
        });
        let view = m.view();
        assert_eq!(view.attempt, 2);
        assert_eq!(view.max_attempts, 5);
        assert_eq!(view.last_exit_code, Some(7));
        assert!(
            m.events()
                .lines()
                .any(|l| l.text == "attempt 2/5 in resume mode")
        );
    }

    #[tokio::test]
    async fn forced_snapshot_is_recorded() {
        let tmp = tempfile::tempdir().unwrap();
        let mut m = monitor(tmp.path());
        assert!(m.latest_snapshot().is_none());

        let report = m.maybe_emit_snapshot(true).await.expect("forced");
        assert!(report.contains("run-unit"));
        assert!(m.latest_report().is_some());
        assert!(m.maybe_emit_snapshot(false).await.is_none());
        assert!(m.events().lines().any(|l| l.tag == EventTag::Snapshot));
    }

    #[test]
    fn queued_events_share_one_render() {
        let tmp = tempfile::tempdir().unwrap();
        let mut m = monitor(tmp.path());
        let mut dashboard = Dashboard::plain(Box::new(std::io::sink()));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let total = MAX_EVENT_BATCH + 100;
        for n in 0..total {
            tx.send(SupervisorEvent::Line {
                stream: OutputStream::Stdout,
                text: format!("line {n}"),
            })
            .unwrap();
        }

        let first = rx.try_recv().unwrap();
        let applied = absorb_batch(&mut m, &mut dashboard, first, &mut rx);
        assert_eq!(applied, MAX_EVENT_BATCH);
        assert_eq!(dashboard.render_count(), 1);

        let first = rx.try_recv().unwrap();
        let applied = absorb_batch(&mut m, &mut dashboard, first, &mut rx);
        assert_eq!(applied, 100);
        assert_eq!(dashboard.render_count(), 2);
        assert!(rx.try_recv().is_err());
        assert_eq!(
            m.events().lines().last().map(|l| l.text.as_str()),
            Some(format!("line {}", total - 1).as_str())
        );
    }

    #[test]
    fn stop_without_issues_writes_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let mut m = monitor(tmp.path());
        let result = SupervisorResult {
            state: WorkflowState::Finished,
            attempts: 1,
            exit_code: 0,
            status_label: None,
        };
        assert!(m.stop(&result).is_none());
        let log = std::fs::read_to_string(tmp.path().join("gen/logs/run-unit.jsonl")).unwrap();
        assert!(log.contains("session_ended"));
    }
}

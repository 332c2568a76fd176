//! Throttled snapshot collection.
//!
//! A snapshot is an aggregate-plus-delta view of the workflow's progress:
//! totals are recomputed from the full current row set on every read, while
//! the `new_*` lists hold only rows whose composite key has never been seen
//! before in this session. Reads are throttled so a chatty ticker cannot
//! hammer the database.

pub mod report;
pub mod store;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local};
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::git::GitDeltaTracker;
pub use report::{progress_bar, render_report};
pub use store::{LandRow, ReportRow, RowSet, RowSource, SqliteRowSource};

/// Default spacing between snapshots.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(5 * 60);
/// Snapshots are never taken more often than this, whatever the config says.
pub const MIN_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    pub taken_at: DateTime<Local>,
    pub report_total: usize,
    pub report_complete: usize,
    pub report_blocked: usize,
    pub land_total: usize,
    pub land_merged: usize,
    pub land_evicted: usize,
    pub new_reports: Vec<ReportRow>,
    pub new_land_events: Vec<LandRow>,
    pub new_git_commits: Vec<String>,
}

impl Snapshot {
    pub fn empty() -> Self {
        Self {
            taken_at: Local::now(),
            report_total: 0,
            report_complete: 0,
            report_blocked: 0,
            land_total: 0,
            land_merged: 0,
            land_evicted: 0,
            new_reports: Vec::new(),
            new_land_events: Vec::new(),
            new_git_commits: Vec::new(),
        }
    }

    fn totals(rows: &RowSet) -> Self {
        Self {
            report_total: rows.reports.len(),
            report_complete: rows
                .reports
                .iter()
                .filter(|r| r.status == "complete")
                .count(),
            report_blocked: rows
                .reports
                .iter()
                .filter(|r| r.status == "blocked")
                .count(),
            land_total: rows.lands.len(),
            land_merged: rows.lands.iter().filter(|l| l.merged).count(),
            land_evicted: rows.lands.iter().filter(|l| l.evicted).count(),
            ..Self::empty()
        }
    }
}

/// Keep rows whose key is new, recording them as seen.
fn take_unseen<T: Clone>(
    rows: &[T],
    seen: &mut HashSet<String>,
    key: impl Fn(&T) -> String,
) -> Vec<T> {
    rows.iter()
        .filter(|row| seen.insert(key(row)))
        .cloned()
        .collect()
}

/// Produces snapshots for one run. Owns the seen-key sets and the git
/// baseline, so separate sessions never share dedup state.
pub struct SnapshotCollector {
    run_id: String,
    source: Arc<dyn RowSource>,
    git: Option<GitDeltaTracker>,
    interval: Duration,
    last_emitted: Option<Instant>,
    seen_reports: HashSet<String>,
    seen_lands: HashSet<String>,
    latest: Option<Snapshot>,
    latest_report: Option<String>,
}

impl SnapshotCollector {
    pub fn new(run_id: impl Into<String>, source: Arc<dyn RowSource>) -> Self {
        Self {
            run_id: run_id.into(),
            source,
            git: None,
            interval: DEFAULT_INTERVAL,
            last_emitted: None,
            seen_reports: HashSet::new(),
            seen_lands: HashSet::new(),
            latest: None,
            latest_report: None,
        }
    }

    /// Track commits in this repository alongside database rows.
    pub fn with_git(mut self, tracker: GitDeltaTracker) -> Self {
        self.git = Some(tracker);
        self
    }

    /// Set the throttle interval; values below [`MIN_INTERVAL`] are raised.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval.max(MIN_INTERVAL);
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn latest(&self) -> Option<&Snapshot> {
        self.latest.as_ref()
    }

    pub fn latest_report(&self) -> Option<&str> {
        self.latest_report.as_deref()
    }

    fn due(&self, now: Instant) -> bool {
        match self.last_emitted {
            None => true,
            Some(last) => now.duration_since(last) >= self.interval,
        }
    }

    /// Take a snapshot if forced or if the interval has elapsed.
    ///
    /// Returns the new snapshot, or `None` when throttled.
    pub async fn maybe_emit(&mut self, force: bool) -> Option<&Snapshot> {
        let now = Instant::now();
        if !force && !self.due(now) {
            return None;
        }
        self.last_emitted = Some(now);

        let rows = self.read_rows().await;
        let mut snapshot = Snapshot::totals(&rows);
        snapshot.new_reports = take_unseen(&rows.reports, &mut self.seen_reports, ReportRow::key);
        snapshot.new_land_events = take_unseen(&rows.lands, &mut self.seen_lands, LandRow::key);
        if let Some(git) = self.git.as_mut() {
            snapshot.new_git_commits = git.check().await;
        }

        debug!(
            run_id = %self.run_id,
            reports = snapshot.report_total,
            lands = snapshot.land_total,
            new_reports = snapshot.new_reports.len(),
            new_lands = snapshot.new_land_events.len(),
            new_commits = snapshot.new_git_commits.len(),
            "snapshot collected"
        );

        self.latest_report = Some(render_report(&self.run_id, &snapshot));
        self.latest = Some(snapshot);
        self.latest.as_ref()
    }

    async fn read_rows(&self) -> RowSet {
        let source = Arc::clone(&self.source);
        let run_id = self.run_id.clone();
        match tokio::task::spawn_blocking(move || source.load(&run_id)).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!(run_id = %self.run_id, "snapshot read task failed: {e}");
                RowSet::default()
            }
        }
    }
}

//! Per-run JSONL journal.
//!
//! One file per run id under `<generated>/logs/`. Each record carries the
//! wall-clock time, the run id, and one [`LogEvent`]; reopening the same run
//! appends.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use tracing::trace;

#[derive(Debug, Clone, Serialize)]
pub struct LogRecord<'a> {
    /// RFC 3339, millisecond precision, UTC.
    pub ts: String,
    pub run_id: &'a str,
    #[serde(flatten)]
    pub event: &'a LogEvent,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LogEvent {
    SessionStarted {
        repo_root: String,
        db_path: String,
        prompt_label: String,
    },
    AttemptStarted {
        attempt: u32,
        mode: String,
    },
    AttemptExited {
        attempt: u32,
        exit_code: i32,
    },
    StateChanged {
        state: String,
    },
    IssueDetected {
        line: String,
        suggestion: String,
    },
    SnapshotEmitted {
        report_total: usize,
        report_complete: usize,
        land_merged: usize,
        new_reports: usize,
        new_land_events: usize,
        new_commits: usize,
    },
    IssueDraftWritten {
        path: String,
    },
    SessionEnded {
        state: String,
        attempts: u32,
        exit_code: i32,
        status_label: Option<String>,
    },
}

pub struct ExecutionLog {
    run_id: String,
    path: PathBuf,
    out: BufWriter<File>,
}

impl ExecutionLog {
    pub fn open(path: &Path, run_id: impl Into<String>) -> Result<Self> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).with_context(|| format!("cannot create {}", dir.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("cannot open execution log {}", path.display()))?;
        Ok(Self {
            run_id: run_id.into(),
            path: path.to_path_buf(),
            out: BufWriter::new(file),
        })
    }

    /// Append one record and flush, so the file is current if we crash.
    pub fn record(&mut self, event: &LogEvent) -> Result<()> {
        let record = LogRecord {
            ts: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            run_id: &self.run_id,
            event,
        };
        let line = serde_json::to_string(&record).context("cannot encode log record")?;
        trace!(record = %line, "journal");
        writeln!(self.out, "{line}")
            .and_then(|_| self.out.flush())
            .with_context(|| format!("cannot write {}", self.path.display()))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

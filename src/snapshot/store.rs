//! Read-only access to the workflow database.
//!
//! The supervised process owns the schema and writes `report` and `land`
//! rows as it progresses. This side only ever opens the file read-only, and
//! treats a missing file or a missing table as "no rows yet".

use std::path::{Path, PathBuf};

use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags};
use serde::Serialize;
use tracing::debug;

/// A `report` row: one node's status at one iteration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportRow {
    pub node_id: String,
    pub iteration: i64,
    pub status: String,
    pub summary: String,
}

/// A `land` row: one node's merge-queue outcome at one iteration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LandRow {
    pub node_id: String,
    pub iteration: i64,
    pub merged: bool,
    pub evicted: bool,
    pub summary: String,
}

/// `"<node_id>:<iteration>"`, the dedup unit for incremental delivery.
pub fn composite_key(node_id: &str, iteration: i64) -> String {
    format!("{node_id}:{iteration}")
}

impl ReportRow {
    pub fn key(&self) -> String {
        composite_key(&self.node_id, self.iteration)
    }
}

impl LandRow {
    pub fn key(&self) -> String {
        composite_key(&self.node_id, self.iteration)
    }
}

/// Every row currently visible for a run, newest iteration first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowSet {
    pub reports: Vec<ReportRow>,
    pub lands: Vec<LandRow>,
}

/// Something that can produce the current rows for a run.
///
/// Implementations must not fail: unavailable data is an empty set.
pub trait RowSource: Send + Sync {
    fn load(&self, run_id: &str) -> RowSet;
}

/// Rows read from the workflow's SQLite database.
#[derive(Debug, Clone)]
pub struct SqliteRowSource {
    path: PathBuf,
}

impl SqliteRowSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open(&self) -> Option<Connection> {
        if !self.path.exists() {
            debug!(db = %self.path.display(), "workflow database not created yet");
            return None;
        }
        match Connection::open_with_flags(
            &self.path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        ) {
            Ok(conn) => Some(conn),
            Err(e) => {
                debug!(db = %self.path.display(), "failed to open workflow database: {e}");
                None
            }
        }
    }
}

impl RowSource for SqliteRowSource {
    fn load(&self, run_id: &str) -> RowSet {
        let Some(conn) = self.open() else {
            return RowSet::default();
        };

        let reports = query_reports(&conn, run_id).unwrap_or_else(|e| {
            debug!(run_id, "report table unavailable: {e}");
            Vec::new()
        });
        let lands = query_lands(&conn, run_id).unwrap_or_else(|e| {
            debug!(run_id, "land table unavailable: {e}");
            Vec::new()
        });

        RowSet { reports, lands }
    }
}

fn query_reports(conn: &Connection, run_id: &str) -> rusqlite::Result<Vec<ReportRow>> {
    let mut stmt = conn.prepare(
        "SELECT node_id, iteration, COALESCE(status, ''), COALESCE(summary, '') \
         FROM report WHERE run_id = ?1 ORDER BY iteration DESC",
    )?;
    let rows = stmt.query_map([run_id], |row| {
        Ok(ReportRow {
            node_id: row.get(0)?,
            iteration: row.get(1)?,
            status: row.get(2)?,
            summary: row.get(3)?,
        })
    })?;
    rows.collect()
}

fn query_lands(conn: &Connection, run_id: &str) -> rusqlite::Result<Vec<LandRow>> {
    let mut stmt = conn.prepare(
        "SELECT node_id, iteration, merged, evicted, COALESCE(summary, '') \
         FROM land WHERE run_id = ?1 ORDER BY iteration DESC",
    )?;
    let rows = stmt.query_map([run_id], |row| {
        Ok(LandRow {
            node_id: row.get(0)?,
            iteration: row.get(1)?,
            merged: truthy(row.get_ref(2)?),
            evicted: truthy(row.get_ref(3)?),
            summary: row.get(4)?,
        })
    })?;
    rows.collect()
}

/// SQLite has no boolean type; writers store 0/1, `true`/`false`, or NULL.
fn truthy(value: ValueRef<'_>) -> bool {
    match value {
        ValueRef::Null => false,
        ValueRef::Integer(n) => n != 0,
        ValueRef::Real(f) => f != 0.0,
        ValueRef::Text(t) => {
            let text = String::from_utf8_lossy(t).trim().to_ascii_lowercase();
            matches!(text.as_str(), "1" | "true" | "yes")
        }
        ValueRef::Blob(b) => !b.is_empty(),
    }
}

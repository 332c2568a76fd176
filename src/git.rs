//! Commit delta tracking for the supervised repository.
//!
//! The tracker remembers the last observed `HEAD` and, on each check, reports
//! the one-line summaries of commits added since then. Version control is
//! optional: a missing `git` binary or a non-repository directory simply
//! yields no commits.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};

use anyhow::{Context, Result, bail};
use tracing::debug;

async fn run_git<I, S>(repo_root: &Path, args: I) -> Result<Output>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    tokio::process::Command::new("git")
        .current_dir(repo_root)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .await
        .with_context(|| format!("failed to run git in {}", repo_root.display()))
}

/// Resolve `HEAD` to a full commit hash.
pub async fn head_revision(repo_root: &Path) -> Result<String> {
    let output = run_git(repo_root, ["rev-parse", "HEAD"]).await?;
    if !output.status.success() {
        bail!(
            "failed to resolve HEAD: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }

    let commit = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if commit.is_empty() {
        bail!("git rev-parse returned empty commit for HEAD");
    }
    Ok(commit)
}

/// One-line summaries for `from..to`, newest first, blank lines dropped.
pub async fn commit_summaries(repo_root: &Path, from: &str, to: &str) -> Result<Vec<String>> {
    let range = format!("{from}..{to}");
    let output = run_git(repo_root, ["log", "--format=%h %s", range.as_str()]).await?;
    if !output.status.success() {
        bail!(
            "git log {range} failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }

    Ok(String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}

/// Tracks `HEAD` across checks and reports newly added commits.
#[derive(Debug, Clone)]
pub struct GitDeltaTracker {
    repo_root: PathBuf,
    last_head: Option<String>,
}

impl GitDeltaTracker {
    pub fn new(repo_root: impl Into<PathBuf>) -> Self {
        Self {
            repo_root: repo_root.into(),
            last_head: None,
        }
    }

    pub fn last_head(&self) -> Option<&str> {
        self.last_head.as_deref()
    }

    /// Commits added since the previous check, newest first.
    ///
    /// The first successful read only records a baseline. The stored head
    /// advances even when the log query itself fails.
    pub async fn check(&mut self) -> Vec<String> {
        let head = match head_revision(&self.repo_root).await {
            Ok(head) => head,
            Err(e) => {
                debug!(repo = %self.repo_root.display(), "git head unavailable: {e:#}");
                return Vec::new();
            }
        };

        let Some(previous) = self.last_head.replace(head.clone()) else {
            return Vec::new();
        };
        if previous == head {
            return Vec::new();
        }

        match commit_summaries(&self.repo_root, &previous, &head).await {
            Ok(commits) => commits,
            Err(e) => {
                debug!(repo = %self.repo_root.display(), "git log unavailable: {e:#}");
                Vec::new()
            }
        }
    }
}

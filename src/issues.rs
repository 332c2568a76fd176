//! Issue draft reports.
//!
//! When a run produced failure-looking output, a markdown draft is written
//! under `<generated-dir>/issues/` so the operator has the flagged lines,
//! remediation hints, and the latest progress report in one place.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;

use crate::detector::IssueNote;

/// Notes included in a draft, newest last.
pub const DRAFT_NOTE_LIMIT: usize = 12;

/// Session details printed at the top of a draft.
#[derive(Debug, Clone)]
pub struct DraftContext<'a> {
    pub run_id: &'a str,
    pub repo_root: &'a Path,
    pub prompt_label: &'a str,
}

pub fn issues_dir(generated_dir: &Path) -> PathBuf {
    generated_dir.join("issues")
}

fn draft_path(generated_dir: &Path) -> PathBuf {
    let dir = issues_dir(generated_dir);
    let stamp = Utc::now().format("%Y%m%dT%H%M%S%3fZ").to_string();
    let mut path = dir.join(format!("issue-{stamp}.md"));
    let mut n = 1;
    while path.exists() {
        path = dir.join(format!("issue-{stamp}-{n}.md"));
        n += 1;
    }
    path
}

/// Render the draft body.
pub fn render_draft(
    ctx: &DraftContext<'_>,
    notes: &[IssueNote],
    latest_report: Option<&str>,
) -> String {
    let recent = &notes[notes.len().saturating_sub(DRAFT_NOTE_LIMIT)..];

    let mut body = String::new();
    body.push_str(&format!("# Workflow issues: {}\n\n", ctx.run_id));
    body.push_str("## Run\n");
    body.push_str(&format!("- Run ID: `{}`\n", ctx.run_id));
    body.push_str(&format!("- Repository: `{}`\n", ctx.repo_root.display()));
    body.push_str(&format!("- Prompt: {}\n", ctx.prompt_label));
    body.push_str(&format!("- Issues recorded: {}\n", notes.len()));
    body.push('\n');

    body.push_str(&format!("## Recent issues ({})\n", recent.len()));
    for note in recent {
        body.push_str(&format!(
            "- `{}` {}\n",
            note.timestamp.format("%H:%M:%S"),
            note.source_line
        ));
    }
    body.push('\n');

    body.push_str("## Suggested fixes\n");
    let mut suggestions: Vec<&str> = Vec::new();
    for note in recent {
        if !suggestions.contains(&note.suggestion.as_str()) {
            suggestions.push(&note.suggestion);
        }
    }
    for suggestion in suggestions {
        body.push_str(&format!("- {suggestion}\n"));
    }
    body.push('\n');

    body.push_str("## Latest snapshot\n");
    match latest_report {
        Some(report) => {
            body.push_str("```text\n");
            body.push_str(report);
            if !report.ends_with('\n') {
                body.push('\n');
            }
            body.push_str("```\n");
        }
        None => body.push_str("(no snapshot collected yet)\n"),
    }
    body
}

/// Write a draft if any issues were recorded. Returns the file path, or
/// `None` without touching the filesystem when `notes` is empty.
pub fn write_issue_draft(
    generated_dir: &Path,
    ctx: &DraftContext<'_>,
    notes: &[IssueNote],
    latest_report: Option<&str>,
) -> Result<Option<PathBuf>> {
    if notes.is_empty() {
        return Ok(None);
    }

    let dir = issues_dir(generated_dir);
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create issues directory {}", dir.display()))?;

    let path = draft_path(generated_dir);
    let body = render_draft(ctx, notes, latest_report);
    std::fs::write(&path, body)
        .with_context(|| format!("failed to write issue draft {}", path.display()))?;
    Ok(Some(path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::IssueDetector;

    fn ctx(repo: &Path) -> DraftContext<'_> {
        DraftContext {
            run_id: "run-42",
            repo_root: repo,
            prompt_label: "ship tickets",
        }
    }

    #[test]
    fn no_issues_means_no_file() {
        let tmp = tempfile::tempdir().unwrap();
        let generated = tmp.path().join("generated");
        let path = write_issue_draft(&generated, &ctx(tmp.path()), &[], Some("report")).unwrap();
        assert!(path.is_none());
        assert!(!generated.exists());
    }

    #[test]
    fn draft_contains_recent_issues_and_snapshot() {
        let tmp = tempfile::tempdir().unwrap();
        let generated = tmp.path().join("generated");
        let mut detector = IssueDetector::default();
        for i in 0..15 {
            detector.observe(&format!("error: step {i} failed"));
        }
        detector.observe("ERROR: disk full");
        let notes: Vec<_> = detector.notes().cloned().collect();
        let report = "Snapshot 2026-10-19 10:00:00 (run run-42)\n  land evicted      0\n";

        let path = write_issue_draft(&generated, &ctx(tmp.path()), &notes, Some(report))
            .unwrap()
            .unwrap();
        assert!(path.starts_with(generated.join("issues")));
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("issue-") && name.ends_with(".md"), "{name}");

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("run-42"));
        assert!(content.contains("ship tickets"));
        assert!(content.contains(&tmp.path().display().to_string()));
        for note in &notes[notes.len() - DRAFT_NOTE_LIMIT..] {
            assert!(content.contains(&note.source_line), "missing {}", note.source_line);
        }
        assert!(!content.contains("error: step 3 failed"));
        assert!(content.contains(report));
        assert!(content.contains("disk is full"));
    }

    #[test]
    fn suggestions_are_listed_once() {
        let mut detector = IssueDetector::default();
        detector.observe("error: one");
        detector.observe("error: two");
        let notes: Vec<_> = detector.notes().cloned().collect();
        let body = render_draft(&ctx(Path::new("/repo")), &notes, None);
        let fixes = body.split("## Suggested fixes\n").nth(1).unwrap();
        let fixes = fixes.split("\n\n").next().unwrap();
        assert_eq!(fixes.lines().count(), 1);
        assert!(body.contains("(no snapshot collected yet)"));
    }

    #[test]
    fn repeated_drafts_do_not_overwrite() {
        let tmp = tempfile::tempdir().unwrap();
        let mut detector = IssueDetector::default();
        detector.observe("failed");
        let notes: Vec<_> = detector.notes().cloned().collect();
        let a = write_issue_draft(tmp.path(), &ctx(tmp.path()), &notes, None).unwrap().unwrap();
        let b = write_issue_draft(tmp.path(), &ctx(tmp.path()), &notes, None).unwrap().unwrap();
        assert_ne!(a, b);
    }
}

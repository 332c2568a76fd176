//! Issue detection for supervised workflow output.
//!
//! Every output line is checked against a cheap failure predicate. Lines that
//! look like failures become [`IssueNote`]s, each paired with a remediation
//! hint from an ordered rule table. Only the most recent notes are kept.

use chrono::{DateTime, Local};
use serde::Serialize;

use crate::events::Ring;

/// Maximum number of issue notes retained.
pub const ISSUE_CAPACITY: usize = 50;

const FAILURE_KEYWORDS: &[&str] = &["error", "failed", "✗", "❌"];

const DEFAULT_SUGGESTION: &str =
    "Inspect the surrounding log lines, fix the cause, and let the workflow resume.";

/// An ordered remediation rule. Matches when every needle occurs in the line
/// (case-insensitive).
struct SuggestionRule {
    needles: &'static [&'static str],
    suggestion: &'static str,
}

const RULES: &[SuggestionRule] = &[
    SuggestionRule {
        needles: &["is not valid json", "claude"],
        suggestion: "The agent answered with prose instead of JSON; check its output-format flags and resume.",
    },
    SuggestionRule {
        needles: &["unexpected token", "json"],
        suggestion: "A step produced malformed JSON; inspect the agent transcript for truncated output and resume.",
    },
    SuggestionRule {
        needles: &["database is locked"],
        suggestion: "Another writer holds the workflow database; stop stray workflow processes before resuming.",
    },
    SuggestionRule {
        needles: &["merge conflict"],
        suggestion: "A land step hit a merge conflict; rebase the node branch onto main and resume.",
    },
    SuggestionRule {
        needles: &["rate limit"],
        suggestion: "The model provider is rate limiting; wait for the window to reset, then resume.",
    },
    SuggestionRule {
        needles: &["timed out"],
        suggestion: "A step exceeded its timeout; raise the step timeout or split the ticket.",
    },
    SuggestionRule {
        needles: &["no such file or directory"],
        suggestion: "A referenced path is missing; verify the repository root and generated directory exist.",
    },
    SuggestionRule {
        needles: &["permission denied"],
        suggestion: "The workflow lacks filesystem or executable permissions; check ownership of the repo and tool binaries.",
    },
    SuggestionRule {
        needles: &["disk full"],
        suggestion: "The disk is full; free space (old worktrees, build caches) before resuming.",
    },
    SuggestionRule {
        needles: &["no space left"],
        suggestion: "The disk is full; free space (old worktrees, build caches) before resuming.",
    },
    SuggestionRule {
        needles: &["test", "failed"],
        suggestion: "Tests failed inside a node; read the failing test output and let the review loop retry.",
    },
];

/// A flagged output line plus its remediation hint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IssueNote {
    pub timestamp: DateTime<Local>,
    pub source_line: String,
    pub suggestion: String,
}

/// True when the line looks like a failure signal.
pub fn is_issue(line: &str) -> bool {
    let lower = line.to_lowercase();
    FAILURE_KEYWORDS.iter().any(|kw| lower.contains(kw))
}

/// First matching rule's hint, or the catch-all.
pub fn suggest(line: &str) -> &'static str {
    let lower = line.to_lowercase();
    RULES
        .iter()
        .find(|rule| rule.needles.iter().all(|needle| lower.contains(needle)))
        .map(|rule| rule.suggestion)
        .unwrap_or(DEFAULT_SUGGESTION)
}

/// Classifies lines and keeps the most recent issue notes.
#[derive(Debug, Clone)]
pub struct IssueDetector {
    notes: Ring<IssueNote>,
}

impl Default for IssueDetector {
    fn default() -> Self {
        Self::new(ISSUE_CAPACITY)
    }
}

impl IssueDetector {
    pub fn new(capacity: usize) -> Self {
        Self {
            notes: Ring::new(capacity),
        }
    }

    /// Inspect a line; returns the new note when it was flagged.
    pub fn observe(&mut self, line: &str) -> Option<IssueNote> {
        if !is_issue(line) {
            return None;
        }
        let note = IssueNote {
            timestamp: Local::now(),
            source_line: line.to_string(),
            suggestion: suggest(line).to_string(),
        };
        self.notes.push(note.clone());
        Some(note)
    }

    pub fn notes(&self) -> impl Iterator<Item = &IssueNote> {
        self.notes.iter()
    }

    /// The `n` most recent notes, oldest first.
    pub fn recent(&self, n: usize) -> Vec<IssueNote> {
        self.notes.tail(n).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.notes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_line_is_flagged_with_suggestion() {
        let mut detector = IssueDetector::default();
        let note = detector.observe("ERROR: disk full").unwrap();
        assert!(!note.suggestion.is_empty());
        assert!(note.suggestion.contains("disk is full"));
        assert_eq!(detector.len(), 1);
    }

    #[test]
    fn plain_line_is_not_flagged() {
        let mut detector = IssueDetector::default();
        assert!(detector.observe("node ticket-7 completed iteration 2").is_none());
        assert!(detector.is_empty());
    }

    #[test]
    fn glyph_and_failed_keywords_match() {
        assert!(is_issue("✗ lint step"));
        assert!(is_issue("Build FAILED after 3 retries"));
        assert!(is_issue("TypeError: x is undefined"));
        assert!(!is_issue("all good ✓"));
    }

    #[test]
    fn first_matching_rule_wins() {
        let line = "Error: Unexpected token 'H', \"Here is th\"... is not valid JSON (claude)";
        assert!(suggest(line).contains("prose instead of JSON"));
    }

    #[test]
    fn unmatched_issue_uses_default_hint() {
        assert_eq!(suggest("error: something odd"), DEFAULT_SUGGESTION);
    }

    #[test]
    fn keeps_only_recent_notes() {
        let mut detector = IssueDetector::default();
        for i in 0..(ISSUE_CAPACITY + 7) {
            detector.observe(&format!("error {i}"));
        }
        assert_eq!(detector.len(), ISSUE_CAPACITY);
        assert_eq!(detector.notes().next().unwrap().source_line, "error 7");
        let recent = detector.recent(2);
        assert_eq!(recent[1].source_line, format!("error {}", ISSUE_CAPACITY + 6));
    }
}

//! Rolling event log for supervised workflow output.
//!
//! Every non-blank line the child writes, plus the supervisor's own
//! bookkeeping messages, lands here as a timestamped [`EventLine`]. The log
//! is bounded: once full, the oldest line is evicted first. The same bounded
//! ring backs the issue-note buffer in [`crate::detector`].

use std::collections::VecDeque;
use std::fmt;
use std::sync::LazyLock;

use chrono::{DateTime, Local};
use regex::Regex;
use serde::Serialize;

/// Maximum number of lines retained by [`EventLog`].
pub const EVENT_LOG_CAPACITY: usize = 400;

/// Where an event line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventTag {
    Stdout,
    Stderr,
    /// Supervisor messages about attempts and state changes.
    Launcher,
    /// Session setup messages emitted before the first attempt.
    Bootstrap,
    Snapshot,
}

impl EventTag {
    pub fn label(self) -> &'static str {
        match self {
            EventTag::Stdout => "stdout",
            EventTag::Stderr => "stderr",
            EventTag::Launcher => "launcher",
            EventTag::Bootstrap => "bootstrap",
            EventTag::Snapshot => "snapshot",
        }
    }
}

impl fmt::Display for EventTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One timestamped line in the event log.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventLine {
    pub timestamp: DateTime<Local>,
    pub tag: EventTag,
    pub text: String,
}

impl EventLine {
    pub fn new(tag: EventTag, text: impl Into<String>) -> Self {
        Self {
            timestamp: Local::now(),
            tag,
            text: text.into(),
        }
    }

    /// `[HH:MM:SS] tag: text`
    pub fn display(&self) -> String {
        format!(
            "[{}] {}: {}",
            self.timestamp.format("%H:%M:%S"),
            self.tag,
            self.text
        )
    }
}

/// Fixed-capacity FIFO ring. Appends past capacity evict from the front.
#[derive(Debug, Clone)]
pub struct Ring<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T> Ring<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, item: T) {
        if self.capacity == 0 {
            return;
        }
        while self.items.len() >= self.capacity {
            self.items.pop_front();
        }
        self.items.push_back(item);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Oldest to newest.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> + ExactSizeIterator {
        self.items.iter()
    }

    /// The `n` newest items, oldest first.
    pub fn tail(&self, n: usize) -> impl Iterator<Item = &T> {
        self.items.iter().skip(self.items.len().saturating_sub(n))
    }
}

/// Bounded log of recent output and bookkeeping lines.
#[derive(Debug, Clone)]
pub struct EventLog {
    lines: Ring<EventLine>,
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new(EVENT_LOG_CAPACITY)
    }
}

impl EventLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: Ring::new(capacity),
        }
    }

    /// Append a line and return a copy of what was stored.
    pub fn push(&mut self, tag: EventTag, text: impl Into<String>) -> EventLine {
        let line = EventLine::new(tag, text);
        self.lines.push(line.clone());
        line
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn lines(&self) -> impl Iterator<Item = &EventLine> {
        self.lines.iter()
    }

    pub fn tail(&self, n: usize) -> impl Iterator<Item = &EventLine> {
        self.lines.tail(n)
    }
}

/// Remove ANSI escape sequences from a line of child output.
pub fn strip_ansi(input: &str) -> String {
    // CSI sequences (ESC [ ... final byte), OSC sequences (ESC ] ... BEL/ST),
    // and two-byte escapes.
    static ANSI_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"\x1b\[[0-9;?]*[A-Za-z]|\x1b\][^\x07\x1b]*(?:\x07|\x1b\\)|\x1b[^\[\]]")
            .expect("ANSI pattern is valid")
    });
    ANSI_RE.replace_all(input, "").to_string()
}

/// Normalize a raw child line: strip escapes and surrounding whitespace.
/// Returns `None` for lines that are blank after cleanup.
pub fn clean_line(raw: &str) -> Option<String> {
    let stripped = strip_ansi(raw);
    let trimmed = stripped.trim_end_matches(['\r', '\n']).trim_end();
    if trimmed.trim().is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

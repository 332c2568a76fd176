//! Live status dashboard.
//!
//! [`render_frame`] is a pure function from a borrowed view of session state
//! to a display payload. [`Dashboard`] then puts that payload on screen,
//! either as a full-screen ratatui layout or, without an interactive
//! terminal, as sparse plain-text output: event lines as they arrive and the
//! full report only when a snapshot is emitted.

use std::io::{self, IsTerminal, Stdout, Write};
use std::path::Path;

use crossterm::{
    cursor, execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    Terminal,
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span, Text},
    widgets::{Block, Borders, Paragraph, Wrap},
};
use tracing::warn;

use crate::detector::{IssueDetector, IssueNote};
use crate::events::{EventLine, EventLog};
use crate::snapshot::Snapshot;
use crate::supervisor::WorkflowState;

const EVENT_TAIL: usize = 200;
const ISSUE_TAIL: usize = 8;

/// Everything a render needs, borrowed from the session.
#[derive(Debug, Clone, Copy)]
pub struct DashboardView<'a> {
    pub run_id: &'a str,
    pub prompt_label: &'a str,
    pub repo_root: &'a Path,
    pub state: WorkflowState,
    pub attempt: u32,
    pub max_attempts: u32,
    pub last_exit_code: Option<i32>,
    pub events: &'a EventLog,
    pub issues: &'a IssueDetector,
    pub snapshot: Option<&'a Snapshot>,
    pub report: Option<&'a str>,
}

/// Panel contents produced by [`render_frame`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DashboardFrame {
    pub header: String,
    pub summary: String,
    pub report: Vec<String>,
    /// Oldest first.
    pub events: Vec<String>,
    /// Newest first.
    pub issues: Vec<String>,
}

pub fn render_frame(view: &DashboardView<'_>) -> DashboardFrame {
    let exit = view
        .last_exit_code
        .map(|c| format!(" · last exit {c}"))
        .unwrap_or_default();
    let header = format!(
        "run {} · {} · {} · attempt {}/{}{exit}",
        view.run_id,
        view.prompt_label,
        view.state,
        view.attempt,
        view.max_attempts
    );

    let summary = match view.snapshot {
        Some(s) => format!(
            "reports {}/{} complete · {} blocked · land {} merged / {} evicted · issues {}",
            s.report_complete,
            s.report_total,
            s.report_blocked,
            s.land_merged,
            s.land_evicted,
            view.issues.len()
        ),
        None => format!("no snapshot yet · issues {}", view.issues.len()),
    };

    let report = match view.report {
        Some(text) => text.lines().map(str::to_string).collect(),
        None => vec![format!(
            "waiting for first snapshot of {}",
            view.repo_root.display()
        )],
    };

    let events = view.events.tail(EVENT_TAIL).map(EventLine::display).collect();

    let mut issues = Vec::new();
    for note in view.issues.recent(ISSUE_TAIL).iter().rev() {
        issues.push(format!(
            "[{}] {}",
            note.timestamp.format("%H:%M:%S"),
            note.source_line
        ));
        issues.push(format!("  → {}", note.suggestion));
    }
    if issues.is_empty() {
        issues.push("no issues detected".to_string());
    }

    DashboardFrame {
        header,
        summary,
        report,
        events,
        issues,
    }
}

type TuiTerminal = Terminal<CrosstermBackend<Stdout>>;

enum Surface {
    Interactive(TuiTerminal),
    Plain(Box<dyn Write + Send>),
}

/// Presents session state. Falls back to plain text permanently once the
/// interactive surface is unavailable or fails.
pub struct Dashboard {
    surface: Surface,
    renders: u64,
}

impl Dashboard {
    /// Use the full-screen view when `enabled` and stdout is a terminal.
    pub fn start(enabled: bool) -> Self {
        if enabled && io::stdout().is_terminal() {
            match setup_terminal() {
                Ok(terminal) => {
                    return Self {
                        surface: Surface::Interactive(terminal),
                        renders: 0,
                    };
                }
                Err(e) => warn!("interactive dashboard unavailable, using plain output: {e}"),
            }
        }
        Self::plain(Box::new(io::stdout()))
    }

    pub fn plain(out: Box<dyn Write + Send>) -> Self {
        Self {
            surface: Surface::Plain(out),
            renders: 0,
        }
    }

    pub fn is_interactive(&self) -> bool {
        matches!(self.surface, Surface::Interactive(_))
    }

    /// Number of [`Dashboard::render`] calls so far, in either mode.
    pub fn render_count(&self) -> u64 {
        self.renders
    }

    /// Redraw the interactive view. Plain mode prints nothing here.
    pub fn render(&mut self, view: &DashboardView<'_>) {
        self.renders += 1;
        let Surface::Interactive(terminal) = &mut self.surface else {
            return;
        };
        let frame = render_frame(view);
        let drawn = terminal.draw(|f| draw(f, &frame)).map(|_| ());
        if let Err(e) = drawn {
            warn!("dashboard draw failed, switching to plain output: {e}");
            self.fall_back();
        }
    }

    pub fn on_event_line(&mut self, line: &EventLine) {
        self.plain_print(&line.display());
    }

    pub fn on_issue(&mut self, note: &IssueNote) {
        self.plain_print(&format!("  ↳ issue: {}", note.suggestion));
    }

    pub fn on_snapshot(&mut self, report: &str) {
        self.plain_print(report.trim_end());
    }

    fn plain_print(&mut self, text: &str) {
        if let Surface::Plain(out) = &mut self.surface {
            let _ = writeln!(out, "{text}");
            let _ = out.flush();
        }
    }

    fn fall_back(&mut self) {
        self.shutdown();
        self.surface = Surface::Plain(Box::new(io::stdout()));
    }

    /// Restore the terminal. Safe to call more than once.
    pub fn shutdown(&mut self) {
        if let Surface::Interactive(terminal) = &mut self.surface {
            let _ = execute!(terminal.backend_mut(), LeaveAlternateScreen, cursor::Show);
            self.surface = Surface::Plain(Box::new(io::stdout()));
        }
    }
}

impl Drop for Dashboard {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn setup_terminal() -> io::Result<TuiTerminal> {
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, cursor::Hide)?;
    match Terminal::new(CrosstermBackend::new(stdout)) {
        Ok(mut terminal) => {
            terminal.clear()?;
            Ok(terminal)
        }
        Err(e) => {
            let _ = execute!(io::stdout(), LeaveAlternateScreen, cursor::Show);
            Err(e)
        }
    }
}

fn panel<'a>(title: &'a str, lines: Vec<Line<'a>>) -> Paragraph<'a> {
    Paragraph::new(Text::from(lines)).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::DarkGray))
            .title(Span::styled(
                title,
                Style::default()
                    .fg(Color::Cyan)
                    .add_modifier(Modifier::BOLD),
            )),
    )
}

/// Last lines that fit inside a bordered area.
fn fitting<'a>(lines: &'a [String], area: Rect) -> Vec<Line<'a>> {
    let rows = area.height.saturating_sub(2) as usize;
    lines[lines.len().saturating_sub(rows)..]
        .iter()
        .map(|l| Line::from(l.as_str()))
        .collect()
}

fn draw(frame: &mut ratatui::Frame, payload: &DashboardFrame) {
    let size = frame.size();
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Length(3),
            Constraint::Min(6),
            Constraint::Percentage(30),
        ])
        .split(size);
    let middle = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(60), Constraint::Percentage(40)])
        .split(rows[2]);

    frame.render_widget(
        panel("Shepherd", vec![Line::from(payload.header.as_str())]),
        rows[0],
    );
    frame.render_widget(
        panel("Summary", vec![Line::from(payload.summary.as_str())]),
        rows[1],
    );
    frame.render_widget(
        panel(
            "Latest snapshot",
            payload.report.iter().map(|l| Line::from(l.as_str())).collect(),
        ),
        middle[0],
    );
    let issue_lines = payload
        .issues
        .iter()
        .map(|l| {
            if l.starts_with("  →") {
                Line::from(Span::styled(l.as_str(), Style::default().fg(Color::Yellow)))
            } else {
                Line::from(Span::styled(l.as_str(), Style::default().fg(Color::Red)))
            }
        })
        .collect();
    frame.render_widget(
        panel("Issues", issue_lines).wrap(Wrap { trim: false }),
        middle[1],
    );
    frame.render_widget(
        panel("Recent events", fitting(&payload.events, rows[3])),
        rows[3],
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventTag;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl SharedBuf {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    fn view<'a>(
        events: &'a EventLog,
        issues: &'a IssueDetector,
        snapshot: Option<&'a Snapshot>,
        report: Option<&'a str>,
    ) -> DashboardView<'a> {
        DashboardView {
            run_id: "run-7",
            prompt_label: "tickets",
            repo_root: Path::new("/repo"),
            state: WorkflowState::Resume,
            attempt: 2,
            max_attempts: 5,
            last_exit_code: Some(1),
            events,
            issues,
            snapshot,
            report,
        }
    }

    #[test]
    fn frame_reflects_current_state() {
        let mut events = EventLog::default();
        events.push(EventTag::Stdout, "building node a");
        events.push(EventTag::Stderr, "error: lint failed");
        let mut issues = IssueDetector::default();
        issues.observe("error: lint failed");
        let mut snapshot = Snapshot::empty();
        snapshot.report_total = 4;
        snapshot.report_complete = 3;

        let report = Some("line one\nline two");
        let frame = render_frame(&view(&events, &issues, Some(&snapshot), report));
        assert!(frame.header.contains("run run-7"));
        assert!(frame.header.contains("resume"));
        assert!(frame.header.contains("attempt 2/5"));
        assert!(frame.header.contains("last exit 1"));
        assert!(frame.summary.contains("reports 3/4 complete"));
        assert!(frame.summary.contains("issues 1"));
        assert_eq!(frame.report, vec!["line one", "line two"]);
        assert_eq!(frame.events.len(), 2);
        assert!(frame.events[1].ends_with("stderr: error: lint failed"));
        assert!(frame.issues[0].ends_with("error: lint failed"));
        assert!(frame.issues[1].starts_with("  → "));
    }

    #[test]
    fn frame_without_snapshot_has_placeholders() {
        let events = EventLog::default();
        let issues = IssueDetector::default();
        let frame = render_frame(&view(&events, &issues, None, None));
        assert!(frame.summary.starts_with("no snapshot yet"));
        assert!(frame.report[0].contains("/repo"));
        assert_eq!(frame.issues, vec!["no issues detected"]);
    }

    #[test]
    fn issues_are_newest_first() {
        let events = EventLog::default();
        let mut issues = IssueDetector::default();
        issues.observe("error: first");
        issues.observe("error: second");
        let frame = render_frame(&view(&events, &issues, None, None));
        assert!(frame.issues[0].ends_with("error: second"));
        assert!(frame.issues[2].ends_with("error: first"));
    }

    #[test]
    fn plain_mode_prints_lines_and_reports_only() {
        let buf = SharedBuf::default();
        let mut dashboard = Dashboard::plain(Box::new(buf.clone()));
        assert!(!dashboard.is_interactive());

        let events = EventLog::default();
        let issues = IssueDetector::default();
        dashboard.render(&view(&events, &issues, None, None));
        assert_eq!(buf.text(), "");

        dashboard.on_event_line(&EventLine::new(EventTag::Stdout, "hello"));
        dashboard.on_snapshot("Snapshot report\n");
        let text = buf.text();
        assert!(text.contains("stdout: hello\n"));
        assert!(text.ends_with("Snapshot report\n"));

        dashboard.render(&view(&events, &issues, None, None));
        assert_eq!(buf.text(), text);
    }

    #[test]
    fn disabled_dashboard_is_plain() {
        let dashboard = Dashboard::start(false);
        assert!(!dashboard.is_interactive());
    }
}

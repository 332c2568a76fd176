//! Fixed-format text rendering of a snapshot.

use super::Snapshot;
use super::store::{LandRow, ReportRow};

pub const BAR_WIDTH: usize = 18;
const FILLED: char = '#';
const EMPTY: char = '.';
const MAX_ROWS: usize = 6;
const MAX_COMMITS: usize = 8;

/// `[#########.........] 5/10` at the default width.
pub fn progress_bar(done: usize, total: usize) -> String {
    render_bar(done, total, BAR_WIDTH)
}

pub fn render_bar(done: usize, total: usize, width: usize) -> String {
    let ratio = if total == 0 {
        0.0
    } else {
        (done as f64 / total as f64).clamp(0.0, 1.0)
    };
    let filled = ((width as f64) * ratio).round() as usize;
    let filled = filled.min(width);
    let mut bar = String::with_capacity(width + 16);
    bar.push('[');
    bar.extend(std::iter::repeat_n(FILLED, filled));
    bar.extend(std::iter::repeat_n(EMPTY, width - filled));
    bar.push_str(&format!("] {done}/{total}"));
    bar
}

fn push_section<T>(
    out: &mut String,
    title: &str,
    items: &[T],
    limit: usize,
    fmt: impl Fn(&T) -> String,
) {
    out.push_str(&format!("{title} ({})\n", items.len()));
    if items.is_empty() {
        out.push_str("  (none)\n");
        return;
    }
    for item in items.iter().take(limit) {
        out.push_str(&format!("  - {}\n", fmt(item)));
    }
    if items.len() > limit {
        out.push_str(&format!("  … {} more\n", items.len() - limit));
    }
}

fn describe_report(row: &ReportRow) -> String {
    let mut line = format!("{} [{}]", row.key(), row.status);
    if !row.summary.is_empty() {
        line.push(' ');
        line.push_str(&row.summary);
    }
    line
}

fn describe_land(row: &LandRow) -> String {
    let outcome = match (row.merged, row.evicted) {
        (_, true) => "evicted",
        (true, false) => "merged",
        (false, false) => "pending",
    };
    let mut line = format!("{} [{outcome}]", row.key());
    if !row.summary.is_empty() {
        line.push(' ');
        line.push_str(&row.summary);
    }
    line
}

/// Render the multi-line report shown on the dashboard and in issue drafts.
pub fn render_report(run_id: &str, snapshot: &Snapshot) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "Snapshot {} (run {run_id})\n",
        snapshot.taken_at.format("%Y-%m-%d %H:%M:%S")
    ));
    out.push_str(&format!(
        "  reports complete  {}\n",
        progress_bar(snapshot.report_complete, snapshot.report_total)
    ));
    out.push_str(&format!(
        "  reports blocked   {}\n",
        progress_bar(snapshot.report_blocked, snapshot.report_total)
    ));
    out.push_str(&format!(
        "  land merged       {}\n",
        progress_bar(snapshot.land_merged, snapshot.land_total)
    ));
    out.push_str(&format!("  land evicted      {}\n", snapshot.land_evicted));

    push_section(&mut out, "New reports", &snapshot.new_reports, MAX_ROWS, describe_report);
    push_section(
        &mut out,
        "New land events",
        &snapshot.new_land_events,
        MAX_ROWS,
        describe_land,
    );
    push_section(
        &mut out,
        "New commits",
        &snapshot.new_git_commits,
        MAX_COMMITS,
        |c: &String| c.clone(),
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn filled(bar: &str) -> usize {
        bar.chars().filter(|c| *c == FILLED).count()
    }

    #[test]
    fn empty_total_renders_empty_bar() {
        assert_eq!(progress_bar(0, 0), format!("[{}] 0/0", ".".repeat(BAR_WIDTH)));
    }

    #[test]
    fn half_done_fills_half() {
        assert_eq!(filled(&progress_bar(5, 10)), 9);
    }

    #[test]
    fn overflow_clamps_to_full() {
        let bar = progress_bar(12, 10);
        assert_eq!(filled(&bar), BAR_WIDTH);
        assert!(bar.ends_with("12/10"));
    }

    #[test]
    fn report_lists_limited_rows_and_commits() {
        let mut snapshot = Snapshot::empty();
        snapshot.report_total = 8;
        snapshot.report_complete = 8;
        snapshot.new_reports = (0..8)
            .map(|i| ReportRow {
                node_id: format!("t{i}"),
                iteration: 1,
                status: "complete".into(),
                summary: String::new(),
            })
            .collect();
        snapshot.new_git_commits = (0..10).map(|i| format!("abc{i} commit {i}")).collect();

        let text = render_report("run-9", &snapshot);
        assert!(text.contains("(run run-9)"));
        assert!(text.contains("New reports (8)"));
        assert!(text.contains("t5:1 [complete]"));
        assert!(!text.contains("t6:1"));
        assert!(text.contains("… 2 more"));
        assert!(text.contains("abc7 commit 7"));
        assert!(!text.contains("abc8 commit 8"));
        assert!(text.contains("New land events (0)\n  (none)"));
    }

    #[test]
    fn land_rows_show_outcome() {
        let row = LandRow {
            node_id: "t1".into(),
            iteration: 2,
            merged: false,
            evicted: true,
            summary: "conflict".into(),
        };
        assert_eq!(describe_land(&row), "t1:2 [evicted] conflict");
    }

    proptest! {
        #[test]
        fn bar_width_is_constant(done in 0usize..500, total in 0usize..500) {
            let bar = progress_bar(done, total);
            let inner = bar.chars().skip(1).take_while(|c| *c != ']').count();
            prop_assert_eq!(inner, BAR_WIDTH);
            prop_assert!(filled(&bar) <= BAR_WIDTH);
        }
    }
}

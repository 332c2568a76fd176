use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "shepherd",
    about = "Supervise a long-running workflow process and watch its progress",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Launch the workflow, restart it on failure, and show the dashboard
    Run {
        /// Reuse an existing run id instead of generating one
        #[arg(long)]
        run_id: Option<String>,

        /// Workflow database path (overrides config)
        #[arg(long)]
        db: Option<PathBuf>,

        /// Human-readable label shown on the dashboard
        #[arg(long)]
        label: Option<String>,

        /// Print plain progress lines instead of the full-screen view
        #[arg(long)]
        no_dashboard: bool,

        /// Minimum seconds between progress snapshots (at least 60)
        #[arg(long)]
        interval_secs: Option<u64>,

        /// Concurrency passed through to the workflow
        #[arg(long)]
        max_concurrency: Option<u32>,
    },

    /// Print one progress snapshot for a run and exit
    Snapshot {
        #[arg(long)]
        run_id: String,

        /// Workflow database path (overrides config)
        #[arg(long)]
        db: Option<PathBuf>,
    },

    /// Show project configuration
    Config {
        /// Emit machine-readable JSON
        #[arg(long)]
        json: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_flags_parse() {
        let cli = Cli::parse_from([
            "shepherd",
            "run",
            "--run-id",
            "run-abc",
            "--db",
            "/tmp/wf.db",
            "--no-dashboard",
            "--interval-secs",
            "90",
            "-vv",
        ]);
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Command::Run {
                run_id,
                db,
                no_dashboard,
                interval_secs,
                max_concurrency,
                label,
            } => {
                assert_eq!(run_id.as_deref(), Some("run-abc"));
                assert_eq!(db, Some(PathBuf::from("/tmp/wf.db")));
                assert!(no_dashboard);
                assert_eq!(interval_secs, Some(90));
                assert!(max_concurrency.is_none());
                assert!(label.is_none());
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn snapshot_requires_run_id() {
        assert!(Cli::try_parse_from(["shepherd", "snapshot"]).is_err());
        let cli = Cli::parse_from(["shepherd", "snapshot", "--run-id", "run-1"]);
        assert!(matches!(cli.command, Command::Snapshot { ref run_id, .. } if run_id == "run-1"));
    }

    #[test]
    fn config_json_flag() {
        let cli = Cli::parse_from(["shepherd", "config", "--json"]);
        assert!(matches!(cli.command, Command::Config { json: true }));
    }
}

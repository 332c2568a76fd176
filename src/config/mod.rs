use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::snapshot::MIN_INTERVAL;

const CONFIG_FILENAME: &str = "config.toml";
const CONFIG_DIR: &str = ".shepherd";

fn default_program() -> String {
    "smithers".to_string()
}

fn default_max_concurrency() -> u32 {
    4
}

fn default_db_path() -> PathBuf {
    PathBuf::from(".shepherd/workflow.db")
}

fn default_prompt_label() -> String {
    "workflow".to_string()
}

fn default_max_attempts() -> u32 {
    5
}

fn default_backoff_secs() -> u64 {
    2
}

fn default_interval_secs() -> u64 {
    300
}

fn default_tick_secs() -> u64 {
    10
}

fn default_dashboard_enabled() -> bool {
    true
}

fn default_generated_dir() -> PathBuf {
    PathBuf::from(".shepherd/generated")
}

/// The supervised workflow command.
///
/// ```toml
/// [workflow]
/// program = "smithers"
/// args = ["workflows/pipeline.tsx"]
/// max_concurrency = 4
/// db_path = ".shepherd/workflow.db"
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorkflowConfig {
    #[serde(default = "default_program")]
    pub program: String,
    /// Arguments placed before the `run`/`resume` mode token.
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: u32,
    /// Relative paths resolve against the repository root.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    #[serde(default = "default_prompt_label")]
    pub prompt_label: String,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            args: Vec::new(),
            max_concurrency: default_max_concurrency(),
            db_path: default_db_path(),
            prompt_label: default_prompt_label(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SupervisorSettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_secs")]
    pub backoff_secs: u64,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_secs: default_backoff_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SnapshotSettings {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_tick_secs")]
    pub tick_secs: u64,
}

impl Default for SnapshotSettings {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            tick_secs: default_tick_secs(),
        }
    }
}

impl SnapshotSettings {
    /// Snapshot spacing, never below one minute.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs).max(MIN_INTERVAL)
    }

    pub fn tick(&self) -> Duration {
        Duration::from_secs(self.tick_secs.max(1))
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DashboardSettings {
    #[serde(default = "default_dashboard_enabled")]
    pub enabled: bool,
}

impl Default for DashboardSettings {
    fn default() -> Self {
        Self {
            enabled: default_dashboard_enabled(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProjectConfig {
    /// Relative paths resolve against the repository root.
    #[serde(default = "default_generated_dir")]
    pub generated_dir: PathBuf,
    #[serde(default)]
    pub workflow: WorkflowConfig,
    #[serde(default)]
    pub supervisor: SupervisorSettings,
    #[serde(default)]
    pub snapshot: SnapshotSettings,
    #[serde(default)]
    pub dashboard: DashboardSettings,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            generated_dir: default_generated_dir(),
            workflow: WorkflowConfig::default(),
            supervisor: SupervisorSettings::default(),
            snapshot: SnapshotSettings::default(),
            dashboard: DashboardSettings::default(),
        }
    }
}

impl ProjectConfig {
    /// Load the nearest `.shepherd/config.toml` at or above `start`.
    /// Without one the defaults apply and no path is returned.
    pub fn load(start: &Path) -> Result<(Self, Option<PathBuf>)> {
        let Some(path) = config_file_above(start) else {
            return Ok((Self::default(), None));
        };
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let config = toml::from_str(&raw)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        Ok((config, Some(path)))
    }
}

fn config_file_above(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .map(|dir| dir.join(CONFIG_DIR).join(CONFIG_FILENAME))
        .find(|candidate| candidate.is_file())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn default_config_values() {
        let config = ProjectConfig::default();
        assert_eq!(config.workflow.program, "smithers");
        assert!(config.workflow.args.is_empty());
        assert_eq!(config.workflow.max_concurrency, 4);
        assert_eq!(config.workflow.db_path, PathBuf::from(".shepherd/workflow.db"));
        assert_eq!(config.supervisor.max_attempts, 5);
        assert_eq!(config.supervisor.backoff_secs, 2);
        assert_eq!(config.snapshot.interval(), Duration::from_secs(300));
        assert_eq!(config.snapshot.tick(), Duration::from_secs(10));
        assert!(config.dashboard.enabled);
        assert_eq!(config.generated_dir, PathBuf::from(".shepherd/generated"));
    }

    #[test]
    fn parse_full_config() {
        let toml = r#"
generated_dir = "out/gen"

[workflow]
program = "bunx"
args = ["smithers", "workflows/pipeline.tsx"]
max_concurrency = 8
db_path = "/var/lib/pipeline.db"
prompt_label = "nightly tickets"

[supervisor]
max_attempts = 3
backoff_secs = 5

[snapshot]
interval_secs = 120
tick_secs = 15

[dashboard]
enabled = false
"#;
        let config: ProjectConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.generated_dir, PathBuf::from("out/gen"));
        assert_eq!(config.workflow.program, "bunx");
        assert_eq!(config.workflow.args, vec!["smithers", "workflows/pipeline.tsx"]);
        assert_eq!(config.workflow.max_concurrency, 8);
        assert_eq!(config.workflow.prompt_label, "nightly tickets");
        assert_eq!(config.supervisor.max_attempts, 3);
        assert_eq!(config.snapshot.interval(), Duration::from_secs(120));
        assert_eq!(config.snapshot.tick(), Duration::from_secs(15));
        assert!(!config.dashboard.enabled);
    }

    #[test]
    fn parse_partial_config() {
        let toml = r#"
[workflow]
program = "node"
"#;
        let config: ProjectConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.workflow.program, "node");
        assert_eq!(config.workflow.max_concurrency, 4);
        assert_eq!(config.supervisor.max_attempts, 5);
        assert!(config.dashboard.enabled);
    }

    #[test]
    fn short_interval_is_clamped() {
        let toml = r#"
[snapshot]
interval_secs = 5
tick_secs = 0
"#;
        let config: ProjectConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.snapshot.interval(), Duration::from_secs(60));
        assert_eq!(config.snapshot.tick(), Duration::from_secs(1));
    }

    #[test]
    fn load_returns_default_when_no_file() {
        let tmp = tempfile::tempdir().unwrap();
        let (config, path) = ProjectConfig::load(tmp.path()).unwrap();
        assert!(path.is_none());
        assert_eq!(config.workflow.program, "smithers");
    }

    #[test]
    fn load_walks_up_directories() {
        let tmp = tempfile::tempdir().unwrap();
        let shepherd_dir = tmp.path().join(".shepherd");
        fs::create_dir_all(&shepherd_dir).unwrap();
        fs::write(
            shepherd_dir.join("config.toml"),
            r#"
[workflow]
prompt_label = "release train"
"#,
        )
        .unwrap();

        let nested = tmp.path().join("src").join("deep").join("nested");
        fs::create_dir_all(&nested).unwrap();

        let (config, path) = ProjectConfig::load(&nested).unwrap();
        assert!(path.is_some());
        assert_eq!(config.workflow.prompt_label, "release train");
    }

    #[test]
    fn malformed_file_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let shepherd_dir = tmp.path().join(".shepherd");
        fs::create_dir_all(&shepherd_dir).unwrap();
        fs::write(shepherd_dir.join("config.toml"), "[workflow\nprogram = 1").unwrap();

        let err = ProjectConfig::load(tmp.path()).unwrap_err();
        assert!(format!("{err:#}").contains("failed to parse"));
    }
}

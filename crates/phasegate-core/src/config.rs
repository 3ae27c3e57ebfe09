//! Configuration management for phasegate
//!
//! Repository-level settings live in `.phasegate/config.toml`. Every field has a
//! default, so a missing file or a partial file is always valid.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::{Action, PhaseGateError, Result};

/// Directory holding phasegate state, relative to the repository root
pub const CONFIG_DIR: &str = ".phasegate";

/// Repository-level phasegate configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PhaseGateConfig {
    /// Where task records are kept
    #[serde(default)]
    pub store: StoreConfig,

    /// Selection policy and dependency diagnostics
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Driving loop limits
    #[serde(default)]
    pub driver: DriverSettings,

    /// Shell executor used by `phasegate run`
    #[serde(default)]
    pub executor: ExecutorConfig,

    /// Transition audit trail
    #[serde(default)]
    pub audit: AuditConfig,
}

/// Task record locations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Directory with one `<id>.json` per task
    #[serde(default = "default_tasks_dir")]
    pub tasks_dir: PathBuf,

    /// JSON array of epic ids in definition order
    #[serde(default = "default_epics_file")]
    pub epics_file: PathBuf,
}

/// Which ordering strategy ranks the ready set
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PolicyKind {
    /// Epic definition order first, priority second; later epics wait for earlier ones
    #[default]
    EpicBarrier,
    /// Priority first, epic order as tie-break, no barrier
    PriorityFirst,
}

/// How dependency cycles are treated before a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CycleCheck {
    Ignore,
    #[default]
    Warn,
    Error,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default)]
    pub policy: PolicyKind,

    #[serde(default)]
    pub cycle_check: CycleCheck,
}

/// Dispatch mode of the driving loop
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DispatchMode {
    /// One task per step
    #[default]
    Single,
    /// Every dispatchable task of the head epic per step
    EpicBatch,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverSettings {
    /// Stop after this many dispatches (0 = unlimited)
    #[serde(default = "default_max_dispatches")]
    pub max_dispatches: usize,

    #[serde(default)]
    pub mode: DispatchMode,
}

/// Shell executor configuration.
///
/// Each action key maps to a command line. Exit code 0 means accepted; the two
/// configured codes mean rejected and tests-defective; anything else is a failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    #[serde(default = "default_shell")]
    pub shell: String,

    #[serde(default = "default_rejected_exit_code")]
    pub rejected_exit_code: i32,

    #[serde(default = "default_tests_defective_exit_code")]
    pub tests_defective_exit_code: i32,

    /// Command per action key (`analyze`, `review-code`, ...)
    #[serde(default)]
    pub commands: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    #[serde(default = "default_audit_enabled")]
    pub enabled: bool,

    /// JSON-lines file receiving one record per applied transition
    #[serde(default = "default_audit_path")]
    pub path: PathBuf,
}

// Default value providers
fn default_tasks_dir() -> PathBuf {
    PathBuf::from(CONFIG_DIR).join("tasks")
}

fn default_epics_file() -> PathBuf {
    PathBuf::from(CONFIG_DIR).join("epics.json")
}

fn default_max_dispatches() -> usize {
    100
}

fn default_shell() -> String {
    "sh".to_string()
}

fn default_rejected_exit_code() -> i32 {
    10
}

fn default_tests_defective_exit_code() -> i32 {
    11
}

fn default_audit_enabled() -> bool {
    true
}

fn default_audit_path() -> PathBuf {
    PathBuf::from(CONFIG_DIR).join("audit.jsonl")
}

impl PhaseGateConfig {
    /// Load configuration from `.phasegate/config.toml` or use defaults
    pub fn load_or_default(repo_root: &Path) -> Result<Self> {
        let config_path = Self::config_path(repo_root);

        let config = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            toml::from_str(&content).map_err(|e| {
                PhaseGateError::Config(format!("Failed to parse config file: {}", e))
            })?
        } else {
            tracing::debug!(path = %config_path.display(), "No config file, using defaults");
            Self::default()
        };

        config.validate()?;
        Ok(config)
    }

    /// Write default configuration to `.phasegate/config.toml`
    pub fn write_default(repo_root: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(repo_root.join(CONFIG_DIR))?;

        let config_path = Self::config_path(repo_root);
        let content = toml::to_string_pretty(&Self::default()).map_err(|e| {
            PhaseGateError::Config(format!("Failed to serialize config: {}", e))
        })?;
        std::fs::write(&config_path, content)?;
        Ok(config_path)
    }

    pub fn config_path(repo_root: &Path) -> PathBuf {
        repo_root.join(CONFIG_DIR).join("config.toml")
    }

    /// Reject executor entries that do not name a known action
    pub fn validate(&self) -> Result<()> {
        for key in self.executor.commands.keys() {
            key.parse::<Action>().map_err(|_| {
                PhaseGateError::Config(format!("executor.commands has unknown action '{}'", key))
            })?;
        }
        if self.executor.rejected_exit_code == 0
            || self.executor.tests_defective_exit_code == 0
            || self.executor.rejected_exit_code == self.executor.tests_defective_exit_code
        {
            return Err(PhaseGateError::Config(
                "executor exit codes must be non-zero and distinct".to_string(),
            ));
        }
        Ok(())
    }
}

impl ExecutorConfig {
    /// Command configured for an action, if any
    pub fn command_for(&self, action: Action) -> Option<&str> {
        self.commands.get(action.key()).map(String::as_str)
    }
}

impl StoreConfig {
    pub fn tasks_dir(&self, repo_root: &Path) -> PathBuf {
        repo_root.join(&self.tasks_dir)
    }

    pub fn epics_file(&self, repo_root: &Path) -> PathBuf {
        repo_root.join(&self.epics_file)
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            tasks_dir: default_tasks_dir(),
            epics_file: default_epics_file(),
        }
    }
}

impl Default for DriverSettings {
    fn default() -> Self {
        Self {
            max_dispatches: default_max_dispatches(),
            mode: DispatchMode::default(),
        }
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            shell: default_shell(),
            rejected_exit_code: default_rejected_exit_code(),
            tests_defective_exit_code: default_tests_defective_exit_code(),
            commands: BTreeMap::new(),
        }
    }
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: default_audit_enabled(),
            path: default_audit_path(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let config = PhaseGateConfig::load_or_default(dir.path()).unwrap();

        assert_eq!(config.scheduler.policy, PolicyKind::EpicBarrier);
        assert_eq!(config.scheduler.cycle_check, CycleCheck::Warn);
        assert_eq!(config.driver.max_dispatches, 100);
        assert_eq!(config.store.tasks_dir, PathBuf::from(".phasegate/tasks"));
    }

    #[test]
    fn test_write_default_then_load() {
        let dir = TempDir::new().unwrap();
        let path = PhaseGateConfig::write_default(dir.path()).unwrap();
        assert!(path.exists());

        let config = PhaseGateConfig::load_or_default(dir.path()).unwrap();
        assert_eq!(config.executor.rejected_exit_code, 10);
        assert!(config.audit.enabled);
    }

    #[test]
    fn test_partial_file() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join(CONFIG_DIR)).unwrap();
        std::fs::write(
            PhaseGateConfig::config_path(dir.path()),
            r#"
[scheduler]
policy = "priority-first"
cycle_check = "error"

[driver]
mode = "epic-batch"

[executor.commands]
analyze = "./scripts/analyze.sh"
review-code = "./scripts/review.sh"
"#,
        )
        .unwrap();

        let config = PhaseGateConfig::load_or_default(dir.path()).unwrap();
        assert_eq!(config.scheduler.policy, PolicyKind::PriorityFirst);
        assert_eq!(config.scheduler.cycle_check, CycleCheck::Error);
        assert_eq!(config.driver.mode, DispatchMode::EpicBatch);
        assert_eq!(config.driver.max_dispatches, 100);
        assert_eq!(config.executor.command_for(Action::Analyze), Some("./scripts/analyze.sh"));
        assert_eq!(config.executor.command_for(Action::Qa), None);
    }

    #[test]
    fn test_unknown_action_key_rejected() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join(CONFIG_DIR)).unwrap();
        std::fs::write(
            PhaseGateConfig::config_path(dir.path()),
            "[executor.commands]\ndeploy = \"./deploy.sh\"\n",
        )
        .unwrap();

        let err = PhaseGateConfig::load_or_default(dir.path()).unwrap_err();
        assert!(matches!(err, PhaseGateError::Config(_)));
    }

    #[test]
    fn test_conflicting_exit_codes_rejected() {
        let mut config = PhaseGateConfig::default();
        config.executor.tests_defective_exit_code = config.executor.rejected_exit_code;
        assert!(config.validate().is_err());
    }
}

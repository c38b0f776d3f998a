use crate::error::{Result, TaskError};
use crate::validator::ValidationStrictness;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use workplan_planner::{parse_analysis_concurrency, PlannerConfig};
use workplan_state::StoreConfig;

const DEFAULT_FLUSH_EVERY: u64 = 20;
const DEFAULT_PERIODIC_FLUSH_SECS: u64 = 300;

/// Orchestrator settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Directory under each project root that receives artifacts
    pub docs_root: PathBuf,

    /// Flush the state store after this many unsaved mutations
    pub flush_every: u64,

    /// Background flush interval; 0 disables it
    pub periodic_flush_secs: u64,

    /// Strictness applied to every step instead of the step default
    pub strictness: Option<ValidationStrictness>,

    /// Task file; `tasks.json` next to the state file when unset
    pub task_file: Option<PathBuf>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            docs_root: PathBuf::from("docs"),
            flush_every: DEFAULT_FLUSH_EVERY,
            periodic_flush_secs: DEFAULT_PERIODIC_FLUSH_SECS,
            strictness: None,
            task_file: None,
        }
    }
}

impl OrchestratorConfig {
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.flush_every == 0 {
            return Err("flush_every must be > 0".to_string());
        }
        if self.docs_root.is_absolute() {
            return Err(format!(
                "docs_root must be relative to the project root, got {}",
                self.docs_root.display()
            ));
        }
        Ok(())
    }
}

/// Everything configurable, as read from `workplan.toml`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkplanConfig {
    pub planner: PlannerConfig,
    pub store: StoreConfig,
    pub orchestrator: OrchestratorConfig,
}

impl WorkplanConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(raw).map_err(|e| TaskError::config(format!("parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Read `path`, then apply `WORKPLAN_*` environment overrides
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| TaskError::config(format!("read {}: {e}", path.display())))?;
        let mut config = Self::from_toml_str(&raw)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.planner
            .validate()
            .map_err(|e| TaskError::config(format!("planner: {e}")))?;
        self.store
            .validate()
            .map_err(|e| TaskError::config(format!("store: {e}")))?;
        self.orchestrator
            .validate()
            .map_err(|e| TaskError::config(format!("orchestrator: {e}")))
    }

    /// Where the file-backed task repository lives
    pub fn resolved_task_file(&self) -> PathBuf {
        self.orchestrator
            .task_file
            .clone()
            .unwrap_or_else(|| self.store.state_file.with_file_name("tasks.json"))
    }

    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from `lookup`. Blank or malformed values are ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let number = |key: &str| -> Option<usize> {
            lookup(key).and_then(|raw| raw.trim().parse::<usize>().ok())
        };
        let text = |key: &str| -> Option<String> {
            lookup(key)
                .map(|raw| raw.trim().to_string())
                .filter(|raw| !raw.is_empty())
        };

        if let Some(raw) = lookup("WORKPLAN_ANALYSIS_CONCURRENCY") {
            self.planner.analysis_concurrency =
                parse_analysis_concurrency(Some(&raw), self.planner.analysis_concurrency);
        }
        if let Some(v) = number("WORKPLAN_SMALL_FILE_THRESHOLD") {
            self.planner.small_file_threshold = v;
        }
        if let Some(v) = number("WORKPLAN_LARGE_FILE_THRESHOLD") {
            self.planner.large_file_threshold = v;
        }
        if let Some(v) = number("WORKPLAN_BATCH_TARGET_SIZE") {
            self.planner.batch_target_size = v;
        }
        if let Some(v) = number("WORKPLAN_MAX_BATCH_SIZE") {
            self.planner.max_batch_size = v;
        }
        if let Some(v) = text("WORKPLAN_STATE_FILE") {
            self.store.state_file = PathBuf::from(v);
        }
        if let Some(v) = text("WORKPLAN_BACKUP_DIR") {
            self.store.backup_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = text("WORKPLAN_TASK_FILE") {
            self.orchestrator.task_file = Some(PathBuf::from(v));
        }
        if let Some(v) = text("WORKPLAN_DOCS_ROOT") {
            self.orchestrator.docs_root = PathBuf::from(v);
        }
        if let Some(v) = number("WORKPLAN_FLUSH_EVERY").filter(|v| *v > 0) {
            self.orchestrator.flush_every = v as u64;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    #[test]
    fn toml_fills_missing_sections_with_defaults() {
        let config = WorkplanConfig::from_toml_str(
            r#"
[planner]
batch_target_size = 12000

[orchestrator]
docs_root = "generated"
strictness = { level = "existence_min_size", min_bytes = 64 }
"#,
        )
        .unwrap();

        assert_eq!(config.planner.batch_target_size, 12_000);
        assert_eq!(config.planner.small_file_threshold, 15_000);
        assert_eq!(config.store, StoreConfig::default());
        assert_eq!(config.orchestrator.docs_root, PathBuf::from("generated"));
        assert_eq!(
            config.orchestrator.strictness,
            Some(ValidationStrictness::ExistenceMinSize { min_bytes: 64 })
        );
        assert_eq!(config.orchestrator.flush_every, 20);
    }

    #[test]
    fn invalid_thresholds_are_config_errors() {
        let err = WorkplanConfig::from_toml_str(
            "[planner]\nsmall_file_threshold = 50000\n",
        )
        .unwrap_err();
        assert!(matches!(err, TaskError::Config(ref m) if m.starts_with("planner:")));
    }

    #[test]
    fn overrides_ignore_malformed_values() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("WORKPLAN_BATCH_TARGET_SIZE", "16000"),
            ("WORKPLAN_MAX_BATCH_SIZE", "lots"),
            ("WORKPLAN_ANALYSIS_CONCURRENCY", "500"),
            ("WORKPLAN_DOCS_ROOT", "  "),
            ("WORKPLAN_STATE_FILE", "/var/lib/workplan/state.json"),
            ("WORKPLAN_FLUSH_EVERY", "0"),
        ]);
        let mut config = WorkplanConfig::default();

        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.planner.batch_target_size, 16_000);
        assert_eq!(config.planner.max_batch_size, 20_000);
        assert_eq!(config.planner.analysis_concurrency, 32);
        assert_eq!(config.orchestrator.docs_root, PathBuf::from("docs"));
        assert_eq!(
            config.store.state_file,
            PathBuf::from("/var/lib/workplan/state.json")
        );
        assert_eq!(config.orchestrator.flush_every, 20);
        assert_eq!(
            config.resolved_task_file(),
            PathBuf::from("/var/lib/workplan/tasks.json")
        );
        assert!(config.validate().is_ok());
    }
}

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const DEFAULT_MAX_BACKUPS: usize = 10;
pub const DEFAULT_HISTORY_LIMIT: usize = 10;

/// Where and how task state is persisted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Snapshot file
    pub state_file: PathBuf,

    /// Backup directory; `<state_file dir>/backups` when unset
    pub backup_dir: Option<PathBuf>,

    /// Newest backups kept, older ones are deleted
    pub max_backups: usize,

    /// Transitions kept per task
    pub history_limit: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            state_file: PathBuf::from(".workplan/task-state.json"),
            backup_dir: None,
            max_backups: DEFAULT_MAX_BACKUPS,
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }
}

impl StoreConfig {
    pub fn with_state_file(state_file: impl Into<PathBuf>) -> Self {
        Self {
            state_file: state_file.into(),
            ..Default::default()
        }
    }

    pub fn resolved_backup_dir(&self) -> PathBuf {
        match &self.backup_dir {
            Some(dir) => dir.clone(),
            None => self
                .state_file
                .parent()
                .map(|p| p.join("backups"))
                .unwrap_or_else(|| PathBuf::from("backups")),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.state_file.as_os_str().is_empty() {
            return Err("state_file must not be empty".to_string());
        }
        if self.max_backups == 0 {
            return Err("max_backups must be > 0".to_string());
        }
        if self.history_limit == 0 {
            return Err("history_limit must be > 0".to_string());
        }
        Ok(())
    }
}

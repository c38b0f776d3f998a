use crate::status::TaskStatus;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for state store operations
pub type Result<T> = std::result::Result<T, StateError>;

/// Errors raised by the task state store and its backends
#[derive(Error, Debug)]
pub enum StateError {
    /// Transition not allowed by the status table; nothing was changed
    #[error("Invalid transition for task {task_id}: {} -> {to}", origin(.from))]
    InvalidTransition {
        task_id: String,
        from: Option<TaskStatus>,
        to: TaskStatus,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Task not found: {0}")]
    NotFound(String),

    /// Disk I/O failed while loading or saving
    #[error("Persistence failed at {path}: {source}")]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// Snapshot unreadable and could not be recovered
    #[error("Corrupt state at {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    /// A blocking persistence task panicked or was cancelled
    #[error("Join error: {0}")]
    Join(String),
}

impl StateError {
    pub fn persistence(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Persistence {
            path: path.into(),
            source,
        }
    }

    pub fn corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Corrupt {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

fn origin(from: &Option<TaskStatus>) -> &'static str {
    from.map_or("none", TaskStatus::as_str)
}

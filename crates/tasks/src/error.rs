use thiserror::Error;
use workplan_planner::PlannerError;
use workplan_state::StateError;

/// Result type for task operations
pub type Result<T> = std::result::Result<T, TaskError>;

/// Errors surfaced by task building, validation and orchestration
#[derive(Error, Debug)]
pub enum TaskError {
    /// Bad input or a transition the status table does not allow
    #[error("Validation error: {0}")]
    Validation(String),

    /// State could not be loaded or saved
    #[error("Persistence error: {0}")]
    Persistence(#[source] StateError),

    /// Token or structure computation failed
    #[error("Analysis error: {0}")]
    Analysis(#[from] PlannerError),

    /// Artifacts still missing after retries ran out
    #[error("Task {task_id} incomplete, missing: {}", .missing.join(", "))]
    Completion {
        task_id: String,
        missing: Vec<String>,
    },

    /// Unsupported step type or unusable configuration
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Task not found: {0}")]
    NotFound(String),
}

impl TaskError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}

impl From<StateError> for TaskError {
    fn from(err: StateError) -> Self {
        match err {
            StateError::InvalidTransition { .. } => Self::Validation(err.to_string()),
            StateError::NotFound(task_id) => Self::NotFound(task_id),
            StateError::InvalidConfig(msg) => Self::Config(msg),
            other => Self::Persistence(other),
        }
    }
}

use thiserror::Error;

/// Result type for planner operations
pub type Result<T> = std::result::Result<T, PlannerError>;

/// Errors that can occur while analyzing and planning a file inventory
#[derive(Error, Debug)]
pub enum PlannerError {
    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A blocking analysis task panicked or was cancelled
    #[error("Join error: {0}")]
    Join(String),
}

impl PlannerError {
    /// Create an invalid config error
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }
}

use crate::definition::TaskDefinition;
use crate::step::StepType;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use workplan_state::TaskStatus;

/// Outcome of the latest completion check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionData {
    pub auto_completed: bool,
    pub checked_at: u64,
    pub existing_files: Vec<String>,
    pub missing_files: Vec<String>,
}

/// A task definition scheduled for one project and step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// `<step>:<definition id>`
    pub id: String,
    pub step_type: StepType,
    pub project_path: PathBuf,
    pub status: TaskStatus,
    pub retry_count: u32,
    pub created_at: u64,
    pub updated_at: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_data: Option<CompletionData>,
    pub definition: TaskDefinition,
    /// Creation order, used for FIFO dispatch
    pub sequence: u64,
    /// Set once retries ran out; the task then stays `failed`
    #[serde(default)]
    pub exhausted: bool,
}

impl Task {
    pub fn task_id(step: StepType, definition_id: &str) -> String {
        format!("{step}:{definition_id}")
    }

    pub fn is_finished(&self) -> bool {
        self.status.is_terminal() || self.exhausted
    }
}

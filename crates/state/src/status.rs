use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::str::FromStr;

/// Lifecycle status of a task
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
    Failed,
    ValidationFailed,
    RetryPending,
    Cancelled,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 7] = [
        TaskStatus::Pending,
        TaskStatus::InProgress,
        TaskStatus::Completed,
        TaskStatus::Failed,
        TaskStatus::ValidationFailed,
        TaskStatus::RetryPending,
        TaskStatus::Cancelled,
    ];

    pub fn allowed_transitions(&self) -> &'static [TaskStatus] {
        use TaskStatus::*;
        match self {
            Pending => &[InProgress, Cancelled],
            InProgress => &[Completed, Failed, ValidationFailed],
            Failed => &[RetryPending, Cancelled],
            ValidationFailed => &[RetryPending, InProgress],
            RetryPending => &[InProgress, Failed, Cancelled],
            Completed => &[],
            Cancelled => &[],
        }
    }

    pub fn can_transition_to(&self, target: TaskStatus) -> bool {
        self.allowed_transitions().contains(&target)
    }

    /// Shortest sequence of statuses leading from `self` to `target`
    /// through allowed transitions, excluding `self`. Empty when already
    /// there, `None` when unreachable.
    pub fn path_to(self, target: TaskStatus) -> Option<Vec<TaskStatus>> {
        if self == target {
            return Some(Vec::new());
        }
        let mut came_from: HashMap<TaskStatus, TaskStatus> = HashMap::new();
        let mut queue = VecDeque::from([self]);
        while let Some(current) = queue.pop_front() {
            for &next in current.allowed_transitions() {
                if next == self || came_from.contains_key(&next) {
                    continue;
                }
                came_from.insert(next, current);
                if next == target {
                    let mut path = vec![next];
                    let mut cursor = current;
                    while cursor != self {
                        path.push(cursor);
                        cursor = came_from[&cursor];
                    }
                    path.reverse();
                    return Some(path);
                }
                queue.push_back(next);
            }
        }
        None
    }

    /// No outgoing transitions
    pub fn is_terminal(&self) -> bool {
        self.allowed_transitions().is_empty()
    }

    /// Waiting to be handed to a generator
    pub fn is_dispatchable(&self) -> bool {
        matches!(self, TaskStatus::Pending | TaskStatus::RetryPending)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::ValidationFailed => "validation_failed",
            Self::RetryPending => "retry_pending",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown task status: {s}"))
    }
}

use crate::step::StepType;
use crate::task::Task;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use workplan_state::TaskStatus;

/// Task counts by status, overall and per step
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStatistics {
    pub total: usize,
    pub by_status: BTreeMap<TaskStatus, usize>,
    pub by_step: BTreeMap<StepType, BTreeMap<TaskStatus, usize>>,
    /// Failed tasks whose retries ran out
    pub exhausted: usize,
}

impl TaskStatistics {
    pub fn from_tasks<'a>(tasks: impl IntoIterator<Item = &'a Task>) -> Self {
        let mut stats = Self::default();
        for task in tasks {
            stats.total += 1;
            *stats.by_status.entry(task.status).or_default() += 1;
            *stats
                .by_step
                .entry(task.step_type)
                .or_default()
                .entry(task.status)
                .or_default() += 1;
            if task.exhausted {
                stats.exhausted += 1;
            }
        }
        stats
    }

    pub fn count(&self, status: TaskStatus) -> usize {
        self.by_status.get(&status).copied().unwrap_or(0)
    }

    pub fn count_for_step(&self, step: StepType, status: TaskStatus) -> usize {
        self.by_step
            .get(&step)
            .and_then(|counts| counts.get(&status))
            .copied()
            .unwrap_or(0)
    }
}

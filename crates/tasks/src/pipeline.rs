use crate::definition::{TaskDefinition, TaskDefinitionBuilder};
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use workplan_planner::{BatchPlan, BatchPlanner, FileScanner, PlannerError, TokenCounter};

/// A batch plan together with the task definitions built from it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannedWork {
    pub plan: BatchPlan,
    pub definitions: Vec<TaskDefinition>,
}

/// Scan `root`, count tokens, plan batches and turn them into definitions.
pub async fn plan_project(
    root: impl AsRef<Path>,
    planner: &BatchPlanner,
    counter: Arc<dyn TokenCounter>,
) -> Result<PlannedWork> {
    let scanner = FileScanner::new(root.as_ref());
    let entries = tokio::task::spawn_blocking(move || scanner.scan())
        .await
        .map_err(|err| PlannerError::Join(format!("scan task failed: {err}")))?;
    log::debug!("Scanned {} files under {}", entries.len(), root.as_ref().display());

    let plan = planner.analyze_and_plan(entries, counter).await?;
    let definitions = TaskDefinitionBuilder::new().build_all(&plan.batches);
    if !plan.summary.manual_review.is_empty() {
        log::warn!(
            "{} files need manual review: {}",
            plan.summary.manual_review.len(),
            plan.summary.manual_review.join(", ")
        );
    }
    Ok(PlannedWork { plan, definitions })
}

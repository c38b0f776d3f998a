//! # Workplan Tasks
//!
//! Task definitions and orchestration over planned batches.
//!
//! ## Flow
//!
//! ```text
//! BatchPlan
//!     │
//!     ├──> TaskDefinitionBuilder
//!     │      └─> task_1, task_2, ... with expected outputs
//!     │
//!     └──> TaskOrchestrator (per project and step)
//!            ├─> create / enqueue      pending
//!            ├─> get_next_task        in_progress (FIFO)
//!            ├─> check_task_completion artifacts on disk -> completed
//!            ├─> complete_task        completed, for steps that do not auto-complete
//!            └─> retry_task           retry_pending, or failed once exhausted
//! ```
//!
//! The state store owns status. `TaskOrchestrator::open_file` keeps tasks in
//! `tasks.json` next to the state file and picks up where an earlier run
//! stopped.
//!
//! Artifacts live at `<project>/<docs_root>/<step dir>/<output name>`.
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use workplan_planner::{BatchPlanner, HeuristicTokenCounter, PlannerConfig};
//! use workplan_tasks::{plan_project, TaskOrchestrator};
//!
//! #[tokio::main]
//! async fn main() -> workplan_tasks::Result<()> {
//!     let planner = BatchPlanner::new(PlannerConfig::default())?;
//!     let work = plan_project("/path/to/project", &planner,
//!                             Arc::new(HeuristicTokenCounter::default())).await?;
//!
//!     let orchestrator = TaskOrchestrator::in_memory();
//!     orchestrator
//!         .enqueue_definitions(work.definitions, "/path/to/project", "file-docs")
//!         .await?;
//!     while let Some(task) = orchestrator.get_next_task("/path/to/project", "file-docs").await? {
//!         println!("{} -> {:?}", task.id, task.definition.expected_outputs);
//!     }
//!     Ok(())
//! }
//! ```

mod config;
mod definition;
mod error;
mod orchestrator;
mod output;
mod pipeline;
mod repository;
mod stats;
mod step;
mod task;
mod validator;

pub use config::{OrchestratorConfig, WorkplanConfig};
pub use definition::{TaskDefinition, TaskDefinitionBuilder, TaskDetail, TaskKind, TaskMetadata};
pub use error::{Result, TaskError};
pub use orchestrator::{CompletionOutcome, RetryOutcome, TaskFilter, TaskOrchestrator};
pub use output::{chunk_output_name, file_output_name, OutputLayout};
pub use pipeline::{plan_project, PlannedWork};
pub use repository::{FileTaskRepository, InMemoryTaskRepository, TaskRepository};
pub use stats::TaskStatistics;
pub use step::{StepConfig, StepType};
pub use task::{CompletionData, Task};
pub use validator::{CompletionValidator, OutputCheck, ValidationReport, ValidationStrictness};

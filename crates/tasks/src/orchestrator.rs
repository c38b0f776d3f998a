use crate::config::{OrchestratorConfig, WorkplanConfig};
use crate::definition::TaskDefinition;
use crate::error::{Result, TaskError};
use crate::output::OutputLayout;
use crate::repository::{FileTaskRepository, InMemoryTaskRepository, TaskRepository};
use crate::stats::TaskStatistics;
use crate::step::StepType;
use crate::task::{CompletionData, Task};
use crate::validator::{CompletionValidator, ValidationReport};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OnceCell};
use tokio::task::JoinHandle;
use workplan_state::{
    spawn_periodic_flush, unix_now_ms, LoadReport, StateError, StateMetadata, StateRecord,
    TaskStateStore, TaskStatus,
};

/// Result of [`TaskOrchestrator::check_task_completion`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionOutcome {
    pub task_id: String,
    pub status: TaskStatus,
    /// Every expected artifact is present
    pub success: bool,
    /// This check moved the task to `completed`
    pub auto_completed: bool,
    /// The task was already completed; nothing was checked
    pub already_completed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report: Option<ValidationReport>,
}

impl CompletionOutcome {
    pub fn missing_files(&self) -> Vec<String> {
        self.report
            .as_ref()
            .map(ValidationReport::missing_names)
            .unwrap_or_default()
    }
}

/// Result of [`TaskOrchestrator::retry_task`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryOutcome {
    pub task: Task,
    /// Retries ran out; the task is now terminally `failed`
    pub exhausted: bool,
}

/// Selects tasks in [`TaskOrchestrator::list_tasks`]; unset fields match all
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskFilter {
    pub project_path: Option<PathBuf>,
    pub step_type: Option<StepType>,
    pub status: Option<TaskStatus>,
}

impl TaskFilter {
    fn matches(&self, task: &Task) -> bool {
        self.project_path
            .as_ref()
            .map_or(true, |p| *p == task.project_path)
            && self.step_type.map_or(true, |s| s == task.step_type)
            && self.status.map_or(true, |s| s == task.status)
    }
}

/// Task lifecycle on top of the state store: create, dispatch, complete,
/// retry and cancel.
///
/// The store owns status. Every task handed out carries the store's status,
/// and every change goes through the store's transition table before the
/// repository copy is updated. Retry count and the exhausted flag ride along
/// in each transition's metadata so a task can be adopted again from the
/// store alone.
pub struct TaskOrchestrator {
    store: Arc<TaskStateStore>,
    repository: Arc<dyn TaskRepository>,
    validator: CompletionValidator,
    config: OrchestratorConfig,
    sequence: AtomicU64,
    resumed: OnceCell<()>,
    lifecycle: Mutex<()>,
}

impl TaskOrchestrator {
    pub fn new(
        store: Arc<TaskStateStore>,
        repository: Arc<dyn TaskRepository>,
        config: OrchestratorConfig,
    ) -> Result<Self> {
        config.validate().map_err(TaskError::config)?;
        let mut validator = CompletionValidator::new(OutputLayout::new(config.docs_root.clone()));
        if let Some(strictness) = config.strictness {
            validator = validator.with_strictness(strictness);
        }
        Ok(Self::from_parts(store, repository, validator, config))
    }

    /// In-memory store and repository with default settings
    pub fn in_memory() -> Self {
        Self::from_parts(
            Arc::new(TaskStateStore::in_memory()),
            Arc::new(InMemoryTaskRepository::new()),
            CompletionValidator::default(),
            OrchestratorConfig::default(),
        )
    }

    /// File-backed store and task repository, resumed from whatever an
    /// earlier run left behind
    pub async fn open_file(config: &WorkplanConfig) -> Result<(Self, LoadReport)> {
        config.validate()?;
        let (store, report) = TaskStateStore::open_file(&config.store).await?;
        let repository = FileTaskRepository::open(config.resolved_task_file()).await?;
        let orchestrator = Self::new(
            Arc::new(store),
            Arc::new(repository),
            config.orchestrator.clone(),
        )?;
        orchestrator.ensure_resumed().await?;
        Ok((orchestrator, report))
    }

    fn from_parts(
        store: Arc<TaskStateStore>,
        repository: Arc<dyn TaskRepository>,
        validator: CompletionValidator,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            store,
            repository,
            validator,
            config,
            sequence: AtomicU64::new(0),
            resumed: OnceCell::new(),
            lifecycle: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &Arc<TaskStateStore> {
        &self.store
    }

    pub fn validator(&self) -> &CompletionValidator {
        &self.validator
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Schedule `definition` for `project_path` under `step_type`. The task
    /// starts `pending`, or in its stored status when the store already
    /// tracks this task id from an earlier run.
    pub async fn create_task(
        &self,
        definition: TaskDefinition,
        project_path: impl AsRef<Path>,
        step_type: &str,
    ) -> Result<Task> {
        let step: StepType = step_type.parse()?;
        let _guard = self.lifecycle.lock().await;
        self.ensure_resumed().await?;

        let id = Task::task_id(step, &definition.id);
        if self.repository.get(&id).await?.is_some() {
            return Err(TaskError::validation(format!("task {id} already exists")));
        }
        self.create_locked(definition, project_path.as_ref(), step).await
    }

    /// Create one task per definition, in order. Definitions that already
    /// have an identical task are returned as they stand, so the same plan
    /// can be enqueued again after a restart.
    pub async fn enqueue_definitions(
        &self,
        definitions: Vec<TaskDefinition>,
        project_path: impl AsRef<Path>,
        step_type: &str,
    ) -> Result<Vec<Task>> {
        let step: StepType = step_type.parse()?;
        let project_path = project_path.as_ref();
        let _guard = self.lifecycle.lock().await;
        self.ensure_resumed().await?;

        let mut tasks = Vec::with_capacity(definitions.len());
        let mut existing = 0;
        for definition in definitions {
            let id = Task::task_id(step, &definition.id);
            match self.repository.get(&id).await? {
                Some(task)
                    if task.definition == definition && task.project_path == project_path =>
                {
                    existing += 1;
                    tasks.push(self.with_current_status(task).await);
                }
                Some(_) => {
                    return Err(TaskError::validation(format!(
                        "task {id} already exists with a different definition"
                    )));
                }
                None => tasks.push(self.create_locked(definition, project_path, step).await?),
            }
        }
        log::info!(
            "Enqueued {} {step} tasks for {} ({existing} already known)",
            tasks.len(),
            project_path.display()
        );
        Ok(tasks)
    }

    async fn create_locked(
        &self,
        definition: TaskDefinition,
        project_path: &Path,
        step: StepType,
    ) -> Result<Task> {
        if definition.files.is_empty() {
            return Err(TaskError::validation(format!(
                "definition {} has no files",
                definition.id
            )));
        }
        let id = Task::task_id(step, &definition.id);
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);

        let task = match self.store.get_state(&id).await {
            Some(record) => {
                log::info!("Adopting task {id} in status {}", record.status);
                adopt(id, step, project_path, definition, sequence, &record)
            }
            None => {
                let mut metadata = reason_metadata("created");
                metadata.insert("step_type".into(), json!(step.as_str()));
                metadata.insert(
                    "project_path".into(),
                    json!(project_path.display().to_string()),
                );
                metadata.insert("batch_id".into(), json!(definition.metadata.batch_id));
                let record = self.store.set_state(&id, TaskStatus::Pending, metadata).await?;
                adopt(id, step, project_path, definition, sequence, &record)
            }
        };
        self.repository.set(task.clone()).await?;
        self.maybe_flush().await?;

        log::debug!("Created task {} ({})", task.id, task.definition.kind);
        Ok(task)
    }

    /// Hand out the oldest dispatchable task for the project and step,
    /// moving it to `in_progress`. `Ok(None)` when nothing is waiting.
    pub async fn get_next_task(
        &self,
        project_path: impl AsRef<Path>,
        step_type: &str,
    ) -> Result<Option<Task>> {
        let step: StepType = step_type.parse()?;
        let project_path = project_path.as_ref();
        let _guard = self.lifecycle.lock().await;
        self.ensure_resumed().await?;

        let next = self.current_tasks().await?.into_iter().find(|task| {
            task.step_type == step
                && task.project_path == project_path
                && task.status.is_dispatchable()
        });
        let Some(mut task) = next else {
            log::debug!("No pending {step} tasks for {}", project_path.display());
            return Ok(None);
        };

        let metadata = reason_metadata("dispatched");
        self.walk(&mut task, TaskStatus::InProgress, metadata).await?;
        self.repository.set(task.clone()).await?;
        self.maybe_flush().await?;
        Ok(Some(task))
    }

    /// Check the task's artifacts and complete it when they are all present.
    ///
    /// Missing artifacts are reported in the outcome, not as an error.
    /// Errors are structural: unknown task, step mismatch, or a status the
    /// table does not allow to complete. A task whose retries ran out is
    /// never completed; with artifacts missing it is a
    /// [`TaskError::Completion`], otherwise the check is reported and the
    /// task stays `failed`.
    pub async fn check_task_completion(
        &self,
        task_id: &str,
        project_path: impl AsRef<Path>,
        step_type: Option<&str>,
    ) -> Result<CompletionOutcome> {
        let project_path = project_path.as_ref();
        let _guard = self.lifecycle.lock().await;
        self.ensure_resumed().await?;
        let mut task = self.require(task_id).await?;

        if let Some(raw) = step_type {
            let step: StepType = raw.parse()?;
            if step != task.step_type {
                return Err(TaskError::validation(format!(
                    "task {task_id} belongs to step {}, not {step}",
                    task.step_type
                )));
            }
        }

        match task.status {
            TaskStatus::Completed => {
                return Ok(CompletionOutcome {
                    task_id: task.id,
                    status: TaskStatus::Completed,
                    success: true,
                    auto_completed: false,
                    already_completed: true,
                    report: None,
                });
            }
            TaskStatus::Cancelled => return Err(cannot_complete(&task)),
            TaskStatus::Failed if !task.exhausted => return Err(cannot_complete(&task)),
            _ => {}
        }

        let report = self
            .validator
            .validate(&task.definition, project_path, task.step_type)
            .await;

        if task.exhausted && !report.success {
            return Err(TaskError::Completion {
                task_id: task.id,
                missing: report.missing_names(),
            });
        }

        let mut auto_completed = false;
        if !task.exhausted && task.step_type.config().auto_complete {
            if report.success {
                let metadata = reason_metadata("artifacts_present");
                self.walk(&mut task, TaskStatus::Completed, metadata).await?;
                auto_completed = true;
                log::info!("Task {} auto-completed", task.id);
            } else if task.status == TaskStatus::InProgress {
                let mut metadata = reason_metadata("artifacts_missing");
                metadata.insert("missing_files".into(), json!(report.missing_names()));
                self.transition(&mut task, TaskStatus::ValidationFailed, metadata).await?;
            }
        }

        task.completion_data = Some(CompletionData {
            auto_completed,
            checked_at: unix_now_ms(),
            existing_files: report.existing_names(),
            missing_files: report.missing_names(),
        });
        task.updated_at = unix_now_ms();
        self.repository.set(task.clone()).await?;
        self.maybe_flush().await?;

        Ok(CompletionOutcome {
            task_id: task.id,
            status: task.status,
            success: report.success,
            auto_completed,
            already_completed: false,
            report: Some(report),
        })
    }

    /// Mark a task `completed` without checking artifacts. This is how steps
    /// that do not auto-complete are finished. `metadata` is recorded on the
    /// final transition.
    pub async fn complete_task(&self, task_id: &str, metadata: StateMetadata) -> Result<Task> {
        let _guard = self.lifecycle.lock().await;
        self.ensure_resumed().await?;
        let mut task = self.require(task_id).await?;

        if task.exhausted
            || matches!(
                task.status,
                TaskStatus::Completed | TaskStatus::Cancelled | TaskStatus::Failed
            )
        {
            return Err(cannot_complete(&task));
        }

        let mut metadata = metadata;
        metadata
            .entry("reason".to_string())
            .or_insert_with(|| Value::from("completed_manually"));
        self.walk(&mut task, TaskStatus::Completed, metadata).await?;

        self.repository.set(task.clone()).await?;
        self.maybe_flush().await?;
        log::info!("Task {task_id} completed manually");
        Ok(task)
    }

    /// Queue the task for another attempt, or fail it for good once
    /// `retry_count` reaches the limit (`max_retries`, else the step's).
    pub async fn retry_task(
        &self,
        task_id: &str,
        max_retries: Option<u32>,
    ) -> Result<RetryOutcome> {
        let _guard = self.lifecycle.lock().await;
        self.ensure_resumed().await?;
        let mut task = self.require(task_id).await?;

        if task.exhausted {
            return Ok(RetryOutcome {
                task,
                exhausted: true,
            });
        }
        if task.status.is_terminal() {
            return Err(TaskError::validation(format!(
                "task {task_id} is {} and cannot be retried",
                task.status
            )));
        }

        let limit = max_retries.unwrap_or(task.step_type.config().max_retries);
        let exhausted = task.retry_count >= limit;
        if exhausted {
            task.exhausted = true;
            let metadata = reason_metadata("retries_exhausted");
            self.walk(&mut task, TaskStatus::Failed, metadata).await?;
            log::warn!(
                "Task {task_id} failed after {} retries (limit {limit})",
                task.retry_count
            );
        } else {
            task.retry_count += 1;
            if task.status.is_dispatchable() {
                // No self-transitions in the table; only the repository copy changes.
                task.updated_at = unix_now_ms();
            } else {
                let metadata = reason_metadata("retry_requested");
                self.walk(&mut task, TaskStatus::RetryPending, metadata).await?;
            }
            log::info!("Task {task_id} queued for retry {}/{limit}", task.retry_count);
        }

        self.repository.set(task.clone()).await?;
        self.maybe_flush().await?;
        Ok(RetryOutcome { task, exhausted })
    }

    /// Move a task to `cancelled` through whatever the table requires.
    /// Cancelling a `completed` or already `cancelled` task is an error.
    pub async fn cancel_task(&self, task_id: &str) -> Result<Task> {
        let _guard = self.lifecycle.lock().await;
        self.ensure_resumed().await?;
        let mut task = self.require(task_id).await?;
        self.walk(&mut task, TaskStatus::Cancelled, reason_metadata("cancelled")).await?;
        self.repository.set(task.clone()).await?;
        self.maybe_flush().await?;
        Ok(task)
    }

    pub async fn get_task(&self, task_id: &str) -> Result<Option<Task>> {
        self.ensure_resumed().await?;
        match self.repository.get(task_id).await? {
            Some(task) => Ok(Some(self.with_current_status(task).await)),
            None => Ok(None),
        }
    }

    /// Tasks matching `filter`, in creation order
    pub async fn list_tasks(&self, filter: &TaskFilter) -> Result<Vec<Task>> {
        self.ensure_resumed().await?;
        Ok(self
            .current_tasks()
            .await?
            .into_iter()
            .filter(|task| filter.matches(task))
            .collect())
    }

    pub async fn statistics(&self) -> Result<TaskStatistics> {
        self.ensure_resumed().await?;
        let tasks = self.current_tasks().await?;
        Ok(TaskStatistics::from_tasks(&tasks))
    }

    /// Persist the state store now
    pub async fn flush(&self) -> Result<bool> {
        Ok(self.store.flush().await?)
    }

    /// Start the background flush loop, unless `periodic_flush_secs` is 0
    pub fn spawn_periodic_flush(&self) -> Option<JoinHandle<()>> {
        if self.config.periodic_flush_secs == 0 {
            return None;
        }
        Some(spawn_periodic_flush(
            Arc::clone(&self.store),
            Duration::from_secs(self.config.periodic_flush_secs),
        ))
    }

    /// Runs once per orchestrator: continue the creation sequence after the
    /// repository's tasks and restart as `pending` any task the store never
    /// persisted.
    async fn ensure_resumed(&self) -> Result<()> {
        self.resumed.get_or_try_init(|| self.resume()).await?;
        Ok(())
    }

    async fn resume(&self) -> Result<()> {
        let tasks = self.repository.list().await?;
        if let Some(last) = tasks.iter().map(|t| t.sequence).max() {
            self.sequence.fetch_max(last + 1, Ordering::SeqCst);
        }

        let mut restarted = 0usize;
        for mut task in tasks.iter().cloned() {
            if self.store.get_state(&task.id).await.is_some() {
                continue;
            }
            task.status = TaskStatus::Pending;
            task.exhausted = false;
            let metadata = reason_metadata("restarted");
            self.transition(&mut task, TaskStatus::Pending, metadata).await?;
            self.repository.set(task).await?;
            restarted += 1;
        }
        if !tasks.is_empty() {
            log::info!(
                "Resumed {} tasks ({restarted} restarted as pending)",
                tasks.len()
            );
        }
        Ok(())
    }

    async fn require(&self, task_id: &str) -> Result<Task> {
        let task = self
            .repository
            .get(task_id)
            .await?
            .ok_or_else(|| TaskError::NotFound(task_id.to_string()))?;
        Ok(self.with_current_status(task).await)
    }

    async fn with_current_status(&self, mut task: Task) -> Task {
        if let Some(record) = self.store.get_state(&task.id).await {
            task.status = record.status;
        }
        task
    }

    /// Repository tasks in creation order, carrying the store's status
    async fn current_tasks(&self) -> Result<Vec<Task>> {
        let statuses: HashMap<String, TaskStatus> = self
            .store
            .get_all_states(None)
            .await
            .into_iter()
            .map(|record| (record.task_id, record.status))
            .collect();
        let mut tasks = self.repository.list().await?;
        for task in &mut tasks {
            if let Some(status) = statuses.get(&task.id) {
                task.status = *status;
            }
        }
        Ok(tasks)
    }

    async fn transition(
        &self,
        task: &mut Task,
        to: TaskStatus,
        mut metadata: StateMetadata,
    ) -> Result<()> {
        metadata.insert("retry_count".into(), json!(task.retry_count));
        metadata.insert("exhausted".into(), json!(task.exhausted));
        let record = self.store.set_state(&task.id, to, metadata).await?;
        task.status = record.status;
        task.updated_at = record.timestamp;
        Ok(())
    }

    /// Follow the shortest allowed path to `target`. Reaching a terminal
    /// status the task already has is rejected like any invalid transition.
    async fn walk(
        &self,
        task: &mut Task,
        target: TaskStatus,
        metadata: StateMetadata,
    ) -> Result<()> {
        let invalid = || {
            TaskError::from(StateError::InvalidTransition {
                task_id: task.id.clone(),
                from: Some(task.status),
                to: target,
            })
        };
        if task.status == target && target.is_terminal() {
            return Err(invalid());
        }
        let path = task.status.path_to(target).ok_or_else(invalid)?;
        for status in path {
            self.transition(task, status, metadata.clone()).await?;
        }
        Ok(())
    }

    async fn maybe_flush(&self) -> Result<()> {
        if self.store.pending_mutations() >= self.config.flush_every {
            self.store.flush().await?;
        }
        Ok(())
    }
}

/// Build the orchestrator view of a task from its state record
fn adopt(
    id: String,
    step: StepType,
    project_path: &Path,
    definition: TaskDefinition,
    sequence: u64,
    record: &StateRecord,
) -> Task {
    let retry_count = record
        .metadata
        .get("retry_count")
        .and_then(Value::as_u64)
        .and_then(|n| u32::try_from(n).ok())
        .unwrap_or(0);
    let exhausted = record
        .metadata
        .get("exhausted")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    Task {
        id,
        step_type: step,
        project_path: project_path.to_path_buf(),
        status: record.status,
        retry_count,
        created_at: record
            .history
            .first()
            .map_or(record.timestamp, |entry| entry.timestamp),
        updated_at: record.timestamp,
        completion_data: None,
        definition,
        sequence,
        exhausted,
    }
}

fn cannot_complete(task: &Task) -> TaskError {
    StateError::InvalidTransition {
        task_id: task.id.clone(),
        from: Some(task.status),
        to: TaskStatus::Completed,
    }
    .into()
}

fn reason_metadata(reason: &str) -> StateMetadata {
    let mut metadata = StateMetadata::new();
    metadata.insert("reason".into(), Value::from(reason));
    metadata
}

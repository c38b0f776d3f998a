use pretty_assertions::assert_eq;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use workplan_planner::{BatchPlanner, HeuristicTokenCounter, PlannerConfig};
use workplan_state::{LoadReport, StateMetadata, StoreConfig, TaskStateStore, TaskStatus};
use workplan_tasks::{
    plan_project, InMemoryTaskRepository, OrchestratorConfig, StepType, Task, TaskDefinition,
    TaskDetail, TaskError, TaskFilter, TaskKind, TaskMetadata, TaskOrchestrator,
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn padded_lines(lines: usize) -> String {
    (0..lines)
        .map(|i| format!("{:<99}\n", format!("let line_{i} = {i};")))
        .collect()
}

fn single_file(id: &str, rel: &str) -> TaskDefinition {
    TaskDefinition {
        id: id.into(),
        kind: TaskKind::SingleFile,
        strategy: "single_file".into(),
        files: vec![rel.into()],
        estimated_tokens: 16_000,
        expected_outputs: vec![format!("{rel}.md")],
        metadata: TaskMetadata {
            batch_id: format!("single_batch_{id}"),
            detail: TaskDetail::SingleFile { path: rel.into() },
        },
    }
}

async fn write_artifact(orchestrator: &TaskOrchestrator, project: &Path, task: &Task, body: &str) {
    for name in &task.definition.expected_outputs {
        let path = orchestrator
            .validator()
            .layout()
            .resolve(project, task.step_type, name);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.expect("mkdir");
        }
        tokio::fs::write(&path, body).await.expect("write artifact");
    }
}

/// dispatch, find nothing on disk, ask for a retry
async fn fail_attempt(orchestrator: &TaskOrchestrator, project: &Path, id: &str) -> u32 {
    let task = orchestrator
        .get_next_task(project, "file-docs")
        .await
        .expect("dispatch")
        .expect("task available");
    assert_eq!(task.id, id);

    let outcome = orchestrator
        .check_task_completion(id, project, Some("file-docs"))
        .await
        .expect("check");
    assert!(!outcome.success);
    assert_eq!(outcome.status, TaskStatus::ValidationFailed);

    let retry = orchestrator.retry_task(id, None).await.expect("retry");
    assert!(!retry.exhausted);
    assert_eq!(retry.task.status, TaskStatus::RetryPending);
    retry.task.retry_count
}

#[tokio::test]
async fn retries_until_exhausted_then_fails_for_good() {
    init_logging();
    let project = TempDir::new().expect("tempdir");
    let orchestrator = TaskOrchestrator::in_memory();
    let task = orchestrator
        .create_task(single_file("task_1", "src/a.rs"), project.path(), "file-docs")
        .await
        .expect("create");
    assert_eq!(StepType::FileDocs.config().max_retries, 3);

    assert_eq!(fail_attempt(&orchestrator, project.path(), &task.id).await, 1);
    assert_eq!(fail_attempt(&orchestrator, project.path(), &task.id).await, 2);
    // One retry left: the task goes back to the queue.
    assert_eq!(fail_attempt(&orchestrator, project.path(), &task.id).await, 3);

    orchestrator
        .get_next_task(project.path(), "file-docs")
        .await
        .expect("dispatch")
        .expect("retried task is dispatchable");
    orchestrator
        .check_task_completion(&task.id, project.path(), None)
        .await
        .expect("check");
    let retry = orchestrator
        .retry_task(&task.id, None)
        .await
        .expect("retry");
    assert!(retry.exhausted);
    assert_eq!(retry.task.status, TaskStatus::Failed);
    assert_eq!(retry.task.retry_count, 3);

    let again = orchestrator
        .retry_task(&task.id, None)
        .await
        .expect("retry");
    assert!(again.exhausted);
    assert_eq!(again.task.retry_count, 3);
    assert!(orchestrator
        .get_next_task(project.path(), "file-docs")
        .await
        .expect("dispatch")
        .is_none());

    let err = orchestrator
        .check_task_completion(&task.id, project.path(), None)
        .await
        .unwrap_err();
    match err {
        TaskError::Completion { task_id, missing } => {
            assert_eq!(task_id, task.id);
            assert_eq!(missing, vec!["src/a.rs.md".to_string()]);
        }
        other => panic!("unexpected error: {other}"),
    }

    let stats = orchestrator.statistics().await.expect("stats");
    assert_eq!(stats.count(TaskStatus::Failed), 1);
    assert_eq!(stats.exhausted, 1);
}

#[tokio::test]
async fn explicit_retry_limit_overrides_step_default() {
    init_logging();
    let orchestrator = TaskOrchestrator::in_memory();
    let task = orchestrator
        .create_task(single_file("task_1", "src/a.rs"), "/p", "relations")
        .await
        .expect("create");

    let first = orchestrator
        .retry_task(&task.id, Some(1))
        .await
        .expect("retry");
    assert!(!first.exhausted);
    assert_eq!(first.task.status, TaskStatus::Pending);
    assert_eq!(first.task.retry_count, 1);

    let second = orchestrator
        .retry_task(&task.id, Some(1))
        .await
        .expect("retry");
    assert!(second.exhausted);
    assert_eq!(second.task.status, TaskStatus::Failed);
}

#[tokio::test]
async fn completes_exactly_once() {
    init_logging();
    let project = TempDir::new().expect("tempdir");
    let orchestrator = TaskOrchestrator::in_memory();
    let task = orchestrator
        .create_task(single_file("task_1", "src/lib.rs"), project.path(), "file-docs")
        .await
        .expect("create");
    write_artifact(&orchestrator, project.path(), &task, "# lib.rs\n").await;

    let first = orchestrator
        .check_task_completion(&task.id, project.path(), None)
        .await
        .expect("check");
    assert!(first.success);
    assert!(first.auto_completed);
    assert_eq!(first.status, TaskStatus::Completed);

    let second = orchestrator
        .check_task_completion(&task.id, project.path(), None)
        .await
        .expect("check");
    assert!(second.already_completed);
    assert!(!second.auto_completed);

    let history = orchestrator
        .store()
        .get_task_history(&task.id)
        .await
        .expect("history");
    let statuses: Vec<TaskStatus> = history.iter().map(|h| h.status).collect();
    assert_eq!(statuses, vec![TaskStatus::Pending, TaskStatus::InProgress]);

    let stored = orchestrator
        .get_task(&task.id)
        .await
        .expect("get")
        .expect("task");
    let data = stored.completion_data.expect("completion data");
    assert!(data.auto_completed);
    assert_eq!(data.existing_files, vec!["src/lib.rs.md".to_string()]);
}

#[tokio::test]
async fn manual_step_reports_without_completing() {
    init_logging();
    let project = TempDir::new().expect("tempdir");
    let orchestrator = TaskOrchestrator::in_memory();
    let task = orchestrator
        .create_task(single_file("task_1", "README"), project.path(), "root-docs")
        .await
        .expect("create");
    let task = orchestrator
        .get_next_task(project.path(), "root-docs")
        .await
        .expect("dispatch")
        .expect("task");
    write_artifact(&orchestrator, project.path(), &task, "# Overview\n").await;
    assert!(project.path().join("docs/README.md").is_file());

    let outcome = orchestrator
        .check_task_completion(&task.id, project.path(), Some("root-docs"))
        .await
        .expect("check");
    assert!(outcome.success);
    assert!(!outcome.auto_completed);
    assert_eq!(outcome.status, TaskStatus::InProgress);

    let completed = orchestrator
        .complete_task(&task.id, StateMetadata::new())
        .await
        .expect("complete");
    assert_eq!(completed.status, TaskStatus::Completed);
    let stats = orchestrator.statistics().await.expect("stats");
    assert_eq!(stats.count_for_step(StepType::RootDocs, TaskStatus::Completed), 1);
}

#[tokio::test]
async fn exhausted_task_with_artifacts_stays_failed() {
    init_logging();
    let project = TempDir::new().expect("tempdir");
    let orchestrator = TaskOrchestrator::in_memory();
    let task = orchestrator
        .create_task(single_file("task_1", "src/a.rs"), project.path(), "file-docs")
        .await
        .expect("create");
    let retry = orchestrator
        .retry_task(&task.id, Some(0))
        .await
        .expect("retry");
    assert!(retry.exhausted);
    write_artifact(&orchestrator, project.path(), &task, "# late\n").await;

    let outcome = orchestrator
        .check_task_completion(&task.id, project.path(), None)
        .await
        .expect("check");
    assert!(outcome.success);
    assert!(!outcome.auto_completed);
    assert_eq!(outcome.status, TaskStatus::Failed);
    assert!(outcome.missing_files().is_empty());
    assert!(orchestrator
        .complete_task(&task.id, StateMetadata::new())
        .await
        .is_err());
}

#[tokio::test]
async fn cancel_walks_through_failed_when_in_progress() {
    init_logging();
    let orchestrator = TaskOrchestrator::in_memory();
    orchestrator
        .create_task(single_file("task_1", "a.rs"), "/p", "file-docs")
        .await
        .expect("create");
    let task = orchestrator
        .get_next_task("/p", "file-docs")
        .await
        .expect("dispatch")
        .expect("task");

    let cancelled = orchestrator.cancel_task(&task.id).await.expect("cancel");
    assert_eq!(cancelled.status, TaskStatus::Cancelled);
    let record = orchestrator
        .store()
        .get_state(&task.id)
        .await
        .expect("record");
    assert_eq!(record.previous_status, Some(TaskStatus::Failed));

    let cancelled_only = orchestrator
        .list_tasks(&TaskFilter {
            status: Some(TaskStatus::Cancelled),
            ..TaskFilter::default()
        })
        .await
        .expect("list");
    assert_eq!(cancelled_only.len(), 1);
}

#[tokio::test]
async fn plans_project_and_completes_every_task_on_disk() {
    init_logging();
    let project = TempDir::new().expect("tempdir");
    tokio::fs::write(project.path().join("a.rs"), padded_lines(80))
        .await
        .expect("write a.rs");
    tokio::fs::write(project.path().join("b.rs"), padded_lines(120))
        .await
        .expect("write b.rs");
    tokio::fs::write(project.path().join("big.rs"), padded_lines(1_000))
        .await
        .expect("write big.rs");

    let planner = BatchPlanner::new(PlannerConfig::default()).expect("planner");
    let work = plan_project(project.path(), &planner, Arc::new(HeuristicTokenCounter::default()))
        .await
        .expect("plan");

    let ids: Vec<&str> = work.definitions.iter().map(|d| d.id.as_str()).collect();
    assert_eq!(ids, vec!["task_1", "task_2", "task_3"]);
    assert_eq!(work.definitions[0].kind, TaskKind::FileBatch);
    assert_eq!(
        work.definitions[0].expected_outputs,
        vec!["a.rs.md".to_string(), "b.rs.md".to_string()]
    );
    assert_eq!(
        work.definitions[2].expected_outputs,
        vec!["big.rs.part2of2.md".to_string()]
    );

    let state_dir = TempDir::new().expect("state tempdir");
    let store_config = StoreConfig::with_state_file(state_dir.path().join("task-state.json"));
    let (store, report) = TaskStateStore::open_file(&store_config).await.expect("open");
    assert_eq!(report, LoadReport::Fresh);
    let orchestrator = TaskOrchestrator::new(
        Arc::new(store),
        Arc::new(InMemoryTaskRepository::new()),
        OrchestratorConfig::default(),
    )
    .expect("orchestrator");

    orchestrator
        .enqueue_definitions(work.definitions, project.path(), "file-docs")
        .await
        .expect("enqueue");

    while let Some(task) = orchestrator
        .get_next_task(project.path(), "file-docs")
        .await
        .expect("dispatch")
    {
        write_artifact(&orchestrator, project.path(), &task, "# docs\n").await;
        let outcome = orchestrator
            .check_task_completion(&task.id, project.path(), Some("file-docs"))
            .await
            .expect("check");
        assert!(outcome.auto_completed, "{} not completed", task.id);
    }

    let stats = orchestrator.statistics().await.expect("stats");
    assert_eq!(stats.total, 3);
    assert_eq!(stats.count_for_step(StepType::FileDocs, TaskStatus::Completed), 3);
    assert!(orchestrator.flush().await.expect("flush"));

    let (reopened, report) = TaskStateStore::open_file(&store_config).await.expect("reopen");
    assert_eq!(report, LoadReport::Loaded { tasks: 3 });
    let completed = reopened.get_all_states(Some(TaskStatus::Completed)).await;
    assert_eq!(completed.len(), 3);
}

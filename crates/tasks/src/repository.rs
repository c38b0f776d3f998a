use crate::error::Result;
use crate::task::Task;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use workplan_state::StateError;

const TASK_FILE_VERSION: &str = "1.0";

/// Storage for orchestrator-level tasks.
///
/// Lifecycle status is owned by the state store; the repository keeps the
/// task bodies (definition, retry count, completion data) and a copy of the
/// status that the orchestrator overrides with the store's on every read.
#[async_trait]
pub trait TaskRepository: Send + Sync {
    async fn get(&self, id: &str) -> Result<Option<Task>>;

    /// Insert or replace
    async fn set(&self, task: Task) -> Result<()>;

    /// All tasks in creation order
    async fn list(&self) -> Result<Vec<Task>>;

    /// Returns whether a task was removed
    async fn delete(&self, id: &str) -> Result<bool>;
}

#[derive(Debug, Default)]
pub struct InMemoryTaskRepository {
    tasks: RwLock<HashMap<String, Task>>,
}

impl InMemoryTaskRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskRepository for InMemoryTaskRepository {
    async fn get(&self, id: &str) -> Result<Option<Task>> {
        Ok(self.tasks.read().await.get(id).cloned())
    }

    async fn set(&self, task: Task) -> Result<()> {
        self.tasks.write().await.insert(task.id.clone(), task);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Task>> {
        Ok(sorted(self.tasks.read().await.values().cloned().collect()))
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        Ok(self.tasks.write().await.remove(id).is_some())
    }
}

/// `{version, tasks: [...]}` in creation order
#[derive(Debug, Serialize, Deserialize)]
struct TaskFile {
    version: String,
    tasks: Vec<Task>,
}

/// Tasks cached in memory and rewritten to a JSON file after every change.
///
/// Writes go to `<file>.tmp` and are renamed over the file. A failed write
/// leaves both the file and the cache as they were.
#[derive(Debug)]
pub struct FileTaskRepository {
    path: PathBuf,
    tasks: RwLock<HashMap<String, Task>>,
}

impl FileTaskRepository {
    /// Load `path`; a missing file starts empty
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let tasks = match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let file: TaskFile = serde_json::from_slice(&bytes)
                    .map_err(|e| StateError::corrupt(&path, e.to_string()))?;
                if file.version != TASK_FILE_VERSION {
                    return Err(StateError::corrupt(
                        &path,
                        format!("unsupported task file version {}", file.version),
                    )
                    .into());
                }
                file.tasks
                    .into_iter()
                    .map(|task| (task.id.clone(), task))
                    .collect()
            }
            Err(e) if e.kind() == ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(StateError::persistence(&path, e).into()),
        };
        log::info!("Loaded {} tasks from {}", tasks.len(), path.display());
        Ok(Self {
            path,
            tasks: RwLock::new(tasks),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, tasks: &HashMap<String, Task>) -> Result<()> {
        let file = TaskFile {
            version: TASK_FILE_VERSION.to_string(),
            tasks: sorted(tasks.values().cloned().collect()),
        };
        let bytes = serde_json::to_vec_pretty(&file).map_err(StateError::from)?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StateError::persistence(parent, e))?;
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|e| StateError::persistence(&tmp, e))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| StateError::persistence(&self.path, e))?;
        Ok(())
    }
}

#[async_trait]
impl TaskRepository for FileTaskRepository {
    async fn get(&self, id: &str) -> Result<Option<Task>> {
        Ok(self.tasks.read().await.get(id).cloned())
    }

    async fn set(&self, task: Task) -> Result<()> {
        let mut tasks = self.tasks.write().await;
        let id = task.id.clone();
        let previous = tasks.insert(id.clone(), task);
        if let Err(err) = self.persist(&tasks).await {
            match previous {
                Some(previous) => tasks.insert(id, previous),
                None => tasks.remove(&id),
            };
            return Err(err);
        }
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Task>> {
        Ok(sorted(self.tasks.read().await.values().cloned().collect()))
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let mut tasks = self.tasks.write().await;
        let Some(removed) = tasks.remove(id) else {
            return Ok(false);
        };
        if let Err(err) = self.persist(&tasks).await {
            tasks.insert(id.to_string(), removed);
            return Err(err);
        }
        Ok(true)
    }
}

fn sorted(mut tasks: Vec<Task>) -> Vec<Task> {
    tasks.sort_by_key(|t| t.sequence);
    tasks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{TaskDefinition, TaskDetail, TaskKind, TaskMetadata};
    use crate::step::StepType;
    use crate::TaskError;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;
    use workplan_state::TaskStatus;

    fn task(id: &str, sequence: u64) -> Task {
        Task {
            id: format!("file-docs:{id}"),
            step_type: StepType::FileDocs,
            project_path: PathBuf::from("/p"),
            status: TaskStatus::Pending,
            retry_count: 0,
            created_at: 1,
            updated_at: 1,
            completion_data: None,
            definition: TaskDefinition {
                id: id.into(),
                kind: TaskKind::SingleFile,
                strategy: "single_file".into(),
                files: vec!["a.rs".into()],
                estimated_tokens: 10,
                expected_outputs: vec!["a.rs.md".into()],
                metadata: TaskMetadata {
                    batch_id: "single_batch_0001".into(),
                    detail: TaskDetail::SingleFile { path: "a.rs".into() },
                },
            },
            sequence,
            exhausted: false,
        }
    }

    #[tokio::test]
    async fn file_repository_survives_reopen() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("state").join("tasks.json");

        let repo = FileTaskRepository::open(&path).await.unwrap();
        repo.set(task("task_2", 1)).await.unwrap();
        repo.set(task("task_1", 0)).await.unwrap();
        repo.set(task("task_3", 2)).await.unwrap();
        assert!(repo.delete("file-docs:task_3").await.unwrap());
        assert!(!repo.delete("file-docs:task_3").await.unwrap());
        assert!(!path.with_extension("json.tmp").exists());

        let reopened = FileTaskRepository::open(&path).await.unwrap();
        let ids: Vec<String> = reopened
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.id)
            .collect();
        assert_eq!(ids, vec!["file-docs:task_1", "file-docs:task_2"]);
        assert_eq!(
            reopened.get("file-docs:task_2").await.unwrap(),
            Some(task("task_2", 1))
        );
    }

    #[tokio::test]
    async fn unreadable_task_file_is_a_persistence_error() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("tasks.json");
        std::fs::write(&path, b"{ not json").unwrap();

        let err = FileTaskRepository::open(&path).await.unwrap_err();
        assert!(matches!(
            err,
            TaskError::Persistence(StateError::Corrupt { .. })
        ));
    }
}

use crate::backend::{FileBackend, MemoryBackend, StateBackend};
use crate::config::StoreConfig;
use crate::error::{Result, StateError};
use crate::record::{HistoryEntry, StateMetadata, StateRecord, StateSnapshot};
use crate::status::TaskStatus;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;

/// How the store came up
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum LoadReport {
    /// Nothing persisted yet
    Fresh,
    Loaded { tasks: usize },
    /// The snapshot was unreadable and the newest backup replaced it
    RestoredFromBackup {
        backup: String,
        original_error: String,
        tasks: usize,
    },
}

/// One requested transition in a batch update
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateUpdate {
    pub task_id: String,
    pub status: TaskStatus,
    #[serde(default)]
    pub metadata: StateMetadata,
}

impl StateUpdate {
    pub fn new(task_id: impl Into<String>, status: TaskStatus) -> Self {
        Self {
            task_id: task_id.into(),
            status,
            metadata: StateMetadata::new(),
        }
    }
}

/// Per-item result of [`TaskStateStore::batch_update_states`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateOutcome {
    pub task_id: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Keyed task state machine with history, explicit flush and backups.
///
/// Mutations only touch memory. [`flush`](Self::flush) writes a snapshot
/// (after backing up the previous one); disk writes are serialized by a
/// store-wide lock.
pub struct TaskStateStore {
    backend: Arc<dyn StateBackend>,
    records: RwLock<BTreeMap<String, StateRecord>>,
    write_lock: Mutex<()>,
    generation: AtomicU64,
    saved_generation: AtomicU64,
    last_saved_ms: AtomicU64,
    history_limit: usize,
}

impl TaskStateStore {
    /// Load from `backend`. A missing snapshot starts empty; an unreadable one
    /// gets exactly one restore attempt from the newest backup.
    pub async fn open(
        backend: Arc<dyn StateBackend>,
        history_limit: usize,
    ) -> Result<(Self, LoadReport)> {
        let loader = Arc::clone(&backend);
        let (states, report) =
            tokio::task::spawn_blocking(move || load_or_restore(loader.as_ref()))
                .await
                .map_err(|e| StateError::Join(format!("state load task failed: {e}")))??;

        match &report {
            LoadReport::Fresh => log::info!(
                "No task state at {}, starting empty",
                backend.location().display()
            ),
            LoadReport::Loaded { tasks } => log::info!("Loaded {tasks} task states"),
            LoadReport::RestoredFromBackup {
                backup,
                original_error,
                tasks,
            } => log::warn!(
                "Task state unreadable ({original_error}); restored {tasks} states from backup {backup}"
            ),
        }

        let store = Self {
            backend,
            records: RwLock::new(states),
            write_lock: Mutex::new(()),
            generation: AtomicU64::new(0),
            saved_generation: AtomicU64::new(0),
            last_saved_ms: AtomicU64::new(0),
            history_limit: history_limit.max(1),
        };
        Ok((store, report))
    }

    /// File-backed store described by `config`
    pub async fn open_file(config: &StoreConfig) -> Result<(Self, LoadReport)> {
        config.validate().map_err(StateError::InvalidConfig)?;
        let backend: Arc<dyn StateBackend> = Arc::new(FileBackend::from_config(config));
        Self::open(backend, config.history_limit).await
    }

    /// Empty store over a [`MemoryBackend`]
    pub fn in_memory() -> Self {
        Self {
            backend: Arc::new(MemoryBackend::default()),
            records: RwLock::new(BTreeMap::new()),
            write_lock: Mutex::new(()),
            generation: AtomicU64::new(0),
            saved_generation: AtomicU64::new(0),
            last_saved_ms: AtomicU64::new(0),
            history_limit: crate::config::DEFAULT_HISTORY_LIMIT,
        }
    }

    pub fn backend(&self) -> &Arc<dyn StateBackend> {
        &self.backend
    }

    /// Validate and apply one transition. A task without a record may only
    /// start as `pending`. Rejections leave the store untouched.
    pub async fn set_state(
        &self,
        task_id: &str,
        status: TaskStatus,
        metadata: StateMetadata,
    ) -> Result<StateRecord> {
        let mut records = self.records.write().await;
        let record = apply(&mut records, task_id, status, metadata, self.history_limit)?;
        self.generation.fetch_add(1, Ordering::SeqCst);
        log::debug!(
            "Task {task_id}: {} -> {status}",
            record.previous_status.map_or("none", TaskStatus::as_str)
        );
        Ok(record)
    }

    pub async fn get_state(&self, task_id: &str) -> Option<StateRecord> {
        self.records.read().await.get(task_id).cloned()
    }

    /// All records, optionally only those in `filter`, ordered by task id
    pub async fn get_all_states(&self, filter: Option<TaskStatus>) -> Vec<StateRecord> {
        self.records
            .read()
            .await
            .values()
            .filter(|r| filter.map_or(true, |status| r.status == status))
            .cloned()
            .collect()
    }

    /// Earlier states of a task, oldest first
    pub async fn get_task_history(&self, task_id: &str) -> Result<Vec<HistoryEntry>> {
        self.records
            .read()
            .await
            .get(task_id)
            .map(|r| r.history.clone())
            .ok_or_else(|| StateError::NotFound(task_id.to_string()))
    }

    pub async fn delete_state(&self, task_id: &str) -> Result<StateRecord> {
        let removed = self
            .records
            .write()
            .await
            .remove(task_id)
            .ok_or_else(|| StateError::NotFound(task_id.to_string()))?;
        self.generation.fetch_add(1, Ordering::SeqCst);
        Ok(removed)
    }

    /// Apply updates in order. Each item succeeds or fails on its own.
    pub async fn batch_update_states(&self, updates: Vec<StateUpdate>) -> Vec<UpdateOutcome> {
        let mut records = self.records.write().await;
        let mut outcomes = Vec::with_capacity(updates.len());
        for update in updates {
            let outcome = match apply(
                &mut records,
                &update.task_id,
                update.status,
                update.metadata,
                self.history_limit,
            ) {
                Ok(record) => {
                    self.generation.fetch_add(1, Ordering::SeqCst);
                    UpdateOutcome {
                        task_id: update.task_id,
                        success: true,
                        status: Some(record.status),
                        error: None,
                    }
                }
                Err(e) => {
                    let status = records.get(update.task_id.as_str()).map(|r| r.status);
                    UpdateOutcome {
                        task_id: update.task_id,
                        success: false,
                        status,
                        error: Some(e.to_string()),
                    }
                }
            };
            outcomes.push(outcome);
        }
        outcomes
    }

    /// Back up what is on disk, then clear every record and persist the
    /// empty state.
    pub async fn reset(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut records = self.records.write().await;
        let cleared = records.len();

        self.write_snapshot(StateSnapshot::new(BTreeMap::new())).await?;
        records.clear();
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.mark_saved(generation);
        log::info!("Reset task state ({cleared} records cleared)");
        Ok(())
    }

    /// Persist if anything changed since the last save. Returns whether a
    /// snapshot was written.
    pub async fn flush(&self) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let (snapshot, generation) = {
            let records = self.records.read().await;
            let generation = self.generation.load(Ordering::SeqCst);
            if generation == self.saved_generation.load(Ordering::SeqCst) {
                return Ok(false);
            }
            (StateSnapshot::new(records.clone()), generation)
        };

        let count = snapshot.states.len();
        self.write_snapshot(snapshot).await?;
        self.mark_saved(generation);
        log::info!("Flushed {count} task states to {}", self.backend.location().display());
        Ok(true)
    }

    /// Mutations not yet flushed
    pub fn pending_mutations(&self) -> u64 {
        self.generation
            .load(Ordering::SeqCst)
            .saturating_sub(self.saved_generation.load(Ordering::SeqCst))
    }

    pub fn is_dirty(&self) -> bool {
        self.pending_mutations() > 0
    }

    /// Unix milliseconds of the last successful save
    pub fn last_saved(&self) -> Option<u64> {
        match self.last_saved_ms.load(Ordering::SeqCst) {
            0 => None,
            ms => Some(ms),
        }
    }

    async fn write_snapshot(&self, snapshot: StateSnapshot) -> Result<()> {
        let backend = Arc::clone(&self.backend);
        tokio::task::spawn_blocking(move || -> Result<()> {
            if let Some(name) = backend.backup()? {
                log::debug!("Created state backup {name}");
            }
            backend.persist(&snapshot)
        })
        .await
        .map_err(|e| StateError::Join(format!("state write task failed: {e}")))?
    }

    fn mark_saved(&self, generation: u64) {
        self.saved_generation.fetch_max(generation, Ordering::SeqCst);
        self.last_saved_ms
            .store(crate::record::unix_now_ms(), Ordering::SeqCst);
    }
}

/// Flush `store` every `interval` while it has unsaved changes.
pub fn spawn_periodic_flush(store: Arc<TaskStateStore>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if !store.is_dirty() {
                continue;
            }
            if let Err(e) = store.flush().await {
                log::warn!("Periodic state flush failed: {e}");
            }
        }
    })
}

fn apply(
    records: &mut BTreeMap<String, StateRecord>,
    task_id: &str,
    status: TaskStatus,
    metadata: StateMetadata,
    history_limit: usize,
) -> Result<StateRecord> {
    match records.get_mut(task_id) {
        Some(record) => {
            if !record.status.can_transition_to(status) {
                return Err(StateError::InvalidTransition {
                    task_id: task_id.to_string(),
                    from: Some(record.status),
                    to: status,
                });
            }
            record.advance(status, metadata, history_limit);
            Ok(record.clone())
        }
        None => {
            if status != TaskStatus::Pending {
                return Err(StateError::InvalidTransition {
                    task_id: task_id.to_string(),
                    from: None,
                    to: status,
                });
            }
            let record = StateRecord::new(task_id, status, metadata);
            records.insert(task_id.to_string(), record.clone());
            Ok(record)
        }
    }
}

fn load_or_restore(
    backend: &dyn StateBackend,
) -> Result<(BTreeMap<String, StateRecord>, LoadReport)> {
    let original_error = match backend.load() {
        Ok(None) => return Ok((BTreeMap::new(), LoadReport::Fresh)),
        Ok(Some(snapshot)) => {
            let tasks = snapshot.states.len();
            return Ok((snapshot.states, LoadReport::Loaded { tasks }));
        }
        Err(e) => e,
    };

    match backend.restore_latest_backup() {
        Ok(Some((backup, snapshot))) => {
            let tasks = snapshot.states.len();
            Ok((
                snapshot.states,
                LoadReport::RestoredFromBackup {
                    backup,
                    original_error: original_error.to_string(),
                    tasks,
                },
            ))
        }
        Ok(None) => Err(StateError::corrupt(
            backend.location(),
            format!("{original_error}; no backup available"),
        )),
        Err(restore_error) => Err(StateError::corrupt(
            backend.location(),
            format!("{original_error}; backup restore failed: {restore_error}"),
        )),
    }
}

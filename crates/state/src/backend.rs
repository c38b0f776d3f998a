use crate::config::StoreConfig;
use crate::error::{Result, StateError};
use crate::record::{unix_now_ms, StateSnapshot};
use fs2::FileExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Storage behind [`TaskStateStore`](crate::TaskStateStore).
///
/// Calls are blocking; the store runs them on the blocking pool.
pub trait StateBackend: Send + Sync {
    /// Human-readable location used in errors and logs
    fn location(&self) -> PathBuf;

    /// Current snapshot, `None` when nothing was ever persisted
    fn load(&self) -> Result<Option<StateSnapshot>>;

    /// Replace the current snapshot
    fn persist(&self, snapshot: &StateSnapshot) -> Result<()>;

    /// Copy the current snapshot aside. Returns the backup name, or `None`
    /// when there is nothing to copy yet.
    fn backup(&self) -> Result<Option<String>>;

    /// Reinstate the newest backup as the current snapshot. Only that one
    /// backup is tried.
    fn restore_latest_backup(&self) -> Result<Option<(String, StateSnapshot)>>;
}

#[derive(Debug, Default)]
struct MemoryInner {
    current: Option<Vec<u8>>,
    backups: Vec<(String, Vec<u8>)>,
}

/// Keeps serialized snapshots in memory; used by tests and dry runs
#[derive(Debug)]
pub struct MemoryBackend {
    inner: Mutex<MemoryInner>,
    max_backups: usize,
    seq: AtomicU64,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_MAX_BACKUPS)
    }
}

impl MemoryBackend {
    pub fn new(max_backups: usize) -> Self {
        Self {
            inner: Mutex::new(MemoryInner::default()),
            max_backups: max_backups.max(1),
            seq: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MemoryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Overwrite the current snapshot with raw bytes
    pub fn write_raw(&self, bytes: impl Into<Vec<u8>>) {
        self.lock().current = Some(bytes.into());
    }

    pub fn backup_names(&self) -> Vec<String> {
        self.lock().backups.iter().map(|(name, _)| name.clone()).collect()
    }
}

impl StateBackend for MemoryBackend {
    fn location(&self) -> PathBuf {
        PathBuf::from("memory://task-state")
    }

    fn load(&self) -> Result<Option<StateSnapshot>> {
        let inner = self.lock();
        match &inner.current {
            None => Ok(None),
            Some(bytes) => StateSnapshot::from_slice(bytes)
                .map(Some)
                .map_err(|reason| StateError::corrupt(self.location(), reason)),
        }
    }

    fn persist(&self, snapshot: &StateSnapshot) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(snapshot)?;
        self.lock().current = Some(bytes);
        Ok(())
    }

    fn backup(&self) -> Result<Option<String>> {
        let mut inner = self.lock();
        let Some(current) = inner.current.clone() else {
            return Ok(None);
        };
        let name = backup_name("memory", unix_now_ms(), &self.seq);
        inner.backups.push((name.clone(), current));
        if inner.backups.len() > self.max_backups {
            let overflow = inner.backups.len() - self.max_backups;
            inner.backups.drain(..overflow);
        }
        Ok(Some(name))
    }

    fn restore_latest_backup(&self) -> Result<Option<(String, StateSnapshot)>> {
        let mut inner = self.lock();
        let Some((name, bytes)) = inner.backups.last().cloned() else {
            return Ok(None);
        };
        let snapshot = StateSnapshot::from_slice(&bytes).map_err(|reason| {
            StateError::corrupt(self.location(), format!("backup {name}: {reason}"))
        })?;
        inner.current = Some(bytes);
        Ok(Some((name, snapshot)))
    }
}

/// JSON snapshot on disk with timestamped sibling backups.
///
/// Writes go through `<file>.json.tmp` then rename, under an exclusive
/// `<file>.lock` so two processes never interleave a save.
#[derive(Debug)]
pub struct FileBackend {
    state_file: PathBuf,
    backup_dir: PathBuf,
    max_backups: usize,
    seq: AtomicU64,
}

impl FileBackend {
    pub fn new(
        state_file: impl Into<PathBuf>,
        backup_dir: impl Into<PathBuf>,
        max_backups: usize,
    ) -> Self {
        Self {
            state_file: state_file.into(),
            backup_dir: backup_dir.into(),
            max_backups: max_backups.max(1),
            seq: AtomicU64::new(0),
        }
    }

    pub fn from_config(config: &StoreConfig) -> Self {
        Self::new(
            config.state_file.clone(),
            config.resolved_backup_dir(),
            config.max_backups,
        )
    }

    pub fn state_file(&self) -> &Path {
        &self.state_file
    }

    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    fn stem(&self) -> String {
        self.state_file
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "state".to_string())
    }

    /// Backup files, oldest first
    pub fn list_backups(&self) -> Result<Vec<PathBuf>> {
        let prefix = format!("{}-", self.stem());
        let entries = match std::fs::read_dir(&self.backup_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StateError::persistence(&self.backup_dir, e)),
        };

        let mut backups: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with(&prefix) && n.ends_with(".json"))
            })
            .collect();
        // Names embed zero-padded millis and sequence, so lexical order is age order.
        backups.sort();
        Ok(backups)
    }

    fn prune_backups(&self) -> Result<()> {
        let backups = self.list_backups()?;
        if backups.len() <= self.max_backups {
            return Ok(());
        }
        let overflow = backups.len() - self.max_backups;
        for stale in &backups[..overflow] {
            if let Err(e) = std::fs::remove_file(stale) {
                log::warn!("Failed to prune backup {}: {e}", stale.display());
            }
        }
        Ok(())
    }

    fn acquire_lock(&self) -> Result<std::fs::File> {
        let lock_path = self.state_file.with_extension("lock");
        ensure_parent(&lock_path)?;
        let file = std::fs::OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(|e| StateError::persistence(&lock_path, e))?;
        file.lock_exclusive()
            .map_err(|e| StateError::persistence(&lock_path, e))?;
        Ok(file)
    }

    fn write_atomic(&self, bytes: &[u8]) -> Result<()> {
        ensure_parent(&self.state_file)?;
        let tmp = self.state_file.with_extension("json.tmp");
        std::fs::write(&tmp, bytes).map_err(|e| StateError::persistence(&tmp, e))?;
        std::fs::rename(&tmp, &self.state_file)
            .map_err(|e| StateError::persistence(&self.state_file, e))
    }
}

impl StateBackend for FileBackend {
    fn location(&self) -> PathBuf {
        self.state_file.clone()
    }

    fn load(&self) -> Result<Option<StateSnapshot>> {
        let bytes = match std::fs::read(&self.state_file) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StateError::persistence(&self.state_file, e)),
        };
        StateSnapshot::from_slice(&bytes)
            .map(Some)
            .map_err(|reason| StateError::corrupt(&self.state_file, reason))
    }

    fn persist(&self, snapshot: &StateSnapshot) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(snapshot)?;
        let lock = self.acquire_lock()?;
        let result = self.write_atomic(&bytes);
        let _ = lock.unlock();
        result
    }

    fn backup(&self) -> Result<Option<String>> {
        if !self.state_file.exists() {
            return Ok(None);
        }
        std::fs::create_dir_all(&self.backup_dir)
            .map_err(|e| StateError::persistence(&self.backup_dir, e))?;

        let name = backup_name(&self.stem(), unix_now_ms(), &self.seq);
        let target = self.backup_dir.join(&name);
        std::fs::copy(&self.state_file, &target).map_err(|e| StateError::persistence(&target, e))?;
        self.prune_backups()?;
        log::debug!("Backed up {} to {}", self.state_file.display(), target.display());
        Ok(Some(name))
    }

    fn restore_latest_backup(&self) -> Result<Option<(String, StateSnapshot)>> {
        let Some(latest) = self.list_backups()?.pop() else {
            return Ok(None);
        };
        let name = latest
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let bytes = std::fs::read(&latest).map_err(|e| StateError::persistence(&latest, e))?;
        let snapshot = StateSnapshot::from_slice(&bytes)
            .map_err(|reason| StateError::corrupt(&latest, reason))?;

        let lock = self.acquire_lock()?;
        let result = self.write_atomic(&bytes);
        let _ = lock.unlock();
        result?;

        Ok(Some((name, snapshot)))
    }
}

fn ensure_parent(path: &Path) -> Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            std::fs::create_dir_all(parent).map_err(|e| StateError::persistence(parent, e))
        }
        _ => Ok(()),
    }
}

fn backup_name(stem: &str, unix_ms: u64, seq: &AtomicU64) -> String {
    let n = seq.fetch_add(1, Ordering::Relaxed) % 10_000;
    format!("{stem}-{unix_ms:013}-{n:04}.json")
}

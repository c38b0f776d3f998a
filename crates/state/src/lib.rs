//! # Workplan State
//!
//! Durable task lifecycle state.
//!
//! ## Transitions
//!
//! ```text
//! pending           -> in_progress, cancelled
//! in_progress       -> completed, failed, validation_failed
//! failed            -> retry_pending, cancelled
//! validation_failed -> retry_pending, in_progress
//! retry_pending     -> in_progress, failed, cancelled
//! completed, cancelled: terminal
//! ```
//!
//! ## Persistence
//!
//! Mutations stay in memory until [`TaskStateStore::flush`]. Each flush
//! copies the previous snapshot into the backup directory
//! (`<stem>-<unix_ms>-<seq>.json`, newest 10 kept) and then replaces the
//! snapshot atomically. An unreadable snapshot is recovered from the newest
//! backup on open.
//!
//! ## Example
//!
//! ```no_run
//! use workplan_state::{StateMetadata, StoreConfig, TaskStateStore, TaskStatus};
//!
//! #[tokio::main]
//! async fn main() -> workplan_state::Result<()> {
//!     let config = StoreConfig::with_state_file(".workplan/task-state.json");
//!     let (store, report) = TaskStateStore::open_file(&config).await?;
//!     println!("{report:?}");
//!
//!     store.set_state("task_1", TaskStatus::Pending, StateMetadata::new()).await?;
//!     store.flush().await?;
//!     Ok(())
//! }
//! ```

mod backend;
mod config;
mod error;
mod record;
mod status;
mod store;

pub use backend::{FileBackend, MemoryBackend, StateBackend};
pub use config::{StoreConfig, DEFAULT_HISTORY_LIMIT, DEFAULT_MAX_BACKUPS};
pub use error::{Result, StateError};
pub use record::{
    unix_now_ms, HistoryEntry, StateMetadata, StateRecord, StateSnapshot, SNAPSHOT_VERSION,
};
pub use status::TaskStatus;
pub use store::{spawn_periodic_flush, LoadReport, StateUpdate, TaskStateStore, UpdateOutcome};

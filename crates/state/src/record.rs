use crate::status::TaskStatus;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

/// Free-form metadata attached to a transition
pub type StateMetadata = BTreeMap<String, Value>;

/// Version tag written into every snapshot
pub const SNAPSHOT_VERSION: &str = "1.0";

/// A status the task held before a later transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub status: TaskStatus,
    pub timestamp: u64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: StateMetadata,
}

/// Current state of one task plus its recent history (oldest first)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateRecord {
    pub task_id: String,
    pub status: TaskStatus,
    #[serde(default)]
    pub previous_status: Option<TaskStatus>,
    /// Unix milliseconds of the last transition
    pub timestamp: u64,
    #[serde(default)]
    pub metadata: StateMetadata,
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
}

impl StateRecord {
    pub fn new(task_id: impl Into<String>, status: TaskStatus, metadata: StateMetadata) -> Self {
        Self {
            task_id: task_id.into(),
            status,
            previous_status: None,
            timestamp: unix_now_ms(),
            metadata,
            history: Vec::new(),
        }
    }

    /// Move to `status`, pushing the current state onto history and keeping
    /// at most `history_limit` entries. The caller checks the transition.
    pub(crate) fn advance(
        &mut self,
        status: TaskStatus,
        metadata: StateMetadata,
        history_limit: usize,
    ) {
        let previous = HistoryEntry {
            status: self.status,
            timestamp: self.timestamp,
            metadata: std::mem::replace(&mut self.metadata, metadata),
        };
        self.history.push(previous);
        if self.history.len() > history_limit {
            let overflow = self.history.len() - history_limit;
            self.history.drain(..overflow);
        }
        self.previous_status = Some(self.status);
        self.status = status;
        self.timestamp = unix_now_ms();
    }
}

/// Persisted form: `{version, timestamp, states: {task_id: record}}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub version: String,
    pub timestamp: u64,
    pub states: BTreeMap<String, StateRecord>,
}

impl StateSnapshot {
    pub fn new(states: BTreeMap<String, StateRecord>) -> Self {
        Self {
            version: SNAPSHOT_VERSION.to_string(),
            timestamp: unix_now_ms(),
            states,
        }
    }

    /// Parse and check the version tag
    pub fn from_slice(bytes: &[u8]) -> std::result::Result<Self, String> {
        let snapshot: Self = serde_json::from_slice(bytes).map_err(|e| e.to_string())?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(format!(
                "unsupported snapshot version {} (expected {SNAPSHOT_VERSION})",
                snapshot.version
            ));
        }
        Ok(snapshot)
    }
}

pub fn unix_now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

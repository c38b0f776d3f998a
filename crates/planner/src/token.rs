use crate::error::{PlannerError, Result};
use crate::scanner::InventoryEntry;
use crate::types::{FileRecord, TokenResult};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Token-counting capability supplied by the caller.
///
/// Implementations must not panic on unreadable input; they report the
/// failure as [`TokenResult::Error`] so one bad file never aborts a run.
pub trait TokenCounter: Send + Sync {
    /// Count tokens for `path`. When `content` is `None` the counter reads
    /// the file itself.
    fn calculate_tokens(&self, path: &Path, content: Option<&str>, language: &str) -> TokenResult;
}

/// Byte-ratio estimator (~4 bytes per token for source code)
#[derive(Debug, Clone, Copy)]
pub struct HeuristicTokenCounter {
    bytes_per_token: usize,
}

impl HeuristicTokenCounter {
    #[must_use]
    pub fn new(bytes_per_token: usize) -> Self {
        Self {
            bytes_per_token: bytes_per_token.max(1),
        }
    }

    #[must_use]
    pub fn estimate(&self, content: &str) -> usize {
        content.len().div_ceil(self.bytes_per_token)
    }
}

impl Default for HeuristicTokenCounter {
    fn default() -> Self {
        Self::new(4)
    }
}

impl TokenCounter for HeuristicTokenCounter {
    fn calculate_tokens(&self, path: &Path, content: Option<&str>, _language: &str) -> TokenResult {
        if let Some(content) = content {
            return TokenResult::success(self.estimate(content));
        }

        match std::fs::read(path) {
            Ok(bytes) => match String::from_utf8(bytes) {
                Ok(text) => TokenResult::success(self.estimate(&text)),
                Err(_) => TokenResult::error("content is not valid UTF-8"),
            },
            Err(err) => TokenResult::error(format!("read failed: {err}")),
        }
    }
}

/// Count tokens for every inventory entry with at most `concurrency` counts
/// in flight. Records come back in inventory order.
pub async fn analyze_inventory(
    entries: Vec<InventoryEntry>,
    counter: Arc<dyn TokenCounter>,
    concurrency: usize,
) -> Result<Vec<FileRecord>> {
    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut pending = Vec::with_capacity(entries.len());

    for entry in entries {
        let permit = Arc::clone(&semaphore)
            .acquire_owned()
            .await
            .map_err(|err| PlannerError::Join(format!("analysis semaphore closed: {err}")))?;
        let counter = Arc::clone(&counter);
        let fallback = entry.clone();
        let handle = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            let result = counter.calculate_tokens(&entry.path, None, &entry.language);
            entry.into_record(result)
        });
        pending.push((fallback, handle));
    }

    let mut records = Vec::with_capacity(pending.len());
    let mut failures = 0usize;
    for (fallback, handle) in pending {
        let record = match handle.await {
            Ok(record) => record,
            Err(err) => {
                log::warn!(
                    "Token counting aborted for {}: {err}",
                    fallback.relative_path
                );
                fallback.into_record(TokenResult::error(format!("token counter aborted: {err}")))
            }
        };
        if record.token_count.is_error() {
            failures += 1;
        }
        records.push(record);
    }

    log::info!(
        "Analyzed {} files ({} failed token counting)",
        records.len(),
        failures
    );
    Ok(records)
}

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Outcome of counting tokens for one file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TokenResult {
    Success { tokens: usize },
    Error { reason: String },
}

impl TokenResult {
    #[must_use]
    pub const fn success(tokens: usize) -> Self {
        Self::Success { tokens }
    }

    pub fn error(reason: impl Into<String>) -> Self {
        Self::Error {
            reason: reason.into(),
        }
    }

    /// Token count, if counting succeeded
    #[must_use]
    pub const fn tokens(&self) -> Option<usize> {
        match self {
            Self::Success { tokens } => Some(*tokens),
            Self::Error { .. } => None,
        }
    }

    #[must_use]
    pub const fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }
}

/// One file of the inventory after token analysis
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Location the file can be read from
    pub path: PathBuf,

    /// Stable project-relative name (forward slashes)
    pub relative_path: String,

    /// Size in bytes
    pub size: u64,

    /// Token count or the reason it could not be computed
    pub token_count: TokenResult,

    /// Language label (lowercase extension, `unknown` when absent)
    pub language: String,

    /// Why this file needs manual handling, if it does
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis_error: Option<String>,
}

impl FileRecord {
    /// Create a record whose relative name is the path itself
    pub fn new(path: impl Into<PathBuf>, size: u64, token_count: TokenResult) -> Self {
        let path = path.into();
        let relative_path = normalize_relative(&path);
        let language = language_label(&path);
        let analysis_error = match &token_count {
            TokenResult::Error { reason } => Some(reason.clone()),
            TokenResult::Success { .. } => None,
        };
        Self {
            path,
            relative_path,
            size,
            token_count,
            language,
            analysis_error,
        }
    }

    /// Builder: set the project-relative name
    #[must_use]
    pub fn relative_path(mut self, relative: impl Into<String>) -> Self {
        self.relative_path = relative.into();
        self
    }

    /// Builder: set the language label
    #[must_use]
    pub fn language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    /// Token count, if counting succeeded
    #[must_use]
    pub const fn tokens(&self) -> Option<usize> {
        self.token_count.tokens()
    }

    /// Flag this record for manual handling
    pub fn mark_error(&mut self, reason: impl Into<String>) {
        self.analysis_error = Some(reason.into());
    }
}

/// Size tier of a file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileCategory {
    Small,
    Medium,
    Large,
    Error,
}

impl FileCategory {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Small => "small",
            Self::Medium => "medium",
            Self::Large => "large",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for FileCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of work unit produced by a strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchKind {
    CombinedBatch,
    SingleBatch,
    LargeFileChunk,
    /// A kind this version does not know, read from an external plan
    #[serde(other)]
    Unrecognized,
}

impl BatchKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CombinedBatch => "combined_batch",
            Self::SingleBatch => "single_batch",
            Self::LargeFileChunk => "large_file_chunk",
            Self::Unrecognized => "unrecognized",
        }
    }
}

impl fmt::Display for BatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where chunk boundaries of a large file came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoundarySource {
    Structural,
    LineWindow,
}

/// A file inside a batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchFile {
    pub path: PathBuf,
    pub relative_path: String,
    pub tokens: usize,
    pub language: String,
}

impl From<&FileRecord> for BatchFile {
    fn from(record: &FileRecord) -> Self {
        Self {
            path: record.path.clone(),
            relative_path: record.relative_path.clone(),
            tokens: record.tokens().unwrap_or(0),
            language: record.language.clone(),
        }
    }
}

/// Non-owning description of the file a chunk was cut from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentFileInfo {
    pub relative_path: String,
    pub total_tokens: usize,
    pub total_lines: usize,
    pub size: u64,
}

/// Position of a chunk within its parent file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkInfo {
    /// 0-based chunk position
    pub chunk_index: usize,
    pub total_chunks: usize,
    /// First line (1-indexed)
    pub start_line: usize,
    /// Last line (1-indexed, inclusive)
    pub end_line: usize,
    pub parent_file_info: ParentFileInfo,
}

impl ChunkInfo {
    #[must_use]
    pub const fn line_count(&self) -> usize {
        self.end_line.saturating_sub(self.start_line) + 1
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchMetadata {
    pub file_count: usize,
    pub source_category: FileCategory,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boundary_source: Option<BoundarySource>,
}

/// A bounded unit of work sized to the consumer's token budget
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchResult {
    pub batch_id: String,
    #[serde(rename = "type")]
    pub kind: BatchKind,
    pub files: Vec<BatchFile>,
    pub estimated_tokens: usize,
    pub strategy: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_info: Option<ChunkInfo>,
    pub metadata: BatchMetadata,
}

impl BatchResult {
    #[must_use]
    pub fn file_paths(&self) -> Vec<String> {
        self.files.iter().map(|f| f.relative_path.clone()).collect()
    }
}

/// Lowercase extension used as the language label.
#[must_use]
pub fn language_label(path: &Path) -> String {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_lowercase)
        .unwrap_or_else(|| "unknown".to_string())
}

fn normalize_relative(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

use crate::output::{chunk_output_name, file_output_name};
use serde::{Deserialize, Serialize};
use std::fmt;
use workplan_planner::{BatchKind, BatchResult};

/// Kind of generation task, one per batch kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    FileBatch,
    SingleFile,
    LargeFileChunk,
}

impl TaskKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::FileBatch => "file_batch",
            Self::SingleFile => "single_file",
            Self::LargeFileChunk => "large_file_chunk",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shape-specific detail carried from the batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "detail", rename_all = "snake_case")]
pub enum TaskDetail {
    MultiFile {
        file_count: usize,
    },
    SingleFile {
        path: String,
    },
    Chunk {
        chunk_index: usize,
        total_chunks: usize,
        start_line: usize,
        end_line: usize,
        parent_path: String,
        parent_total_tokens: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskMetadata {
    pub batch_id: String,
    #[serde(flatten)]
    pub detail: TaskDetail,
}

/// Instruction handed to the content generator: what to read, what to write
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDefinition {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: TaskKind,
    pub strategy: String,
    /// Relative paths of the source files
    pub files: Vec<String>,
    pub estimated_tokens: usize,
    /// Artifact names, relative to the step's output directory
    pub expected_outputs: Vec<String>,
    pub metadata: TaskMetadata,
}

/// Turns one planning run's batches into task definitions with ids
/// `task_1`, `task_2`, ... in batch order.
#[derive(Debug, Default)]
pub struct TaskDefinitionBuilder {
    issued: usize,
}

impl TaskDefinitionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Definitions issued so far
    pub fn issued(&self) -> usize {
        self.issued
    }

    /// Build a definition, or `None` for a batch without files.
    pub fn build(&mut self, batch: &BatchResult) -> Option<TaskDefinition> {
        if batch.files.is_empty() {
            log::warn!("Skipping batch {} with no files", batch.batch_id);
            return None;
        }

        let kind = match batch.kind {
            BatchKind::CombinedBatch => TaskKind::FileBatch,
            BatchKind::SingleBatch => TaskKind::SingleFile,
            BatchKind::LargeFileChunk => TaskKind::LargeFileChunk,
            BatchKind::Unrecognized => {
                log::warn!(
                    "Batch {} has an unrecognized type, treating it as file_batch",
                    batch.batch_id
                );
                TaskKind::FileBatch
            }
        };

        let files = batch.file_paths();
        let (detail, expected_outputs) = match (kind, &batch.chunk_info) {
            (TaskKind::LargeFileChunk, Some(chunk)) => {
                let parent = &chunk.parent_file_info.relative_path;
                (
                    TaskDetail::Chunk {
                        chunk_index: chunk.chunk_index,
                        total_chunks: chunk.total_chunks,
                        start_line: chunk.start_line,
                        end_line: chunk.end_line,
                        parent_path: parent.clone(),
                        parent_total_tokens: chunk.parent_file_info.total_tokens,
                    },
                    vec![chunk_output_name(parent, chunk)],
                )
            }
            (TaskKind::LargeFileChunk, None) => {
                log::warn!(
                    "Chunk batch {} has no chunk info, expecting whole-file output",
                    batch.batch_id
                );
                single_or_multi(&files)
            }
            _ => single_or_multi(&files),
        };

        self.issued += 1;
        Some(TaskDefinition {
            id: format!("task_{}", self.issued),
            kind,
            strategy: batch.strategy.clone(),
            estimated_tokens: batch.estimated_tokens,
            expected_outputs,
            metadata: TaskMetadata {
                batch_id: batch.batch_id.clone(),
                detail,
            },
            files,
        })
    }

    pub fn build_all(&mut self, batches: &[BatchResult]) -> Vec<TaskDefinition> {
        let definitions: Vec<TaskDefinition> =
            batches.iter().filter_map(|batch| self.build(batch)).collect();
        log::info!(
            "Built {} task definitions from {} batches",
            definitions.len(),
            batches.len()
        );
        definitions
    }
}

fn single_or_multi(files: &[String]) -> (TaskDetail, Vec<String>) {
    let outputs = files.iter().map(|f| file_output_name(f)).collect();
    let detail = match files {
        [only] => TaskDetail::SingleFile { path: only.clone() },
        _ => TaskDetail::MultiFile {
            file_count: files.len(),
        },
    };
    (detail, outputs)
}

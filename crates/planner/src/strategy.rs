use crate::boundary::StructuralBoundaryDetector;
use crate::config::PlannerConfig;
use crate::types::{
    BatchFile, BatchKind, BatchMetadata, BatchResult, BoundarySource, ChunkInfo, FileCategory,
    FileRecord, ParentFileInfo,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

/// Why a file could not be placed into any batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    /// A file exceeds the hard batch limit but its tier forbids splitting
    ExceedsMaxBatch,
    /// A single line of a large file is bigger than the chunk budget
    UnsplittableLine,
    /// The file could not be read for chunking
    Unreadable,
    /// The file has no lines to split
    EmptyContent,
}

/// A file that needs manual handling, with the reason
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanIssue {
    pub relative_path: String,
    pub category: FileCategory,
    pub kind: IssueKind,
    pub reason: String,
}

impl PlanIssue {
    fn new(record: &FileRecord, category: FileCategory, kind: IssueKind, reason: String) -> Self {
        Self {
            relative_path: record.relative_path.clone(),
            category,
            kind,
            reason,
        }
    }
}

/// What one strategy produced for its bucket
#[derive(Debug, Clone, Default)]
pub struct StrategyOutcome {
    pub batches: Vec<BatchResult>,
    pub issues: Vec<PlanIssue>,
}

/// Hands out deterministic batch ids, one counter per planning pass
#[derive(Debug, Default)]
pub struct BatchIdAllocator {
    next: usize,
}

impl BatchIdAllocator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate(&mut self, kind: BatchKind) -> String {
        self.next += 1;
        format!("{}_{:04}", kind.as_str(), self.next)
    }
}

/// A packing rule applied to one file tier
pub trait BatchStrategy {
    fn name(&self) -> &'static str;

    /// Tier this strategy consumes
    fn category(&self) -> FileCategory;

    fn plan(&self, files: &[FileRecord], ids: &mut BatchIdAllocator) -> StrategyOutcome;
}

/// First-fit packing of small files in scan order
#[derive(Debug, Clone, Copy)]
pub struct CombinedBatchStrategy {
    batch_target_size: usize,
    max_batch_size: usize,
}

impl CombinedBatchStrategy {
    #[must_use]
    pub const fn new(batch_target_size: usize, max_batch_size: usize) -> Self {
        Self {
            batch_target_size,
            max_batch_size,
        }
    }

    #[must_use]
    pub const fn from_config(config: &PlannerConfig) -> Self {
        Self::new(config.batch_target_size, config.max_batch_size)
    }

    fn close(
        &self,
        current: &mut Vec<BatchFile>,
        sum: &mut usize,
        ids: &mut BatchIdAllocator,
        out: &mut Vec<BatchResult>,
    ) {
        if current.is_empty() {
            return;
        }
        let files = std::mem::take(current);
        out.push(BatchResult {
            batch_id: ids.allocate(BatchKind::CombinedBatch),
            kind: BatchKind::CombinedBatch,
            metadata: BatchMetadata {
                file_count: files.len(),
                source_category: FileCategory::Small,
                boundary_source: None,
            },
            files,
            estimated_tokens: std::mem::take(sum),
            strategy: self.name().to_string(),
            chunk_info: None,
        });
    }
}

impl BatchStrategy for CombinedBatchStrategy {
    fn name(&self) -> &'static str {
        "combined"
    }

    fn category(&self) -> FileCategory {
        FileCategory::Small
    }

    fn plan(&self, files: &[FileRecord], ids: &mut BatchIdAllocator) -> StrategyOutcome {
        let mut outcome = StrategyOutcome::default();
        let mut current: Vec<BatchFile> = Vec::new();
        let mut sum = 0usize;

        for record in files {
            let Some(tokens) = record.tokens() else {
                continue;
            };
            if tokens > self.max_batch_size {
                outcome.issues.push(PlanIssue::new(
                    record,
                    FileCategory::Small,
                    IssueKind::ExceedsMaxBatch,
                    format!(
                        "small file has {tokens} tokens, above max_batch_size {}",
                        self.max_batch_size
                    ),
                ));
                continue;
            }
            if !current.is_empty() && sum + tokens > self.batch_target_size {
                self.close(&mut current, &mut sum, ids, &mut outcome.batches);
            }
            current.push(BatchFile::from(record));
            sum += tokens;
        }
        self.close(&mut current, &mut sum, ids, &mut outcome.batches);

        outcome
    }
}

/// One batch per medium file
#[derive(Debug, Clone, Copy)]
pub struct SingleFileBatchStrategy {
    max_batch_size: usize,
}

impl SingleFileBatchStrategy {
    #[must_use]
    pub const fn new(max_batch_size: usize) -> Self {
        Self { max_batch_size }
    }

    #[must_use]
    pub const fn from_config(config: &PlannerConfig) -> Self {
        Self::new(config.max_batch_size)
    }
}

impl BatchStrategy for SingleFileBatchStrategy {
    fn name(&self) -> &'static str {
        "single_file"
    }

    fn category(&self) -> FileCategory {
        FileCategory::Medium
    }

    fn plan(&self, files: &[FileRecord], ids: &mut BatchIdAllocator) -> StrategyOutcome {
        let mut outcome = StrategyOutcome::default();
        for record in files {
            let Some(tokens) = record.tokens() else {
                continue;
            };
            if tokens > self.max_batch_size {
                outcome.issues.push(PlanIssue::new(
                    record,
                    FileCategory::Medium,
                    IssueKind::ExceedsMaxBatch,
                    format!(
                        "file has {tokens} tokens, above max_batch_size {}",
                        self.max_batch_size
                    ),
                ));
                continue;
            }
            outcome.batches.push(BatchResult {
                batch_id: ids.allocate(BatchKind::SingleBatch),
                kind: BatchKind::SingleBatch,
                files: vec![BatchFile::from(record)],
                estimated_tokens: tokens,
                strategy: self.name().to_string(),
                chunk_info: None,
                metadata: BatchMetadata {
                    file_count: 1,
                    source_category: FileCategory::Medium,
                    boundary_source: None,
                },
            });
        }
        outcome
    }
}

/// Source of file text for chunking
pub trait SourceReader: Send + Sync {
    fn read(&self, path: &Path) -> std::io::Result<String>;
}

/// Reads straight from the filesystem
#[derive(Debug, Clone, Copy, Default)]
pub struct FsSourceReader;

impl SourceReader for FsSourceReader {
    fn read(&self, path: &Path) -> std::io::Result<String> {
        std::fs::read_to_string(path)
    }
}

/// Contiguous line range with its share of the file's tokens
#[derive(Debug, Clone, Copy)]
struct LineSpan {
    /// 0-based, inclusive
    start: usize,
    /// 0-based, exclusive
    end: usize,
    tokens: usize,
}

/// Splits a large file into line-contiguous chunks under the target budget
#[derive(Clone)]
pub struct LargeFileMultiBatchStrategy {
    batch_target_size: usize,
    detector: Option<Arc<dyn StructuralBoundaryDetector>>,
    reader: Arc<dyn SourceReader>,
}

impl LargeFileMultiBatchStrategy {
    #[must_use]
    pub fn new(batch_target_size: usize) -> Self {
        Self {
            batch_target_size,
            detector: None,
            reader: Arc::new(FsSourceReader),
        }
    }

    #[must_use]
    pub fn from_config(config: &PlannerConfig) -> Self {
        Self::new(config.batch_target_size)
    }

    /// Builder: prefer structural boundaries from `detector`
    #[must_use]
    pub fn with_detector(mut self, detector: Arc<dyn StructuralBoundaryDetector>) -> Self {
        self.detector = Some(detector);
        self
    }

    /// Builder: read file text through `reader`
    #[must_use]
    pub fn with_reader(mut self, reader: Arc<dyn SourceReader>) -> Self {
        self.reader = reader;
        self
    }

    fn chunk_file(
        &self,
        record: &FileRecord,
        total_tokens: usize,
        ids: &mut BatchIdAllocator,
    ) -> Result<Vec<BatchResult>, PlanIssue> {
        let issue =
            |kind, reason: String| PlanIssue::new(record, FileCategory::Large, kind, reason);

        let content = self
            .reader
            .read(&record.path)
            .map_err(|e| issue(IssueKind::Unreadable, format!("read failed: {e}")))?;
        let lines: Vec<&str> = content.lines().collect();
        if lines.is_empty() {
            return Err(issue(
                IssueKind::EmptyContent,
                "file has no lines to split".to_string(),
            ));
        }

        let line_tokens = distribute_tokens(total_tokens, &lines);
        let (segments, source) = self.segments(&content, &record.language, &line_tokens);

        let mut units: Vec<LineSpan> = Vec::with_capacity(segments.len());
        for segment in segments {
            if segment.tokens <= self.batch_target_size {
                units.push(segment);
            } else {
                units.extend((segment.start..segment.end).map(|idx| LineSpan {
                    start: idx,
                    end: idx + 1,
                    tokens: line_tokens[idx],
                }));
            }
        }

        let spans = self.pack(&units).map_err(|line| {
            issue(
                IssueKind::UnsplittableLine,
                format!(
                    "line {} alone exceeds batch_target_size {}",
                    line + 1,
                    self.batch_target_size
                ),
            )
        })?;

        let parent = ParentFileInfo {
            relative_path: record.relative_path.clone(),
            total_tokens,
            total_lines: lines.len(),
            size: record.size,
        };
        let total_chunks = spans.len();
        let batches = spans
            .into_iter()
            .enumerate()
            .map(|(chunk_index, span)| {
                let mut file = BatchFile::from(record);
                file.tokens = span.tokens;
                BatchResult {
                    batch_id: ids.allocate(BatchKind::LargeFileChunk),
                    kind: BatchKind::LargeFileChunk,
                    files: vec![file],
                    estimated_tokens: span.tokens,
                    strategy: self.name().to_string(),
                    chunk_info: Some(ChunkInfo {
                        chunk_index,
                        total_chunks,
                        start_line: span.start + 1,
                        end_line: span.end,
                        parent_file_info: parent.clone(),
                    }),
                    metadata: BatchMetadata {
                        file_count: 1,
                        source_category: FileCategory::Large,
                        boundary_source: Some(source),
                    },
                }
            })
            .collect();

        Ok(batches)
    }

    /// Structural segments when a detector yields hints, otherwise the whole
    /// file as one segment (later broken into line units).
    fn segments(
        &self,
        content: &str,
        language: &str,
        line_tokens: &[usize],
    ) -> (Vec<LineSpan>, BoundarySource) {
        let line_count = line_tokens.len();
        let whole = vec![span_of(line_tokens, 0, line_count)];

        let Some(detector) = &self.detector else {
            return (whole, BoundarySource::LineWindow);
        };

        let mut starts = match detector.detect_boundaries(content, language) {
            Ok(starts) => starts,
            Err(e) => {
                log::warn!("Boundary detection failed, using line windows: {e}");
                return (whole, BoundarySource::LineWindow);
            }
        };
        starts.retain(|line| *line >= 2 && *line <= line_count);
        starts.sort_unstable();
        starts.dedup();
        if starts.is_empty() {
            return (whole, BoundarySource::LineWindow);
        }

        let mut segments = Vec::with_capacity(starts.len() + 1);
        let mut begin = 0;
        for start_line in starts {
            let idx = start_line - 1;
            segments.push(span_of(line_tokens, begin, idx));
            begin = idx;
        }
        segments.push(span_of(line_tokens, begin, line_count));
        (segments, BoundarySource::Structural)
    }

    /// Greedy packing toward a balanced per-chunk budget that is recomputed
    /// from the remaining tokens at every chunk start. Returns the offending
    /// line index when one unit alone exceeds the target.
    fn pack(&self, units: &[LineSpan]) -> Result<Vec<LineSpan>, usize> {
        let target = self.batch_target_size;
        let mut remaining: usize = units.iter().map(|u| u.tokens).sum();
        let mut chunks = Vec::new();
        let mut current: Option<LineSpan> = None;
        let mut budget = balanced_budget(remaining, target);

        for unit in units {
            if unit.tokens > target {
                return Err(unit.start);
            }
            if let Some(open) = current {
                if open.tokens + unit.tokens > budget {
                    chunks.push(open);
                    remaining -= open.tokens;
                    budget = balanced_budget(remaining, target);
                    current = None;
                }
            }
            current = Some(match current {
                Some(open) => LineSpan {
                    start: open.start,
                    end: unit.end,
                    tokens: open.tokens + unit.tokens,
                },
                None => *unit,
            });
        }
        if let Some(open) = current {
            chunks.push(open);
        }

        Ok(chunks)
    }
}

impl BatchStrategy for LargeFileMultiBatchStrategy {
    fn name(&self) -> &'static str {
        "large_file_multi"
    }

    fn category(&self) -> FileCategory {
        FileCategory::Large
    }

    fn plan(&self, files: &[FileRecord], ids: &mut BatchIdAllocator) -> StrategyOutcome {
        let mut outcome = StrategyOutcome::default();
        for record in files {
            let Some(tokens) = record.tokens() else {
                continue;
            };
            match self.chunk_file(record, tokens, ids) {
                Ok(batches) => {
                    log::debug!(
                        "Split {} ({tokens} tokens) into {} chunks",
                        record.relative_path,
                        batches.len()
                    );
                    outcome.batches.extend(batches);
                }
                Err(issue) => {
                    log::warn!("Cannot chunk {}: {}", issue.relative_path, issue.reason);
                    outcome.issues.push(issue);
                }
            }
        }
        outcome
    }
}

/// `ceil(remaining / ceil(remaining / target))`, never above `target`
fn balanced_budget(remaining: usize, target: usize) -> usize {
    if remaining == 0 {
        return target;
    }
    let chunks = remaining.div_ceil(target);
    remaining.div_ceil(chunks)
}

fn span_of(line_tokens: &[usize], start: usize, end: usize) -> LineSpan {
    LineSpan {
        start,
        end,
        tokens: line_tokens[start..end].iter().sum(),
    }
}

/// Spread `total` tokens over lines in proportion to their byte length
/// (newline included). The shares always sum to `total`.
fn distribute_tokens(total: usize, lines: &[&str]) -> Vec<usize> {
    let weights: Vec<u128> = lines.iter().map(|l| l.len() as u128 + 1).collect();
    let weight_sum: u128 = weights.iter().sum();
    let total = total as u128;

    let mut shares = Vec::with_capacity(lines.len());
    let mut cumulative_weight = 0u128;
    let mut previous = 0u128;
    for weight in weights {
        cumulative_weight += weight;
        let cumulative = total * cumulative_weight / weight_sum;
        shares.push((cumulative - previous) as usize);
        previous = cumulative;
    }
    shares
}

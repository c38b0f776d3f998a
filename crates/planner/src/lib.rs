//! # Workplan Planner
//!
//! Turns a file inventory into token-budgeted batches.
//!
//! ## Pipeline
//!
//! ```text
//! Directory
//!     │
//!     ├──> File Scanner (.gitignore aware)
//!     │      └─> InventoryEntry[]
//!     │
//!     ├──> TokenCounter (bounded concurrency)
//!     │      └─> FileRecord[] in scan order
//!     │
//!     ├──> FileClassifier
//!     │      └─> small / medium / large / error
//!     │
//!     └──> Strategies (serialized merge)
//!            ├─> combined: first-fit small files
//!            ├─> single: one batch per medium file
//!            └─> large: line-contiguous chunks
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use workplan_planner::{BatchPlanner, FileScanner, HeuristicTokenCounter, PlannerConfig};
//!
//! #[tokio::main]
//! async fn main() -> workplan_planner::Result<()> {
//!     let entries = FileScanner::new("/path/to/project").scan();
//!     let planner = BatchPlanner::new(PlannerConfig::default())?;
//!     let plan = planner
//!         .analyze_and_plan(entries, Arc::new(HeuristicTokenCounter::default()))
//!         .await?;
//!
//!     println!("{} batches, {} files need review",
//!              plan.summary.total_batches, plan.summary.manual_review.len());
//!     Ok(())
//! }
//! ```

mod boundary;
mod classifier;
mod config;
mod error;
mod planner;
mod scanner;
mod strategy;
mod token;
mod types;

pub use boundary::{RegexBoundaryDetector, StructuralBoundaryDetector};
pub use classifier::{ClassifiedFiles, FileClassifier};
pub use config::{default_analysis_concurrency, parse_analysis_concurrency, PlannerConfig};
pub use error::{PlannerError, Result};
pub use planner::{BatchPlan, BatchPlanner, PlanSummary};
pub use scanner::{FileScanner, InventoryEntry, ScanOptions};
pub use strategy::{
    BatchIdAllocator, BatchStrategy, CombinedBatchStrategy, FsSourceReader, IssueKind,
    LargeFileMultiBatchStrategy, PlanIssue, SingleFileBatchStrategy, SourceReader,
    StrategyOutcome,
};
pub use token::{analyze_inventory, HeuristicTokenCounter, TokenCounter};
pub use types::{
    language_label, BatchFile, BatchKind, BatchMetadata, BatchResult, BoundarySource, ChunkInfo,
    FileCategory, FileRecord, ParentFileInfo, TokenResult,
};

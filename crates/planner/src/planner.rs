use crate::boundary::StructuralBoundaryDetector;
use crate::classifier::{ClassifiedFiles, FileClassifier};
use crate::config::PlannerConfig;
use crate::error::{PlannerError, Result};
use crate::scanner::InventoryEntry;
use crate::strategy::{
    BatchIdAllocator, BatchStrategy, CombinedBatchStrategy, LargeFileMultiBatchStrategy,
    PlanIssue, SingleFileBatchStrategy, SourceReader,
};
use crate::token::{analyze_inventory, TokenCounter};
use crate::types::{BatchKind, BatchResult, FileCategory, FileRecord};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

/// Counts reported alongside a plan
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanSummary {
    pub total_files: usize,
    pub small_files: usize,
    pub medium_files: usize,
    pub large_files: usize,
    pub error_files: usize,

    pub total_batches: usize,
    pub combined_batches: usize,
    pub single_batches: usize,
    pub chunk_batches: usize,
    pub total_estimated_tokens: usize,

    /// Relative paths that need manual handling, in scan order
    pub manual_review: Vec<String>,
}

/// Result of one planning pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchPlan {
    pub batches: Vec<BatchResult>,

    /// Files excluded from planning (token errors and strategy issues)
    pub error_files: Vec<FileRecord>,

    pub issues: Vec<PlanIssue>,
    pub summary: PlanSummary,
}

impl BatchPlan {
    /// Batches of one kind, in plan order
    pub fn batches_of(&self, kind: BatchKind) -> impl Iterator<Item = &BatchResult> {
        self.batches.iter().filter(move |b| b.kind == kind)
    }
}

/// Classifies an analyzed inventory and runs the three packing strategies
#[derive(Clone)]
pub struct BatchPlanner {
    config: PlannerConfig,
    classifier: FileClassifier,
    combined: CombinedBatchStrategy,
    single: SingleFileBatchStrategy,
    large: LargeFileMultiBatchStrategy,
}

impl BatchPlanner {
    /// Create a planner. Fails when the thresholds are inconsistent.
    pub fn new(config: PlannerConfig) -> Result<Self> {
        config.validate().map_err(PlannerError::invalid_config)?;
        Ok(Self {
            classifier: FileClassifier::from_config(&config),
            combined: CombinedBatchStrategy::from_config(&config),
            single: SingleFileBatchStrategy::from_config(&config),
            large: LargeFileMultiBatchStrategy::from_config(&config),
            config,
        })
    }

    /// Builder: use structural hints when chunking large files
    #[must_use]
    pub fn with_detector(mut self, detector: Arc<dyn StructuralBoundaryDetector>) -> Self {
        self.large = self.large.with_detector(detector);
        self
    }

    /// Builder: read large-file text through `reader`
    #[must_use]
    pub fn with_reader(mut self, reader: Arc<dyn SourceReader>) -> Self {
        self.large = self.large.with_reader(reader);
        self
    }

    #[must_use]
    pub const fn config(&self) -> &PlannerConfig {
        &self.config
    }

    #[must_use]
    pub fn classify(&self, records: Vec<FileRecord>) -> ClassifiedFiles {
        self.classifier.classify(records)
    }

    /// Plan batches for already-analyzed records.
    ///
    /// Strategies run in a fixed order (combined, single, large) over one id
    /// counter, so identical input always yields identical ids.
    #[must_use]
    pub fn plan(&self, records: Vec<FileRecord>) -> BatchPlan {
        let classified = self.classifier.classify(records);
        let mut ids = BatchIdAllocator::new();
        let mut plan = BatchPlan::default();

        let strategies: [&dyn BatchStrategy; 3] = [&self.combined, &self.single, &self.large];
        for strategy in strategies {
            let bucket = classified.bucket(strategy.category());
            if bucket.is_empty() {
                continue;
            }
            let outcome = strategy.plan(bucket, &mut ids);
            log::debug!(
                "Strategy {} produced {} batches from {} files",
                strategy.name(),
                outcome.batches.len(),
                bucket.len()
            );
            plan.batches.extend(outcome.batches);
            plan.issues.extend(outcome.issues);
        }

        plan.error_files = collect_error_files(&classified, &plan.issues);
        plan.summary = summarize(&classified, &plan);

        log::info!(
            "Planned {} batches ({} tokens) from {} files, {} need manual handling",
            plan.summary.total_batches,
            plan.summary.total_estimated_tokens,
            plan.summary.total_files,
            plan.summary.manual_review.len()
        );
        plan
    }

    /// Count tokens for `entries` with bounded concurrency, then plan.
    pub async fn analyze_and_plan(
        &self,
        entries: Vec<InventoryEntry>,
        counter: Arc<dyn TokenCounter>,
    ) -> Result<BatchPlan> {
        let records =
            analyze_inventory(entries, counter, self.config.analysis_concurrency).await?;

        // Large-file chunking reads from disk.
        let planner = self.clone();
        tokio::task::spawn_blocking(move || planner.plan(records))
            .await
            .map_err(|err| PlannerError::Join(format!("planning task failed: {err}")))
    }
}

fn collect_error_files(classified: &ClassifiedFiles, issues: &[PlanIssue]) -> Vec<FileRecord> {
    let mut error_files = classified.error.clone();
    if issues.is_empty() {
        return error_files;
    }

    let flagged: HashSet<&str> = issues.iter().map(|i| i.relative_path.as_str()).collect();
    for category in [FileCategory::Small, FileCategory::Medium, FileCategory::Large] {
        for record in classified.bucket(category) {
            if !flagged.contains(record.relative_path.as_str()) {
                continue;
            }
            let mut record = record.clone();
            if let Some(issue) = issues
                .iter()
                .find(|i| i.relative_path == record.relative_path)
            {
                record.mark_error(issue.reason.clone());
            }
            error_files.push(record);
        }
    }
    error_files
}

fn summarize(classified: &ClassifiedFiles, plan: &BatchPlan) -> PlanSummary {
    let count = |kind| plan.batches_of(kind).count();
    PlanSummary {
        total_files: classified.len(),
        small_files: classified.small.len(),
        medium_files: classified.medium.len(),
        large_files: classified.large.len(),
        error_files: classified.error.len(),
        total_batches: plan.batches.len(),
        combined_batches: count(BatchKind::CombinedBatch),
        single_batches: count(BatchKind::SingleBatch),
        chunk_batches: count(BatchKind::LargeFileChunk),
        total_estimated_tokens: plan.batches.iter().map(|b| b.estimated_tokens).sum(),
        manual_review: plan
            .error_files
            .iter()
            .map(|r| r.relative_path.clone())
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TokenResult;
    use pretty_assertions::assert_eq;

    fn record(name: &str, tokens: usize) -> FileRecord {
        FileRecord::new(name, tokens as u64 * 4, TokenResult::success(tokens))
    }

    #[test]
    fn rejects_inverted_thresholds() {
        let config = PlannerConfig {
            small_file_threshold: 30_000,
            ..PlannerConfig::default()
        };
        assert!(matches!(
            BatchPlanner::new(config),
            Err(PlannerError::InvalidConfig(_))
        ));
    }

    #[test]
    fn batch_ids_follow_strategy_order() {
        let planner = BatchPlanner::new(PlannerConfig::default()).unwrap();
        let plan = planner.plan(vec![
            record("m.rs", 16_000),
            record("a.rs", 2_000),
            record("b.rs", 3_000),
        ]);

        let ids: Vec<&str> = plan.batches.iter().map(|b| b.batch_id.as_str()).collect();
        assert_eq!(ids, vec!["combined_batch_0001", "single_batch_0002"]);
        assert_eq!(plan.summary.combined_batches, 1);
        assert_eq!(plan.summary.single_batches, 1);
        assert_eq!(plan.summary.total_estimated_tokens, 21_000);
    }

    #[test]
    fn error_files_are_surfaced_not_dropped() {
        let planner = BatchPlanner::new(PlannerConfig::default()).unwrap();
        let plan = planner.plan(vec![
            record("ok.rs", 100),
            FileRecord::new("bin.dat", 9, TokenResult::error("not utf-8")),
        ]);

        assert_eq!(plan.batches.len(), 1);
        assert_eq!(plan.error_files.len(), 1);
        assert_eq!(plan.summary.error_files, 1);
        assert_eq!(plan.summary.manual_review, vec!["bin.dat".to_string()]);
    }

    #[test]
    fn unreadable_large_file_moves_to_error_files() {
        let planner = BatchPlanner::new(PlannerConfig::default()).unwrap();
        let plan = planner.plan(vec![record("/no/such/dir/huge.rs", 50_000)]);

        assert!(plan.batches.is_empty());
        assert_eq!(plan.issues.len(), 1);
        assert_eq!(plan.error_files.len(), 1);
        assert!(plan.error_files[0]
            .analysis_error
            .as_deref()
            .unwrap()
            .starts_with("read failed"));
    }

    #[test]
    fn empty_inventory_plans_nothing() {
        let planner = BatchPlanner::new(PlannerConfig::default()).unwrap();
        let plan = planner.plan(Vec::new());
        assert_eq!(plan, BatchPlan::default());
    }
}

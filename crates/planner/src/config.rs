use serde::{Deserialize, Serialize};

const MAX_ANALYSIS_CONCURRENCY: usize = 32;

/// Configuration for classification and batch planning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    /// Files with at most this many tokens are packed together
    pub small_file_threshold: usize,

    /// Files with more than this many tokens are split into chunks
    pub large_file_threshold: usize,

    /// Soft target for a batch or chunk, in tokens
    pub batch_target_size: usize,

    /// Hard limit for any emitted batch, in tokens
    pub max_batch_size: usize,

    /// Upper bound on token counting running at once
    pub analysis_concurrency: usize,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            small_file_threshold: 15_000,
            large_file_threshold: 20_000,
            batch_target_size: 18_000,
            max_batch_size: 20_000,
            analysis_concurrency: default_analysis_concurrency(),
        }
    }
}

impl PlannerConfig {
    /// Smaller budgets for consumers with a narrow context window
    pub fn for_small_context() -> Self {
        Self {
            small_file_threshold: 3_000,
            large_file_threshold: 6_000,
            batch_target_size: 5_000,
            max_batch_size: 6_000,
            ..Default::default()
        }
    }

    /// Larger budgets for consumers with a wide context window
    pub fn for_large_context() -> Self {
        Self {
            small_file_threshold: 40_000,
            large_file_threshold: 80_000,
            batch_target_size: 70_000,
            max_batch_size: 80_000,
            ..Default::default()
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.small_file_threshold >= self.large_file_threshold {
            return Err(format!(
                "small_file_threshold ({}) must be below large_file_threshold ({})",
                self.small_file_threshold, self.large_file_threshold
            ));
        }

        if self.large_file_threshold > self.max_batch_size {
            return Err(format!(
                "large_file_threshold ({}) cannot exceed max_batch_size ({})",
                self.large_file_threshold, self.max_batch_size
            ));
        }

        if self.batch_target_size == 0 {
            return Err("batch_target_size must be > 0".to_string());
        }

        if self.batch_target_size > self.max_batch_size {
            return Err(format!(
                "batch_target_size ({}) cannot exceed max_batch_size ({})",
                self.batch_target_size, self.max_batch_size
            ));
        }

        if self.analysis_concurrency == 0 {
            return Err("analysis_concurrency must be > 0".to_string());
        }

        Ok(())
    }
}

/// Default token-counting concurrency derived from available CPUs.
#[must_use]
pub fn default_analysis_concurrency() -> usize {
    let cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    cpus.clamp(1, MAX_ANALYSIS_CONCURRENCY.min(8))
}

/// Parse a concurrency override, falling back to `default_value` on blank or
/// malformed input.
#[must_use]
pub fn parse_analysis_concurrency(raw: Option<&str>, default_value: usize) -> usize {
    raw.map(str::trim)
        .filter(|v| !v.is_empty())
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(default_value)
        .clamp(1, MAX_ANALYSIS_CONCURRENCY)
}

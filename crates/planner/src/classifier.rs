use crate::config::PlannerConfig;
use crate::types::{FileCategory, FileRecord};
use serde::{Deserialize, Serialize};

/// Buckets files by token count.
///
/// `tokens <= small_file_threshold` is small, `tokens > large_file_threshold`
/// is large, everything in between is medium. Files whose token count failed
/// land in `error`.
#[derive(Debug, Clone, Copy)]
pub struct FileClassifier {
    small_file_threshold: usize,
    large_file_threshold: usize,
}

/// Four disjoint buckets, each in scan order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifiedFiles {
    pub small: Vec<FileRecord>,
    pub medium: Vec<FileRecord>,
    pub large: Vec<FileRecord>,
    pub error: Vec<FileRecord>,
}

impl ClassifiedFiles {
    #[must_use]
    pub fn len(&self) -> usize {
        self.small.len() + self.medium.len() + self.large.len() + self.error.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn bucket(&self, category: FileCategory) -> &[FileRecord] {
        match category {
            FileCategory::Small => &self.small,
            FileCategory::Medium => &self.medium,
            FileCategory::Large => &self.large,
            FileCategory::Error => &self.error,
        }
    }
}

impl FileClassifier {
    #[must_use]
    pub const fn new(small_file_threshold: usize, large_file_threshold: usize) -> Self {
        Self {
            small_file_threshold,
            large_file_threshold,
        }
    }

    #[must_use]
    pub const fn from_config(config: &PlannerConfig) -> Self {
        Self::new(config.small_file_threshold, config.large_file_threshold)
    }

    /// Category for a successful token count
    #[must_use]
    pub const fn classify_tokens(&self, tokens: usize) -> FileCategory {
        if tokens <= self.small_file_threshold {
            FileCategory::Small
        } else if tokens > self.large_file_threshold {
            FileCategory::Large
        } else {
            FileCategory::Medium
        }
    }

    #[must_use]
    pub fn classify_record(&self, record: &FileRecord) -> FileCategory {
        match record.tokens() {
            Some(tokens) => self.classify_tokens(tokens),
            None => FileCategory::Error,
        }
    }

    /// Split records into buckets. Nothing is dropped.
    #[must_use]
    pub fn classify(&self, records: Vec<FileRecord>) -> ClassifiedFiles {
        let mut out = ClassifiedFiles::default();
        for record in records {
            let category = self.classify_record(&record);
            log::debug!("{} -> {category}", record.relative_path);
            match category {
                FileCategory::Small => out.small.push(record),
                FileCategory::Medium => out.medium.push(record),
                FileCategory::Large => out.large.push(record),
                FileCategory::Error => out.error.push(record),
            }
        }
        out
    }
}

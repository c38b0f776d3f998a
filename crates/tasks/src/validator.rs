use crate::definition::TaskDefinition;
use crate::output::OutputLayout;
use crate::step::StepType;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// How hard completion checks look at artifacts. Content is never read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "level", rename_all = "snake_case")]
pub enum ValidationStrictness {
    /// Always succeeds
    None,
    /// Every expected file exists
    Existence,
    /// Every expected file exists and holds at least `min_bytes`
    ExistenceMinSize { min_bytes: u64 },
}

/// One expected artifact and what was found on disk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputCheck {
    pub name: String,
    pub path: PathBuf,
    /// Size in bytes when the file exists
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub success: bool,
    pub existing_files: Vec<OutputCheck>,
    pub missing_files: Vec<OutputCheck>,
    pub strictness: ValidationStrictness,
}

impl ValidationReport {
    pub fn missing_names(&self) -> Vec<String> {
        self.missing_files.iter().map(|c| c.name.clone()).collect()
    }

    pub fn existing_names(&self) -> Vec<String> {
        self.existing_files.iter().map(|c| c.name.clone()).collect()
    }
}

/// Checks that a task's expected outputs exist under the step's directory
#[derive(Debug, Clone, Default)]
pub struct CompletionValidator {
    layout: OutputLayout,
    strictness_override: Option<ValidationStrictness>,
}

impl CompletionValidator {
    pub fn new(layout: OutputLayout) -> Self {
        Self {
            layout,
            strictness_override: None,
        }
    }

    /// Builder: apply one strictness to every step
    pub fn with_strictness(mut self, strictness: ValidationStrictness) -> Self {
        self.strictness_override = Some(strictness);
        self
    }

    pub fn layout(&self) -> &OutputLayout {
        &self.layout
    }

    pub fn strictness_for(&self, step: StepType) -> ValidationStrictness {
        self.strictness_override.unwrap_or(step.config().strictness)
    }

    pub async fn validate(
        &self,
        definition: &TaskDefinition,
        project_root: &Path,
        step: StepType,
    ) -> ValidationReport {
        let strictness = self.strictness_for(step);
        let mut existing_files = Vec::new();
        let mut missing_files = Vec::new();

        for name in &definition.expected_outputs {
            let path = self.layout.resolve(project_root, step, name);
            let size = match tokio::fs::metadata(&path).await {
                Ok(meta) if meta.is_file() => Some(meta.len()),
                _ => None,
            };
            let check = OutputCheck {
                name: name.clone(),
                path,
                size,
            };

            let present = match strictness {
                ValidationStrictness::None => true,
                ValidationStrictness::Existence => size.is_some(),
                ValidationStrictness::ExistenceMinSize { min_bytes } => {
                    size.is_some_and(|len| len >= min_bytes)
                }
            };
            if present {
                existing_files.push(check);
            } else {
                missing_files.push(check);
            }
        }

        log::debug!(
            "Validated {}: {} present, {} missing",
            definition.id,
            existing_files.len(),
            missing_files.len()
        );

        ValidationReport {
            success: missing_files.is_empty(),
            existing_files,
            missing_files,
            strictness,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{TaskDetail, TaskKind, TaskMetadata};
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    fn definition(outputs: &[&str]) -> TaskDefinition {
        TaskDefinition {
            id: "task_1".into(),
            kind: TaskKind::FileBatch,
            strategy: "combined".into(),
            files: vec!["a".into(), "b".into()],
            estimated_tokens: 10,
            expected_outputs: outputs.iter().map(|s| s.to_string()).collect(),
            metadata: TaskMetadata {
                batch_id: "combined_batch_0001".into(),
                detail: TaskDetail::MultiFile { file_count: 2 },
            },
        }
    }

    #[tokio::test]
    async fn reports_present_and_missing_outputs() {
        let temp = tempdir().unwrap();
        let dir = temp.path().join("docs").join("files");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("a.md"), "# a").unwrap();

        let report = CompletionValidator::default()
            .validate(&definition(&["a.md", "b.md"]), temp.path(), StepType::FileDocs)
            .await;

        assert!(!report.success);
        assert_eq!(report.existing_names(), vec!["a.md".to_string()]);
        assert_eq!(report.missing_names(), vec!["b.md".to_string()]);
        assert_eq!(report.existing_files[0].size, Some(3));
    }

    #[tokio::test]
    async fn min_size_rejects_stub_files() {
        let temp = tempdir().unwrap();
        let dir = temp.path().join("docs").join("modules");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("core.md"), "stub").unwrap();

        let report = CompletionValidator::default()
            .validate(&definition(&["core.md"]), temp.path(), StepType::ModuleIntegration)
            .await;

        assert!(!report.success);
        assert_eq!(report.missing_files[0].size, Some(4));
        assert_eq!(
            report.strictness,
            ValidationStrictness::ExistenceMinSize { min_bytes: 100 }
        );
    }

    #[tokio::test]
    async fn strictness_none_always_succeeds() {
        let temp = tempdir().unwrap();
        let report = CompletionValidator::default()
            .with_strictness(ValidationStrictness::None)
            .validate(&definition(&["x.md"]), temp.path(), StepType::Relations)
            .await;
        assert!(report.success);
        assert!(report.missing_files.is_empty());
    }
}

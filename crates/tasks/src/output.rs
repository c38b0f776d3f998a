use crate::step::StepType;
use std::path::{Path, PathBuf};
use workplan_planner::ChunkInfo;

/// Artifact name for a documented file
pub fn file_output_name(relative_path: &str) -> String {
    format!("{relative_path}.md")
}

/// Artifact name for one chunk of a large file (`part` is 1-based)
pub fn chunk_output_name(relative_path: &str, chunk: &ChunkInfo) -> String {
    format!(
        "{relative_path}.part{}of{}.md",
        chunk.chunk_index + 1,
        chunk.total_chunks
    )
}

/// `<project>/<docs_root>/<step subdir>/<name>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLayout {
    docs_root: PathBuf,
}

impl Default for OutputLayout {
    fn default() -> Self {
        Self::new("docs")
    }
}

impl OutputLayout {
    pub fn new(docs_root: impl Into<PathBuf>) -> Self {
        Self {
            docs_root: docs_root.into(),
        }
    }

    pub fn docs_root(&self) -> &Path {
        &self.docs_root
    }

    pub fn step_dir(&self, project_root: &Path, step: StepType) -> PathBuf {
        let base = project_root.join(&self.docs_root);
        match step.config().output_subdir {
            "" => base,
            subdir => base.join(subdir),
        }
    }

    pub fn resolve(&self, project_root: &Path, step: StepType, name: &str) -> PathBuf {
        self.step_dir(project_root, step).join(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use workplan_planner::ParentFileInfo;

    #[test]
    fn resolves_per_step_subdirs() {
        let layout = OutputLayout::default();
        let root = Path::new("/work/project");
        assert_eq!(
            layout.resolve(root, StepType::FileDocs, "src/lib.rs.md"),
            PathBuf::from("/work/project/docs/files/src/lib.rs.md")
        );
        assert_eq!(
            layout.resolve(root, StepType::ModuleIntegration, "core.md"),
            PathBuf::from("/work/project/docs/modules/core.md")
        );
        assert_eq!(
            layout.resolve(root, StepType::RootDocs, "README.md"),
            PathBuf::from("/work/project/docs/README.md")
        );
    }

    #[test]
    fn chunk_names_are_one_based() {
        let chunk = ChunkInfo {
            chunk_index: 0,
            total_chunks: 3,
            start_line: 1,
            end_line: 40,
            parent_file_info: ParentFileInfo {
                relative_path: "src/big.rs".into(),
                total_tokens: 50_000,
                total_lines: 120,
                size: 200_000,
            },
        };
        assert_eq!(chunk_output_name("src/big.rs", &chunk), "src/big.rs.part1of3.md");
        assert_eq!(file_output_name("src/a.rs"), "src/a.rs.md");
    }
}

use crate::error::{PlannerError, Result};
use regex::Regex;

/// Optional capability that proposes structural split points for a file.
pub trait StructuralBoundaryDetector: Send + Sync {
    /// Return 1-indexed line numbers where a new structural unit starts.
    ///
    /// An empty result means "no hints"; the planner then falls back to line
    /// windows. Errors are treated the same way.
    fn detect_boundaries(&self, content: &str, language: &str) -> Result<Vec<usize>>;
}

/// Line-start declaration matcher (functions, classes, impls, modules)
pub struct RegexBoundaryDetector {
    rust: Regex,
    python: Regex,
    script: Regex,
    generic: Regex,
}

impl RegexBoundaryDetector {
    pub fn new() -> Result<Self> {
        Ok(Self {
            rust: compile(
                r"^\s*(?:#\[|(?:pub(?:\([^)]*\))?\s+)?(?:async\s+)?(?:unsafe\s+)?(?:fn|struct|enum|trait|impl|mod)\b)",
            )?,
            python: compile(r"^\s*(?:@\w|(?:async\s+)?(?:def|class)\s)")?,
            script: compile(
                r"^\s*(?:export\s+)?(?:default\s+)?(?:async\s+)?(?:function\b|class\b|interface\b|(?:const|let)\s+\w+\s*=\s*(?:async\s*)?\()",
            )?,
            generic: compile(
                r"^\s*(?:public\s+|private\s+|protected\s+|static\s+)*(?:func|function|def|class|interface|struct|enum|fn)\b",
            )?,
        })
    }

    fn pattern_for(&self, language: &str) -> &Regex {
        match language {
            "rs" | "rust" => &self.rust,
            "py" | "pyw" | "python" => &self.python,
            "js" | "mjs" | "cjs" | "jsx" | "ts" | "tsx" | "javascript" | "typescript" => {
                &self.script
            }
            _ => &self.generic,
        }
    }
}

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| PlannerError::invalid_config(format!("boundary pattern: {e}")))
}

impl StructuralBoundaryDetector for RegexBoundaryDetector {
    fn detect_boundaries(&self, content: &str, language: &str) -> Result<Vec<usize>> {
        let pattern = self.pattern_for(language);
        let mut boundaries = Vec::new();
        let mut previous_matched = false;

        for (idx, line) in content.lines().enumerate() {
            let matched = pattern.is_match(line);
            // Attributes/decorators stacked on a declaration start one unit.
            if matched && !previous_matched && idx > 0 {
                boundaries.push(idx + 1);
            }
            previous_matched = matched && is_prefix_line(line);
        }

        Ok(boundaries)
    }
}

fn is_prefix_line(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed.starts_with("#[") || trimmed.starts_with('@')
}

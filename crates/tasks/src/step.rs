use crate::error::TaskError;
use crate::validator::ValidationStrictness;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Generation step a task belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StepType {
    FileDocs,
    ModuleIntegration,
    Relations,
    RootDocs,
}

/// Static per-step settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepConfig {
    pub name: &'static str,
    /// Complete tasks as soon as every artifact is present
    pub auto_complete: bool,
    pub max_retries: u32,
    /// Directory under the docs root; empty means the docs root itself
    pub output_subdir: &'static str,
    pub strictness: ValidationStrictness,
}

static STEP_TABLE: [StepConfig; 4] = [
    StepConfig {
        name: "file-docs",
        auto_complete: true,
        max_retries: 3,
        output_subdir: "files",
        strictness: ValidationStrictness::Existence,
    },
    StepConfig {
        name: "module-integration",
        auto_complete: true,
        max_retries: 3,
        output_subdir: "modules",
        strictness: ValidationStrictness::ExistenceMinSize { min_bytes: 100 },
    },
    StepConfig {
        name: "relations",
        auto_complete: true,
        max_retries: 2,
        output_subdir: "relations",
        strictness: ValidationStrictness::Existence,
    },
    StepConfig {
        name: "root-docs",
        auto_complete: false,
        max_retries: 2,
        output_subdir: "",
        strictness: ValidationStrictness::Existence,
    },
];

impl StepType {
    pub const ALL: [StepType; 4] = [
        StepType::FileDocs,
        StepType::ModuleIntegration,
        StepType::Relations,
        StepType::RootDocs,
    ];

    pub fn config(self) -> &'static StepConfig {
        match self {
            Self::FileDocs => &STEP_TABLE[0],
            Self::ModuleIntegration => &STEP_TABLE[1],
            Self::Relations => &STEP_TABLE[2],
            Self::RootDocs => &STEP_TABLE[3],
        }
    }

    pub fn as_str(self) -> &'static str {
        self.config().name
    }
}

impl fmt::Display for StepType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StepType {
    type Err = TaskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Self::ALL
            .into_iter()
            .find(|step| step.as_str() == wanted)
            .ok_or_else(|| TaskError::config(format!("unsupported step type: {wanted}")))
    }
}

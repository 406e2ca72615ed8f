//! Error types with fix suggestions
//!
//! `StepwiseError` covers everything that stops a run before it starts
//! (bad pipeline file, bad CLI input) or prevents writing its report.
//! Step failures are not errors: they are recorded on the step itself,
//! see [`crate::step::StepFailure`].

use thiserror::Error;

/// Trait for errors that provide fix suggestions
pub trait FixSuggestion {
    fn fix_suggestion(&self) -> Option<&str>;
}

pub type Result<T, E = StepwiseError> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum StepwiseError {
    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid schema: expected '{expected}', got '{found}'")]
    InvalidSchema { expected: String, found: String },

    #[error("Invalid pipeline: {reason}")]
    InvalidPipeline { reason: String },

    #[error("Step {index} ('{name}'): {reason}")]
    InvalidStep {
        index: usize,
        name: String,
        reason: String,
    },

    #[error("Duplicate step id '{id}'")]
    DuplicateStepId { id: String },

    #[error("Invalid branch pattern '{pattern}': {details}")]
    InvalidBranchPattern { pattern: String, details: String },

    #[error("Unknown event type '{value}' (expected push or pull_request)")]
    UnknownEventType { value: String },

    #[error("--event was given without --branch")]
    MissingBranch,

    #[error("Failed to write run report to '{path}': {details}")]
    ReportWrite { path: String, details: String },
}

impl FixSuggestion for StepwiseError {
    fn fix_suggestion(&self) -> Option<&str> {
        match self {
            StepwiseError::YamlParse(_) => Some("Check YAML syntax: indentation and quoting"),
            StepwiseError::Io(_) => Some("Check file path and permissions"),
            StepwiseError::InvalidSchema { .. } => {
                Some("Add `schema: stepwise/pipeline@1` at the top of the pipeline file")
            }
            StepwiseError::InvalidPipeline { .. } => Some("Fix the pipeline definition"),
            StepwiseError::InvalidStep { .. } => {
                Some("Each step needs a name and exactly one of run:, exec: or upload:")
            }
            StepwiseError::DuplicateStepId { .. } => Some("Use unique id values for steps"),
            StepwiseError::InvalidBranchPattern { .. } => {
                Some("Use glob syntax for branches, e.g. main or release/*")
            }
            StepwiseError::UnknownEventType { .. } => {
                Some("Pass --event push or --event pull_request")
            }
            StepwiseError::MissingBranch => {
                Some("Pass --branch <name> or set STEPWISE_BRANCH")
            }
            StepwiseError::ReportWrite { .. } => {
                Some("Check that the report directory exists and is writable")
            }
        }
    }
}

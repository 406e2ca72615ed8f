//! Stepwise - sequential build-verification pipeline runner
//!
//! Runs an ordered list of steps (toolchain setup, build, test, lint,
//! results upload), tolerating failures of steps marked
//! `continue_on_error` and halting on any other failure.

pub mod command;
pub mod error;
pub mod event_log;
pub mod pipeline;
pub mod report;
pub mod runner;
pub mod step;
pub mod step_executor;
pub mod trigger;
pub mod upload;

pub use command::{
    CommandExecutor, CommandOutput, CommandSpec, ExecError, MockExecutor, ProcessExecutor,
};
pub use error::{FixSuggestion, StepwiseError};
pub use event_log::{Event, EventKind, EventLog};
pub use pipeline::Pipeline;
pub use report::RunReport;
pub use runner::{RunObserver, Runner};
pub use step::{
    Disposition, FailureKind, Run, RunStatus, Step, StepAction, StepFailure, StepResult,
};
pub use step_executor::{StepExecutor, StepOutcome};
pub use trigger::{EventType, TriggerEvent, TriggerFilter};
pub use upload::{DefaultUploader, Uploader};

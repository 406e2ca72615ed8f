//! Step and Run model
//!
//! A [`Step`] is one unit of pipeline work: an action plus a failure
//! tolerance flag. A [`Run`] is the ordered list of steps executed for a
//! single trigger. The per-step `result` is written once, by the runner.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

// ============================================================================
// ACTIONS
// ============================================================================

/// Exec action - program spawned directly, no shell
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ExecParams {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

/// Upload action - push an analysis results file to a target
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct UploadParams {
    /// Results artifact, relative to the step's working directory
    pub file: PathBuf,
    /// `http(s)://` endpoint, `file://` URL or plain directory path
    pub target: String,
    /// Name of the env var holding a bearer token for HTTP targets
    #[serde(default)]
    pub token_env: Option<String>,
}

/// The 3 step action types - serde picks the one whose key is present
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum StepAction {
    Run { run: String },
    Exec { exec: ExecParams },
    Upload { upload: UploadParams },
}

impl StepAction {
    pub fn kind(&self) -> &'static str {
        match self {
            StepAction::Run { .. } => "run",
            StepAction::Exec { .. } => "exec",
            StepAction::Upload { .. } => "upload",
        }
    }

    /// One-line rendering for plans and logs
    pub fn describe(&self) -> String {
        match self {
            StepAction::Run { run } => run.clone(),
            StepAction::Exec { exec } => {
                let mut parts = Vec::with_capacity(exec.args.len() + 1);
                parts.push(exec.program.as_str());
                parts.extend(exec.args.iter().map(String::as_str));
                parts.join(" ")
            }
            StepAction::Upload { upload } => {
                format!("upload {} -> {}", upload.file.display(), upload.target)
            }
        }
    }
}

// ============================================================================
// RESULTS
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepResult {
    #[default]
    NotRun,
    Success,
    Failed,
}

impl fmt::Display for StepResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepResult::NotRun => write!(f, "not run"),
            StepResult::Success => write!(f, "success"),
            StepResult::Failed => write!(f, "failed"),
        }
    }
}

/// Whether the command was never started or started and reported failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Launch,
    Tool,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Launch => write!(f, "launch error"),
            FailureKind::Tool => write!(f, "tool failure"),
        }
    }
}

/// What a failure does to the run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    /// Recorded, run continues, overall status untouched
    Tolerated,
    /// Halts the run and fails it
    Fatal,
}

/// Why a step failed
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum StepFailure {
    /// Program missing, not executable, bad working directory...
    Launch { details: String },
    /// Process exited with a non-zero code
    ExitCode { code: i32 },
    /// Process ended without an exit code (killed by a signal)
    Terminated,
    /// Configured timeout elapsed, process was killed
    TimedOut { after_secs: u64 },
    /// Uploader rejected or could not deliver the results file
    Upload { details: String },
}

impl StepFailure {
    pub fn kind(&self) -> FailureKind {
        match self {
            StepFailure::Launch { .. } => FailureKind::Launch,
            _ => FailureKind::Tool,
        }
    }
}

impl fmt::Display for StepFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepFailure::Launch { details } => write!(f, "could not start: {details}"),
            StepFailure::ExitCode { code } => write!(f, "exited with code {code}"),
            StepFailure::Terminated => write!(f, "terminated by signal"),
            StepFailure::TimedOut { after_secs } => write!(f, "timed out after {after_secs}s"),
            StepFailure::Upload { details } => write!(f, "upload failed: {details}"),
        }
    }
}

// ============================================================================
// STEP
// ============================================================================

/// One pipeline step, as declared in the pipeline file
#[derive(Debug, Clone, Deserialize)]
pub struct Step {
    pub name: String,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(flatten)]
    pub action: StepAction,
    #[serde(default, alias = "continue-on-error")]
    pub continue_on_error: bool,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default, alias = "working-directory")]
    pub working_directory: Option<PathBuf>,
    #[serde(default, alias = "timeout-secs")]
    pub timeout_secs: Option<u64>,

    #[serde(skip)]
    result: StepResult,
    #[serde(skip)]
    failure: Option<StepFailure>,
}

impl Step {
    pub fn new(name: impl Into<String>, action: StepAction) -> Self {
        Self {
            name: name.into(),
            id: None,
            action,
            continue_on_error: false,
            env: BTreeMap::new(),
            working_directory: None,
            timeout_secs: None,
            result: StepResult::NotRun,
            failure: None,
        }
    }

    /// Shell command step
    pub fn run(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self::new(name, StepAction::Run { run: command.into() })
    }

    /// Direct program invocation step
    pub fn exec<I, S>(name: impl Into<String>, program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(
            name,
            StepAction::Exec {
                exec: ExecParams {
                    program: program.into(),
                    args: args.into_iter().map(Into::into).collect(),
                },
            },
        )
    }

    /// Results upload step
    pub fn upload(
        name: impl Into<String>,
        file: impl Into<PathBuf>,
        target: impl Into<String>,
    ) -> Self {
        Self::new(
            name,
            StepAction::Upload {
                upload: UploadParams {
                    file: file.into(),
                    target: target.into(),
                    token_env: None,
                },
            },
        )
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn continue_on_error(mut self, tolerant: bool) -> Self {
        self.continue_on_error = tolerant;
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn in_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_directory = Some(dir.into());
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    pub fn result(&self) -> StepResult {
        self.result
    }

    pub fn failure(&self) -> Option<&StepFailure> {
        self.failure.as_ref()
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }

    /// Tolerated or fatal, for a failure of this step
    pub fn disposition(&self) -> Disposition {
        if self.continue_on_error {
            Disposition::Tolerated
        } else {
            Disposition::Fatal
        }
    }

    /// Key used in logs and reports: the id when set, else the name
    pub fn label(&self) -> &str {
        self.id.as_deref().unwrap_or(&self.name)
    }

    /// Write the terminal result. Only the runner calls this, once per step.
    pub(crate) fn record(&mut self, outcome: Result<(), StepFailure>) {
        debug_assert_eq!(
            self.result,
            StepResult::NotRun,
            "step '{}' recorded twice",
            self.name
        );
        if self.result != StepResult::NotRun {
            return;
        }
        match outcome {
            Ok(()) => self.result = StepResult::Success,
            Err(failure) => {
                self.result = StepResult::Failed;
                self.failure = Some(failure);
            }
        }
    }

    /// Failed and not covered by continue_on_error
    pub fn is_fatal_failure(&self) -> bool {
        self.result == StepResult::Failed && self.disposition() == Disposition::Fatal
    }
}

// ============================================================================
// RUN
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    Failed,
}

impl RunStatus {
    /// Process exit code surfaced to the hosting CI platform
    pub fn exit_code(self) -> u8 {
        match self {
            RunStatus::Success => 0,
            RunStatus::Failed => 1,
        }
    }

    pub fn is_success(self) -> bool {
        self == RunStatus::Success
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Success => write!(f, "success"),
            RunStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Ordered steps for one trigger event. Insertion order is execution order.
#[derive(Debug, Clone, Default)]
pub struct Run {
    steps: Vec<Step>,
}

impl Run {
    pub fn new(steps: Vec<Step>) -> Self {
        Self { steps }
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub(crate) fn steps_mut(&mut self) -> &mut [Step] {
        &mut self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Failed if any non-tolerant step failed, Success otherwise
    pub fn overall_status(&self) -> RunStatus {
        if self.steps.iter().any(Step::is_fatal_failure) {
            RunStatus::Failed
        } else {
            RunStatus::Success
        }
    }

    pub fn results(&self) -> Vec<StepResult> {
        self.steps.iter().map(Step::result).collect()
    }

    /// Steps that failed under continue_on_error
    pub fn tolerated_failures(&self) -> impl Iterator<Item = &Step> {
        self.steps
            .iter()
            .filter(|s| s.result == StepResult::Failed && s.continue_on_error)
    }
}

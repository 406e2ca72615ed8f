//! Single-step execution
//!
//! Dispatches a step's action to the command or upload collaborator and
//! folds whatever comes back into a [`StepOutcome`]. Never writes the
//! step's result itself: that is the runner's job.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, instrument};

use crate::command::{CommandExecutor, CommandSpec, ExecError};
use crate::step::{ExecParams, Step, StepAction, StepFailure, UploadParams};
use crate::upload::{UploadRequest, Uploader};

/// Everything observed while executing one step
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutcome {
    pub outcome: Result<(), StepFailure>,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

impl StepOutcome {
    fn finished(outcome: Result<(), StepFailure>, started: Instant) -> Self {
        Self {
            outcome,
            stdout: String::new(),
            stderr: String::new(),
            duration: started.elapsed(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// Step executor with shared collaborators and run-wide environment
#[derive(Clone)]
pub struct StepExecutor {
    commands: Arc<dyn CommandExecutor>,
    uploader: Arc<dyn Uploader>,
    /// Pipeline env plus trigger variables; step env goes on top
    base_env: BTreeMap<String, String>,
    /// Directory relative working directories are resolved against
    base_dir: Option<PathBuf>,
}

impl StepExecutor {
    pub fn new(commands: Arc<dyn CommandExecutor>, uploader: Arc<dyn Uploader>) -> Self {
        Self {
            commands,
            uploader,
            base_env: BTreeMap::new(),
            base_dir: None,
        }
    }

    pub fn with_env<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.base_env
            .extend(vars.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn with_base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_dir = Some(dir.into());
        self
    }

    #[instrument(skip(self, step), fields(step = %step.label(), action = step.action.kind()))]
    pub async fn execute(&self, step: &Step) -> StepOutcome {
        debug!("Executing step action");
        match &step.action {
            StepAction::Run { run } => self.execute_command(step, CommandSpec::shell(run)).await,
            StepAction::Exec { exec } => self.execute_command(step, exec_spec(exec)).await,
            StepAction::Upload { upload } => self.execute_upload(step, upload).await,
        }
    }

    fn env_for(&self, step: &Step) -> BTreeMap<String, String> {
        let mut env = self.base_env.clone();
        env.extend(step.env.iter().map(|(k, v)| (k.clone(), v.clone())));
        env
    }

    fn dir_for(&self, step: &Step) -> Option<PathBuf> {
        match (&self.base_dir, &step.working_directory) {
            (Some(base), Some(dir)) => Some(base.join(dir)),
            (None, Some(dir)) => Some(dir.clone()),
            (Some(base), None) => Some(base.clone()),
            (None, None) => None,
        }
    }

    async fn execute_command(&self, step: &Step, mut spec: CommandSpec) -> StepOutcome {
        spec.env = self.env_for(step);
        spec.working_dir = self.dir_for(step);
        spec.timeout = step.timeout();

        let started = Instant::now();
        match self.commands.run(&spec).await {
            Ok(output) => {
                let outcome = if output.success() {
                    Ok(())
                } else {
                    match output.exit_code {
                        Some(code) => Err(StepFailure::ExitCode { code }),
                        None => Err(StepFailure::Terminated),
                    }
                };
                StepOutcome {
                    outcome,
                    stdout: output.stdout,
                    stderr: output.stderr,
                    duration: started.elapsed(),
                }
            }
            Err(ExecError::Launch { source, .. }) => StepOutcome::finished(
                Err(StepFailure::Launch {
                    details: source.to_string(),
                }),
                started,
            ),
            Err(ExecError::TimedOut { after, .. }) => StepOutcome::finished(
                Err(StepFailure::TimedOut {
                    after_secs: after.as_secs(),
                }),
                started,
            ),
        }
    }

    async fn execute_upload(&self, step: &Step, upload: &UploadParams) -> StepOutcome {
        let env = self.env_for(step);
        let file = match self.dir_for(step) {
            Some(dir) => dir.join(&upload.file),
            None => upload.file.clone(),
        };
        let bearer_token = upload.token_env.as_ref().and_then(|name| {
            env.get(name)
                .cloned()
                .or_else(|| std::env::var(name).ok())
        });

        let request = UploadRequest {
            file,
            target: upload.target.clone(),
            bearer_token,
        };

        let started = Instant::now();
        match self.uploader.upload(&request).await {
            Ok(receipt) => StepOutcome {
                outcome: Ok(()),
                stdout: format!(
                    "uploaded {} bytes to {}\n",
                    receipt.bytes, receipt.destination
                ),
                stderr: String::new(),
                duration: started.elapsed(),
            },
            Err(e) => StepOutcome::finished(
                Err(StepFailure::Upload {
                    details: e.to_string(),
                }),
                started,
            ),
        }
    }
}

fn exec_spec(exec: &ExecParams) -> CommandSpec {
    CommandSpec::new(&exec.program).args(exec.args.iter().cloned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{MockExecutor, MockOutcome};
    use crate::upload::{UploadError, UploadReceipt};
    use async_trait::async_trait;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingUploader {
        requests: Mutex<Vec<UploadRequest>>,
        reject: bool,
    }

    #[async_trait]
    impl Uploader for RecordingUploader {
        async fn upload(&self, request: &UploadRequest) -> Result<UploadReceipt, UploadError> {
            self.requests.lock().push(request.clone());
            if self.reject {
                return Err(UploadError::Rejected {
                    target: request.target.clone(),
                    status: 403,
                });
            }
            Ok(UploadReceipt {
                destination: request.target.clone(),
                bytes: 42,
            })
        }
    }

    fn executor(mock: &MockExecutor) -> StepExecutor {
        StepExecutor::new(Arc::new(mock.clone()), Arc::new(RecordingUploader::default()))
    }

    #[tokio::test]
    async fn zero_exit_is_success() {
        let mock = MockExecutor::new();
        let out = executor(&mock).execute(&Step::run("Build", "cargo build")).await;
        assert!(out.is_success());
    }

    #[tokio::test]
    async fn exit_code_and_launch_errors_are_mapped() {
        let mock = MockExecutor::new()
            .failing("cargo test", 101)
            .on("typos", MockOutcome::NotFound)
            .on("cargo", MockOutcome::TimedOut(Duration::from_secs(9)));
        let exec = executor(&mock);

        let test = exec.execute(&Step::run("Test", "cargo test")).await;
        assert_eq!(test.outcome, Err(StepFailure::ExitCode { code: 101 }));

        let typos = exec.execute(&Step::exec("Spelling", "typos", ["."])).await;
        assert!(matches!(typos.outcome, Err(StepFailure::Launch { .. })));

        let build = exec.execute(&Step::exec("Build", "cargo", ["build"])).await;
        assert_eq!(build.outcome, Err(StepFailure::TimedOut { after_secs: 9 }));
    }

    #[tokio::test]
    async fn signal_without_exit_code_fails() {
        let mock = MockExecutor::new().on("crash", MockOutcome::Output(Default::default()));
        let out = executor(&mock).execute(&Step::exec("Crash", "crash", Vec::<String>::new())).await;
        assert_eq!(out.outcome, Err(StepFailure::Terminated));
    }

    #[tokio::test]
    async fn step_env_overrides_base_env() {
        let mock = MockExecutor::new();
        let exec = executor(&mock)
            .with_env([("PROFILE", "debug"), ("CI", "true")])
            .with_base_dir("/work");
        let step = Step::exec("Build", "cargo", ["build"])
            .with_env("PROFILE", "release")
            .in_dir("crates/core")
            .with_timeout(60);

        exec.execute(&step).await;

        let spec = &mock.calls()[0];
        assert_eq!(spec.env.get("PROFILE").map(String::as_str), Some("release"));
        assert_eq!(spec.env.get("CI").map(String::as_str), Some("true"));
        assert_eq!(spec.working_dir, Some(PathBuf::from("/work/crates/core")));
        assert_eq!(spec.timeout, Some(Duration::from_secs(60)));
    }

    #[tokio::test]
    async fn upload_resolves_file_and_token() {
        let uploader = Arc::new(RecordingUploader::default());
        let exec = StepExecutor::new(Arc::new(MockExecutor::new()), uploader.clone())
            .with_env([("SARIF_TOKEN", "secret")])
            .with_base_dir("/work");

        let mut step = Step::upload("Upload", "clippy.sarif", "https://example.invalid/sarif");
        if let StepAction::Upload { upload } = &mut step.action {
            upload.token_env = Some("SARIF_TOKEN".into());
        }

        let out = exec.execute(&step).await;
        assert!(out.is_success());
        assert!(out.stdout.contains("42 bytes"));

        let request = uploader.requests.lock()[0].clone();
        assert_eq!(request.file, PathBuf::from("/work/clippy.sarif"));
        assert_eq!(request.bearer_token.as_deref(), Some("secret"));
    }

    #[tokio::test]
    async fn rejected_upload_is_a_tool_failure() {
        let uploader = Arc::new(RecordingUploader {
            reject: true,
            ..Default::default()
        });
        let exec = StepExecutor::new(Arc::new(MockExecutor::new()), uploader);
        let out = exec
            .execute(&Step::upload("Upload", "a.sarif", "https://example.invalid"))
            .await;

        let failure = out.outcome.unwrap_err();
        assert_eq!(failure.kind(), crate::step::FailureKind::Tool);
        assert!(failure.to_string().contains("403"));
    }
}

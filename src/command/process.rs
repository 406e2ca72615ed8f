//! Real child processes via tokio

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, instrument};

use super::{CommandExecutor, CommandOutput, CommandSpec, ExecError};

/// Spawns the program, waits for it, captures stdout/stderr
#[derive(Debug, Clone, Default)]
pub struct ProcessExecutor;

impl ProcessExecutor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandExecutor for ProcessExecutor {
    #[instrument(skip(self, spec), fields(program = %spec.program))]
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, ExecError> {
        let mut command = Command::new(&spec.program);
        command.args(&spec.args).envs(&spec.env).kill_on_drop(true);
        if let Some(dir) = &spec.working_dir {
            command.current_dir(dir);
        }

        let output = command.output();
        let output = match spec.timeout {
            Some(after) => tokio::time::timeout(after, output)
                .await
                .map_err(|_| ExecError::TimedOut {
                    program: spec.program.clone(),
                    after,
                })?,
            None => output.await,
        }
        .map_err(|source| ExecError::Launch {
            program: spec.program.clone(),
            source,
        })?;

        debug!(exit_code = ?output.status.code(), "process finished");

        Ok(CommandOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn echo_captures_stdout() {
        let out = ProcessExecutor::new()
            .run(&CommandSpec::shell("echo hello"))
            .await
            .unwrap();
        assert!(out.success());
        assert_eq!(out.stdout.trim(), "hello");
    }

    #[tokio::test]
    async fn non_zero_exit_is_reported() {
        let out = ProcessExecutor::new()
            .run(&CommandSpec::shell("echo oops >&2; exit 3"))
            .await
            .unwrap();
        assert_eq!(out.exit_code, Some(3));
        assert_eq!(out.stderr.trim(), "oops");
    }

    #[tokio::test]
    async fn missing_program_is_launch_error() {
        let err = ProcessExecutor::new()
            .run(&CommandSpec::new("stepwise-definitely-not-installed"))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecError::Launch { .. }));
    }

    #[tokio::test]
    async fn env_and_working_dir_are_applied() {
        let dir = tempfile::tempdir().unwrap();
        let mut spec = CommandSpec::shell("echo $GREETING; pwd");
        spec.env.insert("GREETING".into(), "bonjour".into());
        spec.working_dir = Some(dir.path().to_path_buf());

        let out = ProcessExecutor::new().run(&spec).await.unwrap();
        let mut lines = out.stdout.lines();
        assert_eq!(lines.next(), Some("bonjour"));
        let pwd = std::path::PathBuf::from(lines.next().unwrap());
        assert_eq!(
            pwd.canonicalize().unwrap(),
            dir.path().canonicalize().unwrap()
        );
    }

    #[tokio::test]
    async fn timeout_kills_the_process() {
        let mut spec = CommandSpec::shell("sleep 5");
        spec.timeout = Some(Duration::from_millis(100));
        let err = ProcessExecutor::new().run(&spec).await.unwrap_err();
        assert!(matches!(err, ExecError::TimedOut { .. }));
    }
}

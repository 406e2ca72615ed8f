//! Mock executor for testing
//!
//! Returns scripted outcomes without spawning anything and records every
//! spec it receives, so tests can assert on order and environment.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{CommandExecutor, CommandOutput, CommandSpec, ExecError};

/// Scripted result for a matching command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockOutcome {
    Exit(i32),
    Output(CommandOutput),
    /// Simulates a missing binary
    NotFound,
    TimedOut(Duration),
}

impl MockOutcome {
    fn resolve(&self, spec: &CommandSpec) -> Result<CommandOutput, ExecError> {
        match self {
            MockOutcome::Exit(code) => Ok(CommandOutput::exited(*code)),
            MockOutcome::Output(output) => Ok(output.clone()),
            MockOutcome::NotFound => Err(ExecError::Launch {
                program: spec.program.clone(),
                source: io::Error::new(io::ErrorKind::NotFound, "No such file or directory"),
            }),
            MockOutcome::TimedOut(after) => Err(ExecError::TimedOut {
                program: spec.program.clone(),
                after: *after,
            }),
        }
    }
}

/// Mock executor with per-command outcomes (first matching rule wins)
#[derive(Clone)]
pub struct MockExecutor {
    rules: Arc<Mutex<Vec<(String, MockOutcome)>>>,
    default_outcome: MockOutcome,
    calls: Arc<Mutex<Vec<CommandSpec>>>,
}

impl MockExecutor {
    /// Every command succeeds unless a rule says otherwise
    pub fn new() -> Self {
        Self {
            rules: Arc::new(Mutex::new(Vec::new())),
            default_outcome: MockOutcome::Exit(0),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_default(mut self, outcome: MockOutcome) -> Self {
        self.default_outcome = outcome;
        self
    }

    /// Script an outcome. `key` matches the program, the full command line,
    /// or the script of a shell invocation (`sh -c <key>`).
    pub fn on(self, key: impl Into<String>, outcome: MockOutcome) -> Self {
        self.rules.lock().push((key.into(), outcome));
        self
    }

    /// Shorthand for a non-zero exit
    pub fn failing(self, key: impl Into<String>, code: i32) -> Self {
        self.on(key, MockOutcome::Exit(code))
    }

    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    fn outcome_for(&self, spec: &CommandSpec) -> MockOutcome {
        let command_line = spec.command_line();
        let script = match spec.program.as_str() {
            "sh" | "cmd" => spec.args.last().map(String::as_str),
            _ => None,
        };

        self.rules
            .lock()
            .iter()
            .find(|(key, _)| {
                key == &spec.program || key == &command_line || Some(key.as_str()) == script
            })
            .map(|(_, outcome)| outcome.clone())
            .unwrap_or_else(|| self.default_outcome.clone())
    }
}

impl Default for MockExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CommandExecutor for MockExecutor {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, ExecError> {
        self.calls.lock().push(spec.clone());
        self.outcome_for(spec).resolve(spec)
    }
}

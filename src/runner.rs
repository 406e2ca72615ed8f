//! Pipeline runner
//!
//! Executes the steps of a [`Run`] strictly in order, one at a time.
//!
//! - success: next step
//! - failure on a `continue_on_error` step: recorded, next step
//! - failure on any other step: recorded, remaining steps stay `NotRun`
//!
//! The overall status is derived from the recorded results, so an empty run
//! or a run with only tolerated failures is a success.

use std::sync::Arc;
use std::time::Instant;

use tracing::{error, info, instrument, warn};

use crate::event_log::{EventKind, EventLog};
use crate::step::{Disposition, Run, RunStatus, Step};
use crate::step_executor::{StepExecutor, StepOutcome};

/// Hooks for live progress output. All methods default to no-ops.
pub trait RunObserver: Send + Sync {
    fn step_started(&self, _index: usize, _step: &Step) {}
    fn step_finished(&self, _index: usize, _step: &Step, _outcome: &StepOutcome) {}
    fn step_skipped(&self, _index: usize, _step: &Step) {}
}

struct Silent;

impl RunObserver for Silent {}

pub struct Runner {
    executor: StepExecutor,
    event_log: EventLog,
    observer: Arc<dyn RunObserver>,
}

impl Runner {
    pub fn new(executor: StepExecutor) -> Self {
        Self {
            executor,
            event_log: EventLog::new(),
            observer: Arc::new(Silent),
        }
    }

    pub fn with_event_log(mut self, event_log: EventLog) -> Self {
        self.event_log = event_log;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn RunObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn event_log(&self) -> &EventLog {
        &self.event_log
    }

    /// Execute every step in order and return the overall status
    #[instrument(skip_all, fields(steps = run.len()))]
    pub async fn execute(&self, run: &mut Run) -> RunStatus {
        let started = Instant::now();
        self.event_log.emit(EventKind::RunStarted {
            step_count: run.len(),
        });
        info!(steps = run.len(), "Run started");

        let steps = run.steps_mut();
        let mut halted_at = None;

        for index in 0..steps.len() {
            let label: Arc<str> = Arc::from(steps[index].label());
            let continue_on_error = steps[index].continue_on_error;
            let disposition = steps[index].disposition();

            self.event_log.emit(EventKind::StepStarted {
                step: Arc::clone(&label),
                index,
                continue_on_error,
            });
            self.observer.step_started(index, &steps[index]);

            let outcome = self.executor.execute(&steps[index]).await;
            let duration_ms = outcome.duration.as_millis() as u64;
            steps[index].record(outcome.outcome.clone());

            let step = &steps[index];
            match step.failure() {
                None => {
                    info!(
                        step = %label,
                        continue_on_error,
                        result = %step.result(),
                        duration_ms,
                        "Step succeeded"
                    );
                    self.event_log.emit(EventKind::StepSucceeded {
                        step: Arc::clone(&label),
                        index,
                        duration_ms,
                    });
                }
                Some(failure) => {
                    match disposition {
                        Disposition::Tolerated => warn!(
                            step = %label,
                            continue_on_error,
                            result = %step.result(),
                            kind = %failure.kind(),
                            error = %failure,
                            "Step failed, continuing"
                        ),
                        Disposition::Fatal => error!(
                            step = %label,
                            continue_on_error,
                            result = %step.result(),
                            kind = %failure.kind(),
                            error = %failure,
                            "Step failed, halting run"
                        ),
                    }
                    self.event_log.emit(EventKind::StepFailed {
                        step: Arc::clone(&label),
                        index,
                        failure_kind: failure.kind(),
                        error: failure.to_string(),
                        tolerated: disposition == Disposition::Tolerated,
                        duration_ms,
                    });
                }
            }
            self.observer.step_finished(index, step, &outcome);

            if step.is_fatal_failure() {
                halted_at = Some((index, label));
                break;
            }
        }

        if let Some((failed_index, failed_step)) = halted_at {
            let remaining = &steps[failed_index + 1..];
            for (offset, step) in remaining.iter().enumerate() {
                let index = failed_index + 1 + offset;
                info!(
                    step = %step.label(),
                    continue_on_error = step.continue_on_error,
                    result = %step.result(),
                    "Step skipped"
                );
                self.event_log.emit(EventKind::StepSkipped {
                    step: Arc::from(step.label()),
                    index,
                });
                self.observer.step_skipped(index, step);
            }
            self.event_log.emit(EventKind::RunHalted {
                failed_step,
                skipped: remaining.len(),
            });
        }

        let status = run.overall_status();
        let tolerated_failures = run.tolerated_failures().count();
        let total_duration_ms = started.elapsed().as_millis() as u64;
        self.event_log.emit(EventKind::RunCompleted {
            status,
            tolerated_failures,
            total_duration_ms,
        });
        info!(%status, tolerated_failures, total_duration_ms, "Run finished");

        status
    }
}

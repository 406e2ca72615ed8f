//! Run report
//!
//! JSON summary of a finished run, for archiving next to CI artifacts.

use std::path::Path;

use serde::Serialize;

use crate::error::{Result, StepwiseError};
use crate::event_log::{Event, EventLog};
use crate::step::{FailureKind, Run, RunStatus, StepFailure, StepResult};
use crate::trigger::TriggerEvent;

#[derive(Debug, Clone, Serialize)]
pub struct TriggerInfo {
    pub event: String,
    pub branch: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct StepReport {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub continue_on_error: bool,
    pub result: StepResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_kind: Option<FailureKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<StepFailure>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub pipeline: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trigger: Option<TriggerInfo>,
    pub status: RunStatus,
    pub exit_code: u8,
    pub steps: Vec<StepReport>,
    pub events: Vec<Event>,
}

impl RunReport {
    pub fn from_run(
        pipeline: &str,
        trigger: Option<&TriggerEvent>,
        run: &Run,
        event_log: &EventLog,
    ) -> Self {
        let events = event_log.events();
        let duration_of = |index: usize| {
            events
                .iter()
                .filter_map(|e| e.kind.step_duration())
                .find(|(i, _)| *i == index)
                .map(|(_, ms)| ms)
        };

        let steps = run
            .steps()
            .iter()
            .enumerate()
            .map(|(index, step)| StepReport {
                name: step.name.clone(),
                id: step.id.clone(),
                continue_on_error: step.continue_on_error,
                result: step.result(),
                failure_kind: step.failure().map(StepFailure::kind),
                failure: step.failure().cloned(),
                duration_ms: duration_of(index),
            })
            .collect();

        let status = run.overall_status();
        Self {
            pipeline: pipeline.to_string(),
            trigger: trigger.map(|t| TriggerInfo {
                event: t.event_type.to_string(),
                branch: t.branch.clone(),
            }),
            status,
            exit_code: status.exit_code(),
            steps,
            events,
        }
    }

    pub fn count(&self, result: StepResult) -> usize {
        self.steps.iter().filter(|s| s.result == result).count()
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| StepwiseError::ReportWrite {
            path: "-".to_string(),
            details: e.to_string(),
        })
    }

    pub fn write_to(&self, path: &Path) -> Result<()> {
        let json = self.to_json_pretty()?;
        std::fs::write(path, json).map_err(|e| StepwiseError::ReportWrite {
            path: path.display().to_string(),
            details: e.to_string(),
        })
    }
}

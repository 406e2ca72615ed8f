//! Pipeline definition
//!
//! The declarative file a Run is built from: schema tag, name, trigger
//! filter, shared environment and the ordered step list. Which steps are
//! tolerant is decided here, per step, never by the runner.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_yaml::Value;

use crate::error::{Result, StepwiseError};
use crate::step::{Run, Step, StepAction};
use crate::trigger::{TriggerEvent, TriggerFilter};

/// Schema tag every pipeline file must carry
pub const SCHEMA: &str = "stepwise/pipeline@1";

/// Keys that select a step's action
const ACTION_KEYS: [&str; 3] = ["run", "exec", "upload"];

/// Step ids: lowercase, start with a letter
static STEP_ID_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z][a-z0-9_-]*$").unwrap());

#[derive(Debug, Clone, Deserialize)]
pub struct Pipeline {
    pub schema: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, rename = "on")]
    pub trigger: Option<TriggerFilter>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub steps: Vec<Step>,
}

impl Pipeline {
    /// Parse and validate
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let doc: Value = serde_yaml::from_str(yaml)?;
        check_single_action(&doc)?;
        let pipeline: Pipeline = serde_yaml::from_value(doc)?;
        pipeline.validate()?;
        Ok(pipeline)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let yaml = std::fs::read_to_string(path)?;
        Self::from_yaml(&yaml)
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("pipeline")
    }

    pub fn validate(&self) -> Result<()> {
        if self.schema != SCHEMA {
            return Err(StepwiseError::InvalidSchema {
                expected: SCHEMA.to_string(),
                found: self.schema.clone(),
            });
        }

        if let Some(trigger) = &self.trigger {
            trigger.validate()?;
        }

        if let Some(key) = self.env.keys().find(|k| !is_env_name(k)) {
            return Err(StepwiseError::InvalidPipeline {
                reason: format!("env var name '{key}' is invalid"),
            });
        }

        let mut ids = HashSet::new();
        for (index, step) in self.steps.iter().enumerate() {
            validate_step(index, step)?;
            if let Some(id) = &step.id {
                if !ids.insert(id.as_str()) {
                    return Err(StepwiseError::DuplicateStepId { id: id.clone() });
                }
            }
        }

        Ok(())
    }

    /// No `on:` block means every event triggers the pipeline
    pub fn accepts(&self, event: &TriggerEvent) -> bool {
        self.trigger
            .as_ref()
            .map_or(true, |filter| filter.accepts(event))
    }

    /// Fresh Run with every step `NotRun`
    pub fn to_run(&self) -> Run {
        Run::new(self.steps.clone())
    }

    pub fn tolerant_steps(&self) -> usize {
        self.steps.iter().filter(|s| s.continue_on_error).count()
    }
}

/// Untagged action parsing keeps the first match and drops the rest,
/// so extra action keys are caught on the raw document.
fn check_single_action(doc: &Value) -> Result<()> {
    let Some(steps) = doc.get("steps").and_then(Value::as_sequence) else {
        return Ok(());
    };

    for (index, step) in steps.iter().enumerate() {
        let declared: Vec<&str> = ACTION_KEYS
            .iter()
            .copied()
            .filter(|key| step.get(*key).is_some())
            .collect();
        if declared.len() > 1 {
            return Err(StepwiseError::InvalidStep {
                index,
                name: step
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                reason: format!(
                    "declares {} actions, only one is allowed",
                    declared.join(" and ")
                ),
            });
        }
    }
    Ok(())
}

fn validate_step(index: usize, step: &Step) -> Result<()> {
    let invalid = |reason: &str| StepwiseError::InvalidStep {
        index,
        name: step.name.clone(),
        reason: reason.to_string(),
    };

    if step.name.trim().is_empty() {
        return Err(invalid("name must not be empty"));
    }
    if let Some(id) = &step.id {
        if !STEP_ID_PATTERN.is_match(id) {
            return Err(invalid(&format!(
                "id '{id}' must match {}",
                STEP_ID_PATTERN.as_str()
            )));
        }
    }
    if let Some(key) = step.env.keys().find(|k| !is_env_name(k)) {
        return Err(invalid(&format!("env var name '{key}' is invalid")));
    }
    if step.timeout_secs == Some(0) {
        return Err(invalid("timeout_secs must be greater than 0"));
    }

    match &step.action {
        StepAction::Run { run } if run.trim().is_empty() => Err(invalid("run: command is empty")),
        StepAction::Exec { exec } if exec.program.trim().is_empty() => {
            Err(invalid("exec.program is empty"))
        }
        StepAction::Upload { upload } if upload.file.as_os_str().is_empty() => {
            Err(invalid("upload.file is empty"))
        }
        StepAction::Upload { upload } if upload.target.trim().is_empty() => {
            Err(invalid("upload.target is empty"))
        }
        _ => Ok(()),
    }
}

fn is_env_name(name: &str) -> bool {
    !name.is_empty() && !name.contains(['=', '\0'])
}

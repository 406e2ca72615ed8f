//! Run event log
//!
//! Append-only audit trail of one run.
//! - Event: envelope with id + timestamp + kind
//! - EventKind: run-level and step-level transitions
//! - EventLog: thread-safe, cheap to clone

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;

use crate::step::{FailureKind, RunStatus};

/// Single event in the run log
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    /// Monotonic sequence ID (for ordering)
    pub id: u64,
    /// Time since run start (ms)
    pub timestamp_ms: u64,
    pub kind: EventKind,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    // ═══════════════════════════════════════════
    // RUN LEVEL
    // ═══════════════════════════════════════════
    RunStarted {
        step_count: usize,
    },
    /// A fatal failure stopped the run early
    RunHalted {
        failed_step: Arc<str>,
        skipped: usize,
    },
    RunCompleted {
        status: RunStatus,
        tolerated_failures: usize,
        total_duration_ms: u64,
    },

    // ═══════════════════════════════════════════
    // STEP LEVEL
    // ═══════════════════════════════════════════
    StepStarted {
        step: Arc<str>,
        index: usize,
        continue_on_error: bool,
    },
    StepSucceeded {
        step: Arc<str>,
        index: usize,
        duration_ms: u64,
    },
    StepFailed {
        step: Arc<str>,
        index: usize,
        failure_kind: FailureKind,
        error: String,
        tolerated: bool,
        duration_ms: u64,
    },
    /// Never started because an earlier step halted the run
    StepSkipped {
        step: Arc<str>,
        index: usize,
    },
}

impl EventKind {
    pub fn step(&self) -> Option<&str> {
        match self {
            Self::StepStarted { step, .. }
            | Self::StepSucceeded { step, .. }
            | Self::StepFailed { step, .. }
            | Self::StepSkipped { step, .. } => Some(step),
            Self::RunStarted { .. } | Self::RunHalted { .. } | Self::RunCompleted { .. } => None,
        }
    }

    pub fn is_run_event(&self) -> bool {
        self.step().is_none()
    }

    /// (step index, duration) for terminal step events
    pub fn step_duration(&self) -> Option<(usize, u64)> {
        match self {
            Self::StepSucceeded {
                index, duration_ms, ..
            }
            | Self::StepFailed {
                index, duration_ms, ..
            } => Some((*index, *duration_ms)),
            _ => None,
        }
    }
}

/// Thread-safe, append-only event log
#[derive(Clone)]
pub struct EventLog {
    events: Arc<RwLock<Vec<Event>>>,
    start_time: Instant,
    next_id: Arc<AtomicU64>,
}

impl EventLog {
    /// Create a new event log (call at run start)
    pub fn new() -> Self {
        Self {
            events: Arc::new(RwLock::new(Vec::new())),
            start_time: Instant::now(),
            next_id: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Emit an event, returns its ID
    pub fn emit(&self, kind: EventKind) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let event = Event {
            id,
            timestamp_ms: self.start_time.elapsed().as_millis() as u64,
            kind,
        };

        self.events.write().push(event);
        id
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.read().clone()
    }

    pub fn filter_step(&self, step: &str) -> Vec<Event> {
        self.events()
            .into_iter()
            .filter(|e| e.kind.step() == Some(step))
            .collect()
    }

    pub fn run_events(&self) -> Vec<Event> {
        self.events()
            .into_iter()
            .filter(|e| e.kind.is_run_event())
            .collect()
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self.events()).unwrap_or(Value::Null)
    }

    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLog")
            .field("len", &self.len())
            .finish()
    }
}

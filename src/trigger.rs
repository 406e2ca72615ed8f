//! Trigger events and branch filters
//!
//! The filter is a precondition: it decides whether a Run gets built at all.
//! It is evaluated before the runner is involved.

use std::fmt;
use std::str::FromStr;

use glob::{MatchOptions, Pattern};
use serde::Deserialize;

use crate::error::{Result, StepwiseError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Push,
    PullRequest,
}

impl FromStr for EventType {
    type Err = StepwiseError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "push" => Ok(EventType::Push),
            "pull_request" | "pull-request" => Ok(EventType::PullRequest),
            other => Err(StepwiseError::UnknownEventType {
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventType::Push => write!(f, "push"),
            EventType::PullRequest => write!(f, "pull_request"),
        }
    }
}

/// Event descriptor handed over by the hosting platform
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerEvent {
    pub event_type: EventType,
    pub branch: String,
}

impl TriggerEvent {
    pub fn new(event_type: EventType, branch: impl Into<String>) -> Self {
        Self {
            event_type,
            branch: branch.into(),
        }
    }

    /// Variables exposed to every step of a triggered run
    pub fn env_vars(&self) -> [(&'static str, String); 2] {
        [
            ("STEPWISE_EVENT", self.event_type.to_string()),
            ("STEPWISE_BRANCH", self.branch.clone()),
        ]
    }
}

/// Branch allow/deny list for one event type
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BranchFilter {
    #[serde(default)]
    pub branches: Vec<String>,
    #[serde(default, alias = "branches-ignore")]
    pub branches_ignore: Vec<String>,
}

impl BranchFilter {
    pub fn matches(&self, branch: &str) -> bool {
        if any_match(&self.branches_ignore, branch) {
            return false;
        }
        self.branches.is_empty() || any_match(&self.branches, branch)
    }

    fn patterns(&self) -> impl Iterator<Item = &String> {
        self.branches.iter().chain(self.branches_ignore.iter())
    }
}

/// The `on:` block of a pipeline file
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TriggerFilter {
    #[serde(default)]
    pub push: Option<BranchFilter>,
    #[serde(default, alias = "pull-request")]
    pub pull_request: Option<BranchFilter>,
}

impl TriggerFilter {
    /// Event types without an entry are not accepted
    pub fn accepts(&self, event: &TriggerEvent) -> bool {
        let filter = match event.event_type {
            EventType::Push => self.push.as_ref(),
            EventType::PullRequest => self.pull_request.as_ref(),
        };
        filter.is_some_and(|f| f.matches(&event.branch))
    }

    /// Reject patterns glob cannot compile
    pub fn validate(&self) -> Result<()> {
        for pattern in self
            .push
            .iter()
            .chain(self.pull_request.iter())
            .flat_map(BranchFilter::patterns)
        {
            Pattern::new(pattern).map_err(|e| StepwiseError::InvalidBranchPattern {
                pattern: pattern.clone(),
                details: e.msg.to_string(),
            })?;
        }
        Ok(())
    }
}

/// `*` and `?` stay within one `/`-separated segment, `**` crosses them
const BRANCH_MATCH: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

fn any_match(patterns: &[String], branch: &str) -> bool {
    patterns.iter().any(|p| match Pattern::new(p) {
        Ok(pattern) => pattern.matches_with(branch, BRANCH_MATCH),
        Err(_) => p == branch,
    })
}

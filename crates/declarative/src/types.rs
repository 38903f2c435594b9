//! Core types for convergence runs

use std::fmt;
use std::time::Duration;

use protocol::Outcome;

/// Result of converging one resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyResult {
    /// Already in the desired state
    NoChange,
    /// State was changed (or would have been, in rehearsal)
    Changed,
    /// The resource could not be converged
    Failed { error: String },
}

impl ApplyResult {
    pub fn failed(error: impl Into<String>) -> Self {
        Self::Failed {
            error: error.into(),
        }
    }

    /// Check if the result represents success (no failure)
    pub fn is_success(&self) -> bool {
        !matches!(self, Self::Failed { .. })
    }

    /// Check if the result represents a change
    pub fn is_change(&self) -> bool {
        matches!(self, Self::Changed)
    }

    /// Take a dispatcher response's result as authoritative
    pub fn from_outcome(outcome: Outcome, error: &str) -> Self {
        match outcome {
            Outcome::Ok => Self::Changed,
            Outcome::Noop => Self::NoChange,
            Outcome::Error => Self::failed(error),
        }
    }
}

/// The fixed convergence phases, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    Rehearsal,
    Install,
    Remove,
    Copy,
    Delete,
    Restart,
}

impl Phase {
    pub const ALL: [Self; 6] = [
        Self::Rehearsal,
        Self::Install,
        Self::Remove,
        Self::Copy,
        Self::Delete,
        Self::Restart,
    ];
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Rehearsal => "rehearsal",
            Self::Install => "package installs",
            Self::Remove => "package removals",
            Self::Copy => "file copies",
            Self::Delete => "file deletions",
            Self::Restart => "service restarts",
        };
        f.write_str(name)
    }
}

/// Summary of one host's run
#[derive(Debug, Clone, Default)]
pub struct ExecuteSummary {
    pub changed: usize,
    pub no_change: usize,
    pub failed: usize,
    /// Services restarted (or that would have been, in rehearsal)
    pub restarted: Vec<String>,
    pub elapsed: Duration,
}

impl ExecuteSummary {
    /// Number of resource-level errors
    pub fn errors(&self) -> usize {
        self.failed
    }

    /// Check if execution was fully successful (no failures)
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }

    /// Total number of resources processed
    pub fn total(&self) -> usize {
        self.changed + self.no_change + self.failed
    }

    /// Add a result to the summary
    pub fn add_result(&mut self, result: &ApplyResult) {
        match result {
            ApplyResult::NoChange => self.no_change += 1,
            ApplyResult::Changed => self.changed += 1,
            ApplyResult::Failed { .. } => self.failed += 1,
        }
    }
}

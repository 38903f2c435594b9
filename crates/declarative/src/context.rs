//! Collaborator traits
//!
//! These traits allow the executor to run without depending on a specific
//! transport or UI: the binary plugs in an SSH session and console output,
//! tests plug in an in-process dispatcher and a recorder.

use anyhow::Result;
use protocol::{Command, Response};

use crate::types::{ApplyResult, Phase};

/// A request/response channel to one host's dispatcher.
///
/// Errors returned here are not resource failures: they mean the channel
/// can no longer be trusted, and abort the run for this host.
pub trait CommandChannel {
    /// Send one command and block until its response arrives.
    fn execute(&mut self, command: &Command) -> Result<Response>;

    /// Upload raw bytes to `remote_path`, outside the framed exchange.
    fn put_data(&mut self, data: &[u8], remote_path: &str) -> Result<()>;

    /// A fresh, unused path in the session's working directory for staged content.
    fn staging_path(&mut self) -> String;
}

/// Progress callback for execution operations
///
/// Implement this trait to receive progress updates during execution.
pub trait ProgressCallback {
    /// Called when a phase with at least one item begins
    fn on_phase_start(&mut self, phase: Phase, count: usize);

    /// Called when starting to converge a single resource
    fn on_resource_start(&mut self, id: &str, description: &str);

    /// Called when a resource completes
    fn on_resource_complete(&mut self, id: &str, result: &ApplyResult);

    /// Called when a phase completes
    fn on_phase_complete(&mut self, phase: Phase);
}

/// No-op progress callback
pub struct NoProgress;

impl ProgressCallback for NoProgress {
    fn on_phase_start(&mut self, _phase: Phase, _count: usize) {}
    fn on_resource_start(&mut self, _id: &str, _description: &str) {}
    fn on_resource_complete(&mut self, _id: &str, _result: &ApplyResult) {}
    fn on_phase_complete(&mut self, _phase: Phase) {}
}

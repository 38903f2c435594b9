//! # agent
//!
//! The dispatcher stagehand launches on each target host. It reads framed
//! commands from stdin, executes them idempotently through the host's
//! package manager, service manager and filesystem, and writes one framed
//! response per command to stdout.
//!
//! Stdout carries the protocol only. Tool output goes to [`PACKAGE_LOG`] and
//! a fatal error is appended to [`ERROR_LOG`] in the working directory, where
//! the orchestrator looks for it when the pipe closes early.

pub mod backend;
pub mod dispatcher;
pub mod error;
pub mod handlers;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod state;

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::Path;

pub use backend::Backends;
pub use error::{Error, Result};
pub use state::DispatcherState;

/// Diagnostic file written when the dispatcher dies.
pub const ERROR_LOG: &str = "error.txt";

/// Accumulated package-manager output.
pub const PACKAGE_LOG: &str = "dpkg.log";

/// Serve the protocol over stdin/stdout against the real host.
///
/// `workdir` is the dispatcher's remote working directory.
pub fn serve(workdir: &Path) -> Result<()> {
    let host = Backends::system(workdir);
    let mut state = DispatcherState::new();

    let result = {
        let mut stdin = io::stdin().lock();
        let mut stdout = io::stdout().lock();
        dispatcher::run(&mut stdin, &mut stdout, &host, &mut state)
    };

    if let Err(e) = &result {
        record_fatal(workdir, e);
    }
    result
}

fn record_fatal(workdir: &Path, error: &Error) {
    let path = workdir.join(ERROR_LOG);
    let written = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .and_then(|mut file| writeln!(file, "{error}"));
    if let Err(e) = written {
        log::error!("could not write {}: {}", path.display(), e);
    }
}

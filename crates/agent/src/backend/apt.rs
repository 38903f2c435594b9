//! Debian/Ubuntu package backend using `apt-get` and `dpkg-query`.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Output};

use super::{PackageManager, PackageStatus};
use crate::error::{Error, Result};

/// Exit status `apt-cache show` uses for unknown packages.
const APT_NOT_FOUND: i32 = 100;

/// Backend that executes real apt commands.
pub struct Apt {
    /// Tool output is appended here instead of polluting the protocol pipe
    log_path: PathBuf,
}

impl Apt {
    pub fn new(log_path: PathBuf) -> Self {
        Self { log_path }
    }

    /// Run a tool non-interactively, appending its output to the log.
    fn run(&self, program: &str, args: &[&str]) -> Result<Output> {
        log::debug!("running {} {}", program, args.join(" "));
        let output = Command::new(program)
            .args(args)
            .env("DEBIAN_FRONTEND", "noninteractive")
            .output()
            .map_err(|e| Error::CommandFailed {
                message: format!("failed to execute {program}"),
                stderr: e.to_string(),
            })?;

        if let Err(e) = self.append_log(program, args, &output) {
            log::warn!("could not write {}: {}", self.log_path.display(), e);
        }
        Ok(output)
    }

    /// Run a tool and turn a non-zero exit into an error.
    fn run_checked(&self, program: &str, args: &[&str], what: &str) -> Result<()> {
        let output = self.run(program, args)?;
        if output.status.success() {
            return Ok(());
        }
        Err(Error::CommandFailed {
            message: what.to_string(),
            stderr: last_line(&output.stderr),
        })
    }

    fn append_log(&self, program: &str, args: &[&str], output: &Output) -> std::io::Result<()> {
        let mut log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)?;
        writeln!(log, "$ {} {}", program, args.join(" "))?;
        log.write_all(&output.stdout)?;
        log.write_all(&output.stderr)?;
        Ok(())
    }
}

impl PackageManager for Apt {
    fn refresh_index(&self) -> Result<()> {
        self.run_checked("apt-get", &["update", "-q"], "apt-get update failed")
    }

    fn status(&self, package: &str) -> Result<PackageStatus> {
        let output = self.run("dpkg-query", &["-W", "-f=${Status}", package])?;
        if output.status.success() && is_installed_status(&String::from_utf8_lossy(&output.stdout))
        {
            return Ok(PackageStatus::Installed);
        }

        let output = self.run("apt-cache", &["show", "-q", package])?;
        match output.status.code() {
            Some(0) => Ok(PackageStatus::NotInstalled),
            Some(APT_NOT_FOUND) => Ok(PackageStatus::Unknown),
            _ if output.stdout.is_empty() => Ok(PackageStatus::Unknown),
            _ => Err(Error::CommandFailed {
                message: format!("apt-cache show {package} failed"),
                stderr: last_line(&output.stderr),
            }),
        }
    }

    fn install(&self, package: &str) -> Result<()> {
        self.run_checked(
            "apt-get",
            &["install", "-y", "-q", package],
            &format!("apt-get install {package} failed"),
        )
    }

    fn remove(&self, package: &str) -> Result<()> {
        self.run_checked(
            "apt-get",
            &["remove", "-y", "-q", package],
            &format!("apt-get remove {package} failed"),
        )
    }
}

/// `dpkg-query` prints e.g. `install ok installed` or `deinstall ok config-files`.
fn is_installed_status(status: &str) -> bool {
    status.split_whitespace().last() == Some("installed")
}

fn last_line(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes)
        .lines()
        .rev()
        .find(|l| !l.trim().is_empty())
        .unwrap_or_default()
        .trim()
        .to_string()
}

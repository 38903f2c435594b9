//! systemd service backend.

use std::process::Command;

use super::ServiceManager;
use crate::error::{Error, Result};

/// Restarts units through `systemctl`.
pub struct Systemd {
    systemctl: String,
}

impl Systemd {
    pub fn new() -> Self {
        Self {
            systemctl: "systemctl".to_string(),
        }
    }
}

impl Default for Systemd {
    fn default() -> Self {
        Self::new()
    }
}

/// `nginx` -> `nginx.service`; names that already carry a unit suffix pass through.
pub fn unit_name(service: &str) -> String {
    if service.contains('.') {
        service.to_string()
    } else {
        format!("{service}.service")
    }
}

impl ServiceManager for Systemd {
    fn restart(&self, service: &str) -> Result<()> {
        let unit = unit_name(service);
        log::debug!("restarting {unit}");
        let output = Command::new(&self.systemctl)
            .args(["restart", &unit])
            .output()
            .map_err(|e| Error::CommandFailed {
                message: format!("failed to execute {}", self.systemctl),
                stderr: e.to_string(),
            })?;

        if output.status.success() {
            Ok(())
        } else {
            Err(Error::CommandFailed {
                message: format!("restart of {unit} failed"),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_name() {
        assert_eq!(unit_name("nginx"), "nginx.service");
        assert_eq!(unit_name("apt-daily.timer"), "apt-daily.timer");
    }
}

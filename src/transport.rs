//! Remote process plumbing over the OpenSSH client
//!
//! The session only needs three primitives from a host: spawn a process with
//! piped stdin/stdout, run a one-shot shell command, and upload bytes.

use std::io::{Read, Write};
use std::process::{Child, Command, Output, Stdio};

use crate::config::SshConfig;
use crate::location::Location;
use crate::session::SessionError;

/// Exit status ssh uses for its own failures
const SSH_FAILURE: i32 = 255;

/// Exit status sshpass uses for a rejected password
const SSHPASS_BAD_PASSWORD: i32 = 5;

/// Captured result of a one-shot remote command
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub status: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).trim().to_string()
    }
}

impl From<Output> for CommandOutput {
    fn from(output: Output) -> Self {
        Self {
            status: output.status.code(),
            stdout: output.stdout,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        }
    }
}

/// A spawned remote process. Dropping `stdin` closes the remote end.
pub struct RemoteProcess {
    pub stdin: Box<dyn Write + Send>,
    pub stdout: Box<dyn Read + Send>,
    /// Local client process, when there is one
    pub child: Option<Child>,
}

/// Access to one host
pub trait Transport {
    /// Start `command` with stdin and stdout piped to the caller.
    fn spawn(&mut self, command: &str) -> Result<RemoteProcess, SessionError>;

    /// Run `command` to completion, capturing its output.
    fn exec(&mut self, command: &str) -> Result<CommandOutput, SessionError>;

    /// Write `data` to `remote_path`, replacing it, and confirm every byte landed.
    fn upload(&mut self, data: &[u8], remote_path: &str) -> Result<(), SessionError>;
}

/// Quote a string for a POSIX shell.
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Transport that shells out to `ssh`, through `sshpass` when a password
/// is supplied.
pub struct SshTransport {
    location: Location,
    ssh: SshConfig,
    password: Option<String>,
}

impl SshTransport {
    pub fn new(location: Location, ssh: SshConfig, password: Option<String>) -> Self {
        Self {
            location,
            ssh,
            password,
        }
    }

    /// Arguments passed to ssh ahead of the remote command
    fn ssh_args(&self) -> Vec<String> {
        let mut args = vec!["-T".to_string(), "-p".to_string(), self.location.port.to_string()];

        if self.password.is_some() {
            args.extend(["-o".to_string(), "NumberOfPasswordPrompts=1".to_string()]);
        } else {
            args.extend(["-o".to_string(), "BatchMode=yes".to_string()]);
        }

        if let Some(identity) = self.ssh.identity_path() {
            args.push("-i".to_string());
            args.push(identity.to_string_lossy().into_owned());
        }

        for option in &self.ssh.options {
            args.push("-o".to_string());
            args.push(option.clone());
        }

        args.push(self.location.destination());
        args
    }

    fn command(&self, remote: &str) -> Command {
        let mut cmd = match &self.password {
            Some(password) => {
                let mut cmd = Command::new(&self.ssh.sshpass_program);
                cmd.arg("-e").arg(&self.ssh.program).env("SSHPASS", password);
                cmd
            }
            None => Command::new(&self.ssh.program),
        };
        cmd.args(self.ssh_args()).arg(remote);
        cmd
    }

    fn is_auth_failure(&self, output: &CommandOutput) -> bool {
        auth_failed(output, self.password.is_some())
    }

    fn transport_error(&self, what: &str, e: &std::io::Error) -> SessionError {
        let program = if self.password.is_some() {
            &self.ssh.sshpass_program
        } else {
            &self.ssh.program
        };
        SessionError::Transport(format!("{what} on {}: {program}: {e}", self.location))
    }
}

/// Whether a failed ssh invocation was rejected at authentication.
fn auth_failed(output: &CommandOutput, via_sshpass: bool) -> bool {
    match output.status {
        Some(SSH_FAILURE) => output.stderr.contains("Permission denied"),
        Some(SSHPASS_BAD_PASSWORD) => via_sshpass,
        _ => false,
    }
}

impl Transport for SshTransport {
    fn spawn(&mut self, command: &str) -> Result<RemoteProcess, SessionError> {
        log::debug!("SSH spawn '{}' on {}", command, self.location);
        let mut child = self
            .command(command)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| self.transport_error("could not spawn", &e))?;

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            let _ = child.kill();
            return Err(SessionError::Transport(format!(
                "no pipes to the remote process on {}",
                self.location
            )));
        };

        Ok(RemoteProcess {
            stdin: Box::new(stdin),
            stdout: Box::new(stdout),
            child: Some(child),
        })
    }

    fn exec(&mut self, command: &str) -> Result<CommandOutput, SessionError> {
        log::debug!("SSH cmd '{}' on {}", command, self.location);
        let output: CommandOutput = self
            .command(command)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| self.transport_error("could not run command", &e))?
            .into();

        if self.is_auth_failure(&output) {
            return Err(SessionError::Auth(self.location.to_string()));
        }
        if output.status == Some(SSH_FAILURE) {
            return Err(SessionError::Transport(format!(
                "ssh to {} failed: {}",
                self.location, output.stderr
            )));
        }
        Ok(output)
    }

    fn upload(&mut self, data: &[u8], remote_path: &str) -> Result<(), SessionError> {
        log::debug!("upload {} bytes to '{}'", data.len(), remote_path);
        let path = shell_quote(remote_path);
        let mut child = self
            .command(&format!("cat > {path} && wc -c < {path}"))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| self.transport_error("could not start upload", &e))?;

        let written = match child.stdin.take() {
            Some(mut stdin) => stdin.write_all(data),
            None => Ok(()),
        };
        let output: CommandOutput = child
            .wait_with_output()
            .map_err(|e| self.transport_error("upload failed", &e))?
            .into();

        if self.is_auth_failure(&output) {
            return Err(SessionError::Auth(self.location.to_string()));
        }
        if let Err(e) = written {
            return Err(self.transport_error("upload interrupted", &e));
        }
        if !output.success() {
            return Err(SessionError::Transport(format!(
                "upload to '{remote_path}' failed: {}",
                output.stderr
            )));
        }
        confirm_upload(&output, data.len(), remote_path)
    }
}

/// Check the byte count reported by `wc -c` against what was sent.
fn confirm_upload(
    output: &CommandOutput,
    expected: usize,
    remote_path: &str,
) -> Result<(), SessionError> {
    let landed = output.stdout_text().parse::<usize>().map_err(|_| {
        SessionError::Transport(format!(
            "upload to '{remote_path}' returned no byte count: {:?}",
            output.stdout_text()
        ))
    })?;
    if landed != expected {
        return Err(SessionError::Transport(format!(
            "upload to '{remote_path}' incomplete: {landed} of {expected} bytes"
        )));
    }
    Ok(())
}

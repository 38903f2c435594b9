//! Resource trait and the resources a scenario is made of
//!
//! A Resource is one unit of convergence: it talks to the dispatcher through
//! a [`CommandChannel`] and reports what happened as an [`ApplyResult`].

use std::fmt;

use anyhow::Result;
use protocol::{Command, FileProps, Outcome, Response, mode_matches};

use crate::context::CommandChannel;
use crate::scenario::{FileAction, FileContent, FileSpec, PackageAction, PackageSpec};
use crate::types::ApplyResult;

/// Core trait for convergible resources
pub trait Resource: fmt::Debug {
    /// Identifier shown next to results, e.g. the package name or file path
    fn id(&self) -> String;

    /// Human-readable description of what converging this resource does
    fn description(&self) -> String;

    /// Resource type category: "package", "file" or "service"
    fn resource_type(&self) -> &'static str;

    /// Services to restart when this resource changes
    fn restarts(&self) -> &[String] {
        &[]
    }

    /// Converge the resource.
    ///
    /// Resource-level failures are returned as [`ApplyResult::Failed`]; an
    /// `Err` means the channel failed and the host run must stop.
    fn apply(&self, channel: &mut dyn CommandChannel) -> Result<ApplyResult>;
}

/// A boxed resource for type-erased storage
pub type BoxedResource = Box<dyn Resource>;

/// Send a command and make sure the response is its answer.
pub fn send(channel: &mut dyn CommandChannel, command: &Command) -> Result<Response> {
    let response = channel.execute(command)?;
    Ok(response.expect_answer_to(command)?)
}

impl Resource for PackageSpec {
    fn id(&self) -> String {
        self.name.clone()
    }

    fn description(&self) -> String {
        match self.action {
            PackageAction::Install => format!("installing package '{}'", self.name),
            PackageAction::Remove => format!("removing package '{}'", self.name),
        }
    }

    fn resource_type(&self) -> &'static str {
        "package"
    }

    fn restarts(&self) -> &[String] {
        &self.restarts
    }

    fn apply(&self, channel: &mut dyn CommandChannel) -> Result<ApplyResult> {
        let package = self.name.clone();
        let command = match self.action {
            PackageAction::Install => Command::PackageInstall { package },
            PackageAction::Remove => Command::PackageRemove { package },
        };
        let response = send(channel, &command)?;
        Ok(ApplyResult::from_outcome(response.outcome(), response.error()))
    }
}

impl Resource for FileSpec {
    fn id(&self) -> String {
        self.path.clone()
    }

    fn description(&self) -> String {
        match self.action {
            FileAction::Copy(_) => format!("copying file '{}'", self.path),
            FileAction::Delete => format!("deleting file '{}'", self.path),
        }
    }

    fn resource_type(&self) -> &'static str {
        "file"
    }

    fn restarts(&self) -> &[String] {
        &self.restarts
    }

    fn apply(&self, channel: &mut dyn CommandChannel) -> Result<ApplyResult> {
        match &self.action {
            FileAction::Copy(desired) => converge_copy(channel, &self.path, desired),
            FileAction::Delete => {
                let command = Command::FileDelete {
                    path: self.path.clone(),
                };
                let response = send(channel, &command)?;
                Ok(ApplyResult::from_outcome(response.outcome(), response.error()))
            }
        }
    }
}

/// A deferred service restart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceRestart {
    pub service: String,
}

impl Resource for ServiceRestart {
    fn id(&self) -> String {
        self.service.clone()
    }

    fn description(&self) -> String {
        format!("restarting service '{}'", self.service)
    }

    fn resource_type(&self) -> &'static str {
        "service"
    }

    fn apply(&self, channel: &mut dyn CommandChannel) -> Result<ApplyResult> {
        let command = Command::ServiceRestart {
            service: self.service.clone(),
        };
        let response = send(channel, &command)?;
        Ok(ApplyResult::from_outcome(response.outcome(), response.error()))
    }
}

/// Current properties of `path`, or the failure to report for the resource.
fn file_props(channel: &mut dyn CommandChannel, path: &str) -> Result<Result<FileProps, String>> {
    let command = Command::FileGetProps {
        path: path.to_string(),
    };
    let response = send(channel, &command)?;
    if response.outcome() == Outcome::Error {
        return Ok(Err(response.error().to_string()));
    }
    Ok(response
        .file_props()
        .ok_or_else(|| format!("no properties returned for '{path}'")))
}

fn metadata_matches(desired: &FileContent, props: &FileProps) -> bool {
    !props.is_absent()
        && props.user == desired.user
        && props.group == desired.group
        && mode_matches(desired.mode, props.mode)
}

/// Check, act, verify: content first, then ownership and mode.
fn converge_copy(
    channel: &mut dyn CommandChannel,
    path: &str,
    desired: &FileContent,
) -> Result<ApplyResult> {
    let mut current = match file_props(channel, path)? {
        Ok(props) => props,
        Err(error) => return Ok(ApplyResult::Failed { error }),
    };

    let content_matches = current.hash == desired.fingerprint();
    if content_matches && metadata_matches(desired, &current) {
        return Ok(ApplyResult::NoChange);
    }

    if !content_matches {
        let staged = channel.staging_path();
        channel.put_data(desired.content(), &staged)?;

        let put = send(
            channel,
            &Command::FilePut {
                path: path.to_string(),
                source: staged,
            },
        )?;
        if put.outcome() == Outcome::Error {
            return Ok(ApplyResult::failed(put.error()));
        }

        current = match file_props(channel, path)? {
            Ok(props) => props,
            Err(error) => return Ok(ApplyResult::Failed { error }),
        };
        if current.hash != desired.fingerprint() {
            return Ok(ApplyResult::failed(format!(
                "content of '{path}' does not match after transfer"
            )));
        }
    }

    if !metadata_matches(desired, &current) {
        let set = send(
            channel,
            &Command::FileSetProps {
                path: path.to_string(),
                user: desired.user.clone(),
                group: desired.group.clone(),
                mode: desired.mode,
            },
        )?;
        match set.outcome() {
            Outcome::Ok => {}
            Outcome::Error => return Ok(ApplyResult::failed(set.error())),
            Outcome::Noop => {
                return Ok(ApplyResult::failed(format!(
                    "properties of '{path}' reported unchanged but differ"
                )));
            }
        }

        current = match file_props(channel, path)? {
            Ok(props) => props,
            Err(error) => return Ok(ApplyResult::Failed { error }),
        };
        if !metadata_matches(desired, &current) {
            return Ok(ApplyResult::failed(format!(
                "ownership or mode of '{path}' do not match after update"
            )));
        }
    }

    Ok(ApplyResult::Changed)
}

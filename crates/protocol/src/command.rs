//! The command catalog.
//!
//! Every message is a flat JSON object whose `name` field selects the shape.
//! Requests and responses are closed enums, so an unknown `name` fails to
//! decode instead of being silently ignored.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A request sent to the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "kebab-case")]
pub enum Command {
    /// Switch the dispatcher into rehearsal (dry-run) mode for the rest of its life
    RehearsalStart,
    /// Ensure a package is installed
    PackageInstall { package: String },
    /// Ensure a package is absent
    PackageRemove { package: String },
    /// Read fingerprint, ownership and mode of a file
    FileGetProps { path: String },
    /// Ensure ownership and permission bits of an existing file
    FileSetProps {
        path: String,
        user: String,
        group: String,
        mode: u32,
    },
    /// Copy previously uploaded content from `source` onto `path`
    FilePut { path: String, source: String },
    /// Ensure a file is absent
    FileDelete { path: String },
    /// Restart a service
    ServiceRestart { service: String },
}

impl Command {
    /// Wire name of this command.
    pub fn name(&self) -> &'static str {
        match self {
            Self::RehearsalStart => "rehearsal-start",
            Self::PackageInstall { .. } => "package-install",
            Self::PackageRemove { .. } => "package-remove",
            Self::FileGetProps { .. } => "file-get-props",
            Self::FileSetProps { .. } => "file-set-props",
            Self::FilePut { .. } => "file-put",
            Self::FileDelete { .. } => "file-delete",
            Self::ServiceRestart { .. } => "service-restart",
        }
    }

    /// Whether the command changes host state outside rehearsal.
    pub fn is_mutating(&self) -> bool {
        !matches!(self, Self::RehearsalStart | Self::FileGetProps { .. })
    }

    /// Encode as a wire payload.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode a wire payload.
    pub fn from_json(payload: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(payload)?)
    }
}

/// Outcome of a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    /// State was changed (or would have been, in rehearsal)
    Ok,
    /// State already matched; nothing done
    Noop,
    /// The operation failed
    Error,
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ok => write!(f, "ok"),
            Self::Noop => write!(f, "noop"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Outcome plus error text, as returned by every handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    pub result: Outcome,
    pub error: String,
}

impl Status {
    pub fn ok() -> Self {
        Self {
            result: Outcome::Ok,
            error: String::new(),
        }
    }

    pub fn noop() -> Self {
        Self {
            result: Outcome::Noop,
            error: String::new(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            result: Outcome::Error,
            error: message.into(),
        }
    }

    /// `ok` when `changed`, otherwise `noop`.
    pub fn changed(changed: bool) -> Self {
        if changed { Self::ok() } else { Self::noop() }
    }
}

/// Observed properties of a remote file.
///
/// An absent file has an empty hash, user and group and a zero mode.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileProps {
    pub hash: String,
    pub user: String,
    pub group: String,
    pub mode: u32,
}

impl FileProps {
    pub fn absent() -> Self {
        Self::default()
    }

    pub fn is_absent(&self) -> bool {
        self.hash.is_empty() && self.mode == 0
    }
}

/// A reply from the dispatcher, one variant per [`Command`] variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "name")]
pub enum Response {
    #[serde(rename = "rehearsal-start-response")]
    RehearsalStart {
        result: Outcome,
        #[serde(default)]
        error: String,
    },
    #[serde(rename = "package-install-response")]
    PackageInstall {
        package: String,
        result: Outcome,
        #[serde(default)]
        error: String,
    },
    #[serde(rename = "package-remove-response")]
    PackageRemove {
        package: String,
        result: Outcome,
        #[serde(default)]
        error: String,
    },
    #[serde(rename = "file-get-props-response")]
    FileGetProps {
        path: String,
        result: Outcome,
        #[serde(default)]
        error: String,
        hash: String,
        user: String,
        group: String,
        mode: u32,
    },
    #[serde(rename = "file-set-props-response")]
    FileSetProps {
        path: String,
        result: Outcome,
        #[serde(default)]
        error: String,
    },
    #[serde(rename = "file-put-response")]
    FilePut {
        path: String,
        result: Outcome,
        #[serde(default)]
        error: String,
    },
    #[serde(rename = "file-delete-response")]
    FileDelete {
        path: String,
        result: Outcome,
        #[serde(default)]
        error: String,
    },
    #[serde(rename = "service-restart-response")]
    ServiceRestart {
        service: String,
        result: Outcome,
        #[serde(default)]
        error: String,
    },
}

impl Response {
    /// Build the response matching `command`.
    ///
    /// `props` is only used for `file-get-props`.
    pub fn reply(command: &Command, status: Status, props: FileProps) -> Self {
        let Status { result, error } = status;
        match command {
            Command::RehearsalStart => Self::RehearsalStart { result, error },
            Command::PackageInstall { package } => Self::PackageInstall {
                package: package.clone(),
                result,
                error,
            },
            Command::PackageRemove { package } => Self::PackageRemove {
                package: package.clone(),
                result,
                error,
            },
            Command::FileGetProps { path } => Self::FileGetProps {
                path: path.clone(),
                result,
                error,
                hash: props.hash,
                user: props.user,
                group: props.group,
                mode: props.mode,
            },
            Command::FileSetProps { path, .. } => Self::FileSetProps {
                path: path.clone(),
                result,
                error,
            },
            Command::FilePut { path, .. } => Self::FilePut {
                path: path.clone(),
                result,
                error,
            },
            Command::FileDelete { path } => Self::FileDelete {
                path: path.clone(),
                result,
                error,
            },
            Command::ServiceRestart { service } => Self::ServiceRestart {
                service: service.clone(),
                result,
                error,
            },
        }
    }

    /// Wire name of this response.
    pub fn name(&self) -> &'static str {
        match self {
            Self::RehearsalStart { .. } => "rehearsal-start-response",
            Self::PackageInstall { .. } => "package-install-response",
            Self::PackageRemove { .. } => "package-remove-response",
            Self::FileGetProps { .. } => "file-get-props-response",
            Self::FileSetProps { .. } => "file-set-props-response",
            Self::FilePut { .. } => "file-put-response",
            Self::FileDelete { .. } => "file-delete-response",
            Self::ServiceRestart { .. } => "service-restart-response",
        }
    }

    pub fn outcome(&self) -> Outcome {
        match self {
            Self::RehearsalStart { result, .. }
            | Self::PackageInstall { result, .. }
            | Self::PackageRemove { result, .. }
            | Self::FileGetProps { result, .. }
            | Self::FileSetProps { result, .. }
            | Self::FilePut { result, .. }
            | Self::FileDelete { result, .. }
            | Self::ServiceRestart { result, .. } => *result,
        }
    }

    /// Error text; empty unless the outcome is [`Outcome::Error`].
    pub fn error(&self) -> &str {
        match self {
            Self::RehearsalStart { error, .. }
            | Self::PackageInstall { error, .. }
            | Self::PackageRemove { error, .. }
            | Self::FileGetProps { error, .. }
            | Self::FileSetProps { error, .. }
            | Self::FilePut { error, .. }
            | Self::FileDelete { error, .. }
            | Self::ServiceRestart { error, .. } => error,
        }
    }

    /// Whether this response is the reply shape for `command`.
    pub fn answers(&self, command: &Command) -> bool {
        self.name()
            .strip_suffix("-response")
            .is_some_and(|base| base == command.name())
    }

    /// Check that this response answers `command`, or report a desync.
    pub fn expect_answer_to(self, command: &Command) -> Result<Self> {
        if self.answers(command) {
            Ok(self)
        } else {
            Err(Error::UnexpectedResponse {
                sent: command.name().to_string(),
                got: self.name().to_string(),
            })
        }
    }

    /// File properties carried by a `file-get-props` response.
    pub fn file_props(&self) -> Option<FileProps> {
        match self {
            Self::FileGetProps {
                hash,
                user,
                group,
                mode,
                ..
            } => Some(FileProps {
                hash: hash.clone(),
                user: user.clone(),
                group: group.clone(),
                mode: *mode,
            }),
            _ => None,
        }
    }

    /// Encode as a wire payload.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode a wire payload.
    pub fn from_json(payload: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(payload)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_command_is_flat_with_name_tag() {
        let cmd = Command::FileSetProps {
            path: "/etc/motd".into(),
            user: "root".into(),
            group: "root".into(),
            mode: 0o644,
        };
        let value: serde_json::Value = serde_json::from_str(&cmd.to_json().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "name": "file-set-props",
                "path": "/etc/motd",
                "user": "root",
                "group": "root",
                "mode": 420,
            })
        );
    }

    #[test]
    fn test_unit_command_encoding() {
        let text = Command::RehearsalStart.to_json().unwrap();
        assert_eq!(text, r#"{"name":"rehearsal-start"}"#);
        assert_eq!(
            Command::from_json(text.as_bytes()).unwrap(),
            Command::RehearsalStart
        );
    }

    #[test]
    fn test_unknown_command_name_fails_to_decode() {
        let err = Command::from_json(br#"{"name":"package-upgrade","package":"nginx"}"#);
        assert!(matches!(err, Err(Error::Json(_))));
    }

    #[test]
    fn test_command_names_match_serde_tag() {
        let all = [
            Command::RehearsalStart,
            Command::PackageInstall { package: "a".into() },
            Command::PackageRemove { package: "a".into() },
            Command::FileGetProps { path: "/a".into() },
            Command::FileSetProps {
                path: "/a".into(),
                user: "u".into(),
                group: "g".into(),
                mode: 0o600,
            },
            Command::FilePut {
                path: "/a".into(),
                source: "/tmp/s".into(),
            },
            Command::FileDelete { path: "/a".into() },
            Command::ServiceRestart { service: "nginx".into() },
        ];

        for cmd in all {
            let value: serde_json::Value =
                serde_json::from_str(&cmd.to_json().unwrap()).unwrap();
            assert_eq!(value["name"], cmd.name());

            let reply = Response::reply(&cmd, Status::noop(), FileProps::absent());
            assert!(reply.answers(&cmd), "{} not answered", cmd.name());
            let value: serde_json::Value =
                serde_json::from_str(&reply.to_json().unwrap()).unwrap();
            assert_eq!(value["name"], reply.name());
            assert_eq!(value["result"], "noop");
        }
    }

    #[test]
    fn test_response_decodes_from_flat_mapping() {
        let resp = Response::from_json(
            br#"{"name":"file-get-props-response","path":"/etc/motd","result":"ok","error":"","hash":"abc","user":"root","group":"adm","mode":33188}"#,
        )
        .unwrap();

        assert_eq!(resp.outcome(), Outcome::Ok);
        assert_eq!(
            resp.file_props(),
            Some(FileProps {
                hash: "abc".into(),
                user: "root".into(),
                group: "adm".into(),
                mode: 0o100_644,
            })
        );
    }

    #[test]
    fn test_response_error_defaults_to_empty() {
        let resp =
            Response::from_json(br#"{"name":"service-restart-response","service":"nginx","result":"ok"}"#)
                .unwrap();
        assert_eq!(resp.error(), "");
    }

    #[test]
    fn test_mismatched_response_is_desync() {
        let cmd = Command::PackageInstall {
            package: "nginx".into(),
        };
        let resp = Response::reply(
            &Command::FileDelete {
                path: "/etc/x".into(),
            },
            Status::ok(),
            FileProps::absent(),
        );
        let err = resp.expect_answer_to(&cmd).unwrap_err();
        assert!(matches!(err, Error::UnexpectedResponse { .. }));
    }

    #[test]
    fn test_status_changed() {
        assert_eq!(Status::changed(true).result, Outcome::Ok);
        assert_eq!(Status::changed(false).result, Outcome::Noop);
        let err = Status::error("boom");
        assert_eq!(err.result, Outcome::Error);
        assert_eq!(err.error, "boom");
    }
}

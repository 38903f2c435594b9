//! Scenario documents: the desired state of a host.
//!
//! A scenario is YAML with two collections:
//!
//! ```yaml
//! packages:
//!   - name: nginx
//!     action: install
//!     restarts: [nginx]
//! files:
//!   - path: /etc/nginx/conf.d/site.conf
//!     action: copy
//!     user: root
//!     group: root
//!     mode: "644"
//!     content: |
//!       server { listen 80; }
//!     restarts: [nginx]
//!   - path: /etc/nginx/sites-enabled/default
//!     action: delete
//! ```
//!
//! A copied file takes its bytes from `content` or from `source`, a path
//! relative to the scenario file.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

/// Errors raised while loading a scenario.
#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("cannot read '{}': {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid scenario: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("{entry}: {reason}")]
    Invalid { entry: String, reason: String },
}

fn invalid(entry: impl Into<String>, reason: impl Into<String>) -> ScenarioError {
    ScenarioError::Invalid {
        entry: entry.into(),
        reason: reason.into(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageAction {
    Install,
    Remove,
}

/// A package that should be installed or removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageSpec {
    pub name: String,
    pub action: PackageAction,
    /// Services to restart if this package changes
    pub restarts: Vec<String>,
}

/// Desired content and metadata of a copied file.
///
/// The fingerprint is computed once on construction and never changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileContent {
    pub user: String,
    pub group: String,
    /// Mode bits within `0o7777`
    pub mode: u32,
    content: Vec<u8>,
    fingerprint: String,
}

impl FileContent {
    pub fn new(
        user: impl Into<String>,
        group: impl Into<String>,
        mode: u32,
        content: Vec<u8>,
    ) -> Self {
        let fingerprint = protocol::fingerprint(&content);
        Self {
            user: user.into(),
            group: group.into(),
            mode,
            content,
            fingerprint,
        }
    }

    pub fn content(&self) -> &[u8] {
        &self.content
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileAction {
    Copy(FileContent),
    Delete,
}

/// A file that should have given content and metadata, or not exist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSpec {
    pub path: String,
    pub action: FileAction,
    /// Services to restart if this file changes
    pub restarts: Vec<String>,
}

impl FileSpec {
    pub fn is_copy(&self) -> bool {
        matches!(self.action, FileAction::Copy(_))
    }
}

/// The loaded desired-state document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Scenario {
    pub packages: Vec<PackageSpec>,
    pub files: Vec<FileSpec>,
}

impl Scenario {
    /// Load a scenario file; `source` paths resolve against its directory.
    pub fn load(path: &Path) -> Result<Self, ScenarioError> {
        let text = fs::read_to_string(path).map_err(|source| ScenarioError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        Self::parse(&text, base)
    }

    /// Parse scenario text.
    pub fn parse(text: &str, base: &Path) -> Result<Self, ScenarioError> {
        let raw: RawScenario = serde_yaml::from_str(text)?;
        Ok(Self {
            packages: raw
                .packages
                .into_iter()
                .map(RawPackage::into_spec)
                .collect::<Result<_, _>>()?,
            files: raw
                .files
                .into_iter()
                .map(|f| f.into_spec(base))
                .collect::<Result<_, _>>()?,
        })
    }

    pub fn packages(&self, action: PackageAction) -> impl Iterator<Item = &PackageSpec> {
        self.packages.iter().filter(move |p| p.action == action)
    }

    pub fn copies(&self) -> impl Iterator<Item = &FileSpec> {
        self.files.iter().filter(|f| f.is_copy())
    }

    pub fn deletions(&self) -> impl Iterator<Item = &FileSpec> {
        self.files.iter().filter(|f| !f.is_copy())
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawScenario {
    #[serde(default)]
    packages: Vec<RawPackage>,
    #[serde(default)]
    files: Vec<RawFile>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawPackage {
    name: String,
    action: PackageAction,
    #[serde(default)]
    restarts: Vec<String>,
}

impl RawPackage {
    fn into_spec(self) -> Result<PackageSpec, ScenarioError> {
        if self.name.trim().is_empty() {
            return Err(invalid("package", "name must not be empty"));
        }
        Ok(PackageSpec {
            name: self.name,
            action: self.action,
            restarts: unique(self.restarts),
        })
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "lowercase")]
enum RawFileAction {
    Copy,
    Delete,
}

/// Octal text such as `"644"`. YAML reads both `644` and `0o644` as plain
/// integers, so numbers are accepted only to be rejected with a hint.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawMode {
    Number(u64),
    Text(String),
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawFile {
    path: String,
    action: RawFileAction,
    user: Option<String>,
    group: Option<String>,
    mode: Option<RawMode>,
    content: Option<String>,
    source: Option<PathBuf>,
    #[serde(default)]
    restarts: Vec<String>,
}

impl RawFile {
    fn into_spec(self, base: &Path) -> Result<FileSpec, ScenarioError> {
        if !self.path.starts_with('/') {
            return Err(invalid(&self.path, "path must be absolute"));
        }

        let action = match self.action {
            RawFileAction::Delete => FileAction::Delete,
            RawFileAction::Copy => {
                let entry = self.path.as_str();
                let user = self.user.ok_or_else(|| invalid(entry, "copy requires 'user'"))?;
                let group = self.group.ok_or_else(|| invalid(entry, "copy requires 'group'"))?;
                let mode = match self.mode {
                    None => return Err(invalid(entry, "copy requires 'mode'")),
                    Some(raw) => normalize_mode(raw).map_err(|reason| invalid(entry, reason))?,
                };
                let content = match (self.content, self.source) {
                    (Some(text), None) => text.into_bytes(),
                    (None, Some(source)) => {
                        let path = base.join(source);
                        fs::read(&path).map_err(|source| ScenarioError::Read { path, source })?
                    }
                    (Some(_), Some(_)) => {
                        return Err(invalid(
                            entry,
                            "give either 'content' or 'source', not both",
                        ));
                    }
                    (None, None) => {
                        return Err(invalid(entry, "copy requires 'content' or 'source'"));
                    }
                };
                FileAction::Copy(FileContent::new(user, group, mode, content))
            }
        };

        Ok(FileSpec {
            path: self.path,
            action,
            restarts: unique(self.restarts),
        })
    }
}

fn normalize_mode(raw: RawMode) -> Result<u32, &'static str> {
    match raw {
        RawMode::Number(_) => Err("mode must be quoted octal text, e.g. mode: \"0644\""),
        RawMode::Text(text) => {
            protocol::parse_mode(&text).ok_or("mode must be octal permission bits up to 7777")
        }
    }
}

/// Drop repeated names, keeping first-seen order.
fn unique(names: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(names.len());
    for name in names {
        if !out.contains(&name) {
            out.push(name);
        }
    }
    out
}

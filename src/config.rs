//! `config.toml`: SSH client and session settings

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::paths;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub ssh: SshConfig,
    pub session: SessionConfig,
}

/// How the SSH client authenticates
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMethod {
    /// Keys or agent, never prompting
    #[default]
    Key,
    /// Password prompted locally and passed through sshpass
    Password,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SshConfig {
    pub program: String,
    /// Extra `-o` options, e.g. `StrictHostKeyChecking=accept-new`
    pub options: Vec<String>,
    pub identity: Option<String>,
    pub auth: AuthMethod,
    pub sshpass_program: String,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            program: "ssh".to_string(),
            options: Vec::new(),
            identity: None,
            auth: AuthMethod::Key,
            sshpass_program: "sshpass".to_string(),
        }
    }
}

impl SshConfig {
    /// Identity file with `~` and variables expanded
    pub fn identity_path(&self) -> Option<PathBuf> {
        self.identity.as_deref().map(paths::expand)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionConfig {
    /// Parent of the per-session working directory on the host
    pub remote_tmp: String,
    /// Agent binary to upload; the running executable when unset
    pub agent_binary: Option<String>,
    pub response_timeout_secs: u64,
    pub max_auth_attempts: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            remote_tmp: "/tmp".to_string(),
            agent_binary: None,
            response_timeout_secs: 600,
            max_auth_attempts: 3,
        }
    }
}

impl Config {
    /// Load from the config directory; a missing file yields defaults.
    pub fn load() -> Result<Self> {
        let path = paths::config_file()?;
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Could not read {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Invalid config format in {}", path.display()))?;
        log::debug!("Loaded config from {}", path.display());
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_is_default() {
        let dir = TempDir::new().unwrap();
        let config = Config::load_from(&dir.path().join("config.toml")).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.session.response_timeout_secs, 600);
        assert_eq!(config.session.max_auth_attempts, 3);
        assert_eq!(config.ssh.auth, AuthMethod::Key);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            r#"
[ssh]
auth = "password"
options = ["StrictHostKeyChecking=accept-new"]

[session]
response_timeout_secs = 30
"#,
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.ssh.auth, AuthMethod::Password);
        assert_eq!(config.ssh.program, "ssh");
        assert_eq!(config.ssh.options, ["StrictHostKeyChecking=accept-new"]);
        assert_eq!(config.session.response_timeout_secs, 30);
        assert_eq!(config.session.remote_tmp, "/tmp");
    }

    #[test]
    fn test_unknown_key_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[session]\ntimeout = 5\n").unwrap();
        assert!(Config::load_from(&path).is_err());
    }

    #[test]
    fn test_identity_is_expanded() {
        let ssh = SshConfig {
            identity: Some("~/.ssh/id_ed25519".to_string()),
            ..SshConfig::default()
        };
        let home = dirs::home_dir().unwrap();
        assert_eq!(
            ssh.identity_path(),
            Some(home.join(".ssh").join("id_ed25519"))
        );
    }
}

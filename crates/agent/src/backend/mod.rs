//! OS primitives the handlers are built on.
//!
//! The handlers own the idempotency and rehearsal logic; these traits only
//! query and mutate. Separating them lets the dispatcher run against:
//! - the real host (apt, systemd, the local filesystem)
//! - an in-memory mock for tests (`mock` feature)

pub mod apt;
pub mod local;
pub mod systemd;

use std::path::Path;

use crate::error::Result;

/// Installation state of a package according to the package index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageStatus {
    /// The index has never heard of it
    Unknown,
    /// Known and installed
    Installed,
    /// Known but not installed
    NotInstalled,
}

/// Package manager operations.
pub trait PackageManager: Send {
    /// Refresh the package index (`apt-get update`).
    fn refresh_index(&self) -> Result<()>;

    /// Look up a package.
    fn status(&self, package: &str) -> Result<PackageStatus>;

    /// Install a package.
    fn install(&self, package: &str) -> Result<()>;

    /// Remove a package.
    fn remove(&self, package: &str) -> Result<()>;
}

/// Service manager operations.
pub trait ServiceManager: Send {
    /// Restart a service by name (without unit suffix).
    fn restart(&self, service: &str) -> Result<()>;
}

/// Raw ownership and mode of a regular file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    pub uid: u32,
    pub gid: u32,
    /// Full `st_mode`, file type bits included
    pub mode: u32,
}

/// Filesystem and account-database operations.
pub trait FileSystem: Send {
    /// Stat a path; `None` unless it is an existing regular file.
    fn stat(&self, path: &Path) -> Result<Option<FileStat>>;

    /// Content fingerprint of a regular file.
    fn fingerprint(&self, path: &Path) -> Result<String>;

    /// Overwrite `dest` with the bytes of `source`, keeping `dest`'s
    /// ownership and mode when it already exists.
    fn copy(&self, source: &Path, dest: &Path) -> Result<()>;

    /// Change owner and group.
    fn chown(&self, path: &Path, uid: u32, gid: u32) -> Result<()>;

    /// Set mode bits (`0o7777` range).
    fn chmod(&self, path: &Path, mode: u32) -> Result<()>;

    /// Delete a file.
    fn remove(&self, path: &Path) -> Result<()>;

    fn user_id(&self, name: &str) -> Result<u32>;
    fn group_id(&self, name: &str) -> Result<u32>;

    /// User name for a uid, or the number itself when the uid has no entry.
    fn user_name(&self, uid: u32) -> Result<String>;

    /// Group name for a gid, or the number itself when the gid has no entry.
    fn group_name(&self, gid: u32) -> Result<String>;

    /// Effective uid and gid of the dispatcher, i.e. the owner new files get.
    fn process_owner(&self) -> (u32, u32);
}

/// The set of primitives a dispatcher works with.
pub struct Backends {
    pub packages: Box<dyn PackageManager>,
    pub services: Box<dyn ServiceManager>,
    pub files: Box<dyn FileSystem>,
}

impl Backends {
    /// Real host primitives; tool output is appended to files in `workdir`.
    pub fn system(workdir: &Path) -> Self {
        Self {
            packages: Box::new(apt::Apt::new(workdir.join(crate::PACKAGE_LOG))),
            services: Box::new(systemd::Systemd::new()),
            files: Box::new(local::LocalFs::new()),
        }
    }
}

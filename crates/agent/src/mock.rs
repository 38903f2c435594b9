//! In-memory host for tests.
//!
//! `MockHost` is a cheap handle around shared state; [`MockHost::backends`]
//! hands the dispatcher boxed views of the same state so tests can inspect
//! what happened afterwards.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::io;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::backend::{Backends, FileStat, FileSystem, PackageManager, PackageStatus, ServiceManager};
use crate::error::{Error, Result};

const REGULAR_FILE: u32 = 0o100_000;
const NEW_FILE: u32 = REGULAR_FILE | 0o644;

/// A regular file on the mock host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockFile {
    pub content: Vec<u8>,
    pub uid: u32,
    pub gid: u32,
    /// Full mode including the regular-file type bits
    pub mode: u32,
}

/// Observable host state, for before/after comparisons.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub packages: BTreeMap<String, bool>,
    pub files: BTreeMap<String, MockFile>,
}

#[derive(Debug, Default)]
struct Inner {
    packages: BTreeMap<String, bool>,
    files: BTreeMap<String, MockFile>,
    users: HashMap<String, u32>,
    groups: HashMap<String, u32>,
    mutations: Vec<String>,
    restarts: Vec<String>,
    index_refreshes: usize,
    fail_install: BTreeSet<String>,
    fail_restart: BTreeSet<String>,
    unreadable: BTreeSet<String>,
    stale_index: BTreeSet<String>,
    drop_writes: bool,
    freeze_props: bool,
}

/// Shared handle to an in-memory host.
#[derive(Debug, Clone, Default)]
pub struct MockHost {
    inner: Arc<Mutex<Inner>>,
}

impl MockHost {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // a panicking test thread must not hide the state from the others
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Dispatcher primitives backed by this host.
    pub fn backends(&self) -> Backends {
        Backends {
            packages: Box::new(self.clone()),
            services: Box::new(self.clone()),
            files: Box::new(self.clone()),
        }
    }

    pub fn add_user(&self, name: &str, uid: u32) {
        self.lock().users.insert(name.to_string(), uid);
    }

    pub fn add_group(&self, name: &str, gid: u32) {
        self.lock().groups.insert(name.to_string(), gid);
    }

    /// Make a package known to the index.
    pub fn add_package(&self, name: &str, installed: bool) {
        self.lock().packages.insert(name.to_string(), installed);
    }

    /// Create a regular file; `mode` holds permission bits only.
    pub fn add_file(&self, path: &str, content: &[u8], uid: u32, gid: u32, mode: u32) {
        self.lock().files.insert(
            path.to_string(),
            MockFile {
                content: content.to_vec(),
                uid,
                gid,
                mode: REGULAR_FILE | mode,
            },
        );
    }

    /// Package the index only lists after a refresh.
    pub fn add_package_after_refresh(&self, name: &str) {
        self.lock().stale_index.insert(name.to_string());
    }

    /// Reading this file's content fails with permission denied.
    pub fn deny_read(&self, path: &str) {
        self.lock().unreadable.insert(path.to_string());
    }

    /// Install attempts for this package fail.
    pub fn fail_install(&self, name: &str) {
        self.lock().fail_install.insert(name.to_string());
    }

    /// Restarts of this service fail.
    pub fn fail_restart(&self, name: &str) {
        self.lock().fail_restart.insert(name.to_string());
    }

    /// Content copies report success but leave the destination unchanged.
    pub fn drop_writes(&self) {
        self.lock().drop_writes = true;
    }

    /// chown/chmod report success but change nothing.
    pub fn freeze_props(&self) {
        self.lock().freeze_props = true;
    }

    pub fn is_installed(&self, name: &str) -> bool {
        self.lock().packages.get(name).copied().unwrap_or(false)
    }

    pub fn file(&self, path: &str) -> Option<MockFile> {
        self.lock().files.get(path).cloned()
    }

    pub fn index_refreshes(&self) -> usize {
        self.lock().index_refreshes
    }

    /// Services restarted, in order.
    pub fn restarts(&self) -> Vec<String> {
        self.lock().restarts.clone()
    }

    /// Every state-changing call the dispatcher made, in order.
    pub fn mutations(&self) -> Vec<String> {
        self.lock().mutations.clone()
    }

    pub fn snapshot(&self) -> Snapshot {
        let inner = self.lock();
        Snapshot {
            packages: inner.packages.clone(),
            files: inner.files.clone(),
        }
    }
}

fn key(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn not_found(path: &Path) -> Error {
    Error::Io(io::Error::new(
        io::ErrorKind::NotFound,
        format!("{}: no such file", path.display()),
    ))
}

impl PackageManager for MockHost {
    fn refresh_index(&self) -> Result<()> {
        let mut inner = self.lock();
        inner.index_refreshes += 1;
        for name in std::mem::take(&mut inner.stale_index) {
            inner.packages.entry(name).or_insert(false);
        }
        Ok(())
    }

    fn status(&self, package: &str) -> Result<PackageStatus> {
        Ok(match self.lock().packages.get(package) {
            None => PackageStatus::Unknown,
            Some(true) => PackageStatus::Installed,
            Some(false) => PackageStatus::NotInstalled,
        })
    }

    fn install(&self, package: &str) -> Result<()> {
        let mut inner = self.lock();
        if inner.fail_install.contains(package) {
            return Err(Error::CommandFailed {
                message: format!("apt-get install {package} failed"),
                stderr: "E: simulated failure".to_string(),
            });
        }
        inner.mutations.push(format!("install {package}"));
        inner.packages.insert(package.to_string(), true);
        Ok(())
    }

    fn remove(&self, package: &str) -> Result<()> {
        let mut inner = self.lock();
        inner.mutations.push(format!("remove {package}"));
        inner.packages.insert(package.to_string(), false);
        Ok(())
    }
}

impl ServiceManager for MockHost {
    fn restart(&self, service: &str) -> Result<()> {
        let mut inner = self.lock();
        if inner.fail_restart.contains(service) {
            return Err(Error::CommandFailed {
                message: format!("restart of {service}.service failed"),
                stderr: "simulated failure".to_string(),
            });
        }
        inner.mutations.push(format!("restart {service}"));
        inner.restarts.push(service.to_string());
        Ok(())
    }
}

impl FileSystem for MockHost {
    fn stat(&self, path: &Path) -> Result<Option<FileStat>> {
        Ok(self.lock().files.get(&key(path)).map(|f| FileStat {
            uid: f.uid,
            gid: f.gid,
            mode: f.mode,
        }))
    }

    fn fingerprint(&self, path: &Path) -> Result<String> {
        let inner = self.lock();
        if inner.unreadable.contains(&key(path)) {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("{}: permission denied", path.display()),
            )));
        }
        inner
            .files
            .get(&key(path))
            .map(|f| protocol::fingerprint(&f.content))
            .ok_or_else(|| not_found(path))
    }

    fn copy(&self, source: &Path, dest: &Path) -> Result<()> {
        let mut inner = self.lock();
        let staged = inner
            .files
            .get(&key(source))
            .cloned()
            .ok_or_else(|| not_found(source))?;
        inner
            .mutations
            .push(format!("copy {} {}", source.display(), dest.display()));
        if inner.drop_writes {
            return Ok(());
        }
        if let Some(existing) = inner.files.get_mut(&key(dest)) {
            existing.content = staged.content;
            return Ok(());
        }
        // a new file is created 0644 by the process owner, like LocalFs
        inner.files.insert(
            key(dest),
            MockFile {
                content: staged.content,
                uid: 0,
                gid: 0,
                mode: NEW_FILE,
            },
        );
        Ok(())
    }

    fn chown(&self, path: &Path, uid: u32, gid: u32) -> Result<()> {
        let mut inner = self.lock();
        inner
            .mutations
            .push(format!("chown {} {uid}:{gid}", path.display()));
        let frozen = inner.freeze_props;
        let file = inner.files.get_mut(&key(path)).ok_or_else(|| not_found(path))?;
        if !frozen {
            file.uid = uid;
            file.gid = gid;
        }
        Ok(())
    }

    fn chmod(&self, path: &Path, mode: u32) -> Result<()> {
        let mut inner = self.lock();
        inner
            .mutations
            .push(format!("chmod {} {mode:o}", path.display()));
        let frozen = inner.freeze_props;
        let file = inner.files.get_mut(&key(path)).ok_or_else(|| not_found(path))?;
        if !frozen {
            file.mode =
                (file.mode & !protocol::mode::MODE_BITS) | (mode & protocol::mode::MODE_BITS);
        }
        Ok(())
    }

    fn remove(&self, path: &Path) -> Result<()> {
        let mut inner = self.lock();
        inner.mutations.push(format!("delete {}", path.display()));
        inner
            .files
            .remove(&key(path))
            .map(|_| ())
            .ok_or_else(|| not_found(path))
    }

    fn user_id(&self, name: &str) -> Result<u32> {
        self.lock()
            .users
            .get(name)
            .copied()
            .ok_or_else(|| Error::UnknownUser(name.to_string()))
    }

    fn group_id(&self, name: &str) -> Result<u32> {
        self.lock()
            .groups
            .get(name)
            .copied()
            .ok_or_else(|| Error::UnknownGroup(name.to_string()))
    }

    fn user_name(&self, uid: u32) -> Result<String> {
        let inner = self.lock();
        Ok(inner
            .users
            .iter()
            .find(|(_, id)| **id == uid)
            .map_or_else(|| uid.to_string(), |(name, _)| name.clone()))
    }

    fn group_name(&self, gid: u32) -> Result<String> {
        let inner = self.lock();
        Ok(inner
            .groups
            .iter()
            .find(|(_, id)| **id == gid)
            .map_or_else(|| gid.to_string(), |(name, _)| name.clone()))
    }

    fn process_owner(&self) -> (u32, u32) {
        (0, 0)
    }
}

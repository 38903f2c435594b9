//! Command handlers and their idempotency contracts.
//!
//! Every handler checks current state first and reports `noop` when nothing
//! needs to change. In rehearsal the same checks run, the mutation is
//! skipped, and its would-be effect is recorded in the overlay so later
//! queries observe it.

use std::path::Path;

use protocol::mode::MODE_BITS;
use protocol::{Command, FileProps, Response, Status, merge_mode, mode_matches};

use crate::backend::{Backends, PackageStatus};
use crate::error::{Error, Result};
use crate::state::{DispatcherState, ShadowFile};

/// Mode of a file `file-put` creates: regular file, `rw-r--r--`.
const NEW_FILE_MODE: u32 = 0o100_644;

/// Execute one command and build its response. Never fails: handler errors
/// become `error` results carrying the error text.
pub fn handle(state: &mut DispatcherState, host: &Backends, command: &Command) -> Response {
    match execute(state, host, command) {
        Ok((status, props)) => Response::reply(command, status, props),
        Err(e) => {
            log::debug!("{} failed: {}", command.name(), e);
            Response::reply(command, Status::error(e.to_string()), FileProps::absent())
        }
    }
}

fn execute(
    state: &mut DispatcherState,
    host: &Backends,
    command: &Command,
) -> Result<(Status, FileProps)> {
    let status = match command {
        Command::RehearsalStart => {
            state.rehearsal = true;
            Status::ok()
        }
        Command::PackageInstall { package } => install_package(state, host, package)?,
        Command::PackageRemove { package } => remove_package(state, host, package)?,
        Command::FileGetProps { path } => {
            return Ok((Status::ok(), file_props(state, host, path)));
        }
        Command::FileSetProps {
            path,
            user,
            group,
            mode,
        } => set_file_props(state, host, path, user, group, *mode)?,
        Command::FilePut { path, source } => put_file(state, host, path, source)?,
        Command::FileDelete { path } => delete_file(state, host, path)?,
        Command::ServiceRestart { service } => restart_service(state, host, service)?,
    };
    Ok((status, FileProps::absent()))
}

fn package_status(
    state: &DispatcherState,
    host: &Backends,
    package: &str,
) -> Result<PackageStatus> {
    match state.overlay.package(package) {
        Some(true) => Ok(PackageStatus::Installed),
        Some(false) => Ok(PackageStatus::NotInstalled),
        None => host.packages.status(package),
    }
}

fn install_package(state: &mut DispatcherState, host: &Backends, package: &str) -> Result<Status> {
    if !state.rehearsal && !state.index_refreshed {
        host.packages.refresh_index()?;
        state.index_refreshed = true;
    }

    match package_status(state, host, package)? {
        PackageStatus::Unknown => Err(Error::PackageNotFound(package.to_string())),
        PackageStatus::Installed => Ok(Status::noop()),
        PackageStatus::NotInstalled if state.rehearsal => {
            state.overlay.set_package(package, true);
            Ok(Status::ok())
        }
        PackageStatus::NotInstalled => {
            host.packages.install(package)?;
            Ok(Status::ok())
        }
    }
}

fn remove_package(state: &mut DispatcherState, host: &Backends, package: &str) -> Result<Status> {
    match package_status(state, host, package)? {
        PackageStatus::Unknown | PackageStatus::NotInstalled => Ok(Status::noop()),
        PackageStatus::Installed if state.rehearsal => {
            state.overlay.set_package(package, false);
            Ok(Status::ok())
        }
        PackageStatus::Installed => {
            host.packages.remove(package)?;
            Ok(Status::ok())
        }
    }
}

/// Current state of a file, rehearsal overlay first. The hash is only
/// computed when `with_hash` is set and is empty otherwise.
fn observe(
    state: &DispatcherState,
    host: &Backends,
    path: &str,
    with_hash: bool,
) -> Result<Option<ShadowFile>> {
    if let Some(shadow) = state.overlay.file(path) {
        return Ok(shadow.cloned());
    }

    let Some(stat) = host.files.stat(Path::new(path))? else {
        return Ok(None);
    };
    let hash = if with_hash {
        host.files.fingerprint(Path::new(path))?
    } else {
        String::new()
    };
    Ok(Some(ShadowFile {
        hash,
        uid: stat.uid,
        gid: stat.gid,
        mode: stat.mode,
    }))
}

/// Never fails: a path that cannot be examined reads as absent, content
/// that cannot be read as an empty hash, and unmapped ids as numbers.
fn file_props(state: &DispatcherState, host: &Backends, path: &str) -> FileProps {
    let file = match observe(state, host, path, false) {
        Ok(Some(file)) => file,
        Ok(None) => return FileProps::absent(),
        Err(e) => {
            log::debug!("cannot stat '{path}': {e}");
            return FileProps::absent();
        }
    };

    // overlay entries carry their hash already
    let hash = if file.hash.is_empty() {
        host.files
            .fingerprint(Path::new(path))
            .unwrap_or_else(|e| {
                log::debug!("cannot read '{path}': {e}");
                String::new()
            })
    } else {
        file.hash
    };
    FileProps {
        hash,
        user: host.files.user_name(file.uid).unwrap_or_else(|_| file.uid.to_string()),
        group: host.files.group_name(file.gid).unwrap_or_else(|_| file.gid.to_string()),
        mode: file.mode,
    }
}

fn set_file_props(
    state: &mut DispatcherState,
    host: &Backends,
    path: &str,
    user: &str,
    group: &str,
    mode: u32,
) -> Result<Status> {
    let Some(current) = observe(state, host, path, state.rehearsal)? else {
        return Err(Error::FileNotFound(path.to_string()));
    };
    let uid = host.files.user_id(user)?;
    let gid = host.files.group_id(group)?;

    let owner_matches = current.uid == uid && current.gid == gid;
    let mode_ok = mode_matches(mode, current.mode);
    if owner_matches && mode_ok {
        return Ok(Status::noop());
    }

    let new_mode = merge_mode(mode, current.mode);
    if state.rehearsal {
        state.overlay.set_file(
            path,
            ShadowFile {
                hash: current.hash,
                uid,
                gid,
                mode: (current.mode & !MODE_BITS) | new_mode,
            },
        );
        return Ok(Status::ok());
    }

    if !owner_matches {
        host.files.chown(Path::new(path), uid, gid)?;
    }
    if !mode_ok {
        host.files.chmod(Path::new(path), new_mode)?;
    }
    Ok(Status::ok())
}

fn put_file(
    state: &mut DispatcherState,
    host: &Backends,
    path: &str,
    source: &str,
) -> Result<Status> {
    let staged = Path::new(source);
    if host.files.stat(staged)?.is_none() {
        return Err(Error::CommandFailed {
            message: "staged content missing".to_string(),
            stderr: source.to_string(),
        });
    }
    let hash = host.files.fingerprint(staged)?;

    let current = observe(state, host, path, true)?;
    if current.as_ref().is_some_and(|f| f.hash == hash) {
        return Ok(Status::noop());
    }

    if state.rehearsal {
        let (uid, gid, mode) = match current {
            Some(f) => (f.uid, f.gid, f.mode),
            None => {
                let (uid, gid) = host.files.process_owner();
                (uid, gid, NEW_FILE_MODE)
            }
        };
        state
            .overlay
            .set_file(path, ShadowFile { hash, uid, gid, mode });
        return Ok(Status::ok());
    }

    host.files.copy(staged, Path::new(path))?;
    Ok(Status::ok())
}

fn delete_file(state: &mut DispatcherState, host: &Backends, path: &str) -> Result<Status> {
    if observe(state, host, path, false)?.is_none() {
        return Ok(Status::noop());
    }
    if state.rehearsal {
        state.overlay.delete_file(path);
    } else {
        host.files.remove(Path::new(path))?;
    }
    Ok(Status::ok())
}

fn restart_service(state: &DispatcherState, host: &Backends, service: &str) -> Result<Status> {
    if !state.rehearsal {
        host.services.restart(service)?;
    }
    Ok(Status::ok())
}

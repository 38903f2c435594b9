//! Local filesystem backend.

use std::ffi::{CStr, CString};
use std::fs::{self, File, OpenOptions};
use std::io;
use std::mem::MaybeUninit;
use std::os::unix::fs::{MetadataExt, OpenOptionsExt, PermissionsExt};
use std::path::Path;

use super::{FileStat, FileSystem};
use crate::error::{Error, Result};

/// Creation mode of a new destination, before the umask.
const NEW_FILE_MODE: u32 = 0o644;

/// Initial scratch buffer for the reentrant passwd/group lookups.
const LOOKUP_BUFFER: usize = 1024;

/// Operates on the filesystem and account database of the running host.
pub struct LocalFs;

impl LocalFs {
    pub fn new() -> Self {
        Self
    }
}

impl Default for LocalFs {
    fn default() -> Self {
        Self::new()
    }
}

impl FileSystem for LocalFs {
    fn stat(&self, path: &Path) -> Result<Option<FileStat>> {
        match fs::metadata(path) {
            Ok(meta) if meta.is_file() => Ok(Some(FileStat {
                uid: meta.uid(),
                gid: meta.gid(),
                mode: meta.mode(),
            })),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn fingerprint(&self, path: &Path) -> Result<String> {
        Ok(protocol::fingerprint_reader(File::open(path)?)?)
    }

    fn copy(&self, source: &Path, dest: &Path) -> Result<()> {
        // fs::copy would chmod dest to the staged file's mode; write in place instead
        let mut reader = File::open(source)?;
        let mut writer = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(NEW_FILE_MODE)
            .open(dest)?;
        io::copy(&mut reader, &mut writer)?;
        Ok(())
    }

    fn chown(&self, path: &Path, uid: u32, gid: u32) -> Result<()> {
        std::os::unix::fs::chown(path, Some(uid), Some(gid))?;
        Ok(())
    }

    fn chmod(&self, path: &Path, mode: u32) -> Result<()> {
        fs::set_permissions(path, fs::Permissions::from_mode(mode & protocol::mode::MODE_BITS))?;
        Ok(())
    }

    fn remove(&self, path: &Path) -> Result<()> {
        fs::remove_file(path)?;
        Ok(())
    }

    fn user_id(&self, name: &str) -> Result<u32> {
        lookup_user(name)?.ok_or_else(|| Error::UnknownUser(name.to_string()))
    }

    fn group_id(&self, name: &str) -> Result<u32> {
        lookup_group(name)?.ok_or_else(|| Error::UnknownGroup(name.to_string()))
    }

    fn user_name(&self, uid: u32) -> Result<String> {
        Ok(lookup_user_name(uid)?.unwrap_or_else(|| uid.to_string()))
    }

    fn group_name(&self, gid: u32) -> Result<String> {
        Ok(lookup_group_name(gid)?.unwrap_or_else(|| gid.to_string()))
    }

    fn process_owner(&self) -> (u32, u32) {
        // SAFETY: geteuid/getegid cannot fail and touch no memory
        unsafe { (libc::geteuid(), libc::getegid()) }
    }
}

/// Call a `get*_r` function, growing the buffer while it reports `ERANGE`.
///
/// Returns `Ok(false)` when the entry does not exist.
fn with_lookup_buffer<F>(mut call: F) -> io::Result<bool>
where
    F: FnMut(&mut [libc::c_char]) -> (libc::c_int, bool),
{
    let mut buf: Vec<libc::c_char> = vec![0; LOOKUP_BUFFER];
    loop {
        let (rc, found) = call(&mut buf);
        match rc {
            0 => return Ok(found),
            libc::ERANGE => buf.resize(buf.len() * 2, 0),
            // "not found" is reported inconsistently across libcs
            libc::ENOENT | libc::ESRCH | libc::EBADF | libc::EPERM => return Ok(false),
            other => return Err(io::Error::from_raw_os_error(other)),
        }
    }
}

fn c_name(name: &str) -> Option<CString> {
    CString::new(name).ok()
}

fn lookup_user(name: &str) -> io::Result<Option<u32>> {
    let Some(c_name) = c_name(name) else {
        return Ok(None);
    };
    let mut uid = None;
    let found = with_lookup_buffer(|buf| {
        let mut entry = MaybeUninit::<libc::passwd>::uninit();
        let mut result: *mut libc::passwd = std::ptr::null_mut();
        // SAFETY: all pointers are valid for the call; result is checked before use
        let rc = unsafe {
            libc::getpwnam_r(
                c_name.as_ptr(),
                entry.as_mut_ptr(),
                buf.as_mut_ptr(),
                buf.len(),
                &raw mut result,
            )
        };
        if rc == 0 && !result.is_null() {
            // SAFETY: non-null result points at `entry`, which getpwnam_r filled
            uid = Some(unsafe { (*result).pw_uid });
        }
        (rc, !result.is_null())
    })?;
    Ok(if found { uid } else { None })
}

fn lookup_group(name: &str) -> io::Result<Option<u32>> {
    let Some(c_name) = c_name(name) else {
        return Ok(None);
    };
    let mut gid = None;
    let found = with_lookup_buffer(|buf| {
        let mut entry = MaybeUninit::<libc::group>::uninit();
        let mut result: *mut libc::group = std::ptr::null_mut();
        // SAFETY: all pointers are valid for the call; result is checked before use
        let rc = unsafe {
            libc::getgrnam_r(
                c_name.as_ptr(),
                entry.as_mut_ptr(),
                buf.as_mut_ptr(),
                buf.len(),
                &raw mut result,
            )
        };
        if rc == 0 && !result.is_null() {
            // SAFETY: non-null result points at `entry`, which getgrnam_r filled
            gid = Some(unsafe { (*result).gr_gid });
        }
        (rc, !result.is_null())
    })?;
    Ok(if found { gid } else { None })
}

fn lookup_user_name(uid: u32) -> io::Result<Option<String>> {
    let mut name = None;
    let found = with_lookup_buffer(|buf| {
        let mut entry = MaybeUninit::<libc::passwd>::uninit();
        let mut result: *mut libc::passwd = std::ptr::null_mut();
        // SAFETY: all pointers are valid for the call; result is checked before use
        let rc = unsafe {
            libc::getpwuid_r(
                uid,
                entry.as_mut_ptr(),
                buf.as_mut_ptr(),
                buf.len(),
                &raw mut result,
            )
        };
        if rc == 0 && !result.is_null() {
            // SAFETY: pw_name points into `buf`, NUL-terminated by getpwuid_r
            let raw = unsafe { CStr::from_ptr((*result).pw_name) };
            name = Some(raw.to_string_lossy().into_owned());
        }
        (rc, !result.is_null())
    })?;
    Ok(if found { name } else { None })
}

fn lookup_group_name(gid: u32) -> io::Result<Option<String>> {
    let mut name = None;
    let found = with_lookup_buffer(|buf| {
        let mut entry = MaybeUninit::<libc::group>::uninit();
        let mut result: *mut libc::group = std::ptr::null_mut();
        // SAFETY: all pointers are valid for the call; result is checked before use
        let rc = unsafe {
            libc::getgrgid_r(
                gid,
                entry.as_mut_ptr(),
                buf.as_mut_ptr(),
                buf.len(),
                &raw mut result,
            )
        };
        if rc == 0 && !result.is_null() {
            // SAFETY: gr_name points into `buf`, NUL-terminated by getgrgid_r
            let raw = unsafe { CStr::from_ptr((*result).gr_name) };
            name = Some(raw.to_string_lossy().into_owned());
        }
        (rc, !result.is_null())
    })?;
    Ok(if found { name } else { None })
}

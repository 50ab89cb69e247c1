//! Permission checks for files about to be moved or deleted.
//!
//! Mode bits alone cannot answer "may this process unlink the file": owner
//! and group matter, and so does the sticky bit on the directory. On Unix the
//! kernel is asked directly through `access(2)`.

use std::fs::{self, Metadata};
use std::io;
use std::path::Path;

/// Fails with a reason unless the file and its directory are writable by this
/// process and the directory lets it remove the entry.
pub fn check_removable(path: &Path, metadata: &Metadata) -> Result<(), String> {
    if !can_write(path).map_err(|e| e.to_string())? {
        return Err("no write permission on file".to_string());
    }

    let Some(parent) = path.parent() else {
        return Ok(());
    };
    if !can_write(parent).map_err(|e| e.to_string())? {
        return Err(format!(
            "no write permission on directory {}",
            parent.display()
        ));
    }

    let parent_meta = fs::metadata(parent).map_err(|e| e.to_string())?;
    if sticky_blocks(&parent_meta, metadata) {
        return Err(format!(
            "directory {} is sticky and the file belongs to another user",
            parent.display()
        ));
    }
    Ok(())
}

/// Whether this process may write to `path`
#[cfg(unix)]
pub fn can_write(path: &Path) -> io::Result<bool> {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

    // SAFETY: `c_path` is NUL-terminated and outlives the call
    if unsafe { libc::access(c_path.as_ptr(), libc::W_OK) } == 0 {
        return Ok(true);
    }

    let err = io::Error::last_os_error();
    match err.raw_os_error() {
        Some(libc::EACCES) | Some(libc::EPERM) | Some(libc::EROFS) => Ok(false),
        _ => Err(err),
    }
}

#[cfg(not(unix))]
pub fn can_write(path: &Path) -> io::Result<bool> {
    Ok(!fs::metadata(path)?.permissions().readonly())
}

#[cfg(unix)]
fn sticky_blocks(dir: &Metadata, file: &Metadata) -> bool {
    use std::os::unix::fs::MetadataExt;

    // SAFETY: geteuid has no preconditions and cannot fail
    let euid = unsafe { libc::geteuid() };
    sticky_denies_unlink(dir.mode(), dir.uid(), file.uid(), euid)
}

#[cfg(not(unix))]
fn sticky_blocks(_dir: &Metadata, _file: &Metadata) -> bool {
    false
}

/// In a sticky directory only the file's owner, the directory's owner or
/// root may remove an entry.
pub fn sticky_denies_unlink(dir_mode: u32, dir_uid: u32, file_uid: u32, euid: u32) -> bool {
    const STICKY: u32 = 0o1000;
    dir_mode & STICKY != 0 && euid != 0 && euid != file_uid && euid != dir_uid
}

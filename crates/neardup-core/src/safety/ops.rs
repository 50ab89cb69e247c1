use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use sysinfo::Disks;

/// Primitive file-system calls used by the mutator
pub trait FileOps: Send + Sync {
    /// Hard-link `from` to `to`, copying when linking is not possible.
    /// Fails if `to` already exists.
    fn link_or_copy(&self, from: &Path, to: &Path) -> io::Result<()>;

    fn remove_file(&self, path: &Path) -> io::Result<()>;

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;

    fn create_dir_all(&self, path: &Path) -> io::Result<()>;

    /// Free bytes on the volume holding `path`; `None` when it cannot be determined
    fn available_space(&self, path: &Path) -> io::Result<Option<u64>>;
}

/// The real file system
#[derive(Debug, Clone, Copy, Default)]
pub struct OsFileOps;

impl FileOps for OsFileOps {
    fn link_or_copy(&self, from: &Path, to: &Path) -> io::Result<()> {
        match fs::hard_link(from, to) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Err(e),
            Err(_) => {
                if fs::symlink_metadata(to).is_ok() {
                    return Err(io::Error::new(
                        io::ErrorKind::AlreadyExists,
                        format!("{} already exists", to.display()),
                    ));
                }
                fs::copy(from, to).map(|_| ())
            }
        }
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> {
        fs::remove_file(path)
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        fs::rename(from, to)
    }

    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        fs::create_dir_all(path)
    }

    fn available_space(&self, path: &Path) -> io::Result<Option<u64>> {
        let Some(existing) = nearest_existing(path) else {
            return Ok(None);
        };
        let existing = existing.canonicalize()?;

        let disks = Disks::new_with_refreshed_list();
        let space = disks
            .list()
            .iter()
            .filter(|disk| existing.starts_with(disk.mount_point()))
            .max_by_key(|disk| disk.mount_point().components().count())
            .map(|disk| disk.available_space());

        Ok(space)
    }
}

/// `path` or its closest ancestor that exists
fn nearest_existing(path: &Path) -> Option<PathBuf> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir().ok()?.join(path)
    };
    absolute.ancestors().find(|p| p.exists()).map(Path::to_path_buf)
}

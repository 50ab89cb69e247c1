//! Destination planning for moves into the holding directory.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::types::FileRecord;

/// Plan one destination per target: `holding/group_<id>/<relative path>`.
///
/// With a `base` the relative path is the target's path below it; targets
/// outside `base`, or no base at all, keep only the file name. Names already
/// used in this plan, or already present on disk, get a numbered
/// `stem_N.ext` suffix.
pub fn plan_destinations(
    targets: &[FileRecord],
    holding_dir: &Path,
    group_id: usize,
    base: Option<&Path>,
) -> Vec<PathBuf> {
    let group_dir = holding_dir.join(format!("group_{}", group_id));

    let mut used = HashSet::new();
    targets
        .iter()
        .map(|target| {
            let relative = base
                .and_then(|b| target.path.strip_prefix(b).ok())
                .map(Path::to_path_buf)
                .or_else(|| target.path.file_name().map(PathBuf::from))
                .unwrap_or_else(|| PathBuf::from(format!("file_{}", target.id)));

            let wanted = group_dir.join(relative);
            let destination = unique(&wanted, |p| {
                used.contains(p) || std::fs::symlink_metadata(p).is_ok()
            });
            used.insert(destination.clone());
            destination
        })
        .collect()
}

/// `path` itself if free, else `stem_1.ext`, `stem_2.ext`, ...
fn unique(path: &Path, taken: impl Fn(&Path) -> bool) -> PathBuf {
    if !taken(path) {
        return path.to_path_buf();
    }

    let parent = path.parent().unwrap_or_else(|| Path::new(""));
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let extension = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();

    let mut counter = 1;
    loop {
        let candidate = parent.join(format!("{}_{}{}", stem, counter, extension));
        if !taken(&candidate) {
            return candidate;
        }
        counter += 1;
    }
}

/// Directory the layout under `group_<id>` is relative to: the deepest
/// directory holding every file of the group, keeper included.
pub fn structure_base(files: &[FileRecord]) -> Option<PathBuf> {
    common_ancestor(files.iter().filter_map(|f| f.path.parent()))
}

/// Deepest directory that contains every path
pub fn common_ancestor<'a>(paths: impl IntoIterator<Item = &'a Path>) -> Option<PathBuf> {
    let mut paths = paths.into_iter();
    let mut common: PathBuf = paths.next()?.to_path_buf();

    for path in paths {
        while !path.starts_with(&common) {
            if !common.pop() {
                return None;
            }
        }
    }
    Some(common)
}

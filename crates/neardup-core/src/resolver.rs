//! Hardened symlink resolution.
//!
//! Links are followed one hop at a time. Each hop canonicalizes the parent of
//! the link target (never the target itself, which may be another link), checks
//! containment in the base directory and records the canonical link location for
//! cycle detection. The visited set lives on the stack of a single `resolve`
//! call.
//!
//! The final path is re-validated right before it is returned, and the mutator
//! re-validates again before touching a file. That narrows the window for a
//! swap-after-check attack but does not close it: doing so needs descriptor
//! based primitives (`openat2` with `RESOLVE_BENEATH` and friends) that this
//! crate does not use.

use std::collections::HashSet;
use std::fs::{self, Metadata};
use std::path::{Path, PathBuf};

use crate::error::{Error, ResolutionError, Result};

#[derive(Debug, Clone)]
pub struct ResolverConfig {
    pub follow_symlinks: bool,
    /// Maximum number of link hops
    pub max_depth: usize,
    pub base_dir: Option<PathBuf>,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            follow_symlinks: false,
            max_depth: 10,
            base_dir: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Containment {
    /// No base directory configured
    Unrestricted,
    /// Every hop and the final path are below the base directory
    WithinBase,
}

/// A successfully resolved path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSymlink {
    /// Canonical real path of a regular file
    pub path: PathBuf,
    /// Link hops consumed
    pub hops: usize,
    pub containment: Containment,
}

pub struct SymlinkResolver {
    follow_symlinks: bool,
    max_depth: usize,
    base_dir: Option<PathBuf>,
}

impl SymlinkResolver {
    /// Build a resolver. The base directory must exist; it is canonicalized once here.
    pub fn new(config: ResolverConfig) -> Result<Self> {
        let base_dir = match config.base_dir {
            Some(base) => Some(
                fs::canonicalize(&base).map_err(|_| Error::FileNotFound(base.clone()))?,
            ),
            None => None,
        };

        if config.max_depth == 0 {
            return Err(Error::Configuration(
                "max_symlink_depth must be positive".to_string(),
            ));
        }

        Ok(Self {
            follow_symlinks: config.follow_symlinks,
            max_depth: config.max_depth,
            base_dir,
        })
    }

    pub fn base_dir(&self) -> Option<&Path> {
        self.base_dir.as_deref()
    }

    /// Resolve `path` to the canonical path of a regular file
    pub fn resolve(&self, path: &Path) -> std::result::Result<ResolvedSymlink, ResolutionError> {
        let start = absolute(path)?;

        let mut visited: HashSet<PathBuf> = HashSet::new();
        let mut current = start.clone();
        let mut hops = 0usize;

        loop {
            let metadata = fs::symlink_metadata(&current)
                .map_err(|e| ResolutionError::from_io(current.clone(), &e))?;

            if !metadata.file_type().is_symlink() {
                return self.finish(&current, hops);
            }

            if !self.follow_symlinks {
                return Err(ResolutionError::NotFollowed(current));
            }

            let location = canonical_location(&current)?;
            self.check_base(&location)?;
            if !visited.insert(location.clone()) {
                return Err(ResolutionError::Cycle(location));
            }

            if hops == self.max_depth {
                return Err(ResolutionError::TooDeep {
                    path: start,
                    max_depth: self.max_depth,
                });
            }
            hops += 1;

            let target = fs::read_link(&location)
                .map_err(|e| ResolutionError::from_io(location.clone(), &e))?;
            let target = if target.is_relative() {
                location
                    .parent()
                    .map(|parent| parent.join(&target))
                    .unwrap_or(target)
            } else {
                target
            };

            current = canonical_location(&target)?;
            self.check_base(&current)?;
        }
    }

    fn finish(
        &self,
        path: &Path,
        hops: usize,
    ) -> std::result::Result<ResolvedSymlink, ResolutionError> {
        let canonical =
            fs::canonicalize(path).map_err(|e| ResolutionError::from_io(path.to_path_buf(), &e))?;
        self.check_base(&canonical)?;

        // Re-check the type immediately before handing the path out
        ensure_regular_file(&canonical)?;

        Ok(ResolvedSymlink {
            path: canonical,
            hops,
            containment: match self.base_dir {
                Some(_) => Containment::WithinBase,
                None => Containment::Unrestricted,
            },
        })
    }

    fn check_base(&self, canonical: &Path) -> std::result::Result<(), ResolutionError> {
        match &self.base_dir {
            // Component-wise comparison of canonical paths, not a string prefix
            Some(base) if !canonical.starts_with(base) => Err(ResolutionError::OutsideBase {
                path: canonical.to_path_buf(),
                base: base.clone(),
            }),
            _ => Ok(()),
        }
    }
}

/// Confirm `path` is currently a regular file and not a symlink.
pub fn ensure_regular_file(path: &Path) -> std::result::Result<Metadata, ResolutionError> {
    let metadata = fs::symlink_metadata(path)
        .map_err(|e| ResolutionError::from_io(path.to_path_buf(), &e))?;

    if metadata.file_type().is_symlink() || !metadata.is_file() {
        return Err(ResolutionError::NotRegular(path.to_path_buf()));
    }
    Ok(metadata)
}

fn absolute(path: &Path) -> std::result::Result<PathBuf, ResolutionError> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(path))
        .map_err(|e| ResolutionError::from_io(path.to_path_buf(), &e))
}

/// Canonical parent joined with the final component, without following the
/// final component itself.
fn canonical_location(path: &Path) -> std::result::Result<PathBuf, ResolutionError> {
    match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) if !parent.as_os_str().is_empty() => {
            let parent = fs::canonicalize(parent)
                .map_err(|e| ResolutionError::from_io(path.to_path_buf(), &e))?;
            Ok(parent.join(name))
        }
        _ => fs::canonicalize(path).map_err(|e| ResolutionError::from_io(path.to_path_buf(), &e)),
    }
}

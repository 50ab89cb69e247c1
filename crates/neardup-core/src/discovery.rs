//! Directory walking, safe resolution and admission of text files.
//!
//! The walk never follows links into directories. Each file-like entry is
//! checked against the extension allow-list, resolved through the
//! `SymlinkResolver`, deduplicated by canonical path and classified from a
//! content sample. Admitted files get sequential `FileId`s; everything else is
//! reported as a `Skipped` event and the walk continues.

use log::{debug, info};
use serde::Serialize;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use walkdir::{DirEntry, WalkDir};

use crate::config::Config;
use crate::error::{Error, ResolutionError, Result};
use crate::filter::{extension_of, read_sample, Admissibility, Rejection, TextFilter};
use crate::logging::log_skipped;
use crate::resolver::SymlinkResolver;
use crate::types::{FileId, FileRecord};

/// Why a walked path did not become a `FileRecord`
#[derive(Error, Debug, Clone, PartialEq, Serialize)]
pub enum SkipReason {
    #[error(transparent)]
    Resolution(ResolutionError),

    #[error("not text: {0}")]
    Rejected(Rejection),

    #[error("already scanned as {0}")]
    AlreadySeen(PathBuf),

    #[error("I/O error: {0}")]
    Io(String),
}

#[derive(Debug, Clone)]
pub enum ScanEvent {
    Admitted(FileRecord),
    Skipped { path: PathBuf, reason: SkipReason },
}

/// Walks roots and admits text files, keeping identity state across roots
pub struct Scanner {
    resolver: SymlinkResolver,
    filter: TextFilter,
    max_depth: Option<usize>,
    next_id: u64,
    seen: HashSet<PathBuf>,
    shutdown: Option<Arc<AtomicBool>>,
}

impl Scanner {
    pub fn new(config: &Config) -> Result<Self> {
        Ok(Self {
            resolver: SymlinkResolver::new(config.resolver_config())?,
            filter: TextFilter::new(config.filter_config()),
            max_depth: config.max_depth,
            next_id: 0,
            seen: HashSet::new(),
            shutdown: None,
        })
    }

    /// Stop walking once `flag` is raised
    pub fn with_shutdown(mut self, flag: Arc<AtomicBool>) -> Self {
        self.shutdown = Some(flag);
        self
    }

    /// Number of files admitted so far
    pub fn admitted(&self) -> u64 {
        self.next_id
    }

    /// Lazily walk one root. Ids continue from earlier roots, and a file
    /// already admitted through another root is reported as `AlreadySeen`.
    pub fn scan_root(&mut self, root: &Path) -> Result<Scan<'_>> {
        if fs::symlink_metadata(root).is_err() {
            return Err(Error::FileNotFound(root.to_path_buf()));
        }

        let walker = WalkDir::new(root)
            .follow_links(false)
            .max_depth(self.max_depth.unwrap_or(usize::MAX))
            .sort_by_file_name()
            .into_iter();

        Ok(Scan {
            scanner: self,
            walker,
            interrupted: false,
        })
    }

    /// Walk every root and collect the admitted files. Skipped files are logged.
    ///
    /// All roots are checked before any walking starts.
    pub fn scan<P: AsRef<Path>>(&mut self, roots: &[P]) -> Result<Vec<FileRecord>> {
        for root in roots {
            if fs::symlink_metadata(root.as_ref()).is_err() {
                return Err(Error::FileNotFound(root.as_ref().to_path_buf()));
            }
        }

        let mut records = Vec::new();
        let mut skipped = 0usize;
        for root in roots {
            let mut scan = self.scan_root(root.as_ref())?;
            for event in scan.by_ref() {
                match event {
                    ScanEvent::Admitted(record) => records.push(record),
                    ScanEvent::Skipped { path, reason } => {
                        skipped += 1;
                        log_skipped(&path, &reason);
                    }
                }
            }
            if scan.was_interrupted() {
                return Err(Error::Interrupted);
            }
        }

        info!(
            "Scan complete: {} files admitted, {} skipped",
            records.len(),
            skipped
        );
        Ok(records)
    }

    fn interrupted(&self) -> bool {
        self.shutdown
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }

    /// Turn one walk entry into an event; directories produce none
    fn examine(&mut self, entry: DirEntry) -> Option<ScanEvent> {
        if entry.file_type().is_dir() {
            return None;
        }
        let path = entry.into_path();
        let skip = |reason| {
            Some(ScanEvent::Skipped {
                path: path.clone(),
                reason,
            })
        };

        // Cheap check on the walked name before touching the file
        if !self.filter.allows_extension(&path) {
            let extension = extension_of(&path);
            return skip(SkipReason::Rejected(Rejection::Extension(extension)));
        }

        let resolved = match self.resolver.resolve(&path) {
            Ok(resolved) => resolved,
            Err(e) => return skip(SkipReason::Resolution(e)),
        };
        let canonical = resolved.path;

        if self.seen.contains(&canonical) {
            return skip(SkipReason::AlreadySeen(canonical));
        }

        let metadata = match fs::metadata(&canonical) {
            Ok(metadata) => metadata,
            Err(e) => return skip(SkipReason::Io(e.to_string())),
        };

        let sample = match read_sample(&canonical) {
            Ok(sample) => sample,
            Err(e) => return skip(SkipReason::Io(e.to_string())),
        };
        if let Admissibility::Rejected(rejection) = self.filter.classify(&path, &sample) {
            return skip(SkipReason::Rejected(rejection));
        }

        let record =
            match FileRecord::from_metadata(FileId(self.next_id), &canonical, &path, &metadata) {
                Ok(record) => record,
                Err(e) => return skip(SkipReason::Io(e.to_string())),
            };

        self.next_id += 1;
        self.seen.insert(canonical);
        if resolved.hops > 0 {
            debug!(
                "Admitted {} via {} symlink hop(s)",
                record.path.display(),
                resolved.hops
            );
        }
        Some(ScanEvent::Admitted(record))
    }
}

/// Lazy walk of one root
pub struct Scan<'s> {
    scanner: &'s mut Scanner,
    walker: walkdir::IntoIter,
    interrupted: bool,
}

impl Scan<'_> {
    /// True if the walk stopped because shutdown was requested
    pub fn was_interrupted(&self) -> bool {
        self.interrupted
    }
}

impl Iterator for Scan<'_> {
    type Item = ScanEvent;

    fn next(&mut self) -> Option<ScanEvent> {
        loop {
            if self.scanner.interrupted() {
                self.interrupted = true;
                return None;
            }

            let entry = match self.walker.next()? {
                Ok(entry) => entry,
                Err(e) => {
                    let path = e.path().map(Path::to_path_buf).unwrap_or_default();
                    return Some(ScanEvent::Skipped {
                        path,
                        reason: SkipReason::Io(e.to_string()),
                    });
                }
            };

            if let Some(event) = self.scanner.examine(entry) {
                return Some(event);
            }
        }
    }
}

// -- Tests --

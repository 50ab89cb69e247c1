//! Parallel fingerprinting of admitted records.
//!
//! Files are read and hashed on the current rayon pool. A file that cannot be
//! read, or that changed since it was scanned, is dropped from the result and
//! logged; the rest of the batch carries on.

use log::{debug, info, warn};
use rayon::prelude::*;
use std::fs;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Instant;

use super::cache::{CacheKey, SignatureCache};
use super::minhash::{MinHasher, Signature};
use crate::error::{Error, Result};
use crate::logging::log_file_error;
use crate::types::FileRecord;

/// Called once per record after it has been handled, whether or not it produced a signature
pub type ProgressFn<'a> = dyn Fn(&FileRecord) + Sync + 'a;

/// Attach a signature to every record, preserving input order.
///
/// Returns `Error::Interrupted` if `shutdown` is raised before the batch finishes.
pub fn fingerprint_all(
    records: Vec<FileRecord>,
    hasher: &MinHasher,
    cache: &SignatureCache,
    shutdown: &AtomicBool,
    progress: Option<&ProgressFn>,
) -> Result<Vec<FileRecord>> {
    let start = Instant::now();
    let total = records.len();
    let errors = AtomicUsize::new(0);

    let fingerprinted: Vec<FileRecord> = records
        .into_par_iter()
        .filter_map(|mut record| {
            if shutdown.load(Ordering::Relaxed) {
                return None;
            }

            let outcome = if record.has_signature() {
                Ok(())
            } else {
                signature_for(&record, hasher, cache)
                    .and_then(|signature| record.attach_signature(signature))
            };

            if let Some(report) = progress {
                report(&record);
            }

            match outcome {
                Ok(()) => Some(record),
                Err(e) => {
                    errors.fetch_add(1, Ordering::Relaxed);
                    log_file_error(&record.path, "fingerprint", &e);
                    None
                }
            }
        })
        .collect();

    if shutdown.load(Ordering::Relaxed) {
        warn!(
            "Fingerprinting interrupted after {} of {} files",
            fingerprinted.len(),
            total
        );
        return Err(Error::Interrupted);
    }

    info!(
        "Fingerprinted {} of {} files in {:.2?} ({} errors)",
        fingerprinted.len(),
        total,
        start.elapsed(),
        errors.load(Ordering::Relaxed)
    );

    Ok(fingerprinted)
}

/// Signature of one record's current content, via the cache
pub fn signature_for(
    record: &FileRecord,
    hasher: &MinHasher,
    cache: &SignatureCache,
) -> Result<Signature> {
    let key = CacheKey::for_record(record);

    cache.get_or_compute(&key, hasher.params(), || {
        let metadata = fs::metadata(&record.path)?;
        if metadata.len() != record.size || metadata.modified()? != record.modified {
            return Err(Error::SafetyCheck(format!(
                "{} changed since it was scanned",
                record.path.display()
            )));
        }

        let bytes = fs::read(&record.path)?;
        debug!("Hashing {} ({} bytes)", record.path.display(), bytes.len());
        Ok(hasher.fingerprint(&String::from_utf8_lossy(&bytes)))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::MinHashParams;
    use crate::types::FileId;
    use std::path::Path;
    use tempfile::tempdir;

    fn record(id: u64, path: &Path) -> FileRecord {
        let canonical = path.canonicalize().unwrap();
        let metadata = fs::metadata(&canonical).unwrap();
        FileRecord::from_metadata(FileId(id), &canonical, path, &metadata).unwrap()
    }

    fn hasher() -> MinHasher {
        MinHasher::new(MinHashParams::default()).unwrap()
    }

    #[test]
    fn test_order_preserved_and_signed() {
        let dir = tempdir().unwrap();
        let mut records = Vec::new();
        for i in 0..8 {
            let path = dir.path().join(format!("f{}.txt", i));
            fs::write(&path, format!("document number {} with some text", i)).unwrap();
            records.push(record(i, &path));
        }

        let cache = SignatureCache::new();
        let shutdown = AtomicBool::new(false);
        let out = fingerprint_all(records, &hasher(), &cache, &shutdown, None).unwrap();

        let ids: Vec<u64> = out.iter().map(|r| r.id.0).collect();
        assert_eq!(ids, (0..8).collect::<Vec<_>>());
        assert!(out.iter().all(|r| r.has_signature()));
        assert_eq!(cache.len(), 8);
    }

    #[test]
    fn test_unreadable_file_dropped() {
        let dir = tempdir().unwrap();
        let keep = dir.path().join("keep.txt");
        let gone = dir.path().join("gone.txt");
        fs::write(&keep, "still here").unwrap();
        fs::write(&gone, "about to vanish").unwrap();

        let records = vec![record(0, &keep), record(1, &gone)];
        fs::remove_file(&gone).unwrap();

        let cache = SignatureCache::new();
        let shutdown = AtomicBool::new(false);
        let out = fingerprint_all(records, &hasher(), &cache, &shutdown, None).unwrap();

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].id, FileId(0));
    }

    #[test]
    fn test_second_pass_hits_cache() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.txt");
        fs::write(&path, "cached content").unwrap();

        let cache = SignatureCache::new();
        let shutdown = AtomicBool::new(false);
        fingerprint_all(vec![record(0, &path)], &hasher(), &cache, &shutdown, None).unwrap();
        fingerprint_all(vec![record(0, &path)], &hasher(), &cache, &shutdown, None).unwrap();

        assert_eq!(cache.stats().hits, 1);
    }

    #[test]
    fn test_progress_called_per_record() {
        let dir = tempdir().unwrap();
        let mut records = Vec::new();
        for i in 0..5 {
            let path = dir.path().join(format!("p{}.txt", i));
            fs::write(&path, "progress").unwrap();
            records.push(record(i, &path));
        }

        let seen = AtomicUsize::new(0);
        let report = |_: &FileRecord| {
            seen.fetch_add(1, Ordering::Relaxed);
        };
        let shutdown = AtomicBool::new(false);
        fingerprint_all(records, &hasher(), &SignatureCache::new(), &shutdown, Some(&report))
            .unwrap();

        assert_eq!(seen.load(Ordering::Relaxed), 5);
    }

    #[test]
    fn test_shutdown_interrupts() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.txt");
        fs::write(&path, "text").unwrap();

        let shutdown = AtomicBool::new(true);
        let result = fingerprint_all(
            vec![record(0, &path)],
            &hasher(),
            &SignatureCache::new(),
            &shutdown,
            None,
        );
        assert!(matches!(result, Err(Error::Interrupted)));
    }
}

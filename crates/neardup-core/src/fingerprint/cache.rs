use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;

use super::minhash::{MinHashParams, Signature};
use crate::types::FileRecord;

/// Identity of one version of a file's content
///
/// Any change to size or mtime produces a different key, so a stale entry is
/// never returned for a modified file.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub path: PathBuf,
    pub size: u64,
    pub modified: SystemTime,
}

impl CacheKey {
    pub fn for_record(record: &FileRecord) -> Self {
        Self {
            path: record.path.clone(),
            size: record.size,
            modified: record.modified,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    pub hits: usize,
    pub misses: usize,
    pub entries: usize,
}

/// Session-scoped signature cache, shared by the fingerprinting workers
#[derive(Debug, Default)]
pub struct SignatureCache {
    entries: Mutex<HashMap<CacheKey, Signature>>,
    hits: AtomicUsize,
    misses: AtomicUsize,
}

impl SignatureCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<CacheKey, Signature>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Cached signature for `key`, only if it was built with `params`
    pub fn get(&self, key: &CacheKey, params: MinHashParams) -> Option<Signature> {
        let found = self
            .lock()
            .get(key)
            .filter(|sig| sig.params() == params)
            .cloned();

        match found {
            Some(_) => self.hits.fetch_add(1, Ordering::Relaxed),
            None => self.misses.fetch_add(1, Ordering::Relaxed),
        };
        found
    }

    pub fn insert(&self, key: CacheKey, signature: Signature) {
        self.lock().insert(key, signature);
    }

    /// Return the cached signature or compute and store it.
    ///
    /// The lock is not held while `compute` runs.
    pub fn get_or_compute<E>(
        &self,
        key: &CacheKey,
        params: MinHashParams,
        compute: impl FnOnce() -> Result<Signature, E>,
    ) -> Result<Signature, E> {
        if let Some(signature) = self.get(key, params) {
            return Ok(signature);
        }

        let signature = compute()?;
        self.insert(key.clone(), signature.clone());
        Ok(signature)
    }

    /// Drop entries whose key is not in `present`. Returns the number evicted.
    pub fn retain_present(&self, present: &HashSet<CacheKey>) -> usize {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|key, _| present.contains(key));
        before - entries.len()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.len(),
        }
    }
}

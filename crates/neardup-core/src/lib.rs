//! Core functionality for finding and consolidating near-duplicate text files.
//!
//! This library provides the components of the pipeline:
//! - File discovery with hardened symlink resolution and text admissibility checks
//! - MinHash fingerprinting with a session-scoped signature cache
//! - Similarity graph construction and incremental duplicate grouping
//! - Keeper selection and transactional, rollback-capable moves and deletes

// -- External Dependencies --

use log::{info, warn};
use serde::Serialize;
use std::collections::HashSet;
use std::{
    path::Path,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

// -- Internal Modules --
mod error;

// -- Public Re-exports --
pub use config::*;
pub use error::{Error, ResolutionError, Result, TargetFailure, ValidationFailure};
pub use types::*;

// -- Public Modules --
pub mod config;
pub mod discovery;
pub mod filter;
pub mod fingerprint;
pub mod graph;
pub mod logging;
pub mod resolver;
pub mod retention;
pub mod safety;
pub mod types;

use discovery::Scanner;
use fingerprint::{CacheKey, MinHasher, ProgressFn, SignatureCache};
use graph::{DuplicateGroup, SimilarityGraph};
use retention::KeeperSelection;
use safety::SafetyManager;

/// Everything a non-interactive run did
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub admitted: usize,
    pub fingerprinted: usize,
    /// Groups as first found
    pub groups: Vec<DuplicateGroup>,
    pub keepers: Vec<KeeperSelection>,
    pub batches: Vec<BatchResult>,
    /// Batches that were refused before touching anything
    pub errors: Vec<String>,
    /// Groups left after applying the batches
    pub remaining: Vec<DuplicateGroup>,
}

/// Main entry point for a detection session
pub struct NearDup {
    config: Config,
    hasher: MinHasher,
    cache: SignatureCache,
    safety_manager: SafetyManager,
    shutdown_requested: Arc<AtomicBool>,
}

impl NearDup {
    /// Create a new session with the provided configuration
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;

        let shutdown_requested = Arc::new(AtomicBool::new(false));
        let hasher = MinHasher::new(config.minhash_params())?;
        let safety_manager =
            SafetyManager::new(&config).with_shutdown(Arc::clone(&shutdown_requested));

        Ok(Self {
            config,
            hasher,
            cache: SignatureCache::new(),
            safety_manager,
            shutdown_requested,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn cache(&self) -> &SignatureCache {
        &self.cache
    }

    /// Flag checked between files and before each batch
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown_requested)
    }

    pub fn request_shutdown(&self) {
        self.shutdown_requested.store(true, Ordering::SeqCst);
    }

    pub fn scanner(&self) -> Result<Scanner> {
        Ok(Scanner::new(&self.config)?.with_shutdown(self.shutdown_flag()))
    }

    /// Discover and admit text files under `paths`.
    ///
    /// Cache entries for files not found by this scan are evicted.
    pub fn scan(&self, paths: &[impl AsRef<Path>]) -> Result<Vec<FileRecord>> {
        let records = self.scanner()?.scan(paths)?;

        let present: HashSet<CacheKey> = records.iter().map(CacheKey::for_record).collect();
        let evicted = self.cache.retain_present(&present);
        if evicted > 0 {
            info!("Evicted {} stale signature cache entries", evicted);
        }
        Ok(records)
    }

    /// Attach signatures to all records in parallel
    pub fn fingerprint_all(&self, records: Vec<FileRecord>) -> Result<Vec<FileRecord>> {
        self.fingerprint_all_with_progress(records, None)
    }

    pub fn fingerprint_all_with_progress(
        &self,
        records: Vec<FileRecord>,
        progress: Option<&ProgressFn>,
    ) -> Result<Vec<FileRecord>> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.worker_threads())
            .build()
            .map_err(|e| Error::Configuration(format!("Failed to build thread pool: {}", e)))?;

        pool.install(|| {
            fingerprint::fingerprint_all(
                records,
                &self.hasher,
                &self.cache,
                &self.shutdown_requested,
                progress,
            )
        })
    }

    /// Build the similarity graph and its ordered groups
    pub fn build_groups(
        &self,
        records: Vec<FileRecord>,
    ) -> Result<(SimilarityGraph, Vec<DuplicateGroup>)> {
        let graph = SimilarityGraph::build(records, self.config.threshold)?;
        let groups = graph.groups();
        info!("Found {} duplicate groups", groups.len());
        Ok((graph, groups))
    }

    /// Regroup after files left the tree, without re-fingerprinting
    pub fn update_groups(
        &self,
        graph: &mut SimilarityGraph,
        current: &[DuplicateGroup],
        removed: &[FileId],
    ) -> Vec<DuplicateGroup> {
        graph.update_groups(current, removed)
    }

    pub fn propose_keeper(&self, group: &DuplicateGroup) -> Option<KeeperSelection> {
        retention::propose(group, &self.config.retention)
    }

    /// Move or delete `targets` as one batch, honoring `dry_run`
    pub fn mutate(
        &mut self,
        action: ActionType,
        targets: &[FileRecord],
        group_id: usize,
    ) -> Result<BatchResult> {
        self.safety_manager.execute(action, targets, group_id)
    }

    /// Apply a keeper selection: act on every non-keeper of `group`
    pub fn mutate_group(
        &mut self,
        action: ActionType,
        group: &DuplicateGroup,
        selection: &KeeperSelection,
    ) -> Result<BatchResult> {
        self.safety_manager.execute_for_group(action, &selection.act_upon, group)
    }

    pub fn queue_move(&mut self, targets: Vec<FileRecord>, group_id: usize) -> BatchId {
        self.safety_manager.queue_move(targets, group_id)
    }

    /// Queue the non-keepers of `group` for moving, laid out below the group's root
    pub fn queue_group_move(
        &mut self,
        group: &DuplicateGroup,
        selection: &KeeperSelection,
    ) -> BatchId {
        self.safety_manager.queue_group_move(selection.act_upon.clone(), group)
    }

    pub fn flush(&mut self) -> Vec<Result<BatchResult>> {
        self.safety_manager.flush()
    }

    /// Run the full pipeline. With `action = None` groups are only reported.
    pub fn run(
        &mut self,
        paths: &[impl AsRef<Path>],
        action: Option<ActionType>,
    ) -> Result<RunReport> {
        self.run_with_progress(paths, action, None)
    }

    pub fn run_with_progress(
        &mut self,
        paths: &[impl AsRef<Path>],
        action: Option<ActionType>,
        progress: Option<&ProgressFn>,
    ) -> Result<RunReport> {
        info!("Scanning {} roots...", paths.len());
        let records = self.scan(paths)?;
        let admitted = records.len();

        let records = self.fingerprint_all_with_progress(records, progress)?;
        let fingerprinted = records.len();

        let (mut graph, groups) = self.build_groups(records)?;

        let proposals: Vec<(&DuplicateGroup, KeeperSelection)> = groups
            .iter()
            .filter_map(|group| self.propose_keeper(group).map(|k| (group, k)))
            .collect();

        let mut outcomes = Vec::new();
        match action {
            None => {}
            Some(ActionType::Move) => {
                for (group, selection) in &proposals {
                    self.queue_group_move(group, selection);
                }
                outcomes = self.flush();
            }
            Some(ActionType::Delete) => {
                for (group, selection) in &proposals {
                    let outcome = self.mutate_group(ActionType::Delete, group, selection);
                    let stop = matches!(outcome, Err(Error::Interrupted));
                    outcomes.push(outcome);
                    if stop {
                        break;
                    }
                }
            }
        }

        let mut batches = Vec::new();
        let mut errors = Vec::new();
        for outcome in outcomes {
            match outcome {
                Ok(batch) => batches.push(batch),
                Err(e) => {
                    warn!("{}", e);
                    errors.push(e.to_string());
                }
            }
        }

        let keepers: Vec<KeeperSelection> = proposals.into_iter().map(|(_, k)| k).collect();
        let removed: Vec<FileId> = batches.iter().flat_map(|b| b.removed_ids()).collect();
        let remaining = graph.update_groups(&groups, &removed);

        Ok(RunReport {
            admitted,
            fingerprinted,
            groups,
            keepers,
            batches,
            errors,
            remaining,
        })
    }
}

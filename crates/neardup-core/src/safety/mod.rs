//! Transactional moves and deletes.
//!
//! A batch goes through Validated → Staged → Committed, or ends RolledBack.
//!
//! 1. **Validate**: every target is still the regular file that was scanned,
//!    it and its directory are writable, each move has a free destination and
//!    the holding volume has room. Any failure aborts before anything is touched.
//! 2. **Stage**: moves hard-link (or copy) each source to its destination.
//!    Deletes have nothing to stage.
//! 3. **Commit**: unlink each source (move) or target (delete). If step `k`
//!    fails, moved files `0..k` are restored from their staged copies and the
//!    remaining staged copies are removed. Deleted files cannot come back and
//!    are reported as rollback failures.

mod access;
mod ops;
mod plan;

pub use access::{can_write, check_removable};
pub use ops::{FileOps, OsFileOps};
pub use plan::{common_ancestor, plan_destinations, structure_base};

use chrono::Local;
use log::{debug, info, warn};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::config::Config;
use crate::error::{Error, Result, TargetFailure, ValidationFailure};
use crate::graph::DuplicateGroup;
use crate::logging::{log_fs_modification, log_outcome};
use crate::resolver::ensure_regular_file;
use crate::types::{
    ActionResult, ActionType, BatchId, BatchResult, BatchState, FileRecord, Outcome,
};

/// Minimum headroom required on the holding volume beyond the batch size
const MIN_SPACE_MARGIN: u64 = 1024 * 1024;

#[derive(Debug, Clone)]
pub struct SafetyConfig {
    pub holding_dir: PathBuf,
    pub preserve_structure: bool,
    pub dry_run: bool,
}

impl SafetyConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            holding_dir: config.holding_dir.clone(),
            preserve_structure: config.preserve_structure,
            dry_run: config.dry_run,
        }
    }
}

/// A move batch waiting for `flush`
#[derive(Debug, Clone)]
pub struct PendingOperation {
    pub batch_id: BatchId,
    pub action: ActionType,
    pub group_id: usize,
    pub targets: Vec<FileRecord>,
    /// Directory the holding layout is relative to, if structure is preserved
    pub base: Option<PathBuf>,
    pub dry_run: bool,
}

struct Step<'a> {
    record: &'a FileRecord,
    destination: Option<PathBuf>,
    outcome: Outcome,
}

pub struct SafetyManager<F: FileOps = OsFileOps> {
    config: SafetyConfig,
    ops: F,
    next_batch: u64,
    pending: Vec<PendingOperation>,
    shutdown: Option<Arc<AtomicBool>>,
}

impl SafetyManager<OsFileOps> {
    /// Create a new SafetyManager with the provided configuration
    pub fn new(config: &Config) -> Self {
        Self::with_ops(SafetyConfig::from_config(config), OsFileOps)
    }
}

impl<F: FileOps> SafetyManager<F> {
    pub fn with_ops(config: SafetyConfig, ops: F) -> Self {
        Self {
            config,
            ops,
            next_batch: 1,
            pending: Vec::new(),
            shutdown: None,
        }
    }

    /// Stop committing new batches once `flag` is raised
    pub fn with_shutdown(mut self, flag: Arc<AtomicBool>) -> Self {
        self.shutdown = Some(flag);
        self
    }

    pub fn config(&self) -> &SafetyConfig {
        &self.config
    }

    pub fn ops(&self) -> &F {
        &self.ops
    }

    /// Run one batch now. `group_id` names the holding subdirectory for moves,
    /// whose layout is relative to the targets' shared directory.
    ///
    /// Validation problems return `Err` with nothing touched; failures during
    /// staging or commit are reported per target in the `BatchResult`.
    pub fn execute(
        &mut self,
        action: ActionType,
        targets: &[FileRecord],
        group_id: usize,
    ) -> Result<BatchResult> {
        let base = self.base_for(targets);
        let batch_id = self.allocate_batch();
        let dry_run = self.config.dry_run;
        self.run_batch(batch_id, action, targets, group_id, base.as_deref(), dry_run)
    }

    /// Like `execute`, with the holding layout relative to the whole group,
    /// so a lone moved file still keeps its directory below the group's root.
    pub fn execute_for_group(
        &mut self,
        action: ActionType,
        targets: &[FileRecord],
        group: &DuplicateGroup,
    ) -> Result<BatchResult> {
        let base = self.base_for(&group.members);
        let batch_id = self.allocate_batch();
        let dry_run = self.config.dry_run;
        self.run_batch(batch_id, action, targets, group.id, base.as_deref(), dry_run)
    }

    /// Defer a move batch until `flush`
    pub fn queue_move(&mut self, targets: Vec<FileRecord>, group_id: usize) -> BatchId {
        let base = self.base_for(&targets);
        self.enqueue(targets, group_id, base)
    }

    /// Defer a move of `targets` out of `group` until `flush`
    pub fn queue_group_move(
        &mut self,
        targets: Vec<FileRecord>,
        group: &DuplicateGroup,
    ) -> BatchId {
        let base = self.base_for(&group.members);
        self.enqueue(targets, group.id, base)
    }

    fn enqueue(
        &mut self,
        targets: Vec<FileRecord>,
        group_id: usize,
        base: Option<PathBuf>,
    ) -> BatchId {
        let batch_id = self.allocate_batch();
        debug!(
            "Queued move batch {} for group {} ({} files)",
            batch_id,
            group_id,
            targets.len()
        );
        self.pending.push(PendingOperation {
            batch_id,
            action: ActionType::Move,
            group_id,
            targets,
            base,
            dry_run: self.config.dry_run,
        });
        batch_id
    }

    pub fn pending(&self) -> &[PendingOperation] {
        &self.pending
    }

    /// Drop every queued batch without running it
    pub fn discard_pending(&mut self) -> Vec<PendingOperation> {
        std::mem::take(&mut self.pending)
    }

    /// Run every queued batch in order. Each batch succeeds or fails on its own.
    pub fn flush(&mut self) -> Vec<Result<BatchResult>> {
        let pending = std::mem::take(&mut self.pending);
        info!("Flushing {} pending batches", pending.len());

        pending
            .into_iter()
            .map(|op| {
                let result = self.run_batch(
                    op.batch_id,
                    op.action,
                    &op.targets,
                    op.group_id,
                    op.base.as_deref(),
                    op.dry_run,
                );
                if let Err(e) = &result {
                    warn!("Batch {} not applied: {}", op.batch_id, e);
                }
                result
            })
            .collect()
    }

    fn base_for(&self, files: &[FileRecord]) -> Option<PathBuf> {
        if self.config.preserve_structure {
            structure_base(files)
        } else {
            None
        }
    }

    fn allocate_batch(&mut self) -> BatchId {
        let id = BatchId(self.next_batch);
        self.next_batch += 1;
        id
    }

    fn interrupted(&self) -> bool {
        self.shutdown
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }

    fn run_batch(
        &self,
        batch_id: BatchId,
        action: ActionType,
        targets: &[FileRecord],
        group_id: usize,
        base: Option<&Path>,
        dry_run: bool,
    ) -> Result<BatchResult> {
        let started_at = Local::now();
        if self.interrupted() {
            return Err(Error::Interrupted);
        }

        let destinations = self.validate(batch_id, action, targets, group_id, base)?;
        let mut steps: Vec<Step> = targets
            .iter()
            .zip(destinations)
            .map(|(record, destination)| Step {
                record,
                destination,
                outcome: Outcome::Planned,
            })
            .collect();

        let state = if dry_run {
            info!(
                "Dry run: batch {} would {} {} files",
                batch_id,
                action,
                steps.len()
            );
            BatchState::Validated
        } else if !self.stage(&mut steps) {
            BatchState::RolledBack
        } else if self.interrupted() {
            warn!("Batch {} interrupted before commit", batch_id);
            self.unstage(&mut steps, Outcome::Skipped);
            BatchState::RolledBack
        } else {
            self.commit(action, &mut steps)
        };

        let results: Vec<ActionResult> = steps
            .into_iter()
            .map(|step| ActionResult {
                action_type: action,
                file_id: step.record.id,
                target: step.record.path.clone(),
                destination: step.destination,
                outcome: step.outcome,
            })
            .collect();

        for result in &results {
            log_outcome(batch_id, result);
        }

        Ok(BatchResult {
            batch_id,
            action_type: action,
            dry_run,
            state,
            results,
            started_at,
            finished_at: Local::now(),
        })
    }

    /// Check every precondition; returns the planned destination of each target
    fn validate(
        &self,
        batch_id: BatchId,
        action: ActionType,
        targets: &[FileRecord],
        group_id: usize,
        base: Option<&Path>,
    ) -> Result<Vec<Option<PathBuf>>> {
        if targets.is_empty() {
            return Err(Error::SafetyCheck(format!(
                "batch {} has no targets",
                batch_id
            )));
        }

        let mut failures = Vec::new();
        let mut seen = HashSet::new();
        for target in targets {
            let check = if seen.insert(target.path.as_path()) {
                check_target(target)
            } else {
                Err("listed more than once in the batch".to_string())
            };
            if let Err(reason) = check {
                failures.push(TargetFailure {
                    path: target.path.clone(),
                    reason,
                });
            }
        }

        let destinations = match action {
            ActionType::Delete => vec![None; targets.len()],
            ActionType::Move => {
                plan_destinations(targets, &self.config.holding_dir, group_id, base)
                    .into_iter()
                    .map(Some)
                    .collect()
            }
        };

        for (target, destination) in targets.iter().zip(&destinations) {
            if let Some(destination) = destination {
                if fs::symlink_metadata(destination).is_ok() {
                    failures.push(TargetFailure {
                        path: target.path.clone(),
                        reason: format!("destination {} already exists", destination.display()),
                    });
                }
            }
        }

        if !failures.is_empty() {
            return Err(ValidationFailure {
                batch: batch_id,
                failures,
            }
            .into());
        }

        if action == ActionType::Move {
            self.check_space(targets)?;
        }

        debug!("Batch {} validated ({} targets)", batch_id, targets.len());
        Ok(destinations)
    }

    fn check_space(&self, targets: &[FileRecord]) -> Result<()> {
        let total: u64 = targets.iter().map(|t| t.size).sum();
        let required = total + (total / 20).max(MIN_SPACE_MARGIN);

        match self.ops.available_space(&self.config.holding_dir)? {
            Some(available) if available < required => Err(Error::DiskSpace {
                path: self.config.holding_dir.clone(),
                required,
                available,
            }),
            Some(_) => Ok(()),
            None => {
                warn!(
                    "Free space at {} is unknown; skipping space check",
                    self.config.holding_dir.display()
                );
                Ok(())
            }
        }
    }

    /// Link or copy each move source into place. On failure, undo and return false.
    fn stage(&self, steps: &mut [Step]) -> bool {
        for i in 0..steps.len() {
            let record = steps[i].record;
            let Some(destination) = steps[i].destination.clone() else {
                continue;
            };

            let staged = destination
                .parent()
                .map_or(Ok(()), |parent| self.ops.create_dir_all(parent))
                .and_then(|_| self.ops.link_or_copy(&record.path, &destination));

            let verified = staged.map_err(|e| e.to_string()).and_then(|_| {
                match fs::metadata(&destination) {
                    Ok(m) if m.len() == record.size => Ok(()),
                    Ok(m) => {
                        let _ = self.ops.remove_file(&destination);
                        Err(format!(
                            "staged copy has {} bytes, expected {}",
                            m.len(),
                            record.size
                        ))
                    }
                    Err(e) => Err(e.to_string()),
                }
            });

            if let Err(reason) = verified {
                warn!("Staging {} failed: {}", record.path.display(), reason);
                steps[i].outcome = Outcome::Failed(reason);
                for step in &mut steps[i + 1..] {
                    step.outcome = Outcome::Skipped;
                }
                self.unstage(&mut steps[..i], Outcome::RolledBack);
                return false;
            }

            debug!(
                "Staged {} at {}",
                record.path.display(),
                destination.display()
            );
        }
        true
    }

    /// Remove staged copies, leaving sources untouched
    fn unstage(&self, steps: &mut [Step], outcome: Outcome) {
        for step in steps {
            step.outcome = match &step.destination {
                Some(destination) => match self.ops.remove_file(destination) {
                    Ok(()) => outcome.clone(),
                    Err(e) => Outcome::RollbackFailed(format!(
                        "could not remove staged copy {}: {}",
                        destination.display(),
                        e
                    )),
                },
                None => outcome.clone(),
            };
        }
    }

    fn commit(&self, action: ActionType, steps: &mut [Step]) -> BatchState {
        for k in 0..steps.len() {
            let record = steps[k].record;
            let path = &record.path;
            match self.ops.remove_file(path) {
                Ok(()) => {
                    let details = steps[k]
                        .destination
                        .as_ref()
                        .map(|d| format!("to {}", d.display()));
                    log_fs_modification(&action.to_string(), path, details.as_deref());
                    steps[k].outcome = Outcome::Succeeded;
                }
                Err(e) => {
                    warn!(
                        "Commit failed at step {} ({}): {}; rolling back",
                        k,
                        path.display(),
                        e
                    );
                    self.roll_back(action, steps, k, e.to_string());
                    return BatchState::RolledBack;
                }
            }
        }
        BatchState::Committed
    }

    fn roll_back(&self, action: ActionType, steps: &mut [Step], failed: usize, reason: String) {
        for step in &mut steps[..failed] {
            step.outcome = match (action, &step.destination) {
                (ActionType::Move, Some(destination)) => {
                    match self.restore(destination, &step.record.path) {
                        Ok(()) => {
                            log_fs_modification(
                                "restore",
                                &step.record.path,
                                Some(&format!("from {}", destination.display())),
                            );
                            Outcome::RolledBack
                        }
                        Err(e) => Outcome::RollbackFailed(e.to_string()),
                    }
                }
                _ => Outcome::RollbackFailed("deleted files cannot be restored".to_string()),
            };
        }

        let (current, rest) = steps[failed..].split_at_mut(1);
        if let Some(destination) = &current[0].destination {
            if let Err(e) = self.ops.remove_file(destination) {
                warn!(
                    "Could not remove staged copy {}: {}",
                    destination.display(),
                    e
                );
            }
        }
        current[0].outcome = Outcome::Failed(reason);
        self.unstage(rest, Outcome::Skipped);
    }

    /// Put a staged copy back at its original path
    fn restore(&self, staged: &Path, original: &Path) -> std::io::Result<()> {
        self.ops.rename(staged, original).or_else(|_| {
            self.ops.link_or_copy(staged, original)?;
            self.ops.remove_file(staged)
        })
    }
}

/// Target must be the regular file that was scanned, in a writable location
fn check_target(target: &FileRecord) -> std::result::Result<(), String> {
    let metadata = ensure_regular_file(&target.path).map_err(|e| e.to_string())?;

    if metadata.len() != target.size {
        return Err(format!(
            "size changed since scan ({} -> {} bytes)",
            target.size,
            metadata.len()
        ));
    }
    if metadata.modified().map_err(|e| e.to_string())? != target.modified {
        return Err("modified since scan".to_string());
    }
    check_removable(&target.path, &metadata)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FileId;
    use std::io;
    use std::sync::atomic::AtomicUsize;
    use tempfile::{tempdir, TempDir};

    /// Real file system with injectable failures
    #[derive(Default)]
    struct FaultyOps {
        fail_remove_at: Option<usize>,
        fail_link_at: Option<usize>,
        space: Option<u64>,
        removes: AtomicUsize,
        links: AtomicUsize,
    }

    fn injected() -> io::Error {
        io::Error::new(io::ErrorKind::Other, "injected failure")
    }

    impl FileOps for FaultyOps {
        fn link_or_copy(&self, from: &Path, to: &Path) -> io::Result<()> {
            let n = self.links.fetch_add(1, Ordering::SeqCst);
            if self.fail_link_at == Some(n) {
                return Err(injected());
            }
            OsFileOps.link_or_copy(from, to)
        }

        fn remove_file(&self, path: &Path) -> io::Result<()> {
            let n = self.removes.fetch_add(1, Ordering::SeqCst);
            if self.fail_remove_at == Some(n) {
                return Err(injected());
            }
            OsFileOps.remove_file(path)
        }

        fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
            OsFileOps.rename(from, to)
        }

        fn create_dir_all(&self, path: &Path) -> io::Result<()> {
            OsFileOps.create_dir_all(path)
        }

        fn available_space(&self, _path: &Path) -> io::Result<Option<u64>> {
            Ok(self.space)
        }
    }

    struct Fixture {
        dir: TempDir,
        records: Vec<FileRecord>,
    }

    impl Fixture {
        fn new(count: usize) -> Self {
            let dir = tempdir().unwrap();
            let mut records = Vec::new();
            for i in 0..count {
                let sub = dir.path().join("data").join(format!("d{}", i));
                fs::create_dir_all(&sub).unwrap();
                let path = sub.join("doc.txt");
                fs::write(&path, format!("duplicate body {}", i)).unwrap();
                let canonical = path.canonicalize().unwrap();
                let metadata = fs::metadata(&canonical).unwrap();
                records.push(
                    FileRecord::from_metadata(FileId(i as u64), &canonical, &path, &metadata)
                        .unwrap(),
                );
            }
            Self { dir, records }
        }

        fn holding(&self) -> PathBuf {
            self.dir.path().join("holding")
        }

        fn manager(&self, ops: FaultyOps, dry_run: bool) -> SafetyManager<FaultyOps> {
            let config = SafetyConfig {
                holding_dir: self.holding(),
                preserve_structure: true,
                dry_run,
            };
            SafetyManager::with_ops(config, ops)
        }

        fn sources_intact(&self) -> bool {
            self.records.iter().enumerate().all(|(i, r)| {
                fs::read_to_string(&r.path).ok() == Some(format!("duplicate body {}", i))
            })
        }

        fn holding_files(&self) -> usize {
            if !self.holding().exists() {
                return 0;
            }
            walkdir::WalkDir::new(self.holding())
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file())
                .count()
        }
    }

    fn outcomes(result: &BatchResult) -> Vec<Outcome> {
        result.results.iter().map(|r| r.outcome.clone()).collect()
    }

    #[test]
    fn test_move_commits() {
        let fx = Fixture::new(2);
        let mut manager = fx.manager(FaultyOps::default(), false);

        let result = manager.execute(ActionType::Move, &fx.records, 4).unwrap();
        assert_eq!(result.state, BatchState::Committed);
        assert_eq!(outcomes(&result), vec![Outcome::Succeeded, Outcome::Succeeded]);

        for (i, r) in result.results.iter().enumerate() {
            assert!(!r.target.exists());
            let destination = r.destination.as_ref().unwrap();
            assert!(destination.starts_with(fx.holding().join("group_4")));
            assert_eq!(
                fs::read_to_string(destination).unwrap(),
                format!("duplicate body {}", i)
            );
        }
        assert_eq!(
            result.results[0].destination.as_ref().unwrap(),
            &fx.holding().join("group_4").join("d0").join("doc.txt")
        );
    }

    #[test]
    fn test_group_move_keeps_layout_below_group_root() {
        let fx = Fixture::new(2);
        let group = DuplicateGroup {
            id: 5,
            members: fx.records.clone(),
            similarity: 1.0,
            edge_count: 1,
        };
        let mut manager = fx.manager(FaultyOps::default(), false);

        let result = manager
            .execute_for_group(ActionType::Move, &fx.records[1..], &group)
            .unwrap();
        assert!(result.is_committed());
        assert_eq!(
            result.results[0].destination.as_ref().unwrap(),
            &fx.holding().join("group_5").join("d1").join("doc.txt")
        );
        assert!(fx.records[0].path.exists());
    }

    #[test]
    fn test_queued_group_move_keeps_layout() {
        let fx = Fixture::new(2);
        let group = DuplicateGroup {
            id: 1,
            members: fx.records.clone(),
            similarity: 1.0,
            edge_count: 1,
        };
        let mut manager = fx.manager(FaultyOps::default(), false);

        manager.queue_group_move(fx.records[1..].to_vec(), &group);
        assert_eq!(
            manager.pending()[0].base.as_deref(),
            fx.records[0].path.parent().and_then(Path::parent)
        );

        let results = manager.flush();
        let batch = results[0].as_ref().unwrap();
        assert_eq!(
            batch.results[0].destination.as_ref().unwrap(),
            &fx.holding().join("group_1").join("d1").join("doc.txt")
        );
    }

    #[test]
    fn test_delete_commits() {
        let fx = Fixture::new(2);
        let mut manager = fx.manager(FaultyOps::default(), false);

        let result = manager.execute(ActionType::Delete, &fx.records, 1).unwrap();
        assert!(result.is_committed());
        assert!(fx.records.iter().all(|r| !r.path.exists()));
        assert_eq!(result.removed_ids(), vec![FileId(0), FileId(1)]);
        assert_eq!(fx.holding_files(), 0);
    }

    #[test]
    fn test_dry_run_touches_nothing() {
        let fx = Fixture::new(2);
        let mut manager = fx.manager(FaultyOps::default(), true);

        let result = manager.execute(ActionType::Move, &fx.records, 1).unwrap();
        assert!(result.dry_run);
        assert_eq!(result.state, BatchState::Validated);
        assert_eq!(outcomes(&result), vec![Outcome::Planned, Outcome::Planned]);
        assert!(result.results.iter().all(|r| r.destination.is_some()));
        assert!(result.removed_ids().is_empty());

        assert!(fx.sources_intact());
        assert!(!fx.holding().exists());
    }

    #[test]
    fn test_move_commit_failure_rolls_back() {
        let fx = Fixture::new(3);
        let ops = FaultyOps {
            fail_remove_at: Some(1),
            ..Default::default()
        };
        let mut manager = fx.manager(ops, false);

        let result = manager.execute(ActionType::Move, &fx.records, 1).unwrap();
        assert_eq!(result.state, BatchState::RolledBack);
        assert_eq!(
            outcomes(&result),
            vec![
                Outcome::RolledBack,
                Outcome::Failed("injected failure".to_string()),
                Outcome::Skipped
            ]
        );
        assert!(fx.sources_intact());
        assert_eq!(fx.holding_files(), 0);
        assert!(result.removed_ids().is_empty());
    }

    #[test]
    fn test_move_rollback_at_every_step() {
        for k in 0..3 {
            let fx = Fixture::new(3);
            let ops = FaultyOps {
                fail_remove_at: Some(k),
                ..Default::default()
            };
            let mut manager = fx.manager(ops, false);
            let result = manager.execute(ActionType::Move, &fx.records, 1).unwrap();

            assert_eq!(result.state, BatchState::RolledBack, "k = {}", k);
            assert!(fx.sources_intact(), "k = {}", k);
            assert_eq!(fx.holding_files(), 0, "k = {}", k);
        }
    }

    #[test]
    fn test_delete_commit_failure_reports_irreversible() {
        let fx = Fixture::new(3);
        let ops = FaultyOps {
            fail_remove_at: Some(1),
            ..Default::default()
        };
        let mut manager = fx.manager(ops, false);

        let result = manager.execute(ActionType::Delete, &fx.records, 1).unwrap();
        assert_eq!(result.state, BatchState::RolledBack);
        let out = outcomes(&result);
        assert!(matches!(out[0], Outcome::RollbackFailed(_)));
        assert!(matches!(out[1], Outcome::Failed(_)));
        assert_eq!(out[2], Outcome::Skipped);

        assert!(!fx.records[0].path.exists());
        assert!(fx.records[1].path.exists());
        assert!(fx.records[2].path.exists());
        assert_eq!(result.removed_ids(), vec![FileId(0)]);
        assert_eq!(result.failures().count(), 2);
    }

    #[test]
    fn test_staging_failure_leaves_sources() {
        let fx = Fixture::new(3);
        let ops = FaultyOps {
            fail_link_at: Some(1),
            ..Default::default()
        };
        let mut manager = fx.manager(ops, false);

        let result = manager.execute(ActionType::Move, &fx.records, 1).unwrap();
        assert_eq!(result.state, BatchState::RolledBack);
        assert_eq!(
            outcomes(&result),
            vec![
                Outcome::RolledBack,
                Outcome::Failed("injected failure".to_string()),
                Outcome::Skipped
            ]
        );
        assert!(fx.sources_intact());
        assert_eq!(fx.holding_files(), 0);
    }

    #[test]
    fn test_validation_failure_touches_nothing() {
        let fx = Fixture::new(3);
        fs::write(&fx.records[0].path, "changed after the scan, and longer").unwrap();
        fs::remove_file(&fx.records[2].path).unwrap();
        let mut manager = fx.manager(FaultyOps::default(), false);

        match manager.execute(ActionType::Move, &fx.records, 1) {
            Err(Error::Validation(failure)) => {
                let paths: Vec<&PathBuf> = failure.failures.iter().map(|f| &f.path).collect();
                assert_eq!(paths, vec![&fx.records[0].path, &fx.records[2].path]);
            }
            other => panic!("expected validation failure, got {:?}", other),
        }

        assert!(fx.records[1].path.exists());
        assert!(!fx.holding().exists());
    }

    #[test]
    fn test_duplicate_target_rejected() {
        let fx = Fixture::new(1);
        let doubled = vec![fx.records[0].clone(), fx.records[0].clone()];
        let mut manager = fx.manager(FaultyOps::default(), false);

        assert!(matches!(
            manager.execute(ActionType::Delete, &doubled, 1),
            Err(Error::Validation(_))
        ));
        assert!(fx.sources_intact());
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_target_rejected() {
        let fx = Fixture::new(1);
        let link = fx.dir.path().join("link.txt");
        std::os::unix::fs::symlink(&fx.records[0].path, &link).unwrap();

        let mut forged = fx.records[0].clone();
        forged.path = link.clone();
        let mut manager = fx.manager(FaultyOps::default(), false);

        assert!(matches!(
            manager.execute(ActionType::Delete, &[forged], 1),
            Err(Error::Validation(_))
        ));
        assert!(link.exists());
        assert!(fx.sources_intact());
    }

    #[cfg(unix)]
    #[test]
    fn test_unwritable_directory_fails_validation() {
        use std::os::unix::fs::PermissionsExt;
        if unsafe { libc::geteuid() } == 0 {
            return;
        }

        let fx = Fixture::new(2);
        let locked = fx.records[1].path.parent().unwrap().to_path_buf();
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o555)).unwrap();

        let mut manager = fx.manager(FaultyOps::default(), false);
        let result = manager.execute(ActionType::Delete, &fx.records, 1);
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();

        match result {
            Err(Error::Validation(failure)) => {
                assert_eq!(failure.failures.len(), 1);
                assert_eq!(failure.failures[0].path, fx.records[1].path);
            }
            other => panic!("expected validation failure, got {:?}", other),
        }
        assert!(fx.sources_intact());
    }

    #[test]
    fn test_insufficient_space() {
        let fx = Fixture::new(2);
        let ops = FaultyOps {
            space: Some(10),
            ..Default::default()
        };
        let mut manager = fx.manager(ops, false);

        assert!(matches!(
            manager.execute(ActionType::Move, &fx.records, 1),
            Err(Error::DiskSpace { .. })
        ));
        assert!(fx.sources_intact());
        assert!(!fx.holding().exists());
    }

    #[test]
    fn test_queue_and_flush() {
        let fx = Fixture::new(4);
        let mut manager = fx.manager(FaultyOps::default(), false);

        let first = manager.queue_move(fx.records[..2].to_vec(), 1);
        let second = manager.queue_move(fx.records[2..].to_vec(), 2);
        assert_ne!(first, second);
        assert_eq!(manager.pending().len(), 2);

        let results = manager.flush();
        assert!(manager.pending().is_empty());
        assert_eq!(results.len(), 2);
        for result in &results {
            assert!(result.as_ref().unwrap().is_committed());
        }
        assert_eq!(fx.holding_files(), 4);
        assert!(fx.holding().join("group_2").exists());
    }

    #[test]
    fn test_shutdown_blocks_new_batches() {
        let fx = Fixture::new(2);
        let flag = Arc::new(AtomicBool::new(true));
        let mut manager = fx.manager(FaultyOps::default(), false).with_shutdown(flag);

        assert!(matches!(
            manager.execute(ActionType::Delete, &fx.records, 1),
            Err(Error::Interrupted)
        ));
        assert!(fx.sources_intact());
    }

    #[test]
    fn test_empty_batch_rejected() {
        let fx = Fixture::new(0);
        let mut manager = fx.manager(FaultyOps::default(), false);
        assert!(manager.execute(ActionType::Delete, &[], 1).is_err());
    }
}

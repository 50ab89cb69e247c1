use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::Metadata;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::error::{Error, Result};
use crate::fingerprint::Signature;

/// Session-unique identity of a scanned file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FileId(pub u64);

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Representation of an admitted text file
///
/// A record only exists for files that resolved safely and passed the
/// admissibility filter. Everything except the signature is fixed at
/// admission; the signature may be attached exactly once.
#[derive(Debug, Clone, Serialize)]
pub struct FileRecord {
    /// Session identity, assigned in discovery order
    pub id: FileId,

    /// Canonical real path
    pub path: PathBuf,

    /// Path as found while walking (may be a symlink)
    pub discovered_path: PathBuf,

    /// File size in bytes
    pub size: u64,

    /// Last modified timestamp
    pub modified: SystemTime,

    signature: Option<Signature>,
}

impl FileRecord {
    pub fn new(
        id: FileId,
        path: impl Into<PathBuf>,
        discovered_path: impl Into<PathBuf>,
        size: u64,
        modified: SystemTime,
    ) -> Self {
        Self {
            id,
            path: path.into(),
            discovered_path: discovered_path.into(),
            size,
            modified,
            signature: None,
        }
    }

    /// Build a record from metadata of the canonical path
    pub fn from_metadata(
        id: FileId,
        path: &Path,
        discovered_path: &Path,
        metadata: &Metadata,
    ) -> std::io::Result<Self> {
        Ok(Self::new(
            id,
            path,
            discovered_path,
            metadata.len(),
            metadata.modified()?,
        ))
    }

    pub fn signature(&self) -> Option<&Signature> {
        self.signature.as_ref()
    }

    pub fn has_signature(&self) -> bool {
        self.signature.is_some()
    }

    /// Attach a signature. Fails if one is already attached.
    pub fn attach_signature(&mut self, signature: Signature) -> Result<()> {
        if self.signature.is_some() {
            return Err(Error::SafetyCheck(format!(
                "signature already attached to {}",
                self.path.display()
            )));
        }
        self.signature = Some(signature);
        Ok(())
    }

    pub fn with_signature(mut self, signature: Signature) -> Result<Self> {
        self.attach_signature(signature)?;
        Ok(self)
    }
}

/// Identifier of one mutation batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BatchId(pub u64);

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Types of actions that can be performed on duplicates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionType {
    /// Move to the holding directory
    Move,

    /// Delete the file
    Delete,
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Move => write!(f, "move"),
            Self::Delete => write!(f, "delete"),
        }
    }
}

/// What happened to a single target of a batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum Outcome {
    /// The destructive step was applied
    Succeeded,

    /// Dry run: validation passed and the step would have been applied
    Planned,

    /// This target's own step failed
    Failed(String),

    /// The step was applied and then undone
    RolledBack,

    /// The step was applied and could not be undone
    RollbackFailed(String),

    /// Never attempted because the batch stopped first
    Skipped,
}

/// Where a batch ended up in its Validated → Staged → Committed | RolledBack progression
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchState {
    Validated,
    Staged,
    Committed,
    RolledBack,
}

/// Result of a deduplication action on one target
#[derive(Debug, Clone, Serialize)]
pub struct ActionResult {
    /// Type of action performed
    pub action_type: ActionType,

    pub file_id: FileId,

    /// Path of the target file
    pub target: PathBuf,

    /// Where the file was (or would be) moved to
    pub destination: Option<PathBuf>,

    pub outcome: Outcome,
}

/// Result of executing one batch
#[derive(Debug, Clone, Serialize)]
pub struct BatchResult {
    pub batch_id: BatchId,
    pub action_type: ActionType,
    pub dry_run: bool,
    pub state: BatchState,
    pub results: Vec<ActionResult>,
    pub started_at: DateTime<Local>,
    pub finished_at: DateTime<Local>,
}

impl BatchResult {
    pub fn is_committed(&self) -> bool {
        self.state == BatchState::Committed
    }

    /// Files no longer at their original location
    pub fn removed_ids(&self) -> Vec<FileId> {
        self.results
            .iter()
            .filter(|r| matches!(r.outcome, Outcome::Succeeded | Outcome::RollbackFailed(_)))
            .map(|r| r.file_id)
            .collect()
    }

    /// Targets whose step failed or could not be undone
    pub fn failures(&self) -> impl Iterator<Item = &ActionResult> {
        self.results
            .iter()
            .filter(|r| matches!(r.outcome, Outcome::Failed(_) | Outcome::RollbackFailed(_)))
    }
}

//! Keeper selection: which member of a duplicate group survives.

use glob::{MatchOptions, Pattern};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::path::{Component, Path};
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::graph::DuplicateGroup;
use crate::types::{FileId, FileRecord};

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetentionStrategy {
    /// Latest modification time
    Newest,
    /// Earliest modification time
    Oldest,
    Largest,
    Smallest,
    /// Fewest characters in the path
    ShortestPath,
}

impl fmt::Display for RetentionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Newest => "newest",
            Self::Oldest => "oldest",
            Self::Largest => "largest",
            Self::Smallest => "smallest",
            Self::ShortestPath => "shortest_path",
        };
        f.write_str(name)
    }
}

impl FromStr for RetentionStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "newest" => Ok(Self::Newest),
            "oldest" => Ok(Self::Oldest),
            "largest" => Ok(Self::Largest),
            "smallest" => Ok(Self::Smallest),
            "shortest_path" => Ok(Self::ShortestPath),
            other => Err(Error::Configuration(format!(
                "unknown retention strategy '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetentionPolicy {
    Strategy(RetentionStrategy),

    /// The first pattern matching any member picks it; members are tried in
    /// group order. Patterns match the trailing components of a path unless
    /// they are absolute.
    Priority {
        patterns: Vec<String>,
        fallback: RetentionStrategy,
    },
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self::Strategy(RetentionStrategy::Newest)
    }
}

impl RetentionPolicy {
    pub fn validate(&self) -> Result<()> {
        if let Self::Priority { patterns, .. } = self {
            if patterns.is_empty() {
                return Err(Error::Configuration(
                    "priority retention needs at least one pattern".to_string(),
                ));
            }
            for pattern in patterns {
                Pattern::new(pattern).map_err(|e| {
                    Error::Configuration(format!("invalid priority pattern '{}': {}", pattern, e))
                })?;
            }
        }
        Ok(())
    }
}

/// The keeper of a group and the members that may be acted upon
#[derive(Debug, Clone, Serialize)]
pub struct KeeperSelection {
    pub group_id: usize,
    pub keeper: FileRecord,
    pub act_upon: Vec<FileRecord>,
}

impl KeeperSelection {
    /// Narrow the act-upon set to a manual selection.
    ///
    /// Selecting the keeper, or a file outside the group, is an error.
    pub fn restrict(&self, ids: &[FileId]) -> Result<Self> {
        if ids.contains(&self.keeper.id) {
            return Err(Error::SafetyCheck(format!(
                "{} is the keeper of group {} and cannot be selected",
                self.keeper.path.display(),
                self.group_id
            )));
        }
        if let Some(stray) = ids
            .iter()
            .find(|id| !self.act_upon.iter().any(|r| r.id == **id))
        {
            return Err(Error::SafetyCheck(format!(
                "file {} is not a member of group {}",
                stray, self.group_id
            )));
        }

        Ok(Self {
            group_id: self.group_id,
            keeper: self.keeper.clone(),
            act_upon: self
                .act_upon
                .iter()
                .filter(|r| ids.contains(&r.id))
                .cloned()
                .collect(),
        })
    }
}

/// Choose the keeper of `group`. Returns `None` only for an empty group.
pub fn select_keeper<'a>(
    group: &'a DuplicateGroup,
    policy: &RetentionPolicy,
) -> Option<&'a FileRecord> {
    match policy {
        RetentionPolicy::Strategy(strategy) => by_strategy(&group.members, *strategy),
        RetentionPolicy::Priority { patterns, fallback } => patterns
            .iter()
            .filter_map(|p| Pattern::new(p).ok())
            .find_map(|pattern| {
                group
                    .members
                    .iter()
                    .find(|m| matches_trailing(&pattern, &m.path))
            })
            .or_else(|| by_strategy(&group.members, *fallback)),
    }
}

/// Keeper plus the rest of the group as the act-upon set
pub fn propose(group: &DuplicateGroup, policy: &RetentionPolicy) -> Option<KeeperSelection> {
    let keeper = select_keeper(group, policy)?;
    Some(KeeperSelection {
        group_id: group.id,
        keeper: keeper.clone(),
        act_upon: group
            .members
            .iter()
            .filter(|m| m.id != keeper.id)
            .cloned()
            .collect(),
    })
}

fn by_strategy(members: &[FileRecord], strategy: RetentionStrategy) -> Option<&FileRecord> {
    // `min_by` keeps the first of equal elements; the path is the final tie-break
    let preference = |a: &&FileRecord, b: &&FileRecord| -> Ordering {
        let primary = match strategy {
            RetentionStrategy::Newest => b.modified.cmp(&a.modified),
            RetentionStrategy::Oldest => a.modified.cmp(&b.modified),
            RetentionStrategy::Largest => b.size.cmp(&a.size),
            RetentionStrategy::Smallest => a.size.cmp(&b.size),
            RetentionStrategy::ShortestPath => path_len(&a.path).cmp(&path_len(&b.path)),
        };
        primary.then_with(|| a.path.cmp(&b.path))
    };
    members.iter().min_by(preference)
}

fn path_len(path: &Path) -> usize {
    path.to_string_lossy().chars().count()
}

/// Match `pattern` against the whole path if absolute, else against its
/// last N components where N is the pattern's component count.
fn matches_trailing(pattern: &Pattern, path: &Path) -> bool {
    let pattern_path = Path::new(pattern.as_str());
    if pattern_path.is_absolute() {
        return pattern.matches_path_with(path, MATCH_OPTIONS);
    }

    let depth = pattern_path.components().count();
    let components: Vec<Component> = path.components().collect();
    if depth == 0 || depth > components.len() {
        return false;
    }

    let tail: std::path::PathBuf = components[components.len() - depth..].iter().collect();
    pattern.matches_path_with(&tail, MATCH_OPTIONS)
}

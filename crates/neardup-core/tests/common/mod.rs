use neardup_core::retention::{RetentionPolicy, RetentionStrategy};
use neardup_core::Config;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::{tempdir, TempDir};

pub const REPORT: &str = "Quarterly maintenance report. The cooling system in building two was \
    serviced on the fourth of the month and the filters were replaced. Pressure readings \
    stayed within tolerance for the whole period, and no further action is required until \
    the next scheduled inspection in the autumn.";

pub const UNRELATED: &str = "Grocery list: apples, flour, two dozen eggs, olive oil, \
    fresh basil and a block of parmesan for the weekend dinner party.";

/// A scratch tree to scan plus a holding directory outside it
pub struct Corpus {
    pub dir: TempDir,
}

impl Corpus {
    pub fn new() -> Self {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("tree")).unwrap();
        Self { dir }
    }

    pub fn root(&self) -> PathBuf {
        self.dir.path().join("tree")
    }

    pub fn holding(&self) -> PathBuf {
        self.dir.path().join("holding")
    }

    /// Write `content` at `relative` under the scan root
    pub fn write(&self, relative: &str, content: &str) -> PathBuf {
        let path = self.root().join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, content).unwrap();
        path
    }

    pub fn config(&self) -> Config {
        Config {
            holding_dir: self.holding(),
            retention: RetentionPolicy::Strategy(RetentionStrategy::ShortestPath),
            threads: 2,
            ..Default::default()
        }
    }

    pub fn files_under(&self, dir: &Path) -> Vec<PathBuf> {
        if !dir.exists() {
            return Vec::new();
        }
        let mut files: Vec<PathBuf> = walkdir::WalkDir::new(dir)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .collect();
        files.sort();
        files
    }
}

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::filter::FilterConfig;
use crate::fingerprint::MinHashParams;
use crate::resolver::ResolverConfig;
use crate::retention::{RetentionPolicy, RetentionStrategy};

/// Log level for the application
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn to_level_filter(self) -> log::LevelFilter {
        match self {
            Self::Error => log::LevelFilter::Error,
            Self::Warn => log::LevelFilter::Warn,
            Self::Info => log::LevelFilter::Info,
            Self::Debug => log::LevelFilter::Debug,
            Self::Trace => log::LevelFilter::Trace,
        }
    }
}

/// Configuration for the near-duplicate detection process
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Minimum estimated Jaccard similarity for two files to be linked, in (0, 1]
    pub threshold: f64,

    /// Number of MinHash permutations
    pub num_perm: usize,

    /// Characters per shingle
    pub shingle_size: usize,

    /// Minimum share of printable characters for a file to count as text
    pub min_printable_ratio: f64,

    /// Whether zero-byte files are admitted
    pub include_empty: bool,

    /// Extension allow-list (no list = every extension)
    pub extensions: Option<Vec<String>>,

    /// Whether symbolic links are resolved and compared
    pub follow_symlinks: bool,

    /// Maximum symlink hops per resolution
    pub max_symlink_depth: usize,

    /// Every resolved path must stay below this directory
    pub base_dir: Option<PathBuf>,

    /// Maximum directory depth for scanning
    pub max_depth: Option<usize>,

    /// Rule for choosing which file of a group to keep
    pub retention: RetentionPolicy,

    /// Where moved duplicates go
    pub holding_dir: PathBuf,

    /// Recreate the group's relative directory layout under the holding directory
    pub preserve_structure: bool,

    /// Whether to run without making changes
    pub dry_run: bool,

    /// Number of threads to use for fingerprinting (0 = auto)
    pub threads: usize,

    /// Log level
    pub log_level: LogLevel,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            threshold: 0.85,
            num_perm: 128,
            shingle_size: 5,
            min_printable_ratio: 0.8,
            include_empty: false,
            extensions: Some(
                ["txt", "md", "log", "csv"]
                    .iter()
                    .map(|s| s.to_string())
                    .collect(),
            ),
            follow_symlinks: false,
            max_symlink_depth: 10,
            base_dir: None,
            max_depth: None,
            retention: RetentionPolicy::Strategy(RetentionStrategy::Newest),
            holding_dir: PathBuf::from("holding"),
            preserve_structure: true,
            dry_run: false,
            threads: 0, // Auto
            log_level: LogLevel::Info,
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn from_file(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)
            .map_err(|e| Error::Configuration(format!("Failed to open config file: {}", e)))?;

        let config: Config = serde_json::from_reader(file)
            .map_err(|e| Error::Configuration(format!("Failed to parse config file: {}", e)))?;

        Ok(config)
    }

    /// Save configuration to a file
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let file = std::fs::File::create(path)
            .map_err(|e| Error::Configuration(format!("Failed to create config file: {}", e)))?;

        serde_json::to_writer_pretty(file, self)
            .map_err(|e| Error::Configuration(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if !(self.threshold > 0.0 && self.threshold <= 1.0) {
            return Err(Error::Configuration(format!(
                "Threshold must be in (0, 1], got {}",
                self.threshold
            )));
        }

        if self.num_perm == 0 {
            return Err(Error::Configuration(
                "num_perm must be positive".to_string(),
            ));
        }

        if self.shingle_size == 0 {
            return Err(Error::Configuration(
                "shingle_size must be positive".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.min_printable_ratio) {
            return Err(Error::Configuration(format!(
                "min_printable_ratio must be in [0, 1], got {}",
                self.min_printable_ratio
            )));
        }

        if self.max_symlink_depth == 0 {
            return Err(Error::Configuration(
                "max_symlink_depth must be positive".to_string(),
            ));
        }

        if self.holding_dir.as_os_str().is_empty() {
            return Err(Error::Configuration(
                "holding_dir must not be empty".to_string(),
            ));
        }

        self.retention.validate()?;

        Ok(())
    }

    pub fn filter_config(&self) -> FilterConfig {
        FilterConfig::new(
            self.min_printable_ratio,
            self.include_empty,
            self.extensions.as_deref(),
        )
    }

    pub fn resolver_config(&self) -> ResolverConfig {
        ResolverConfig {
            follow_symlinks: self.follow_symlinks,
            max_depth: self.max_symlink_depth,
            base_dir: self.base_dir.clone(),
        }
    }

    pub fn minhash_params(&self) -> MinHashParams {
        MinHashParams {
            num_perm: self.num_perm,
            shingle_size: self.shingle_size,
        }
    }

    /// Worker count with 0 resolved to the number of CPUs
    pub fn worker_threads(&self) -> usize {
        if self.threads == 0 {
            num_cpus::get()
        } else {
            self.threads
        }
    }
}

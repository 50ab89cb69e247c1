//! Text admissibility: decides whether a file's content is text worth comparing.

use serde::Serialize;
use std::collections::HashSet;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use thiserror::Error;

/// Bytes read from the head of a file for classification
pub const SAMPLE_SIZE: usize = 8 * 1024;

/// Why a file was excluded from comparison
#[derive(Error, Debug, Clone, PartialEq, Serialize)]
pub enum Rejection {
    #[error("extension '{0}' is not in the allow-list")]
    Extension(String),

    #[error("file is empty")]
    Empty,

    #[error("content is not valid UTF-8")]
    NotUtf8,

    #[error("printable ratio {ratio:.2} below minimum {min:.2}")]
    LowPrintableRatio { ratio: f64, min: f64 },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Admissibility {
    Admissible,
    Rejected(Rejection),
}

impl Admissibility {
    pub fn is_admissible(&self) -> bool {
        matches!(self, Self::Admissible)
    }
}

#[derive(Debug, Clone)]
pub struct FilterConfig {
    pub min_printable_ratio: f64,
    pub include_empty: bool,
    /// Lowercase extensions without the leading dot
    pub extensions: Option<HashSet<String>>,
}

impl FilterConfig {
    pub fn new(min_printable_ratio: f64, include_empty: bool, extensions: Option<&[String]>) -> Self {
        let extensions = extensions.map(|exts| {
            exts.iter()
                .map(|e| e.trim_start_matches('.').to_lowercase())
                .collect()
        });
        Self {
            min_printable_ratio,
            include_empty,
            extensions,
        }
    }
}

pub struct TextFilter {
    config: FilterConfig,
}

impl TextFilter {
    pub fn new(config: FilterConfig) -> Self {
        Self { config }
    }

    /// Check the allow-list. Always true when no list is configured.
    pub fn allows_extension(&self, path: &Path) -> bool {
        match &self.config.extensions {
            None => true,
            Some(allowed) => allowed.contains(&extension_of(path)),
        }
    }

    /// Classify `bytes` as the content of `path`.
    ///
    /// Order: extension, empty, UTF-8, printable ratio.
    pub fn classify(&self, path: &Path, bytes: &[u8]) -> Admissibility {
        if !self.allows_extension(path) {
            return Admissibility::Rejected(Rejection::Extension(extension_of(path)));
        }

        if bytes.is_empty() {
            return if self.config.include_empty {
                Admissibility::Admissible
            } else {
                Admissibility::Rejected(Rejection::Empty)
            };
        }

        let text = match std::str::from_utf8(bytes) {
            Ok(text) => text,
            Err(_) => return Admissibility::Rejected(Rejection::NotUtf8),
        };

        let ratio = printable_ratio(text);
        if ratio < self.config.min_printable_ratio {
            return Admissibility::Rejected(Rejection::LowPrintableRatio {
                ratio,
                min: self.config.min_printable_ratio,
            });
        }

        Admissibility::Admissible
    }

    /// Classify a file from a leading sample of its content
    pub fn classify_file(&self, path: &Path) -> io::Result<Admissibility> {
        if !self.allows_extension(path) {
            return Ok(Admissibility::Rejected(Rejection::Extension(extension_of(
                path,
            ))));
        }

        let sample = read_sample(path)?;
        Ok(self.classify(path, &sample))
    }
}

/// Read up to `SAMPLE_SIZE` leading bytes of a file
pub fn read_sample(path: &Path) -> io::Result<Vec<u8>> {
    let mut sample = Vec::with_capacity(SAMPLE_SIZE);
    File::open(path)?
        .take(SAMPLE_SIZE as u64)
        .read_to_end(&mut sample)?;

    // A full sample may end in the middle of a multi-byte character
    if sample.len() == SAMPLE_SIZE {
        let valid = trim_incomplete_utf8(&sample).len();
        sample.truncate(valid);
    }
    Ok(sample)
}

/// Share of printable characters: whitespace, or non-control characters other
/// than U+FFFD. Empty text counts as fully printable.
pub fn printable_ratio(text: &str) -> f64 {
    let mut total = 0usize;
    let mut printable = 0usize;
    for c in text.chars() {
        total += 1;
        if c.is_whitespace() || (!c.is_control() && c != char::REPLACEMENT_CHARACTER) {
            printable += 1;
        }
    }

    if total == 0 {
        return 1.0;
    }
    printable as f64 / total as f64
}

/// Get file extension as lowercase string
pub(crate) fn extension_of(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase()
}

fn trim_incomplete_utf8(bytes: &[u8]) -> &[u8] {
    match std::str::from_utf8(bytes) {
        Err(e) if e.error_len().is_none() => &bytes[..e.valid_up_to()],
        _ => bytes,
    }
}

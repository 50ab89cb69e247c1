use log::{error, info, warn, LevelFilter};
use std::fmt::Display;
use std::path::Path;

// For file-based logging with rotation
use log4rs::append::rolling_file::policy::compound::roll::fixed_window::FixedWindowRoller;
use log4rs::append::rolling_file::policy::compound::trigger::size::SizeTrigger;
use log4rs::append::rolling_file::policy::compound::CompoundPolicy;
use log4rs::append::rolling_file::RollingFileAppender;
use log4rs::config::{Appender, Config, Root};
use log4rs::encode::json::JsonEncoder;

use crate::types::{ActionResult, BatchId, Outcome};

/// Log target for per-target mutation outcomes
pub const OUTCOME_TARGET: &str = "neardup::outcome";

/// Initialize file logging: one JSON object per line, rotated at 10MB
///
/// `NEARDUP_LOG` overrides `level` when set to a valid level name.
pub fn init_logger(log_dir: &Path, level: LevelFilter) -> Result<(), Box<dyn std::error::Error>> {
    // Create log directory if it doesn't exist
    std::fs::create_dir_all(log_dir)?;

    let log_file_path = log_dir.join("neardup.log");
    let archived_logs_pattern = format!("{}/neardup.{{}}.log", log_dir.display());

    let file_trigger = SizeTrigger::new(10 * 1024 * 1024);

    // Keep 5 archived log files
    let file_roller = FixedWindowRoller::builder()
        .build(&archived_logs_pattern, 5)
        .map_err(|e| format!("Failed to create log roller: {}", e))?;

    let compound_policy = CompoundPolicy::new(Box::new(file_trigger), Box::new(file_roller));

    let rolling_file = RollingFileAppender::builder()
        .encoder(Box::new(JsonEncoder::new()))
        .build(&log_file_path, Box::new(compound_policy))
        .map_err(|e| format!("Failed to create log appender: {}", e))?;

    let level = std::env::var("NEARDUP_LOG")
        .ok()
        .and_then(|v| v.parse::<LevelFilter>().ok())
        .unwrap_or(level);

    // File only, so progress bars stay clean
    let config = Config::builder()
        .appender(Appender::builder().build("file", Box::new(rolling_file)))
        .build(Root::builder().appender("file").build(level))
        .map_err(|e| format!("Failed to build log config: {}", e))?;

    log4rs::init_config(config).map_err(|e| format!("Failed to initialize log4rs: {}", e))?;

    info!("neardup started");
    info!("Logging to file: {}", log_file_path.display());
    Ok(())
}

/// Log file operation that failed
pub fn log_file_error(path: &Path, operation: &str, error: &dyn std::error::Error) {
    error!(
        "File operation failed - Operation: {}, Path: {}, Error: {}",
        operation,
        path.display(),
        error
    );
}

/// Log a file left out of the scan
pub fn log_skipped(path: &Path, reason: &dyn Display) {
    warn!("Skipped - Path: {}, Reason: {}", path.display(), reason);
}

/// Log file system modification
pub fn log_fs_modification(operation: &str, path: &Path, details: Option<&str>) {
    let details_str = details.unwrap_or("");
    info!(
        "FS CHANGE - Operation: {}, Path: {}{}",
        operation,
        path.display(),
        if details_str.is_empty() {
            "".to_string()
        } else {
            format!(", Details: {}", details_str)
        }
    );
}

/// Log the outcome of one batch target as a JSON event
pub fn log_outcome(batch_id: BatchId, result: &ActionResult) {
    let event = serde_json::json!({
        "batch": batch_id.0,
        "result": result,
    });

    match &result.outcome {
        Outcome::Failed(_) | Outcome::RollbackFailed(_) => {
            error!(target: OUTCOME_TARGET, "{}", event)
        }
        _ => info!(target: OUTCOME_TARGET, "{}", event),
    }
}

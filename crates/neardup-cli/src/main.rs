use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn};
use neardup_core::fingerprint::ProgressFn;
use neardup_core::retention::{RetentionPolicy, RetentionStrategy};
use neardup_core::{logging, ActionType, Config, FileRecord, LogLevel, NearDup, RunReport};
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "neardup")]
#[command(about = "Find and consolidate near-duplicate text files")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan directories for near-duplicate text files
    Scan {
        /// Directories or files to scan
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Minimum similarity for two files to be grouped, in (0, 1]
        #[arg(short, long)]
        threshold: Option<f64>,

        /// Number of MinHash permutations
        #[arg(long)]
        num_perm: Option<usize>,

        /// Characters per shingle
        #[arg(long)]
        shingle_size: Option<usize>,

        /// Minimum share of printable characters for a file to count as text
        #[arg(long)]
        min_printable_ratio: Option<f64>,

        /// Admit zero-byte files
        #[arg(long)]
        include_empty: bool,

        /// Resolve and compare symbolic links
        #[arg(long)]
        follow_symlinks: bool,

        /// Maximum symlink hops per resolution
        #[arg(long)]
        max_symlink_depth: Option<usize>,

        /// Reject files resolving outside this directory
        #[arg(long)]
        base_dir: Option<PathBuf>,

        /// Only scan files with these extensions (comma separated)
        #[arg(long, value_delimiter = ',')]
        extensions: Option<Vec<String>>,

        /// Scan every extension
        #[arg(long, conflicts_with = "extensions")]
        all_extensions: bool,

        /// Maximum directory depth
        #[arg(long)]
        max_depth: Option<usize>,

        /// Where moved duplicates go
        #[arg(long)]
        holding_dir: Option<PathBuf>,

        /// Put moved files directly under the group directory
        #[arg(long)]
        flat_holding: bool,

        /// Which file of a group to keep (newest, oldest, largest, smallest, shortest-path)
        #[arg(long, value_parser = parse_strategy)]
        retention: Option<RetentionStrategy>,

        /// Prefer files matching these globs as keeper, in order
        #[arg(long, num_args = 1..)]
        priority_paths: Vec<String>,

        /// What to do with the non-keepers of each group
        #[arg(long, value_enum, default_value_t = Action::List)]
        action: Action,

        /// Report what would change without touching any file
        #[arg(long)]
        dry_run: bool,

        /// Worker threads for fingerprinting (0 = one per core)
        #[arg(short = 'j', long)]
        threads: Option<usize>,

        /// Log to rotating JSON files in this directory instead of stderr
        #[arg(long)]
        log_dir: Option<PathBuf>,

        /// Write the run report as JSON to this file
        #[arg(long)]
        report: Option<PathBuf>,

        /// Verbosity level
        #[arg(short, long, action = clap::ArgAction::Count)]
        verbose: u8,

        /// Path to configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Generate default configuration file
    GenerateConfig {
        /// Path to save configuration file
        #[arg(default_value = "neardup.json")]
        path: PathBuf,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Action {
    /// Only report groups
    List,
    /// Move non-keepers to the holding directory
    Move,
    /// Delete non-keepers
    Delete,
}

impl Action {
    fn to_action_type(self) -> Option<ActionType> {
        match self {
            Self::List => None,
            Self::Move => Some(ActionType::Move),
            Self::Delete => Some(ActionType::Delete),
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Scan {
            paths,
            threshold,
            num_perm,
            shingle_size,
            min_printable_ratio,
            include_empty,
            follow_symlinks,
            max_symlink_depth,
            base_dir,
            extensions,
            all_extensions,
            max_depth,
            holding_dir,
            flat_holding,
            retention,
            priority_paths,
            action,
            dry_run,
            threads,
            log_dir,
            report,
            verbose,
            config,
        } => {
            let mut config = match config {
                Some(config_path) => Config::from_file(&config_path)?,
                None => Config::default(),
            };

            // Command line arguments win over the file
            if let Some(threshold) = threshold {
                config.threshold = threshold;
            }
            if let Some(num_perm) = num_perm {
                config.num_perm = num_perm;
            }
            if let Some(shingle_size) = shingle_size {
                config.shingle_size = shingle_size;
            }
            if let Some(ratio) = min_printable_ratio {
                config.min_printable_ratio = ratio;
            }
            if let Some(depth) = max_symlink_depth {
                config.max_symlink_depth = depth;
            }
            if base_dir.is_some() {
                config.base_dir = base_dir;
            }
            if extensions.is_some() {
                config.extensions = extensions;
            }
            if all_extensions {
                config.extensions = None;
            }
            if max_depth.is_some() {
                config.max_depth = max_depth;
            }
            if let Some(holding_dir) = holding_dir {
                config.holding_dir = holding_dir;
            }
            if let Some(threads) = threads {
                config.threads = threads;
            }
            config.include_empty |= include_empty;
            config.follow_symlinks |= follow_symlinks;
            config.preserve_structure &= !flat_holding;
            config.dry_run |= dry_run;

            if !priority_paths.is_empty() {
                let fallback = retention.unwrap_or(match &config.retention {
                    RetentionPolicy::Strategy(strategy) => *strategy,
                    RetentionPolicy::Priority { fallback, .. } => *fallback,
                });
                config.retention = RetentionPolicy::Priority {
                    patterns: priority_paths,
                    fallback,
                };
            } else if let Some(strategy) = retention {
                config.retention = RetentionPolicy::Strategy(strategy);
            }

            config.log_level = match verbose {
                0 => config.log_level,
                1 => LogLevel::Debug,
                _ => LogLevel::Trace,
            };

            match &log_dir {
                Some(dir) => logging::init_logger(dir, config.log_level.to_level_filter())
                    .map_err(|e| anyhow::anyhow!("{}", e))?,
                None => env_logger::Builder::new()
                    .filter_level(config.log_level.to_level_filter())
                    .parse_env("NEARDUP_LOG")
                    .init(),
            }

            let action = action.to_action_type();

            let mut neardup = NearDup::new(config)?;

            let shutdown = neardup.shutdown_flag();
            ctrlc::set_handler(move || {
                eprintln!("Interrupt received, finishing current file...");
                shutdown.store(true, Ordering::SeqCst);
            })
            .context("Failed to install Ctrl-C handler")?;

            let spinner = ProgressBar::new_spinner();
            spinner.set_style(
                ProgressStyle::default_spinner()
                    .template("{spinner} {pos} files fingerprinted [{elapsed}] {msg}")?,
            );
            spinner.enable_steady_tick(Duration::from_millis(120));

            let progress_bar = spinner.clone();
            let on_file = move |record: &FileRecord| {
                progress_bar.set_message(
                    record
                        .path
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_default(),
                );
                progress_bar.inc(1);
            };
            let on_file: &ProgressFn = &on_file;

            info!("Starting near-duplicate scan...");
            let run_report = neardup.run_with_progress(&paths, action, Some(on_file));
            spinner.finish_and_clear();
            let run_report = run_report?;

            print_report(&run_report);

            if let Some(report_path) = report {
                let file = std::fs::File::create(&report_path).with_context(|| {
                    format!("Failed to create report file {}", report_path.display())
                })?;
                serde_json::to_writer_pretty(file, &run_report)?;
                println!("Report written to: {}", report_path.display());
            }

            if neardup.shutdown_flag().load(Ordering::SeqCst) {
                warn!("Run was interrupted; results are partial");
            }
            info!("Scan complete");

            Ok(())
        }

        Commands::GenerateConfig { path } => {
            let config = Config::default();
            config.save_to_file(&path)?;
            println!("Configuration file generated at: {}", path.display());
            Ok(())
        }
    }
}

fn parse_strategy(s: &str) -> Result<RetentionStrategy, String> {
    s.parse().map_err(|e: neardup_core::Error| e.to_string())
}

fn print_report(report: &RunReport) {
    println!(
        "Scanned {} files, fingerprinted {}, found {} groups",
        report.admitted,
        report.fingerprinted,
        report.groups.len()
    );

    for group in &report.groups {
        println!(
            "\nGroup {} ({} files, {:.1}% similar)",
            group.id,
            group.len(),
            group.similarity_percent()
        );
        let keeper = report
            .keepers
            .iter()
            .find(|k| k.group_id == group.id)
            .map(|k| k.keeper.id);
        for member in &group.members {
            let marker = if Some(member.id) == keeper { "*" } else { " " };
            println!("  {} {}", marker, member.path.display());
        }
    }

    for batch in &report.batches {
        println!(
            "\nBatch {} ({}{}): {:?}",
            batch.batch_id,
            batch.action_type,
            if batch.dry_run { ", dry run" } else { "" },
            batch.state
        );
        for result in &batch.results {
            println!("  {:?} {}", result.outcome, result.target.display());
        }
    }

    for error in &report.errors {
        println!("\nRefused: {}", error);
    }

    if !report.batches.is_empty() {
        println!("\n{} groups remain", report.remaining.len());
    }
}

//! hashback - command-line interface for the incremental backup engine.
//!
//! Parses arguments, sets up logging, renders progress to stderr and maps the
//! run outcome to an exit code: 0 on success, 1 when some files failed, 2 on
//! a fatal error.

use clap::Parser;
use engine::{
    job::{create_job, plan_job, run_job},
    model::{BackupConfig, BackupJob, FileItem, FileState, RunSummary},
    progress::ProgressCallback,
    ChecksumAlgorithm,
};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// hashback - copy only what changed since the last backup
#[derive(Parser, Debug)]
#[command(name = "hashback")]
#[command(version)]
#[command(about = "Incremental backup driven by content digests")]
#[command(
    long_about = "Hashes every file under SOURCE, compares the digests with the ledger \
    (diff_file.csv) kept in DESTINATION, and copies only the files whose content changed. \
    The first run copies everything. Subdirectories are backed up recursively unless \
    --no-recurse is given. Files deleted from SOURCE are never deleted from DESTINATION."
)]
struct Args {
    /// Root directory to back up
    #[arg(long, value_name = "DIR")]
    source: PathBuf,

    /// Root directory to mirror into
    #[arg(long, value_name = "DIR")]
    destination: PathBuf,

    /// File listing names to skip, one per line ('.*' skips all dotfiles)
    #[arg(long, value_name = "FILE")]
    exclude: PathBuf,

    /// Digest algorithm recorded in the ledger: sha256 or blake3
    #[arg(long, value_name = "ALGORITHM", default_value = "sha256")]
    hash: String,

    /// Only back up the immediate children of the source directory
    #[arg(long)]
    no_recurse: bool,

    /// List the files that would be copied without touching the destination
    #[arg(long)]
    dry_run: bool,

    /// Re-hash every copied file and compare it with the source
    #[arg(long)]
    verify: bool,

    /// Back up into a non-empty destination that has no ledger
    #[arg(long)]
    adopt: bool,

    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

/// CLI implementation of ProgressCallback
struct CliProgress {
    verbose: bool,
}

impl CliProgress {
    fn new(verbose: bool) -> Self {
        CliProgress { verbose }
    }

    fn format_bytes(bytes: u64) -> String {
        const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
        let mut size = bytes as f64;
        let mut unit_idx = 0;

        while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
            size /= 1024.0;
            unit_idx += 1;
        }

        format!("{:.2} {}", size, UNITS[unit_idx])
    }

    fn format_duration(elapsed: Duration) -> String {
        let secs = elapsed.as_secs();
        let hours = secs / 3600;
        let mins = (secs % 3600) / 60;
        let secs = secs % 60;

        if hours > 0 {
            format!("{}h {}m {}s", hours, mins, secs)
        } else if mins > 0 {
            format!("{}m {}s", mins, secs)
        } else {
            format!("{}s", secs)
        }
    }
}

impl ProgressCallback for CliProgress {
    fn on_job_started(&self, job: &BackupJob) {
        eprintln!("Starting backup...");
        eprintln!("  Source: {}", job.source_root.display());
        eprintln!("  Destination: {}", job.destination_root.display());
        if let Some(mode) = job.mode {
            eprintln!("  Mode: {}", mode);
        }
        eprintln!(
            "  Changed: {} of {} files ({})",
            job.dirty_set.len(),
            job.files.len(),
            Self::format_bytes(job.total_bytes_to_copy)
        );
        eprintln!();
    }

    fn on_file_started(&self, _job: &BackupJob, file_index: usize, file: &FileItem) {
        if self.verbose {
            eprintln!("[{:3}] Copying: {}", file_index, file.relative_path.display());
        }
    }

    fn on_file_completed(&self, job: &BackupJob, file_index: usize, file: &FileItem) {
        if job.config.dry_run {
            println!("{}", file.backup_path.display());
            return;
        }
        if self.verbose {
            let status = match file.state {
                FileState::Done => "Done",
                FileState::Failed => "Failed",
                _ => "Unknown",
            };
            eprintln!("[{:3}] {}: {}", file_index, status, file.relative_path.display());
        }
    }

    fn on_job_completed(&self, job: &BackupJob) {
        let summary = job.summary();
        eprintln!();
        if job.config.dry_run {
            eprintln!("Dry run complete: {} files would be copied", summary.pending);
        } else {
            eprintln!("Backup complete!");
            eprintln!(
                "Summary: {} copied, {} unchanged, {} failed",
                summary.copied, summary.unchanged, summary.failed
            );
            eprintln!("Bytes copied: {}", Self::format_bytes(summary.bytes_copied));
        }
        if let (Some(start), Some(end)) = (job.start_time, job.end_time) {
            let elapsed = end.duration_since(start).unwrap_or(Duration::ZERO);
            eprintln!("Elapsed: {}", Self::format_duration(elapsed));
        }

        if summary.has_failures() {
            eprintln!();
            eprintln!("Failed files:");
            for file in job.failed_files() {
                match file.error_message {
                    Some(ref msg) => eprintln!("  {}: {}", file.source_path.display(), msg),
                    None => eprintln!("  {}: (unknown error)", file.source_path.display()),
                }
            }
        }
    }
}

/// Install the log subscriber. RUST_LOG wins over -v.
fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

fn main() {
    let args = Args::parse();
    init_tracing(args.verbose);

    let exit_code = match run_cli(&args) {
        Ok(summary) if summary.has_failures() => {
            eprintln!("Error: {} file(s) failed to back up", summary.failed);
            1
        }
        Ok(_) => 0,
        Err(msg) => {
            eprintln!("Error: {}", msg);
            2
        }
    };

    std::process::exit(exit_code);
}

/// Main CLI logic - separated for testability
fn run_cli(args: &Args) -> Result<RunSummary, String> {
    if !args.source.exists() {
        return Err(format!("Source directory does not exist: {}", args.source.display()));
    }
    if !args.source.is_dir() {
        return Err(format!("Source is not a directory: {}", args.source.display()));
    }

    let algorithm: ChecksumAlgorithm = args.hash.parse()?;

    let mut config = BackupConfig::new(&args.source, &args.destination, &args.exclude);
    config.algorithm = algorithm;
    config.recursive = !args.no_recurse;
    config.dry_run = args.dry_run;
    config.verify = args.verify;
    config.adopt_existing = args.adopt;

    let mut job = create_job(config).map_err(|e| e.to_string())?;
    plan_job(&mut job).map_err(|e| format!("Planning failed: {}", e))?;
    tracing::debug!(run_id = %job.id, dirty = job.dirty_set.len(), "planned");

    let progress = CliProgress::new(args.verbose > 0);
    run_job(&mut job, Some(&progress)).map_err(|e| format!("Backup failed: {}", e))?;

    Ok(job.summary())
}

//! Job orchestration module.
//!
//! This module provides the backup lifecycle:
//! - `create_job`: validate the source and load the exclusion list
//! - `plan_job`: decide first run vs incremental, enumerate, hash, detect changes
//! - `run_job`: copy the dirty files and rewrite the ledger
//!
//! Nothing in the destination is touched before `run_job`, so a bad
//! exclusion file or an unmanaged destination stops the run with the
//! destination unchanged.

use std::fs;
use std::io;
use std::path::Path;
use std::time::SystemTime;

use tracing::{debug, info, info_span, warn};
use uuid::Uuid;

use crate::checksums::{self, ChecksumAlgorithm};
use crate::detect;
use crate::error::{EngineError, Result};
use crate::exclusion;
use crate::fs_ops::{self, EnumerateOptions};
use crate::ledger::{self, Ledger, LedgerMeta};
use crate::model::{BackupConfig, BackupJob, FileItem, FileState, JobState, RunMode};
use crate::progress::ProgressCallback;

/// Create a new backup job.
///
/// Validates that the source exists and is a directory, canonicalizes it and
/// loads the exclusion list. The destination may not exist yet, but it must
/// not be the source or one of its ancestors. A destination inside the source
/// is allowed and skipped during enumeration.
///
/// # Errors
/// `SourceNotFound`/`SourceAccessDenied`/`InvalidPath` for a bad source, an
/// empty or overlapping destination, `ExclusionFile` if the exclusion list
/// cannot be read.
pub fn create_job(config: BackupConfig) -> Result<BackupJob> {
    match fs::metadata(&config.source) {
        Ok(metadata) if metadata.is_dir() => {}
        Ok(_) => {
            return Err(EngineError::InvalidPath {
                path: config.source.clone(),
                reason: "Source must be a directory".to_string(),
            })
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(EngineError::SourceNotFound {
                path: config.source.clone(),
            })
        }
        Err(e) => {
            return Err(EngineError::SourceAccessDenied {
                path: config.source.clone(),
                source: e,
            })
        }
    }

    if config.destination.as_os_str().is_empty() {
        return Err(EngineError::InvalidPath {
            path: config.destination.clone(),
            reason: "Destination path is empty".to_string(),
        });
    }

    let source_root = dunce::canonicalize(&config.source).map_err(|e| EngineError::SourceAccessDenied {
        path: config.source.clone(),
        source: e,
    })?;
    check_destination_overlap(&source_root, &config.destination)?;

    let exclusions = exclusion::load(&config.exclude_file)?;

    Ok(BackupJob {
        id: Uuid::new_v4(),
        destination_root: config.destination.clone(),
        config,
        source_root,
        exclusions,
        files: Vec::new(),
        dirty_set: Default::default(),
        mode: None,
        state: JobState::Uninitialized,
        destination_missing: false,
        total_bytes_to_copy: 0,
        total_bytes_copied: 0,
        start_time: None,
        end_time: None,
    })
}

/// Reject a destination that would make copies land on source files.
fn check_destination_overlap(source_root: &Path, destination: &Path) -> Result<()> {
    let resolved = fs_ops::resolve_path(destination).map_err(|e| EngineError::InvalidPath {
        path: destination.to_path_buf(),
        reason: format!("cannot resolve destination: {}", e),
    })?;

    if resolved == source_root {
        return Err(EngineError::InvalidPath {
            path: destination.to_path_buf(),
            reason: "destination is the source directory".to_string(),
        });
    }
    if source_root.starts_with(&resolved) {
        return Err(EngineError::InvalidPath {
            path: destination.to_path_buf(),
            reason: format!("destination contains the source directory {}", source_root.display()),
        });
    }
    Ok(())
}

/// What planning learned about the destination.
struct DestinationState {
    mode: RunMode,
    previous: Ledger,
    missing: bool,
}

/// Decide the run mode from the destination's ledger and marker.
fn inspect_destination(destination: &Path, algorithm: ChecksumAlgorithm, adopt: bool) -> Result<DestinationState> {
    match fs::metadata(destination) {
        Ok(metadata) if metadata.is_dir() => {}
        Ok(_) => {
            return Err(EngineError::InvalidPath {
                path: destination.to_path_buf(),
                reason: "Destination exists and is not a directory".to_string(),
            })
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Ok(DestinationState {
                mode: RunMode::FirstRun,
                previous: Ledger::new(),
                missing: true,
            })
        }
        Err(e) => {
            return Err(EngineError::DirectoryCreationFailed {
                path: destination.to_path_buf(),
                source: e,
            })
        }
    }

    let ledger_path = ledger::ledger_path(destination);
    if ledger_path.is_file() {
        let meta = ledger::load_meta(&ledger::meta_path(destination))?.unwrap_or_else(LedgerMeta::legacy);
        let previous = ledger::load(&ledger_path)?;
        if meta.algorithm != algorithm {
            warn!(
                recorded = %meta.algorithm,
                requested = %algorithm,
                "ledger was written with a different digest algorithm; copying everything"
            );
            return Ok(DestinationState {
                mode: RunMode::FirstRun,
                previous: Ledger::new(),
                missing: false,
            });
        }
        return Ok(DestinationState {
            mode: RunMode::Incremental,
            previous,
            missing: false,
        });
    }

    if !is_effectively_empty(destination)? {
        if !adopt {
            return Err(EngineError::UnmanagedDestination {
                path: destination.to_path_buf(),
            });
        }
        warn!(destination = %destination.display(), "adopting non-empty destination without a ledger");
    }

    Ok(DestinationState {
        mode: RunMode::FirstRun,
        previous: Ledger::new(),
        missing: false,
    })
}

/// True if the directory holds nothing but (possibly) a ledger marker.
fn is_effectively_empty(dir: &Path) -> Result<bool> {
    let entries = fs::read_dir(dir).map_err(|e| EngineError::EnumerationFailed {
        path: dir.to_path_buf(),
        source: e,
    })?;
    for entry in entries {
        let entry = entry.map_err(|e| EngineError::EnumerationFailed {
            path: dir.to_path_buf(),
            source: e,
        })?;
        if entry.file_name() != ledger::META_FILE_NAME {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Plan a job: decide the run mode, enumerate and hash candidates, and
/// compute the dirty set.
///
/// Per-file hashing failures are recorded on the file and do not stop
/// planning. The destination is only read, never written.
///
/// # Errors
/// `InvalidState` unless the job is `Uninitialized`; `UnmanagedDestination`,
/// ledger errors, or an unreadable source root.
pub fn plan_job(job: &mut BackupJob) -> Result<()> {
    if job.state != JobState::Uninitialized {
        return Err(EngineError::InvalidState(format!(
            "Job must be Uninitialized to plan; current state: {:?}",
            job.state
        )));
    }
    let span = info_span!("plan", run_id = %job.id);
    let _enter = span.enter();

    let destination = inspect_destination(&job.destination_root, job.config.algorithm, job.config.adopt_existing)?;
    info!(
        source = %job.source_root.display(),
        destination = %job.destination_root.display(),
        mode = %destination.mode,
        previous_records = destination.previous.len(),
        "planning backup"
    );

    let destination_canonical = fs_ops::resolve_path(&job.destination_root).ok();
    let skip_dir = destination_canonical
        .as_deref()
        .filter(|dest| dest.starts_with(&job.source_root));
    let options = EnumerateOptions {
        recursive: job.config.recursive,
        skip_dir,
    };
    job.files = fs_ops::enumerate_candidates(&job.source_root, &job.destination_root, &job.exclusions, options)?;
    hash_candidates(&mut job.files, job.config.algorithm);
    finish_plan(job, destination);
    Ok(())
}

/// Hash every pending candidate. A file that cannot be hashed or recorded
/// is marked failed and the rest are still hashed.
fn hash_candidates(files: &mut [FileItem], algorithm: ChecksumAlgorithm) {
    for file in files.iter_mut().filter(|f| f.state == FileState::Pending) {
        if file.ledger_key().is_none() {
            file.fail(&EngineError::InvalidPath {
                path: file.source_path.clone(),
                reason: "path is not valid UTF-8 and cannot be recorded in the ledger".to_string(),
            });
            continue;
        }
        match checksums::compute_file_checksum(&file.source_path, algorithm) {
            Ok(digest) => {
                debug!(path = %file.source_path.display(), digest = %digest, "hashed");
                file.digest = Some(digest);
            }
            Err(e) => {
                warn!(path = %file.source_path.display(), error = %e, "hashing failed");
                file.fail(&e);
            }
        }
    }
}

/// Compute the dirty set and move the job into its run mode.
fn finish_plan(job: &mut BackupJob, destination: DestinationState) {
    let first_run = destination.mode == RunMode::FirstRun;
    job.dirty_set = detect::detect(&job.files, &destination.previous, first_run);

    job.total_bytes_to_copy = 0;
    for file in job.files.iter_mut().filter(|f| f.state == FileState::Pending) {
        if job.dirty_set.contains(&file.source_path) {
            job.total_bytes_to_copy += file.file_size;
        } else {
            file.state = FileState::Unchanged;
        }
    }

    info!(
        candidates = job.files.len(),
        dirty = job.dirty_set.len(),
        bytes = job.total_bytes_to_copy,
        "plan complete"
    );

    job.destination_missing = destination.missing;
    job.mode = Some(destination.mode);
    job.state = destination.mode.into();
}

/// Run a planned job: copy the dirty set and rewrite the ledger.
///
/// Individual file errors are recorded on the file and do NOT stop the job.
/// A file that failed is left out of the rewritten ledger, so the next run
/// treats it as new and retries it. In a dry run nothing is written: dirty
/// files stay `Pending` and the ledger is left as is.
///
/// # Errors
/// `InvalidState` unless the job was planned; `DirectoryCreationFailed` if
/// the destination cannot be created; `LedgerIo` if the ledger cannot be
/// rewritten.
pub fn run_job(job: &mut BackupJob, progress_callback: Option<&dyn ProgressCallback>) -> Result<()> {
    if !matches!(job.state, JobState::FirstRun | JobState::Incremental) {
        return Err(EngineError::InvalidState(format!(
            "Job must be planned before it runs; current state: {:?}",
            job.state
        )));
    }
    let span = info_span!("run", run_id = %job.id);
    let _enter = span.enter();

    job.start_time = Some(SystemTime::now());
    let dry_run = job.config.dry_run;
    let ledger_path = job.ledger_path();

    if let Some(callback) = progress_callback {
        callback.on_job_started(job);
    }

    // An empty ledger marks the destination as managed even if this run is
    // interrupted before the final rewrite.
    if !dry_run {
        if job.destination_missing {
            fs::create_dir_all(&job.destination_root).map_err(|e| EngineError::DirectoryCreationFailed {
                path: job.destination_root.clone(),
                source: e,
            })?;
        }
        if !ledger_path.exists() {
            ledger::rewrite(&ledger_path, &Ledger::new())?;
            info!(destination = %job.destination_root.display(), "initialized destination");
        }
    }

    for file_index in 0..job.files.len() {
        if job.files[file_index].state != FileState::Pending
            || !job.dirty_set.contains(&job.files[file_index].source_path)
        {
            continue;
        }

        if let Some(callback) = progress_callback {
            callback.on_file_started(job, file_index, &job.files[file_index]);
        }

        if dry_run {
            if let Some(callback) = progress_callback {
                callback.on_file_completed(job, file_index, &job.files[file_index]);
            }
            continue;
        }

        let file = &mut job.files[file_index];
        file.state = FileState::Copying;
        match fs_ops::copy_file_with_metadata(&file.source_path, &file.backup_path) {
            Ok(bytes_copied) => {
                file.bytes_copied = bytes_copied;
                file.state = FileState::Done;
                job.total_bytes_copied += bytes_copied;
                debug!(path = %file.backup_path.display(), bytes = bytes_copied, "copied");

                if job.config.verify {
                    match checksums::verify_file_item(file) {
                        Ok(true) => {}
                        Ok(false) => {
                            file.state = FileState::Failed;
                            file.error_message =
                                Some("Checksum verification failed: backup differs from source".to_string());
                        }
                        Err(e) => file.fail(&e),
                    }
                }
            }
            Err(e) => {
                warn!(path = %file.source_path.display(), error = %e, "copy failed");
                file.fail(&e);
            }
        }

        if let Some(callback) = progress_callback {
            callback.on_file_completed(job, file_index, &job.files[file_index]);
        }
    }

    if !dry_run {
        let ledger: Ledger = job
            .files
            .iter()
            .filter(|f| matches!(f.state, FileState::Done | FileState::Unchanged))
            .filter_map(|f| Some(ledger::DigestRecord::new(f.ledger_key()?, f.digest.as_ref()?.hex())))
            .collect();
        ledger::rewrite(&ledger_path, &ledger)?;
        ledger::write_meta(
            &ledger::meta_path(&job.destination_root),
            &LedgerMeta::current(job.config.algorithm),
        )?;
    }

    job.state = JobState::Complete;
    job.end_time = Some(SystemTime::now());

    let summary = job.summary();
    info!(
        copied = summary.copied,
        unchanged = summary.unchanged,
        failed = summary.failed,
        bytes = summary.bytes_copied,
        dry_run,
        "run complete"
    );

    if let Some(callback) = progress_callback {
        callback.on_job_completed(job);
    }

    Ok(())
}

/// Create, plan and run a job in one call.
pub fn run_backup(config: BackupConfig, progress_callback: Option<&dyn ProgressCallback>) -> Result<BackupJob> {
    let mut job = create_job(config)?;
    plan_job(&mut job)?;
    run_job(&mut job, progress_callback)?;
    Ok(job)
}

//! Core data model for backup runs.
//!
//! This module defines the main data structures for representing a backup run:
//! - BackupConfig: the immutable inputs of a run
//! - BackupJob: the run itself, owned by the replication driver
//! - FileItem: a single candidate file within a run
//! - RunMode, FileState, JobState: enums controlling behavior

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::SystemTime;
use uuid::Uuid;

use crate::checksums::{ChecksumAlgorithm, ChecksumValue};
use crate::exclusion::ExclusionSet;

/// Immutable inputs of a backup run.
///
/// Built once (by the CLI or a test) and never mutated by the engine.
#[derive(Debug, Clone)]
pub struct BackupConfig {
    /// Root directory to back up
    pub source: PathBuf,

    /// Root directory mirrored into
    pub destination: PathBuf,

    /// Newline-delimited list of names to skip
    pub exclude_file: PathBuf,

    /// Digest algorithm recorded in the ledger
    pub algorithm: ChecksumAlgorithm,

    /// Descend into subdirectories of the source
    pub recursive: bool,

    /// Plan and report only; never touch the destination
    pub dry_run: bool,

    /// Re-hash every copied file and compare with the source digest
    pub verify: bool,

    /// Accept a non-empty destination that has no ledger
    pub adopt_existing: bool,
}

impl BackupConfig {
    /// Config with the default options: sha256, recursive, no dry run, no verify.
    pub fn new<P: Into<PathBuf>>(source: P, destination: P, exclude_file: P) -> Self {
        BackupConfig {
            source: source.into(),
            destination: destination.into(),
            exclude_file: exclude_file.into(),
            algorithm: ChecksumAlgorithm::default(),
            recursive: true,
            dry_run: false,
            verify: false,
            adopt_existing: false,
        }
    }
}

/// A single backup run.
///
/// Created by `create_job`, populated by `plan_job`, executed by `run_job`.
#[derive(Debug)]
pub struct BackupJob {
    /// Unique identifier for this run (appears in log spans)
    pub id: Uuid,

    /// Inputs of the run
    pub config: BackupConfig,

    /// Canonical source root; every ledger path starts with it
    pub source_root: PathBuf,

    /// Destination root as given
    pub destination_root: PathBuf,

    /// Names to skip, loaded before any destination mutation
    pub exclusions: ExclusionSet,

    /// Every candidate file of this run
    pub files: Vec<FileItem>,

    /// Source paths that must be copied this run
    pub dirty_set: BTreeSet<PathBuf>,

    /// First run or incremental, decided during planning
    pub mode: Option<RunMode>,

    /// Current job state
    pub state: JobState,

    /// Destination did not exist and must be created by this run
    pub destination_missing: bool,

    /// Total bytes of the dirty files
    pub total_bytes_to_copy: u64,

    /// Bytes copied so far
    pub total_bytes_copied: u64,

    /// When run_job started
    pub start_time: Option<SystemTime>,

    /// When run_job completed
    pub end_time: Option<SystemTime>,
}

impl BackupJob {
    /// Location of the ledger for this run's destination.
    pub fn ledger_path(&self) -> PathBuf {
        crate::ledger::ledger_path(&self.destination_root)
    }

    /// Count files by terminal state.
    pub fn summary(&self) -> RunSummary {
        let mut summary = RunSummary {
            copied: 0,
            unchanged: 0,
            failed: 0,
            pending: 0,
            bytes_copied: self.total_bytes_copied,
        };
        for file in &self.files {
            match file.state {
                FileState::Done => summary.copied += 1,
                FileState::Unchanged => summary.unchanged += 1,
                FileState::Failed => summary.failed += 1,
                FileState::Pending | FileState::Copying => summary.pending += 1,
            }
        }
        summary
    }

    /// Files that failed at any stage of the run.
    pub fn failed_files(&self) -> impl Iterator<Item = &FileItem> {
        self.files.iter().filter(|f| f.state == FileState::Failed)
    }
}

/// Per-state file counts of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RunSummary {
    pub copied: usize,
    pub unchanged: usize,
    pub failed: usize,
    /// Dirty files not copied (dry run)
    pub pending: usize,
    pub bytes_copied: u64,
}

impl RunSummary {
    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }
}

/// A single candidate file within a run.
#[derive(Debug, Clone)]
pub struct FileItem {
    /// Full source path (canonical source root joined with the relative path)
    pub source_path: PathBuf,

    /// Path relative to the source root
    pub relative_path: PathBuf,

    /// Where the file is copied to
    pub backup_path: PathBuf,

    /// File size in bytes at enumeration time
    pub file_size: u64,

    /// Digest computed this run; None if hashing failed
    pub digest: Option<ChecksumValue>,

    /// Current state of this file
    pub state: FileState,

    /// Bytes copied for this file
    pub bytes_copied: u64,

    /// OS error code if state is Failed
    pub error_code: Option<u32>,

    /// Human-readable error message
    pub error_message: Option<String>,

    /// Result of verify-after-copy, when enabled
    pub verification_passed: Option<bool>,
}

impl FileItem {
    pub fn new(source_path: PathBuf, relative_path: PathBuf, backup_path: PathBuf, file_size: u64) -> Self {
        FileItem {
            source_path,
            relative_path,
            backup_path,
            file_size,
            digest: None,
            state: FileState::Pending,
            bytes_copied: 0,
            error_code: None,
            error_message: None,
            verification_passed: None,
        }
    }

    /// Mark the file failed with the given error.
    pub fn fail(&mut self, err: &crate::error::EngineError) {
        self.state = FileState::Failed;
        self.error_code = err.raw_os_error();
        self.error_message = Some(err.to_string());
    }

    /// The source path as it is recorded in the ledger.
    pub fn ledger_key(&self) -> Option<&str> {
        self.source_path.to_str()
    }
}

/// How the run treats the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// No comparable ledger; every candidate is copied
    FirstRun,
    /// Ledger present; only changed or new files are copied
    Incremental,
}

impl std::fmt::Display for RunMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunMode::FirstRun => write!(f, "first run"),
            RunMode::Incremental => write!(f, "incremental"),
        }
    }
}

/// The state of an individual file within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileState {
    /// Enumerated, digest computed, not yet copied
    Pending,
    /// Currently copying
    Copying,
    /// Copied to its backup path
    Done,
    /// Digest matches the ledger; not copied
    Unchanged,
    /// Hashing, copying or verification failed
    Failed,
}

/// The state of a whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    /// Created, not yet planned
    Uninitialized,
    /// Planned against a missing or unusable ledger
    FirstRun,
    /// Planned against the previous ledger
    Incremental,
    /// Files processed, ledger rewritten
    Complete,
}

impl From<RunMode> for JobState {
    fn from(mode: RunMode) -> Self {
        match mode {
            RunMode::FirstRun => JobState::FirstRun,
            RunMode::Incremental => JobState::Incremental,
        }
    }
}

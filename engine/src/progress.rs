//! Progress reporting trait.
//!
//! Decouples the replication driver from any specific UI. The CLI renders
//! these callbacks to stderr; tests record them.

use crate::model::{BackupJob, FileItem};

/// Receives progress updates while `run_job` executes.
///
/// All methods are called synchronously on the thread running the job.
/// Only dirty files produce per-file callbacks.
pub trait ProgressCallback {
    /// Called once, before the first file is copied.
    fn on_job_started(&self, job: &BackupJob);

    /// Called when a dirty file is about to be copied.
    fn on_file_started(&self, job: &BackupJob, file_index: usize, file: &FileItem);

    /// Called when a dirty file is done (copied, failed, or listed in a dry run).
    fn on_file_completed(&self, job: &BackupJob, file_index: usize, file: &FileItem);

    /// Called once, after the ledger has been rewritten.
    fn on_job_completed(&self, job: &BackupJob);
}

//! # hashback engine - incremental, content-aware backup
//!
//! Walks a source directory, hashes every file, compares the digests with
//! the ledger recorded by the previous run, and copies only the files whose
//! content changed (everything, on the first run) into a destination tree
//! that mirrors the source layout.
//!
//! ## Overview
//!
//! - Exclusion list loaded before anything is touched
//! - Recursive enumeration (optionally immediate children only)
//! - Streamed SHA-256 or BLAKE3 digests
//! - Ledger (`diff_file.csv`) rewritten atomically once per run
//! - Per-file error isolation: failures are reported, not fatal
//! - Progress reporting via callbacks (decoupled from UI technology)
//!
//! ## Basic Usage
//!
//! ```no_run
//! use engine::{create_job, plan_job, run_job, BackupConfig};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = BackupConfig::new("/home/me/docs", "/mnt/backup/docs", "/home/me/.backupignore");
//!
//! // Load exclusions and validate the source
//! let mut job = create_job(config)?;
//!
//! // Decide first run vs incremental, hash, detect changes
//! plan_job(&mut job)?;
//! println!("{} of {} files changed", job.dirty_set.len(), job.files.len());
//!
//! // Copy the dirty files and rewrite the ledger
//! run_job(&mut job, None)?;
//!
//! for file in job.failed_files() {
//!     eprintln!("{}: {:?}", file.source_path.display(), file.error_message);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - **model**: Core data structures (BackupConfig, BackupJob, FileItem, enums)
//! - **error**: Error types and handling
//! - **exclusion**: Exclusion list loading and matching
//! - **fs_ops**: Enumeration, path mapping, copying
//! - **checksums**: Digest computation and verification
//! - **ledger**: Persisted digest ledger and its marker
//! - **detect**: Change detection
//! - **job**: Run orchestration (create, plan, run)
//! - **progress**: Progress callback trait

pub mod checksums;
pub mod detect;
pub mod error;
pub mod exclusion;
pub mod fs_ops;
pub mod job;
pub mod ledger;
pub mod model;
pub mod progress;

pub use checksums::{ChecksumAlgorithm, ChecksumValue};
pub use error::{EngineError, Result};
pub use exclusion::ExclusionSet;
pub use job::{create_job, plan_job, run_backup, run_job};
pub use ledger::{DigestRecord, Ledger};
pub use model::{BackupConfig, BackupJob, FileItem, FileState, JobState, RunMode, RunSummary};
pub use progress::ProgressCallback;

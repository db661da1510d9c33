//! Error types for the backup engine.
//!
//! The primary error type is `EngineError`, which represents run-level errors
//! that prevent a backup from being planned or completed. File-level errors
//! (a file that vanished before hashing, a copy that hit a full disk) are
//! recorded in the FileItem struct, not returned as EngineError.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur at the run level.
///
/// These errors are non-recoverable and stop the run. Per-file failures are
/// recorded on `FileItem` and reported in the run summary instead.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Exclusion file missing or unreadable
    #[error("Failed to read exclusion file: {}: {source}", path.display())]
    ExclusionFile { path: PathBuf, source: io::Error },

    /// Source directory does not exist
    #[error("Source directory not found: {}", path.display())]
    SourceNotFound { path: PathBuf },

    /// Source directory is not accessible (permissions)
    #[error("Source directory access denied: {}: {source}", path.display())]
    SourceAccessDenied { path: PathBuf, source: io::Error },

    /// Destination exists, holds other content and has no ledger
    #[error(
        "Destination is not empty and has no ledger: {} (use --adopt to back up into it anyway)",
        path.display()
    )]
    UnmanagedDestination { path: PathBuf },

    /// Failed to read from a source or backup file
    #[error("Failed to read file: {}: {source}", path.display())]
    ReadError { path: PathBuf, source: io::Error },

    /// Failed to write to a backup file
    #[error("Failed to write file: {}: {source}", path.display())]
    WriteError { path: PathBuf, source: io::Error },

    /// Path cannot be mapped or recorded
    #[error("Invalid path: {} ({reason})", path.display())]
    InvalidPath { path: PathBuf, reason: String },

    /// Failed to enumerate a source directory
    #[error("Failed to enumerate directory: {}: {source}", path.display())]
    EnumerationFailed { path: PathBuf, source: io::Error },

    /// Failed to create a directory
    #[error("Failed to create directory: {}: {source}", path.display())]
    DirectoryCreationFailed { path: PathBuf, source: io::Error },

    /// Ledger or marker file has unexpected content
    #[error("Malformed ledger {} at line {line}: {reason}", path.display())]
    LedgerParse {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    /// Ledger or marker file could not be read or replaced
    #[error("Failed to access ledger: {}: {source}", path.display())]
    LedgerIo { path: PathBuf, source: io::Error },

    /// Job operation called in the wrong state
    #[error("Invalid job state: {0}")]
    InvalidState(String),
}

impl EngineError {
    /// Extract the OS error code from this error, if available.
    pub fn raw_os_error(&self) -> Option<u32> {
        match self {
            Self::ExclusionFile { source, .. }
            | Self::SourceAccessDenied { source, .. }
            | Self::ReadError { source, .. }
            | Self::WriteError { source, .. }
            | Self::EnumerationFailed { source, .. }
            | Self::DirectoryCreationFailed { source, .. }
            | Self::LedgerIo { source, .. } => source.raw_os_error().map(|e| e as u32),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

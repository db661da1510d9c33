//! Change detection.
//!
//! Compares the digests computed this run against the previous ledger. The
//! current candidates are iterated, not the ledger rows, so a file added since
//! the last run has no record and is dirty.

use std::collections::BTreeSet;
use std::path::PathBuf;

use crate::ledger::Ledger;
use crate::model::FileItem;

/// How a candidate relates to the previous ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
    /// No prior record for this path
    New,
    /// Recorded digest differs from the fresh one
    Modified,
    /// Recorded digest equals the fresh one
    Unchanged,
}

impl Change {
    pub fn is_dirty(self) -> bool {
        self != Change::Unchanged
    }
}

/// Classify one candidate. `None` if it has no fresh digest or no ledger key.
pub fn classify(candidate: &FileItem, ledger: &Ledger) -> Option<Change> {
    let digest = candidate.digest.as_ref()?;
    let key = candidate.ledger_key()?;
    Some(match ledger.get(key) {
        None => Change::New,
        Some(recorded) if recorded == digest.hex() => Change::Unchanged,
        Some(_) => Change::Modified,
    })
}

/// Source paths of the candidates that must be copied.
///
/// On a first run every hashed candidate is dirty and the ledger is not
/// consulted. Candidates without a fresh digest are already failed and are
/// never part of the result.
pub fn detect(candidates: &[FileItem], ledger: &Ledger, first_run: bool) -> BTreeSet<PathBuf> {
    candidates
        .iter()
        .filter(|candidate| {
            if candidate.digest.is_none() {
                return false;
            }
            if first_run {
                return true;
            }
            match classify(candidate, ledger) {
                Some(change) => {
                    if change.is_dirty() {
                        tracing::debug!(path = %candidate.source_path.display(), ?change, "dirty");
                    }
                    change.is_dirty()
                }
                None => false,
            }
        })
        .map(|candidate| candidate.source_path.clone())
        .collect()
}

//! Exclusion list loading and matching.
//!
//! The exclusion file is plain text with one token per line. The token `.*`
//! excludes every dot-prefixed entry; any other token is a literal entry
//! name. Matching is on the bare entry name, at every directory level.

use std::collections::HashSet;
use std::ffi::OsStr;
use std::fs;
use std::path::Path;

use crate::error::{EngineError, Result};

/// Token that excludes all dot-prefixed entries.
pub const DOTFILES_TOKEN: &str = ".*";

/// Names to skip during enumeration. Immutable once loaded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExclusionSet {
    names: HashSet<String>,
    skip_dotfiles: bool,
}

impl ExclusionSet {
    /// Build a set from tokens, as if they were lines of an exclusion file.
    pub fn from_tokens<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut set = ExclusionSet::default();
        for token in tokens {
            let token = token.into();
            if token.is_empty() {
                continue;
            }
            if token == DOTFILES_TOKEN {
                set.skip_dotfiles = true;
            } else {
                set.names.insert(token);
            }
        }
        set
    }

    /// Whether an entry with this bare name is skipped.
    pub fn is_excluded(&self, name: &OsStr) -> bool {
        let name = name.to_string_lossy();
        if self.skip_dotfiles && name.starts_with('.') {
            return true;
        }
        self.names.contains(&*name)
    }

    pub fn skips_dotfiles(&self) -> bool {
        self.skip_dotfiles
    }

    /// Number of literal names (the dotfile directive is not counted).
    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty() && !self.skip_dotfiles
    }
}

/// Load the exclusion file.
///
/// Line terminators are stripped and empty lines ignored.
///
/// # Errors
/// Returns `EngineError::ExclusionFile` if the file cannot be opened or read.
/// There is no safe default policy, so callers must stop the run.
pub fn load(path: &Path) -> Result<ExclusionSet> {
    let content = fs::read_to_string(path).map_err(|e| EngineError::ExclusionFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    let set = ExclusionSet::from_tokens(content.lines());
    tracing::debug!(
        path = %path.display(),
        names = set.len(),
        skip_dotfiles = set.skips_dotfiles(),
        "loaded exclusion list"
    );
    Ok(set)
}

//! Filesystem operations module.
//!
//! This module provides low-level operations for:
//! - Enumerating candidate files under the source root
//! - Mapping a source file to its backup path
//! - Copying files with modification time preservation
//! - Creating parent directories idempotently

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use crate::error::{EngineError, Result};
use crate::exclusion::ExclusionSet;
use crate::ledger::{LEDGER_FILE_NAME, META_FILE_NAME};
use crate::model::FileItem;

/// Options for `enumerate_candidates`.
#[derive(Debug, Clone, Copy)]
pub struct EnumerateOptions<'a> {
    /// Descend into subdirectories
    pub recursive: bool,
    /// Directory never enumerated (the destination, when it lies inside the source)
    pub skip_dir: Option<&'a Path>,
}

/// Enumerate candidate files under `source_root`.
///
/// Entries whose bare name is excluded are skipped at every level, and an
/// excluded directory is not descended into. Symbolic links to files are
/// followed; symbolic links to directories and special files are skipped.
/// Output order follows the directory listing. Ledger files at the top of
/// the source are skipped: their backup paths are this run's own ledger.
///
/// A subdirectory that cannot be listed, or whose listing breaks off, does
/// not stop enumeration: it is returned as a failed item.
///
/// # Errors
/// Returns `EnumerationFailed` if the source root itself cannot be listed.
pub fn enumerate_candidates(
    source_root: &Path,
    destination_root: &Path,
    exclusions: &ExclusionSet,
    options: EnumerateOptions<'_>,
) -> Result<Vec<FileItem>> {
    let mut items = Vec::new();
    let entries = fs::read_dir(source_root).map_err(|e| EngineError::EnumerationFailed {
        path: source_root.to_path_buf(),
        source: e,
    })?;
    walk(entries, source_root, source_root, destination_root, exclusions, options, &mut items)?;
    Ok(items)
}

fn walk(
    entries: impl Iterator<Item = io::Result<fs::DirEntry>>,
    dir: &Path,
    source_root: &Path,
    destination_root: &Path,
    exclusions: &ExclusionSet,
    options: EnumerateOptions<'_>,
    items: &mut Vec<FileItem>,
) -> Result<()> {
    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) if dir != source_root => {
                push_failed(items, dir, source_root, destination_root, EngineError::EnumerationFailed {
                    path: dir.to_path_buf(),
                    source: e,
                });
                break;
            }
            Err(e) => {
                return Err(EngineError::EnumerationFailed {
                    path: dir.to_path_buf(),
                    source: e,
                })
            }
        };

        let name = entry.file_name();
        if exclusions.is_excluded(&name) {
            tracing::debug!(path = %entry.path().display(), "excluded");
            continue;
        }
        if dir == source_root && (name == LEDGER_FILE_NAME || name == META_FILE_NAME) {
            tracing::debug!(path = %entry.path().display(), "ledger file in source; skipped");
            continue;
        }

        let entry_path = entry.path();
        if options.skip_dir == Some(entry_path.as_path()) {
            tracing::debug!(path = %entry_path.display(), "skipping destination inside source");
            continue;
        }

        let file_type = match entry.file_type() {
            Ok(file_type) => file_type,
            Err(e) => {
                push_failed(items, &entry_path, source_root, destination_root, EngineError::EnumerationFailed {
                    path: entry_path.clone(),
                    source: e,
                });
                continue;
            }
        };

        if file_type.is_dir() {
            if !options.recursive {
                continue;
            }
            match fs::read_dir(&entry_path) {
                Ok(sub_entries) => walk(
                    sub_entries,
                    &entry_path,
                    source_root,
                    destination_root,
                    exclusions,
                    options,
                    items,
                )?,
                Err(e) => push_failed(items, &entry_path, source_root, destination_root, EngineError::EnumerationFailed {
                    path: entry_path.clone(),
                    source: e,
                }),
            }
            continue;
        }

        // Follow file symlinks; leave directory links and special files alone.
        let metadata = if file_type.is_symlink() {
            match fs::metadata(&entry_path) {
                Ok(metadata) => metadata,
                Err(e) => {
                    tracing::warn!(path = %entry_path.display(), error = %e, "skipping dangling symlink");
                    continue;
                }
            }
        } else {
            match entry.metadata() {
                Ok(metadata) => metadata,
                Err(e) => {
                    push_failed(items, &entry_path, source_root, destination_root, EngineError::ReadError {
                        path: entry_path.clone(),
                        source: e,
                    });
                    continue;
                }
            }
        };
        if !metadata.is_file() {
            tracing::debug!(path = %entry_path.display(), "not a regular file; skipped");
            continue;
        }

        let backup_path = map_to_backup_path(&entry_path, source_root, destination_root)?;
        let relative_path = relative_to(&entry_path, source_root)?;
        items.push(FileItem::new(entry_path, relative_path, backup_path, metadata.len()));
    }
    Ok(())
}

fn push_failed(items: &mut Vec<FileItem>, path: &Path, source_root: &Path, destination_root: &Path, err: EngineError) {
    tracing::warn!(path = %path.display(), error = %err, "enumeration failed");
    let relative = path.strip_prefix(source_root).unwrap_or(path).to_path_buf();
    let mut item = FileItem::new(path.to_path_buf(), relative.clone(), destination_root.join(relative), 0);
    item.fail(&err);
    items.push(item);
}

fn relative_to(path: &Path, root: &Path) -> Result<PathBuf> {
    let relative = path.strip_prefix(root).map_err(|_| EngineError::InvalidPath {
        path: path.to_path_buf(),
        reason: format!("not under source root {}", root.display()),
    })?;

    if relative.as_os_str().is_empty() {
        return Err(EngineError::InvalidPath {
            path: path.to_path_buf(),
            reason: "path is the source root itself".to_string(),
        });
    }
    if !relative.components().all(|c| matches!(c, Component::Normal(_))) {
        return Err(EngineError::InvalidPath {
            path: path.to_path_buf(),
            reason: "path escapes the source root".to_string(),
        });
    }
    Ok(relative.to_path_buf())
}

/// Resolve `path` to an absolute, symlink-free path even if it does not
/// exist yet: the nearest existing ancestor is canonicalized and the missing
/// components are appended to it.
///
/// # Errors
/// Returns the I/O error of the first ancestor that exists but cannot be
/// resolved.
pub fn resolve_path(path: &Path) -> io::Result<PathBuf> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };

    let mut missing = Vec::new();
    let mut current = absolute.as_path();
    loop {
        match dunce::canonicalize(current) {
            Ok(mut resolved) => {
                resolved.extend(missing.iter().rev());
                return Ok(resolved);
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => match (current.parent(), current.file_name()) {
                (Some(parent), Some(name)) => {
                    missing.push(name);
                    current = parent;
                }
                _ => return Err(e),
            },
            Err(e) => return Err(e),
        }
    }
}

/// Map a source file to its location under the destination root.
///
/// The source root's components are removed from the front of the path and
/// the remaining components are joined onto the destination root, so trailing
/// separators on either root make no difference and distinct source paths
/// map to distinct backup paths.
///
/// # Errors
/// Returns `InvalidPath` if `source_file` is not strictly below `source_root`.
pub fn map_to_backup_path(source_file: &Path, source_root: &Path, destination_root: &Path) -> Result<PathBuf> {
    let relative = relative_to(source_file, source_root)?;
    Ok(destination_root.join(relative))
}

/// Copy a file from source to destination, preserving its modification time.
///
/// Missing parent directories of `dst` are created first.
///
/// # Returns
/// Number of bytes copied
///
/// # Errors
/// Returns EngineError if the copy fails
pub fn copy_file_with_metadata(src: &Path, dst: &Path) -> Result<u64> {
    ensure_parent_dir_exists(dst)?;

    let mut src_file = fs::File::open(src).map_err(|e| EngineError::ReadError {
        path: src.to_path_buf(),
        source: e,
    })?;

    let src_mtime = src_file
        .metadata()
        .map_err(|e| EngineError::ReadError {
            path: src.to_path_buf(),
            source: e,
        })?
        .modified()
        .ok();

    let mut dst_file = fs::File::create(dst).map_err(|e| EngineError::WriteError {
        path: dst.to_path_buf(),
        source: e,
    })?;

    let bytes_copied = io::copy(&mut src_file, &mut dst_file).map_err(|e| match e.kind() {
        io::ErrorKind::PermissionDenied | io::ErrorKind::WriteZero => {
            EngineError::WriteError {
                path: dst.to_path_buf(),
                source: e,
            }
        }
        _ => EngineError::ReadError {
            path: src.to_path_buf(),
            source: e,
        },
    })?;
    drop(dst_file);

    if let Some(mtime) = src_mtime {
        if let Err(e) = filetime::set_file_mtime(dst, filetime::FileTime::from_system_time(mtime)) {
            tracing::debug!(path = %dst.display(), error = %e, "could not preserve modification time");
        }
    }

    Ok(bytes_copied)
}

/// Ensure the parent directory of a path exists, creating it if necessary.
///
/// Creating an already-existing directory is not an error.
///
/// # Errors
/// Returns `DirectoryCreationFailed` if creation fails or the parent exists
/// but is not a directory.
pub fn ensure_parent_dir_exists(path: &Path) -> Result<()> {
    let Some(parent) = path.parent() else {
        return Ok(());
    };
    if parent.as_os_str().is_empty() {
        return Ok(());
    }

    match fs::metadata(parent) {
        Ok(metadata) if metadata.is_dir() => Ok(()),
        Ok(_) => Err(EngineError::DirectoryCreationFailed {
            path: parent.to_path_buf(),
            source: io::Error::new(io::ErrorKind::InvalidInput, "Parent path exists but is not a directory"),
        }),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            fs::create_dir_all(parent).map_err(|e| EngineError::DirectoryCreationFailed {
                path: parent.to_path_buf(),
                source: e,
            })
        }
        Err(e) => Err(EngineError::DirectoryCreationFailed {
            path: parent.to_path_buf(),
            source: e,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FileState;
    use std::collections::BTreeSet;

    fn options(recursive: bool) -> EnumerateOptions<'static> {
        EnumerateOptions {
            recursive,
            skip_dir: None,
        }
    }

    fn relative_set(items: &[FileItem]) -> BTreeSet<PathBuf> {
        items.iter().map(|f| f.relative_path.clone()).collect()
    }

    fn source_tree() -> (tempfile::TempDir, PathBuf) {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src = temp_dir.path().join("src");
        fs::create_dir_all(src.join("docs").join("deep")).expect("Failed to create dirs");
        fs::create_dir_all(src.join("node_modules")).expect("Failed to create dirs");
        fs::write(src.join("a.txt"), "hello").expect("Failed to write");
        fs::write(src.join(".secret"), "x").expect("Failed to write");
        fs::write(src.join("docs").join("b.txt"), "bb").expect("Failed to write");
        fs::write(src.join("docs").join("deep").join("c.txt"), "ccc").expect("Failed to write");
        fs::write(src.join("node_modules").join("dep.js"), "js").expect("Failed to write");
        (temp_dir, src)
    }

    #[test]
    fn test_enumerate_recursive_with_exclusions() {
        let (temp_dir, src) = source_tree();
        let dst = temp_dir.path().join("dst");
        let exclusions = ExclusionSet::from_tokens([".*", "node_modules"]);

        let items = enumerate_candidates(&src, &dst, &exclusions, options(true)).expect("Failed to enumerate");

        let expected: BTreeSet<PathBuf> = [
            PathBuf::from("a.txt"),
            Path::new("docs").join("b.txt"),
            Path::new("docs").join("deep").join("c.txt"),
        ]
        .into_iter()
        .collect();
        assert_eq!(relative_set(&items), expected);

        let c = items
            .iter()
            .find(|f| f.relative_path.ends_with("c.txt"))
            .expect("c.txt missing");
        assert_eq!(c.backup_path, dst.join("docs").join("deep").join("c.txt"));
        assert_eq!(c.file_size, 3);
    }

    #[test]
    fn test_enumerate_immediate_children_only() {
        let (temp_dir, src) = source_tree();
        let dst = temp_dir.path().join("dst");

        let items =
            enumerate_candidates(&src, &dst, &ExclusionSet::default(), options(false)).expect("Failed to enumerate");

        let expected: BTreeSet<PathBuf> = [PathBuf::from("a.txt"), PathBuf::from(".secret")].into_iter().collect();
        assert_eq!(relative_set(&items), expected);
    }

    #[test]
    fn test_enumerate_skips_destination_inside_source() {
        let (_temp_dir, src) = source_tree();
        let dst = src.join("backup");
        fs::create_dir(&dst).expect("Failed to create dst");
        fs::write(dst.join("old.txt"), "old").expect("Failed to write");

        let opts = EnumerateOptions {
            recursive: true,
            skip_dir: Some(&dst),
        };
        let items = enumerate_candidates(&src, &dst, &ExclusionSet::default(), opts).expect("Failed to enumerate");
        assert!(items.iter().all(|f| !f.source_path.starts_with(&dst)));
    }

    #[test]
    fn test_enumerate_skips_ledger_files_at_source_root() {
        let (temp_dir, src) = source_tree();
        fs::write(src.join(LEDGER_FILE_NAME), "path,hash\r\n").expect("Failed to write");
        fs::write(src.join(META_FILE_NAME), "version=1\n").expect("Failed to write");
        fs::write(src.join("docs").join(LEDGER_FILE_NAME), "nested").expect("Failed to write");
        let dst = temp_dir.path().join("dst");

        let items = enumerate_candidates(&src, &dst, &ExclusionSet::default(), options(false)).expect("Failed to enumerate");
        assert!(items.iter().all(|f| f.relative_path != Path::new(LEDGER_FILE_NAME)));
        assert!(items.iter().all(|f| f.relative_path != Path::new(META_FILE_NAME)));

        let items = enumerate_candidates(&src, &dst, &ExclusionSet::default(), options(true)).expect("Failed to enumerate");
        assert!(relative_set(&items).contains(&Path::new("docs").join(LEDGER_FILE_NAME)));
    }

    #[test]
    fn test_listing_error_in_subdirectory_is_a_failed_item() {
        let (temp_dir, src) = source_tree();
        let dst = temp_dir.path().join("dst");
        let docs = src.join("docs");
        let broken = fs::read_dir(&docs)
            .expect("Failed to list docs")
            .chain(std::iter::once(Err(io::Error::new(io::ErrorKind::Other, "listing interrupted"))));

        let mut items = Vec::new();
        walk(broken, &docs, &src, &dst, &ExclusionSet::default(), options(true), &mut items)
            .expect("Subdirectory listing errors must not abort enumeration");

        let failed: Vec<_> = items.iter().filter(|f| f.state == FileState::Failed).collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].relative_path, PathBuf::from("docs"));
        assert!(items.iter().any(|f| f.relative_path == Path::new("docs").join("b.txt")));
    }

    #[test]
    fn test_listing_error_at_source_root_is_fatal() {
        let (temp_dir, src) = source_tree();
        let dst = temp_dir.path().join("dst");
        let broken = std::iter::once(Err(io::Error::new(io::ErrorKind::Other, "listing interrupted")));

        let mut items = Vec::new();
        let result = walk(broken, &src, &src, &dst, &ExclusionSet::default(), options(true), &mut items);
        assert!(matches!(result, Err(EngineError::EnumerationFailed { .. })));
    }

    #[test]
    fn test_resolve_path_appends_missing_components() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let root = dunce::canonicalize(temp_dir.path()).expect("Failed to canonicalize");

        let resolved = resolve_path(&temp_dir.path().join("a").join("b")).expect("Failed to resolve");
        assert_eq!(resolved, root.join("a").join("b"));

        let resolved = resolve_path(&temp_dir.path().join(".")).expect("Failed to resolve");
        assert_eq!(resolved, root);
    }

    #[cfg(unix)]
    #[test]
    fn test_enumerate_follows_file_symlinks_only() {
        let (temp_dir, src) = source_tree();
        std::os::unix::fs::symlink(src.join("a.txt"), src.join("link.txt")).expect("Failed to link");
        std::os::unix::fs::symlink(src.join("docs"), src.join("docs-link")).expect("Failed to link");
        std::os::unix::fs::symlink(src.join("missing"), src.join("dangling")).expect("Failed to link");

        let exclusions = ExclusionSet::from_tokens([".*", "node_modules"]);
        let items = enumerate_candidates(&src, &temp_dir.path().join("dst"), &exclusions, options(true))
            .expect("Failed to enumerate");
        let names = relative_set(&items);

        assert!(names.contains(Path::new("link.txt")));
        assert!(!names.iter().any(|p| p.starts_with("docs-link")));
        assert!(!names.contains(Path::new("dangling")));
    }

    #[test]
    fn test_enumerate_nonexistent_source() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let result = enumerate_candidates(
            &temp_dir.path().join("nonexistent"),
            &temp_dir.path().join("dst"),
            &ExclusionSet::default(),
            options(true),
        );
        assert!(matches!(result, Err(EngineError::EnumerationFailed { .. })));
    }

    #[test]
    fn test_map_to_backup_path_trailing_separators() {
        let expected = PathBuf::from("/backup/docs/b.txt");
        for (root, dest) in [
            ("/data/src", "/backup"),
            ("/data/src/", "/backup/"),
            ("/data/src//", "/backup"),
        ] {
            let mapped = map_to_backup_path(Path::new("/data/src/docs/b.txt"), Path::new(root), Path::new(dest))
                .expect("Failed to map");
            assert_eq!(mapped, expected);
        }
    }

    #[test]
    fn test_map_to_backup_path_is_injective() {
        let root = Path::new("/data/src");
        let dest = Path::new("/backup");
        let sources = ["/data/src/a", "/data/src/a/b", "/data/src/ab", "/data/src/b/a", "/data/src/a.b"];

        let mapped: BTreeSet<PathBuf> = sources
            .iter()
            .map(|s| map_to_backup_path(Path::new(s), root, dest).expect("Failed to map"))
            .collect();
        assert_eq!(mapped.len(), sources.len());
        assert!(mapped.iter().all(|p| p.starts_with(dest)));
    }

    #[test]
    fn test_map_to_backup_path_rejects_outside_root() {
        let dest = Path::new("/backup");
        assert!(map_to_backup_path(Path::new("/data/srcx/a"), Path::new("/data/src"), dest).is_err());
        assert!(map_to_backup_path(Path::new("/data/src"), Path::new("/data/src"), dest).is_err());
        assert!(map_to_backup_path(Path::new("/data/src/../etc/passwd"), Path::new("/data/src"), dest).is_err());
    }

    #[test]
    fn test_copy_file_with_metadata() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src_file = temp_dir.path().join("source.txt");
        let dst_file = temp_dir.path().join("nested").join("dir").join("dest.txt");
        fs::write(&src_file, "test content").expect("Failed to write source");

        let mtime = filetime::FileTime::from_unix_time(1_600_000_000, 0);
        filetime::set_file_mtime(&src_file, mtime).expect("Failed to set mtime");

        let bytes = copy_file_with_metadata(&src_file, &dst_file).expect("Failed to copy");
        assert_eq!(bytes, 12);
        assert_eq!(fs::read_to_string(&dst_file).expect("Failed to read dest"), "test content");

        let copied = fs::metadata(&dst_file).expect("Failed to stat dest");
        assert_eq!(filetime::FileTime::from_last_modification_time(&copied), mtime);
    }

    #[test]
    fn test_copy_missing_source() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let result = copy_file_with_metadata(&temp_dir.path().join("gone"), &temp_dir.path().join("out"));
        assert!(matches!(result, Err(EngineError::ReadError { .. })));
    }

    #[test]
    fn test_ensure_parent_dir_exists_is_idempotent() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = temp_dir.path().join("subdir").join("file.txt");

        ensure_parent_dir_exists(&path).expect("Failed to create parent");
        ensure_parent_dir_exists(&path).expect("Second call should succeed");
        assert!(temp_dir.path().join("subdir").is_dir());
    }

    #[test]
    fn test_ensure_parent_dir_rejects_file_parent() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let blocker = temp_dir.path().join("blocker");
        fs::write(&blocker, "file").expect("Failed to write");

        let result = ensure_parent_dir_exists(&blocker.join("file.txt"));
        assert!(matches!(result, Err(EngineError::DirectoryCreationFailed { .. })));
    }
}

//! End-to-end runs against real temporary directories.

use std::fs;
use std::path::{Path, PathBuf};

use engine::checksums::{compute_bytes_checksum, ChecksumAlgorithm};
use engine::ledger::{self, Ledger};
use engine::{run_backup, BackupConfig, EngineError, RunMode};

struct Dirs {
    _temp: tempfile::TempDir,
    src: PathBuf,
    dst: PathBuf,
    exclude: PathBuf,
}

fn dirs(exclusions: &str) -> Dirs {
    let temp = tempfile::tempdir().expect("Failed to create temp dir");
    let src = temp.path().join("src");
    fs::create_dir(&src).expect("Failed to create src dir");
    let exclude = temp.path().join("exclude.txt");
    fs::write(&exclude, exclusions).expect("Failed to write exclusions");
    Dirs {
        dst: temp.path().join("dst"),
        src,
        exclude,
        _temp: temp,
    }
}

impl Dirs {
    fn config(&self) -> BackupConfig {
        BackupConfig::new(&self.src, &self.dst, &self.exclude)
    }

    fn ledger(&self) -> Ledger {
        ledger::load(&ledger::ledger_path(&self.dst)).expect("Failed to load ledger")
    }

    fn key(&self, relative: &str) -> String {
        canonical(&self.src).join(relative).to_string_lossy().into_owned()
    }
}

/// The engine records canonical source paths.
fn canonical(path: &Path) -> PathBuf {
    dunce::canonicalize(path).expect("Failed to canonicalize")
}

fn sha256(content: &str) -> String {
    compute_bytes_checksum(content.as_bytes(), ChecksumAlgorithm::Sha256)
        .hex()
        .to_string()
}

#[test]
fn dotfile_scenario_across_two_runs() {
    let d = dirs(".*\n");
    fs::write(d.src.join("a.txt"), "hello").expect("Failed to write");
    fs::write(d.src.join(".secret"), "x").expect("Failed to write");

    let first = run_backup(d.config(), None).expect("First run failed");
    assert_eq!(first.mode, Some(RunMode::FirstRun));
    assert_eq!(first.summary().copied, 1);
    assert_eq!(fs::read_to_string(d.dst.join("a.txt")).expect("Failed to read"), "hello");
    assert!(!d.dst.join(".secret").exists());

    let recorded = d.ledger();
    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded.get(&d.key("a.txt")), Some(sha256("hello").as_str()));

    fs::write(d.src.join("a.txt"), "world").expect("Failed to write");
    let second = run_backup(d.config(), None).expect("Second run failed");
    assert_eq!(second.mode, Some(RunMode::Incremental));
    let expected_dirty = canonical(&d.src).join("a.txt");
    assert_eq!(second.dirty_set.iter().collect::<Vec<_>>(), vec![&expected_dirty]);
    assert_eq!(fs::read_to_string(d.dst.join("a.txt")).expect("Failed to read"), "world");

    let recorded = d.ledger();
    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded.get(&d.key("a.txt")), Some(sha256("world").as_str()));
    assert!(!d.dst.join(".secret").exists());
    assert!(recorded.iter().all(|(path, _)| !path.contains(".secret")));
}

#[test]
fn no_op_rerun_copies_nothing() {
    let d = dirs("");
    fs::create_dir(d.src.join("nested")).expect("Failed to create dir");
    fs::write(d.src.join("one.txt"), "1").expect("Failed to write");
    fs::write(d.src.join("nested").join("two.txt"), "2").expect("Failed to write");

    run_backup(d.config(), None).expect("First run failed");
    let before = d.ledger();

    let second = run_backup(d.config(), None).expect("Second run failed");
    assert!(second.dirty_set.is_empty());
    assert_eq!(second.summary().copied, 0);
    assert_eq!(second.summary().unchanged, 2);
    assert_eq!(d.ledger(), before);
}

#[test]
fn file_added_after_first_run_is_copied() {
    let d = dirs("");
    fs::write(d.src.join("old.txt"), "old").expect("Failed to write");
    run_backup(d.config(), None).expect("First run failed");

    fs::write(d.src.join("new.txt"), "new").expect("Failed to write");
    let second = run_backup(d.config(), None).expect("Second run failed");

    assert_eq!(second.summary().copied, 1);
    assert_eq!(fs::read_to_string(d.dst.join("new.txt")).expect("Failed to read"), "new");
    assert_eq!(d.ledger().len(), 2);
}

#[test]
fn deleted_source_file_stays_in_destination_but_leaves_ledger() {
    let d = dirs("");
    fs::write(d.src.join("keep.txt"), "keep").expect("Failed to write");
    fs::write(d.src.join("drop.txt"), "drop").expect("Failed to write");
    run_backup(d.config(), None).expect("First run failed");

    fs::remove_file(d.src.join("drop.txt")).expect("Failed to remove");
    run_backup(d.config(), None).expect("Second run failed");

    assert!(d.dst.join("drop.txt").exists());
    let recorded = d.ledger();
    assert_eq!(recorded.len(), 1);
    assert!(!recorded.contains(&d.key("drop.txt")));
}

#[test]
fn excluded_names_never_reach_destination_or_ledger() {
    let d = dirs("build\nnotes.tmp\n");
    fs::create_dir(d.src.join("build")).expect("Failed to create dir");
    fs::create_dir(d.src.join("lib")).expect("Failed to create dir");
    fs::write(d.src.join("build").join("out.bin"), "bin").expect("Failed to write");
    fs::write(d.src.join("lib").join("notes.tmp"), "tmp").expect("Failed to write");
    fs::write(d.src.join("lib").join("code.rs"), "fn main() {}").expect("Failed to write");
    fs::write(d.src.join(".hidden"), "kept without the .* directive").expect("Failed to write");

    let job = run_backup(d.config(), None).expect("Run failed");

    assert_eq!(job.files.len(), 2);
    assert!(!d.dst.join("build").exists());
    assert!(!d.dst.join("lib").join("notes.tmp").exists());
    assert!(d.dst.join("lib").join("code.rs").exists());
    assert!(d.dst.join(".hidden").exists());
    assert_eq!(d.ledger().len(), 2);
}

#[test]
fn non_recursive_run_only_backs_up_top_level() {
    let d = dirs("");
    fs::create_dir(d.src.join("sub")).expect("Failed to create dir");
    fs::write(d.src.join("top.txt"), "top").expect("Failed to write");
    fs::write(d.src.join("sub").join("inner.txt"), "inner").expect("Failed to write");

    let mut config = d.config();
    config.recursive = false;
    let job = run_backup(config, None).expect("Run failed");

    assert_eq!(job.files.len(), 1);
    assert!(d.dst.join("top.txt").exists());
    assert!(!d.dst.join("sub").exists());
}

#[test]
fn backing_up_into_the_source_is_refused_before_anything_is_written() {
    let d = dirs("");
    fs::write(d.src.join("a.txt"), "precious data").expect("Failed to write");

    let config = BackupConfig::new(&d.src, &d.src, &d.exclude);
    let result = run_backup(config, None);

    assert!(matches!(result, Err(EngineError::InvalidPath { .. })));
    assert_eq!(fs::read_to_string(d.src.join("a.txt")).expect("Failed to read"), "precious data");
    assert!(!ledger::ledger_path(&d.src).exists());
    assert!(!ledger::meta_path(&d.src).exists());
}

#[test]
fn backing_up_a_backup_keeps_its_ledger_out_of_the_new_one() {
    let first = dirs("");
    fs::write(first.src.join("a.txt"), "hello").expect("Failed to write");
    run_backup(first.config(), None).expect("First backup failed");

    // The first destination becomes the source of a second backup.
    let second_dst = first.dst.parent().expect("dst has a parent").join("second");
    let config = BackupConfig::new(&first.dst, &second_dst, &first.exclude);
    let job = run_backup(config, None).expect("Second backup failed");

    assert_eq!(job.summary().copied, 1);
    let recorded = ledger::load(&ledger::ledger_path(&second_dst)).expect("Failed to load ledger");
    assert_eq!(recorded.len(), 1);
    let key = canonical(&first.dst).join("a.txt").to_string_lossy().into_owned();
    assert_eq!(recorded.get(&key), Some(sha256("hello").as_str()));
}

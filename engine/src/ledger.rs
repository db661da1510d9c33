//! The digest ledger: the persisted baseline for change detection.
//!
//! The ledger lives at `<destination>/diff_file.csv`. It is a UTF-8,
//! comma-separated table with the header `path,hash` followed by one row per
//! source file: the file's path and its lowercase hex digest. Fields that
//! contain a comma, a double quote or a line break are quoted, with embedded
//! quotes doubled. Rows are written with `\r\n` terminators; `\n` is accepted
//! on read.
//!
//! Next to it, `<destination>/diff_file.meta` records the ledger version and
//! the digest algorithm as `key=value` lines. A ledger without this marker is
//! read as version 1 with sha256 digests.
//!
//! Both files are replaced atomically: the new content is written to a
//! temporary file in the destination directory and renamed over the old one.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tempfile::NamedTempFile;

use crate::checksums::ChecksumAlgorithm;
use crate::error::{EngineError, Result};

/// Ledger file name inside the destination root.
pub const LEDGER_FILE_NAME: &str = "diff_file.csv";

/// Marker file name inside the destination root.
pub const META_FILE_NAME: &str = "diff_file.meta";

/// Current ledger format version.
pub const LEDGER_VERSION: u32 = 1;

const HEADER: [&str; 2] = ["path", "hash"];

pub fn ledger_path(destination_root: &Path) -> PathBuf {
    destination_root.join(LEDGER_FILE_NAME)
}

pub fn meta_path(destination_root: &Path) -> PathBuf {
    destination_root.join(META_FILE_NAME)
}

/// One (path, digest) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestRecord {
    pub path: String,
    pub digest: String,
}

impl DigestRecord {
    pub fn new<P: Into<String>, D: Into<String>>(path: P, digest: D) -> Self {
        DigestRecord {
            path: path.into(),
            digest: digest.into(),
        }
    }
}

/// Digest records keyed by path, at most one per path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ledger {
    records: BTreeMap<String, String>,
}

impl Ledger {
    pub fn new() -> Self {
        Ledger::default()
    }

    /// Insert or replace the record for `path`, returning the previous digest.
    pub fn insert<P: Into<String>, D: Into<String>>(&mut self, path: P, digest: D) -> Option<String> {
        self.records.insert(path.into(), digest.into())
    }

    pub fn get(&self, path: &str) -> Option<&str> {
        self.records.get(path).map(String::as_str)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.records.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records in path order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.records.iter().map(|(p, d)| (p.as_str(), d.as_str()))
    }
}

impl FromIterator<DigestRecord> for Ledger {
    /// Later records for the same path replace earlier ones.
    fn from_iter<I: IntoIterator<Item = DigestRecord>>(iter: I) -> Self {
        let mut ledger = Ledger::new();
        for record in iter {
            ledger.insert(record.path, record.digest);
        }
        ledger
    }
}

/// Load a ledger file.
///
/// A missing or empty file yields an empty ledger. Duplicate paths keep the
/// last row.
///
/// # Errors
/// `LedgerIo` if the file exists but cannot be read, `LedgerParse` if the
/// header is wrong, a row does not have exactly two fields, or a digest is
/// not lowercase hex.
pub fn load(path: &Path) -> Result<Ledger> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Ledger::new()),
        Err(e) => {
            return Err(EngineError::LedgerIo {
                path: path.to_path_buf(),
                source: e,
            })
        }
    };

    let parse_error = |line: usize, reason: String| EngineError::LedgerParse {
        path: path.to_path_buf(),
        line,
        reason,
    };

    let content = content.strip_prefix('\u{feff}').unwrap_or(&content);
    let mut rows = parse_rows(content).map_err(|(line, reason)| parse_error(line, reason))?.into_iter();

    let Some(header) = rows.next() else {
        return Ok(Ledger::new());
    };
    if header.fields != HEADER {
        return Err(parse_error(
            header.line,
            format!("expected header 'path,hash', found '{}'", header.fields.join(",")),
        ));
    }

    let mut ledger = Ledger::new();
    for row in rows {
        let [file_path, digest]: [String; 2] = row.fields.try_into().map_err(|fields: Vec<String>| {
            parse_error(row.line, format!("expected 2 fields, found {}", fields.len()))
        })?;
        if digest.is_empty() || !digest.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b)) {
            return Err(parse_error(row.line, format!("invalid digest '{}'", digest)));
        }
        if let Some(previous) = ledger.insert(file_path.clone(), digest) {
            tracing::warn!(
                ledger = %path.display(),
                path = %file_path,
                previous = %previous,
                "duplicate ledger row; keeping the later digest"
            );
        }
    }

    Ok(ledger)
}

/// Atomically replace the ledger with exactly the given records.
///
/// # Errors
/// `LedgerIo` if the temporary file cannot be written or renamed.
pub fn rewrite(path: &Path, ledger: &Ledger) -> Result<()> {
    let mut out = String::new();
    push_row(&mut out, &HEADER);
    for (file_path, digest) in ledger.iter() {
        push_row(&mut out, &[file_path, digest]);
    }
    write_atomic(path, out.as_bytes())?;
    tracing::debug!(path = %path.display(), records = ledger.len(), "ledger rewritten");
    Ok(())
}

/// Versioning marker stored next to the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerMeta {
    pub version: u32,
    pub algorithm: ChecksumAlgorithm,
    pub updated: Option<DateTime<Utc>>,
}

impl LedgerMeta {
    /// Marker for a ledger written now with `algorithm`.
    pub fn current(algorithm: ChecksumAlgorithm) -> Self {
        LedgerMeta {
            version: LEDGER_VERSION,
            algorithm,
            updated: Some(Utc::now()),
        }
    }

    /// Implied marker of a ledger written before markers existed.
    pub fn legacy() -> Self {
        LedgerMeta {
            version: 1,
            algorithm: ChecksumAlgorithm::Sha256,
            updated: None,
        }
    }
}

/// Load the marker, `None` if it does not exist.
///
/// # Errors
/// `LedgerIo` on read failure, `LedgerParse` on an unknown version, an
/// unknown algorithm or a malformed timestamp.
pub fn load_meta(path: &Path) -> Result<Option<LedgerMeta>> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(EngineError::LedgerIo {
                path: path.to_path_buf(),
                source: e,
            })
        }
    };

    let parse_error = |line: usize, reason: String| EngineError::LedgerParse {
        path: path.to_path_buf(),
        line,
        reason,
    };

    let mut meta = LedgerMeta::legacy();
    let mut saw_version = false;
    for (index, line) in content.lines().enumerate() {
        let line_no = index + 1;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            return Err(parse_error(line_no, format!("expected key=value, found '{}'", line)));
        };
        let value = value.trim();
        match key.trim() {
            "version" => {
                let version: u32 = value
                    .parse()
                    .map_err(|_| parse_error(line_no, format!("invalid version '{}'", value)))?;
                if version != LEDGER_VERSION {
                    return Err(parse_error(line_no, format!("unsupported ledger version {}", version)));
                }
                meta.version = version;
                saw_version = true;
            }
            "algorithm" => {
                meta.algorithm = value.parse().map_err(|reason| parse_error(line_no, reason))?;
            }
            "updated" => {
                let updated = DateTime::parse_from_rfc3339(value)
                    .map_err(|e| parse_error(line_no, format!("invalid timestamp '{}': {}", value, e)))?;
                meta.updated = Some(updated.with_timezone(&Utc));
            }
            _ => {}
        }
    }

    if !saw_version {
        return Err(parse_error(1, "missing version".to_string()));
    }
    Ok(Some(meta))
}

/// Atomically replace the marker.
pub fn write_meta(path: &Path, meta: &LedgerMeta) -> Result<()> {
    let mut out = format!("version={}\nalgorithm={}\n", meta.version, meta.algorithm);
    if let Some(updated) = meta.updated {
        out.push_str(&format!("updated={}\n", updated.to_rfc3339()));
    }
    write_atomic(path, out.as_bytes())
}

fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let io_error = |e: io::Error| EngineError::LedgerIo {
        path: path.to_path_buf(),
        source: e,
    };

    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir).map_err(io_error)?;
    tmp.write_all(contents).map_err(io_error)?;
    tmp.as_file().sync_all().map_err(io_error)?;
    tmp.persist(path).map_err(|e| io_error(e.error))?;
    Ok(())
}

/// One parsed row and the line it started on.
#[derive(Debug)]
struct Row {
    line: usize,
    fields: Vec<String>,
}

fn parse_rows(content: &str) -> std::result::Result<Vec<Row>, (usize, String)> {
    let mut rows = Vec::new();
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut quoted = false;
    let mut in_quotes = false;
    let mut line = 1;
    let mut row_line = 1;

    let mut chars = content.chars().peekable();
    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    chars.next();
                    field.push('"');
                }
                '"' => in_quotes = false,
                '\n' => {
                    line += 1;
                    field.push(c);
                }
                _ => field.push(c),
            }
            continue;
        }

        match c {
            '"' if field.is_empty() && !quoted => {
                quoted = true;
                in_quotes = true;
            }
            '"' => return Err((line, "stray quote in field".to_string())),
            ',' => {
                fields.push(std::mem::take(&mut field));
                quoted = false;
            }
            '\r' if chars.peek() == Some(&'\n') => {}
            '\n' => {
                fields.push(std::mem::take(&mut field));
                let blank = !quoted && fields.len() == 1 && fields[0].is_empty();
                if !blank {
                    rows.push(Row {
                        line: row_line,
                        fields: std::mem::take(&mut fields),
                    });
                }
                fields.clear();
                quoted = false;
                line += 1;
                row_line = line;
            }
            _ => field.push(c),
        }
    }

    if in_quotes {
        return Err((row_line, "unterminated quoted field".to_string()));
    }
    if quoted || !field.is_empty() || !fields.is_empty() {
        fields.push(field);
        rows.push(Row {
            line: row_line,
            fields,
        });
    }

    Ok(rows)
}

fn push_row(out: &mut String, fields: &[&str]) {
    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        if field.contains([',', '"', '\r', '\n']) {
            out.push('"');
            out.push_str(&field.replace('"', "\"\""));
            out.push('"');
        } else {
            out.push_str(field);
        }
    }
    out.push_str("\r\n");
}

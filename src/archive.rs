//! Chunk archive codec.
//!
//! A chunk archive is a zip file with a single deflate-compressed entry,
//! `chunk.json`, holding a JSON array of converted rows. Archives are written
//! to a `.part` file, synced, and renamed into place, so a listed archive is
//! always complete. The SHA-256 of the entry is returned on write and checked
//! on read.

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use thiserror::Error;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use uplink_core::convert::FieldValue;

/// Name of the single entry inside every archive.
pub const ENTRY_NAME: &str = "chunk.json";

/// Archive file suffix.
pub const ARCHIVE_SUFFIX: &str = ".json.zip";

/// Maximum decompressed bytes read from an archive entry (zip-bomb protection).
const MAX_ENTRY_BYTES: u64 = 256 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("archive i/o failed for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("archive {path} is not a valid zip: {source}")]
    Zip {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },
    #[error("archive {path} holds malformed row data: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("archive {path} does not match its recorded digest")]
    DigestMismatch { path: PathBuf },
    #[error("archive {path} entry exceeds {limit} bytes")]
    TooLarge { path: PathBuf, limit: u64 },
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> ArchiveError + '_ {
    move |source| ArchiveError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn zip_err(path: &Path) -> impl FnOnce(zip::result::ZipError) -> ArchiveError + '_ {
    move |source| ArchiveError::Zip {
        path: path.to_path_buf(),
        source,
    }
}

/// Result of writing one archive.
#[derive(Debug, Clone)]
pub struct WrittenArchive {
    pub path: PathBuf,
    pub sha256: String,
    pub rows: u64,
}

fn digest_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Serialize `rows` and write them as a single-entry archive at `path`.
pub fn write_archive(path: &Path, rows: &[Vec<FieldValue>]) -> Result<WrittenArchive, ArchiveError> {
    let json = serde_json::to_vec(rows).map_err(|source| ArchiveError::Json {
        path: path.to_path_buf(),
        source,
    })?;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io_err(parent))?;
    }

    let part = part_path(path);
    let file = File::create(&part).map_err(io_err(&part))?;
    let mut writer = ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    writer
        .start_file(ENTRY_NAME, options)
        .map_err(zip_err(&part))?;
    writer.write_all(&json).map_err(io_err(&part))?;
    let file = writer.finish().map_err(zip_err(&part))?;
    file.sync_all().map_err(io_err(&part))?;
    drop(file);

    fs::rename(&part, path).map_err(io_err(path))?;

    Ok(WrittenArchive {
        path: path.to_path_buf(),
        sha256: digest_hex(&json),
        rows: rows.len() as u64,
    })
}

/// Read an archive back as raw JSON rows, verifying its digest when one is
/// given.
pub fn read_archive(
    path: &Path,
    expected_sha256: Option<&str>,
) -> Result<Vec<Vec<serde_json::Value>>, ArchiveError> {
    let file = File::open(path).map_err(io_err(path))?;
    let mut archive = ZipArchive::new(file).map_err(zip_err(path))?;
    let entry = archive.by_name(ENTRY_NAME).map_err(zip_err(path))?;

    let mut bytes = Vec::new();
    entry
        .take(MAX_ENTRY_BYTES)
        .read_to_end(&mut bytes)
        .map_err(io_err(path))?;
    if bytes.len() as u64 >= MAX_ENTRY_BYTES {
        return Err(ArchiveError::TooLarge {
            path: path.to_path_buf(),
            limit: MAX_ENTRY_BYTES,
        });
    }

    if let Some(expected) = expected_sha256 {
        if digest_hex(&bytes) != expected {
            return Err(ArchiveError::DigestMismatch {
                path: path.to_path_buf(),
            });
        }
    }

    serde_json::from_slice(&bytes).map_err(|source| ArchiveError::Json {
        path: path.to_path_buf(),
        source,
    })
}

fn part_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".part");
    PathBuf::from(name)
}

/// Produces unique, time-ordered archive names within one folder.
///
/// Names are `<unix micros, 20 digits>-<sequence, 6 digits>.json.zip`; the
/// sequence breaks ties inside one microsecond.
#[derive(Debug, Default)]
pub struct ChunkNamer {
    last_micros: i64,
    seq: u32,
}

impl ChunkNamer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_name(&mut self) -> String {
        let micros = chrono::Utc::now().timestamp_micros().max(self.last_micros);
        if micros == self.last_micros {
            self.seq += 1;
        } else {
            self.last_micros = micros;
            self.seq = 0;
        }
        format!("{:020}-{:06}{}", micros, self.seq, ARCHIVE_SUFFIX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn rows() -> Vec<Vec<FieldValue>> {
        vec![
            vec![FieldValue::Number(1.5), FieldValue::Text("a".to_string())],
            vec![FieldValue::Number(2.0), FieldValue::Text("b".to_string())],
        ]
    }

    #[test]
    fn written_archive_reads_back_with_digest() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("chunks").join("x.json.zip");
        let written = write_archive(&path, &rows()).unwrap();
        assert_eq!(written.rows, 2);
        assert!(path.exists());
        assert!(!part_path(&path).exists());

        let back = read_archive(&path, Some(&written.sha256)).unwrap();
        assert_eq!(back, vec![
            vec![serde_json::json!(1.5), serde_json::json!("a")],
            vec![serde_json::json!(2.0), serde_json::json!("b")],
        ]);
    }

    #[test]
    fn digest_mismatch_is_detected() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("x.json.zip");
        write_archive(&path, &rows()).unwrap();
        let err = read_archive(&path, Some("deadbeef")).unwrap_err();
        assert!(matches!(err, ArchiveError::DigestMismatch { .. }));
    }

    #[test]
    fn missing_archive_is_an_io_error() {
        let tmp = TempDir::new().unwrap();
        let err = read_archive(&tmp.path().join("nope.json.zip"), None).unwrap_err();
        assert!(matches!(err, ArchiveError::Io { .. }));
    }

    #[test]
    fn names_are_unique_and_ordered() {
        let mut namer = ChunkNamer::new();
        let names: Vec<String> = (0..50).map(|_| namer.next_name()).collect();
        let mut sorted = names.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(sorted, names);
        assert!(names[0].ends_with(ARCHIVE_SUFFIX));
    }
}

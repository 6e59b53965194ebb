//! Row sources for the chunk pipeline.
//!
//! A [`RowSource`] yields raw rows one at a time; nothing here buffers a
//! whole file.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use crate::error::{TaskError, TaskResult};

/// One row as read from a source.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceRow {
    pub fields: Vec<String>,
    /// The record as it appeared in the input, without its line terminator.
    /// An invalid row is written to the errors file as these bytes.
    pub raw: Option<Vec<u8>>,
    /// A field was not valid UTF-8. Such a row is always invalid.
    pub undecodable: bool,
}

impl From<Vec<String>> for SourceRow {
    fn from(fields: Vec<String>) -> Self {
        Self {
            fields,
            raw: None,
            undecodable: false,
        }
    }
}

pub trait RowSource: Send {
    /// The next raw row, or `None` at end of input.
    fn next_row(&mut self) -> TaskResult<Option<SourceRow>>;
}

/// Delimited text file read with the `csv` crate.
///
/// No header row is assumed and records may differ in length; a record
/// whose width does not match the validation spec is rejected later, by
/// the converters. Every record is reported, blank lines included (as a row
/// with no fields). A quoted field may span lines.
pub struct CsvFileSource {
    path: PathBuf,
    input: BufReader<File>,
    delimiter: u8,
}

impl CsvFileSource {
    pub fn open(path: &Path, delimiter: u8) -> TaskResult<Self> {
        let file = File::open(path).map_err(|e| TaskError::Source {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Ok(Self {
            path: path.to_path_buf(),
            input: BufReader::new(file),
            delimiter,
        })
    }

    fn source_error(&self, message: impl ToString) -> TaskError {
        TaskError::Source {
            path: self.path.clone(),
            message: message.to_string(),
        }
    }

    /// Read physical lines until the record's quotes are balanced.
    fn read_record_bytes(&mut self) -> TaskResult<Option<Vec<u8>>> {
        let mut raw = Vec::new();
        let mut quoted = false;
        loop {
            let start = raw.len();
            let n = self
                .input
                .read_until(b'\n', &mut raw)
                .map_err(|e| self.source_error(e))?;
            if n == 0 {
                if raw.is_empty() {
                    return Ok(None);
                }
                break;
            }
            quoted = still_quoted(&raw[start..], self.delimiter, quoted);
            if !quoted {
                break;
            }
        }
        if raw.last() == Some(&b'\n') {
            raw.pop();
            if raw.last() == Some(&b'\r') {
                raw.pop();
            }
        }
        Ok(Some(raw))
    }
}

impl RowSource for CsvFileSource {
    fn next_row(&mut self) -> TaskResult<Option<SourceRow>> {
        let Some(raw) = self.read_record_bytes()? else {
            return Ok(None);
        };
        if raw.is_empty() {
            return Ok(Some(SourceRow {
                fields: Vec::new(),
                raw: Some(raw),
                undecodable: false,
            }));
        }

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .delimiter(self.delimiter)
            .from_reader(raw.as_slice());
        let mut record = csv::ByteRecord::new();
        reader
            .read_byte_record(&mut record)
            .map_err(|e| self.source_error(e))?;

        let mut undecodable = false;
        let fields: Vec<String> = record
            .iter()
            .map(|field| match std::str::from_utf8(field) {
                Ok(text) => text.to_string(),
                Err(_) => {
                    undecodable = true;
                    String::from_utf8_lossy(field).into_owned()
                }
            })
            .collect();
        Ok(Some(SourceRow {
            fields,
            raw: Some(raw),
            undecodable,
        }))
    }
}

/// Whether a quoted field is still open at the end of `line`, given whether
/// one was open at its start. A quote only opens a field at its first byte;
/// `""` inside a quoted field is an escaped quote.
fn still_quoted(line: &[u8], delimiter: u8, mut quoted: bool) -> bool {
    let mut field_start = !quoted;
    let mut bytes = line.iter().peekable();
    while let Some(&b) = bytes.next() {
        if quoted {
            if b == b'"' {
                if bytes.peek() == Some(&&b'"') {
                    bytes.next();
                } else {
                    quoted = false;
                }
            }
        } else if b == b'"' && field_start {
            quoted = true;
        }
        field_start = !quoted && b == delimiter;
    }
    quoted
}

/// Rows already in memory.
#[derive(Debug, Default)]
pub struct VecSource {
    rows: VecDeque<Vec<String>>,
}

impl VecSource {
    pub fn new(rows: Vec<Vec<String>>) -> Self {
        Self { rows: rows.into() }
    }
}

impl RowSource for VecSource {
    fn next_row(&mut self) -> TaskResult<Option<SourceRow>> {
        Ok(self.rows.pop_front().map(SourceRow::from))
    }
}

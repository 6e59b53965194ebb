//! Field converters.
//!
//! A project's validation spec is an ordered list of [`FieldType`] tags, one
//! per column. [`converters_for`] turns that list into converter functions
//! once; [`convert_row`] applies them positionally to every row.

use std::fmt;
use std::str::FromStr;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize, Serializer};
use thiserror::Error;

/// Timestamp layouts accepted by the `timestamp` converter, tried in order.
const TIMESTAMP_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"];
const DATE_FORMAT: &str = "%Y-%m-%d";
const ISO_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Column type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Number,
    Text,
    Timestamp,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::Number => "number",
            FieldType::Text => "text",
            FieldType::Timestamp => "timestamp",
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FieldType {
    type Err = SpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "number" => Ok(FieldType::Number),
            "text" => Ok(FieldType::Text),
            "timestamp" | "datetimestamp" => Ok(FieldType::Timestamp),
            other => Err(SpecError::UnknownTag(other.to_string())),
        }
    }
}

/// A validation spec could not be parsed.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SpecError {
    #[error("unknown validation tag: '{0}' (expected number, text, or timestamp)")]
    UnknownTag(String),
    #[error("validation spec is empty")]
    Empty,
}

/// Parse a comma-separated tag list such as `"number,text,timestamp"`.
pub fn parse_validation(spec: &str) -> Result<Vec<FieldType>, SpecError> {
    if spec.trim().is_empty() {
        return Err(SpecError::Empty);
    }
    spec.split(',').map(FieldType::from_str).collect()
}

/// Render a tag list back to its comma-separated form.
pub fn format_validation(tags: &[FieldType]) -> String {
    tags.iter()
        .map(FieldType::as_str)
        .collect::<Vec<_>>()
        .join(",")
}

/// A converted cell.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Number(f64),
    Text(String),
    Timestamp(NaiveDateTime),
}

impl Serialize for FieldValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            FieldValue::Number(n) => serializer.serialize_f64(*n),
            FieldValue::Text(s) => serializer.serialize_str(s),
            FieldValue::Timestamp(ts) => serializer.collect_str(&ts.format(ISO_FORMAT)),
        }
    }
}

/// A single field failed to convert.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("column {column}: '{raw}' is not a valid {tag}")]
pub struct ConversionError {
    pub column: usize,
    pub tag: FieldType,
    pub raw: String,
}

/// Why a row was rejected.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RowError {
    #[error("expected {expected} fields, found {found}")]
    FieldCount { expected: usize, found: usize },
    #[error(transparent)]
    Conversion(#[from] ConversionError),
}

/// A converter maps raw text to a typed value, or `None` on failure.
pub type Converter = fn(&str) -> Option<FieldValue>;

fn convert_number(raw: &str) -> Option<FieldValue> {
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|n| n.is_finite())
        .map(FieldValue::Number)
}

fn convert_text(raw: &str) -> Option<FieldValue> {
    Some(FieldValue::Text(raw.to_string()))
}

fn convert_timestamp(raw: &str) -> Option<FieldValue> {
    let trimmed = raw.trim();
    if let Ok(date) = NaiveDate::parse_from_str(trimmed, DATE_FORMAT) {
        return date.and_hms_opt(0, 0, 0).map(FieldValue::Timestamp);
    }
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(trimmed, fmt).ok())
        .map(FieldValue::Timestamp)
}

/// Converter for a single tag.
pub fn converter(tag: FieldType) -> Converter {
    match tag {
        FieldType::Number => convert_number,
        FieldType::Text => convert_text,
        FieldType::Timestamp => convert_timestamp,
    }
}

/// Ordered converters for a project's validation spec.
#[derive(Debug, Clone)]
pub struct RowConverter {
    tags: Vec<FieldType>,
    funcs: Vec<Converter>,
}

/// Derive the converters for a spec once, for reuse on every row.
pub fn converters_for(tags: &[FieldType]) -> RowConverter {
    RowConverter {
        tags: tags.to_vec(),
        funcs: tags.iter().copied().map(converter).collect(),
    }
}

impl RowConverter {
    pub fn width(&self) -> usize {
        self.funcs.len()
    }

    /// Convert a row positionally. The row is rejected on a field-count
    /// mismatch or at the first field that fails to convert.
    pub fn convert<S: AsRef<str>>(&self, row: &[S]) -> Result<Vec<FieldValue>, RowError> {
        if row.len() != self.funcs.len() {
            return Err(RowError::FieldCount {
                expected: self.funcs.len(),
                found: row.len(),
            });
        }
        let mut out = Vec::with_capacity(row.len());
        for (column, ((func, tag), raw)) in self
            .funcs
            .iter()
            .zip(self.tags.iter())
            .zip(row.iter())
            .enumerate()
        {
            let raw = raw.as_ref();
            match func(raw) {
                Some(value) => out.push(value),
                None => {
                    return Err(ConversionError {
                        column,
                        tag: *tag,
                        raw: raw.to_string(),
                    }
                    .into())
                }
            }
        }
        Ok(out)
    }
}

/// Convenience wrapper around [`RowConverter::convert`].
pub fn convert_row<S: AsRef<str>>(
    converters: &RowConverter,
    row: &[S],
) -> Result<Vec<FieldValue>, RowError> {
    converters.convert(row)
}

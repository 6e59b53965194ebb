//! Core data models used throughout tabular-uplink.
//!
//! A [`Project`] is one ingestion job: a source of rows, the validation
//! tags for its columns, status flags, and running counters. A [`Chunk`]
//! is one durable, uploadable batch of converted rows owned by a project.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::convert::FieldType;

/// Where a project's rows come from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProjectSource {
    /// A delimited text file on local disk.
    File { path: PathBuf, delimiter: u8 },
    /// An inbound folder of JSON row-batch files written by a listener.
    Server { inbox: PathBuf, delimiter: u8 },
}

impl ProjectSource {
    pub fn delimiter(&self) -> u8 {
        match self {
            ProjectSource::File { delimiter, .. } | ProjectSource::Server { delimiter, .. } => {
                *delimiter
            }
        }
    }

    pub fn is_server(&self) -> bool {
        matches!(self, ProjectSource::Server { .. })
    }

    /// Short name stored in the `source_kind` column.
    pub fn kind(&self) -> &'static str {
        match self {
            ProjectSource::File { .. } => "file",
            ProjectSource::Server { .. } => "server",
        }
    }

    /// File path or inbox folder.
    pub fn location(&self) -> &PathBuf {
        match self {
            ProjectSource::File { path, .. } => path,
            ProjectSource::Server { inbox, .. } => inbox,
        }
    }
}

/// Coarse status label shown for a project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatusLabel {
    New,
    Validating,
    ReadyForUpload,
    Uploading,
    Reconciling,
    Done,
    Serving,
    Idle,
    Stopped,
    Broken,
}

impl StatusLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusLabel::New => "New",
            StatusLabel::Validating => "Validating...",
            StatusLabel::ReadyForUpload => "Ready for upload",
            StatusLabel::Uploading => "Uploading...",
            StatusLabel::Reconciling => "Reconciling...",
            StatusLabel::Done => "Done",
            StatusLabel::Serving => "Serving...",
            StatusLabel::Idle => "Idle",
            StatusLabel::Stopped => "Stopped",
            StatusLabel::Broken => "Broken",
        }
    }
}

impl fmt::Display for StatusLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StatusLabel {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let label = match s {
            "New" => StatusLabel::New,
            "Validating..." => StatusLabel::Validating,
            "Ready for upload" => StatusLabel::ReadyForUpload,
            "Uploading..." => StatusLabel::Uploading,
            "Reconciling..." => StatusLabel::Reconciling,
            "Done" => StatusLabel::Done,
            "Serving..." => StatusLabel::Serving,
            "Idle" => StatusLabel::Idle,
            "Stopped" => StatusLabel::Stopped,
            "Broken" => StatusLabel::Broken,
            other => anyhow::bail!("unknown status label: '{}'", other),
        };
        Ok(label)
    }
}

/// One ingestion job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: i64,
    pub name: String,
    pub source: ProjectSource,
    pub project_token: String,
    pub validation: Vec<FieldType>,

    pub status: StatusLabel,
    pub in_progress: bool,
    pub paused: bool,
    pub stopped: bool,
    pub idle: bool,
    pub validated: bool,
    pub uploaded: bool,
    pub last_error: Option<String>,

    pub records_validated: u64,
    pub records_invalid: u64,
    pub records_uploaded: u64,

    pub errors_file: Option<PathBuf>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Project {
    /// A project has been interrupted if the process died while it was
    /// running or paused.
    pub fn is_interrupted(&self) -> bool {
        self.in_progress || self.paused
    }
}

/// Fields supplied by the "add project" action.
#[derive(Debug, Clone)]
pub struct NewProject {
    pub name: String,
    pub source: ProjectSource,
    pub project_token: String,
    pub validation: Vec<FieldType>,
}

/// One durable, uploadable batch of converted rows.
///
/// The archive at `path` is immutable once written; only `uploaded` and
/// `upload_id` change afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: i64,
    pub project_id: i64,
    pub path: PathBuf,
    /// Caller-assigned identity sent to the collector as `chunk_id`.
    pub chunk_key: String,
    pub rows: u64,
    /// Hex SHA-256 of the archive entry.
    pub sha256: String,
    pub uploaded: bool,
    pub upload_id: Option<String>,
}

/// Fields written when the pipeline records a new archive.
#[derive(Debug, Clone)]
pub struct NewChunk {
    pub project_id: i64,
    pub path: PathBuf,
    pub rows: u64,
    pub sha256: String,
}

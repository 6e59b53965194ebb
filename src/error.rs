//! Errors that stop a task.
//!
//! Row conversion failures never appear here: an invalid row is counted and
//! written to the errors file, and the task carries on.

use std::path::PathBuf;

use thiserror::Error;

use crate::archive::ArchiveError;
use crate::collector::CollectorError;

#[derive(Debug, Error)]
pub enum TaskError {
    /// A chunk archive or errors file could not be written.
    #[error("failed to write {path}: {source}")]
    ChunkWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A chunk archive could not be written or read back.
    #[error(transparent)]
    Archive(#[from] ArchiveError),

    /// The row source could not be opened or read.
    #[error("failed to read rows from {path}: {message}")]
    Source { path: PathBuf, message: String },

    /// The collector refused an upload or could not be reached.
    #[error("upload failed: {0}")]
    Upload(#[from] CollectorError),

    #[error("too many reconciliation cycles ({cycles}); the collector never acknowledged {pending} chunk(s)")]
    ReconciliationExceeded { cycles: u32, pending: usize },

    #[error("not logged in: no login token is stored")]
    NotLoggedIn,

    #[error(transparent)]
    Store(#[from] anyhow::Error),

    /// A step panicked; caught by the scheduler.
    #[error("task panicked: {0}")]
    Panicked(String),
}

impl TaskError {
    pub fn chunk_write(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        TaskError::ChunkWrite {
            path: path.into(),
            source,
        }
    }
}

pub type TaskResult<T> = Result<T, TaskError>;

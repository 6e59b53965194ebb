//! On-disk layout of per-project working files.
//!
//! ```text
//! <storage root>/
//!   <project id>/
//!     chunks/                 compressed chunk archives
//!     rejected/               inbound files that could not be parsed
//!     validating_errors.csv   invalid rows, one per line
//! ```

use std::path::{Path, PathBuf};

const CHUNKS_DIR: &str = "chunks";
const REJECTED_DIR: &str = "rejected";
const ERRORS_FILE: &str = "validating_errors.csv";

#[derive(Debug, Clone)]
pub struct StorageLayout {
    root: PathBuf,
}

impl StorageLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn project_dir(&self, project_id: i64) -> PathBuf {
        self.root.join(project_id.to_string())
    }

    pub fn chunks_dir(&self, project_id: i64) -> PathBuf {
        self.project_dir(project_id).join(CHUNKS_DIR)
    }

    pub fn rejected_dir(&self, project_id: i64) -> PathBuf {
        self.project_dir(project_id).join(REJECTED_DIR)
    }

    pub fn errors_file(&self, project_id: i64) -> PathBuf {
        self.project_dir(project_id).join(ERRORS_FILE)
    }
}

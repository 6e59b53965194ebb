//! Storage abstraction for tabular-uplink.
//!
//! The [`Store`] trait is the persistence contract every component works
//! against: the chunk pipeline, the upload coordinator, the scheduler, and
//! startup recovery. Each method is one transaction. The store is
//! single-writer; nothing here takes locks across calls.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{Chunk, NewChunk, NewProject, Project};

/// Settings key holding the collector login token.
pub const LOGIN_TOKEN_KEY: &str = "login_token";

/// Abstract storage backend.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`create_project`](Store::create_project) | Insert a project in status `New` |
/// | [`update_project`](Store::update_project) | Persist status flags, counters, and error |
/// | [`interrupted_projects`](Store::interrupted_projects) | Projects left in progress or paused |
/// | [`upsert_chunk`](Store::upsert_chunk) | Insert or replace a chunk keyed by (project, path) |
/// | [`chunks_without_upload_id`](Store::chunks_without_upload_id) | Chunks still to send |
/// | [`mark_chunk_uploaded`](Store::mark_chunk_uploaded) | Record the collector's upload id |
/// | [`sum_uploaded_rows`](Store::sum_uploaded_rows) | Rows across uploaded chunks |
/// | [`delete_chunks`](Store::delete_chunks) | Remove every chunk record of a project |
#[async_trait]
pub trait Store: Send + Sync {
    async fn create_project(&self, project: &NewProject) -> Result<Project>;

    async fn get_project(&self, id: i64) -> Result<Option<Project>>;

    /// All projects ordered by id.
    async fn list_projects(&self) -> Result<Vec<Project>>;

    /// Overwrite the mutable fields of an existing project.
    async fn update_project(&self, project: &Project) -> Result<()>;

    /// Projects whose `in_progress` or `paused` flag is set.
    async fn interrupted_projects(&self) -> Result<Vec<Project>>;

    /// Insert a chunk, or replace the payload of the chunk already recorded
    /// at the same `(project_id, path)`. A replaced chunk gets a fresh
    /// chunk key and loses its upload state.
    async fn upsert_chunk(&self, chunk: &NewChunk) -> Result<Chunk>;

    /// All chunks of a project ordered by archive path.
    async fn list_chunks(&self, project_id: i64) -> Result<Vec<Chunk>>;

    /// Chunks with no upload id, ordered by archive path.
    async fn chunks_without_upload_id(&self, project_id: i64) -> Result<Vec<Chunk>>;

    async fn mark_chunk_uploaded(&self, chunk_id: i64, upload_id: &str) -> Result<()>;

    /// Remove all chunk records for a project; returns how many were removed.
    async fn delete_chunks(&self, project_id: i64) -> Result<u64>;

    async fn sum_uploaded_rows(&self, project_id: i64) -> Result<u64>;

    async fn get_setting(&self, key: &str) -> Result<Option<String>>;

    async fn set_setting(&self, key: &str, value: &str) -> Result<()>;
}

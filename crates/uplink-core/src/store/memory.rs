//! In-memory [`Store`] implementation for tests and embedding.
//!
//! Keeps projects, chunks, and settings behind a single `std::sync::RwLock`.

use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use uuid::Uuid;

use crate::models::{Chunk, NewChunk, NewProject, Project, StatusLabel};

use super::Store;

#[derive(Default)]
struct Inner {
    projects: BTreeMap<i64, Project>,
    chunks: Vec<Chunk>,
    settings: HashMap<String, String>,
    next_project_id: i64,
    next_chunk_id: i64,
}

/// In-memory store.
#[derive(Default)]
pub struct InMemoryStore {
    inner: RwLock<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Inner>> {
        self.inner.read().map_err(|_| anyhow!("in-memory store lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Inner>> {
        self.inner.write().map_err(|_| anyhow!("in-memory store lock poisoned"))
    }
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

fn sorted_by_path(mut chunks: Vec<Chunk>) -> Vec<Chunk> {
    chunks.sort_by(|a, b| a.path.cmp(&b.path));
    chunks
}

#[async_trait]
impl Store for InMemoryStore {
    async fn create_project(&self, new: &NewProject) -> Result<Project> {
        let mut inner = self.write()?;
        inner.next_project_id += 1;
        let ts = now();
        let project = Project {
            id: inner.next_project_id,
            name: new.name.clone(),
            source: new.source.clone(),
            project_token: new.project_token.clone(),
            validation: new.validation.clone(),
            status: StatusLabel::New,
            in_progress: false,
            paused: false,
            stopped: false,
            idle: false,
            validated: false,
            uploaded: false,
            last_error: None,
            records_validated: 0,
            records_invalid: 0,
            records_uploaded: 0,
            errors_file: None,
            created_at: ts,
            updated_at: ts,
        };
        inner.projects.insert(project.id, project.clone());
        Ok(project)
    }

    async fn get_project(&self, id: i64) -> Result<Option<Project>> {
        Ok(self.read()?.projects.get(&id).cloned())
    }

    async fn list_projects(&self) -> Result<Vec<Project>> {
        Ok(self.read()?.projects.values().cloned().collect())
    }

    async fn update_project(&self, project: &Project) -> Result<()> {
        let mut inner = self.write()?;
        match inner.projects.get_mut(&project.id) {
            Some(stored) => {
                *stored = project.clone();
                stored.updated_at = now();
                Ok(())
            }
            None => bail!("project {} does not exist", project.id),
        }
    }

    async fn interrupted_projects(&self) -> Result<Vec<Project>> {
        Ok(self
            .read()?
            .projects
            .values()
            .filter(|p| p.is_interrupted())
            .cloned()
            .collect())
    }

    async fn upsert_chunk(&self, new: &NewChunk) -> Result<Chunk> {
        let mut inner = self.write()?;
        if !inner.projects.contains_key(&new.project_id) {
            bail!("project {} does not exist", new.project_id);
        }
        if let Some(existing) = inner
            .chunks
            .iter_mut()
            .find(|c| c.project_id == new.project_id && c.path == new.path)
        {
            existing.rows = new.rows;
            existing.sha256 = new.sha256.clone();
            existing.chunk_key = Uuid::new_v4().to_string();
            existing.uploaded = false;
            existing.upload_id = None;
            return Ok(existing.clone());
        }
        inner.next_chunk_id += 1;
        let chunk = Chunk {
            id: inner.next_chunk_id,
            project_id: new.project_id,
            path: new.path.clone(),
            chunk_key: Uuid::new_v4().to_string(),
            rows: new.rows,
            sha256: new.sha256.clone(),
            uploaded: false,
            upload_id: None,
        };
        inner.chunks.push(chunk.clone());
        Ok(chunk)
    }

    async fn list_chunks(&self, project_id: i64) -> Result<Vec<Chunk>> {
        let inner = self.read()?;
        Ok(sorted_by_path(
            inner
                .chunks
                .iter()
                .filter(|c| c.project_id == project_id)
                .cloned()
                .collect(),
        ))
    }

    async fn chunks_without_upload_id(&self, project_id: i64) -> Result<Vec<Chunk>> {
        let inner = self.read()?;
        Ok(sorted_by_path(
            inner
                .chunks
                .iter()
                .filter(|c| c.project_id == project_id && c.upload_id.is_none())
                .cloned()
                .collect(),
        ))
    }

    async fn mark_chunk_uploaded(&self, chunk_id: i64, upload_id: &str) -> Result<()> {
        let mut inner = self.write()?;
        let chunk = inner
            .chunks
            .iter_mut()
            .find(|c| c.id == chunk_id)
            .ok_or_else(|| anyhow!("chunk {} does not exist", chunk_id))?;
        chunk.uploaded = true;
        chunk.upload_id = Some(upload_id.to_string());
        Ok(())
    }

    async fn delete_chunks(&self, project_id: i64) -> Result<u64> {
        let mut inner = self.write()?;
        let before = inner.chunks.len();
        inner.chunks.retain(|c| c.project_id != project_id);
        Ok((before - inner.chunks.len()) as u64)
    }

    async fn sum_uploaded_rows(&self, project_id: i64) -> Result<u64> {
        Ok(self
            .read()?
            .chunks
            .iter()
            .filter(|c| c.project_id == project_id && c.uploaded)
            .map(|c| c.rows)
            .sum())
    }

    async fn get_setting(&self, key: &str) -> Result<Option<String>> {
        Ok(self.read()?.settings.get(key).cloned())
    }

    async fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        self.write()?
            .settings
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}

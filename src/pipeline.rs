//! Validate-and-split: rows in, chunk archives and an errors file out.
//!
//! [`ChunkBatcher`] is the shared core. Each row is converted with the
//! project's converters; a valid row joins the current batch, an invalid one
//! is appended to the errors file as it was read. A full batch (or the final partial one) is
//! written as an archive in the chunks directory, recorded in the store, and
//! the project's counters are persisted.
//!
//! [`SplitWork`] drives a batcher over a [`RowSource`] one batch per step.
//! The server ingestor reuses the same batcher for inbound files.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use uplink_core::convert::{converters_for, FieldValue, RowConverter};
use uplink_core::models::{Chunk, NewChunk, Project, ProjectSource, StatusLabel};

use crate::archive::{write_archive, ChunkNamer};
use crate::context::Services;
use crate::error::{TaskError, TaskResult};
use crate::source::{CsvFileSource, RowSource, SourceRow};
use crate::task::StepOutcome;

pub struct ChunkBatcher {
    converters: RowConverter,
    separator: String,
    rows_per_chunk: usize,
    chunks_dir: PathBuf,
    errors_path: PathBuf,
    errors: Option<BufWriter<File>>,
    namer: ChunkNamer,
    batch: Vec<Vec<FieldValue>>,
    pending_invalid: u64,
}

impl ChunkBatcher {
    pub fn new(project: &Project, services: &Services) -> Self {
        Self {
            converters: converters_for(&project.validation),
            separator: char::from(project.source.delimiter()).to_string(),
            rows_per_chunk: services.limits.rows_per_chunk.max(1),
            chunks_dir: services.layout.chunks_dir(project.id),
            errors_path: services.layout.errors_file(project.id),
            errors: None,
            namer: ChunkNamer::new(),
            batch: Vec::with_capacity(services.limits.rows_per_chunk.max(1)),
            pending_invalid: 0,
        }
    }

    /// Validate one row. Returns `true` once the batch is full and should be
    /// flushed.
    pub fn push_row(&mut self, project: &mut Project, row: &SourceRow) -> TaskResult<bool> {
        let converted = if row.undecodable {
            Err("field is not valid UTF-8".to_string())
        } else {
            self.converters.convert(row.fields.as_slice()).map_err(|e| e.to_string())
        };
        match converted {
            Ok(values) => self.batch.push(values),
            Err(err) => {
                tracing::debug!(project = project.id, error = %err, "invalid row");
                self.log_invalid(project, row)?;
                self.pending_invalid += 1;
            }
        }
        Ok(self.batch.len() >= self.rows_per_chunk)
    }

    fn log_invalid(&mut self, project: &mut Project, row: &SourceRow) -> TaskResult<()> {
        if self.errors.is_none() {
            if let Some(parent) = self.errors_path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| TaskError::chunk_write(parent, e))?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.errors_path)
                .map_err(|e| TaskError::chunk_write(&self.errors_path, e))?;
            self.errors = Some(BufWriter::new(file));
            project.errors_file = Some(self.errors_path.clone());
        }
        let mut line = match &row.raw {
            Some(raw) => raw.clone(),
            None => row.fields.join(self.separator.as_str()).into_bytes(),
        };
        line.push(b'\n');
        if let Some(w) = self.errors.as_mut() {
            w.write_all(&line)
                .map_err(|e| TaskError::chunk_write(&self.errors_path, e))?;
        }
        Ok(())
    }

    /// Write the current batch (if any), then persist the counters.
    pub async fn flush(
        &mut self,
        project: &mut Project,
        services: &Services,
    ) -> TaskResult<Option<Chunk>> {
        if let Some(w) = self.errors.as_mut() {
            w.flush()
                .map_err(|e| TaskError::chunk_write(&self.errors_path, e))?;
        }

        let chunk = if self.batch.is_empty() {
            None
        } else {
            let path = self.chunks_dir.join(self.namer.next_name());
            let written = write_archive(&path, &self.batch)?;
            let chunk = services
                .store
                .upsert_chunk(&NewChunk {
                    project_id: project.id,
                    path: written.path,
                    rows: written.rows,
                    sha256: written.sha256,
                })
                .await?;
            tracing::debug!(
                project = project.id,
                rows = chunk.rows,
                path = %chunk.path.display(),
                "chunk written"
            );
            Some(chunk)
        };

        project.records_validated += self.batch.len() as u64;
        project.records_invalid += self.pending_invalid;
        self.batch.clear();
        self.pending_invalid = 0;
        services.save(project).await?;
        Ok(chunk)
    }
}

/// Discard everything a previous validation produced: chunk archives, chunk
/// records, the errors file, and the counters.
pub async fn reset_project_output(project: &mut Project, services: &Services) -> TaskResult<()> {
    let chunks_dir = services.layout.chunks_dir(project.id);
    if chunks_dir.exists() {
        std::fs::remove_dir_all(&chunks_dir).map_err(|e| TaskError::chunk_write(&chunks_dir, e))?;
    }
    let removed = services.store.delete_chunks(project.id).await?;

    let errors_path = project
        .errors_file
        .take()
        .unwrap_or_else(|| services.layout.errors_file(project.id));
    if errors_path.exists() {
        std::fs::remove_file(&errors_path).map_err(|e| TaskError::chunk_write(&errors_path, e))?;
    }

    if removed > 0 {
        tracing::info!(project = project.id, chunks = removed, "discarded previous chunks");
    }

    project.records_validated = 0;
    project.records_invalid = 0;
    project.records_uploaded = 0;
    project.validated = false;
    project.uploaded = false;
    Ok(())
}

/// Resumable validate-and-split over a file-mode project's source.
pub struct SplitWork {
    source: Option<Box<dyn RowSource>>,
    batcher: Option<ChunkBatcher>,
}

impl Default for SplitWork {
    fn default() -> Self {
        Self::new()
    }
}

impl SplitWork {
    /// Read the project's own source file, opened on the first step.
    pub fn new() -> Self {
        Self {
            source: None,
            batcher: None,
        }
    }

    /// Read rows from `source` instead of the project's file.
    pub fn with_source(source: Box<dyn RowSource>) -> Self {
        Self {
            source: Some(source),
            batcher: None,
        }
    }

    pub(crate) async fn begin(&mut self, project: &mut Project, services: &Services) -> TaskResult<()> {
        reset_project_output(project, services).await?;
        project.status = StatusLabel::Validating;
        self.batcher = None;
        Ok(())
    }

    /// Process rows until one batch is written or the source ends.
    pub(crate) async fn step(
        &mut self,
        project: &mut Project,
        services: &Services,
    ) -> TaskResult<StepOutcome> {
        let source = match self.source.take() {
            Some(source) => source,
            None => open_project_source(project)?,
        };
        let source = self.source.insert(source);
        let batcher = self
            .batcher
            .get_or_insert_with(|| ChunkBatcher::new(project, services));

        while let Some(row) = source.next_row()? {
            if batcher.push_row(project, &row)? {
                batcher.flush(project, services).await?;
                return Ok(StepOutcome::Progress);
            }
        }

        batcher.flush(project, services).await?;
        project.validated = true;
        project.status = StatusLabel::ReadyForUpload;
        tracing::info!(
            project = project.id,
            validated = project.records_validated,
            invalid = project.records_invalid,
            "validation finished"
        );
        Ok(StepOutcome::Finished)
    }
}

fn open_project_source(project: &Project) -> TaskResult<Box<dyn RowSource>> {
    match &project.source {
        ProjectSource::File { path, delimiter } => {
            Ok(Box::new(CsvFileSource::open(path, *delimiter)?))
        }
        ProjectSource::Server { inbox, .. } => Err(TaskError::Source {
            path: inbox.clone(),
            message: "server-mode projects are fed through their inbox, not validated from a file"
                .to_string(),
        }),
    }
}

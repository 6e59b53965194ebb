//! Upload coordinator: send every pending chunk, then reconcile.
//!
//! One step does one unit of network work (a chunk send or an id query), so
//! a long upload interleaves with other projects. After the initial sends the
//! coordinator asks the collector which upload ids it holds; chunks it is
//! missing are resent and the query repeated, at most
//! `max_reconcile_cycles` times. A collector answer of "Already uploaded"
//! counts as success.

use std::collections::{HashSet, VecDeque};

use uplink_core::models::{Chunk, Project, StatusLabel};

use crate::archive::read_archive;
use crate::collector::{UploadIdsRequest, UploadRowsRequest};
use crate::context::Services;
use crate::error::{TaskError, TaskResult};
use crate::task::StepOutcome;

#[derive(Debug)]
enum Phase {
    Start,
    Sending(VecDeque<Chunk>),
    Query,
    Resending(VecDeque<Chunk>),
    Done,
}

#[derive(Debug)]
pub struct UploadWork {
    phase: Phase,
    cycles: u32,
    login_token: String,
}

impl Default for UploadWork {
    fn default() -> Self {
        Self::new()
    }
}

impl UploadWork {
    pub fn new() -> Self {
        Self {
            phase: Phase::Start,
            cycles: 0,
            login_token: String::new(),
        }
    }

    /// Reconciliation cycles used so far.
    pub fn cycles(&self) -> u32 {
        self.cycles
    }

    pub(crate) async fn begin(&mut self, project: &mut Project, services: &Services) -> TaskResult<()> {
        self.login_token = services.login_token().await?;
        self.phase = Phase::Start;
        self.cycles = 0;
        project.status = StatusLabel::Uploading;
        project.uploaded = false;
        Ok(())
    }

    pub(crate) async fn step(
        &mut self,
        project: &mut Project,
        services: &Services,
    ) -> TaskResult<StepOutcome> {
        if self.login_token.is_empty() {
            self.login_token = services.login_token().await?;
        }
        loop {
            match &mut self.phase {
                Phase::Start => {
                    let pending = services.store.chunks_without_upload_id(project.id).await?;
                    tracing::info!(project = project.id, chunks = pending.len(), "upload started");
                    self.phase = Phase::Sending(pending.into());
                }
                Phase::Sending(queue) | Phase::Resending(queue) => match queue.pop_front() {
                    Some(chunk) => {
                        self.send(project, &chunk, services).await?;
                        return Ok(StepOutcome::Progress);
                    }
                    None => self.phase = Phase::Query,
                },
                Phase::Query => return self.reconcile(project, services).await,
                Phase::Done => return Ok(StepOutcome::Finished),
            }
        }
    }

    async fn send(&self, project: &mut Project, chunk: &Chunk, services: &Services) -> TaskResult<()> {
        let rows = read_archive(&chunk.path, Some(&chunk.sha256))?;
        let ack = services
            .collector
            .upload_rows(&UploadRowsRequest {
                login_token: &self.login_token,
                project_token: &project.project_token,
                chunk_id: &chunk.chunk_key,
                rows: &rows,
            })
            .await?;
        let upload_id = ack.upload_id_or(&chunk.chunk_key);
        services.store.mark_chunk_uploaded(chunk.id, &upload_id).await?;
        project.records_uploaded = services.store.sum_uploaded_rows(project.id).await?;
        tracing::debug!(project = project.id, chunk = chunk.id, upload_id = %upload_id, "chunk sent");
        services.save(project).await
    }

    /// Query the collector and either finish or queue another resend round.
    async fn reconcile(&mut self, project: &mut Project, services: &Services) -> TaskResult<StepOutcome> {
        let known: HashSet<String> = services
            .collector
            .get_upload_ids(&UploadIdsRequest {
                login_token: &self.login_token,
                project_token: &project.project_token,
            })
            .await?;

        let missing: VecDeque<Chunk> = services
            .store
            .list_chunks(project.id)
            .await?
            .into_iter()
            .filter(|c| c.upload_id.as_ref().map_or(true, |id| !known.contains(id)))
            .collect();

        if missing.is_empty() {
            project.uploaded = true;
            project.status = StatusLabel::Done;
            project.records_uploaded = services.store.sum_uploaded_rows(project.id).await?;
            self.phase = Phase::Done;
            tracing::info!(
                project = project.id,
                uploaded = project.records_uploaded,
                cycles = self.cycles,
                "upload reconciled"
            );
            return Ok(StepOutcome::Finished);
        }

        if self.cycles >= services.limits.max_reconcile_cycles {
            return Err(TaskError::ReconciliationExceeded {
                cycles: self.cycles,
                pending: missing.len(),
            });
        }

        self.cycles += 1;
        tracing::warn!(
            project = project.id,
            cycle = self.cycles,
            missing = missing.len(),
            "collector is missing chunks, resending"
        );
        project.status = StatusLabel::Reconciling;
        services.save(project).await?;
        self.phase = Phase::Resending(missing);
        Ok(StepOutcome::Progress)
    }
}

//! Server-mode ingestion: drain an inbox folder into chunks, upload, repeat.
//!
//! Each inbox file holds a JSON array of rows, each row an array of cells.
//! Strings are taken verbatim, numbers and booleans as their JSON text, and
//! `null` as an empty field; rows then go through the same converters and
//! batcher as a file-mode project. A file is deleted once its rows are in
//! chunks; one that cannot be parsed is moved to the project's `rejected/`
//! folder. After every drain the upload coordinator runs once. When the
//! inbox stays empty the project goes idle until the next step rechecks it.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use uplink_core::models::{Project, ProjectSource, StatusLabel};
use walkdir::WalkDir;

use crate::context::Services;
use crate::error::{TaskError, TaskResult};
use crate::pipeline::ChunkBatcher;
use crate::source::SourceRow;
use crate::task::StepOutcome;
use crate::upload::UploadWork;

enum Phase {
    Scan,
    Draining {
        files: VecDeque<PathBuf>,
        current: Option<InboundFile>,
    },
    Uploading(UploadWork),
    Idle,
}

struct InboundFile {
    path: PathBuf,
    rows: std::vec::IntoIter<Vec<String>>,
}

pub struct ServeWork {
    phase: Phase,
    batcher: Option<ChunkBatcher>,
    needs_upload: bool,
}

impl Default for ServeWork {
    fn default() -> Self {
        Self::new()
    }
}

impl ServeWork {
    pub fn new() -> Self {
        Self {
            phase: Phase::Scan,
            batcher: None,
            // Chunks left over from an earlier run are uploaded first.
            needs_upload: true,
        }
    }

    pub(crate) async fn begin(&mut self, project: &mut Project, _services: &Services) -> TaskResult<()> {
        let inbox = inbox_of(project)?;
        if !inbox.is_dir() {
            return Err(TaskError::Source {
                path: inbox.to_path_buf(),
                message: "inbox folder does not exist".to_string(),
            });
        }
        project.status = StatusLabel::Serving;
        project.idle = false;
        self.phase = Phase::Scan;
        self.needs_upload = true;
        Ok(())
    }

    pub(crate) async fn step(
        &mut self,
        project: &mut Project,
        services: &Services,
    ) -> TaskResult<StepOutcome> {
        loop {
            match &mut self.phase {
                Phase::Scan | Phase::Idle => {
                    let was_idle = matches!(self.phase, Phase::Idle);
                    let files = list_inbox(inbox_of(project)?)?;
                    if !files.is_empty() {
                        tracing::info!(project = project.id, files = files.len(), "draining inbox");
                        if project.idle || project.status != StatusLabel::Serving {
                            project.idle = false;
                            project.status = StatusLabel::Serving;
                            services.save(project).await?;
                        }
                        self.phase = Phase::Draining {
                            files: files.into(),
                            current: None,
                        };
                    } else if self.needs_upload {
                        self.phase = Phase::Uploading(UploadWork::new());
                    } else {
                        if !was_idle || !project.idle || project.status != StatusLabel::Idle {
                            project.idle = true;
                            project.status = StatusLabel::Idle;
                            services.save(project).await?;
                        }
                        self.phase = Phase::Idle;
                        return Ok(StepOutcome::Idle);
                    }
                }
                Phase::Draining { files, current } => {
                    if current.is_none() {
                        let Some(path) = files.pop_front() else {
                            self.phase = Phase::Uploading(UploadWork::new());
                            continue;
                        };
                        match read_inbound(&path) {
                            Ok(rows) => {
                                *current = Some(InboundFile {
                                    path,
                                    rows: rows.into_iter(),
                                })
                            }
                            Err(message) => {
                                reject(project, services, &path, &message)?;
                                continue;
                            }
                        }
                    }
                    let Some(file) = current.as_mut() else {
                        continue;
                    };
                    let batcher = self
                        .batcher
                        .get_or_insert_with(|| ChunkBatcher::new(project, services));

                    let mut full = false;
                    for row in file.rows.by_ref() {
                        if batcher.push_row(project, &SourceRow::from(row))? {
                            full = true;
                            break;
                        }
                    }
                    batcher.flush(project, services).await?;
                    if !full {
                        std::fs::remove_file(&file.path)
                            .map_err(|e| TaskError::chunk_write(&file.path, e))?;
                        tracing::debug!(project = project.id, path = %file.path.display(), "inbound file consumed");
                        *current = None;
                        self.needs_upload = true;
                    }
                    return Ok(StepOutcome::Progress);
                }
                Phase::Uploading(work) => match work.step(project, services).await? {
                    StepOutcome::Finished => {
                        self.needs_upload = false;
                        self.phase = Phase::Scan;
                        return Ok(StepOutcome::Progress);
                    }
                    outcome => return Ok(outcome),
                },
            }
        }
    }
}

fn inbox_of(project: &Project) -> TaskResult<&Path> {
    match &project.source {
        ProjectSource::Server { inbox, .. } => Ok(inbox),
        ProjectSource::File { path, .. } => Err(TaskError::Source {
            path: path.clone(),
            message: "file-mode projects have no inbox to serve".to_string(),
        }),
    }
}

/// Regular files directly in `inbox`, by name. Hidden files and files still
/// being written (`.tmp`, `.part`) are skipped.
pub fn list_inbox(inbox: &Path) -> TaskResult<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(inbox)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = entry.map_err(|e| TaskError::Source {
            path: inbox.to_path_buf(),
            message: e.to_string(),
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if name.starts_with('.') || name.ends_with(".tmp") || name.ends_with(".part") {
            continue;
        }
        files.push(entry.into_path());
    }
    Ok(files)
}

/// Parse one inbound file into raw string rows.
pub fn read_inbound(path: &Path) -> Result<Vec<Vec<String>>, String> {
    let bytes = std::fs::read(path).map_err(|e| e.to_string())?;
    let rows: Vec<Vec<serde_json::Value>> =
        serde_json::from_slice(&bytes).map_err(|e| e.to_string())?;
    Ok(rows
        .into_iter()
        .map(|row| row.into_iter().map(cell_text).collect())
        .collect())
}

fn cell_text(value: serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s,
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn reject(project: &Project, services: &Services, path: &Path, message: &str) -> TaskResult<()> {
    let dir = services.layout.rejected_dir(project.id);
    std::fs::create_dir_all(&dir).map_err(|e| TaskError::chunk_write(&dir, e))?;
    let target = dir.join(path.file_name().unwrap_or_default());
    std::fs::rename(path, &target).map_err(|e| TaskError::chunk_write(&target, e))?;
    tracing::warn!(
        project = project.id,
        path = %path.display(),
        error = message,
        "rejected unparseable inbound file"
    );
    Ok(())
}

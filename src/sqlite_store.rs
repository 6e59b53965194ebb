//! SQLite-backed [`Store`] implementation.
//!
//! Maps each [`Store`] operation onto the `projects`, `chunks`, and
//! `settings` tables created by [`crate::migrate`].

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::path::PathBuf;
use uuid::Uuid;

use uplink_core::convert::{format_validation, parse_validation};
use uplink_core::models::{Chunk, NewChunk, NewProject, Project, ProjectSource, StatusLabel};
use uplink_core::store::Store;

const PROJECT_COLUMNS: &str = "id, name, source_kind, location, delimiter, project_token, \
     validation, status, in_progress, paused, stopped, idle, validated, uploaded, last_error, \
     records_validated, records_invalid, records_uploaded, errors_file, created_at, updated_at";

const CHUNK_COLUMNS: &str = "id, project_id, path, chunk_key, row_count, sha256, uploaded, upload_id";

/// SQLite implementation of the [`Store`] trait.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn project_from_row(row: &SqliteRow) -> Result<Project> {
    let kind: String = row.get("source_kind");
    let location = PathBuf::from(row.get::<String, _>("location"));
    let delimiter = u8::try_from(row.get::<i64, _>("delimiter"))
        .map_err(|_| anyhow!("delimiter out of range"))?;
    let source = match kind.as_str() {
        "file" => ProjectSource::File {
            path: location,
            delimiter,
        },
        "server" => ProjectSource::Server {
            inbox: location,
            delimiter,
        },
        other => anyhow::bail!("unknown source kind '{}'", other),
    };
    let validation = parse_validation(&row.get::<String, _>("validation"))?;
    let status: StatusLabel = row.get::<String, _>("status").parse()?;

    Ok(Project {
        id: row.get("id"),
        name: row.get("name"),
        source,
        project_token: row.get("project_token"),
        validation,
        status,
        in_progress: row.get("in_progress"),
        paused: row.get("paused"),
        stopped: row.get("stopped"),
        idle: row.get("idle"),
        validated: row.get("validated"),
        uploaded: row.get("uploaded"),
        last_error: row.get("last_error"),
        records_validated: row.get::<i64, _>("records_validated") as u64,
        records_invalid: row.get::<i64, _>("records_invalid") as u64,
        records_uploaded: row.get::<i64, _>("records_uploaded") as u64,
        errors_file: row.get::<Option<String>, _>("errors_file").map(PathBuf::from),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn chunk_from_row(row: &SqliteRow) -> Chunk {
    Chunk {
        id: row.get("id"),
        project_id: row.get("project_id"),
        path: PathBuf::from(row.get::<String, _>("path")),
        chunk_key: row.get("chunk_key"),
        rows: row.get::<i64, _>("row_count") as u64,
        sha256: row.get("sha256"),
        uploaded: row.get("uploaded"),
        upload_id: row.get("upload_id"),
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn create_project(&self, new: &NewProject) -> Result<Project> {
        let now = chrono::Utc::now().timestamp();
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO projects (name, source_kind, location, delimiter, project_token,
                                  validation, status, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(&new.name)
        .bind(new.source.kind())
        .bind(new.source.location().to_string_lossy().to_string())
        .bind(new.source.delimiter() as i64)
        .bind(&new.project_token)
        .bind(format_validation(&new.validation))
        .bind(StatusLabel::New.as_str())
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        self.get_project(id)
            .await?
            .ok_or_else(|| anyhow!("project {} vanished after insert", id))
    }

    async fn get_project(&self, id: i64) -> Result<Option<Project>> {
        let row = sqlx::query(&format!("SELECT {} FROM projects WHERE id = ?", PROJECT_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(project_from_row).transpose()
    }

    async fn list_projects(&self) -> Result<Vec<Project>> {
        let rows = sqlx::query(&format!("SELECT {} FROM projects ORDER BY id", PROJECT_COLUMNS))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(project_from_row).collect()
    }

    async fn update_project(&self, p: &Project) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        let result = sqlx::query(
            r#"
            UPDATE projects SET
                status = ?, in_progress = ?, paused = ?, stopped = ?, idle = ?,
                validated = ?, uploaded = ?, last_error = ?,
                records_validated = ?, records_invalid = ?, records_uploaded = ?,
                errors_file = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(p.status.as_str())
        .bind(p.in_progress)
        .bind(p.paused)
        .bind(p.stopped)
        .bind(p.idle)
        .bind(p.validated)
        .bind(p.uploaded)
        .bind(&p.last_error)
        .bind(p.records_validated as i64)
        .bind(p.records_invalid as i64)
        .bind(p.records_uploaded as i64)
        .bind(
            p.errors_file
                .as_ref()
                .map(|path| path.to_string_lossy().to_string()),
        )
        .bind(now)
        .bind(p.id)
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to update project {}", p.id))?;

        if result.rows_affected() == 0 {
            anyhow::bail!("project {} does not exist", p.id);
        }
        Ok(())
    }

    async fn interrupted_projects(&self) -> Result<Vec<Project>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM projects WHERE in_progress = 1 OR paused = 1 ORDER BY id",
            PROJECT_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(project_from_row).collect()
    }

    async fn upsert_chunk(&self, new: &NewChunk) -> Result<Chunk> {
        let path = new.path.to_string_lossy().to_string();
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO chunks (project_id, path, chunk_key, row_count, sha256)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(project_id, path) DO UPDATE SET
                chunk_key = excluded.chunk_key,
                row_count = excluded.row_count,
                sha256 = excluded.sha256,
                uploaded = 0,
                upload_id = NULL
            RETURNING {}
            "#,
            CHUNK_COLUMNS
        ))
        .bind(new.project_id)
        .bind(&path)
        .bind(Uuid::new_v4().to_string())
        .bind(new.rows as i64)
        .bind(&new.sha256)
        .fetch_one(&self.pool)
        .await
        .with_context(|| format!("failed to record chunk {}", path))?;

        Ok(chunk_from_row(&row))
    }

    async fn list_chunks(&self, project_id: i64) -> Result<Vec<Chunk>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM chunks WHERE project_id = ? ORDER BY path",
            CHUNK_COLUMNS
        ))
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(chunk_from_row).collect())
    }

    async fn chunks_without_upload_id(&self, project_id: i64) -> Result<Vec<Chunk>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM chunks WHERE project_id = ? AND upload_id IS NULL ORDER BY path",
            CHUNK_COLUMNS
        ))
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(chunk_from_row).collect())
    }

    async fn mark_chunk_uploaded(&self, chunk_id: i64, upload_id: &str) -> Result<()> {
        let result = sqlx::query("UPDATE chunks SET uploaded = 1, upload_id = ? WHERE id = ?")
            .bind(upload_id)
            .bind(chunk_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            anyhow::bail!("chunk {} does not exist", chunk_id);
        }
        Ok(())
    }

    async fn delete_chunks(&self, project_id: i64) -> Result<u64> {
        let result = sqlx::query("DELETE FROM chunks WHERE project_id = ?")
            .bind(project_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn sum_uploaded_rows(&self, project_id: i64) -> Result<u64> {
        let total: i64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(row_count), 0) FROM chunks WHERE project_id = ? AND uploaded = 1",
        )
        .bind(project_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(total as u64)
    }

    async fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let value: Option<String> = sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(value)
    }

    async fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO settings (key, value) VALUES (?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

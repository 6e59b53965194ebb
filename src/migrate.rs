use anyhow::Result;
use sqlx::SqlitePool;

/// Create all tables and indexes. Safe to run repeatedly.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS projects (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            source_kind TEXT NOT NULL,
            location TEXT NOT NULL,
            delimiter INTEGER NOT NULL DEFAULT 44,
            project_token TEXT NOT NULL,
            validation TEXT NOT NULL,
            status TEXT NOT NULL,
            in_progress INTEGER NOT NULL DEFAULT 0,
            paused INTEGER NOT NULL DEFAULT 0,
            stopped INTEGER NOT NULL DEFAULT 0,
            idle INTEGER NOT NULL DEFAULT 0,
            validated INTEGER NOT NULL DEFAULT 0,
            uploaded INTEGER NOT NULL DEFAULT 0,
            last_error TEXT,
            records_validated INTEGER NOT NULL DEFAULT 0,
            records_invalid INTEGER NOT NULL DEFAULT 0,
            records_uploaded INTEGER NOT NULL DEFAULT 0,
            errors_file TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            project_id INTEGER NOT NULL,
            path TEXT NOT NULL,
            chunk_key TEXT NOT NULL,
            row_count INTEGER NOT NULL,
            sha256 TEXT NOT NULL,
            uploaded INTEGER NOT NULL DEFAULT 0,
            upload_id TEXT,
            UNIQUE(project_id, path),
            FOREIGN KEY (project_id) REFERENCES projects(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_project_id ON chunks(project_id)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_projects_interrupted ON projects(in_progress, paused)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

//! CLI command implementations.
//!
//! Every command opens the SQLite store (running migrations, which are
//! idempotent). Commands that touch projects first run the crash-recovery
//! sweep so a project left mid-task by an earlier process shows as broken.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use uplink_core::convert::parse_validation;
use uplink_core::models::{NewProject, Project, ProjectSource, StatusLabel};
use uplink_core::store::{Store, LOGIN_TOKEN_KEY};

use crate::collector::HttpCollector;
use crate::config::Config;
use crate::context::{Limits, Services};
use crate::db;
use crate::layout::StorageLayout;
use crate::migrate;
use crate::progress::ProgressMode;
use crate::recovery::recover_interrupted;
use crate::scheduler::{Scheduler, SchedulerError, TokioHost};
use crate::sqlite_store::SqliteStore;

pub async fn open_store(config: &Config) -> Result<Arc<SqliteStore>> {
    let pool = db::connect(config).await?;
    migrate::run_migrations(&pool).await?;
    Ok(Arc::new(SqliteStore::new(pool)))
}

/// Open the store and mark interrupted projects broken.
pub async fn open_recovered(config: &Config) -> Result<Arc<SqliteStore>> {
    let store = open_store(config).await?;
    let recovered = recover_interrupted(store.as_ref()).await?;
    for p in &recovered {
        eprintln!("project {} ({}) was interrupted and is now Broken", p.id, p.name);
    }
    Ok(store)
}

pub async fn run_init(config: &Config) -> Result<()> {
    let store = open_store(config).await?;
    std::fs::create_dir_all(&config.storage.root).with_context(|| {
        format!(
            "Failed to create storage root: {}",
            config.storage.root.display()
        )
    })?;
    store.pool().close().await;
    println!("Database initialized successfully.");
    Ok(())
}

pub async fn run_login(config: &Config, token: &str) -> Result<()> {
    if token.trim().is_empty() {
        bail!("login token must not be empty");
    }
    let store = open_store(config).await?;
    store.set_setting(LOGIN_TOKEN_KEY, token.trim()).await?;
    println!("Login token stored.");
    Ok(())
}

/// Arguments for `uplink add`.
pub struct AddArgs {
    pub name: String,
    pub path: Option<PathBuf>,
    pub inbox: Option<PathBuf>,
    pub delimiter: char,
    pub spec: String,
    pub token: String,
}

pub async fn run_add(config: &Config, args: AddArgs) -> Result<Project> {
    if !args.delimiter.is_ascii() {
        bail!("delimiter must be a single ASCII character, got {:?}", args.delimiter);
    }
    let delimiter = args.delimiter as u8;
    let validation = parse_validation(&args.spec)
        .with_context(|| format!("Invalid validation spec: {:?}", args.spec))?;

    let source = match (args.path, args.inbox) {
        (Some(path), None) => {
            if !path.is_file() {
                bail!("source file not found: {}", path.display());
            }
            ProjectSource::File { path, delimiter }
        }
        (None, Some(inbox)) => {
            std::fs::create_dir_all(&inbox)
                .with_context(|| format!("Failed to create inbox: {}", inbox.display()))?;
            ProjectSource::Server { inbox, delimiter }
        }
        _ => bail!("give exactly one of --path or --inbox"),
    };

    let store = open_recovered(config).await?;
    let project = store
        .create_project(&NewProject {
            name: args.name,
            source,
            project_token: args.token,
            validation,
        })
        .await?;
    println!("Added project {} ({}).", project.id, project.name);
    Ok(project)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    Validate,
    Upload,
    Serve,
}

/// Run one task per project id until all finish, fail, or are stopped.
///
/// `serve` keeps polling idle inboxes every `server.poll_interval_ms` until
/// interrupted. Ctrl-C stops every task at its next step boundary.
pub async fn run_tasks(
    config: &Config,
    kind: TaskKind,
    ids: &[i64],
    progress: ProgressMode,
) -> Result<()> {
    if ids.is_empty() {
        bail!("no project ids given");
    }
    let store = open_recovered(config).await?;
    let collector = Arc::new(HttpCollector::new(&config.collector)?);
    let services = Services::new(
        store.clone(),
        collector,
        StorageLayout::new(&config.storage.root),
        Limits::from_config(config),
    )
    .with_listener(progress.listener());
    let mut scheduler = Scheduler::new(services);

    let mut failures = 0usize;
    for &id in ids {
        let started = match kind {
            TaskKind::Validate => scheduler.start_validate(id).await,
            TaskKind::Upload => scheduler.start_upload(id).await,
            TaskKind::Serve => scheduler.start_serve(id).await,
        };
        match started {
            Ok(()) => {}
            // Recorded on the project; counted below.
            Err(SchedulerError::Start { .. }) => {}
            Err(err) => {
                eprintln!("Error: {}", err);
                failures += 1;
            }
        }
    }

    let handle = scheduler.handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, stopping");
            handle.stop_all();
        }
    });

    let mut host = TokioHost;
    let poll = Duration::from_millis(config.server.poll_interval_ms);
    loop {
        scheduler.run(&mut host).await;
        if kind != TaskKind::Serve || !scheduler.has_active() {
            break;
        }
        tokio::time::sleep(poll).await;
        scheduler.wake_all();
    }

    for &id in ids {
        if let Some(p) = store.get_project(id).await? {
            if let (StatusLabel::Stopped, Some(err)) = (p.status, &p.last_error) {
                eprintln!("project {} failed: {}", p.id, err);
                failures += 1;
            }
        }
    }

    store.pool().close().await;
    if failures > 0 {
        bail!("{} task(s) failed", failures);
    }
    Ok(())
}

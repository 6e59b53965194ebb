//! Collaborators shared by every unit of work.
//!
//! [`Services`] is built once, handed to the [`Scheduler`](crate::scheduler::Scheduler),
//! and borrowed by each task step. It owns the repository, the collector
//! client, the on-disk layout, the batch and reconciliation limits, and the
//! project listeners. Every project write goes through [`Services::save`] so
//! listeners see each persisted change.

use std::sync::Arc;

use uplink_core::models::Project;
use uplink_core::store::{Store, LOGIN_TOKEN_KEY};

use crate::collector::Collector;
use crate::config::Config;
use crate::error::{TaskError, TaskResult};
use crate::layout::StorageLayout;
use crate::progress::ProjectListener;

/// Batch size and reconciliation bound.
#[derive(Debug, Clone, Copy)]
pub struct Limits {
    pub rows_per_chunk: usize,
    pub max_reconcile_cycles: u32,
}

impl Limits {
    pub fn from_config(config: &Config) -> Self {
        Self {
            rows_per_chunk: config.pipeline.rows_per_chunk,
            max_reconcile_cycles: config.upload.max_reconcile_cycles,
        }
    }
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            rows_per_chunk: 400,
            max_reconcile_cycles: 5,
        }
    }
}

pub struct Services {
    pub store: Arc<dyn Store>,
    pub collector: Arc<dyn Collector>,
    pub layout: StorageLayout,
    pub limits: Limits,
    listeners: Vec<Box<dyn ProjectListener>>,
}

impl Services {
    pub fn new(
        store: Arc<dyn Store>,
        collector: Arc<dyn Collector>,
        layout: StorageLayout,
        limits: Limits,
    ) -> Self {
        Self {
            store,
            collector,
            layout,
            limits,
            listeners: Vec::new(),
        }
    }

    pub fn with_listener(mut self, listener: Box<dyn ProjectListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    /// Persist `project` and notify listeners.
    pub async fn save(&self, project: &Project) -> TaskResult<()> {
        self.store.update_project(project).await?;
        for listener in &self.listeners {
            listener.project_changed(project);
        }
        Ok(())
    }

    pub async fn login_token(&self) -> TaskResult<String> {
        self.store
            .get_setting(LOGIN_TOKEN_KEY)
            .await?
            .filter(|t| !t.is_empty())
            .ok_or(TaskError::NotLoggedIn)
    }
}

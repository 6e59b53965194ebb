//! Cooperative single-threaded scheduler.
//!
//! The scheduler owns every live [`Task`] and advances them in sweeps: each
//! sweep steps every running task once, in insertion order, then hands
//! control to the [`Host`]. Tasks never run in parallel; a step that awaits
//! the network holds the sweep until it returns.
//!
//! Control from outside the loop goes through a [`SchedulerHandle`]. Its
//! commands are queued and applied between sweeps, so pause and stop take
//! effect at a step boundary and never interrupt a step.
//!
//! A failing step never takes the loop down: the error (or panic) is handed
//! to the [`ErrorReporter`], the task is stopped with the error text recorded
//! on its project, and the remaining tasks carry on.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;

use async_trait::async_trait;
use futures::FutureExt;
use thiserror::Error;
use tokio::sync::mpsc;
use uplink_core::models::Project;

use crate::context::Services;
use crate::error::{TaskError, TaskResult};
use crate::task::{StepOutcome, Task};

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("project {0} already has an active task")]
    AlreadyActive(i64),

    #[error("project {0} not found")]
    ProjectNotFound(i64),

    #[error("project {project}: {source}")]
    Start {
        project: i64,
        #[source]
        source: TaskError,
    },

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// Receives failures caught at the scheduler boundary.
pub trait ErrorReporter: Send + Sync {
    fn report(&self, project: &Project, error: &TaskError);
}

/// Default reporter: one `tracing` error event per failure.
pub struct TracingReporter;

impl ErrorReporter for TracingReporter {
    fn report(&self, project: &Project, error: &TaskError) {
        tracing::error!(project = project.id, name = %project.name, error = %error, "task failed");
    }
}

/// Called after every sweep.
#[async_trait]
pub trait Host: Send {
    async fn on_sweep(&mut self);
}

/// Yields to the tokio runtime between sweeps.
pub struct TokioHost;

#[async_trait]
impl Host for TokioHost {
    async fn on_sweep(&mut self) {
        tokio::task::yield_now().await;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Pause(i64),
    Resume(i64),
    Stop(i64),
    StopAll,
    Wake(i64),
}

/// Cloneable remote control for a running scheduler.
#[derive(Debug, Clone)]
pub struct SchedulerHandle {
    tx: mpsc::UnboundedSender<Command>,
}

impl SchedulerHandle {
    pub fn pause(&self, project_id: i64) {
        self.send(Command::Pause(project_id));
    }

    pub fn resume(&self, project_id: i64) {
        self.send(Command::Resume(project_id));
    }

    pub fn stop(&self, project_id: i64) {
        self.send(Command::Stop(project_id));
    }

    pub fn stop_all(&self) {
        self.send(Command::StopAll);
    }

    /// Make an idle server-mode task look at its inbox again.
    pub fn wake(&self, project_id: i64) {
        self.send(Command::Wake(project_id));
    }

    fn send(&self, command: Command) {
        // The scheduler is gone; nothing left to control.
        let _ = self.tx.send(command);
    }
}

pub struct Scheduler {
    services: Services,
    reporter: Box<dyn ErrorReporter>,
    tasks: Vec<Task>,
    tx: mpsc::UnboundedSender<Command>,
    rx: mpsc::UnboundedReceiver<Command>,
    sweeps: u64,
}

impl Scheduler {
    pub fn new(services: Services) -> Self {
        Self::with_reporter(services, Box::new(TracingReporter))
    }

    pub fn with_reporter(services: Services, reporter: Box<dyn ErrorReporter>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            services,
            reporter,
            tasks: Vec::new(),
            tx,
            rx,
            sweeps: 0,
        }
    }

    pub fn handle(&self) -> SchedulerHandle {
        SchedulerHandle {
            tx: self.tx.clone(),
        }
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn task(&self, project_id: i64) -> Option<&Task> {
        self.tasks.iter().find(|t| t.project_id() == project_id)
    }

    /// Sweeps completed since construction.
    pub fn sweeps(&self) -> u64 {
        self.sweeps
    }

    /// Start `task` and track it. A project has at most one active task.
    ///
    /// If the task fails to start it is stopped with the error recorded on
    /// its project, reported, and returned as [`SchedulerError::Start`].
    pub async fn add(&mut self, mut task: Task) -> Result<(), SchedulerError> {
        let id = task.project_id();
        if self
            .tasks
            .iter()
            .any(|t| t.project_id() == id && t.is_active())
        {
            return Err(SchedulerError::AlreadyActive(id));
        }
        self.tasks.retain(|t| t.project_id() != id);

        if let Err(err) = guarded(task.start(&self.services)).await {
            self.reporter.report(task.project(), &err);
            if let Err(stop_err) = task.stop(Some(err.to_string()), &self.services).await {
                tracing::error!(project = id, error = %stop_err, "failed to record task failure");
            }
            return Err(SchedulerError::Start {
                project: id,
                source: err,
            });
        }
        self.tasks.push(task);
        Ok(())
    }

    pub async fn start_validate(&mut self, project_id: i64) -> Result<(), SchedulerError> {
        let project = self.load(project_id).await?;
        self.add(Task::validate(project)).await
    }

    pub async fn start_upload(&mut self, project_id: i64) -> Result<(), SchedulerError> {
        let project = self.load(project_id).await?;
        self.add(Task::upload(project)).await
    }

    pub async fn start_serve(&mut self, project_id: i64) -> Result<(), SchedulerError> {
        let project = self.load(project_id).await?;
        self.add(Task::serve(project)).await
    }

    async fn load(&self, project_id: i64) -> Result<Project, SchedulerError> {
        self.services
            .store
            .get_project(project_id)
            .await?
            .ok_or(SchedulerError::ProjectNotFound(project_id))
    }

    pub async fn pause(&mut self, project_id: i64) {
        let Self { tasks, services, .. } = self;
        if let Some(task) = tasks.iter_mut().find(|t| t.project_id() == project_id) {
            if let Err(err) = task.pause(services).await {
                tracing::error!(project = project_id, error = %err, "failed to pause");
            }
        }
    }

    pub async fn resume(&mut self, project_id: i64) {
        let Self { tasks, services, .. } = self;
        if let Some(task) = tasks.iter_mut().find(|t| t.project_id() == project_id) {
            if let Err(err) = task.resume(services).await {
                tracing::error!(project = project_id, error = %err, "failed to resume");
            }
        }
    }

    pub async fn stop(&mut self, project_id: i64) {
        let Self { tasks, services, .. } = self;
        if let Some(task) = tasks.iter_mut().find(|t| t.project_id() == project_id) {
            if let Err(err) = task.stop(None, services).await {
                tracing::error!(project = project_id, error = %err, "failed to stop");
            }
        }
    }

    pub async fn stop_all(&mut self) {
        let Self { tasks, services, .. } = self;
        for task in tasks.iter_mut().filter(|t| t.is_active()) {
            if let Err(err) = task.stop(None, services).await {
                tracing::error!(project = task.project_id(), error = %err, "failed to stop");
            }
        }
    }

    pub fn wake(&mut self, project_id: i64) {
        if let Some(task) = self.tasks.iter_mut().find(|t| t.project_id() == project_id) {
            task.wake();
        }
    }

    pub fn wake_all(&mut self) {
        for task in self.tasks.iter_mut() {
            task.wake();
        }
    }

    /// Whether any task is still running or paused.
    pub fn has_active(&self) -> bool {
        self.tasks.iter().any(Task::is_active)
    }

    async fn apply_commands(&mut self) {
        while let Ok(command) = self.rx.try_recv() {
            match command {
                Command::Pause(id) => self.pause(id).await,
                Command::Resume(id) => self.resume(id).await,
                Command::Stop(id) => self.stop(id).await,
                Command::StopAll => self.stop_all().await,
                Command::Wake(id) => self.wake(id),
            }
        }
    }

    /// Step every running task once. Returns how many tasks made progress.
    pub async fn sweep(&mut self) -> usize {
        self.apply_commands().await;
        let Self {
            tasks,
            services,
            reporter,
            ..
        } = self;

        let mut progressed = 0;
        for task in tasks.iter_mut() {
            match guarded(task.step(services)).await {
                Ok(StepOutcome::Progress | StepOutcome::Finished) => progressed += 1,
                Ok(StepOutcome::Idle) => {}
                Err(err) => {
                    reporter.report(task.project(), &err);
                    if let Err(stop_err) = task.stop(Some(err.to_string()), services).await {
                        tracing::error!(
                            project = task.project_id(),
                            error = %stop_err,
                            "failed to record task failure"
                        );
                    }
                }
            }
        }
        self.sweeps += 1;
        progressed
    }

    /// Whether any task is running and not idle.
    pub fn has_runnable(&self) -> bool {
        self.tasks.iter().any(Task::is_runnable)
    }

    /// Sweep until no task is both unpaused and non-idle.
    ///
    /// Tasks whose project is no longer in progress are dropped after each
    /// sweep; paused and idle tasks stay tracked so they can be resumed or
    /// woken by a later run.
    pub async fn run(&mut self, host: &mut dyn Host) {
        self.apply_commands().await;
        while self.has_runnable() {
            self.sweep().await;
            host.on_sweep().await;
            self.apply_commands().await;
            self.tasks.retain(|t| t.project().in_progress);
        }
    }
}

/// Run a task future, turning a panic into [`TaskError::Panicked`].
async fn guarded<T>(work: impl Future<Output = TaskResult<T>>) -> TaskResult<T> {
    match AssertUnwindSafe(work).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => Err(TaskError::Panicked(panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

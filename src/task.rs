//! Resumable units of work.
//!
//! A [`Task`] owns one project's in-memory record and one [`Work`] cursor.
//! Every call to [`Task::step`] advances the cursor by a bounded amount and
//! persists whatever changed, so a process that dies between steps leaves a
//! consistent store behind.
//!
//! ```text
//! Idle --start--> Running --step*--> Finished
//!                  |   ^
//!             pause|   |resume
//!                  v   |
//!                 Paused
//! Running/Paused --stop--> Stopped
//! ```

use std::fmt;

use uplink_core::models::{Project, StatusLabel};

use crate::context::Services;
use crate::error::TaskResult;
use crate::ingestor::ServeWork;
use crate::pipeline::SplitWork;
use crate::upload::UploadWork;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Idle,
    Running,
    Paused,
    Finished,
    Stopped,
}

/// What a single step achieved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// Work was done and more remains.
    Progress,
    /// Nothing to do right now; the task waits for new input.
    Idle,
    Finished,
}

pub enum Work {
    Split(SplitWork),
    Upload(UploadWork),
    Serve(ServeWork),
}

impl Work {
    pub fn kind(&self) -> &'static str {
        match self {
            Work::Split(_) => "validate",
            Work::Upload(_) => "upload",
            Work::Serve(_) => "serve",
        }
    }
}

pub struct Task {
    project: Project,
    state: TaskState,
    work: Work,
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("project", &self.project.id)
            .field("kind", &self.work.kind())
            .field("state", &self.state)
            .finish()
    }
}

impl Task {
    pub fn new(project: Project, work: Work) -> Self {
        Self {
            project,
            state: TaskState::Idle,
            work,
        }
    }

    pub fn validate(project: Project) -> Self {
        Self::new(project, Work::Split(SplitWork::new()))
    }

    pub fn upload(project: Project) -> Self {
        Self::new(project, Work::Upload(UploadWork::new()))
    }

    pub fn serve(project: Project) -> Self {
        Self::new(project, Work::Serve(ServeWork::new()))
    }

    pub fn project(&self) -> &Project {
        &self.project
    }

    pub fn project_id(&self) -> i64 {
        self.project.id
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    pub fn kind(&self) -> &'static str {
        self.work.kind()
    }

    /// Running or paused.
    pub fn is_active(&self) -> bool {
        matches!(self.state, TaskState::Running | TaskState::Paused)
    }

    /// Running and not waiting for input.
    pub fn is_runnable(&self) -> bool {
        self.state == TaskState::Running && !self.project.idle
    }

    /// Mark the project in progress and prepare the work cursor.
    pub async fn start(&mut self, services: &Services) -> TaskResult<()> {
        let project = &mut self.project;
        project.in_progress = true;
        project.paused = false;
        project.stopped = false;
        project.idle = false;
        project.last_error = None;
        match &mut self.work {
            Work::Split(w) => w.begin(project, services).await?,
            Work::Upload(w) => w.begin(project, services).await?,
            Work::Serve(w) => w.begin(project, services).await?,
        }
        self.state = TaskState::Running;
        services.save(&self.project).await?;
        tracing::info!(project = self.project.id, kind = self.kind(), "task started");
        Ok(())
    }

    /// Advance the work by one bounded unit. A task that is not running
    /// reports [`StepOutcome::Idle`] without touching its work.
    pub async fn step(&mut self, services: &Services) -> TaskResult<StepOutcome> {
        if self.state != TaskState::Running {
            return Ok(StepOutcome::Idle);
        }
        let project = &mut self.project;
        let outcome = match &mut self.work {
            Work::Split(w) => w.step(project, services).await?,
            Work::Upload(w) => w.step(project, services).await?,
            Work::Serve(w) => w.step(project, services).await?,
        };
        if outcome == StepOutcome::Finished {
            self.state = TaskState::Finished;
            self.project.in_progress = false;
            self.project.idle = false;
            services.save(&self.project).await?;
            tracing::info!(project = self.project.id, kind = self.kind(), "task finished");
        }
        Ok(outcome)
    }

    pub async fn pause(&mut self, services: &Services) -> TaskResult<()> {
        if self.state != TaskState::Running {
            return Ok(());
        }
        self.state = TaskState::Paused;
        self.project.paused = true;
        services.save(&self.project).await
    }

    pub async fn resume(&mut self, services: &Services) -> TaskResult<()> {
        if self.state != TaskState::Paused {
            return Ok(());
        }
        self.state = TaskState::Running;
        self.project.paused = false;
        services.save(&self.project).await
    }

    /// Stop for good, recording `error` when the stop was caused by one.
    pub async fn stop(&mut self, error: Option<String>, services: &Services) -> TaskResult<()> {
        if matches!(self.state, TaskState::Finished | TaskState::Stopped) {
            return Ok(());
        }
        self.state = TaskState::Stopped;
        let project = &mut self.project;
        project.in_progress = false;
        project.paused = false;
        project.idle = false;
        project.stopped = true;
        project.status = StatusLabel::Stopped;
        project.last_error = error;
        services.save(&self.project).await
    }

    /// Let an idle task look for new input on its next step.
    pub fn wake(&mut self) {
        self.project.idle = false;
    }
}

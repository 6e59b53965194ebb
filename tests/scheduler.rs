//! Scheduler behaviour: fairness, pause/resume, stop, failure isolation.

mod common;

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use common::{write_csv, FakeCollector, Fixture};
use tabular_uplink::error::{TaskError, TaskResult};
use tabular_uplink::pipeline::SplitWork;
use tabular_uplink::progress::ProjectListener;
use tabular_uplink::scheduler::{
    ErrorReporter, Host, Scheduler, SchedulerError, SchedulerHandle, TokioHost,
};
use tabular_uplink::source::{RowSource, SourceRow};
use tabular_uplink::task::{Task, TaskState, Work};
use tempfile::TempDir;
use uplink_core::models::{Project, StatusLabel};
use uplink_core::store::memory::InMemoryStore;
use uplink_core::store::Store;

async fn csv_projects(fx: &Fixture, tmp: &TempDir, rows: usize, n: usize) -> Vec<Project> {
    let mut out = Vec::new();
    for i in 0..n {
        let path = tmp.path().join(format!("in-{}.csv", i));
        write_csv(&path, rows, |_| false);
        out.push(fx.file_project(&path, "number,text,timestamp").await);
    }
    out
}

#[tokio::test]
async fn every_task_advances_once_per_sweep() {
    let tmp = TempDir::new().unwrap();
    let fx = Fixture::new(tmp.path(), FakeCollector::new()).await;
    // 25 rows in chunks of 10 take three steps each.
    let projects = csv_projects(&fx, &tmp, 25, 3).await;

    let mut scheduler = Scheduler::new(fx.services(10, 5));
    for p in &projects {
        scheduler.start_validate(p.id).await.unwrap();
    }

    scheduler.sweep().await;
    for p in &projects {
        assert_eq!(fx.project(p.id).await.records_validated, 10);
    }

    scheduler.run(&mut TokioHost).await;
    assert!(scheduler.sweeps() <= 3 * 3);
    assert!(scheduler.tasks().is_empty());
    for p in &projects {
        let p = fx.project(p.id).await;
        assert!(p.validated);
        assert_eq!(p.records_validated, 25);
    }
}

#[tokio::test]
async fn a_project_has_at_most_one_active_task() {
    let tmp = TempDir::new().unwrap();
    let fx = Fixture::new(tmp.path(), FakeCollector::new()).await;
    let project = csv_projects(&fx, &tmp, 25, 1).await.remove(0);

    let mut scheduler = Scheduler::new(fx.services(10, 5));
    scheduler.start_validate(project.id).await.unwrap();
    let err = scheduler.start_upload(project.id).await.unwrap_err();
    assert!(matches!(err, SchedulerError::AlreadyActive(id) if id == project.id));
    assert_eq!(scheduler.tasks().len(), 1);
}

#[tokio::test]
async fn unknown_project_is_rejected() {
    let tmp = TempDir::new().unwrap();
    let fx = Fixture::new(tmp.path(), FakeCollector::new()).await;
    let mut scheduler = Scheduler::new(fx.services(10, 5));
    let err = scheduler.start_validate(99).await.unwrap_err();
    assert!(matches!(err, SchedulerError::ProjectNotFound(99)));
}

/// Issues handle commands after chosen sweeps and snapshots one project.
struct ScriptedHost {
    handle: SchedulerHandle,
    store: Arc<InMemoryStore>,
    watched: i64,
    sweeps: u32,
    pause_after: u32,
    resume_after: u32,
    snapshots: Vec<(u64, bool)>,
}

#[async_trait]
impl Host for ScriptedHost {
    async fn on_sweep(&mut self) {
        self.sweeps += 1;
        let p = self.store.get_project(self.watched).await.unwrap().unwrap();
        self.snapshots.push((p.records_validated, p.paused));
        if self.sweeps == self.pause_after {
            self.handle.pause(self.watched);
        }
        if self.sweeps == self.resume_after {
            self.handle.resume(self.watched);
        }
    }
}

#[tokio::test]
async fn paused_tasks_keep_their_cursor() {
    let tmp = TempDir::new().unwrap();
    let fx = Fixture::new(tmp.path(), FakeCollector::new()).await;
    let projects = csv_projects(&fx, &tmp, 45, 2).await;
    let (a, b) = (projects[0].id, projects[1].id);

    let mut scheduler = Scheduler::new(fx.services(10, 5));
    scheduler.start_validate(a).await.unwrap();
    scheduler.start_validate(b).await.unwrap();

    let mut host = ScriptedHost {
        handle: scheduler.handle(),
        store: fx.store.clone(),
        watched: a,
        sweeps: 0,
        pause_after: 1,
        resume_after: 3,
        snapshots: Vec::new(),
    };
    scheduler.run(&mut host).await;

    // Paused after sweep 1, resumed after sweep 3: sweeps 2 and 3 skip it.
    assert_eq!(host.snapshots[0], (10, false));
    assert_eq!(host.snapshots[1], (10, true));
    assert_eq!(host.snapshots[2], (10, true));
    assert_eq!(host.snapshots[3], (20, false));

    for id in [a, b] {
        let p = fx.project(id).await;
        assert!(p.validated);
        assert_eq!(p.records_validated, 45);
    }
}

#[tokio::test]
async fn run_returns_when_only_paused_tasks_remain() {
    let tmp = TempDir::new().unwrap();
    let fx = Fixture::new(tmp.path(), FakeCollector::new()).await;
    let projects = csv_projects(&fx, &tmp, 25, 2).await;
    let (a, b) = (projects[0].id, projects[1].id);

    let mut scheduler = Scheduler::new(fx.services(10, 5));
    scheduler.start_validate(a).await.unwrap();
    scheduler.start_validate(b).await.unwrap();
    scheduler.pause(a).await;

    scheduler.run(&mut TokioHost).await;
    assert!(fx.project(b).await.validated);
    let task = scheduler.task(a).unwrap();
    assert_eq!(task.state(), TaskState::Paused);
    let paused = fx.project(a).await;
    assert!(paused.paused && paused.in_progress);
    assert_eq!(paused.records_validated, 0);

    scheduler.handle().resume(a);
    scheduler.run(&mut TokioHost).await;
    assert!(fx.project(a).await.validated);
}

struct StopAllHost(SchedulerHandle);

#[async_trait]
impl Host for StopAllHost {
    async fn on_sweep(&mut self) {
        self.0.stop_all();
    }
}

#[tokio::test]
async fn stop_all_takes_effect_at_the_next_boundary() {
    let tmp = TempDir::new().unwrap();
    let fx = Fixture::new(tmp.path(), FakeCollector::new()).await;
    let projects = csv_projects(&fx, &tmp, 45, 2).await;

    let mut scheduler = Scheduler::new(fx.services(10, 5));
    for p in &projects {
        scheduler.start_validate(p.id).await.unwrap();
    }
    let mut host = StopAllHost(scheduler.handle());
    scheduler.run(&mut host).await;

    assert_eq!(scheduler.sweeps(), 1);
    for p in &projects {
        let p = fx.project(p.id).await;
        assert_eq!(p.status, StatusLabel::Stopped);
        assert!(p.stopped && !p.in_progress);
        assert!(p.last_error.is_none());
        assert_eq!(p.records_validated, 10);
    }
}

#[derive(Default, Clone)]
struct Collecting(Arc<Mutex<Vec<i64>>>);

impl ErrorReporter for Collecting {
    fn report(&self, project: &Project, _error: &TaskError) {
        self.0.lock().unwrap().push(project.id);
    }
}

#[tokio::test]
async fn a_failing_task_does_not_stop_the_others() {
    let tmp = TempDir::new().unwrap();
    let fx = Fixture::new(tmp.path(), FakeCollector::new()).await;
    let good = csv_projects(&fx, &tmp, 25, 1).await.remove(0);
    let broken = fx
        .file_project(&tmp.path().join("missing.csv"), "number")
        .await;

    let reports = Collecting::default();
    let mut scheduler = Scheduler::with_reporter(fx.services(10, 5), Box::new(reports.clone()));
    scheduler.start_validate(broken.id).await.unwrap();
    scheduler.start_validate(good.id).await.unwrap();
    scheduler.run(&mut TokioHost).await;

    assert_eq!(*reports.0.lock().unwrap(), vec![broken.id]);
    let b = fx.project(broken.id).await;
    assert_eq!(b.status, StatusLabel::Stopped);
    assert!(b.last_error.unwrap().contains("missing.csv"));
    assert!(fx.project(good.id).await.validated);
}

/// Yields a few good rows, then panics.
struct PanickingSource {
    left: usize,
}

impl RowSource for PanickingSource {
    fn next_row(&mut self) -> TaskResult<Option<SourceRow>> {
        if self.left == 0 {
            panic!("source went away");
        }
        self.left -= 1;
        Ok(Some(SourceRow::from(vec![
            "1".to_string(),
            "a".to_string(),
            "2024-03-01".to_string(),
        ])))
    }
}

#[tokio::test]
async fn a_panicking_task_is_stopped_and_the_others_finish() {
    let tmp = TempDir::new().unwrap();
    let fx = Fixture::new(tmp.path(), FakeCollector::new()).await;
    let good = csv_projects(&fx, &tmp, 25, 1).await.remove(0);
    let doomed = fx
        .file_project(&tmp.path().join("unused.csv"), "number,text,timestamp")
        .await;

    let reports = Collecting::default();
    let mut scheduler = Scheduler::with_reporter(fx.services(10, 5), Box::new(reports.clone()));
    let task = Task::new(
        doomed.clone(),
        Work::Split(SplitWork::with_source(Box::new(PanickingSource { left: 15 }))),
    );
    scheduler.add(task).await.unwrap();
    scheduler.start_validate(good.id).await.unwrap();
    scheduler.run(&mut TokioHost).await;

    assert_eq!(*reports.0.lock().unwrap(), vec![doomed.id]);
    let d = fx.project(doomed.id).await;
    assert_eq!(d.status, StatusLabel::Stopped);
    assert!(!d.in_progress);
    let message = d.last_error.unwrap();
    assert!(message.contains("task panicked"), "{}", message);
    assert!(message.contains("source went away"), "{}", message);

    let g = fx.project(good.id).await;
    assert!(g.validated);
    assert!(!g.in_progress);
    assert_eq!(g.records_validated, 25);
    assert!(scheduler.tasks().is_empty());
}

#[derive(Default, Clone)]
struct Recording(Arc<Mutex<Vec<StatusLabel>>>);

impl ProjectListener for Recording {
    fn project_changed(&self, project: &Project) {
        self.0.lock().unwrap().push(project.status);
    }
}

#[tokio::test]
async fn listeners_see_every_persisted_change() {
    let tmp = TempDir::new().unwrap();
    let fx = Fixture::new(tmp.path(), FakeCollector::new()).await;
    let project = csv_projects(&fx, &tmp, 25, 1).await.remove(0);

    let seen = Recording::default();
    let services = fx.services(10, 5).with_listener(Box::new(seen.clone()));
    let mut scheduler = Scheduler::new(services);
    scheduler.start_validate(project.id).await.unwrap();
    scheduler.run(&mut TokioHost).await;

    let seen = seen.0.lock().unwrap().clone();
    // start, three chunk flushes, finish
    assert_eq!(seen.len(), 5);
    assert_eq!(seen[0], StatusLabel::Validating);
    assert_eq!(*seen.last().unwrap(), StatusLabel::ReadyForUpload);
}

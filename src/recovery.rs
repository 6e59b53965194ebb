//! Startup sweep for projects a previous process left mid-task.
//!
//! Work is never resumed automatically after a crash. Any project persisted
//! as in progress or paused is marked [`StatusLabel::Broken`] with its run
//! flags cleared; the user restarts it explicitly.

use anyhow::Result;
use uplink_core::models::{Project, StatusLabel};
use uplink_core::store::Store;

pub const INTERRUPTED_MESSAGE: &str = "interrupted: the previous run exited while this project was in progress";

/// Mark every interrupted project broken. Returns the projects changed.
pub async fn recover_interrupted(store: &dyn Store) -> Result<Vec<Project>> {
    let mut recovered = Vec::new();
    for mut project in store.interrupted_projects().await? {
        project.in_progress = false;
        project.paused = false;
        project.idle = false;
        project.status = StatusLabel::Broken;
        project.last_error = Some(INTERRUPTED_MESSAGE.to_string());
        store.update_project(&project).await?;
        tracing::warn!(project = project.id, name = %project.name, "marked interrupted project broken");
        recovered.push(project);
    }
    Ok(recovered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use uplink_core::convert::FieldType;
    use uplink_core::models::{NewProject, ProjectSource};
    use uplink_core::store::memory::InMemoryStore;

    fn new_project(name: &str) -> NewProject {
        NewProject {
            name: name.to_string(),
            source: ProjectSource::File {
                path: PathBuf::from("/tmp/in.csv"),
                delimiter: b',',
            },
            project_token: "tok".to_string(),
            validation: vec![FieldType::Number],
        }
    }

    #[tokio::test]
    async fn in_progress_and_paused_projects_become_broken() {
        let store = InMemoryStore::new();
        let mut running = store.create_project(&new_project("running")).await.unwrap();
        running.in_progress = true;
        running.status = StatusLabel::Validating;
        store.update_project(&running).await.unwrap();

        let mut paused = store.create_project(&new_project("paused")).await.unwrap();
        paused.in_progress = true;
        paused.paused = true;
        store.update_project(&paused).await.unwrap();

        let untouched = store.create_project(&new_project("idle")).await.unwrap();

        let recovered = recover_interrupted(&store).await.unwrap();
        assert_eq!(recovered.len(), 2);

        for id in [running.id, paused.id] {
            let p = store.get_project(id).await.unwrap().unwrap();
            assert_eq!(p.status, StatusLabel::Broken);
            assert!(!p.in_progress && !p.paused);
            assert!(p.last_error.is_some());
        }
        let p = store.get_project(untouched.id).await.unwrap().unwrap();
        assert_eq!(p.status, StatusLabel::New);

        assert!(recover_interrupted(&store).await.unwrap().is_empty());
    }
}

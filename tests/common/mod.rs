//! Shared fixtures for integration tests.
#![allow(dead_code)]

pub mod http;

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tabular_uplink::collector::{
    Collector, CollectorError, UploadAck, UploadIdsRequest, UploadRowsRequest,
};
use tabular_uplink::context::{Limits, Services};
use tabular_uplink::layout::StorageLayout;
use uplink_core::convert::parse_validation;
use uplink_core::models::{NewProject, Project, ProjectSource};
use uplink_core::store::memory::InMemoryStore;
use uplink_core::store::{Store, LOGIN_TOKEN_KEY};

#[derive(Default)]
struct FakeState {
    /// chunk id -> (upload id, row count)
    accepted: HashMap<String, (String, usize)>,
    /// chunk id -> number of id queries that will still omit it
    hidden: HashMap<String, u32>,
    hide_new_uploads: Option<u32>,
    never_ack: bool,
    fail_uploads: bool,
    upload_calls: Vec<String>,
    id_queries: u32,
    next_id: u32,
}

/// In-process collector that never ingests a chunk id twice and can delay
/// acknowledging uploads in its id listing.
#[derive(Default)]
pub struct FakeCollector {
    state: Mutex<FakeState>,
}

impl FakeCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Uploads that have not happened yet are omitted from the next `queries`
    /// id listings.
    pub fn hide_new_uploads_for(self, queries: u32) -> Self {
        self.state.lock().unwrap().hide_new_uploads = Some(queries);
        self
    }

    /// The id listing is always empty.
    pub fn never_acknowledge(self) -> Self {
        self.state.lock().unwrap().never_ack = true;
        self
    }

    pub fn failing(self) -> Self {
        self.state.lock().unwrap().fail_uploads = true;
        self
    }

    /// Hide one already-uploaded chunk from the next `queries` listings.
    pub fn hide_chunk(&self, chunk_id: &str, queries: u32) {
        self.state
            .lock()
            .unwrap()
            .hidden
            .insert(chunk_id.to_string(), queries);
    }

    pub fn accepted_rows(&self) -> usize {
        self.state.lock().unwrap().accepted.values().map(|(_, n)| n).sum()
    }

    pub fn accepted_chunks(&self) -> usize {
        self.state.lock().unwrap().accepted.len()
    }

    pub fn upload_calls(&self) -> Vec<String> {
        self.state.lock().unwrap().upload_calls.clone()
    }

    pub fn id_queries(&self) -> u32 {
        self.state.lock().unwrap().id_queries
    }
}

#[async_trait]
impl Collector for FakeCollector {
    async fn upload_rows(&self, request: &UploadRowsRequest<'_>) -> Result<UploadAck, CollectorError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_uploads {
            return Err(CollectorError::Rejected {
                route: "upload_rows",
                message: "Invalid project token".to_string(),
            });
        }
        state.upload_calls.push(request.chunk_id.to_string());
        if let Some((upload_id, _)) = state.accepted.get(request.chunk_id) {
            return Ok(UploadAck::AlreadyUploaded {
                upload_id: Some(upload_id.clone()),
            });
        }
        state.next_id += 1;
        let upload_id = format!("up-{}", state.next_id);
        state
            .accepted
            .insert(request.chunk_id.to_string(), (upload_id.clone(), request.rows.len()));
        if let Some(queries) = state.hide_new_uploads {
            state.hidden.insert(request.chunk_id.to_string(), queries);
        }
        Ok(UploadAck::Accepted { upload_id })
    }

    async fn get_upload_ids(
        &self,
        _request: &UploadIdsRequest<'_>,
    ) -> Result<HashSet<String>, CollectorError> {
        let mut state = self.state.lock().unwrap();
        state.id_queries += 1;
        if state.never_ack {
            return Ok(HashSet::new());
        }
        let mut ids = HashSet::new();
        let FakeState {
            accepted, hidden, ..
        } = &mut *state;
        for (chunk_id, (upload_id, _)) in accepted.iter() {
            match hidden.get_mut(chunk_id) {
                Some(remaining) if *remaining > 0 => *remaining -= 1,
                _ => {
                    ids.insert(upload_id.clone());
                }
            }
        }
        Ok(ids)
    }
}

pub struct Fixture {
    pub store: Arc<InMemoryStore>,
    pub collector: Arc<FakeCollector>,
    pub root: PathBuf,
}

impl Fixture {
    pub async fn new(root: &Path, collector: FakeCollector) -> Self {
        let store = Arc::new(InMemoryStore::new());
        store.set_setting(LOGIN_TOKEN_KEY, "login-1").await.unwrap();
        Self {
            store,
            collector: Arc::new(collector),
            root: root.to_path_buf(),
        }
    }

    pub fn layout(&self) -> StorageLayout {
        StorageLayout::new(self.root.join("projects"))
    }

    pub fn services(&self, rows_per_chunk: usize, max_reconcile_cycles: u32) -> Services {
        Services::new(
            self.store.clone(),
            self.collector.clone(),
            self.layout(),
            Limits {
                rows_per_chunk,
                max_reconcile_cycles,
            },
        )
    }

    pub async fn file_project(&self, path: &Path, spec: &str) -> Project {
        self.store
            .create_project(&NewProject {
                name: "file".to_string(),
                source: ProjectSource::File {
                    path: path.to_path_buf(),
                    delimiter: b',',
                },
                project_token: "proj-1".to_string(),
                validation: parse_validation(spec).unwrap(),
            })
            .await
            .unwrap()
    }

    pub async fn server_project(&self, inbox: &Path, spec: &str) -> Project {
        std::fs::create_dir_all(inbox).unwrap();
        self.store
            .create_project(&NewProject {
                name: "server".to_string(),
                source: ProjectSource::Server {
                    inbox: inbox.to_path_buf(),
                    delimiter: b',',
                },
                project_token: "proj-2".to_string(),
                validation: parse_validation(spec).unwrap(),
            })
            .await
            .unwrap()
    }

    pub async fn project(&self, id: i64) -> Project {
        self.store.get_project(id).await.unwrap().unwrap()
    }
}

/// `rows` CSV lines of `number,text,timestamp`; every line index in `bad`
/// gets an unparseable timestamp.
pub fn write_csv(path: &Path, rows: usize, bad: impl Fn(usize) -> bool) {
    let mut out = String::new();
    for i in 0..rows {
        let ts = if bad(i) { "not-a-date" } else { "2024-03-01" };
        out.push_str(&format!("{},name {},{}\n", i, i, ts));
    }
    std::fs::write(path, out).unwrap();
}

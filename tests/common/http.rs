//! Minimal collector served over HTTP with axum.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{json, Value};

pub const LOGIN_TOKEN: &str = "login-1";

#[derive(Default)]
pub struct HttpState {
    /// chunk id -> (upload id, rows)
    pub uploads: HashMap<String, (String, usize)>,
    pub hits: usize,
    /// Answer this many requests with HTTP 500 before serving normally.
    pub fail_first: usize,
    /// Answer every request with this status instead.
    pub force_status: Option<u16>,
}

pub type Shared = Arc<Mutex<HttpState>>;

pub struct FakeHttpCollector {
    pub addr: SocketAddr,
    pub state: Shared,
}

impl FakeHttpCollector {
    pub async fn start() -> Self {
        Self::start_with(HttpState::default()).await
    }

    pub async fn start_with(state: HttpState) -> Self {
        let state: Shared = Arc::new(Mutex::new(state));
        let app = Router::new()
            .route("/upload_rows", post(upload_rows))
            .route("/get_upload_ids", post(get_upload_ids))
            .with_state(state.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Self { addr, state }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn accepted_rows(&self) -> usize {
        self.state.lock().unwrap().uploads.values().map(|(_, n)| n).sum()
    }

    pub fn hits(&self) -> usize {
        self.state.lock().unwrap().hits
    }
}

fn gate(state: &mut HttpState) -> Option<(StatusCode, Json<Value>)> {
    state.hits += 1;
    if let Some(code) = state.force_status {
        let status = StatusCode::from_u16(code).unwrap();
        return Some((status, Json(json!({ "error": "forced" }))));
    }
    if state.fail_first > 0 {
        state.fail_first -= 1;
        return Some((StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": "boom" }))));
    }
    None
}

async fn upload_rows(State(state): State<Shared>, Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
    let mut state = state.lock().unwrap();
    if let Some(resp) = gate(&mut state) {
        return resp;
    }
    if body["login_token"] != LOGIN_TOKEN {
        return (StatusCode::OK, Json(json!({ "error": "Invalid login token" })));
    }
    let chunk_id = body["chunk_id"].as_str().unwrap_or_default().to_string();
    if state.uploads.contains_key(&chunk_id) {
        return (StatusCode::OK, Json(json!({ "error": "Already uploaded" })));
    }
    let rows = body["rows"].as_array().map(|r| r.len()).unwrap_or(0);
    // Upload ids echo the caller's chunk id.
    let upload_id = chunk_id.clone();
    state.uploads.insert(chunk_id, (upload_id.clone(), rows));
    (StatusCode::OK, Json(json!({ "upload_id": upload_id })))
}

async fn get_upload_ids(State(state): State<Shared>, Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
    let mut state = state.lock().unwrap();
    if let Some(resp) = gate(&mut state) {
        return resp;
    }
    if body["login_token"] != LOGIN_TOKEN {
        return (StatusCode::OK, Json(json!({ "error": "Invalid login token" })));
    }
    let ids: Vec<&String> = state.uploads.values().map(|(id, _)| id).collect();
    (StatusCode::OK, Json(json!({ "upload_ids": ids })))
}

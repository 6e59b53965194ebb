//! Remote collector protocol and HTTP client.
//!
//! The collector accepts row uploads and reports which uploads it has
//! durably acknowledged. Both routes are JSON over HTTP POST:
//!
//! | Route | Request | Response |
//! |-------|---------|----------|
//! | `upload_rows` | `{login_token, project_token, chunk_id, rows}` | `{upload_id}` or `{error}` |
//! | `get_upload_ids` | `{login_token, project_token}` | `{upload_ids: [...]}` or `{error}` |
//!
//! The collector must be idempotent on `chunk_id`: re-sending a chunk it has
//! already accepted answers `{"error": "Already uploaded"}` without ingesting
//! the rows again. That answer counts as success here.
//!
//! # Retry Strategy
//!
//! [`HttpCollector`] retries a single request on HTTP 429, 5xx, and
//! transport errors with exponential backoff (1s, 2s, 4s, ... capped at 2^5)
//! up to `collector.max_retries` times. Other failures return immediately.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::CollectorConfig;

/// Error text the collector returns for a chunk id it already holds.
pub const ALREADY_UPLOADED: &str = "Already uploaded";

#[derive(Debug, Error)]
pub enum CollectorError {
    /// The collector answered with an application-level error.
    #[error("collector rejected {route}: {message}")]
    Rejected { route: &'static str, message: String },
    #[error("collector returned HTTP {status} for {route}: {body}")]
    Http {
        route: &'static str,
        status: u16,
        body: String,
    },
    #[error("collector request {route} failed: {source}")]
    Transport {
        route: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("collector response for {route} is malformed: {message}")]
    Malformed { route: &'static str, message: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct UploadRowsRequest<'a> {
    pub login_token: &'a str,
    pub project_token: &'a str,
    pub chunk_id: &'a str,
    pub rows: &'a [Vec<serde_json::Value>],
}

#[derive(Debug, Clone, Serialize)]
pub struct UploadIdsRequest<'a> {
    pub login_token: &'a str,
    pub project_token: &'a str,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct UploadRowsResponse {
    upload_id: Option<String>,
    error: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct UploadIdsResponse {
    upload_ids: Option<Vec<String>>,
    error: Option<String>,
}

/// How an accepted upload was acknowledged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadAck {
    /// Freshly accepted with a server-issued id.
    Accepted { upload_id: String },
    /// The collector already held this chunk id.
    AlreadyUploaded { upload_id: Option<String> },
}

impl UploadAck {
    /// Upload id to record for the chunk; falls back to the chunk key when
    /// the collector did not echo one.
    pub fn upload_id_or(&self, chunk_key: &str) -> String {
        match self {
            UploadAck::Accepted { upload_id } => upload_id.clone(),
            UploadAck::AlreadyUploaded { upload_id } => {
                upload_id.clone().unwrap_or_else(|| chunk_key.to_string())
            }
        }
    }
}

/// Client side of the collector protocol.
#[async_trait]
pub trait Collector: Send + Sync {
    async fn upload_rows(&self, request: &UploadRowsRequest<'_>) -> Result<UploadAck, CollectorError>;

    async fn get_upload_ids(
        &self,
        request: &UploadIdsRequest<'_>,
    ) -> Result<HashSet<String>, CollectorError>;
}

/// Collector reached over HTTP with `reqwest`.
pub struct HttpCollector {
    client: reqwest::Client,
    base_url: String,
    max_retries: u32,
}

impl HttpCollector {
    pub fn new(config: &CollectorConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            max_retries: config.max_retries,
        })
    }

    async fn post<B: Serialize + ?Sized, R: for<'de> Deserialize<'de>>(
        &self,
        route: &'static str,
        body: &B,
    ) -> Result<R, CollectorError> {
        let url = format!("{}/{}", self.base_url, route);
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                debug!(route, attempt, ?delay, "retrying collector request");
                tokio::time::sleep(delay).await;
            }

            let resp = self.client.post(&url).json(body).send().await;
            match resp {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return response
                            .json::<R>()
                            .await
                            .map_err(|e| CollectorError::Malformed {
                                route,
                                message: e.to_string(),
                            });
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    let err = CollectorError::Http {
                        route,
                        status: status.as_u16(),
                        body: body_text,
                    };
                    // Rate limited or server error: retry
                    if status.as_u16() == 429 || status.is_server_error() {
                        warn!(route, status = status.as_u16(), "collector request failed");
                        last_err = Some(err);
                        continue;
                    }
                    return Err(err);
                }
                Err(source) => {
                    warn!(route, error = %source, "collector transport error");
                    last_err = Some(CollectorError::Transport { route, source });
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| CollectorError::Malformed {
            route,
            message: "request failed after retries".to_string(),
        }))
    }
}

#[async_trait]
impl Collector for HttpCollector {
    async fn upload_rows(&self, request: &UploadRowsRequest<'_>) -> Result<UploadAck, CollectorError> {
        let resp: UploadRowsResponse = self.post("upload_rows", request).await?;
        interpret_upload(resp)
    }

    async fn get_upload_ids(
        &self,
        request: &UploadIdsRequest<'_>,
    ) -> Result<HashSet<String>, CollectorError> {
        let resp: UploadIdsResponse = self.post("get_upload_ids", request).await?;
        if let Some(message) = resp.error {
            return Err(CollectorError::Rejected {
                route: "get_upload_ids",
                message,
            });
        }
        resp.upload_ids
            .map(|ids| ids.into_iter().collect())
            .ok_or_else(|| CollectorError::Malformed {
                route: "get_upload_ids",
                message: "missing upload_ids".to_string(),
            })
    }
}

fn interpret_upload(resp: UploadRowsResponse) -> Result<UploadAck, CollectorError> {
    match (resp.error, resp.upload_id) {
        (Some(message), upload_id) if message == ALREADY_UPLOADED => {
            Ok(UploadAck::AlreadyUploaded { upload_id })
        }
        (Some(message), _) => Err(CollectorError::Rejected {
            route: "upload_rows",
            message,
        }),
        (None, Some(upload_id)) => Ok(UploadAck::Accepted { upload_id }),
        (None, None) => Err(CollectorError::Malformed {
            route: "upload_rows",
            message: "missing upload_id".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resp(upload_id: Option<&str>, error: Option<&str>) -> UploadRowsResponse {
        UploadRowsResponse {
            upload_id: upload_id.map(str::to_string),
            error: error.map(str::to_string),
        }
    }

    #[test]
    fn already_uploaded_is_success() {
        let ack = interpret_upload(resp(None, Some(ALREADY_UPLOADED))).unwrap();
        assert_eq!(ack, UploadAck::AlreadyUploaded { upload_id: None });
        assert_eq!(ack.upload_id_or("key-1"), "key-1");
    }

    #[test]
    fn other_errors_are_rejections() {
        let err = interpret_upload(resp(None, Some("Invalid login token"))).unwrap_err();
        assert!(err.to_string().contains("Invalid login token"));
    }

    #[test]
    fn accepted_upload_carries_id() {
        let ack = interpret_upload(resp(Some("u-7"), None)).unwrap();
        assert_eq!(ack.upload_id_or("key"), "u-7");
        assert!(interpret_upload(resp(None, None)).is_err());
    }
}

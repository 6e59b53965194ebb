//! TOML configuration parsing and validation.
//!
//! Only `[db]` is required; every other section has defaults.
//!
//! ```toml
//! [db]
//! path = "./data/uplink.sqlite"
//!
//! [storage]
//! root = "./data/projects"
//!
//! [pipeline]
//! rows_per_chunk = 400
//!
//! [upload]
//! max_reconcile_cycles = 5
//!
//! [collector]
//! url = "http://127.0.0.1:5000"
//! timeout_secs = 30
//! max_retries = 2
//!
//! [server]
//! poll_interval_ms = 1000
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default)]
    pub collector: CollectorConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// Per-project folders (chunk archives, errors files) live under here.
    #[serde(default = "default_storage_root")]
    pub root: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: default_storage_root(),
        }
    }
}

fn default_storage_root() -> PathBuf {
    PathBuf::from("./data/projects")
}

#[derive(Debug, Deserialize, Clone)]
pub struct PipelineConfig {
    #[serde(default = "default_rows_per_chunk")]
    pub rows_per_chunk: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            rows_per_chunk: default_rows_per_chunk(),
        }
    }
}

fn default_rows_per_chunk() -> usize {
    400
}

#[derive(Debug, Deserialize, Clone)]
pub struct UploadConfig {
    #[serde(default = "default_max_reconcile_cycles")]
    pub max_reconcile_cycles: u32,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_reconcile_cycles: default_max_reconcile_cycles(),
        }
    }
}

fn default_max_reconcile_cycles() -> u32 {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct CollectorConfig {
    #[serde(default = "default_collector_url")]
    pub url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            url: default_collector_url(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
        }
    }
}

fn default_collector_url() -> String {
    "http://127.0.0.1:5000".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    2
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

fn default_poll_interval_ms() -> u64 {
    1000
}

impl Config {
    /// Defaults rooted at `dir`, for tests and embedding.
    pub fn minimal(dir: &Path) -> Self {
        Self {
            db: DbConfig {
                path: dir.join("uplink.sqlite"),
            },
            storage: StorageConfig {
                root: dir.join("projects"),
            },
            pipeline: PipelineConfig::default(),
            upload: UploadConfig::default(),
            collector: CollectorConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    if config.pipeline.rows_per_chunk == 0 {
        anyhow::bail!("pipeline.rows_per_chunk must be > 0");
    }

    if config.upload.max_reconcile_cycles == 0 {
        anyhow::bail!("upload.max_reconcile_cycles must be > 0");
    }

    if !(config.collector.url.starts_with("http://") || config.collector.url.starts_with("https://"))
    {
        anyhow::bail!(
            "collector.url must start with http:// or https://, got '{}'",
            config.collector.url
        );
    }

    if config.server.poll_interval_ms == 0 {
        anyhow::bail!("server.poll_interval_ms must be > 0");
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_sections_are_missing() {
        let cfg = parse_config("[db]\npath = \"x.sqlite\"\n").unwrap();
        assert_eq!(cfg.pipeline.rows_per_chunk, 400);
        assert_eq!(cfg.upload.max_reconcile_cycles, 5);
        assert_eq!(cfg.collector.url, "http://127.0.0.1:5000");
        assert_eq!(cfg.storage.root, PathBuf::from("./data/projects"));
    }

    #[test]
    fn overrides_are_read() {
        let cfg = parse_config(
            r#"
[db]
path = "x.sqlite"

[pipeline]
rows_per_chunk = 50

[upload]
max_reconcile_cycles = 2

[collector]
url = "https://collector.example"
max_retries = 0
"#,
        )
        .unwrap();
        assert_eq!(cfg.pipeline.rows_per_chunk, 50);
        assert_eq!(cfg.upload.max_reconcile_cycles, 2);
        assert_eq!(cfg.collector.max_retries, 0);
    }

    #[test]
    fn zero_batch_size_rejected() {
        let err = parse_config("[db]\npath = \"x\"\n[pipeline]\nrows_per_chunk = 0\n").unwrap_err();
        assert!(err.to_string().contains("rows_per_chunk"));
    }

    #[test]
    fn zero_cycle_bound_rejected() {
        let err =
            parse_config("[db]\npath = \"x\"\n[upload]\nmax_reconcile_cycles = 0\n").unwrap_err();
        assert!(err.to_string().contains("max_reconcile_cycles"));
    }

    #[test]
    fn bad_collector_url_rejected() {
        assert!(parse_config("[db]\npath = \"x\"\n[collector]\nurl = \"ftp://x\"\n").is_err());
    }
}

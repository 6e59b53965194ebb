//! # Tabular Uplink
//!
//! Validates tabular data, splits it into compressed chunks, and uploads the
//! chunks to a remote collector with bounded reconciliation.
//!
//! A project's rows come either from a delimited file or, in server mode,
//! from an inbox folder of JSON batches written by an external listener.
//! Rows are converted column by column against the project's validation
//! tags; valid rows become chunk archives on disk and invalid rows go to an
//! errors file. Uploading sends every chunk, then asks the collector which
//! chunks it holds and resends the rest, a bounded number of times.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌──────────────┐   ┌──────────────┐   ┌───────────┐
//! │ CSV file / │──▶│ ChunkBatcher │──▶│ chunk .zip + │──▶│  Upload    │──▶ collector
//! │ inbox JSON │   │  converters  │   │ SQLite rows  │   │ + reconcile│
//! └────────────┘   └──────────────┘   └──────────────┘   └───────────┘
//!         ▲                 all driven one step at a time by
//!         └──────────────── Scheduler ─▶ Task { Split | Upload | Serve }
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | SQLite implementation of the `Store` trait |
//! | [`layout`] | Per-project working directories |
//! | [`archive`] | Chunk archive codec |
//! | [`source`] | Row sources |
//! | [`pipeline`] | Validate-and-split |
//! | [`collector`] | Collector protocol and HTTP client |
//! | [`upload`] | Upload and reconciliation |
//! | [`ingestor`] | Server-mode inbox draining |
//! | [`task`] | Resumable task state machine |
//! | [`scheduler`] | Cooperative scheduler |
//! | [`recovery`] | Startup crash recovery |
//! | [`progress`] | Project change listeners |
//! | [`status`] | `list` / `show` output |
//! | [`commands`] | CLI command implementations |

pub mod archive;
pub mod collector;
pub mod commands;
pub mod config;
pub mod context;
pub mod db;
pub mod error;
pub mod ingestor;
pub mod layout;
pub mod migrate;
pub mod pipeline;
pub mod progress;
pub mod recovery;
pub mod scheduler;
pub mod source;
pub mod sqlite_store;
pub mod status;
pub mod task;
pub mod upload;

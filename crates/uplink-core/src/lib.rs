//! # uplink-core
//!
//! Shared logic for tabular-uplink: data models, field converters, and the
//! store abstraction with an in-memory backend.
//!
//! This crate contains no tokio, sqlx, HTTP, or filesystem I/O.

pub mod convert;
pub mod models;
pub mod store;

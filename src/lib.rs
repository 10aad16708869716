//! Multi-source content sync and health monitoring.
//!
//! Pulls items from external providers through pluggable adapters, upserts them
//! into SQLite idempotently, and keeps per-source health and an audit log.

pub mod adapters;
pub mod api;
pub mod config;
pub mod credentials;
pub mod db;
pub mod error;
pub mod fetch;
pub mod health;
pub mod keywords;
pub mod model;
pub mod store;
pub mod sync;

pub use error::{Result, SyncError, UpstreamError, UpstreamErrorKind};

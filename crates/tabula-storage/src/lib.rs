//! SQLite-backed persistence for Tabula.
//!
//! Owns schema creation and migration plus every query the ingestion and
//! export paths run; nothing SQL-shaped leaks to callers. Covers:
//! - template metadata, discovered schema fields, and captured header cells
//! - required-field rules with soft delete
//! - upload batches with persisted progress counters
//! - data records and field values, including the chunked replace path

mod schema;
pub mod storage;
mod types;

pub use storage::{Storage, StorageError};
pub use types::{StyleCell, TemplateMeta};

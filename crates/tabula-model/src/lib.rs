//! Core data model for the Tabula ingestion engine.
//!
//! This crate is deliberately free of I/O: it defines the column codec,
//! the per-template field schema, required-field rules, upload batches,
//! stored records/values, progress snapshots and validation reports that
//! the other crates persist and move around.

pub mod batch;
pub mod column;
pub mod decimal;
pub mod field;
pub mod progress;
pub mod record;
pub mod rules;
pub mod validation;

pub use batch::{BatchStatus, UploadBatch};
pub use column::{
    col_to_letter, letter_to_col, CellRef, ColumnLetterError, MergedRange, RangeParseError,
    RefParseError,
};
pub use decimal::normalize_decimal;
pub use field::{storage_key, FieldSchema, FieldType, SchemaField};
pub use progress::ProgressSnapshot;
pub use record::{DataRecord, FieldValue};
pub use rules::{RequiredFieldRule, RuleScope};
pub use validation::{FieldCheck, FileValidationReport, RowValidation};

use thiserror::Error;
use uuid::Uuid;

use tabula_model::{ColumnLetterError, FileValidationReport};
use tabula_storage::StorageError;
use tabula_xlsx::XlsxError;

#[derive(Debug, Error)]
pub enum EngineError {
    /// The template exists but no live schema entries are attached to it.
    #[error("no schema for template {0}")]
    SchemaNotFound(Uuid),

    /// Pre-flight refused the file; the report carries every violation.
    #[error("file validation failed: {} of {} rows invalid", report.invalid_rows, report.total_rows)]
    FileValidationFailed { report: FileValidationReport },

    /// Strict-mode ingestion stopped at an invalid row.
    #[error("ingestion aborted at row {row}: {message}")]
    Aborted { row: u32, message: String },

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("spreadsheet error: {0}")]
    Xlsx(#[from] XlsxError),

    #[error("column letter error: {0}")]
    Column(#[from] ColumnLetterError),

    #[error("style encoding error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;

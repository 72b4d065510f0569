//! Upload batches: one row per ingestion attempt.

use core::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Batch lifecycle. `Processing` is the only non-terminal state after
/// dispatch; everything else is final and never transitions again.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchStatus {
    Pending,
    Processing,
    Success,
    PartialSuccess,
    Failed,
}

impl BatchStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            BatchStatus::Pending => "PENDING",
            BatchStatus::Processing => "PROCESSING",
            BatchStatus::Success => "SUCCESS",
            BatchStatus::PartialSuccess => "PARTIAL_SUCCESS",
            BatchStatus::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<BatchStatus> {
        match s {
            "PENDING" => Some(BatchStatus::Pending),
            "PROCESSING" => Some(BatchStatus::Processing),
            "SUCCESS" => Some(BatchStatus::Success),
            "PARTIAL_SUCCESS" => Some(BatchStatus::PartialSuccess),
            "FAILED" => Some(BatchStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            BatchStatus::Success | BatchStatus::PartialSuccess | BatchStatus::Failed
        )
    }

    /// Classify a finished run from its row counters.
    pub fn classify(success_rows: u32, failed_rows: u32) -> BatchStatus {
        if failed_rows == 0 {
            BatchStatus::Success
        } else if success_rows == 0 {
            BatchStatus::Failed
        } else {
            BatchStatus::PartialSuccess
        }
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One ingestion attempt and its outcome.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UploadBatch {
    pub id: Uuid,
    /// Human-readable audit number, `UPLOAD_<date>_<time>_<NNN>`.
    pub upload_no: String,
    pub organization_id: Uuid,
    pub principal_id: Uuid,
    pub template_id: Uuid,
    /// Path of the working copy consumed by the worker, if still known.
    pub source_file: Option<String>,
    pub original_filename: Option<String>,
    pub total_rows: u32,
    pub success_rows: u32,
    pub failed_rows: u32,
    pub status: BatchStatus,
    pub error_message: Option<String>,
    /// How many prior records the overwrite step removed.
    pub replaced_records: u32,
    /// Set on earlier batches when a later upload replaces their data.
    pub superseded: bool,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_text_roundtrip() {
        for st in [
            BatchStatus::Pending,
            BatchStatus::Processing,
            BatchStatus::Success,
            BatchStatus::PartialSuccess,
            BatchStatus::Failed,
        ] {
            assert_eq!(BatchStatus::parse(st.as_str()), Some(st));
        }
        assert_eq!(BatchStatus::parse("DONE"), None);
        assert_eq!(
            serde_json::to_string(&BatchStatus::PartialSuccess).unwrap(),
            "\"PARTIAL_SUCCESS\""
        );
    }

    #[test]
    fn terminal_states() {
        assert!(!BatchStatus::Pending.is_terminal());
        assert!(!BatchStatus::Processing.is_terminal());
        assert!(BatchStatus::Success.is_terminal());
        assert!(BatchStatus::PartialSuccess.is_terminal());
        assert!(BatchStatus::Failed.is_terminal());
    }

    #[test]
    fn classification_from_counters() {
        assert_eq!(BatchStatus::classify(10, 0), BatchStatus::Success);
        assert_eq!(BatchStatus::classify(9, 1), BatchStatus::PartialSuccess);
        assert_eq!(BatchStatus::classify(0, 10), BatchStatus::Failed);
        // An empty file ends SUCCESS: nothing failed.
        assert_eq!(BatchStatus::classify(0, 0), BatchStatus::Success);
    }
}

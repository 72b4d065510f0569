//! Progress snapshots polled while a batch runs.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::batch::{BatchStatus, UploadBatch};

/// Point-in-time view of a batch, updated on every flush.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub batch_id: Uuid,
    pub total_rows: u32,
    pub processed_rows: u32,
    pub success_rows: u32,
    pub failed_rows: u32,
    /// `processed / total`, in whole percent, capped at 100.
    pub percentage: u8,
    pub status: BatchStatus,
    pub message: Option<String>,
}

impl ProgressSnapshot {
    pub fn started(batch_id: Uuid, total_rows: u32) -> Self {
        Self {
            batch_id,
            total_rows,
            processed_rows: 0,
            success_rows: 0,
            failed_rows: 0,
            percentage: 0,
            status: BatchStatus::Processing,
            message: None,
        }
    }

    pub fn percentage_of(processed: u32, total: u32) -> u8 {
        if total == 0 {
            return 0;
        }
        ((processed as u64 * 100 / total as u64).min(100)) as u8
    }

    /// Reduced-fidelity snapshot reconstructed from the persisted batch row,
    /// used when the in-memory entry has already been evicted.
    pub fn from_batch(batch: &UploadBatch) -> Self {
        let processed = batch.success_rows + batch.failed_rows;
        let percentage = if batch.status.is_terminal() {
            100
        } else {
            Self::percentage_of(processed, batch.total_rows)
        };
        Self {
            batch_id: batch.id,
            total_rows: batch.total_rows,
            processed_rows: processed,
            success_rows: batch.success_rows,
            failed_rows: batch.failed_rows,
            percentage,
            status: batch.status,
            message: batch.error_message.clone(),
        }
    }
}

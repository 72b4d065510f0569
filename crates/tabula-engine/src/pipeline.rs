//! The ingestion pipeline: one batch, parsed, judged, and stored.
//!
//! A run executes on a pool worker (or inline under caller-runs
//! back-pressure). It owns its working copy, keeps the batch row and the
//! progress store current while it walks the file, and always leaves the
//! batch in a terminal state, even when it fails partway.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use tabula_model::{BatchStatus, DataRecord, FieldSchema, FieldValue, ProgressSnapshot, UploadBatch};
use tabula_storage::Storage;
use tabula_xlsx::{read_sheet_from_bytes, read_sheet_from_path, TabularSheet};

use crate::error::{EngineError, Result};
use crate::policy::EffectivePolicy;
use crate::preflight::{data_rows, SheetRow};
use crate::progress::ProgressStore;

/// Validation behavior of one ingestion run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationMode {
    /// Store every row as-is.
    Off,
    /// Any invalid row fails the whole batch.
    #[default]
    Strict,
    /// Invalid rows count as failed and are not stored.
    SkipInvalid,
}

/// What to ingest: bytes held in memory or a working copy on disk.
#[derive(Debug)]
pub(crate) enum JobSource {
    Bytes(Vec<u8>),
    WorkingCopy(PathBuf),
}

enum RowOutcome {
    Store(PreparedRow),
    Skip { ordinal: u32, message: String },
    Abort { ordinal: u32, message: String },
}

struct PreparedRow {
    record: DataRecord,
    values: Vec<FieldValue>,
}

pub(crate) struct PipelineRun {
    storage: Storage,
    progress: ProgressStore,
    batch_id: Uuid,
    organization_id: Uuid,
    principal_id: Uuid,
    schema: FieldSchema,
    policy: EffectivePolicy,
    mode: ValidationMode,
    replace_existing: bool,
    source: JobSource,
    flush_every: u32,
    total_rows: u32,
    success_rows: u32,
    failed_rows: u32,
    /// Counters as of the last storage flush. An abort rewinds to these,
    /// since the buffered tail never reached storage.
    flushed: (u32, u32),
}

impl PipelineRun {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        storage: Storage,
        progress: ProgressStore,
        batch: &UploadBatch,
        schema: FieldSchema,
        policy: EffectivePolicy,
        mode: ValidationMode,
        replace_existing: bool,
        source: JobSource,
        flush_every: u32,
    ) -> Self {
        PipelineRun {
            storage,
            progress,
            batch_id: batch.id,
            organization_id: batch.organization_id,
            principal_id: batch.principal_id,
            schema,
            policy,
            mode,
            replace_existing,
            source,
            flush_every: flush_every.max(1),
            total_rows: 0,
            success_rows: 0,
            failed_rows: 0,
            flushed: (0, 0),
        }
    }

    /// Execute the run to a terminal batch state, then drop the working
    /// copy. Never panics out of a worker.
    pub(crate) fn run(mut self) {
        let working_copy = match &self.source {
            JobSource::WorkingCopy(path) => Some(path.clone()),
            JobSource::Bytes(_) => None,
        };

        if let Err(err) = self.execute() {
            let message = err.to_string();
            log::error!("batch {}: ingestion failed: {message}", self.batch_id);
            self.fail(&message);
        }

        if let Some(path) = working_copy {
            if let Err(err) = std::fs::remove_file(&path) {
                log::warn!(
                    "batch {}: working copy {} not removed: {err}",
                    self.batch_id,
                    path.display()
                );
            }
        }
    }

    fn execute(&mut self) -> Result<()> {
        let sheet = self.read_sheet()?;
        let rows = data_rows(&sheet, &self.schema)?;
        self.total_rows = rows.len() as u32;
        self.storage.set_batch_total_rows(self.batch_id, self.total_rows)?;
        self.publish(BatchStatus::Processing, None);

        // The file parsed; only now is it safe to clear the prior upload.
        if self.replace_existing {
            self.replace_prior_data()?;
        }

        let mut records: Vec<DataRecord> = Vec::new();
        let mut values: Vec<FieldValue> = Vec::new();
        let mut since_flush = 0u32;

        for row in &rows {
            match self.judge(row) {
                RowOutcome::Store(prepared) => {
                    self.success_rows += 1;
                    records.push(prepared.record);
                    values.extend(prepared.values);
                }
                RowOutcome::Skip { ordinal, message } => {
                    self.failed_rows += 1;
                    log::debug!("batch {}: row {ordinal} skipped: {message}", self.batch_id);
                }
                RowOutcome::Abort { ordinal, message } => {
                    self.success_rows = self.flushed.0;
                    self.failed_rows = self.flushed.1;
                    return Err(EngineError::Aborted { row: ordinal, message });
                }
            }
            since_flush += 1;
            if since_flush >= self.flush_every {
                self.flush(&mut records, &mut values)?;
                since_flush = 0;
            }
        }
        self.flush(&mut records, &mut values)?;

        let status = BatchStatus::classify(self.success_rows, self.failed_rows);
        self.storage.complete_batch(
            self.batch_id,
            status,
            self.success_rows,
            self.failed_rows,
            None,
        )?;
        self.progress.complete(self.snapshot(status, None));
        log::info!(
            "batch {}: {} ({} stored, {} failed of {})",
            self.batch_id,
            status.as_str(),
            self.success_rows,
            self.failed_rows,
            self.total_rows
        );
        Ok(())
    }

    fn read_sheet(&self) -> Result<TabularSheet> {
        match &self.source {
            JobSource::Bytes(bytes) => Ok(read_sheet_from_bytes(bytes)?),
            JobSource::WorkingCopy(path) => Ok(read_sheet_from_path(path)?),
        }
    }

    fn replace_prior_data(&mut self) -> Result<()> {
        let replaced = self.storage.delete_existing_for(
            self.organization_id,
            self.principal_id,
            self.schema.template_id,
        )?;
        self.storage
            .set_batch_replaced_records(self.batch_id, replaced as u32)?;
        let superseded = self.storage.supersede_prior_batches(
            self.organization_id,
            self.principal_id,
            self.schema.template_id,
            self.batch_id,
        )?;
        if replaced > 0 {
            log::info!(
                "batch {}: replaced {replaced} records across {superseded} prior batches",
                self.batch_id
            );
        }
        Ok(())
    }

    fn judge(&self, row: &SheetRow) -> RowOutcome {
        if self.mode != ValidationMode::Off {
            let verdict = self.policy.validate_row(row);
            if !verdict.valid {
                let message = verdict
                    .summary
                    .unwrap_or_else(|| "required field missing".to_string());
                return match self.mode {
                    ValidationMode::Strict => RowOutcome::Abort {
                        ordinal: row.ordinal,
                        message,
                    },
                    _ => RowOutcome::Skip {
                        ordinal: row.ordinal,
                        message,
                    },
                };
            }
        }

        let record = DataRecord {
            id: Uuid::new_v4(),
            batch_id: self.batch_id,
            template_id: self.schema.template_id,
            organization_id: self.organization_id,
            principal_id: self.principal_id,
            row_ordinal: row.ordinal,
            is_latest: true,
            data_version: 1,
            deleted: false,
        };
        let mut values = Vec::with_capacity(self.schema.len());
        for (i, field) in self.schema.fields.iter().enumerate() {
            let text = row.values.get(i).map(String::as_str).unwrap_or("");
            values.push(FieldValue::intact(
                record.id,
                &field.storage_key,
                text,
                field.sort_order,
            ));
        }
        RowOutcome::Store(PreparedRow { record, values })
    }

    fn flush(&mut self, records: &mut Vec<DataRecord>, values: &mut Vec<FieldValue>) -> Result<()> {
        if !records.is_empty() {
            self.storage.insert_rows(records, values)?;
            records.clear();
            values.clear();
        }
        self.storage
            .update_batch_counters(self.batch_id, self.success_rows, self.failed_rows)?;
        self.flushed = (self.success_rows, self.failed_rows);
        self.publish(BatchStatus::Processing, None);
        log::debug!(
            "batch {}: {}/{} rows processed",
            self.batch_id,
            self.success_rows + self.failed_rows,
            self.total_rows
        );
        Ok(())
    }

    fn fail(&self, message: &str) {
        if let Err(err) = self.storage.complete_batch(
            self.batch_id,
            BatchStatus::Failed,
            self.success_rows,
            self.failed_rows,
            Some(message),
        ) {
            log::error!("batch {}: failure state not persisted: {err}", self.batch_id);
        }
        self.progress
            .complete(self.snapshot(BatchStatus::Failed, Some(message.to_string())));
    }

    fn snapshot(&self, status: BatchStatus, message: Option<String>) -> ProgressSnapshot {
        let processed = self.success_rows + self.failed_rows;
        ProgressSnapshot {
            batch_id: self.batch_id,
            total_rows: self.total_rows,
            processed_rows: processed,
            success_rows: self.success_rows,
            failed_rows: self.failed_rows,
            percentage: if status.is_terminal() {
                100
            } else {
                ProgressSnapshot::percentage_of(processed, self.total_rows)
            },
            status,
            message,
        }
    }

    fn publish(&self, status: BatchStatus, message: Option<String>) {
        self.progress.update(self.snapshot(status, message));
    }
}

//! Tabula's orchestration layer.
//!
//! One facade, [`TabulaEngine`], covers the whole template lifecycle:
//! importing a template workbook to discover an organization's schema,
//! validating and ingesting data files against it on a bounded worker
//! pool, answering progress polls while a batch runs, and projecting
//! stored records back out as workbooks shaped like the template.
//!
//! Ingestion is asynchronous by default: [`TabulaEngine::ingest`] returns
//! as soon as the batch row is durable and the job is queued, and callers
//! follow the run through [`TabulaEngine::progress`]. Everything a batch
//! does after that point lands in storage, so a crashed poller can always
//! fall back to the batch row.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use tabula_model::{
    BatchStatus, DataRecord, FieldSchema, FieldValue, FileValidationReport, ProgressSnapshot,
    RequiredFieldRule, RuleScope, UploadBatch,
};
use tabula_storage::{Storage, TemplateMeta};
use tabula_xlsx::{read_sheet_from_bytes, read_sheet_from_path};

mod error;
mod export;
mod extract;
mod pipeline;
mod policy;
mod preflight;
mod progress;
mod queue;
mod resolve;

pub use error::{EngineError, Result};
pub use pipeline::ValidationMode;
pub use policy::{BoundRule, EffectivePolicy};
pub use preflight::SheetRow;
pub use progress::{ProgressConfig, ProgressStore};
pub use queue::{Job, PoolConfig, WorkerPool};
pub use resolve::{display_name, FieldResolver};

use pipeline::{JobSource, PipelineRun};

/// Tuning knobs for the facade. The defaults match a small server
/// deployment and every size clamps to at least one.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Rows per storage flush during ingestion. Default: 100.
    pub flush_every: u32,
    pub pool: PoolConfig,
    pub progress: ProgressConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            flush_every: 100,
            pool: PoolConfig::default(),
            progress: ProgressConfig::default(),
        }
    }
}

/// Options for importing a template workbook.
#[derive(Debug, Clone)]
pub struct TemplateOptions {
    /// Depth of the header band in rows. Default: 4.
    pub header_rows: u32,
    /// First data row, 0-based. Defaults to the row after the band.
    pub data_start_row: Option<u32>,
    /// Name the file had on the uploader's machine.
    pub original_filename: Option<String>,
}

impl Default for TemplateOptions {
    fn default() -> Self {
        TemplateOptions {
            header_rows: 4,
            data_start_row: None,
            original_filename: None,
        }
    }
}

/// Source of an upload.
#[derive(Debug, Clone)]
pub enum IngestSource {
    Bytes(Vec<u8>),
    Path(PathBuf),
}

/// What to ingest and how to judge it.
#[derive(Debug, Clone)]
pub struct IngestRequest {
    pub template_id: Uuid,
    pub organization_id: Uuid,
    pub principal_id: Uuid,
    pub mode: ValidationMode,
    /// Drop the scope's prior records before storing the new ones.
    pub replace_existing: bool,
    pub original_filename: Option<String>,
}

/// Returned once a batch is durable and its job is queued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchHandle {
    pub batch_id: Uuid,
    pub upload_no: String,
}

pub struct TabulaEngine {
    storage: Storage,
    progress: ProgressStore,
    pool: Option<WorkerPool>,
    flush_every: u32,
}

impl TabulaEngine {
    /// Build an engine over `storage`.
    ///
    /// Worker tasks spawn on the current tokio runtime when one exists;
    /// without a runtime every ingestion runs on the submitting thread
    /// instead of being queued.
    pub fn new(storage: Storage, mut config: EngineConfig) -> Self {
        config.flush_every = config.flush_every.max(1);
        let pool = tokio::runtime::Handle::try_current()
            .ok()
            .map(|_| WorkerPool::spawn(config.pool.clone()));
        TabulaEngine {
            storage,
            progress: ProgressStore::new(config.progress),
            pool,
            flush_every: config.flush_every,
        }
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn progress_store(&self) -> &ProgressStore {
        &self.progress
    }

    /// Discover and install an organization's schema from a template
    /// workbook.
    ///
    /// The schema entries and the captured header band replace whatever
    /// the template had before, and earlier templates of the organization
    /// are retired so this one becomes current.
    pub fn import_template(
        &self,
        bytes: &[u8],
        organization_id: Uuid,
        name: &str,
        options: TemplateOptions,
    ) -> Result<Uuid> {
        let sheet = read_sheet_from_bytes(bytes)?;
        let header_rows = options.header_rows.max(1);
        let data_start_row = options.data_start_row.unwrap_or(header_rows);

        let template = self.storage.create_template(
            organization_id,
            name,
            options.original_filename.as_deref(),
            header_rows,
            data_start_row,
        )?;
        let fields = extract::extract_schema(&sheet, template.id, header_rows);
        let (styles, merges) = extract::capture_header(&sheet, data_start_row)?;
        self.storage
            .install_template_artifacts(template.id, &fields, &styles, &merges)?;
        self.storage
            .retire_prior_templates(organization_id, template.id)?;

        log::info!(
            "template {} ({name}): {} fields discovered, {} header cells captured",
            template.id,
            fields.len(),
            styles.len()
        );
        Ok(template.id)
    }

    /// The organization's current template, if it has one.
    pub fn latest_template(&self, organization_id: Uuid) -> Result<Option<TemplateMeta>> {
        Ok(self.storage.latest_template_for_org(organization_id)?)
    }

    /// Load a template's live schema.
    pub fn load_schema(&self, template_id: Uuid) -> Result<FieldSchema> {
        let template = self.storage.get_template(template_id)?;
        let fields = self.storage.schema_fields(template_id)?;
        if fields.is_empty() {
            return Err(EngineError::SchemaNotFound(template_id));
        }
        Ok(FieldSchema {
            template_id,
            header_rows: template.header_rows,
            data_start_row: template.data_start_row,
            fields,
        })
    }

    /// Judge a whole file against the template's required-field policy
    /// without touching any stored data.
    pub fn validate_file(&self, bytes: &[u8], template_id: Uuid) -> Result<FileValidationReport> {
        let schema = self.load_schema(template_id)?;
        let policy = self.effective_policy(&schema)?;
        let sheet = read_sheet_from_bytes(bytes)?;
        preflight::validate_sheet(&sheet, &schema, &policy)
    }

    /// Start ingesting an upload.
    ///
    /// Returns once the batch row is durable and the job is queued (or,
    /// under back-pressure, already executed inline). In strict mode the
    /// file is validated up front: a single invalid row rejects it with
    /// [`EngineError::FileValidationFailed`], the batch is closed as
    /// failed for the audit trail, and no record data is touched.
    ///
    /// Rows flushed before a mid-run failure stay committed; the batch
    /// row's counters always say how many.
    pub fn ingest(&self, source: IngestSource, request: IngestRequest) -> Result<BatchHandle> {
        let schema = self.load_schema(request.template_id)?;
        let policy = self.effective_policy(&schema)?;

        let job_source = match source {
            IngestSource::Bytes(bytes) => JobSource::Bytes(bytes),
            IngestSource::Path(path) => JobSource::WorkingCopy(stage_working_copy(&path)?),
        };
        let working_copy = match &job_source {
            JobSource::WorkingCopy(path) => Some(path.clone()),
            JobSource::Bytes(_) => None,
        };

        let dispatched = self.dispatch(request, schema, policy, job_source);
        if dispatched.is_err() {
            // The job never took ownership, so the copy goes here.
            if let Some(path) = &working_copy {
                remove_working_copy(path);
            }
        }
        dispatched
    }

    fn dispatch(
        &self,
        request: IngestRequest,
        schema: FieldSchema,
        policy: EffectivePolicy,
        job_source: JobSource,
    ) -> Result<BatchHandle> {
        let now = Utc::now();
        let batch = UploadBatch {
            id: Uuid::new_v4(),
            upload_no: upload_no(now),
            organization_id: request.organization_id,
            principal_id: request.principal_id,
            template_id: request.template_id,
            source_file: match &job_source {
                JobSource::WorkingCopy(path) => Some(path.to_string_lossy().into_owned()),
                JobSource::Bytes(_) => None,
            },
            original_filename: request.original_filename.clone(),
            total_rows: 0,
            success_rows: 0,
            failed_rows: 0,
            status: BatchStatus::Pending,
            error_message: None,
            replaced_records: 0,
            superseded: false,
            started_at: now,
            completed_at: None,
        };
        self.storage.insert_batch(&batch)?;

        if request.mode == ValidationMode::Strict {
            let sheet = match &job_source {
                JobSource::Bytes(bytes) => read_sheet_from_bytes(bytes)?,
                JobSource::WorkingCopy(path) => read_sheet_from_path(path)?,
            };
            let report = preflight::validate_sheet(&sheet, &schema, &policy)?;
            if !report.can_proceed {
                let err = EngineError::FileValidationFailed { report };
                self.storage.complete_batch(
                    batch.id,
                    BatchStatus::Failed,
                    0,
                    0,
                    Some(&err.to_string()),
                )?;
                log::info!("batch {} ({}): rejected by pre-flight", batch.id, batch.upload_no);
                return Err(err);
            }
        }

        self.storage
            .set_batch_status(batch.id, BatchStatus::Processing)?;
        self.progress.insert(ProgressSnapshot::started(batch.id, 0));

        let run = PipelineRun::new(
            self.storage.clone(),
            self.progress.clone(),
            &batch,
            schema,
            policy,
            request.mode,
            request.replace_existing,
            job_source,
            self.flush_every,
        );
        let job: Job = Box::new(move || run.run());
        match &self.pool {
            Some(pool) => pool.submit(job),
            None => job(),
        }
        log::debug!("batch {} ({}): queued", batch.id, batch.upload_no);

        Ok(BatchHandle {
            batch_id: batch.id,
            upload_no: batch.upload_no,
        })
    }

    /// Live progress of a batch.
    ///
    /// Served from the in-memory store while the snapshot is fresh; once
    /// it ages out the batch row answers instead, with the same shape.
    pub fn progress(&self, batch_id: Uuid) -> Result<ProgressSnapshot> {
        if let Some(snapshot) = self.progress.get(batch_id) {
            return Ok(snapshot);
        }
        let batch = self.storage.get_batch(batch_id)?;
        Ok(ProgressSnapshot::from_batch(&batch))
    }

    /// Upload history of a principal within an organization, newest
    /// first.
    pub fn list_batches(&self, organization_id: Uuid, principal_id: Uuid) -> Result<Vec<UploadBatch>> {
        Ok(self.storage.list_batches(organization_id, principal_id)?)
    }

    /// Export specific records as a workbook shaped like the template.
    pub fn export_records(&self, template_id: Uuid, record_ids: &[Uuid]) -> Result<Vec<u8>> {
        let records = self.storage.records_by_ids(record_ids)?;
        self.export_workbook(template_id, &records)
    }

    /// Export the organization's live snapshot: every principal's latest
    /// rows, grouped per principal.
    pub fn export_latest(&self, template_id: Uuid, organization_id: Uuid) -> Result<Vec<u8>> {
        let records = self
            .storage
            .latest_records_for_org(organization_id, template_id)?;
        self.export_workbook(template_id, &records)
    }

    fn export_workbook(
        &self,
        template_id: Uuid,
        records: &[(DataRecord, Vec<FieldValue>)],
    ) -> Result<Vec<u8>> {
        let template = self.storage.get_template(template_id)?;
        let schema = self.load_schema(template_id)?;
        let header = self.storage.template_styles(template_id)?;
        let merges = self.storage.template_merges(template_id)?;
        export::write_workbook(&template.name, &schema, &header, &merges, records)
    }

    /// Install or update a user-scope required-field rule.
    pub fn upsert_rule(
        &self,
        template_id: Uuid,
        field_name: &str,
        required: bool,
        message: Option<&str>,
    ) -> Result<()> {
        let rule = RequiredFieldRule::new(
            template_id,
            field_name,
            required,
            message.map(str::to_string),
            RuleScope::User,
        );
        self.storage.upsert_rule(&rule)?;
        Ok(())
    }

    /// Soft-delete a rule. `false` when no live rule matched.
    pub fn delete_rule(&self, template_id: Uuid, field_name: &str) -> Result<bool> {
        Ok(self.storage.soft_delete_rule(template_id, field_name)?)
    }

    /// Replace the template's live rules wholesale.
    pub fn replace_rules(&self, template_id: Uuid, rules: &[RequiredFieldRule]) -> Result<()> {
        Ok(self.storage.replace_rules(template_id, rules)?)
    }

    /// The template's live rules, by field name.
    pub fn list_rules(&self, template_id: Uuid) -> Result<Vec<RequiredFieldRule>> {
        Ok(self.storage.active_rules(template_id)?)
    }

    /// Install system-scope defaults for fields that have no live rule
    /// yet. Returns how many were installed.
    pub fn seed_system_rules(&self, template_id: Uuid, field_names: &[&str]) -> Result<u64> {
        let rules: Vec<RequiredFieldRule> = field_names
            .iter()
            .map(|name| RequiredFieldRule::new(template_id, *name, true, None, RuleScope::System))
            .collect();
        Ok(self.storage.seed_rules(&rules)?)
    }

    fn effective_policy(&self, schema: &FieldSchema) -> Result<EffectivePolicy> {
        let rules = self.storage.active_rules(schema.template_id)?;
        Ok(EffectivePolicy::bind(&rules, schema))
    }

    /// Close the job queue and wait for in-flight ingestions to finish.
    pub async fn shutdown(&mut self) {
        if let Some(pool) = self.pool.take() {
            pool.shutdown().await;
        }
    }
}

/// Audit number of a batch: `UPLOAD_<yyyyMMdd>_<HHmmss>_<NNN>`.
fn upload_no(now: DateTime<Utc>) -> String {
    let suffix: u16 = rand::thread_rng().gen_range(0..1000);
    format!("UPLOAD_{}_{suffix:03}", now.format("%Y%m%d_%H%M%S"))
}

/// Copy the upload to a private working file the job will own.
fn stage_working_copy(path: &Path) -> Result<PathBuf> {
    let staged = tempfile::NamedTempFile::new()?;
    std::fs::copy(path, staged.path())?;
    let (_file, staged_path) = staged.keep().map_err(|err| EngineError::Io(err.error))?;
    Ok(staged_path)
}

fn remove_working_copy(path: &Path) {
    if let Err(err) = std::fs::remove_file(path) {
        log::warn!("working copy {} not removed: {err}", path.display());
    }
}

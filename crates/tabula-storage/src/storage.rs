use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, Connection, OpenFlags, OptionalExtension};
use thiserror::Error;
use uuid::Uuid;

use tabula_model::{
    BatchStatus, CellRef, DataRecord, FieldType, FieldValue, MergedRange, RequiredFieldRule,
    RuleScope, SchemaField, UploadBatch,
};

use crate::schema;
use crate::types::{StyleCell, TemplateMeta};

/// Ids per `IN (...)` list when deleting replaced records.
const DELETE_CHUNK: usize = 500;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("template not found: {0}")]
    TemplateNotFound(Uuid),
    #[error("upload batch not found: {0}")]
    BatchNotFound(Uuid),
}

pub type Result<T> = std::result::Result<T, StorageError>;

#[derive(Debug, Clone)]
pub struct Storage {
    conn: Arc<Mutex<Connection>>,
}

impl Storage {
    pub fn open_path(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        schema::init(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.busy_timeout(Duration::from_secs(5))?;
        schema::init(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_uri(uri: &str) -> Result<Self> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_URI;
        let conn = Connection::open_with_flags(uri, flags)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        schema::init(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    // ---- templates ----

    pub fn create_template(
        &self,
        organization_id: Uuid,
        name: &str,
        original_filename: Option<&str>,
        header_rows: u32,
        data_start_row: u32,
    ) -> Result<TemplateMeta> {
        let now = Utc::now();
        let template = TemplateMeta {
            id: Uuid::new_v4(),
            organization_id,
            name: name.to_string(),
            original_filename: original_filename.map(str::to_string),
            header_rows,
            data_start_row,
            created_at: now,
            updated_at: now,
        };

        let conn = self.conn.lock().expect("storage mutex poisoned");
        conn.execute(
            r#"
            INSERT INTO templates (
              id, organization_id, name, original_filename,
              header_rows, data_start_row, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                template.id.to_string(),
                template.organization_id.to_string(),
                &template.name,
                template.original_filename.as_deref(),
                template.header_rows,
                template.data_start_row,
                template.created_at.to_rfc3339(),
                template.updated_at.to_rfc3339(),
            ],
        )?;

        Ok(template)
    }

    pub fn get_template(&self, id: Uuid) -> Result<TemplateMeta> {
        let conn = self.conn.lock().expect("storage mutex poisoned");
        let row = conn
            .query_row(
                r#"
                SELECT id, organization_id, name, original_filename,
                       header_rows, data_start_row, created_at, updated_at
                FROM templates
                WHERE id = ?1
                "#,
                params![id.to_string()],
                template_from_row,
            )
            .optional()?;

        row.ok_or(StorageError::TemplateNotFound(id))
    }

    /// The organization's active template: the most recently imported one
    /// that has not been retired.
    pub fn latest_template_for_org(&self, organization_id: Uuid) -> Result<Option<TemplateMeta>> {
        let conn = self.conn.lock().expect("storage mutex poisoned");
        let row = conn
            .query_row(
                r#"
                SELECT id, organization_id, name, original_filename,
                       header_rows, data_start_row, created_at, updated_at
                FROM templates
                WHERE organization_id = ?1 AND deleted = 0
                ORDER BY created_at DESC, id DESC
                LIMIT 1
                "#,
                params![organization_id.to_string()],
                template_from_row,
            )
            .optional()?;
        Ok(row)
    }

    /// Soft-deletes every other template of the organization once `keep` is
    /// imported. Retired templates stay readable through [`Self::get_template`]
    /// so old batches can still be displayed.
    pub fn retire_prior_templates(&self, organization_id: Uuid, keep: Uuid) -> Result<u64> {
        let conn = self.conn.lock().expect("storage mutex poisoned");
        let affected = conn.execute(
            r#"
            UPDATE templates
            SET deleted = 1, updated_at = ?1
            WHERE organization_id = ?2 AND id != ?3 AND deleted = 0
            "#,
            params![
                Utc::now().to_rfc3339(),
                organization_id.to_string(),
                keep.to_string(),
            ],
        )?;
        Ok(affected as u64)
    }

    // ---- schema fields ----

    /// Replaces the template's field set wholesale: prior entries are
    /// superseded (soft-deleted), never patched, since a re-imported layout
    /// may have shifted columns. One transaction.
    pub fn replace_schema_fields(&self, template_id: Uuid, fields: &[SchemaField]) -> Result<()> {
        let mut conn = self.conn.lock().expect("storage mutex poisoned");
        let tx = conn.transaction()?;
        replace_fields_in(&tx, template_id, fields)?;
        tx.execute(
            "UPDATE templates SET updated_at = ?1 WHERE id = ?2",
            params![Utc::now().to_rfc3339(), template_id.to_string()],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Installs a freshly parsed template in one transaction: the field set and
    /// the captured header styles land together, so a re-import can never leave
    /// schema and capture out of step.
    pub fn install_template_artifacts(
        &self,
        template_id: Uuid,
        fields: &[SchemaField],
        styles: &[StyleCell],
        merges: &[MergedRange],
    ) -> Result<()> {
        let mut conn = self.conn.lock().expect("storage mutex poisoned");
        let tx = conn.transaction()?;
        replace_fields_in(&tx, template_id, fields)?;
        replace_styles_in(&tx, template_id, styles, merges)?;
        tx.execute(
            "UPDATE templates SET updated_at = ?1 WHERE id = ?2",
            params![Utc::now().to_rfc3339(), template_id.to_string()],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// The template's live schema in column order.
    pub fn schema_fields(&self, template_id: Uuid) -> Result<Vec<SchemaField>> {
        let conn = self.conn.lock().expect("storage mutex poisoned");
        let mut stmt = conn.prepare(
            r#"
            SELECT id, template_id, label, column_letter, field_type, sort_order, storage_key
            FROM schema_fields
            WHERE template_id = ?1 AND deleted = 0
            ORDER BY sort_order
            "#,
        )?;

        let rows = stmt.query_map(params![template_id.to_string()], field_from_row)?;
        let mut fields = Vec::new();
        for field in rows {
            fields.push(field?);
        }
        Ok(fields)
    }

    // ---- captured template styles ----

    pub fn replace_template_styles(
        &self,
        template_id: Uuid,
        styles: &[StyleCell],
        merges: &[MergedRange],
    ) -> Result<()> {
        let mut conn = self.conn.lock().expect("storage mutex poisoned");
        let tx = conn.transaction()?;
        replace_styles_in(&tx, template_id, styles, merges)?;
        tx.commit()?;
        Ok(())
    }

    pub fn template_styles(&self, template_id: Uuid) -> Result<Vec<StyleCell>> {
        let conn = self.conn.lock().expect("storage mutex poisoned");
        let mut stmt = conn.prepare(
            r#"
            SELECT row, col, value, style FROM template_styles
            WHERE template_id = ?1
            ORDER BY row, col
            "#,
        )?;

        let rows = stmt.query_map(params![template_id.to_string()], |r| {
            Ok(StyleCell {
                row: r.get(0)?,
                col: r.get(1)?,
                value: r.get(2)?,
                style: r.get(3)?,
            })
        })?;

        let mut styles = Vec::new();
        for style in rows {
            styles.push(style?);
        }
        Ok(styles)
    }

    pub fn template_merges(&self, template_id: Uuid) -> Result<Vec<MergedRange>> {
        let conn = self.conn.lock().expect("storage mutex poisoned");
        let mut stmt = conn.prepare(
            r#"
            SELECT start_row, start_col, end_row, end_col FROM template_merges
            WHERE template_id = ?1
            ORDER BY start_row, start_col
            "#,
        )?;

        let rows = stmt.query_map(params![template_id.to_string()], |r| {
            Ok(MergedRange::new(
                CellRef::new(r.get(0)?, r.get(1)?),
                CellRef::new(r.get(2)?, r.get(3)?),
            ))
        })?;

        let mut merges = Vec::new();
        for merge in rows {
            merges.push(merge?);
        }
        Ok(merges)
    }

    // ---- required-field rules ----

    /// Inserts or updates a rule for `(template, field_name)`. Updating a
    /// soft-deleted rule resurrects it.
    pub fn upsert_rule(&self, rule: &RequiredFieldRule) -> Result<()> {
        let conn = self.conn.lock().expect("storage mutex poisoned");
        conn.execute(
            r#"
            INSERT INTO required_field_rules (
              id, template_id, field_name, required, message, scope, deleted, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7, ?8)
            ON CONFLICT(template_id, field_name) DO UPDATE SET
              required = excluded.required,
              message = excluded.message,
              scope = excluded.scope,
              deleted = 0,
              updated_at = excluded.updated_at
            "#,
            params![
                rule.id.to_string(),
                rule.template_id.to_string(),
                &rule.field_name,
                rule.required,
                rule.message.as_deref(),
                rule.scope.as_str(),
                rule.created_at.to_rfc3339(),
                rule.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Inserts rules that do not exist yet and leaves existing ones alone.
    /// Returns how many were inserted.
    pub fn seed_rules(&self, rules: &[RequiredFieldRule]) -> Result<u64> {
        let mut conn = self.conn.lock().expect("storage mutex poisoned");
        let tx = conn.transaction()?;
        let mut inserted = 0u64;
        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO required_field_rules (
                  id, template_id, field_name, required, message, scope, deleted, created_at, updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7, ?8)
                ON CONFLICT(template_id, field_name) DO NOTHING
                "#,
            )?;
            for rule in rules {
                inserted += stmt.execute(params![
                    rule.id.to_string(),
                    rule.template_id.to_string(),
                    &rule.field_name,
                    rule.required,
                    rule.message.as_deref(),
                    rule.scope.as_str(),
                    rule.created_at.to_rfc3339(),
                    rule.updated_at.to_rfc3339(),
                ])? as u64;
            }
        }
        tx.commit()?;
        Ok(inserted)
    }

    /// Replaces the template's rule set wholesale: every active rule is
    /// soft-deleted, then the given rules are written back (resurrecting
    /// rows that already existed for a field name). One transaction.
    pub fn replace_rules(&self, template_id: Uuid, rules: &[RequiredFieldRule]) -> Result<()> {
        let mut conn = self.conn.lock().expect("storage mutex poisoned");
        let tx = conn.transaction()?;
        tx.execute(
            r#"
            UPDATE required_field_rules
            SET deleted = 1, updated_at = ?1
            WHERE template_id = ?2 AND deleted = 0
            "#,
            params![Utc::now().to_rfc3339(), template_id.to_string()],
        )?;
        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO required_field_rules (
                  id, template_id, field_name, required, message, scope, deleted, created_at, updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7, ?8)
                ON CONFLICT(template_id, field_name) DO UPDATE SET
                  required = excluded.required,
                  message = excluded.message,
                  scope = excluded.scope,
                  deleted = 0,
                  updated_at = excluded.updated_at
                "#,
            )?;
            for rule in rules {
                stmt.execute(params![
                    rule.id.to_string(),
                    rule.template_id.to_string(),
                    &rule.field_name,
                    rule.required,
                    rule.message.as_deref(),
                    rule.scope.as_str(),
                    rule.created_at.to_rfc3339(),
                    rule.updated_at.to_rfc3339(),
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Soft-deletes a rule; returns whether an active rule was affected.
    pub fn soft_delete_rule(&self, template_id: Uuid, field_name: &str) -> Result<bool> {
        let conn = self.conn.lock().expect("storage mutex poisoned");
        let affected = conn.execute(
            r#"
            UPDATE required_field_rules
            SET deleted = 1, updated_at = ?1
            WHERE template_id = ?2 AND field_name = ?3 AND deleted = 0
            "#,
            params![
                Utc::now().to_rfc3339(),
                template_id.to_string(),
                field_name
            ],
        )?;
        Ok(affected > 0)
    }

    pub fn active_rules(&self, template_id: Uuid) -> Result<Vec<RequiredFieldRule>> {
        let conn = self.conn.lock().expect("storage mutex poisoned");
        let mut stmt = conn.prepare(
            r#"
            SELECT id, template_id, field_name, required, message, scope, created_at, updated_at
            FROM required_field_rules
            WHERE template_id = ?1 AND deleted = 0
            ORDER BY field_name
            "#,
        )?;

        let rows = stmt.query_map(params![template_id.to_string()], rule_from_row)?;
        let mut rules = Vec::new();
        for rule in rows {
            rules.push(rule?);
        }
        Ok(rules)
    }

    // ---- upload batches ----

    pub fn insert_batch(&self, batch: &UploadBatch) -> Result<()> {
        let conn = self.conn.lock().expect("storage mutex poisoned");
        conn.execute(
            r#"
            INSERT INTO upload_batches (
              id, upload_no, organization_id, principal_id, template_id,
              source_file, original_filename, total_rows, success_rows, failed_rows,
              status, error_message, replaced_records, superseded, started_at, completed_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
            "#,
            params![
                batch.id.to_string(),
                &batch.upload_no,
                batch.organization_id.to_string(),
                batch.principal_id.to_string(),
                batch.template_id.to_string(),
                batch.source_file.as_deref(),
                batch.original_filename.as_deref(),
                batch.total_rows,
                batch.success_rows,
                batch.failed_rows,
                batch.status.as_str(),
                batch.error_message.as_deref(),
                batch.replaced_records,
                batch.superseded,
                batch.started_at.to_rfc3339(),
                batch.completed_at.map(|dt| dt.to_rfc3339()),
            ],
        )?;
        Ok(())
    }

    pub fn get_batch(&self, id: Uuid) -> Result<UploadBatch> {
        let conn = self.conn.lock().expect("storage mutex poisoned");
        let row = conn
            .query_row(
                &format!("{BATCH_SELECT} WHERE id = ?1"),
                params![id.to_string()],
                batch_from_row,
            )
            .optional()?;

        row.ok_or(StorageError::BatchNotFound(id))
    }

    pub fn set_batch_status(&self, id: Uuid, status: BatchStatus) -> Result<()> {
        let conn = self.conn.lock().expect("storage mutex poisoned");
        conn.execute(
            "UPDATE upload_batches SET status = ?1 WHERE id = ?2",
            params![status.as_str(), id.to_string()],
        )?;
        Ok(())
    }

    pub fn set_batch_total_rows(&self, id: Uuid, total_rows: u32) -> Result<()> {
        let conn = self.conn.lock().expect("storage mutex poisoned");
        conn.execute(
            "UPDATE upload_batches SET total_rows = ?1 WHERE id = ?2",
            params![total_rows, id.to_string()],
        )?;
        Ok(())
    }

    pub fn set_batch_replaced_records(&self, id: Uuid, replaced_records: u32) -> Result<()> {
        let conn = self.conn.lock().expect("storage mutex poisoned");
        conn.execute(
            "UPDATE upload_batches SET replaced_records = ?1 WHERE id = ?2",
            params![replaced_records, id.to_string()],
        )?;
        Ok(())
    }

    /// Persists in-flight counters so progress survives a restart.
    pub fn update_batch_counters(&self, id: Uuid, success_rows: u32, failed_rows: u32) -> Result<()> {
        let conn = self.conn.lock().expect("storage mutex poisoned");
        conn.execute(
            "UPDATE upload_batches SET success_rows = ?1, failed_rows = ?2 WHERE id = ?3",
            params![success_rows, failed_rows, id.to_string()],
        )?;
        Ok(())
    }

    pub fn complete_batch(
        &self,
        id: Uuid,
        status: BatchStatus,
        success_rows: u32,
        failed_rows: u32,
        error_message: Option<&str>,
    ) -> Result<()> {
        let conn = self.conn.lock().expect("storage mutex poisoned");
        conn.execute(
            r#"
            UPDATE upload_batches
            SET status = ?1, success_rows = ?2, failed_rows = ?3,
                error_message = ?4, completed_at = ?5
            WHERE id = ?6
            "#,
            params![
                status.as_str(),
                success_rows,
                failed_rows,
                error_message,
                Utc::now().to_rfc3339(),
                id.to_string(),
            ],
        )?;
        Ok(())
    }

    /// Marks every earlier batch of the scope as superseded by `keep`.
    pub fn supersede_prior_batches(
        &self,
        organization_id: Uuid,
        principal_id: Uuid,
        template_id: Uuid,
        keep: Uuid,
    ) -> Result<u64> {
        let conn = self.conn.lock().expect("storage mutex poisoned");
        let affected = conn.execute(
            r#"
            UPDATE upload_batches
            SET superseded = 1
            WHERE organization_id = ?1 AND principal_id = ?2 AND template_id = ?3
              AND id != ?4 AND superseded = 0
            "#,
            params![
                organization_id.to_string(),
                principal_id.to_string(),
                template_id.to_string(),
                keep.to_string(),
            ],
        )?;
        Ok(affected as u64)
    }

    /// Upload history for a principal, newest first, across all templates
    /// they have uploaded against.
    pub fn list_batches(
        &self,
        organization_id: Uuid,
        principal_id: Uuid,
    ) -> Result<Vec<UploadBatch>> {
        let conn = self.conn.lock().expect("storage mutex poisoned");
        let mut stmt = conn.prepare(&format!(
            r#"
            {BATCH_SELECT}
            WHERE organization_id = ?1 AND principal_id = ?2
            ORDER BY started_at DESC, id DESC
            "#
        ))?;

        let rows = stmt.query_map(
            params![organization_id.to_string(), principal_id.to_string()],
            batch_from_row,
        )?;

        let mut batches = Vec::new();
        for batch in rows {
            batches.push(batch?);
        }
        Ok(batches)
    }

    // ---- records and field values ----

    /// Inserts a flush chunk: records plus their values, one transaction.
    pub fn insert_rows(&self, records: &[DataRecord], values: &[FieldValue]) -> Result<()> {
        if records.is_empty() && values.is_empty() {
            return Ok(());
        }

        let mut conn = self.conn.lock().expect("storage mutex poisoned");
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO data_records (
                  id, batch_id, template_id, organization_id, principal_id,
                  row_ordinal, is_latest, data_version, deleted
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                "#,
            )?;
            for record in records {
                stmt.execute(params![
                    record.id.to_string(),
                    record.batch_id.to_string(),
                    record.template_id.to_string(),
                    record.organization_id.to_string(),
                    record.principal_id.to_string(),
                    record.row_ordinal,
                    record.is_latest,
                    record.data_version,
                    record.deleted,
                ])?;
            }
        }
        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO field_values (
                  record_id, storage_key, value, is_empty, is_valid, validation_message, sort_order
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                "#,
            )?;
            for value in values {
                stmt.execute(params![
                    value.record_id.to_string(),
                    &value.storage_key,
                    &value.value,
                    value.is_empty,
                    value.is_valid,
                    value.validation_message.as_deref(),
                    value.sort_order,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Hard-deletes every record of the scope ahead of a re-upload, values
    /// first, in chunks of [`DELETE_CHUNK`] ids. Returns how many records
    /// went away. Each chunk commits on its own, so a concurrent reader may
    /// observe a partially cleared scope mid-replace.
    pub fn delete_existing_for(
        &self,
        organization_id: Uuid,
        principal_id: Uuid,
        template_id: Uuid,
    ) -> Result<u64> {
        let ids: Vec<String> = {
            let conn = self.conn.lock().expect("storage mutex poisoned");
            let mut stmt = conn.prepare(
                r#"
                SELECT id FROM data_records
                WHERE organization_id = ?1 AND principal_id = ?2 AND template_id = ?3
                "#,
            )?;
            let rows = stmt.query_map(
                params![
                    organization_id.to_string(),
                    principal_id.to_string(),
                    template_id.to_string()
                ],
                |r| r.get::<_, String>(0),
            )?;
            let mut ids = Vec::new();
            for id in rows {
                ids.push(id?);
            }
            ids
        };

        for chunk in ids.chunks(DELETE_CHUNK) {
            let mut conn = self.conn.lock().expect("storage mutex poisoned");
            let tx = conn.transaction()?;
            let placeholders = sql_placeholders(chunk.len());
            tx.execute(
                &format!("DELETE FROM field_values WHERE record_id IN ({placeholders})"),
                params_from_iter(chunk.iter()),
            )?;
            tx.execute(
                &format!("DELETE FROM data_records WHERE id IN ({placeholders})"),
                params_from_iter(chunk.iter()),
            )?;
            tx.commit()?;
        }

        Ok(ids.len() as u64)
    }

    /// The live snapshot of the scope: latest, non-deleted records in row
    /// order, each with its values sorted by field order.
    pub fn latest_records(
        &self,
        organization_id: Uuid,
        principal_id: Uuid,
        template_id: Uuid,
    ) -> Result<Vec<(DataRecord, Vec<FieldValue>)>> {
        let records = {
            let conn = self.conn.lock().expect("storage mutex poisoned");
            let mut stmt = conn.prepare(&format!(
                r#"
                {RECORD_SELECT}
                WHERE organization_id = ?1 AND principal_id = ?2 AND template_id = ?3
                  AND is_latest = 1 AND deleted = 0
                ORDER BY row_ordinal
                "#
            ))?;
            let rows = stmt.query_map(
                params![
                    organization_id.to_string(),
                    principal_id.to_string(),
                    template_id.to_string()
                ],
                record_from_row,
            )?;
            let mut records = Vec::new();
            for record in rows {
                records.push(record?);
            }
            records
        };

        self.attach_values(records)
    }

    /// The live snapshot across the whole organization, every principal's
    /// latest rows grouped together.
    pub fn latest_records_for_org(
        &self,
        organization_id: Uuid,
        template_id: Uuid,
    ) -> Result<Vec<(DataRecord, Vec<FieldValue>)>> {
        let records = {
            let conn = self.conn.lock().expect("storage mutex poisoned");
            let mut stmt = conn.prepare(&format!(
                r#"
                {RECORD_SELECT}
                WHERE organization_id = ?1 AND template_id = ?2
                  AND is_latest = 1 AND deleted = 0
                ORDER BY principal_id, row_ordinal
                "#
            ))?;
            let rows = stmt.query_map(
                params![organization_id.to_string(), template_id.to_string()],
                record_from_row,
            )?;
            let mut records = Vec::new();
            for record in rows {
                records.push(record?);
            }
            records
        };

        self.attach_values(records)
    }

    /// Records of a single batch in row order, with their values.
    pub fn records_by_batch(&self, batch_id: Uuid) -> Result<Vec<(DataRecord, Vec<FieldValue>)>> {
        let records = {
            let conn = self.conn.lock().expect("storage mutex poisoned");
            let mut stmt = conn.prepare(&format!(
                "{RECORD_SELECT} WHERE batch_id = ?1 ORDER BY row_ordinal"
            ))?;
            let rows = stmt.query_map(params![batch_id.to_string()], record_from_row)?;
            let mut records = Vec::new();
            for record in rows {
                records.push(record?);
            }
            records
        };

        self.attach_values(records)
    }

    /// Specific records with their values, in row-ordinal order. Unknown ids
    /// are silently absent from the result.
    pub fn records_by_ids(&self, ids: &[Uuid]) -> Result<Vec<(DataRecord, Vec<FieldValue>)>> {
        let mut records = Vec::new();
        {
            let conn = self.conn.lock().expect("storage mutex poisoned");
            let id_text: Vec<String> = ids.iter().map(Uuid::to_string).collect();
            for chunk in id_text.chunks(DELETE_CHUNK) {
                let placeholders = sql_placeholders(chunk.len());
                let mut stmt = conn.prepare(&format!(
                    "{RECORD_SELECT} WHERE id IN ({placeholders})"
                ))?;
                let rows = stmt.query_map(params_from_iter(chunk.iter()), record_from_row)?;
                for record in rows {
                    records.push(record?);
                }
            }
        }
        records.sort_by_key(|r| r.row_ordinal);

        self.attach_values(records)
    }

    fn attach_values(
        &self,
        records: Vec<DataRecord>,
    ) -> Result<Vec<(DataRecord, Vec<FieldValue>)>> {
        use std::collections::HashMap;

        let mut by_record: HashMap<Uuid, Vec<FieldValue>> = HashMap::new();
        let ids: Vec<String> = records.iter().map(|r| r.id.to_string()).collect();

        for chunk in ids.chunks(DELETE_CHUNK) {
            let conn = self.conn.lock().expect("storage mutex poisoned");
            let placeholders = sql_placeholders(chunk.len());
            let mut stmt = conn.prepare(&format!(
                r#"
                SELECT record_id, storage_key, value, is_empty, is_valid, validation_message, sort_order
                FROM field_values
                WHERE record_id IN ({placeholders})
                ORDER BY record_id, sort_order
                "#
            ))?;
            let rows = stmt.query_map(params_from_iter(chunk.iter()), value_from_row)?;
            for value in rows {
                let value = value?;
                by_record.entry(value.record_id).or_default().push(value);
            }
        }

        Ok(records
            .into_iter()
            .map(|record| {
                let values = by_record.remove(&record.id).unwrap_or_default();
                (record, values)
            })
            .collect())
    }
}

const BATCH_SELECT: &str = r#"
    SELECT id, upload_no, organization_id, principal_id, template_id,
           source_file, original_filename, total_rows, success_rows, failed_rows,
           status, error_message, replaced_records, superseded, started_at, completed_at
    FROM upload_batches
"#;

const RECORD_SELECT: &str = r#"
    SELECT id, batch_id, template_id, organization_id, principal_id,
           row_ordinal, is_latest, data_version, deleted
    FROM data_records
"#;

fn sql_placeholders(n: usize) -> String {
    let mut out = String::with_capacity(n * 2);
    for i in 0..n {
        if i > 0 {
            out.push(',');
        }
        out.push('?');
    }
    out
}

fn replace_fields_in(conn: &Connection, template_id: Uuid, fields: &[SchemaField]) -> Result<()> {
    conn.execute(
        "UPDATE schema_fields SET deleted = 1 WHERE template_id = ?1 AND deleted = 0",
        params![template_id.to_string()],
    )?;
    let mut stmt = conn.prepare(
        r#"
        INSERT INTO schema_fields (
          id, template_id, label, column_letter, field_type, sort_order, storage_key
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        "#,
    )?;
    for field in fields {
        stmt.execute(params![
            field.id.to_string(),
            field.template_id.to_string(),
            &field.label,
            &field.column_letter,
            field.field_type.as_str(),
            field.sort_order,
            &field.storage_key,
        ])?;
    }
    Ok(())
}

fn replace_styles_in(
    conn: &Connection,
    template_id: Uuid,
    styles: &[StyleCell],
    merges: &[MergedRange],
) -> Result<()> {
    conn.execute(
        "DELETE FROM template_styles WHERE template_id = ?1",
        params![template_id.to_string()],
    )?;
    conn.execute(
        "DELETE FROM template_merges WHERE template_id = ?1",
        params![template_id.to_string()],
    )?;
    {
        let mut stmt = conn.prepare(
            r#"
            INSERT INTO template_styles (template_id, row, col, value, style)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )?;
        for cell in styles {
            stmt.execute(params![
                template_id.to_string(),
                cell.row,
                cell.col,
                &cell.value,
                cell.style.clone(),
            ])?;
        }
    }
    let mut stmt = conn.prepare(
        r#"
        INSERT INTO template_merges (template_id, start_row, start_col, end_row, end_col)
        VALUES (?1, ?2, ?3, ?4, ?5)
        "#,
    )?;
    for merge in merges {
        stmt.execute(params![
            template_id.to_string(),
            merge.start.row,
            merge.start.col,
            merge.end.row,
            merge.end.col,
        ])?;
    }
    Ok(())
}

fn template_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<TemplateMeta> {
    let id: String = r.get(0)?;
    let organization_id: String = r.get(1)?;
    Ok(TemplateMeta {
        id: Uuid::parse_str(&id).map_err(|_| rusqlite::Error::InvalidQuery)?,
        organization_id: Uuid::parse_str(&organization_id)
            .map_err(|_| rusqlite::Error::InvalidQuery)?,
        name: r.get(2)?,
        original_filename: r.get(3)?,
        header_rows: r.get(4)?,
        data_start_row: r.get(5)?,
        created_at: timestamp_from_sql(r.get(6)?)?,
        updated_at: timestamp_from_sql(r.get(7)?)?,
    })
}

fn field_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<SchemaField> {
    let id: String = r.get(0)?;
    let template_id: String = r.get(1)?;
    let field_type: String = r.get(4)?;
    Ok(SchemaField {
        id: Uuid::parse_str(&id).map_err(|_| rusqlite::Error::InvalidQuery)?,
        template_id: Uuid::parse_str(&template_id).map_err(|_| rusqlite::Error::InvalidQuery)?,
        label: r.get(2)?,
        column_letter: r.get(3)?,
        field_type: FieldType::parse(&field_type).ok_or(rusqlite::Error::InvalidQuery)?,
        sort_order: r.get(5)?,
        storage_key: r.get(6)?,
    })
}

fn rule_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<RequiredFieldRule> {
    let id: String = r.get(0)?;
    let template_id: String = r.get(1)?;
    let scope: String = r.get(5)?;
    Ok(RequiredFieldRule {
        id: Uuid::parse_str(&id).map_err(|_| rusqlite::Error::InvalidQuery)?,
        template_id: Uuid::parse_str(&template_id).map_err(|_| rusqlite::Error::InvalidQuery)?,
        field_name: r.get(2)?,
        required: r.get(3)?,
        message: r.get(4)?,
        scope: RuleScope::parse(&scope).ok_or(rusqlite::Error::InvalidQuery)?,
        created_at: timestamp_from_sql(r.get(6)?)?,
        updated_at: timestamp_from_sql(r.get(7)?)?,
    })
}

fn batch_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<UploadBatch> {
    let id: String = r.get(0)?;
    let organization_id: String = r.get(2)?;
    let principal_id: String = r.get(3)?;
    let template_id: String = r.get(4)?;
    let status: String = r.get(10)?;
    let completed_at: Option<String> = r.get(15)?;
    Ok(UploadBatch {
        id: Uuid::parse_str(&id).map_err(|_| rusqlite::Error::InvalidQuery)?,
        upload_no: r.get(1)?,
        organization_id: Uuid::parse_str(&organization_id)
            .map_err(|_| rusqlite::Error::InvalidQuery)?,
        principal_id: Uuid::parse_str(&principal_id)
            .map_err(|_| rusqlite::Error::InvalidQuery)?,
        template_id: Uuid::parse_str(&template_id).map_err(|_| rusqlite::Error::InvalidQuery)?,
        source_file: r.get(5)?,
        original_filename: r.get(6)?,
        total_rows: r.get(7)?,
        success_rows: r.get(8)?,
        failed_rows: r.get(9)?,
        status: BatchStatus::parse(&status).ok_or(rusqlite::Error::InvalidQuery)?,
        error_message: r.get(11)?,
        replaced_records: r.get(12)?,
        superseded: r.get(13)?,
        started_at: timestamp_from_sql(r.get(14)?)?,
        completed_at: completed_at.map(timestamp_from_sql).transpose()?,
    })
}

fn record_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<DataRecord> {
    let id: String = r.get(0)?;
    let batch_id: String = r.get(1)?;
    let template_id: String = r.get(2)?;
    let organization_id: String = r.get(3)?;
    let principal_id: String = r.get(4)?;
    Ok(DataRecord {
        id: Uuid::parse_str(&id).map_err(|_| rusqlite::Error::InvalidQuery)?,
        batch_id: Uuid::parse_str(&batch_id).map_err(|_| rusqlite::Error::InvalidQuery)?,
        template_id: Uuid::parse_str(&template_id).map_err(|_| rusqlite::Error::InvalidQuery)?,
        organization_id: Uuid::parse_str(&organization_id)
            .map_err(|_| rusqlite::Error::InvalidQuery)?,
        principal_id: Uuid::parse_str(&principal_id)
            .map_err(|_| rusqlite::Error::InvalidQuery)?,
        row_ordinal: r.get(5)?,
        is_latest: r.get(6)?,
        data_version: r.get(7)?,
        deleted: r.get(8)?,
    })
}

fn value_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<FieldValue> {
    let record_id: String = r.get(0)?;
    Ok(FieldValue {
        record_id: Uuid::parse_str(&record_id).map_err(|_| rusqlite::Error::InvalidQuery)?,
        storage_key: r.get(1)?,
        value: r.get(2)?,
        is_empty: r.get(3)?,
        is_valid: r.get(4)?,
        validation_message: r.get(5)?,
        sort_order: r.get(6)?,
    })
}

fn timestamp_from_sql(raw: String) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| rusqlite::Error::InvalidQuery)
}

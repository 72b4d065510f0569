use rusqlite::Connection;

pub(crate) fn init(conn: &Connection) -> rusqlite::Result<()> {
    // Ensure foreign keys are enforced (disabled by default in SQLite).
    conn.pragma_update(None, "foreign_keys", "ON")?;

    conn.execute_batch(
        r#"
        -- Template catalog. One organization can hold many template rows;
        -- retired ones keep their deleted flag so old batches stay readable.
        CREATE TABLE IF NOT EXISTS templates (
          id TEXT PRIMARY KEY,
          organization_id TEXT NOT NULL,
          name TEXT NOT NULL,
          original_filename TEXT,
          header_rows INTEGER NOT NULL DEFAULT 4,
          data_start_row INTEGER NOT NULL DEFAULT 4,
          deleted INTEGER NOT NULL DEFAULT 0,
          created_at TEXT NOT NULL,
          updated_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_templates_org ON templates(organization_id);

        -- Schema entries are superseded wholesale on template re-parse,
        -- never patched; the unique key covers live entries only.
        CREATE TABLE IF NOT EXISTS schema_fields (
          id TEXT PRIMARY KEY,
          template_id TEXT NOT NULL REFERENCES templates(id),
          label TEXT NOT NULL,
          column_letter TEXT NOT NULL,
          field_type TEXT NOT NULL CHECK (field_type IN ('STRING','NUMBER','DATE','BOOLEAN')),
          sort_order INTEGER NOT NULL,
          storage_key TEXT NOT NULL,
          deleted INTEGER NOT NULL DEFAULT 0
        );

        CREATE INDEX IF NOT EXISTS idx_schema_fields_template ON schema_fields(template_id);
        CREATE UNIQUE INDEX IF NOT EXISTS idx_schema_fields_live_key
          ON schema_fields(template_id, storage_key) WHERE deleted = 0;

        -- Captured header cells (text + resolved style), replayed on export.
        CREATE TABLE IF NOT EXISTS template_styles (
          template_id TEXT NOT NULL REFERENCES templates(id),
          row INTEGER NOT NULL,
          col INTEGER NOT NULL,
          value TEXT NOT NULL DEFAULT '',
          style JSON NOT NULL,
          PRIMARY KEY (template_id, row, col)
        );

        CREATE TABLE IF NOT EXISTS template_merges (
          template_id TEXT NOT NULL REFERENCES templates(id),
          start_row INTEGER NOT NULL,
          start_col INTEGER NOT NULL,
          end_row INTEGER NOT NULL,
          end_col INTEGER NOT NULL,
          PRIMARY KEY (template_id, start_row, start_col)
        );

        CREATE TABLE IF NOT EXISTS required_field_rules (
          id TEXT PRIMARY KEY,
          template_id TEXT NOT NULL REFERENCES templates(id),
          field_name TEXT NOT NULL,
          required INTEGER NOT NULL DEFAULT 1,
          message TEXT,
          scope TEXT NOT NULL DEFAULT 'USER' CHECK (scope IN ('SYSTEM','USER')),
          deleted INTEGER NOT NULL DEFAULT 0,
          created_at TEXT NOT NULL,
          updated_at TEXT NOT NULL,
          UNIQUE (template_id, field_name)
        );

        CREATE TABLE IF NOT EXISTS upload_batches (
          id TEXT PRIMARY KEY,
          upload_no TEXT NOT NULL,
          organization_id TEXT NOT NULL,
          principal_id TEXT NOT NULL,
          template_id TEXT NOT NULL REFERENCES templates(id),
          source_file TEXT,
          original_filename TEXT,
          total_rows INTEGER NOT NULL DEFAULT 0,
          success_rows INTEGER NOT NULL DEFAULT 0,
          failed_rows INTEGER NOT NULL DEFAULT 0,
          status TEXT NOT NULL DEFAULT 'PENDING'
            CHECK (status IN ('PENDING','PROCESSING','SUCCESS','PARTIAL_SUCCESS','FAILED')),
          error_message TEXT,
          replaced_records INTEGER NOT NULL DEFAULT 0,
          superseded INTEGER NOT NULL DEFAULT 0,
          started_at TEXT NOT NULL,
          completed_at TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_batches_scope
          ON upload_batches(organization_id, principal_id, template_id);

        CREATE TABLE IF NOT EXISTS data_records (
          id TEXT PRIMARY KEY,
          batch_id TEXT NOT NULL REFERENCES upload_batches(id),
          template_id TEXT NOT NULL,
          organization_id TEXT NOT NULL,
          principal_id TEXT NOT NULL,
          row_ordinal INTEGER NOT NULL,
          is_latest INTEGER NOT NULL DEFAULT 1,
          data_version INTEGER NOT NULL DEFAULT 1,
          deleted INTEGER NOT NULL DEFAULT 0
        );

        CREATE INDEX IF NOT EXISTS idx_records_scope
          ON data_records(organization_id, principal_id, template_id);
        CREATE INDEX IF NOT EXISTS idx_records_batch ON data_records(batch_id);

        CREATE TABLE IF NOT EXISTS field_values (
          record_id TEXT NOT NULL REFERENCES data_records(id),
          storage_key TEXT NOT NULL,
          value TEXT,
          is_empty INTEGER NOT NULL DEFAULT 0,
          is_valid INTEGER NOT NULL DEFAULT 1,
          validation_message TEXT,
          sort_order INTEGER NOT NULL DEFAULT 0,
          PRIMARY KEY (record_id, storage_key)
        );
        "#,
    )?;

    // Best-effort migrations for databases that predate replace accounting
    // and configurable data start rows. SQLite only supports ADD COLUMN, so
    // missing columns are added opportunistically on open.
    ensure_template_columns(conn)?;
    ensure_batch_columns(conn)?;

    Ok(())
}

fn ensure_template_columns(conn: &Connection) -> rusqlite::Result<()> {
    let existing = table_columns(conn, "templates")?;
    if !existing.contains("data_start_row") {
        conn.execute(
            "ALTER TABLE templates ADD COLUMN data_start_row INTEGER NOT NULL DEFAULT 4",
            [],
        )?;
    }
    Ok(())
}

fn ensure_batch_columns(conn: &Connection) -> rusqlite::Result<()> {
    let existing = table_columns(conn, "upload_batches")?;
    if !existing.contains("replaced_records") {
        conn.execute(
            "ALTER TABLE upload_batches ADD COLUMN replaced_records INTEGER NOT NULL DEFAULT 0",
            [],
        )?;
    }
    if !existing.contains("superseded") {
        conn.execute(
            "ALTER TABLE upload_batches ADD COLUMN superseded INTEGER NOT NULL DEFAULT 0",
            [],
        )?;
    }
    Ok(())
}

fn table_columns(
    conn: &Connection,
    table: &str,
) -> rusqlite::Result<std::collections::HashSet<String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(1))?;
    let mut existing = std::collections::HashSet::new();
    for name in rows {
        existing.insert(name?);
    }
    Ok(existing)
}

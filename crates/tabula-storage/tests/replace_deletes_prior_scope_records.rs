use chrono::Utc;
use tabula_model::{BatchStatus, DataRecord, FieldValue, UploadBatch};
use tabula_storage::Storage;
use uuid::Uuid;

struct Scope {
    org: Uuid,
    principal: Uuid,
    template: Uuid,
}

fn scope(storage: &Storage) -> Scope {
    let org = Uuid::new_v4();
    let template = storage
        .create_template(org, "T", None, 4, 4)
        .expect("create template");
    Scope {
        org,
        principal: Uuid::new_v4(),
        template: template.id,
    }
}

fn insert_batch_for(storage: &Storage, scope: &Scope) -> Uuid {
    let batch = UploadBatch {
        id: Uuid::new_v4(),
        upload_no: "UPLOAD_20240101_120000_001".to_string(),
        organization_id: scope.org,
        principal_id: scope.principal,
        template_id: scope.template,
        source_file: None,
        original_filename: None,
        total_rows: 0,
        success_rows: 0,
        failed_rows: 0,
        status: BatchStatus::Pending,
        error_message: None,
        replaced_records: 0,
        superseded: false,
        started_at: Utc::now(),
        completed_at: None,
    };
    storage.insert_batch(&batch).expect("insert batch");
    batch.id
}

fn record(batch_id: Uuid, scope: &Scope, row_ordinal: u32) -> DataRecord {
    DataRecord {
        id: Uuid::new_v4(),
        batch_id,
        template_id: scope.template,
        organization_id: scope.org,
        principal_id: scope.principal,
        row_ordinal,
        is_latest: true,
        data_version: 1,
        deleted: false,
    }
}

#[test]
fn rows_read_back_in_row_and_field_order() {
    let storage = Storage::open_in_memory().expect("open storage");
    let sc = scope(&storage);
    let batch_id = insert_batch_for(&storage, &sc);

    // Insert out of row order; reads must come back sorted.
    let r2 = record(batch_id, &sc, 2);
    let r1 = record(batch_id, &sc, 1);
    let values = vec![
        FieldValue::intact(r2.id, "qty_B", "7", 1),
        FieldValue::intact(r2.id, "supplier_A", "ACME", 0),
        FieldValue::intact(r1.id, "supplier_A", "Globex", 0),
        FieldValue::intact(r1.id, "qty_B", "", 1).invalidate("'qty' is required"),
    ];
    storage
        .insert_rows(&[r2.clone(), r1.clone()], &values)
        .expect("insert rows");

    let rows = storage
        .latest_records(sc.org, sc.principal, sc.template)
        .expect("latest records");
    assert_eq!(rows.len(), 2);

    let (first, first_values) = &rows[0];
    assert_eq!(first.id, r1.id);
    assert_eq!(first.row_ordinal, 1);
    assert_eq!(first_values.len(), 2);
    assert_eq!(first_values[0].storage_key, "supplier_A");
    assert_eq!(first_values[1].storage_key, "qty_B");
    assert!(first_values[1].is_empty);
    assert!(!first_values[1].is_valid);
    assert_eq!(
        first_values[1].validation_message.as_deref(),
        Some("'qty' is required")
    );

    let (second, second_values) = &rows[1];
    assert_eq!(second.row_ordinal, 2);
    assert_eq!(second_values[0].value, "ACME");
    assert_eq!(second_values[1].value, "7");

    let by_batch = storage.records_by_batch(batch_id).expect("records by batch");
    assert_eq!(by_batch.len(), 2);
    assert_eq!(by_batch[0].0.row_ordinal, 1);

    // Lookup by explicit ids; unknown ids are skipped, order is by ordinal.
    let by_ids = storage
        .records_by_ids(&[r2.id, Uuid::new_v4(), r1.id])
        .expect("records by ids");
    assert_eq!(by_ids.len(), 2);
    assert_eq!(by_ids[0].0.id, r1.id);
    assert_eq!(by_ids[1].0.id, r2.id);
    assert_eq!(by_ids[1].1.len(), 2);
}

#[test]
fn soft_deleted_and_superseded_rows_are_not_latest() {
    let storage = Storage::open_in_memory().expect("open storage");
    let sc = scope(&storage);
    let batch_id = insert_batch_for(&storage, &sc);

    let live = record(batch_id, &sc, 1);
    let mut gone = record(batch_id, &sc, 2);
    gone.deleted = true;
    let mut old = record(batch_id, &sc, 3);
    old.is_latest = false;

    storage
        .insert_rows(&[live.clone(), gone, old], &[])
        .expect("insert rows");

    let rows = storage
        .latest_records(sc.org, sc.principal, sc.template)
        .expect("latest records");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].0.id, live.id);

    // The batch view still sees all three.
    assert_eq!(
        storage.records_by_batch(batch_id).expect("by batch").len(),
        3
    );
}

#[test]
fn replace_deletes_more_records_than_one_chunk_holds() {
    let storage = Storage::open_in_memory().expect("open storage");
    let sc = scope(&storage);
    let batch_id = insert_batch_for(&storage, &sc);

    // 1203 records spans three delete chunks of 500 ids.
    let mut records = Vec::new();
    let mut values = Vec::new();
    for ordinal in 1..=1203u32 {
        let r = record(batch_id, &sc, ordinal);
        values.push(FieldValue::intact(r.id, "supplier_A", "ACME", 0));
        values.push(FieldValue::intact(r.id, "qty_B", ordinal.to_string(), 1));
        records.push(r);
    }
    storage.insert_rows(&records, &values).expect("insert rows");
    assert_eq!(
        storage
            .latest_records(sc.org, sc.principal, sc.template)
            .expect("before replace")
            .len(),
        1203
    );

    let removed = storage
        .delete_existing_for(sc.org, sc.principal, sc.template)
        .expect("delete scope");
    assert_eq!(removed, 1203);

    assert!(storage
        .latest_records(sc.org, sc.principal, sc.template)
        .expect("after replace")
        .is_empty());
    assert!(storage
        .records_by_batch(batch_id)
        .expect("batch after replace")
        .is_empty());
}

#[test]
fn replace_leaves_other_principals_alone() {
    let storage = Storage::open_in_memory().expect("open storage");
    let sc = scope(&storage);
    let batch_id = insert_batch_for(&storage, &sc);
    storage
        .insert_rows(&[record(batch_id, &sc, 1)], &[])
        .expect("insert mine");

    let other = Scope {
        org: sc.org,
        principal: Uuid::new_v4(),
        template: sc.template,
    };
    let other_batch = insert_batch_for(&storage, &other);
    storage
        .insert_rows(&[record(other_batch, &other, 1)], &[])
        .expect("insert theirs");

    let removed = storage
        .delete_existing_for(sc.org, sc.principal, sc.template)
        .expect("delete scope");
    assert_eq!(removed, 1);

    assert_eq!(
        storage
            .latest_records(other.org, other.principal, other.template)
            .expect("other principal rows")
            .len(),
        1
    );
}

#[test]
fn org_wide_snapshot_spans_principals() {
    let storage = Storage::open_in_memory().expect("open storage");
    let sc = scope(&storage);
    let batch_id = insert_batch_for(&storage, &sc);
    storage
        .insert_rows(
            &[record(batch_id, &sc, 1), record(batch_id, &sc, 2)],
            &[],
        )
        .expect("insert mine");

    let other = Scope {
        org: sc.org,
        principal: Uuid::new_v4(),
        template: sc.template,
    };
    let other_batch = insert_batch_for(&storage, &other);
    let mut stale = record(other_batch, &other, 2);
    stale.is_latest = false;
    storage
        .insert_rows(&[record(other_batch, &other, 1), stale], &[])
        .expect("insert theirs");

    let rows = storage
        .latest_records_for_org(sc.org, sc.template)
        .expect("org snapshot");
    assert_eq!(rows.len(), 3);
    // Grouped per principal, row order inside each group.
    let principals: Vec<Uuid> = rows.iter().map(|(r, _)| r.principal_id).collect();
    let mut sorted = principals.clone();
    sorted.sort();
    assert_eq!(principals, sorted);
    for pair in rows.windows(2) {
        if pair[0].0.principal_id == pair[1].0.principal_id {
            assert!(pair[0].0.row_ordinal < pair[1].0.row_ordinal);
        }
    }
}

#[test]
fn deleting_an_empty_scope_is_a_no_op() {
    let storage = Storage::open_in_memory().expect("open storage");
    let sc = scope(&storage);
    let removed = storage
        .delete_existing_for(sc.org, sc.principal, sc.template)
        .expect("delete nothing");
    assert_eq!(removed, 0);
}

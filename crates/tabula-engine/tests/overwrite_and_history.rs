use std::time::Duration;

use uuid::Uuid;

use tabula_engine::{
    EngineConfig, IngestRequest, IngestSource, TabulaEngine, TemplateOptions, ValidationMode,
};
use tabula_model::{BatchStatus, ProgressSnapshot};
use tabula_storage::Storage;
use tabula_xlsx::SheetWriter;

fn engine() -> (TabulaEngine, Storage) {
    let storage = Storage::open_in_memory().expect("open storage");
    (
        TabulaEngine::new(storage.clone(), EngineConfig::default()),
        storage,
    )
}

fn template_file() -> Vec<u8> {
    let mut writer = SheetWriter::new("Template");
    writer.set_text(0, 0, "Supplier");
    writer.set_text(0, 1, "Quantity");
    writer.finish().expect("template bytes")
}

fn data_file(prefix: &str, rows: u32) -> Vec<u8> {
    let mut writer = SheetWriter::new("Data");
    writer.set_text(0, 0, "Supplier");
    writer.set_text(0, 1, "Quantity");
    for i in 1..=rows {
        writer.set_text(i, 0, format!("{prefix}{i}"));
        writer.set_text(i, 1, i.to_string());
    }
    writer.finish().expect("data bytes")
}

fn import(engine: &TabulaEngine, org: Uuid) -> Uuid {
    engine
        .import_template(
            &template_file(),
            org,
            "Deliveries",
            TemplateOptions {
                header_rows: 1,
                ..TemplateOptions::default()
            },
        )
        .expect("import template")
}

fn request(template: Uuid, org: Uuid, principal: Uuid, replace: bool) -> IngestRequest {
    IngestRequest {
        template_id: template,
        organization_id: org,
        principal_id: principal,
        mode: ValidationMode::Off,
        replace_existing: replace,
        original_filename: None,
    }
}

async fn ingest_and_wait(
    engine: &TabulaEngine,
    bytes: Vec<u8>,
    request: IngestRequest,
) -> (Uuid, ProgressSnapshot) {
    let handle = engine
        .ingest(IngestSource::Bytes(bytes), request)
        .expect("ingest starts");
    for _ in 0..500 {
        let snapshot = engine.progress(handle.batch_id).expect("progress poll");
        if snapshot.status.is_terminal() {
            return (handle.batch_id, snapshot);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("batch {} never reached a terminal status", handle.batch_id);
}

#[tokio::test]
async fn reupload_replaces_the_principals_prior_data() {
    let (engine, storage) = engine();
    let org = Uuid::new_v4();
    let principal = Uuid::new_v4();
    let template = import(&engine, org);

    let (first, _) = ingest_and_wait(
        &engine,
        data_file("A", 5),
        request(template, org, principal, true),
    )
    .await;
    assert_eq!(
        storage
            .latest_records(org, principal, template)
            .expect("records")
            .len(),
        5
    );

    let (second, snapshot) = ingest_and_wait(
        &engine,
        data_file("B", 3),
        request(template, org, principal, true),
    )
    .await;
    assert_eq!(snapshot.status, BatchStatus::Success);

    let stored = storage
        .latest_records(org, principal, template)
        .expect("records");
    assert_eq!(stored.len(), 3);
    assert!(stored.iter().all(|(record, _)| record.batch_id == second));
    let suppliers: Vec<&str> = stored
        .iter()
        .map(|(_, values)| values[0].value.as_str())
        .collect();
    assert_eq!(suppliers, ["B1", "B2", "B3"]);

    let replacer = storage.get_batch(second).expect("second batch");
    assert_eq!(replacer.replaced_records, 5);
    assert!(!replacer.superseded);

    let replaced = storage.get_batch(first).expect("first batch");
    assert!(replaced.superseded);
    assert_eq!(replaced.status, BatchStatus::Success, "history keeps the outcome");
}

#[tokio::test]
async fn first_upload_replaces_nothing() {
    let (engine, storage) = engine();
    let org = Uuid::new_v4();
    let principal = Uuid::new_v4();
    let template = import(&engine, org);

    let (batch, _) = ingest_and_wait(
        &engine,
        data_file("A", 2),
        request(template, org, principal, true),
    )
    .await;
    assert_eq!(storage.get_batch(batch).expect("batch").replaced_records, 0);
}

#[tokio::test]
async fn append_mode_keeps_the_prior_batch() {
    let (engine, storage) = engine();
    let org = Uuid::new_v4();
    let principal = Uuid::new_v4();
    let template = import(&engine, org);

    let (first, _) = ingest_and_wait(
        &engine,
        data_file("A", 5),
        request(template, org, principal, false),
    )
    .await;
    let (second, _) = ingest_and_wait(
        &engine,
        data_file("C", 3),
        request(template, org, principal, false),
    )
    .await;

    let stored = storage
        .latest_records(org, principal, template)
        .expect("records");
    assert_eq!(stored.len(), 8);
    let from_first = stored.iter().filter(|(r, _)| r.batch_id == first).count();
    let from_second = stored.iter().filter(|(r, _)| r.batch_id == second).count();
    assert_eq!((from_first, from_second), (5, 3));

    let untouched = storage.get_batch(first).expect("first batch");
    assert!(!untouched.superseded);
    assert_eq!(storage.get_batch(second).expect("second").replaced_records, 0);
}

#[tokio::test]
async fn history_lists_newest_first() {
    let (engine, _) = engine();
    let org = Uuid::new_v4();
    let principal = Uuid::new_v4();
    let template = import(&engine, org);

    let (first, _) = ingest_and_wait(
        &engine,
        data_file("A", 2),
        request(template, org, principal, true),
    )
    .await;
    let (second, _) = ingest_and_wait(
        &engine,
        data_file("B", 2),
        request(template, org, principal, true),
    )
    .await;

    let history = engine.list_batches(org, principal).expect("history");
    let ids: Vec<Uuid> = history.iter().map(|b| b.id).collect();
    assert_eq!(ids, [second, first]);
    assert!(history.iter().all(|b| b.status == BatchStatus::Success));
    assert!(history[0].completed_at >= history[1].completed_at);
}

#[tokio::test]
async fn replacement_is_scoped_to_the_uploading_principal() {
    let (engine, storage) = engine();
    let org = Uuid::new_v4();
    let alice = Uuid::new_v4();
    let bob = Uuid::new_v4();
    let template = import(&engine, org);

    ingest_and_wait(
        &engine,
        data_file("A", 4),
        request(template, org, alice, true),
    )
    .await;
    let (bobs, _) = ingest_and_wait(&engine, data_file("B", 2), request(template, org, bob, true)).await;

    // Bob's replace touched only Bob's (empty) scope.
    assert_eq!(storage.get_batch(bobs).expect("batch").replaced_records, 0);
    assert_eq!(
        storage
            .latest_records(org, alice, template)
            .expect("alice records")
            .len(),
        4
    );
    assert_eq!(
        storage
            .latest_records(org, bob, template)
            .expect("bob records")
            .len(),
        2
    );
}

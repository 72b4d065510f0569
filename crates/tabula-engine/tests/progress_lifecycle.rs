use std::time::Duration;

use uuid::Uuid;

use tabula_engine::{
    EngineConfig, EngineError, IngestRequest, IngestSource, ProgressConfig, TabulaEngine,
    TemplateOptions, ValidationMode,
};
use tabula_model::{BatchStatus, ProgressSnapshot};
use tabula_storage::{Storage, StorageError};
use tabula_xlsx::SheetWriter;

fn template_file() -> Vec<u8> {
    let mut writer = SheetWriter::new("Template");
    writer.set_text(0, 0, "Supplier");
    writer.finish().expect("template bytes")
}

fn data_file(rows: u32) -> Vec<u8> {
    let mut writer = SheetWriter::new("Data");
    writer.set_text(0, 0, "Supplier");
    for i in 1..=rows {
        writer.set_text(i, 0, format!("Supplier {i}"));
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

fn request(template: Uuid, org: Uuid, principal: Uuid) -> IngestRequest {
    IngestRequest {
        template_id: template,
        organization_id: org,
        principal_id: principal,
        mode: ValidationMode::Off,
        replace_existing: false,
        original_filename: None,
    }
}

async fn wait_terminal(engine: &TabulaEngine, batch_id: Uuid) -> ProgressSnapshot {
    for _ in 0..500 {
        let snapshot = engine.progress(batch_id).expect("progress poll");
        if snapshot.status.is_terminal() {
            return snapshot;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("batch {batch_id} never reached a terminal status");
}

#[tokio::test]
async fn terminal_snapshots_are_served_from_memory() {
    let storage = Storage::open_in_memory().expect("open storage");
    let engine = TabulaEngine::new(storage.clone(), EngineConfig::default());
    let org = Uuid::new_v4();
    let principal = Uuid::new_v4();
    let template = import(&engine, org);

    let handle = engine
        .ingest(
            IngestSource::Bytes(data_file(7)),
            request(template, org, principal),
        )
        .expect("ingest starts");
    let snapshot = wait_terminal(&engine, handle.batch_id).await;

    assert_eq!(snapshot.status, BatchStatus::Success);
    assert_eq!(snapshot.total_rows, 7);
    assert_eq!(snapshot.processed_rows, 7);
    assert_eq!(snapshot.percentage, 100);
    assert_eq!(snapshot.message, None);

    // Default TTL keeps the entry around for repeat polls.
    let cached = engine
        .progress_store()
        .get(handle.batch_id)
        .expect("cached snapshot");
    assert_eq!(cached, snapshot);
}

#[tokio::test]
async fn evicted_snapshots_fall_back_to_the_batch_row() {
    let storage = Storage::open_in_memory().expect("open storage");
    let config = EngineConfig {
        progress: ProgressConfig {
            ttl: Duration::ZERO,
        },
        ..EngineConfig::default()
    };
    let engine = TabulaEngine::new(storage.clone(), config);
    let org = Uuid::new_v4();
    let principal = Uuid::new_v4();
    let template = import(&engine, org);

    let handle = engine
        .ingest(
            IngestSource::Bytes(data_file(3)),
            request(template, org, principal),
        )
        .expect("ingest starts");
    let snapshot = wait_terminal(&engine, handle.batch_id).await;
    assert_eq!(snapshot.status, BatchStatus::Success);

    // A zero TTL evicts the entry the moment the batch completes.
    assert_eq!(engine.progress_store().get(handle.batch_id), None);

    let served = engine.progress(handle.batch_id).expect("fallback");
    let batch = storage.get_batch(handle.batch_id).expect("batch row");
    assert_eq!(served, ProgressSnapshot::from_batch(&batch));
    assert_eq!(served.percentage, 100);
    assert_eq!(served.success_rows, 3);
}

#[tokio::test]
async fn unknown_batches_are_an_error() {
    let storage = Storage::open_in_memory().expect("open storage");
    let engine = TabulaEngine::new(storage, EngineConfig::default());

    let missing = Uuid::new_v4();
    let err = engine.progress(missing).expect_err("nothing to report");
    assert!(matches!(
        err,
        EngineError::Storage(StorageError::BatchNotFound(id)) if id == missing
    ));
}

#[tokio::test]
async fn tiny_flush_intervals_still_complete() {
    let storage = Storage::open_in_memory().expect("open storage");
    let config = EngineConfig {
        flush_every: 0,
        ..EngineConfig::default()
    };
    let engine = TabulaEngine::new(storage.clone(), config);
    let org = Uuid::new_v4();
    let principal = Uuid::new_v4();
    let template = import(&engine, org);

    let handle = engine
        .ingest(
            IngestSource::Bytes(data_file(5)),
            request(template, org, principal),
        )
        .expect("ingest starts");
    let snapshot = wait_terminal(&engine, handle.batch_id).await;

    assert_eq!(snapshot.status, BatchStatus::Success);
    assert_eq!(snapshot.success_rows, 5);
    assert_eq!(
        storage
            .latest_records(org, principal, template)
            .expect("records")
            .len(),
        5
    );
}

use uuid::Uuid;

use tabula_engine::{EngineConfig, EngineError, TabulaEngine, TemplateOptions};
use tabula_model::{CellRef, FieldType, MergedRange};
use tabula_storage::Storage;
use tabula_xlsx::SheetWriter;

fn engine() -> (TabulaEngine, Storage) {
    let storage = Storage::open_in_memory().expect("open storage");
    (
        TabulaEngine::new(storage.clone(), EngineConfig::default()),
        storage,
    )
}

/// Two-row band: a merged title over everything, labels underneath.
/// Column D carries no label anywhere and column E only a title-row one.
fn template_file() -> Vec<u8> {
    let mut writer = SheetWriter::new("Template");
    writer.set_text(0, 0, "Delivery Plan");
    writer.merge(MergedRange::new(CellRef::new(0, 0), CellRef::new(0, 3)));
    writer.set_text(0, 4, "Remarks");
    writer.set_text(1, 0, "Supplier Name");
    writer.set_text(1, 1, "Quantity");
    writer.set_text(1, 2, "Delivery\nDate");
    writer.set_text(1, 3, " ");
    writer.finish().expect("template bytes")
}

fn options() -> TemplateOptions {
    TemplateOptions {
        header_rows: 2,
        ..TemplateOptions::default()
    }
}

#[test]
fn import_discovers_the_full_schema() {
    let (engine, _) = engine();
    let org = Uuid::new_v4();

    let template = engine
        .import_template(&template_file(), org, "Delivery Plan", options())
        .expect("import");
    let schema = engine.load_schema(template).expect("schema");

    assert_eq!(schema.header_rows, 2);
    assert_eq!(schema.data_start_row, 2, "data follows the band by default");
    assert_eq!(schema.len(), 5);

    let labels: Vec<&str> = schema.fields.iter().map(|f| f.label.as_str()).collect();
    assert_eq!(
        labels,
        [
            "Supplier Name",
            "Quantity",
            "Delivery Date",
            "field_4",
            "Remarks"
        ],
        "newlines collapse, blanks synthesize, title-row text fills in"
    );

    let keys: Vec<&str> = schema.fields.iter().map(|f| f.storage_key.as_str()).collect();
    assert_eq!(
        keys,
        [
            "Supplier Name_A",
            "Quantity_B",
            "Delivery Date_C",
            "field_4_D",
            "Remarks_E"
        ]
    );

    assert_eq!(schema.fields[1].field_type, FieldType::Number);
    assert_eq!(schema.fields[2].field_type, FieldType::Date);
    let orders: Vec<u32> = schema.fields.iter().map(|f| f.sort_order).collect();
    assert_eq!(orders, [0, 1, 2, 3, 4]);
}

#[test]
fn duplicate_labels_stay_distinct_by_column() {
    let (engine, _) = engine();
    let mut writer = SheetWriter::new("Template");
    writer.set_text(0, 0, "Unit");
    writer.set_text(0, 1, "Price");
    writer.set_text(0, 2, "Unit");
    let bytes = writer.finish().expect("template bytes");

    let template = engine
        .import_template(
            &bytes,
            Uuid::new_v4(),
            "Units",
            TemplateOptions {
                header_rows: 1,
                ..TemplateOptions::default()
            },
        )
        .expect("import");
    let schema = engine.load_schema(template).expect("schema");

    let keys: Vec<&str> = schema.fields.iter().map(|f| f.storage_key.as_str()).collect();
    assert_eq!(keys, ["Unit_A", "Price_B", "Unit_C"]);
    assert_eq!(
        schema.field_by_storage_key("Unit_C").expect("third column").label,
        "Unit"
    );
}

#[test]
fn reimport_retires_the_prior_template() {
    let (engine, _) = engine();
    let org = Uuid::new_v4();

    let first = engine
        .import_template(&template_file(), org, "Delivery Plan", options())
        .expect("first import");
    let second = engine
        .import_template(&template_file(), org, "Delivery Plan v2", options())
        .expect("second import");
    assert_ne!(first, second);

    let current = engine
        .latest_template(org)
        .expect("lookup")
        .expect("org has a template");
    assert_eq!(current.id, second);
    assert_eq!(current.name, "Delivery Plan v2");

    // The retired template still resolves by id for its historical data.
    let old_schema = engine.load_schema(first).expect("old schema");
    let new_schema = engine.load_schema(second).expect("new schema");
    let old_labels: Vec<&str> = old_schema.fields.iter().map(|f| f.label.as_str()).collect();
    let new_labels: Vec<&str> = new_schema.fields.iter().map(|f| f.label.as_str()).collect();
    assert_eq!(old_labels, new_labels, "re-extraction is repeatable");
}

#[test]
fn import_captures_the_header_band() {
    let (engine, storage) = engine();
    let org = Uuid::new_v4();

    let template = engine
        .import_template(&template_file(), org, "Delivery Plan", options())
        .expect("import");

    let styles = storage.template_styles(template).expect("styles");
    assert!(
        styles.iter().any(|cell| cell.value == "Delivery Plan"),
        "title text is part of the capture"
    );
    assert!(styles.iter().any(|cell| cell.value == "Supplier Name"));
    let merges = storage.template_merges(template).expect("merges");
    assert_eq!(merges.len(), 1);
    assert_eq!(merges[0].end.col, 3);
}

#[test]
fn empty_template_has_no_usable_schema() {
    let (engine, _) = engine();
    let bytes = SheetWriter::new("Blank").finish().expect("empty workbook");

    let template = engine
        .import_template(&bytes, Uuid::new_v4(), "Blank", options())
        .expect("import succeeds");

    let err = engine.load_schema(template).expect_err("no schema to load");
    assert!(matches!(err, EngineError::SchemaNotFound(id) if id == template));
}

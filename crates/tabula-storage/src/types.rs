use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A stored template: one organization's discovered schema carrier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateMeta {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub name: String,
    pub original_filename: Option<String>,
    /// Number of header rows; data starts at `data_start_row` (0-based).
    pub header_rows: u32,
    pub data_start_row: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One captured header cell: its text plus its resolved style as opaque
/// JSON. The JSON shape belongs to the xlsx layer; storage round-trips it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StyleCell {
    pub row: u32,
    pub col: u32,
    pub value: String,
    pub style: serde_json::Value,
}

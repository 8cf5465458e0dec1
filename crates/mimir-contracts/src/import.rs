// Import DTOs (registered tabular datasets)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// A registered tabular dataset.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Import {
    pub id: Uuid,
    pub name: String,
    pub row_count: i64,
    pub columns: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// Request to register a dataset.
///
/// Rows are string-keyed JSON objects; the upload/multipart surface that
/// produces them lives outside the engine.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreateImportRequest {
    pub name: String,
    pub columns: Vec<String>,
    pub rows: Vec<serde_json::Value>,
}

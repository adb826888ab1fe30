use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

/// A stored workbook, content-addressed so re-parsing after lease recovery
/// reads exactly the bytes the submission carried.
#[derive(Debug, Clone, FromRow)]
pub struct WorkbookUpload {
    pub id: Uuid,
    pub filename: String,
    pub content: Vec<u8>,
    pub content_hash: String,
    pub sheet_count: i32,
    pub created_at: DateTime<Utc>,
}

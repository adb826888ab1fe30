use sqlx::PgPool;
use uuid::Uuid;

use crate::models::WorkbookUpload;

const UPLOAD_COLUMNS: &str = "id, filename, content, content_hash, sheet_count, created_at";

pub async fn insert(
    pool: &PgPool,
    filename: &str,
    content: &[u8],
    content_hash: &str,
    sheet_count: i32,
) -> Result<WorkbookUpload, sqlx::Error> {
    let sql = format!(
        "INSERT INTO workbook_uploads (id, filename, content, content_hash, sheet_count)
         VALUES ($1, $2, $3, $4, $5)
         RETURNING {UPLOAD_COLUMNS}"
    );
    sqlx::query_as::<_, WorkbookUpload>(&sql)
        .bind(Uuid::new_v4())
        .bind(filename)
        .bind(content)
        .bind(content_hash)
        .bind(sheet_count)
        .fetch_one(pool)
        .await
}

pub async fn get(pool: &PgPool, id: Uuid) -> Result<Option<WorkbookUpload>, sqlx::Error> {
    let sql = format!("SELECT {UPLOAD_COLUMNS} FROM workbook_uploads WHERE id = $1");
    sqlx::query_as::<_, WorkbookUpload>(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await
}

use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use tracing::info;

use crate::db::upload_queries;
use crate::errors::AppError;
use crate::jobs::workbook_ingest_job::{
    parse_sheet, IngestSummary, ParseMethod, SheetError, WorkbookIngestPayload,
};
use crate::models::response::ApiEnvelope;
use crate::models::{JobKind, SubmitJob};
use crate::routes::JobSubmitted;
use crate::services::portfolio_service;
use crate::services::workbook::{content_hash, sheet_identity, WorkbookDecoder};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/upload/excel", post(upload_excel_sync))
        .route("/jobs/upload-excel-async", post(upload_excel_async))
}

struct UploadForm {
    filename: String,
    bytes: Vec<u8>,
    parse_method: ParseMethod,
    pin_parser: bool,
    callback_url: Option<String>,
    user_id: Option<String>,
}

async fn read_upload_form(mut multipart: Multipart) -> Result<UploadForm, AppError> {
    let mut filename = "workbook".to_string();
    let mut bytes: Option<Vec<u8>> = None;
    let mut parse_method = ParseMethod::default();
    let mut pin_parser = false;
    let mut callback_url = None;
    let mut user_id = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Validation(format!("malformed multipart body: {e}")))?
    {
        match field.name().unwrap_or_default() {
            "file" => {
                if let Some(name) = field.file_name() {
                    filename = name.to_string();
                }
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::Validation(format!("unreadable file field: {e}")))?;
                bytes = Some(data.to_vec());
            }
            "parse_method" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| AppError::Validation(e.to_string()))?;
                parse_method = text.parse().map_err(AppError::Validation)?;
            }
            "pin_parser" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| AppError::Validation(e.to_string()))?;
                pin_parser = text.trim().eq_ignore_ascii_case("true");
            }
            "callback_url" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| AppError::Validation(e.to_string()))?;
                if !text.trim().is_empty() {
                    callback_url = Some(text.trim().to_string());
                }
            }
            "user_id" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| AppError::Validation(e.to_string()))?;
                if !text.trim().is_empty() {
                    user_id = Some(text.trim().to_string());
                }
            }
            _ => {}
        }
    }

    let bytes = bytes.ok_or_else(|| AppError::Validation("missing 'file' field".to_string()))?;
    if bytes.is_empty() {
        return Err(AppError::Validation("uploaded file is empty".to_string()));
    }

    Ok(UploadForm {
        filename,
        bytes,
        parse_method,
        pin_parser,
        callback_url,
        user_id,
    })
}

/// Blocking ingest, retained for small workbooks: same pipeline as the
/// background job, run inline on the request path.
async fn upload_excel_sync(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<ApiEnvelope<IngestSummary>>, AppError> {
    let form = read_upload_form(multipart).await?;
    info!(
        "POST /upload/excel - Synchronous ingest of '{}' ({} bytes)",
        form.filename,
        form.bytes.len()
    );

    let hash = content_hash(&form.bytes);
    let sheets = state.decoder.decode(&form.bytes)?;
    if sheets.is_empty() {
        return Err(AppError::Validation(
            "workbook contains no sheets".to_string(),
        ));
    }

    let mut summary = IngestSummary {
        total_sheets: sheets.len(),
        parsed_sheets: 0,
        failed_sheets: 0,
        portfolio_ids: Vec::new(),
        sheet_errors: Vec::new(),
        parse_method: form.parse_method,
    };

    for sheet in &sheets {
        let sid = sheet_identity(&hash, sheet.index, &sheet.name);
        match parse_sheet(
            &state.manual_parser,
            &state.llm,
            sheet,
            form.parse_method,
            form.pin_parser,
        )
        .await
        {
            Ok((portfolio, _method)) => {
                let stored = portfolio_service::upsert(&state.pool, portfolio, Some(sid)).await?;
                summary.parsed_sheets += 1;
                summary.portfolio_ids.push(stored.id);
            }
            Err(e) => {
                summary.failed_sheets += 1;
                summary.sheet_errors.push(SheetError {
                    sheet: sheet.name.clone(),
                    error: e.to_string(),
                });
            }
        }
    }

    if summary.parsed_sheets == 0 {
        return Err(AppError::Validation(format!(
            "all {} sheets failed to parse",
            summary.total_sheets
        )));
    }

    let message = format!(
        "{}/{} sheets ingested",
        summary.parsed_sheets, summary.total_sheets
    );
    Ok(Json(ApiEnvelope::success(message, summary)))
}

/// Asynchronous ingest: store the workbook, enqueue a job, respond at once.
async fn upload_excel_async(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<(StatusCode, Json<ApiEnvelope<JobSubmitted>>), AppError> {
    let form = read_upload_form(multipart).await?;
    info!(
        "POST /jobs/upload-excel-async - Queueing ingest of '{}' ({} bytes)",
        form.filename,
        form.bytes.len()
    );

    // Decode up front so malformed workbooks are rejected without creating
    // a job; the handler re-reads the stored bytes.
    let sheets = state.decoder.decode(&form.bytes)?;
    if sheets.is_empty() {
        return Err(AppError::Validation(
            "workbook contains no sheets".to_string(),
        ));
    }

    let hash = content_hash(&form.bytes);
    let upload = upload_queries::insert(
        &state.pool,
        &form.filename,
        &form.bytes,
        &hash,
        sheets.len() as i32,
    )
    .await?;

    let payload = WorkbookIngestPayload {
        upload_id: upload.id,
        parse_method: form.parse_method,
        pin_parser: form.pin_parser,
    };
    let job = state
        .job_store
        .insert(SubmitJob {
            kind: JobKind::WorkbookIngest,
            payload: serde_json::to_value(payload)
                .map_err(|e| AppError::Validation(e.to_string()))?,
            callback_url: form.callback_url,
            user_id: form.user_id,
        })
        .await?;

    info!(job_id = %job.id, "📋 Workbook ingest queued ({} sheets)", sheets.len());
    let message = format!("Processing {} sheets in background", sheets.len());
    Ok((
        StatusCode::ACCEPTED,
        Json(ApiEnvelope::success(
            message,
            JobSubmitted {
                job_id: job.id,
                status: job.status,
            },
        )),
    ))
}

use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::errors::{AppError, JobError};
use crate::models::response::ApiEnvelope;
use crate::models::{Job, JobProgress, JobStatus};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/jobs", get(list_jobs))
        .route("/jobs/:id/status", get(job_status))
        .route("/jobs/:id/result", get(job_result))
        .route("/jobs/:id/cancel", post(cancel_job))
}

#[derive(Debug, Deserialize)]
struct JobListParams {
    status: Option<JobStatus>,
    limit: Option<i64>,
}

async fn list_jobs(
    State(state): State<AppState>,
    Query(params): Query<JobListParams>,
) -> Result<Json<ApiEnvelope<Vec<Job>>>, AppError> {
    info!("GET /jobs - Listing jobs");
    let jobs = state
        .job_store
        .list(params.status, params.limit.unwrap_or(50))
        .await?;
    let message = format!("{} jobs", jobs.len());
    Ok(Json(ApiEnvelope::success(message, jobs)))
}

#[derive(Debug, Serialize)]
struct JobStatusView {
    job_id: Uuid,
    status: JobStatus,
    progress: JobProgress,
    attempts: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<JobError>,
    created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    completed_at: Option<DateTime<Utc>>,
}

async fn job_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiEnvelope<JobStatusView>>, AppError> {
    let job = fetch_job(&state, id).await?;
    let view = JobStatusView {
        job_id: job.id,
        status: job.status,
        progress: job.progress,
        attempts: job.attempts,
        error: job.error.map(|e| e.0),
        created_at: job.created_at,
        started_at: job.started_at,
        completed_at: job.completed_at,
    };
    Ok(Json(ApiEnvelope::success("Job status", view)))
}

#[derive(Debug, Serialize)]
struct JobResultView {
    job_id: Uuid,
    status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<JobError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    progress: Option<JobProgress>,
    #[serde(skip_serializing_if = "Option::is_none")]
    completed_at: Option<DateTime<Utc>>,
}

async fn job_result(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiEnvelope<JobResultView>>, AppError> {
    let job = fetch_job(&state, id).await?;

    let view = if job.status.is_terminal() {
        JobResultView {
            job_id: job.id,
            status: job.status,
            result: job.result.map(|r| r.0),
            error: job.error.map(|e| e.0),
            progress: None,
            completed_at: job.completed_at,
        }
    } else {
        JobResultView {
            job_id: job.id,
            status: job.status,
            result: None,
            error: None,
            progress: Some(job.progress),
            completed_at: None,
        }
    };

    let message = if view.completed_at.is_some() {
        "Job finished"
    } else {
        "Job not yet completed"
    };
    Ok(Json(ApiEnvelope::success(message, view)))
}

#[derive(Debug, Serialize)]
struct CancelView {
    job_id: Uuid,
    status: JobStatus,
    cancel_requested: bool,
}

async fn cancel_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiEnvelope<CancelView>>, AppError> {
    info!("POST /jobs/{}/cancel - Cancellation requested", id);

    let job = fetch_job(&state, id).await?;
    if job.status.is_terminal() {
        return Err(AppError::Conflict(format!(
            "job is already {}; not cancellable",
            job.status
        )));
    }

    state.job_store.request_cancel(id).await?;

    // Queued jobs go terminal right here; running ones cancel at the
    // handler's next yield point.
    if let Some(cancelled) = state.job_store.mark_cancelled_if_queued(id).await? {
        if cancelled.callback_url.is_some() {
            state.webhooks.dispatch(cancelled.clone());
        }
        return Ok(Json(ApiEnvelope::success(
            "Job cancelled",
            CancelView {
                job_id: id,
                status: cancelled.status,
                cancel_requested: true,
            },
        )));
    }

    Ok(Json(ApiEnvelope::success(
        "Cancellation requested",
        CancelView {
            job_id: id,
            status: JobStatus::Running,
            cancel_requested: true,
        },
    )))
}

async fn fetch_job(state: &AppState, id: Uuid) -> Result<Job, AppError> {
    state
        .job_store
        .get(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("job not found: {id}")))
}

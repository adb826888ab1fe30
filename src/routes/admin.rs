use axum::extract::{Path, State};
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::response::ApiEnvelope;
use crate::models::JobStatus;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/admin/jobs/:id/recover", post(recover_job))
        .route("/admin/jobs/recover-all", post(recover_all))
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
enum RecoverAction {
    #[default]
    Queued,
    Failed,
}

#[derive(Debug, Default, Deserialize)]
struct RecoverRequest {
    #[serde(default)]
    action: RecoverAction,
}

#[derive(Debug, Serialize)]
struct RecoverView {
    job_id: Uuid,
    action: &'static str,
}

/// Operator override for one job: back to the queue, or failed with a
/// `manual_override` error. Terminal jobs are left alone.
async fn recover_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    request: Option<Json<RecoverRequest>>,
) -> Result<Json<ApiEnvelope<RecoverView>>, AppError> {
    let action = request.map(|Json(r)| r.action).unwrap_or_default();
    warn!("POST /admin/jobs/{}/recover - Operator forcing {:?}", id, action);

    let job = state
        .job_store
        .get(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("job not found: {id}")))?;
    if job.status.is_terminal() {
        return Err(AppError::Conflict(format!(
            "job is already {}; terminal state is write-once",
            job.status
        )));
    }

    let (changed, label) = match action {
        RecoverAction::Queued => (state.job_store.force_requeue(id).await?, "requeued"),
        RecoverAction::Failed => (state.job_store.force_fail(id).await?, "failed"),
    };
    if !changed {
        return Err(AppError::Conflict(
            "job reached a terminal state concurrently".to_string(),
        ));
    }

    Ok(Json(ApiEnvelope::success(
        format!("Job {label} by operator"),
        RecoverView {
            job_id: id,
            action: label,
        },
    )))
}

#[derive(Debug, Serialize)]
struct RecoverAllView {
    examined: usize,
    changed: usize,
    action: &'static str,
}

/// Apply the override to every stuck job: expired-lease running jobs plus
/// queued jobs older than the configured queue age.
async fn recover_all(
    State(state): State<AppState>,
    request: Option<Json<RecoverRequest>>,
) -> Result<Json<ApiEnvelope<RecoverAllView>>, AppError> {
    let action = request.map(|Json(r)| r.action).unwrap_or_default();
    warn!("POST /admin/jobs/recover-all - Operator forcing {:?}", action);

    let stuck = state
        .job_store
        .list_stuck(state.config.max_queue_age)
        .await?;
    let mut changed = 0;
    for job in &stuck {
        if job.status == JobStatus::Queued && action == RecoverAction::Queued {
            // Old-but-queued jobs stay as they are unless the operator
            // forces a failure
            continue;
        }
        let applied = match action {
            RecoverAction::Queued => state.job_store.force_requeue(job.id).await?,
            RecoverAction::Failed => state.job_store.force_fail(job.id).await?,
        };
        if applied {
            info!(job_id = %job.id, "Operator override applied");
            changed += 1;
        }
    }

    let label = match action {
        RecoverAction::Queued => "requeued",
        RecoverAction::Failed => "failed",
    };
    Ok(Json(ApiEnvelope::success(
        format!("{changed} of {} stuck jobs {label}", stuck.len()),
        RecoverAllView {
            examined: stuck.len(),
            changed,
            action: label,
        },
    )))
}

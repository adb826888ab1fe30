use std::time::Duration;

use sqlx::types::Json;
use sqlx::PgPool;
use uuid::Uuid;

use crate::errors::{AppError, ErrorKind, JobError};
use crate::models::{Job, JobProgress, JobStatus, SubmitJob};

/// Column list shared by every query that returns a full job row.
const JOB_COLUMNS: &str = "id, kind, payload, status, progress_total, progress_completed, \
     progress_failed, current_item, percentage, result, error, attempts, worker_id, \
     lease_expires_at, created_at, started_at, completed_at, callback_url, user_id, \
     cancel_requested, webhook_error";

/// Typed wrapper over the jobs table. All state transitions go through the
/// single-statement primitives here; workers never mutate job rows directly.
#[derive(Clone)]
pub struct JobStore {
    pool: PgPool,
}

impl JobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn insert(&self, submit: SubmitJob) -> Result<Job, AppError> {
        let sql = format!(
            "INSERT INTO jobs (id, kind, payload, status, callback_url, user_id)
             VALUES ($1, $2, $3, 'queued', $4, $5)
             RETURNING {JOB_COLUMNS}"
        );
        let job = sqlx::query_as::<_, Job>(&sql)
            .bind(Uuid::new_v4())
            .bind(submit.kind)
            .bind(Json(submit.payload))
            .bind(submit.callback_url)
            .bind(submit.user_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(job)
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<Job>, AppError> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = $1");
        let job = sqlx::query_as::<_, Job>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(job)
    }

    pub async fn list(
        &self,
        status: Option<JobStatus>,
        limit: i64,
    ) -> Result<Vec<Job>, AppError> {
        let jobs = match status {
            Some(status) => {
                let sql = format!(
                    "SELECT {JOB_COLUMNS} FROM jobs WHERE status = $1
                     ORDER BY created_at DESC LIMIT $2"
                );
                sqlx::query_as::<_, Job>(&sql)
                    .bind(status)
                    .bind(limit)
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                let sql = format!(
                    "SELECT {JOB_COLUMNS} FROM jobs ORDER BY created_at DESC LIMIT $1"
                );
                sqlx::query_as::<_, Job>(&sql)
                    .bind(limit)
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        Ok(jobs)
    }

    /// Atomically claim one runnable job: `queued`, or `running` with an
    /// expired lease. `SKIP LOCKED` lets concurrent workers race without
    /// ever claiming the same row twice.
    pub async fn claim_one(
        &self,
        worker_id: &str,
        lease_ttl: Duration,
    ) -> Result<Option<Job>, AppError> {
        let sql = format!(
            "UPDATE jobs SET
                status = 'running',
                worker_id = $1,
                attempts = attempts + 1,
                started_at = COALESCE(started_at, NOW()),
                lease_expires_at = NOW() + make_interval(secs => $2)
             WHERE id = (
                SELECT id FROM jobs
                WHERE status = 'queued'
                   OR (status = 'running' AND lease_expires_at < NOW())
                ORDER BY created_at
                FOR UPDATE SKIP LOCKED
                LIMIT 1
             )
             RETURNING {JOB_COLUMNS}"
        );
        let job = sqlx::query_as::<_, Job>(&sql)
            .bind(worker_id)
            .bind(lease_ttl.as_secs_f64())
            .fetch_optional(&self.pool)
            .await?;
        Ok(job)
    }

    /// Extend the lease; the update only lands while the caller still owns
    /// the job. Returns the current `cancel_requested` flag, or `None` when
    /// the lease was lost.
    pub async fn heartbeat(
        &self,
        id: Uuid,
        worker_id: &str,
        lease_ttl: Duration,
    ) -> Result<Option<bool>, AppError> {
        let cancel = sqlx::query_scalar::<_, bool>(
            "UPDATE jobs SET lease_expires_at = NOW() + make_interval(secs => $3)
             WHERE id = $1 AND worker_id = $2 AND status = 'running'
             RETURNING cancel_requested",
        )
        .bind(id)
        .bind(worker_id)
        .bind(lease_ttl.as_secs_f64())
        .fetch_optional(&self.pool)
        .await?;
        Ok(cancel)
    }

    /// Conditional progress write. `GREATEST` keeps the stored percentage
    /// nondecreasing within a running episode.
    pub async fn update_progress(
        &self,
        id: Uuid,
        worker_id: &str,
        progress: &JobProgress,
    ) -> Result<bool, AppError> {
        let pct = JobProgress::percent(progress.total, progress.completed, progress.failed);
        let result = sqlx::query(
            "UPDATE jobs SET
                progress_total = $3,
                progress_completed = $4,
                progress_failed = $5,
                current_item = $6,
                percentage = GREATEST(percentage, $7)
             WHERE id = $1 AND worker_id = $2 AND status = 'running'",
        )
        .bind(id)
        .bind(worker_id)
        .bind(progress.total)
        .bind(progress.completed)
        .bind(progress.failed)
        .bind(progress.current_item.as_deref())
        .bind(pct)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Write-once terminal transition, guarded by lease ownership. A worker
    /// whose lease was reclaimed affects zero rows and gets `None` back.
    pub async fn finalize(
        &self,
        id: Uuid,
        worker_id: &str,
        status: JobStatus,
        result: Option<serde_json::Value>,
        error: Option<JobError>,
    ) -> Result<Option<Job>, AppError> {
        let sql = format!(
            "UPDATE jobs SET
                status = $3,
                completed_at = NOW(),
                result = $4,
                error = $5,
                lease_expires_at = NULL
             WHERE id = $1 AND worker_id = $2 AND status = 'running'
             RETURNING {JOB_COLUMNS}"
        );
        let job = sqlx::query_as::<_, Job>(&sql)
            .bind(id)
            .bind(worker_id)
            .bind(status)
            .bind(result.map(Json))
            .bind(error.map(Json))
            .fetch_optional(&self.pool)
            .await?;
        Ok(job)
    }

    /// Flag a queued or running job for cancellation. Returns the status the
    /// job had when flagged, or `None` for unknown/terminal jobs.
    pub async fn request_cancel(&self, id: Uuid) -> Result<Option<JobStatus>, AppError> {
        let status = sqlx::query_scalar::<_, JobStatus>(
            "UPDATE jobs SET cancel_requested = TRUE
             WHERE id = $1 AND status IN ('queued', 'running')
             RETURNING status",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(status)
    }

    /// Queued jobs skip the handler entirely: straight to `cancelled`.
    pub async fn mark_cancelled_if_queued(&self, id: Uuid) -> Result<Option<Job>, AppError> {
        let sql = format!(
            "UPDATE jobs SET
                status = 'cancelled',
                completed_at = NOW(),
                error = $2,
                lease_expires_at = NULL
             WHERE id = $1 AND status = 'queued'
             RETURNING {JOB_COLUMNS}"
        );
        let job = sqlx::query_as::<_, Job>(&sql)
            .bind(id)
            .bind(Json(JobError::cancelled()))
            .fetch_optional(&self.pool)
            .await?;
        Ok(job)
    }

    pub async fn cancel_requested(&self, id: Uuid) -> Result<bool, AppError> {
        let requested = sqlx::query_scalar::<_, bool>(
            "SELECT cancel_requested FROM jobs WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(requested.unwrap_or(false))
    }

    /// Webhook delivery failures are recorded without touching the terminal
    /// fields.
    pub async fn record_webhook_error(&self, id: Uuid, message: &str) -> Result<(), AppError> {
        sqlx::query("UPDATE jobs SET webhook_error = $2 WHERE id = $1")
            .bind(id)
            .bind(message)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Recovery primitive: every running job whose lease lapsed goes back to
    /// the queue for the next claim.
    pub async fn requeue_expired(&self) -> Result<Vec<Uuid>, AppError> {
        let ids = sqlx::query_scalar::<_, Uuid>(
            "UPDATE jobs SET status = 'queued', worker_id = NULL, lease_expires_at = NULL
             WHERE status = 'running' AND lease_expires_at < NOW()
             RETURNING id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    /// Jobs an operator may want to look at: expired-lease running jobs and
    /// queued jobs older than the given age.
    pub async fn list_stuck(&self, older_than: Duration) -> Result<Vec<Job>, AppError> {
        let sql = format!(
            "SELECT {JOB_COLUMNS} FROM jobs
             WHERE (status = 'running' AND lease_expires_at < NOW())
                OR (status = 'queued' AND created_at < NOW() - make_interval(secs => $1))
             ORDER BY created_at"
        );
        let jobs = sqlx::query_as::<_, Job>(&sql)
            .bind(older_than.as_secs_f64())
            .fetch_all(&self.pool)
            .await?;
        Ok(jobs)
    }

    /// Operator override: push a non-terminal job back to the queue.
    pub async fn force_requeue(&self, id: Uuid) -> Result<bool, AppError> {
        let result = sqlx::query(
            "UPDATE jobs SET status = 'queued', worker_id = NULL, lease_expires_at = NULL,
                cancel_requested = FALSE
             WHERE id = $1 AND status IN ('queued', 'running')",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Operator override: fail a non-terminal job, leaving an audit trail in
    /// the error field.
    pub async fn force_fail(&self, id: Uuid) -> Result<bool, AppError> {
        let result = sqlx::query(
            "UPDATE jobs SET status = 'failed', completed_at = NOW(), error = $2,
                worker_id = NULL, lease_expires_at = NULL
             WHERE id = $1 AND status IN ('queued', 'running')",
        )
        .bind(id)
        .bind(Json(JobError::new(
            ErrorKind::ManualOverride,
            "state forced by operator",
        )))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

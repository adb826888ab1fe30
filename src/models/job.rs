use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;
use uuid::Uuid;

use crate::errors::JobError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "job_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "job_kind", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    WorkbookIngest,
    FetchHoldingsOne,
    FetchHoldingsAll,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::WorkbookIngest => "workbook_ingest",
            JobKind::FetchHoldingsOne => "fetch_holdings_one",
            JobKind::FetchHoldingsAll => "fetch_holdings_all",
        }
    }
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-job progress counters, flattened onto the job row.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, FromRow)]
pub struct JobProgress {
    #[sqlx(rename = "progress_total")]
    pub total: i32,
    #[sqlx(rename = "progress_completed")]
    pub completed: i32,
    #[sqlx(rename = "progress_failed")]
    pub failed: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_item: Option<String>,
    pub percentage: f64,
}

impl JobProgress {
    pub fn new(total: i32) -> Self {
        Self {
            total,
            ..Default::default()
        }
    }

    /// Fraction of processed items (successes and failures both count).
    pub fn percent(total: i32, completed: i32, failed: i32) -> f64 {
        if total <= 0 {
            return 0.0;
        }
        ((completed + failed) as f64 / total as f64) * 100.0
    }

    pub fn is_final(&self) -> bool {
        self.total > 0 && self.completed + self.failed >= self.total
    }
}

/// Durable record of one unit of background work.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Job {
    pub id: Uuid,
    pub kind: JobKind,
    pub payload: Json<serde_json::Value>,
    pub status: JobStatus,
    #[sqlx(flatten)]
    pub progress: JobProgress,
    pub result: Option<Json<serde_json::Value>>,
    pub error: Option<Json<JobError>>,
    pub attempts: i32,
    pub worker_id: Option<String>,
    pub lease_expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub callback_url: Option<String>,
    pub user_id: Option<String>,
    pub cancel_requested: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook_error: Option<String>,
}

/// Parameters accepted when enqueuing a job.
#[derive(Debug, Clone)]
pub struct SubmitJob {
    pub kind: JobKind,
    pub payload: serde_json::Value,
    pub callback_url: Option<String>,
    pub user_id: Option<String>,
}

impl SubmitJob {
    pub fn new(kind: JobKind, payload: serde_json::Value) -> Self {
        Self {
            kind,
            payload,
            callback_url: None,
            user_id: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_and_status_wire_names() {
        assert_eq!(
            serde_json::to_string(&JobKind::WorkbookIngest).unwrap(),
            "\"workbook_ingest\""
        );
        assert_eq!(
            serde_json::to_string(&JobStatus::Queued).unwrap(),
            "\"queued\""
        );
        let kind: JobKind = serde_json::from_str("\"fetch_holdings_all\"").unwrap();
        assert_eq!(kind, JobKind::FetchHoldingsAll);
    }

    #[test]
    fn terminal_statuses() {
        assert!(!JobStatus::Queued.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
    }

    #[test]
    fn percentage_counts_failures_as_processed() {
        assert_eq!(JobProgress::percent(0, 0, 0), 0.0);
        assert_eq!(JobProgress::percent(4, 1, 1), 50.0);
        assert_eq!(JobProgress::percent(4, 3, 1), 100.0);
    }

    #[test]
    fn percentage_is_monotone_under_increments() {
        let mut last = 0.0;
        let total = 7;
        let mut completed = 0;
        let mut failed = 0;
        for i in 0..total {
            if i % 3 == 0 {
                failed += 1;
            } else {
                completed += 1;
            }
            let pct = JobProgress::percent(total, completed, failed);
            assert!(pct >= last);
            last = pct;
        }
        assert_eq!(last, 100.0);
    }

    #[test]
    fn final_progress_detection() {
        let mut p = JobProgress::new(2);
        assert!(!p.is_final());
        p.completed = 1;
        p.failed = 1;
        assert!(p.is_final());
    }
}

pub mod admin;
pub mod etf;
pub mod health;
pub mod jobs;
pub mod portfolios;
pub mod uploads;

use serde::Serialize;
use uuid::Uuid;

use crate::models::JobStatus;

/// Body returned by every async submission endpoint.
#[derive(Debug, Serialize)]
pub struct JobSubmitted {
    pub job_id: Uuid,
    pub status: JobStatus,
}

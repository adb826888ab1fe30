use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Serialize;
use tokio::time::sleep;
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::JobStore;
use crate::errors::JobError;
use crate::models::{Job, JobStatus};

const MAX_ATTEMPTS: u32 = 3;
const ATTEMPT_TIMEOUT: Duration = Duration::from_secs(10);

/// Body POSTed to `callback_url` after a terminal transition.
#[derive(Debug, Serialize)]
pub struct WebhookPayload {
    pub job_id: Uuid,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JobError>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl WebhookPayload {
    pub fn from_job(job: &Job) -> Self {
        Self {
            job_id: job.id,
            status: job.status,
            result: job.result.as_ref().map(|r| r.0.clone()),
            error: job.error.as_ref().map(|e| e.0.clone()),
            finished_at: job.completed_at,
        }
    }
}

/// Best-effort outbound notifications. Delivery failures are recorded on
/// the job row and never alter its terminal status.
#[derive(Clone)]
pub struct WebhookDispatcher {
    client: Client,
    store: JobStore,
}

impl WebhookDispatcher {
    pub fn new(store: JobStore) -> Self {
        let client = Client::builder()
            .timeout(ATTEMPT_TIMEOUT)
            .build()
            .expect("Failed to create HTTP client");
        Self { client, store }
    }

    /// Backoff before each retry: 1s, 2s, 4s, ...
    pub fn backoff_schedule(attempts: u32) -> Vec<Duration> {
        (0..attempts.saturating_sub(1))
            .map(|i| Duration::from_secs(1 << i))
            .collect()
    }

    /// Fire-and-forget delivery for a finished job.
    pub fn dispatch(&self, job: Job) {
        let dispatcher = self.clone();
        tokio::spawn(async move {
            dispatcher.deliver(job).await;
        });
    }

    async fn deliver(&self, job: Job) {
        let Some(url) = job.callback_url.clone() else {
            return;
        };
        let url = url.trim().to_string();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            warn!(job_id = %job.id, "Skipping webhook: invalid URL '{}'", url);
            let _ = self
                .store
                .record_webhook_error(job.id, &format!("invalid callback URL: {url}"))
                .await;
            return;
        }

        let payload = WebhookPayload::from_job(&job);
        let mut last_error = String::new();
        let delays = Self::backoff_schedule(MAX_ATTEMPTS);

        for attempt in 1..=MAX_ATTEMPTS {
            match self.client.post(&url).json(&payload).send().await {
                Ok(response) if response.status().is_success() => {
                    info!(
                        job_id = %job.id,
                        status = response.status().as_u16(),
                        "✅ Webhook delivered (attempt {})", attempt
                    );
                    return;
                }
                Ok(response) => {
                    last_error = format!("callback returned {}", response.status());
                }
                Err(e) => {
                    last_error = e.to_string();
                }
            }
            warn!(
                job_id = %job.id,
                "Webhook attempt {}/{} failed: {}", attempt, MAX_ATTEMPTS, last_error
            );
            if let Some(delay) = delays.get((attempt - 1) as usize) {
                sleep(*delay).await;
            }
        }

        if let Err(e) = self.store.record_webhook_error(job.id, &last_error).await {
            warn!(job_id = %job.id, "Could not record webhook error: {}", e);
        }
    }
}

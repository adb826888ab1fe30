/// Business-logic checks for the job subsystem that hold without a live
/// store: progress arithmetic, wire shapes, webhook payloads and the
/// upstream gate's spacing guarantee.
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Utc;
use fundfolio::errors::{ErrorKind, JobError};
use fundfolio::jobs::webhook::{WebhookDispatcher, WebhookPayload};
use fundfolio::models::{Job, JobKind, JobProgress, JobStatus};
use fundfolio::services::holdings_service::should_fetch;
use fundfolio::services::rate_limiter::UpstreamGate;
use sqlx::types::Json;
use uuid::Uuid;

fn completed_job() -> Job {
    let now = Utc::now();
    Job {
        id: Uuid::new_v4(),
        kind: JobKind::FetchHoldingsOne,
        payload: Json(serde_json::json!({"symbol": "UTINIFTETF"})),
        status: JobStatus::Completed,
        progress: JobProgress {
            total: 1,
            completed: 1,
            failed: 0,
            current_item: None,
            percentage: 100.0,
        },
        result: Some(Json(serde_json::json!({"succeeded": 1}))),
        error: None,
        attempts: 1,
        worker_id: Some("worker-0-abc".to_string()),
        lease_expires_at: None,
        created_at: now,
        started_at: Some(now),
        completed_at: Some(now),
        callback_url: Some("https://example.com/hook".to_string()),
        user_id: None,
        cancel_requested: false,
        webhook_error: None,
    }
}

#[test]
fn job_serializes_with_normative_field_names() {
    let value = serde_json::to_value(completed_job()).unwrap();
    assert_eq!(value["kind"], "fetch_holdings_one");
    assert_eq!(value["status"], "completed");
    assert_eq!(value["progress"]["total"], 1);
    assert_eq!(value["progress"]["completed"], 1);
    assert_eq!(value["progress"]["percentage"], 100.0);
    assert_eq!(value["attempts"], 1);
    assert!(value["created_at"].is_string());
}

#[test]
fn webhook_payload_matches_contract() {
    let job = completed_job();
    let value = serde_json::to_value(WebhookPayload::from_job(&job)).unwrap();

    assert_eq!(value["job_id"], job.id.to_string());
    assert_eq!(value["status"], "completed");
    assert_eq!(value["result"]["succeeded"], 1);
    assert!(value.get("error").is_none());
    assert!(value["finished_at"].is_string());
}

#[test]
fn webhook_retry_schedule_is_bounded_and_exponential() {
    let schedule = WebhookDispatcher::backoff_schedule(3);
    assert_eq!(schedule.len(), 2);
    assert_eq!(schedule[0], StdDuration::from_secs(1));
    assert_eq!(schedule[1], StdDuration::from_secs(2));
}

#[test]
fn progress_percentage_never_decreases_across_a_run() {
    let total = 25;
    let mut completed = 0;
    let mut failed = 0;
    let mut last = 0.0;
    for i in 0..total {
        if i % 4 == 0 {
            failed += 1
        } else {
            completed += 1
        }
        let pct = JobProgress::percent(total, completed, failed);
        assert!(pct >= last, "percentage regressed: {pct} < {last}");
        last = pct;
    }
    assert!((last - 100.0).abs() < f64::EPSILON);
}

#[test]
fn error_taxonomy_survives_storage_round_trip() {
    for kind in [
        ErrorKind::ParseTotalFailure,
        ErrorKind::UpstreamTotalFailure,
        ErrorKind::Cancelled,
        ErrorKind::LeaseLost,
        ErrorKind::ManualOverride,
    ] {
        let stored = serde_json::to_value(JobError::new(kind, "x")).unwrap();
        let loaded: JobError = serde_json::from_value(stored).unwrap();
        assert_eq!(loaded.kind, kind);
    }
}

#[test]
fn freshness_window_suppresses_and_then_permits_fetches() {
    let ttl = chrono::Duration::hours(24);
    let now = Utc::now();

    assert!(should_fetch(None, now, ttl));
    assert!(!should_fetch(Some(now - chrono::Duration::hours(1)), now, ttl));
    assert!(should_fetch(Some(now - chrono::Duration::hours(30)), now, ttl));
}

#[tokio::test]
async fn gate_spacing_holds_under_concurrency() {
    let gate = Arc::new(UpstreamGate::new(StdDuration::from_millis(50)));
    let start = std::time::Instant::now();

    let mut handles = Vec::new();
    for _ in 0..4 {
        let gate = gate.clone();
        handles.push(tokio::spawn(async move {
            let _permit = gate.acquire().await;
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    // Four call starts need at least three min-intervals between them
    assert!(start.elapsed() >= StdDuration::from_millis(150));
}

pub mod fetch_holdings_job;
pub mod recovery;
pub mod scheduler;
pub mod webhook;
pub mod workbook_ingest_job;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::{Duration, Instant};
use uuid::Uuid;

use crate::db::JobStore;
use crate::errors::JobError;
use crate::models::{JobKind, JobProgress};

/// Minimum spacing between persisted progress updates. The final update of a
/// job is always written.
const PROGRESS_MIN_INTERVAL: Duration = Duration::from_secs(1);

/// Execution context handed to a handler for one claimed job.
///
/// Carries the cancellation signal, the coalesced progress sink and the
/// lease state. Handlers check `cancelled()` and `lease_lost()` at every
/// yield point: before each sheet/symbol, and around upstream calls.
pub struct JobContext {
    job_id: Uuid,
    worker_id: String,
    store: JobStore,
    cancel_flag: Arc<AtomicBool>,
    lease_lost_flag: Arc<AtomicBool>,
    last_progress: Mutex<Option<Instant>>,
}

impl JobContext {
    pub fn new(job_id: Uuid, worker_id: String, store: JobStore) -> Self {
        Self {
            job_id,
            worker_id,
            store,
            cancel_flag: Arc::new(AtomicBool::new(false)),
            lease_lost_flag: Arc::new(AtomicBool::new(false)),
            last_progress: Mutex::new(None),
        }
    }

    pub fn job_id(&self) -> Uuid {
        self.job_id
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Flags shared with the heartbeat task for this job.
    pub fn flags(&self) -> (Arc<AtomicBool>, Arc<AtomicBool>) {
        (self.cancel_flag.clone(), self.lease_lost_flag.clone())
    }

    /// Whether cancellation was requested. Consults the heartbeat-propagated
    /// flag first, then the store, so a cancel lands within one yield point.
    pub async fn cancelled(&self) -> Result<bool, JobError> {
        if self.cancel_flag.load(Ordering::Relaxed) {
            return Ok(true);
        }
        let requested = self.store.cancel_requested(self.job_id).await?;
        if requested {
            self.cancel_flag.store(true, Ordering::Relaxed);
        }
        Ok(requested)
    }

    /// Set when a heartbeat found the lease gone. The handler must return
    /// without further writes; the scheduler skips finalize.
    pub fn lease_lost(&self) -> bool {
        self.lease_lost_flag.load(Ordering::Relaxed)
    }

    /// Persist progress, coalesced to at most one write per second. The
    /// update that completes the job is never dropped.
    pub async fn progress(&self, progress: &JobProgress) -> Result<(), JobError> {
        let now = Instant::now();
        {
            let mut last = self.last_progress.lock();
            let due = match *last {
                Some(at) => now.duration_since(at) >= PROGRESS_MIN_INTERVAL,
                None => true,
            };
            if !due && !progress.is_final() {
                return Ok(());
            }
            *last = Some(now);
        }
        self.store
            .update_progress(self.job_id, &self.worker_id, progress)
            .await?;
        Ok(())
    }
}

/// One background job kind's implementation.
#[async_trait]
pub trait JobHandler: Send + Sync {
    fn kind(&self) -> JobKind;

    /// Execute the job. Errors never cross this boundary as panics; the
    /// returned `JobError` decides the terminal status.
    async fn run(
        &self,
        payload: serde_json::Value,
        ctx: &JobContext,
    ) -> Result<serde_json::Value, JobError>;
}

/// kind → handler dispatch table, assembled once at startup.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<JobKind, Arc<dyn JobHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, handler: Arc<dyn JobHandler>) -> Self {
        self.handlers.insert(handler.kind(), handler);
        self
    }

    pub fn get(&self, kind: JobKind) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(&kind).cloned()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopHandler(JobKind);

    #[async_trait]
    impl JobHandler for NoopHandler {
        fn kind(&self) -> JobKind {
            self.0
        }

        async fn run(
            &self,
            _payload: serde_json::Value,
            _ctx: &JobContext,
        ) -> Result<serde_json::Value, JobError> {
            Ok(serde_json::json!({}))
        }
    }

    #[test]
    fn registry_dispatches_by_kind() {
        let registry = HandlerRegistry::new()
            .register(Arc::new(NoopHandler(JobKind::WorkbookIngest)))
            .register(Arc::new(NoopHandler(JobKind::FetchHoldingsOne)));

        assert_eq!(registry.len(), 2);
        assert!(registry.get(JobKind::WorkbookIngest).is_some());
        assert!(registry.get(JobKind::FetchHoldingsAll).is_none());
    }

    #[test]
    fn re_registering_a_kind_replaces_the_handler() {
        let registry = HandlerRegistry::new()
            .register(Arc::new(NoopHandler(JobKind::WorkbookIngest)))
            .register(Arc::new(NoopHandler(JobKind::WorkbookIngest)));
        assert_eq!(registry.len(), 1);
    }
}

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{error, info, warn, Instrument};
use uuid::Uuid;

use crate::db::JobStore;
use crate::errors::ErrorKind;
use crate::jobs::webhook::WebhookDispatcher;
use crate::jobs::{HandlerRegistry, JobContext};
use crate::models::{Job, JobStatus};

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub worker_concurrency: usize,
    pub lease_ttl: Duration,
    pub heartbeat_interval: Duration,
    pub poll_interval: Duration,
}

/// Worker pool driving the job queue: claim, execute with heartbeats, make
/// exactly one terminal transition, then notify.
pub struct Scheduler {
    store: JobStore,
    registry: Arc<HandlerRegistry>,
    webhooks: Arc<WebhookDispatcher>,
    config: SchedulerConfig,
}

impl Scheduler {
    pub fn new(
        store: JobStore,
        registry: Arc<HandlerRegistry>,
        webhooks: Arc<WebhookDispatcher>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            store,
            registry,
            webhooks,
            config,
        }
    }

    /// Spawn the worker loops. Workers run for the life of the process.
    pub fn spawn_workers(self: Arc<Self>) -> Vec<JoinHandle<()>> {
        info!(
            "🚀 Starting {} job workers (lease {:?}, heartbeat {:?})",
            self.config.worker_concurrency, self.config.lease_ttl, self.config.heartbeat_interval
        );
        (0..self.config.worker_concurrency)
            .map(|slot| {
                let scheduler = self.clone();
                let worker_id = format!("worker-{}-{}", slot, Uuid::new_v4().simple());
                tokio::spawn(async move {
                    scheduler.worker_loop(worker_id).await;
                })
            })
            .collect()
    }

    async fn worker_loop(&self, worker_id: String) {
        loop {
            match self
                .store
                .claim_one(&worker_id, self.config.lease_ttl)
                .await
            {
                Ok(Some(job)) => {
                    self.execute(job, &worker_id).await;
                }
                Ok(None) => {
                    sleep(self.config.poll_interval).await;
                }
                Err(e) => {
                    error!(worker_id = %worker_id, "Error claiming job: {}", e);
                    sleep(self.config.poll_interval).await;
                }
            }
        }
    }

    async fn execute(&self, job: Job, worker_id: &str) {
        let job_id = job.id;
        info!(
            job_id = %job_id,
            worker_id = %worker_id,
            kind = %job.kind,
            attempt = job.attempts,
            "🏃 Executing job"
        );

        let ctx = JobContext::new(job_id, worker_id.to_string(), self.store.clone());
        let heartbeat = self.spawn_heartbeat(&ctx);

        // Handler logs all carry the job identity
        let span = tracing::info_span!("job", job_id = %job_id, kind = %job.kind);
        let outcome = match self.registry.get(job.kind) {
            Some(handler) => {
                handler
                    .run(job.payload.0.clone(), &ctx)
                    .instrument(span)
                    .await
            }
            None => Err(crate::errors::JobError::new(
                ErrorKind::Validation,
                format!("no handler registered for kind {}", job.kind),
            )),
        };

        heartbeat.abort();

        if ctx.lease_lost() {
            warn!(
                job_id = %job_id,
                worker_id = %worker_id,
                "Lease lost before finalize; leaving the job to its new owner"
            );
            return;
        }

        let (status, result, error) = match outcome {
            Ok(result) => (JobStatus::Completed, Some(result), None),
            Err(e) if e.kind == ErrorKind::Cancelled => (JobStatus::Cancelled, None, Some(e)),
            Err(e) => (JobStatus::Failed, None, Some(e)),
        };

        match self
            .store
            .finalize(job_id, worker_id, status, result, error)
            .await
        {
            Ok(Some(finalized)) => {
                info!(
                    job_id = %job_id,
                    status = %finalized.status,
                    "🏁 Job finished"
                );
                if finalized.callback_url.is_some() {
                    self.webhooks.dispatch(finalized);
                }
            }
            Ok(None) => {
                warn!(
                    job_id = %job_id,
                    worker_id = %worker_id,
                    "Finalize lost the race: lease was reclaimed mid-run"
                );
            }
            Err(e) => {
                error!(job_id = %job_id, "Failed to finalize job: {}", e);
            }
        }
    }

    /// Lease extension loop for one claimed job. Also propagates the
    /// cancel flag so handlers see a requested cancel without polling the
    /// store themselves.
    fn spawn_heartbeat(&self, ctx: &JobContext) -> JoinHandle<()> {
        let store = self.store.clone();
        let job_id = ctx.job_id();
        let worker_id = ctx.worker_id().to_string();
        let interval = self.config.heartbeat_interval;
        let lease_ttl = self.config.lease_ttl;
        let (cancel_flag, lease_lost_flag) = ctx.flags();

        tokio::spawn(async move {
            loop {
                sleep(interval).await;
                match store.heartbeat(job_id, &worker_id, lease_ttl).await {
                    Ok(Some(cancel_requested)) => {
                        if cancel_requested {
                            cancel_flag.store(true, Ordering::Relaxed);
                        }
                    }
                    Ok(None) => {
                        warn!(job_id = %job_id, "Heartbeat rejected: lease no longer owned");
                        lease_lost_flag.store(true, Ordering::Relaxed);
                        break;
                    }
                    Err(e) => {
                        // Transient store trouble: keep trying until the
                        // lease either extends or expires for real.
                        warn!(job_id = %job_id, "Heartbeat error: {}", e);
                    }
                }
            }
        })
    }
}

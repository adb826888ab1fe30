use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{error, info};

use crate::db::JobStore;
use crate::errors::AppError;

/// Returns orphaned `running` jobs to the queue: once at startup, then on a
/// fixed interval. Never drops history; terminal jobs are left untouched.
pub struct Recovery {
    store: JobStore,
    interval: Duration,
}

impl Recovery {
    pub fn new(store: JobStore, interval: Duration) -> Self {
        Self { store, interval }
    }

    /// One sweep: requeue every running job whose lease has lapsed.
    pub async fn sweep(&self) -> Result<usize, AppError> {
        let ids = self.store.requeue_expired().await?;
        for id in &ids {
            info!(job_id = %id, "🔁 Requeued job with expired lease");
        }
        Ok(ids.len())
    }

    pub async fn startup_sweep(&self) -> Result<usize, AppError> {
        let recovered = self.sweep().await?;
        if recovered > 0 {
            info!("🔁 Startup recovery requeued {} orphaned jobs", recovered);
        }
        Ok(recovered)
    }

    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                sleep(self.interval).await;
                match self.sweep().await {
                    Ok(0) => {}
                    Ok(n) => info!("🔁 Recovery sweep requeued {} jobs", n),
                    Err(e) => error!("Recovery sweep failed: {}", e),
                }
            }
        })
    }
}

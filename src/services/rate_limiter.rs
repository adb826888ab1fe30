use std::sync::Arc;
use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tokio::time::{sleep, Duration, Instant};

/// Process-wide gate in front of the upstream holdings API.
///
/// A single permit serializes calls across all workers, and a minimum
/// interval is enforced between consecutive call starts regardless of how
/// many handlers are racing for the gate.
pub struct UpstreamGate {
    /// One permit: upstream calls never overlap
    slot: Arc<Semaphore>,
    /// Start time of the most recent upstream call
    last_call: Arc<Mutex<Option<Instant>>>,
    min_interval: Duration,
}

impl UpstreamGate {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            slot: Arc::new(Semaphore::new(1)),
            last_call: Arc::new(Mutex::new(None)),
            min_interval,
        }
    }

    /// Acquire permission for one upstream call.
    ///
    /// Blocks until the previous call has finished and `min_interval` has
    /// elapsed since it started. The returned guard must be held for the
    /// duration of the call; dropping it reopens the gate.
    pub async fn acquire(&self) -> UpstreamPermit {
        let permit = self.slot.clone().acquire_owned().await.unwrap();

        let wait_time = {
            let last = self.last_call.lock();
            match *last {
                Some(at) if at.elapsed() < self.min_interval => {
                    Some(self.min_interval - at.elapsed())
                }
                _ => None,
            }
        }; // Lock is dropped here

        // Sleep outside the lock if needed
        if let Some(delay) = wait_time {
            sleep(delay).await;
        }

        *self.last_call.lock() = Some(Instant::now());

        UpstreamPermit { _permit: permit }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }
}

/// Guard holding the gate; released on drop.
pub struct UpstreamPermit {
    _permit: tokio::sync::OwnedSemaphorePermit,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant as StdInstant;

    #[tokio::test]
    async fn first_call_passes_immediately() {
        let gate = UpstreamGate::new(Duration::from_millis(200));
        let start = StdInstant::now();
        let _guard = gate.acquire().await;
        assert!(start.elapsed().as_millis() < 100, "first call should not wait");
    }

    #[tokio::test]
    async fn consecutive_calls_are_spaced_by_min_interval() {
        let gate = UpstreamGate::new(Duration::from_millis(200));

        let start = StdInstant::now();
        drop(gate.acquire().await);
        drop(gate.acquire().await);
        drop(gate.acquire().await);

        // Two gaps of >=200ms between three call starts
        assert!(
            start.elapsed().as_millis() >= 400,
            "calls were not spaced: {:?}",
            start.elapsed()
        );
    }

    #[tokio::test]
    async fn concurrent_callers_are_serialized() {
        let gate = Arc::new(UpstreamGate::new(Duration::from_millis(100)));
        let start = StdInstant::now();

        let mut handles = Vec::new();
        for _ in 0..3 {
            let gate = gate.clone();
            handles.push(tokio::spawn(async move {
                let _guard = gate.acquire().await;
                sleep(Duration::from_millis(10)).await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert!(
            start.elapsed().as_millis() >= 200,
            "three concurrent callers should take at least two intervals"
        );
    }
}

//! One-shot expansion timers
//!
//! Each waiting entry owns exactly one pending timer. A timer fires once and the
//! tick handler schedules the next one, so a slow tick delays the following
//! tick instead of overlapping with it.

use std::future::Future;
use std::time::Duration;
use tokio::task::AbortHandle;
use tracing::trace;

use crate::types::QueueId;

#[derive(Debug, Clone)]
pub struct ExpansionScheduler {
    interval: Duration,
}

impl ExpansionScheduler {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn interval_ms(&self) -> u64 {
        self.interval.as_millis() as u64
    }

    /// Run `on_fire` for `queue_id` after one interval.
    ///
    /// The returned handle cancels the timer; aborting an already fired or
    /// already aborted timer is a no-op.
    pub fn schedule<F, Fut>(&self, queue_id: QueueId, on_fire: F) -> AbortHandle
    where
        F: FnOnce(QueueId) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let interval = self.interval;
        let task = tokio::spawn(async move {
            tokio::time::sleep(interval).await;
            trace!("Expansion timer fired for {}", queue_id);
            on_fire(queue_id).await;
        });
        task.abort_handle()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_timer_fires_once_after_interval() {
        let scheduler = ExpansionScheduler::new(Duration::from_millis(3000));
        let fired = Arc::new(AtomicUsize::new(0));

        let counter = fired.clone();
        scheduler.schedule(uuid::Uuid::new_v4(), move |_| async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_millis(2999)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(2)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_millis(10_000)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_is_idempotent() {
        let scheduler = ExpansionScheduler::new(Duration::from_millis(100));
        let fired = Arc::new(AtomicUsize::new(0));

        let counter = fired.clone();
        let handle = scheduler.schedule(uuid::Uuid::new_v4(), move |_| async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        handle.abort();
        handle.abort();

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}

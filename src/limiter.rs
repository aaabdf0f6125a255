use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;

/// Caps how many item syncs talk to the remote store at the same time,
/// whichever source scheduled them.
#[derive(Debug, Clone)]
pub struct ConcurrencyLimiter {
    semaphore: Arc<Semaphore>,
    limit: usize,
}

impl ConcurrencyLimiter {
    pub fn new(limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(limit)),
            limit,
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Runs `operation` while holding one permit.
    pub async fn with_permit<F, T>(&self, operation: F) -> T
    where
        F: Future<Output = T>,
    {
        // the semaphore is never closed
        let _permit = self
            .semaphore
            .acquire()
            .await
            .unwrap_or_else(|_| unreachable!("limiter semaphore closed"));
        operation.await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_never_exceeds_limit() {
        let limiter = ConcurrencyLimiter::new(2);
        let inside = Arc::new(AtomicUsize::new(0));
        let max_inside = Arc::new(AtomicUsize::new(0));

        let tasks = (0..10).map(|_| {
            let limiter = limiter.clone();
            let inside = inside.clone();
            let max_inside = max_inside.clone();
            tokio::spawn(async move {
                limiter
                    .with_permit(async {
                        let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                        max_inside.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(5)).await;
                        inside.fetch_sub(1, Ordering::SeqCst);
                    })
                    .await
            })
        });
        for task in futures_util::future::join_all(tasks).await {
            task.unwrap();
        }

        assert_eq!(max_inside.load(Ordering::SeqCst), 2);
        assert_eq!(limiter.available(), 2);
    }

    #[tokio::test]
    async fn test_zero_limit_is_clamped() {
        let limiter = ConcurrencyLimiter::new(0);
        assert_eq!(limiter.limit(), 1);
        assert_eq!(limiter.with_permit(async { 7 }).await, 7);
    }
}

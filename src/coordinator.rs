//! Key-scoped mutual exclusion for "ensure remote container exists".
//!
//! The first caller for a key proceeds; later callers for the same key wait in
//! arrival order until the holder's [`CreationGuard`] is dropped. Release is
//! tied to the guard's scope, so an early return, an error or a cancelled
//! future can never leave a key held.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

#[derive(Debug, Default)]
pub struct ResourceCreationCoordinator {
    gates: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl ResourceCreationCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits until no other guard for `key` is alive.
    pub async fn begin(&self, key: &str) -> CreationGuard<'_> {
        let gate = {
            let mut gates = self.gates.lock().unwrap_or_else(|e| e.into_inner());
            gates.entry(key.to_string()).or_default().clone()
        };
        // tokio's mutex queues waiters fairly
        let held = gate.lock_owned().await;
        tracing::trace!("creation gate acquired for {}", key);
        CreationGuard {
            coordinator: self,
            key: key.to_string(),
            held: Some(held),
        }
    }

    /// Runs `f` while holding the gate for `key`.
    #[cfg(test)]
    pub(crate) async fn run<F, Fut, T>(&self, key: &str, f: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = T>,
    {
        let _guard = self.begin(key).await;
        f().await
    }

    #[cfg(test)]
    pub(crate) fn is_idle(&self, key: &str) -> bool {
        let gates = self.gates.lock().unwrap_or_else(|e| e.into_inner());
        !gates.contains_key(key)
    }

    fn release(&self, key: &str, held: OwnedMutexGuard<()>) {
        let mut gates = self.gates.lock().unwrap_or_else(|e| e.into_inner());
        drop(held);
        // waiters clone the gate under this lock, so a count of one means
        // nobody holds or awaits it anymore
        if gates.get(key).is_some_and(|gate| Arc::strong_count(gate) == 1) {
            gates.remove(key);
        }
    }
}

#[must_use = "dropping the guard immediately releases the key"]
pub struct CreationGuard<'a> {
    coordinator: &'a ResourceCreationCoordinator,
    key: String,
    held: Option<OwnedMutexGuard<()>>,
}

impl CreationGuard<'_> {
    /// Releases the key. Equivalent to dropping the guard.
    pub fn end(self) {}
}

impl Drop for CreationGuard<'_> {
    fn drop(&mut self) {
        if let Some(held) = self.held.take() {
            self.coordinator.release(&self.key, held);
            tracing::trace!("creation gate released for {}", self.key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_key_is_exclusive() {
        let coordinator = Arc::new(ResourceCreationCoordinator::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let max_inside = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let coordinator = coordinator.clone();
            let inside = inside.clone();
            let max_inside = max_inside.clone();
            handles.push(tokio::spawn(async move {
                let _guard = coordinator.begin("appleBooks").await;
                let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                max_inside.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                inside.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
        assert!(coordinator.is_idle("appleBooks"));
    }

    #[tokio::test]
    async fn test_different_keys_do_not_block() {
        let coordinator = ResourceCreationCoordinator::new();
        let first = coordinator.begin("goodLinks").await;
        let second = tokio::time::timeout(Duration::from_millis(100), coordinator.begin("weRead")).await;
        assert!(second.is_ok());
        first.end();
        assert!(coordinator.is_idle("goodLinks"));
    }

    #[tokio::test]
    async fn test_waiters_release_in_arrival_order() {
        let coordinator = Arc::new(ResourceCreationCoordinator::new());
        let order = Arc::new(Mutex::new(Vec::new()));
        let holder = coordinator.begin("chats").await;

        let mut handles = Vec::new();
        for i in 0..4 {
            let coordinator = coordinator.clone();
            let order = order.clone();
            handles.push(tokio::spawn(async move {
                let _guard = coordinator.begin("chats").await;
                order.lock().unwrap().push(i);
            }));
            // let each waiter enqueue before spawning the next
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        drop(holder);
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn test_error_path_releases_key() {
        let coordinator = ResourceCreationCoordinator::new();
        let result: Result<(), &str> = coordinator.run("dedao", || async { Err("boom") }).await;
        assert!(result.is_err());
        assert!(coordinator.is_idle("dedao"));

        let reacquired = tokio::time::timeout(Duration::from_millis(100), coordinator.begin("dedao")).await;
        assert!(reacquired.is_ok());
    }

    #[tokio::test]
    async fn test_cancelled_waiter_does_not_wedge_key() {
        let coordinator = ResourceCreationCoordinator::new();
        let holder = coordinator.begin("appleBooks").await;
        let timed_out = tokio::time::timeout(Duration::from_millis(20), coordinator.begin("appleBooks")).await;
        assert!(timed_out.is_err());
        drop(holder);

        let next = tokio::time::timeout(Duration::from_millis(100), coordinator.begin("appleBooks")).await;
        assert!(next.is_ok());
    }
}

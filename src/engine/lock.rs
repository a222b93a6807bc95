use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::model::SlotScope;

use super::EngineError;

/// Keyed mutual exclusion. Distinct keys never contend; entries are dropped
/// from the table once nobody holds or waits on them.
pub struct LockTable<K: Eq + Hash + Clone> {
    locks: DashMap<K, Arc<Mutex<()>>>,
    timeout: Option<Duration>,
    /// Gauge kept equal to `active()`.
    active_gauge: Option<&'static str>,
}

/// Released on drop, including unwinding out of a panicking critical section.
pub struct KeyGuard<'a, K: Eq + Hash + Clone> {
    table: &'a LockTable<K>,
    key: K,
    guard: Option<OwnedMutexGuard<()>>,
}

impl<K: Eq + Hash + Clone> Drop for KeyGuard<'_, K> {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Only the table's own Arc left → nobody is holding or queued.
        self.table
            .locks
            .remove_if(&self.key, |_, m| Arc::strong_count(m) == 1);
        self.table.report_active();
    }
}

impl<K: Eq + Hash + Clone> Default for LockTable<K> {
    fn default() -> Self {
        Self::new(None)
    }
}

impl<K: Eq + Hash + Clone> LockTable<K> {
    pub fn new(timeout: Option<Duration>) -> Self {
        Self {
            locks: DashMap::new(),
            timeout,
            active_gauge: None,
        }
    }

    pub fn with_active_gauge(mut self, name: &'static str) -> Self {
        self.active_gauge = Some(name);
        self
    }

    fn report_active(&self) {
        if let Some(name) = self.active_gauge {
            metrics::gauge!(name).set(self.locks.len() as f64);
        }
    }

    /// Number of keys currently held or waited on.
    pub fn active(&self) -> usize {
        self.locks.len()
    }

    pub async fn acquire(&self, key: K) -> Result<KeyGuard<'_, K>, tokio::time::error::Elapsed> {
        // Clone the Arc under the shard lock so a concurrent release can't drop the entry.
        let mutex = self.locks.entry(key.clone()).or_default().value().clone();
        self.report_active();
        let guard = match self.timeout {
            Some(t) => tokio::time::timeout(t, mutex.lock_owned()).await,
            None => Ok(mutex.lock_owned().await),
        };
        // On timeout the KeyGuard still has to clean up our entry.
        let mut key_guard = KeyGuard {
            table: self,
            key,
            guard: None,
        };
        key_guard.guard = Some(guard?);
        Ok(key_guard)
    }
}

/// Per-(event, slot) lock serializing admission and reconciliation.
pub type SlotLocks = LockTable<SlotScope>;

impl LockTable<SlotScope> {
    /// Run `f` while holding the lock for `scope`.
    pub async fn with_lock<T, F, Fut>(&self, scope: SlotScope, f: F) -> Result<T, EngineError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, EngineError>>,
    {
        let wait_start = Instant::now();
        let acquired = self.acquire(scope).await;
        metrics::histogram!(crate::observability::SLOT_LOCK_WAIT_SECONDS)
            .record(wait_start.elapsed().as_secs_f64());
        let _guard = acquired.map_err(|_| {
            tracing::warn!(%scope, "timed out waiting for slot lock");
            EngineError::LockTimeout(scope)
        })?;
        f().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn same_key_is_exclusive() {
        let table: Arc<LockTable<u32>> = Arc::new(LockTable::default());
        let inside = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let table = table.clone();
            let inside = inside.clone();
            let max_seen = max_seen.clone();
            handles.push(tokio::spawn(async move {
                let _g = table.acquire(1).await.unwrap();
                let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                tokio::task::yield_now().await;
                inside.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
        assert_eq!(table.active(), 0);
    }

    #[tokio::test]
    async fn distinct_keys_do_not_contend() {
        let table: LockTable<u32> = LockTable::new(Some(Duration::from_millis(50)));
        let _a = table.acquire(1).await.unwrap();
        let _b = table.acquire(2).await.unwrap();
        assert_eq!(table.active(), 2);
    }

    #[tokio::test]
    async fn timeout_releases_entry() {
        let table: LockTable<u32> = LockTable::new(Some(Duration::from_millis(20)));
        let held = table.acquire(7).await.unwrap();
        assert!(table.acquire(7).await.is_err());
        drop(held);
        assert_eq!(table.active(), 0);
        assert!(table.acquire(7).await.is_ok());
    }

    #[tokio::test]
    async fn with_lock_maps_timeout() {
        let table = SlotLocks::new(Some(Duration::from_millis(20)));
        let scope = SlotScope::new(8, 1_000);
        let _held = table.acquire(scope).await.unwrap();
        let result: Result<(), EngineError> = table.with_lock(scope, || async { Ok(()) }).await;
        assert!(matches!(result, Err(EngineError::LockTimeout(s)) if s == scope));
    }

    #[tokio::test]
    async fn with_lock_releases_on_error() {
        let table = SlotLocks::default();
        let scope = SlotScope::new(8, 1_000);
        let result: Result<(), EngineError> = table
            .with_lock(scope, || async {
                Err(EngineError::StoreUnavailable("down".into()))
            })
            .await;
        assert!(result.is_err());
        assert_eq!(table.active(), 0);
    }

    #[test]
    fn active_gauge_drops_back_on_release() {
        let recorder = metrics_exporter_prometheus::PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        metrics::with_local_recorder(&recorder, || {
            let table = SlotLocks::new(None)
                .with_active_gauge(crate::observability::SLOT_LOCKS_ACTIVE);
            let a = futures::executor::block_on(table.acquire(SlotScope::new(8, 1))).unwrap();
            let b = futures::executor::block_on(table.acquire(SlotScope::new(8, 2))).unwrap();
            assert!(handle.render().contains("slotcap_slot_locks_active 2"));
            drop(a);
            assert!(handle.render().contains("slotcap_slot_locks_active 1"));
            drop(b);
        });
        assert!(handle.render().contains("slotcap_slot_locks_active 0"));
    }
}

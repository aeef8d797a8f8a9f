//! Per-Session Lock (§4.3): an asynchronous named mutex keyed by session
//! id, local to this instance. Cross-instance serialization is the
//! Store's job (§4.1's WATCH/MULTI/EXEC), not this module's.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::config::LOCK_TIMEOUT;
use crate::error::CoreError;

struct LockSlot {
    mutex: Mutex<()>,
    waiters: AtomicUsize,
}

/// Table of per-session locks. Entries are created on first use and
/// dropped once their last waiter releases, so an idle deployment with
/// thousands of historical session ids holds no locks for sessions nobody
/// is touching.
#[derive(Default)]
pub struct SessionLockTable {
    slots: DashMap<String, Arc<LockSlot>>,
}

impl SessionLockTable {
    /// Construct an empty lock table.
    pub fn new() -> Self {
        Self::default()
    }

    fn acquire_slot(&self, id: &str) -> Arc<LockSlot> {
        let slot = self
            .slots
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(LockSlot { mutex: Mutex::new(()), waiters: AtomicUsize::new(0) }))
            .clone();
        slot.waiters.fetch_add(1, Ordering::SeqCst);
        slot
    }

    fn release_slot(&self, id: &str, slot: &Arc<LockSlot>) {
        if slot.waiters.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.slots.remove_if(id, |_, candidate| {
                Arc::ptr_eq(candidate, slot) && candidate.waiters.load(Ordering::SeqCst) == 0
            });
        }
    }

    /// Run `body` with exclusive use of the slot for `id`. Acquisition is
    /// FIFO among waiters on the same id (tokio's `Mutex` queues fairly)
    /// and times out after [`LOCK_TIMEOUT`].
    pub async fn with_session_lock<F, Fut, T>(&self, id: &str, body: F) -> Result<T, CoreError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let slot = self.acquire_slot(id);
        let guard = match tokio::time::timeout(LOCK_TIMEOUT, slot.mutex.lock()).await {
            Ok(guard) => guard,
            Err(_) => {
                self.release_slot(id, &slot);
                return Err(CoreError::LockTimeout);
            }
        };
        let result = body().await;
        drop(guard);
        self.release_slot(id, &slot);
        Ok(result)
    }

    /// Number of session ids currently holding a lock slot (always zero
    /// between calls in the absence of contention); exposed for tests and
    /// the `/health` boundary.
    pub fn active_slot_count(&self) -> usize {
        self.slots.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    #[tokio::test]
    async fn sequential_calls_do_not_overlap() {
        let table = Arc::new(SessionLockTable::new());
        let counter = Arc::new(AtomicU32::new(0));
        let mut handles = Vec::new();
        for _ in 0..20 {
            let table = table.clone();
            let counter = counter.clone();
            handles.push(tokio::spawn(async move {
                table
                    .with_session_lock("ABCDEF", || async {
                        let before = counter.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(1)).await;
                        assert_eq!(counter.load(Ordering::SeqCst), before + 1);
                    })
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(counter.load(Ordering::SeqCst), 20);
    }

    #[tokio::test]
    async fn slot_is_collected_after_release() {
        let table = SessionLockTable::new();
        table.with_session_lock("ABCDEF", || async {}).await.unwrap();
        assert_eq!(table.active_slot_count(), 0);
    }

    #[tokio::test]
    async fn distinct_ids_do_not_contend() {
        let table = Arc::new(SessionLockTable::new());
        let a = table.with_session_lock("AAAAAA", || async { 1 });
        let b = table.with_session_lock("BBBBBB", || async { 2 });
        let (a, b) = tokio::join!(a, b);
        assert_eq!(a.unwrap(), 1);
        assert_eq!(b.unwrap(), 2);
    }
}

//! Per-session concurrency control (§5).
//!
//! At most one mutating operation runs per session at a time; operations on
//! distinct sessions never serialize against each other. Waiters queue in
//! FIFO order on a per-session `Semaphore(1)` — unlike a busy-reject scheme,
//! any number of callers may queue for the same session, matching the
//! actual requirement (§5 does not bound queue depth, only exclusivity).

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

pub struct SessionLockMap {
    locks: Mutex<HashMap<String, Arc<Semaphore>>>,
}

impl Default for SessionLockMap {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionLockMap {
    pub fn new() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Acquire exclusive access to `session_id`. Waits (FIFO) if another
    /// caller currently holds it; never rejects.
    pub async fn acquire(&self, session_id: &str) -> OwnedSemaphorePermit {
        let sem = {
            let mut locks = self.locks.lock();
            locks
                .entry(session_id.to_owned())
                .or_insert_with(|| Arc::new(Semaphore::new(1)))
                .clone()
        };
        sem.acquire_owned()
            .await
            .expect("session semaphore is never closed")
    }

    /// Number of sessions with an outstanding lock entry (monitoring only).
    pub fn session_count(&self) -> usize {
        self.locks.lock().len()
    }

    /// Drop lock entries for sessions with no holder and no waiter.
    pub fn prune_idle(&self) {
        let mut locks = self.locks.lock();
        locks.retain(|_, sem| sem.available_permits() == 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc as StdArc;

    #[tokio::test]
    async fn sequential_access() {
        let map = SessionLockMap::new();
        let p1 = map.acquire("s1").await;
        drop(p1);
        let p2 = map.acquire("s1").await;
        drop(p2);
    }

    #[tokio::test]
    async fn different_sessions_concurrent() {
        let map = StdArc::new(SessionLockMap::new());
        let p1 = map.acquire("s1").await;
        let p2 = map.acquire("s2").await;
        assert_eq!(map.session_count(), 2);
        drop(p1);
        drop(p2);
    }

    #[tokio::test]
    async fn same_session_waits() {
        let map = StdArc::new(SessionLockMap::new());
        let map2 = map.clone();

        let p1 = map.acquire("s1").await;
        let handle = tokio::spawn(async move {
            let _p2 = map2.acquire("s1").await;
            42
        });

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        drop(p1);

        let result = handle.await.unwrap();
        assert_eq!(result, 42);
    }

    #[tokio::test]
    async fn many_waiters_all_eventually_proceed() {
        let map = StdArc::new(SessionLockMap::new());
        let p1 = map.acquire("s1").await;

        let mut handles = Vec::new();
        for _ in 0..5 {
            let m = map.clone();
            handles.push(tokio::spawn(async move {
                let _p = m.acquire("s1").await;
            }));
        }
        tokio::time::sleep(std::time::Duration::from_millis(30)).await;
        drop(p1);
        for h in handles {
            h.await.unwrap();
        }
    }
}

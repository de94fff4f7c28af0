//! Session scheduler — per-session run exclusivity plus two admission
//! ceilings: a bounded FIFO queue depth per session, and an optional cap
//! on concurrently-active sessions process-wide.
//!
//! Built on the same one-semaphore-per-session idea as a lock map that
//! only ever allowed one queued waiter; here the queue depth is explicit
//! and configurable, and a second, optional global semaphore gates total
//! concurrency across all sessions.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use ag_domain::{Error, Result};
use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

struct SessionSlot {
    sem: Arc<Semaphore>,
    queued: AtomicUsize,
}

/// Holds both the per-session and (if configured) the global permit for
/// the duration of one turn. Dropping it releases both.
pub struct ScheduledPermit {
    _session: OwnedSemaphorePermit,
    _global: Option<OwnedSemaphorePermit>,
}

pub struct Scheduler {
    sessions: Mutex<HashMap<String, Arc<SessionSlot>>>,
    queue_depth: usize,
    global: Option<Arc<Semaphore>>,
}

impl Scheduler {
    pub fn new(queue_depth: usize, max_concurrent_sessions: Option<usize>) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            queue_depth,
            global: max_concurrent_sessions.map(|n| Arc::new(Semaphore::new(n))),
        }
    }

    /// Admit a turn for `session_key`. Blocks until both the per-session
    /// slot and (if configured) a global slot are available, unless the
    /// session's queue is already full or the global pool is saturated —
    /// those cases reject immediately rather than queueing further.
    pub async fn acquire(&self, session_key: &str) -> Result<ScheduledPermit> {
        let global = match &self.global {
            Some(sem) => match sem.clone().try_acquire_owned() {
                Ok(permit) => Some(permit),
                Err(_) => return Err(Error::Overloaded("max_concurrent_sessions reached".into())),
            },
            None => None,
        };

        let slot = {
            let mut sessions = self.sessions.lock();
            sessions
                .entry(session_key.to_owned())
                .or_insert_with(|| Arc::new(SessionSlot { sem: Arc::new(Semaphore::new(1)), queued: AtomicUsize::new(0) }))
                .clone()
        };

        let session_permit = match slot.sem.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                let queued = slot.queued.fetch_add(1, Ordering::SeqCst);
                if queued >= self.queue_depth {
                    slot.queued.fetch_sub(1, Ordering::SeqCst);
                    return Err(Error::SessionBusy(format!(
                        "session {session_key} queue is full ({} queued)",
                        self.queue_depth
                    )));
                }
                let result = slot.sem.clone().acquire_owned().await;
                slot.queued.fetch_sub(1, Ordering::SeqCst);
                result.map_err(|_| Error::SessionBusy(session_key.to_string()))?
            }
        };

        Ok(ScheduledPermit { _session: session_permit, _global: global })
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Drop tracking for sessions that are neither running nor queued.
    pub fn prune_idle(&self) {
        self.sessions.lock().retain(|_, slot| slot.sem.available_permits() == 0 || slot.queued.load(Ordering::SeqCst) > 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn sequential_access_same_session() {
        let scheduler = Scheduler::new(4, None);
        let p1 = scheduler.acquire("s1").await.unwrap();
        drop(p1);
        let p2 = scheduler.acquire("s1").await.unwrap();
        drop(p2);
    }

    #[tokio::test]
    async fn different_sessions_run_concurrently() {
        let scheduler = Scheduler::new(4, None);
        let p1 = scheduler.acquire("s1").await.unwrap();
        let p2 = scheduler.acquire("s2").await.unwrap();
        assert_eq!(scheduler.session_count(), 2);
        drop(p1);
        drop(p2);
    }

    #[tokio::test]
    async fn queue_depth_rejects_when_full() {
        let scheduler = Arc::new(Scheduler::new(1, None));
        let p1 = scheduler.acquire("s1").await.unwrap();

        let scheduler2 = scheduler.clone();
        let waiter = tokio::spawn(async move { scheduler2.acquire("s1").await });
        tokio::time::sleep(Duration::from_millis(20)).await;

        // Queue depth is 1 and already has a waiter; a third admission rejects.
        let rejected = scheduler.acquire("s1").await;
        assert!(rejected.is_err());

        drop(p1);
        assert!(waiter.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn global_cap_rejects_beyond_limit() {
        let scheduler = Scheduler::new(4, Some(1));
        let p1 = scheduler.acquire("s1").await.unwrap();
        let rejected = scheduler.acquire("s2").await;
        assert!(rejected.is_err());
        drop(p1);
        assert!(scheduler.acquire("s2").await.is_ok());
    }
}

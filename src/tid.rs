//! Dense thread identifiers.
//!
//! Hazard slots are indexed by a small integer unique to each live thread.
//! Ids come from a process-wide counter and are returned to a free list
//! when the thread exits, so long-running processes with thread churn keep
//! the id space dense. A thread's id is stable for its whole lifetime.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

static NEXT_TID: AtomicUsize = AtomicUsize::new(0);
static FREE_TIDS: Mutex<Vec<usize>> = Mutex::new(Vec::new());

struct ThreadId(usize);

impl ThreadId {
    fn acquire() -> Self {
        let mut free = FREE_TIDS
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(tid) = free.pop() {
            return Self(tid);
        }
        drop(free);
        Self(NEXT_TID.fetch_add(1, Ordering::Relaxed))
    }
}

impl Drop for ThreadId {
    fn drop(&mut self) {
        // The thread publishes no hazard between its last operation and
        // exit, so the id can be handed out again immediately.
        let mut free = FREE_TIDS
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        free.push(self.0);
    }
}

std::thread_local! {
    static THREAD_ID: ThreadId = ThreadId::acquire();
}

/// Dense id of the calling thread.
#[inline]
pub(crate) fn thread_id() -> usize {
    THREAD_ID.with(|t| t.0)
}

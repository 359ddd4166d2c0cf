/*!
 * Cooperative Cancellation
 *
 * A [`CancelToken`] is the interrupt channel between a controller and
 * threads blocked inside this crate's primitives. Blocking and timed
 * operations accept a token; when it fires they unblock promptly,
 * restore the invariants of whatever they were waiting on, and return
 * [`WaitError::Cancelled`](crate::core::errors::WaitError::Cancelled).
 *
 * # Design
 *
 * The token is a shared flag plus a registry of (wait queue, key) pairs
 * currently blocked under it. `cancel()` sets the flag and wakes every
 * registered parking spot; each waiter observes the flag on wake and
 * backs out through its primitive's cleanup path. Registration is
 * scoped: a [`CancelWatch`] guard removes its entry on drop, so the
 * registry only ever holds live waiters.
 */

use crate::park::WaitQueue;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};

struct Watcher {
    queue: Weak<WaitQueue>,
    key: u64,
}

#[derive(Default)]
struct WatcherTable {
    next_id: u64,
    entries: HashMap<u64, Watcher, ahash::RandomState>,
}

struct Inner {
    cancelled: AtomicBool,
    watchers: Mutex<WatcherTable>,
}

/// Cooperative cancellation signal for blocked operations
///
/// Cheap to clone; all clones observe the same state. A token cannot be
/// reset: once fired it stays fired, and a fresh token must be created
/// for the next unit of work.
///
/// # Examples
///
/// ```
/// use threadgate::{CancelToken, CountdownLatch, WaitError};
/// use std::sync::Arc;
///
/// let latch = Arc::new(CountdownLatch::new(1));
/// let cancel = CancelToken::new();
///
/// let waiter = {
///     let latch = Arc::clone(&latch);
///     let cancel = cancel.clone();
///     std::thread::spawn(move || latch.wait(&cancel))
/// };
///
/// cancel.cancel();
/// assert_eq!(waiter.join().unwrap(), Err(WaitError::Cancelled));
/// ```
#[derive(Clone)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

impl CancelToken {
    /// Create a token in the not-cancelled state
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                cancelled: AtomicBool::new(false),
                watchers: Mutex::new(WatcherTable::default()),
            }),
        }
    }

    /// A shared token that never fires, for callers that do not use
    /// cancellation
    pub fn ignored() -> &'static CancelToken {
        static IGNORED: OnceLock<CancelToken> = OnceLock::new();
        IGNORED.get_or_init(CancelToken::new)
    }

    /// True once `cancel` has been called on any clone
    #[inline]
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Return `Err(Cancelled)` if the token has fired.
    ///
    /// For cooperative checks at safe points in long computations.
    ///
    /// # Errors
    ///
    /// [`WaitError::Cancelled`] once the token has fired.
    #[inline]
    pub fn checkpoint(&self) -> crate::core::errors::WaitResult<()> {
        if self.is_cancelled() {
            Err(crate::core::errors::WaitError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Fire the token and wake every registered waiter.
    ///
    /// Idempotent; later calls are no-ops.
    pub fn cancel(&self) {
        if self.inner.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }

        // Snapshot then release the registry lock before unparking
        let targets: Vec<(Weak<WaitQueue>, u64)> = {
            let table = self.inner.watchers.lock();
            table
                .entries
                .values()
                .map(|w| (w.queue.clone(), w.key))
                .collect()
        };

        for (queue, key) in targets {
            if let Some(queue) = queue.upgrade() {
                queue.unpark_all(key);
            }
        }
    }

    /// Register a parked position with this token for the duration of
    /// the returned guard.
    ///
    /// Waiters register before their final cancelled-flag check, so a
    /// `cancel` racing with the park either aborts the park via that
    /// check or finds the registration and wakes the spot.
    pub fn watch(&self, queue: &Arc<WaitQueue>, key: u64) -> CancelWatch {
        let id = {
            let mut table = self.inner.watchers.lock();
            let id = table.next_id;
            table.next_id += 1;
            table.entries.insert(
                id,
                Watcher {
                    queue: Arc::downgrade(queue),
                    key,
                },
            );
            id
        };

        CancelWatch {
            token: self.clone(),
            id,
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .finish_non_exhaustive()
    }
}

/// Scoped registration of a waiter with a [`CancelToken`]
///
/// Dropping the guard removes the registration.
#[must_use = "the registration lasts only while the watch is held"]
pub struct CancelWatch {
    token: CancelToken,
    id: u64,
}

impl Drop for CancelWatch {
    fn drop(&mut self) {
        self.token.inner.watchers.lock().entries.remove(&self.id);
    }
}

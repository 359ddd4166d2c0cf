/*!
 * Countdown Latch
 *
 * One-shot gate that opens when its counter reaches zero and stays open
 * permanently. No reset: a new round needs a new latch.
 */

use crate::cancel::CancelToken;
use crate::core::errors::WaitResult;
use crate::park::{ParkConfig, WaitQueue};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

const GATE_KEY: u64 = 0;

/// One-shot descending counter gate
///
/// The counter is monotonically non-increasing; decrements below zero
/// saturate and are never an error.
///
/// # Examples
///
/// ```
/// use threadgate::{CancelToken, CountdownLatch};
/// use std::sync::Arc;
///
/// let ready = Arc::new(CountdownLatch::new(3));
///
/// let workers: Vec<_> = (0..3)
///     .map(|_| {
///         let ready = Arc::clone(&ready);
///         std::thread::spawn(move || ready.count_down())
///     })
///     .collect();
///
/// ready.wait(CancelToken::ignored()).unwrap();
/// assert_eq!(ready.count(), 0);
/// # for w in workers { w.join().unwrap(); }
/// ```
pub struct CountdownLatch {
    count: AtomicUsize,
    queue: Arc<WaitQueue>,
}

impl CountdownLatch {
    /// Create a latch that opens after `count` decrements.
    ///
    /// A latch created with 0 is already open.
    pub fn new(count: usize) -> Self {
        Self {
            count: AtomicUsize::new(count),
            queue: Arc::new(WaitQueue::new(ParkConfig::default())),
        }
    }

    /// Current counter value (advisory)
    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    /// True once the gate has opened
    pub fn is_open(&self) -> bool {
        self.count() == 0
    }

    /// Decrement the counter; the transition to zero opens the gate and
    /// releases every current and future waiter. Saturates at zero.
    pub fn count_down(&self) {
        let prev = self
            .count
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |c| c.checked_sub(1));
        if prev == Ok(1) {
            self.queue.unpark_all(GATE_KEY);
        }
    }

    /// Block until the gate opens. Returns immediately if it already has.
    ///
    /// # Errors
    ///
    /// [`WaitError::Cancelled`](crate::WaitError::Cancelled) if `cancel`
    /// fires while parked.
    pub fn wait(&self, cancel: &CancelToken) -> WaitResult<()> {
        WaitQueue::wait_while(&self.queue, GATE_KEY, None, cancel, || !self.is_open())
    }

    /// Block until the gate opens or `timeout` elapses.
    ///
    /// # Errors
    ///
    /// [`WaitError::Timeout`](crate::WaitError::Timeout) /
    /// [`WaitError::Cancelled`](crate::WaitError::Cancelled).
    pub fn wait_for(&self, timeout: Duration, cancel: &CancelToken) -> WaitResult<()> {
        WaitQueue::wait_while(
            &self.queue,
            GATE_KEY,
            Some(Instant::now() + timeout),
            cancel,
            || !self.is_open(),
        )
    }
}

impl std::fmt::Debug for CountdownLatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CountdownLatch")
            .field("count", &self.count())
            .finish_non_exhaustive()
    }
}

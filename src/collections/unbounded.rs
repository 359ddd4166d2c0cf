/*!
 * Unbounded Queue
 *
 * Lock-free MPMC queue with an optional blocking pop. Push never
 * blocks; consumers that prefer waiting over polling park on the
 * queue's item key.
 */

use crate::cancel::CancelToken;
use crate::core::errors::{WaitError, WaitResult};
use crate::park::{ParkConfig, WaitQueue};
use crossbeam_queue::SegQueue;
use std::sync::Arc;
use std::time::{Duration, Instant};

const ITEM_KEY: u64 = 0;

/// Unbounded lock-free FIFO with blocking consumers
///
/// # Examples
///
/// ```
/// use threadgate::UnboundedQueue;
///
/// let queue = UnboundedQueue::new();
/// queue.push(1);
/// queue.push(2);
/// assert_eq!(queue.try_pop(), Some(1));
/// assert_eq!(queue.try_pop(), Some(2));
/// assert_eq!(queue.try_pop(), None);
/// ```
pub struct UnboundedQueue<T> {
    inner: SegQueue<T>,
    queue: Arc<WaitQueue>,
}

impl<T: Send> UnboundedQueue<T> {
    /// Create an empty queue
    pub fn new() -> Self {
        Self {
            inner: SegQueue::new(),
            queue: Arc::new(WaitQueue::new(ParkConfig::default())),
        }
    }

    /// Enqueue; never blocks
    pub fn push(&self, item: T) {
        self.inner.push(item);
        self.queue.unpark_one(ITEM_KEY);
    }

    /// Dequeue without blocking
    pub fn try_pop(&self) -> Option<T> {
        self.inner.pop()
    }

    /// Dequeue, parking while the queue is empty.
    ///
    /// # Errors
    ///
    /// [`WaitError::Cancelled`] if `cancel` fires while parked.
    pub fn pop(&self, cancel: &CancelToken) -> WaitResult<T> {
        self.pop_inner(None, cancel)
    }

    /// Dequeue with a bound on the wait for an item.
    ///
    /// # Errors
    ///
    /// [`WaitError::Timeout`] / [`WaitError::Cancelled`].
    pub fn pop_for(&self, timeout: Duration, cancel: &CancelToken) -> WaitResult<T> {
        self.pop_inner(Some(Instant::now() + timeout), cancel)
    }

    /// Item count; advisory under concurrent use
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// True if no items are queued (advisory)
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    fn pop_inner(&self, deadline: Option<Instant>, cancel: &CancelToken) -> WaitResult<T> {
        if let Some(item) = self.inner.pop() {
            return Ok(item);
        }

        let _watch = cancel.watch(&self.queue, ITEM_KEY);
        loop {
            if let Some(item) = self.inner.pop() {
                return Ok(item);
            }
            if cancel.is_cancelled() {
                return Err(WaitError::Cancelled);
            }
            if let Some(d) = deadline {
                if Instant::now() >= d {
                    return Err(WaitError::Timeout);
                }
            }

            self.queue.park(ITEM_KEY, deadline, &mut || {
                self.inner.is_empty() && !cancel.is_cancelled()
            });
        }
    }
}

impl<T: Send> Default for UnboundedQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for UnboundedQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnboundedQueue")
            .field("len", &self.inner.len())
            .finish_non_exhaustive()
    }
}

/*!
 * Bounded Blocking Queue
 *
 * Fixed-capacity FIFO: `put` blocks while full, `take` blocks while
 * empty, with timed and non-blocking forms of each.
 *
 * # Design
 *
 * A mutex-guarded ring buffer plus two parking keys standing in for the
 * classic "not full" / "not empty" condition pair. Item order is exact
 * FIFO; wake order of blocked producers/consumers follows the parking
 * substrate's per-key FIFO, which is enough to prevent starvation.
 */

use crate::cancel::CancelToken;
use crate::core::errors::{WaitError, WaitResult};
use crate::park::{ParkConfig, WaitQueue};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

const NOT_FULL_KEY: u64 = 0;
const NOT_EMPTY_KEY: u64 = 1;

/// Why a put failed; carries the unqueued item back to the caller
#[derive(Error, Debug, PartialEq, Eq)]
pub enum PutError<T> {
    /// The queue stayed full past the bound
    #[error("queue put timed out")]
    Timeout(T),

    /// The caller's cancel token fired first
    #[error("queue put cancelled")]
    Cancelled(T),
}

struct Ring<T> {
    buf: Vec<Option<T>>,
    head: usize,
    len: usize,
}

impl<T> Ring<T> {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: (0..capacity).map(|_| None).collect(),
            head: 0,
            len: 0,
        }
    }

    fn push_back(&mut self, item: T) {
        debug_assert!(self.len < self.buf.len(), "ring overflow");
        let tail = (self.head + self.len) % self.buf.len();
        self.buf[tail] = Some(item);
        self.len += 1;
    }

    fn pop_front(&mut self) -> Option<T> {
        if self.len == 0 {
            return None;
        }
        let item = self.buf[self.head].take();
        debug_assert!(item.is_some(), "ring slot empty at head");
        self.head = (self.head + 1) % self.buf.len();
        self.len -= 1;
        item
    }
}

/// Fixed-capacity blocking FIFO
///
/// Size never exceeds capacity; items come out in exactly the order
/// they went in.
///
/// # Examples
///
/// ```
/// use threadgate::{BoundedQueue, CancelToken};
///
/// let queue = BoundedQueue::new(2);
/// queue.put(1, CancelToken::ignored()).unwrap();
/// queue.put(2, CancelToken::ignored()).unwrap();
/// assert_eq!(queue.try_put(3), Err(3)); // full
///
/// assert_eq!(queue.take(CancelToken::ignored()), Ok(1));
/// assert_eq!(queue.take(CancelToken::ignored()), Ok(2));
/// ```
pub struct BoundedQueue<T> {
    ring: parking_lot::Mutex<Ring<T>>,
    /// Mirror of the ring's length, maintained under the ring lock, so
    /// park validators can read it without locking
    size: AtomicUsize,
    capacity: usize,
    queue: Arc<WaitQueue>,
}

impl<T: Send> BoundedQueue<T> {
    /// Create a queue holding at most `capacity` items.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "queue requires a non-zero capacity");
        Self {
            ring: parking_lot::Mutex::new(Ring::with_capacity(capacity)),
            size: AtomicUsize::new(0),
            capacity,
            queue: Arc::new(WaitQueue::new(ParkConfig::default())),
        }
    }

    /// Maximum number of items the queue holds
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Current item count; advisory under concurrent use
    pub fn len(&self) -> usize {
        self.size.load(Ordering::SeqCst)
    }

    /// True if no items are queued (advisory)
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True if the queue is at capacity (advisory)
    pub fn is_full(&self) -> bool {
        self.len() == self.capacity
    }

    /// Enqueue, blocking while the queue is full.
    ///
    /// # Errors
    ///
    /// [`PutError::Cancelled`] (returning the item) if `cancel` fires
    /// while parked.
    pub fn put(&self, item: T, cancel: &CancelToken) -> Result<(), PutError<T>> {
        self.put_inner(item, None, cancel)
    }

    /// Enqueue with a bound on the wait for space.
    ///
    /// # Errors
    ///
    /// [`PutError::Timeout`] / [`PutError::Cancelled`], each returning
    /// the item.
    pub fn put_for(
        &self,
        item: T,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> Result<(), PutError<T>> {
        self.put_inner(item, Some(Instant::now() + timeout), cancel)
    }

    /// Enqueue without blocking; a full queue returns the item
    pub fn try_put(&self, item: T) -> Result<(), T> {
        {
            let mut ring = self.ring.lock();
            if ring.len >= self.capacity {
                return Err(item);
            }
            ring.push_back(item);
            self.size.store(ring.len, Ordering::SeqCst);
        }
        self.queue.unpark_one(NOT_EMPTY_KEY);
        Ok(())
    }

    /// Dequeue, blocking while the queue is empty.
    ///
    /// # Errors
    ///
    /// [`WaitError::Cancelled`] if `cancel` fires while parked.
    pub fn take(&self, cancel: &CancelToken) -> WaitResult<T> {
        self.take_inner(None, cancel)
    }

    /// Dequeue with a bound on the wait for an item.
    ///
    /// # Errors
    ///
    /// [`WaitError::Timeout`] / [`WaitError::Cancelled`].
    pub fn take_for(&self, timeout: Duration, cancel: &CancelToken) -> WaitResult<T> {
        self.take_inner(Some(Instant::now() + timeout), cancel)
    }

    /// Dequeue without blocking
    pub fn try_take(&self) -> Option<T> {
        let item = {
            let mut ring = self.ring.lock();
            let item = ring.pop_front();
            if item.is_some() {
                self.size.store(ring.len, Ordering::SeqCst);
            }
            item
        };
        if item.is_some() {
            self.queue.unpark_one(NOT_FULL_KEY);
        }
        item
    }

    fn put_inner(
        &self,
        item: T,
        deadline: Option<Instant>,
        cancel: &CancelToken,
    ) -> Result<(), PutError<T>> {
        let _watch = cancel.watch(&self.queue, NOT_FULL_KEY);
        loop {
            {
                let mut ring = self.ring.lock();
                if ring.len < self.capacity {
                    ring.push_back(item);
                    self.size.store(ring.len, Ordering::SeqCst);
                    drop(ring);
                    self.queue.unpark_one(NOT_EMPTY_KEY);
                    return Ok(());
                }
            }

            if cancel.is_cancelled() {
                return Err(PutError::Cancelled(item));
            }
            if let Some(d) = deadline {
                if Instant::now() >= d {
                    return Err(PutError::Timeout(item));
                }
            }

            self.queue.park(NOT_FULL_KEY, deadline, &mut || {
                self.size.load(Ordering::SeqCst) >= self.capacity && !cancel.is_cancelled()
            });
        }
    }

    fn take_inner(&self, deadline: Option<Instant>, cancel: &CancelToken) -> WaitResult<T> {
        let _watch = cancel.watch(&self.queue, NOT_EMPTY_KEY);
        loop {
            if let Some(item) = {
                let mut ring = self.ring.lock();
                let item = ring.pop_front();
                if item.is_some() {
                    self.size.store(ring.len, Ordering::SeqCst);
                }
                item
            } {
                self.queue.unpark_one(NOT_FULL_KEY);
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

            self.queue.park(NOT_EMPTY_KEY, deadline, &mut || {
                self.size.load(Ordering::SeqCst) == 0 && !cancel.is_cancelled()
            });
        }
    }
}

impl<T> std::fmt::Debug for BoundedQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundedQueue")
            .field("capacity", &self.capacity)
            .field("len", &self.ring.lock().len)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn fifo_order_preserved() {
        let queue = BoundedQueue::new(4);
        for i in 0..4 {
            queue.put(i, CancelToken::ignored()).unwrap();
        }
        for i in 0..4 {
            assert_eq!(queue.take(CancelToken::ignored()), Ok(i));
        }
    }

    #[test]
    fn second_put_blocks_until_take() {
        let queue = Arc::new(BoundedQueue::new(1));
        queue.put("x", CancelToken::ignored()).unwrap();

        let producer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.put("y", CancelToken::ignored()))
        };

        thread::sleep(Duration::from_millis(50));
        assert!(!producer.is_finished());
        assert_eq!(queue.len(), 1);

        assert_eq!(queue.take(CancelToken::ignored()), Ok("x"));
        producer.join().unwrap().unwrap();
        assert_eq!(queue.take(CancelToken::ignored()), Ok("y"));
    }

    #[test]
    fn size_never_exceeds_capacity() {
        const CAPACITY: usize = 4;
        const ITEMS: usize = 200;

        let queue = Arc::new(BoundedQueue::new(CAPACITY));

        let producers: Vec<_> = (0..2)
            .map(|p| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || {
                    for i in 0..ITEMS {
                        queue.put((p, i), CancelToken::ignored()).unwrap();
                        assert!(queue.len() <= CAPACITY);
                    }
                })
            })
            .collect();

        let consumers: Vec<_> = (0..2)
            .map(|_| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || {
                    for _ in 0..ITEMS {
                        queue.take(CancelToken::ignored()).unwrap();
                        assert!(queue.len() <= CAPACITY);
                    }
                })
            })
            .collect();

        for handle in producers.into_iter().chain(consumers) {
            handle.join().unwrap();
        }
        assert!(queue.is_empty());
    }

    #[test]
    fn per_producer_order_survives_contention() {
        const ITEMS: usize = 500;

        let queue = Arc::new(BoundedQueue::new(8));

        let producer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                for i in 0..ITEMS {
                    queue.put(i, CancelToken::ignored()).unwrap();
                }
            })
        };

        let mut last = None;
        for _ in 0..ITEMS {
            let item = queue.take(CancelToken::ignored()).unwrap();
            if let Some(prev) = last {
                assert!(item > prev, "FIFO violated: {item} after {prev}");
            }
            last = Some(item);
        }
        producer.join().unwrap();
    }

    #[test]
    fn timed_put_returns_item_when_full() {
        let queue = BoundedQueue::new(1);
        queue.put(1, CancelToken::ignored()).unwrap();

        let start = Instant::now();
        let result = queue.put_for(2, Duration::from_millis(50), CancelToken::ignored());
        assert_eq!(result, Err(PutError::Timeout(2)));
        assert!(start.elapsed() >= Duration::from_millis(50));

        // The failed put left the queue intact
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.take(CancelToken::ignored()), Ok(1));
    }

    #[test]
    fn timed_take_expires_when_empty() {
        let queue: BoundedQueue<u8> = BoundedQueue::new(1);
        assert_eq!(
            queue.take_for(Duration::from_millis(50), CancelToken::ignored()),
            Err(WaitError::Timeout)
        );
    }

    #[test]
    fn cancelled_take_unblocks() {
        let queue: Arc<BoundedQueue<u8>> = Arc::new(BoundedQueue::new(1));
        let cancel = CancelToken::new();

        let consumer = {
            let queue = Arc::clone(&queue);
            let cancel = cancel.clone();
            thread::spawn(move || queue.take(&cancel))
        };

        thread::sleep(Duration::from_millis(50));
        cancel.cancel();
        assert_eq!(consumer.join().unwrap(), Err(WaitError::Cancelled));

        // Queue still functional after the cancelled waiter backed out
        queue.put(9, CancelToken::ignored()).unwrap();
        assert_eq!(queue.try_take(), Some(9));
    }

    #[test]
    fn try_forms_never_block() {
        let queue = BoundedQueue::new(1);
        assert_eq!(queue.try_take(), None::<u8>);
        assert_eq!(queue.try_put(1), Ok(()));
        assert_eq!(queue.try_put(2), Err(2));
        assert_eq!(queue.try_take(), Some(1));
    }
}

/*!
 * Read/Write Lock
 *
 * Many concurrent readers XOR one writer.
 *
 * # Design
 *
 * One atomic word packs the reader count with a writer bit. Readers
 * enter through a CAS loop while no writer holds (and, in fair mode,
 * none is queued); writers CAS the whole word from zero. Fair mode is
 * writer-preference: once a writer queues, new readers park, so a
 * stream of readers cannot starve writers.
 */

use crate::cancel::CancelToken;
use crate::core::errors::{WaitError, WaitResult};
use crate::core::limits::MAX_READERS;
use crate::park::{ParkConfig, WaitQueue};
use std::cell::UnsafeCell;
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

const READER_KEY: u64 = 0;
const WRITER_KEY: u64 = 1;

const WRITER_BIT: u32 = 1 << 31;

/// Read/write lock around a value
///
/// # Examples
///
/// ```
/// use threadgate::{CancelToken, RwLock};
///
/// let lock = RwLock::new(5);
/// {
///     let r1 = lock.read(CancelToken::ignored()).unwrap();
///     let r2 = lock.read(CancelToken::ignored()).unwrap(); // readers coexist
///     assert_eq!(*r1 + *r2, 10);
/// }
/// *lock.write(CancelToken::ignored()).unwrap() = 6;
/// ```
pub struct RwLock<T> {
    /// Reader count | WRITER_BIT
    state: AtomicU32,
    /// Writers registered as waiting (gates readers in fair mode)
    queued_writers: AtomicU32,
    fair: bool,
    queue: Arc<WaitQueue>,
    data: UnsafeCell<T>,
}

unsafe impl<T: Send> Send for RwLock<T> {}
unsafe impl<T: Send + Sync> Sync for RwLock<T> {}

impl<T> RwLock<T> {
    /// Create a lock holding `value`; readers may barge past waiting
    /// writers
    pub fn new(value: T) -> Self {
        Self::build(value, false)
    }

    /// Create a writer-preference lock: queued writers block new readers
    pub fn fair(value: T) -> Self {
        Self::build(value, true)
    }

    fn build(value: T, fair: bool) -> Self {
        Self {
            state: AtomicU32::new(0),
            queued_writers: AtomicU32::new(0),
            fair,
            queue: Arc::new(WaitQueue::new(ParkConfig::default())),
            data: UnsafeCell::new(value),
        }
    }

    /// Number of threads currently holding read access (advisory)
    pub fn readers(&self) -> u32 {
        self.state.load(Ordering::SeqCst) & !WRITER_BIT
    }

    /// True while a writer holds the lock (advisory)
    pub fn is_write_locked(&self) -> bool {
        self.state.load(Ordering::SeqCst) & WRITER_BIT != 0
    }

    /// Direct access through exclusive ownership; no locking needed
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }

    /// Consume the lock, returning the value
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }

    // ---- read side ----

    /// Acquire shared access, blocking while a writer holds (or, in
    /// fair mode, waits).
    ///
    /// # Errors
    ///
    /// [`WaitError::Cancelled`] if `cancel` fires while parked.
    pub fn read(&self, cancel: &CancelToken) -> WaitResult<RwLockReadGuard<'_, T>> {
        self.read_inner(None, cancel)
    }

    /// Shared access with a bound on the wait.
    ///
    /// # Errors
    ///
    /// [`WaitError::Timeout`] / [`WaitError::Cancelled`].
    pub fn read_for(
        &self,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> WaitResult<RwLockReadGuard<'_, T>> {
        self.read_inner(Some(Instant::now() + timeout), cancel)
    }

    /// Shared access without blocking
    pub fn try_read(&self) -> Option<RwLockReadGuard<'_, T>> {
        self.try_enter_read().then(|| RwLockReadGuard {
            lock: self,
            _not_send: PhantomData,
        })
    }

    fn read_inner(
        &self,
        deadline: Option<Instant>,
        cancel: &CancelToken,
    ) -> WaitResult<RwLockReadGuard<'_, T>> {
        if !self.try_enter_read() {
            let _watch = cancel.watch(&self.queue, READER_KEY);
            loop {
                if self.try_enter_read() {
                    break;
                }
                if cancel.is_cancelled() {
                    return Err(WaitError::Cancelled);
                }
                if let Some(d) = deadline {
                    if Instant::now() >= d {
                        return Err(WaitError::Timeout);
                    }
                }
                self.queue.park(READER_KEY, deadline, &mut || {
                    !self.read_admissible() && !cancel.is_cancelled()
                });
            }
        }

        Ok(RwLockReadGuard {
            lock: self,
            _not_send: PhantomData,
        })
    }

    fn read_admissible(&self) -> bool {
        self.state.load(Ordering::SeqCst) & WRITER_BIT == 0
            && !(self.fair && self.queued_writers.load(Ordering::SeqCst) > 0)
    }

    fn try_enter_read(&self) -> bool {
        loop {
            if self.fair && self.queued_writers.load(Ordering::SeqCst) > 0 {
                return false;
            }
            let s = self.state.load(Ordering::SeqCst);
            if s & WRITER_BIT != 0 {
                return false;
            }
            assert!(s < MAX_READERS, "reader count overflow");
            if self
                .state
                .compare_exchange_weak(s, s + 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return true;
            }
        }
    }

    fn read_unlock(&self) {
        let prev = self.state.fetch_sub(1, Ordering::SeqCst);
        debug_assert!(prev & !WRITER_BIT > 0, "read_unlock without readers");
        if prev & !WRITER_BIT == 1 {
            // Last reader out: a writer may now enter
            self.queue.unpark_one(WRITER_KEY);
        }
    }

    // ---- write side ----

    /// Acquire exclusive access, blocking while readers or another
    /// writer hold.
    ///
    /// # Errors
    ///
    /// [`WaitError::Cancelled`] if `cancel` fires while parked.
    pub fn write(&self, cancel: &CancelToken) -> WaitResult<RwLockWriteGuard<'_, T>> {
        self.write_inner(None, cancel)
    }

    /// Exclusive access with a bound on the wait.
    ///
    /// # Errors
    ///
    /// [`WaitError::Timeout`] / [`WaitError::Cancelled`].
    pub fn write_for(
        &self,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> WaitResult<RwLockWriteGuard<'_, T>> {
        self.write_inner(Some(Instant::now() + timeout), cancel)
    }

    /// Exclusive access without blocking
    pub fn try_write(&self) -> Option<RwLockWriteGuard<'_, T>> {
        self.state
            .compare_exchange(0, WRITER_BIT, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
            .then(|| RwLockWriteGuard {
                lock: self,
                _not_send: PhantomData,
            })
    }

    fn write_inner(
        &self,
        deadline: Option<Instant>,
        cancel: &CancelToken,
    ) -> WaitResult<RwLockWriteGuard<'_, T>> {
        if self
            .state
            .compare_exchange(0, WRITER_BIT, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            self.queued_writers.fetch_add(1, Ordering::SeqCst);
            let _watch = cancel.watch(&self.queue, WRITER_KEY);
            loop {
                if self
                    .state
                    .compare_exchange(0, WRITER_BIT, Ordering::SeqCst, Ordering::SeqCst)
                    .is_ok()
                {
                    self.writer_dequeued();
                    break;
                }
                if cancel.is_cancelled() {
                    self.writer_dequeued();
                    return Err(WaitError::Cancelled);
                }
                if let Some(d) = deadline {
                    if Instant::now() >= d {
                        self.writer_dequeued();
                        return Err(WaitError::Timeout);
                    }
                }
                self.queue.park(WRITER_KEY, deadline, &mut || {
                    self.state.load(Ordering::SeqCst) != 0 && !cancel.is_cancelled()
                });
            }
        }

        Ok(RwLockWriteGuard {
            lock: self,
            _not_send: PhantomData,
        })
    }

    /// A queued writer acquired or gave up; in fair mode the last one
    /// leaving reopens the gate for parked readers.
    fn writer_dequeued(&self) {
        let prev = self.queued_writers.fetch_sub(1, Ordering::SeqCst);
        debug_assert!(prev > 0, "writer queue underflow");
        if self.fair && prev == 1 {
            self.queue.unpark_all(READER_KEY);
        }
    }

    fn write_unlock(&self) {
        self.state.store(0, Ordering::SeqCst);
        // Prefer a queued writer; otherwise release the reader herd
        if self.queued_writers.load(Ordering::SeqCst) > 0 {
            if !self.queue.unpark_one(WRITER_KEY).is_woken() {
                self.queue.unpark_all(READER_KEY);
            }
        } else {
            self.queue.unpark_all(READER_KEY);
        }
    }
}

impl<T: Default> Default for RwLock<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for RwLock<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.try_read() {
            Some(guard) => f.debug_struct("RwLock").field("data", &*guard).finish(),
            None => f.debug_struct("RwLock").field("data", &"<write locked>").finish(),
        }
    }
}

/// Shared access; releases on drop
#[must_use = "the read lock is released immediately if the guard is not held"]
pub struct RwLockReadGuard<'a, T> {
    lock: &'a RwLock<T>,
    _not_send: PhantomData<*const ()>,
}

impl<T> Deref for RwLockReadGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // Safety: the guard witnesses shared acquisition
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> Drop for RwLockReadGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.read_unlock();
    }
}

/// Exclusive access; releases on drop
#[must_use = "the write lock is released immediately if the guard is not held"]
pub struct RwLockWriteGuard<'a, T> {
    lock: &'a RwLock<T>,
    _not_send: PhantomData<*const ()>,
}

impl<T> Deref for RwLockWriteGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // Safety: the guard witnesses exclusive acquisition
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> DerefMut for RwLockWriteGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // Safety: the guard witnesses exclusive acquisition
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T> Drop for RwLockWriteGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.write_unlock();
    }
}

/*!
 * Reentrant Mutex
 *
 * Mutual exclusion that the owning thread may re-acquire. The owner and
 * a hold count ride alongside a [`RawMutex`]; the underlying lock is
 * taken once on first acquisition and released when the count returns
 * to zero.
 *
 * Thread identity uses a process-local token (a thread-local handed out
 * from a global counter) rather than `std::thread::ThreadId`, which has
 * no stable integer form to store in an atomic.
 */

use super::mutex::RawMutex;
use crate::cancel::CancelToken;
use crate::core::errors::WaitResult;
use std::cell::UnsafeCell;
use std::marker::PhantomData;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

static NEXT_THREAD_TOKEN: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static THREAD_TOKEN: u64 = NEXT_THREAD_TOKEN.fetch_add(1, Ordering::Relaxed);
}

/// Non-zero token identifying the calling thread
fn current_thread_token() -> u64 {
    THREAD_TOKEN.with(|t| *t)
}

/// Owner slot value while no thread holds the lock
const NO_OWNER: u64 = 0;

/// Mutex the owning thread may acquire again without deadlocking
///
/// Hold count > 0 implies the lock is held and `owner` names the holder;
/// only when the count returns to 0 is the lock released to others.
/// Guards expose `&T` only: with reentrancy, two live guards on the
/// owning thread would otherwise alias a `&mut`.
///
/// # Examples
///
/// ```
/// use threadgate::{CancelToken, lock::ReentrantMutex};
///
/// let lock = ReentrantMutex::new(5);
/// let outer = lock.lock(CancelToken::ignored()).unwrap();
/// let inner = lock.lock(CancelToken::ignored()).unwrap(); // same thread: no deadlock
/// assert_eq!(*outer + *inner, 10);
/// ```
pub struct ReentrantMutex<T> {
    raw: RawMutex,
    owner: AtomicU64,
    /// Mutated only by the owning thread
    holds: AtomicUsize,
    data: UnsafeCell<T>,
}

unsafe impl<T: Send> Send for ReentrantMutex<T> {}
unsafe impl<T: Send> Sync for ReentrantMutex<T> {}

impl<T> ReentrantMutex<T> {
    /// Create an unlocked reentrant mutex holding `value`
    pub fn new(value: T) -> Self {
        Self {
            raw: RawMutex::new(false),
            owner: AtomicU64::new(NO_OWNER),
            holds: AtomicUsize::new(0),
            data: UnsafeCell::new(value),
        }
    }

    /// Acquire, blocking until available. Re-acquisition by the current
    /// owner returns immediately with the hold count bumped.
    ///
    /// # Errors
    ///
    /// [`WaitError::Cancelled`](crate::WaitError::Cancelled) if `cancel`
    /// fires while parked.
    pub fn lock(&self, cancel: &CancelToken) -> WaitResult<ReentrantMutexGuard<'_, T>> {
        self.lock_inner(None, cancel)
    }

    /// Acquire with a bound on the wait.
    ///
    /// # Errors
    ///
    /// [`WaitError::Timeout`](crate::WaitError::Timeout) /
    /// [`WaitError::Cancelled`](crate::WaitError::Cancelled).
    pub fn lock_for(
        &self,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> WaitResult<ReentrantMutexGuard<'_, T>> {
        self.lock_inner(Some(Instant::now() + timeout), cancel)
    }

    /// Acquire without blocking
    pub fn try_lock(&self) -> Option<ReentrantMutexGuard<'_, T>> {
        let me = current_thread_token();
        if self.owner.load(Ordering::SeqCst) == me {
            self.holds.fetch_add(1, Ordering::Relaxed);
            return Some(self.guard());
        }
        if !self.raw.try_lock() {
            return None;
        }
        self.adopt(me);
        Some(self.guard())
    }

    /// True if the calling thread currently owns the lock
    pub fn is_owned_by_current_thread(&self) -> bool {
        self.owner.load(Ordering::SeqCst) == current_thread_token()
    }

    /// Current hold count of the owning thread (advisory)
    pub fn hold_count(&self) -> usize {
        self.holds.load(Ordering::SeqCst)
    }

    /// Direct access through exclusive ownership; no locking needed
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }

    /// Consume the mutex, returning the value
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }

    fn lock_inner(
        &self,
        deadline: Option<Instant>,
        cancel: &CancelToken,
    ) -> WaitResult<ReentrantMutexGuard<'_, T>> {
        let me = current_thread_token();
        if self.owner.load(Ordering::SeqCst) == me {
            self.holds.fetch_add(1, Ordering::Relaxed);
            return Ok(self.guard());
        }

        self.raw.lock(deadline, cancel)?;
        self.adopt(me);
        Ok(self.guard())
    }

    fn adopt(&self, me: u64) {
        self.owner.store(me, Ordering::SeqCst);
        self.holds.store(1, Ordering::Relaxed);
    }

    fn guard(&self) -> ReentrantMutexGuard<'_, T> {
        ReentrantMutexGuard {
            mutex: self,
            _not_send: PhantomData,
        }
    }

    fn release_one(&self) {
        if self.holds.fetch_sub(1, Ordering::Relaxed) == 1 {
            self.owner.store(NO_OWNER, Ordering::SeqCst);
            self.raw.unlock();
        }
    }
}

impl<T: Default> Default for ReentrantMutex<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

/// Releases one hold of the reentrant mutex when dropped
#[must_use = "the hold is released immediately if the guard is not held"]
pub struct ReentrantMutexGuard<'a, T> {
    mutex: &'a ReentrantMutex<T>,
    _not_send: PhantomData<*const ()>,
}

impl<T> Deref for ReentrantMutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // Safety: the owning thread holds the lock for the guard's lifetime
        unsafe { &*self.mutex.data.get() }
    }
}

impl<T> Drop for ReentrantMutexGuard<'_, T> {
    fn drop(&mut self) {
        self.mutex.release_one();
    }
}

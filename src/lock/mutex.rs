/*!
 * Mutex
 *
 * Mutual exclusion with a lock-free fast path.
 *
 * # Design
 *
 * The barging (default) mode is a single CAS from unlocked to locked;
 * contended callers park on the lock word and race again on wake,
 * trading arrival order for throughput. The fair mode hands the lock
 * directly to the longest-waiting ticket, trading throughput for
 * latency fairness.
 */

use crate::cancel::CancelToken;
use crate::core::errors::{WaitError, WaitResult};
use crate::park::{ParkConfig, WaitQueue};
use std::cell::UnsafeCell;
use std::collections::VecDeque;
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Parking key for the barging mode's single lock word
const LOCK_KEY: u64 = 0;

const UNLOCKED: u32 = 0;
const LOCKED: u32 = 1;

struct FairWaiter {
    ticket: u64,
    granted: Arc<AtomicBool>,
}

struct FairState {
    /// True while some thread owns the lock, including a grantee that
    /// has not observed its handoff yet
    held: bool,
    waiters: VecDeque<FairWaiter>,
    next_ticket: u64,
}

enum RawInner {
    /// Lock word only; waiters race on wake
    Barging { state: AtomicU32 },
    /// Explicit FIFO queue with direct handoff
    Fair { state: parking_lot::Mutex<FairState> },
}

/// Untyped mutex; the state machine under [`Mutex`]
///
/// Exposed for building primitives that manage their own data layout.
/// `unlock` panics if the mutex is not held.
pub struct RawMutex {
    inner: RawInner,
    queue: Arc<WaitQueue>,
}

impl RawMutex {
    /// Create an unlocked raw mutex
    pub fn new(fair: bool) -> Self {
        let (inner, config) = if fair {
            (
                RawInner::Fair {
                    state: parking_lot::Mutex::new(FairState {
                        held: false,
                        waiters: VecDeque::new(),
                        next_ticket: 1,
                    }),
                },
                // One parking key per ticket
                ParkConfig::keyed(),
            )
        } else {
            (
                RawInner::Barging {
                    state: AtomicU32::new(UNLOCKED),
                },
                ParkConfig::default(),
            )
        };

        Self {
            inner,
            queue: Arc::new(WaitQueue::new(config)),
        }
    }

    /// True while some thread holds the lock
    pub fn is_locked(&self) -> bool {
        match &self.inner {
            RawInner::Barging { state } => state.load(Ordering::SeqCst) == LOCKED,
            RawInner::Fair { state } => state.lock().held,
        }
    }

    /// Acquire without blocking. Fair mode refuses to barge past queued
    /// waiters.
    pub fn try_lock(&self) -> bool {
        match &self.inner {
            RawInner::Barging { state } => state
                .compare_exchange(UNLOCKED, LOCKED, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok(),
            RawInner::Fair { state } => {
                let mut st = state.lock();
                if st.held || !st.waiters.is_empty() {
                    return false;
                }
                st.held = true;
                true
            }
        }
    }

    /// Acquire, parking until the lock is free, `deadline` passes, or
    /// `cancel` fires.
    ///
    /// # Errors
    ///
    /// [`WaitError::Timeout`] / [`WaitError::Cancelled`]; on either, the
    /// caller holds nothing and the lock state is fully restored.
    pub fn lock(&self, deadline: Option<Instant>, cancel: &CancelToken) -> WaitResult<()> {
        match &self.inner {
            RawInner::Barging { state } => self.lock_barging(state, deadline, cancel),
            RawInner::Fair { state } => self.lock_fair(state, deadline, cancel),
        }
    }

    fn lock_barging(
        &self,
        state: &AtomicU32,
        deadline: Option<Instant>,
        cancel: &CancelToken,
    ) -> WaitResult<()> {
        if state
            .compare_exchange(UNLOCKED, LOCKED, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            return Ok(());
        }

        let _watch = cancel.watch(&self.queue, LOCK_KEY);
        loop {
            if state
                .compare_exchange(UNLOCKED, LOCKED, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return Ok(());
            }
            if cancel.is_cancelled() {
                return Err(WaitError::Cancelled);
            }
            if let Some(d) = deadline {
                if Instant::now() >= d {
                    return Err(WaitError::Timeout);
                }
            }

            self.queue.park(LOCK_KEY, deadline, &mut || {
                state.load(Ordering::SeqCst) == LOCKED && !cancel.is_cancelled()
            });
        }
    }

    fn lock_fair(
        &self,
        state: &parking_lot::Mutex<FairState>,
        deadline: Option<Instant>,
        cancel: &CancelToken,
    ) -> WaitResult<()> {
        let (ticket, granted) = {
            let mut st = state.lock();
            if !st.held && st.waiters.is_empty() {
                st.held = true;
                return Ok(());
            }
            let ticket = st.next_ticket;
            st.next_ticket += 1;
            let granted = Arc::new(AtomicBool::new(false));
            st.waiters.push_back(FairWaiter {
                ticket,
                granted: Arc::clone(&granted),
            });
            (ticket, granted)
        };

        let _watch = cancel.watch(&self.queue, ticket);
        loop {
            if granted.load(Ordering::SeqCst) {
                return Ok(());
            }

            let timed_out = deadline.is_some_and(|d| Instant::now() >= d);
            if cancel.is_cancelled() || timed_out {
                let mut st = state.lock();
                if granted.load(Ordering::SeqCst) {
                    // The handoff won the race; we own the lock after all
                    drop(st);
                    return Ok(());
                }
                st.waiters.retain(|w| w.ticket != ticket);
                drop(st);
                return Err(if cancel.is_cancelled() {
                    WaitError::Cancelled
                } else {
                    WaitError::Timeout
                });
            }

            self.queue.park(ticket, deadline, &mut || {
                !granted.load(Ordering::SeqCst) && !cancel.is_cancelled()
            });
        }
    }

    /// Release the lock and wake one waiter.
    ///
    /// # Panics
    ///
    /// Panics if the mutex is not held: unlocking a lock the caller
    /// never acquired is a programming error, not a recoverable state.
    pub fn unlock(&self) {
        match &self.inner {
            RawInner::Barging { state } => {
                let prev = state.swap(UNLOCKED, Ordering::SeqCst);
                assert!(prev == LOCKED, "unlock of an unheld mutex");
                self.queue.unpark_one(LOCK_KEY);
            }
            RawInner::Fair { state } => {
                let handoff = {
                    let mut st = state.lock();
                    assert!(st.held, "unlock of an unheld mutex");
                    match st.waiters.pop_front() {
                        Some(w) => {
                            // Direct handoff: held stays true for the grantee
                            w.granted.store(true, Ordering::SeqCst);
                            Some(w.ticket)
                        }
                        None => {
                            st.held = false;
                            None
                        }
                    }
                };
                if let Some(ticket) = handoff {
                    self.queue.unpark_one(ticket);
                }
            }
        }
    }
}

/// Mutual-exclusion lock around a value
///
/// # Fairness
///
/// [`Mutex::new`] builds the barging variant (throughput); [`Mutex::fair`]
/// serves waiters strictly in arrival order.
///
/// # Examples
///
/// ```
/// use threadgate::{CancelToken, Mutex};
///
/// let counter = Mutex::new(0u64);
/// {
///     let mut guard = counter.lock(CancelToken::ignored()).unwrap();
///     *guard += 1;
/// } // unlocked here
/// assert_eq!(*counter.lock(CancelToken::ignored()).unwrap(), 1);
/// ```
pub struct Mutex<T> {
    raw: RawMutex,
    data: UnsafeCell<T>,
}

unsafe impl<T: Send> Send for Mutex<T> {}
unsafe impl<T: Send> Sync for Mutex<T> {}

impl<T> Mutex<T> {
    /// Create a barging mutex holding `value`
    pub fn new(value: T) -> Self {
        Self {
            raw: RawMutex::new(false),
            data: UnsafeCell::new(value),
        }
    }

    /// Create a FIFO-fair mutex holding `value`
    pub fn fair(value: T) -> Self {
        Self {
            raw: RawMutex::new(true),
            data: UnsafeCell::new(value),
        }
    }

    /// Acquire, blocking until available.
    ///
    /// # Errors
    ///
    /// [`WaitError::Cancelled`] if `cancel` fires while parked.
    pub fn lock(&self, cancel: &CancelToken) -> WaitResult<MutexGuard<'_, T>> {
        self.raw.lock(None, cancel)?;
        Ok(self.guard())
    }

    /// Acquire with a bound on the wait.
    ///
    /// # Errors
    ///
    /// [`WaitError::Timeout`] / [`WaitError::Cancelled`].
    pub fn lock_for(
        &self,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> WaitResult<MutexGuard<'_, T>> {
        self.lock_until(Instant::now() + timeout, cancel)
    }

    /// Acquire with a deadline.
    ///
    /// # Errors
    ///
    /// [`WaitError::Timeout`] / [`WaitError::Cancelled`].
    pub fn lock_until(
        &self,
        deadline: Instant,
        cancel: &CancelToken,
    ) -> WaitResult<MutexGuard<'_, T>> {
        self.raw.lock(Some(deadline), cancel)?;
        Ok(self.guard())
    }

    /// Acquire without blocking
    pub fn try_lock(&self) -> Option<MutexGuard<'_, T>> {
        self.raw.try_lock().then(|| self.guard())
    }

    /// True while some thread holds the lock (advisory under contention)
    pub fn is_locked(&self) -> bool {
        self.raw.is_locked()
    }

    /// Direct access through exclusive ownership; no locking needed
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }

    /// Consume the mutex, returning the value
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }

    fn guard(&self) -> MutexGuard<'_, T> {
        MutexGuard {
            mutex: self,
            _not_send: PhantomData,
        }
    }
}

impl<T: Default> Default for Mutex<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Mutex<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.try_lock() {
            Some(guard) => f.debug_struct("Mutex").field("data", &*guard).finish(),
            None => f.debug_struct("Mutex").field("data", &"<locked>").finish(),
        }
    }
}

/// Releases the mutex when dropped
#[must_use = "the lock is released immediately if the guard is not held"]
pub struct MutexGuard<'a, T> {
    mutex: &'a Mutex<T>,
    _not_send: PhantomData<*const ()>,
}

impl<T> Deref for MutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // Safety: the guard witnesses exclusive acquisition
        unsafe { &*self.mutex.data.get() }
    }
}

impl<T> DerefMut for MutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // Safety: the guard witnesses exclusive acquisition
        unsafe { &mut *self.mutex.data.get() }
    }
}

impl<T> Drop for MutexGuard<'_, T> {
    fn drop(&mut self) {
        self.mutex.raw.unlock();
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for MutexGuard<'_, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(&**self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64;
    use std::thread;

    #[test]
    fn lock_and_release() {
        let mutex = Mutex::new(42);
        {
            let mut guard = mutex.lock(CancelToken::ignored()).unwrap();
            assert!(mutex.is_locked());
            *guard = 100;
        }
        assert!(!mutex.is_locked());
        assert_eq!(*mutex.lock(CancelToken::ignored()).unwrap(), 100);
    }

    #[test]
    fn try_lock_fails_while_held() {
        let mutex = Mutex::new(0);
        let _guard = mutex.lock(CancelToken::ignored()).unwrap();
        assert!(mutex.try_lock().is_none());
    }

    #[test]
    fn lock_for_times_out_while_held() {
        let mutex = Arc::new(Mutex::new(0));
        let guard = mutex.lock(CancelToken::ignored()).unwrap();

        let contender = {
            let mutex = Arc::clone(&mutex);
            thread::spawn(move || {
                mutex.lock_for(Duration::from_millis(50), CancelToken::ignored())
                    .map(|_| ())
            })
        };

        assert_eq!(contender.join().unwrap(), Err(WaitError::Timeout));
        drop(guard);
        assert!(mutex.try_lock().is_some());
    }

    #[test]
    fn cancelled_waiter_leaves_lock_usable() {
        let mutex = Arc::new(Mutex::new(0));
        let cancel = CancelToken::new();
        let guard = mutex.lock(CancelToken::ignored()).unwrap();

        let contender = {
            let mutex = Arc::clone(&mutex);
            let cancel = cancel.clone();
            thread::spawn(move || mutex.lock(&cancel).map(|_| ()))
        };

        thread::sleep(Duration::from_millis(50));
        cancel.cancel();
        assert_eq!(contender.join().unwrap(), Err(WaitError::Cancelled));

        drop(guard);
        assert!(mutex.try_lock().is_some());
    }

    #[test]
    #[should_panic(expected = "unlock of an unheld mutex")]
    fn raw_unlock_of_unheld_panics() {
        let raw = RawMutex::new(false);
        raw.unlock();
    }

    fn contention_counts(mutex: Arc<Mutex<u64>>) {
        const THREADS: usize = 8;
        const PER_THREAD: u64 = 1_000;

        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let mutex = Arc::clone(&mutex);
                thread::spawn(move || {
                    for _ in 0..PER_THREAD {
                        let mut guard = mutex.lock(CancelToken::ignored()).unwrap();
                        *guard += 1;
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(
            *mutex.lock(CancelToken::ignored()).unwrap(),
            THREADS as u64 * PER_THREAD
        );
    }

    #[test]
    fn contention_correctness_barging() {
        contention_counts(Arc::new(Mutex::new(0)));
    }

    #[test]
    fn contention_correctness_fair() {
        contention_counts(Arc::new(Mutex::fair(0)));
    }

    #[test]
    fn mutual_exclusion_verified() {
        const THREADS: usize = 4;
        const ITERATIONS: usize = 500;

        let mutex = Arc::new(Mutex::new(()));
        let active = Arc::new(AtomicU64::new(0));
        let max_active = Arc::new(AtomicU64::new(0));

        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let mutex = Arc::clone(&mutex);
                let active = Arc::clone(&active);
                let max_active = Arc::clone(&max_active);
                thread::spawn(move || {
                    for _ in 0..ITERATIONS {
                        let _guard = mutex.lock(CancelToken::ignored()).unwrap();
                        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                        max_active.fetch_max(now, Ordering::SeqCst);
                        std::hint::spin_loop();
                        active.fetch_sub(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(max_active.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn fair_mode_serves_in_arrival_order() {
        let mutex = Arc::new(Mutex::fair(Vec::new()));
        let guard = mutex.lock(CancelToken::ignored()).unwrap();

        let handles: Vec<_> = (0..4u32)
            .map(|i| {
                let mutex = Arc::clone(&mutex);
                let handle = thread::spawn(move || {
                    mutex.lock(CancelToken::ignored()).unwrap().push(i);
                });
                // Stagger arrivals so queue order is deterministic
                thread::sleep(Duration::from_millis(30));
                handle
            })
            .collect();

        drop(guard);
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(*mutex.lock(CancelToken::ignored()).unwrap(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn get_mut_and_into_inner() {
        let mut mutex = Mutex::new(1);
        *mutex.get_mut() = 2;
        assert_eq!(mutex.into_inner(), 2);
    }
}

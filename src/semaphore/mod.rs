/*!
 * Counting Semaphore
 *
 * A permit store with blocking, non-blocking, and timed acquisition.
 *
 * # Design
 *
 * The barging (default) mode keeps permits in one atomic word; a newly
 * arriving caller may take a fresh permit ahead of a parked waiter,
 * trading arrival order for throughput. The fair mode queues waiters
 * with tickets and grants strictly from the front, so `Semaphore::fair`
 * serves in arrival order even for multi-permit requests.
 *
 * Permits are RAII: dropping a [`SemaphorePermit`] returns its permits.
 * [`SemaphorePermit::forget`] leaks them deliberately, and
 * [`Semaphore::add_permits`] mints new ones, so capacity can be resized
 * at runtime the way a release-without-acquire does.
 */

use crate::cancel::CancelToken;
use crate::core::errors::{WaitError, WaitResult};
use crate::park::{ParkConfig, WaitQueue};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Parking key for the barging mode's shared permit word
const PERMIT_KEY: u64 = 0;

struct FairWaiter {
    ticket: u64,
    need: usize,
    granted: Arc<AtomicBool>,
}

struct FairState {
    permits: usize,
    waiters: VecDeque<FairWaiter>,
    next_ticket: u64,
}

enum Inner {
    Barging { permits: AtomicUsize },
    Fair { state: parking_lot::Mutex<FairState> },
}

/// Counting semaphore
///
/// The permit count never goes negative; acquisition blocks while the
/// requested permits are unavailable.
///
/// # Examples
///
/// ```
/// use threadgate::{CancelToken, Semaphore};
///
/// let sem = Semaphore::new(2);
/// let a = sem.try_acquire().unwrap();
/// let _b = sem.try_acquire().unwrap();
/// assert!(sem.try_acquire().is_none()); // both permits out
///
/// drop(a); // one returns
/// assert!(sem.try_acquire().is_some());
/// ```
pub struct Semaphore {
    inner: Inner,
    queue: Arc<WaitQueue>,
}

impl Semaphore {
    /// Create a barging semaphore with `permits` permits
    pub fn new(permits: usize) -> Self {
        Self {
            inner: Inner::Barging {
                permits: AtomicUsize::new(permits),
            },
            queue: Arc::new(WaitQueue::new(ParkConfig::default())),
        }
    }

    /// Create a FIFO-fair semaphore with `permits` permits
    pub fn fair(permits: usize) -> Self {
        Self {
            inner: Inner::Fair {
                state: parking_lot::Mutex::new(FairState {
                    permits,
                    waiters: VecDeque::new(),
                    next_ticket: 1,
                }),
            },
            queue: Arc::new(WaitQueue::new(ParkConfig::keyed())),
        }
    }

    /// Snapshot of the free permit count; may be stale immediately
    /// under contention.
    pub fn available_permits(&self) -> usize {
        match &self.inner {
            Inner::Barging { permits } => permits.load(Ordering::SeqCst),
            Inner::Fair { state } => state.lock().permits,
        }
    }

    /// Mint `n` fresh permits and wake waiters they can satisfy
    pub fn add_permits(&self, n: usize) {
        if n == 0 {
            return;
        }
        match &self.inner {
            Inner::Barging { permits } => {
                permits.fetch_add(n, Ordering::SeqCst);
                // Waiters have heterogeneous needs: wake the herd and
                // let the acquire loops sort out who proceeds
                self.queue.unpark_all(PERMIT_KEY);
            }
            Inner::Fair { state } => {
                let woken = {
                    let mut st = state.lock();
                    st.permits += n;
                    Self::drain_grantable(&mut st)
                };
                for ticket in woken {
                    self.queue.unpark_one(ticket);
                }
            }
        }
    }

    /// Grant queued waiters from the front while permits last
    fn drain_grantable(st: &mut FairState) -> Vec<u64> {
        let mut woken = Vec::new();
        while let Some(front) = st.waiters.front() {
            if front.need > st.permits {
                break;
            }
            let w = st.waiters.pop_front().expect("front exists");
            st.permits -= w.need;
            w.granted.store(true, Ordering::SeqCst);
            woken.push(w.ticket);
        }
        woken
    }

    /// Acquire one permit, blocking until available.
    ///
    /// # Errors
    ///
    /// [`WaitError::Cancelled`] if `cancel` fires while parked.
    pub fn acquire(&self, cancel: &CancelToken) -> WaitResult<SemaphorePermit<'_>> {
        self.acquire_many(1, cancel)
    }

    /// Acquire `n` permits atomically, blocking until available.
    ///
    /// # Errors
    ///
    /// [`WaitError::Cancelled`] if `cancel` fires while parked.
    pub fn acquire_many(&self, n: usize, cancel: &CancelToken) -> WaitResult<SemaphorePermit<'_>> {
        self.acquire_inner(n, None, cancel)
    }

    /// Acquire one permit with a bound on the wait.
    ///
    /// # Errors
    ///
    /// [`WaitError::Timeout`] / [`WaitError::Cancelled`].
    pub fn acquire_for(
        &self,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> WaitResult<SemaphorePermit<'_>> {
        self.acquire_inner(1, Some(Instant::now() + timeout), cancel)
    }

    /// Acquire `n` permits with a bound on the wait.
    ///
    /// # Errors
    ///
    /// [`WaitError::Timeout`] / [`WaitError::Cancelled`].
    pub fn acquire_many_for(
        &self,
        n: usize,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> WaitResult<SemaphorePermit<'_>> {
        self.acquire_inner(n, Some(Instant::now() + timeout), cancel)
    }

    /// Acquire one permit without blocking
    pub fn try_acquire(&self) -> Option<SemaphorePermit<'_>> {
        self.try_acquire_many(1)
    }

    /// Acquire `n` permits without blocking. Fair mode refuses to barge
    /// past queued waiters.
    pub fn try_acquire_many(&self, n: usize) -> Option<SemaphorePermit<'_>> {
        let taken = match &self.inner {
            Inner::Barging { permits } => Self::try_take(permits, n),
            Inner::Fair { state } => {
                let mut st = state.lock();
                if st.waiters.is_empty() && st.permits >= n {
                    st.permits -= n;
                    true
                } else {
                    false
                }
            }
        };
        taken.then_some(SemaphorePermit {
            semaphore: self,
            count: n,
        })
    }

    fn try_take(permits: &AtomicUsize, n: usize) -> bool {
        let mut current = permits.load(Ordering::SeqCst);
        loop {
            if current < n {
                return false;
            }
            match permits.compare_exchange_weak(
                current,
                current - n,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    fn acquire_inner(
        &self,
        n: usize,
        deadline: Option<Instant>,
        cancel: &CancelToken,
    ) -> WaitResult<SemaphorePermit<'_>> {
        match &self.inner {
            Inner::Barging { permits } => {
                if !Self::try_take(permits, n) {
                    let _watch = cancel.watch(&self.queue, PERMIT_KEY);
                    loop {
                        if Self::try_take(permits, n) {
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
                        self.queue.park(PERMIT_KEY, deadline, &mut || {
                            permits.load(Ordering::SeqCst) < n && !cancel.is_cancelled()
                        });
                    }
                }
            }
            Inner::Fair { state } => self.acquire_fair(state, n, deadline, cancel)?,
        }

        Ok(SemaphorePermit {
            semaphore: self,
            count: n,
        })
    }

    fn acquire_fair(
        &self,
        state: &parking_lot::Mutex<FairState>,
        n: usize,
        deadline: Option<Instant>,
        cancel: &CancelToken,
    ) -> WaitResult<()> {
        let (ticket, granted) = {
            let mut st = state.lock();
            if st.waiters.is_empty() && st.permits >= n {
                st.permits -= n;
                return Ok(());
            }
            let ticket = st.next_ticket;
            st.next_ticket += 1;
            let granted = Arc::new(AtomicBool::new(false));
            st.waiters.push_back(FairWaiter {
                ticket,
                need: n,
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
                let woken = {
                    let mut st = state.lock();
                    if granted.load(Ordering::SeqCst) {
                        // Grant won the race: the permits are ours
                        drop(st);
                        return Ok(());
                    }
                    st.waiters.retain(|w| w.ticket != ticket);
                    // Our departure may unblock smaller requests behind us
                    Self::drain_grantable(&mut st)
                };
                for t in woken {
                    self.queue.unpark_one(t);
                }
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
}

impl std::fmt::Debug for Semaphore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Semaphore")
            .field("available", &self.available_permits())
            .finish_non_exhaustive()
    }
}

/// Permits held from a [`Semaphore`]; returned on drop
#[must_use = "permits return to the semaphore immediately if not held"]
pub struct SemaphorePermit<'a> {
    semaphore: &'a Semaphore,
    count: usize,
}

impl SemaphorePermit<'_> {
    /// Number of permits this handle holds
    pub fn count(&self) -> usize {
        self.count
    }

    /// Leak the permits: they are never returned to the semaphore
    pub fn forget(mut self) {
        self.count = 0;
    }
}

impl Drop for SemaphorePermit<'_> {
    fn drop(&mut self) {
        if self.count > 0 {
            self.semaphore.add_permits(self.count);
        }
    }
}

impl std::fmt::Debug for SemaphorePermit<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SemaphorePermit")
            .field("count", &self.count)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn permits_bound_concurrency() {
        let sem = Semaphore::new(2);

        let a = sem.try_acquire().unwrap();
        let b = sem.try_acquire().unwrap();
        assert!(sem.try_acquire().is_none());
        assert_eq!(sem.available_permits(), 0);

        drop(a);
        assert_eq!(sem.available_permits(), 1);
        drop(b);
        assert_eq!(sem.available_permits(), 2);
    }

    #[test]
    fn five_acquirers_two_permits() {
        const ACQUIRERS: usize = 5;

        let sem = Arc::new(Semaphore::new(2));
        let holding = Arc::new(AtomicUsize::new(0));
        let max_holding = Arc::new(AtomicUsize::new(0));
        let done = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..ACQUIRERS)
            .map(|_| {
                let sem = Arc::clone(&sem);
                let holding = Arc::clone(&holding);
                let max_holding = Arc::clone(&max_holding);
                let done = Arc::clone(&done);
                thread::spawn(move || {
                    let permit = sem.acquire(CancelToken::ignored()).unwrap();
                    let now = holding.fetch_add(1, Ordering::SeqCst) + 1;
                    max_holding.fetch_max(now, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(30));
                    holding.fetch_sub(1, Ordering::SeqCst);
                    drop(permit);
                    done.fetch_add(1, Ordering::SeqCst);
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(done.load(Ordering::SeqCst), ACQUIRERS);
        // Never more than the permit count inside the guarded section
        assert!(max_holding.load(Ordering::SeqCst) <= 2);
    }

    #[test]
    fn fair_mode_serves_in_arrival_order() {
        let sem = Arc::new(Semaphore::fair(0));
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let handles: Vec<_> = (0..4u32)
            .map(|i| {
                let sem = Arc::clone(&sem);
                let order = Arc::clone(&order);
                let handle = thread::spawn(move || {
                    let permit = sem.acquire(CancelToken::ignored()).unwrap();
                    order.lock().push(i);
                    permit.forget();
                });
                // Stagger arrivals so queue order is deterministic
                thread::sleep(Duration::from_millis(30));
                handle
            })
            .collect();

        // Release permits one at a time; each unblocks the next in line
        for _ in 0..4 {
            sem.add_permits(1);
            thread::sleep(Duration::from_millis(30));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(*order.lock(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn acquire_many_is_atomic() {
        let sem = Semaphore::new(3);
        let permit = sem.try_acquire_many(3).unwrap();
        assert!(sem.try_acquire().is_none());
        drop(permit);
        assert_eq!(sem.available_permits(), 3);
    }

    #[test]
    fn timed_acquire_times_out_and_restores_state() {
        let sem = Semaphore::fair(0);
        let start = Instant::now();
        let result = sem.acquire_for(Duration::from_millis(50), CancelToken::ignored());

        assert_eq!(result.err(), Some(WaitError::Timeout));
        assert!(start.elapsed() >= Duration::from_millis(50));

        // Departed waiter leaves no residue: a release satisfies the next acquire
        sem.add_permits(1);
        assert!(sem.try_acquire().is_some());
    }

    #[test]
    fn departing_large_request_unblocks_smaller_ones() {
        let sem = Arc::new(Semaphore::fair(1));

        // Head-of-line waiter needs more than exists
        let big = {
            let sem = Arc::clone(&sem);
            thread::spawn(move || {
                sem.acquire_many_for(5, Duration::from_millis(100), CancelToken::ignored())
                    .map(|p| p.forget())
            })
        };
        thread::sleep(Duration::from_millis(30));

        let small = {
            let sem = Arc::clone(&sem);
            thread::spawn(move || {
                sem.acquire(CancelToken::ignored()).map(|p| p.forget())
            })
        };

        // Big request times out; the queued small one must then be granted
        assert!(big.join().unwrap().is_err());
        assert!(small.join().unwrap().is_ok());
    }

    #[test]
    fn cancelled_acquire_unblocks() {
        let sem = Arc::new(Semaphore::new(0));
        let cancel = CancelToken::new();

        let waiter = {
            let sem = Arc::clone(&sem);
            let cancel = cancel.clone();
            thread::spawn(move || sem.acquire(&cancel).map(|p| p.forget()))
        };

        thread::sleep(Duration::from_millis(50));
        cancel.cancel();
        assert_eq!(waiter.join().unwrap().err(), Some(WaitError::Cancelled));
    }

    #[test]
    fn forget_leaks_permits() {
        let sem = Semaphore::new(1);
        sem.try_acquire().unwrap().forget();
        assert_eq!(sem.available_permits(), 0);
    }
}

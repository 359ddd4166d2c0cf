/*!
 * Cyclic Barrier
 *
 * Reusable N-party rendezvous with an optional barrier action.
 *
 * # Generations
 *
 * Each cycle is a generation: a shared cell the cycle's waiters hold.
 * The last arrival runs the action, releases its generation, and opens
 * the next. A timeout, cancellation, or panicking action poisons the
 * current generation only; every party waiting in it fails with
 * [`BarrierError::Broken`] (the triggering party gets its own outcome),
 * and the barrier stays broken until [`CyclicBarrier::reset`].
 */

use crate::cancel::CancelToken;
use crate::core::errors::BarrierError;
use crate::park::{ParkConfig, WaitQueue};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

struct Generation {
    id: u64,
    broken: AtomicBool,
    /// Set (under the state lock) when this cycle tripped normally
    completed: AtomicBool,
}

impl Generation {
    fn new(id: u64) -> Self {
        Self {
            id,
            broken: AtomicBool::new(false),
            completed: AtomicBool::new(false),
        }
    }
}

struct BarrierState {
    current: Arc<Generation>,
    arrived: usize,
    next_gen_id: u64,
}

/// Result of a successful barrier wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BarrierWaitResult {
    leader: bool,
}

impl BarrierWaitResult {
    /// True for exactly one party per generation: the last arrival,
    /// which ran the barrier action.
    pub fn is_leader(&self) -> bool {
        self.leader
    }
}

type BarrierAction = Box<dyn Fn() + Send + Sync>;

/// Reusable N-party rendezvous
///
/// # Examples
///
/// ```
/// use threadgate::{CancelToken, CyclicBarrier};
/// use std::sync::Arc;
///
/// let barrier = Arc::new(CyclicBarrier::new(3));
/// let workers: Vec<_> = (0..3)
///     .map(|_| {
///         let barrier = Arc::clone(&barrier);
///         std::thread::spawn(move || barrier.wait(CancelToken::ignored()).unwrap())
///     })
///     .collect();
///
/// let leaders = workers
///     .into_iter()
///     .map(|w| w.join().unwrap())
///     .filter(|r| r.is_leader())
///     .count();
/// assert_eq!(leaders, 1);
/// ```
pub struct CyclicBarrier {
    parties: usize,
    state: parking_lot::Mutex<BarrierState>,
    action: Option<BarrierAction>,
    queue: Arc<WaitQueue>,
}

impl CyclicBarrier {
    /// Create a barrier for `parties` threads.
    ///
    /// # Panics
    ///
    /// Panics if `parties` is zero.
    pub fn new(parties: usize) -> Self {
        Self::build(parties, None)
    }

    /// Create a barrier whose last arrival runs `action` before any
    /// party is released.
    ///
    /// The action must not call back into this barrier. A panic inside
    /// it breaks the generation.
    ///
    /// # Panics
    ///
    /// Panics if `parties` is zero.
    pub fn with_action(parties: usize, action: impl Fn() + Send + Sync + 'static) -> Self {
        Self::build(parties, Some(Box::new(action)))
    }

    fn build(parties: usize, action: Option<BarrierAction>) -> Self {
        assert!(parties > 0, "barrier requires at least one party");
        Self {
            parties,
            state: parking_lot::Mutex::new(BarrierState {
                current: Arc::new(Generation::new(0)),
                arrived: 0,
                next_gen_id: 1,
            }),
            action,
            queue: Arc::new(WaitQueue::new(ParkConfig::keyed())),
        }
    }

    /// Number of parties required to trip the barrier
    pub fn parties(&self) -> usize {
        self.parties
    }

    /// Parties currently waiting at the barrier (advisory)
    pub fn arrived(&self) -> usize {
        self.state.lock().arrived
    }

    /// True while the current generation is poisoned
    pub fn is_broken(&self) -> bool {
        self.state.lock().current.broken.load(Ordering::SeqCst)
    }

    /// Arrive and block until all parties have arrived.
    ///
    /// # Errors
    ///
    /// [`BarrierError::Broken`] if the generation is (or becomes)
    /// poisoned; [`BarrierError::Cancelled`] if `cancel` fires, which
    /// poisons the generation for everyone else.
    pub fn wait(&self, cancel: &CancelToken) -> Result<BarrierWaitResult, BarrierError> {
        self.wait_inner(None, cancel)
    }

    /// Arrive with a bound on the wait. A timeout poisons the
    /// generation: silent partial progress is worse than failing every
    /// party fast.
    ///
    /// # Errors
    ///
    /// [`BarrierError::Timeout`] for this party, [`BarrierError::Broken`]
    /// for the rest of its generation.
    pub fn wait_for(
        &self,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> Result<BarrierWaitResult, BarrierError> {
        self.wait_inner(Some(Instant::now() + timeout), cancel)
    }

    /// Reset the barrier: break the in-flight generation (its waiters
    /// fail with [`BarrierError::Broken`]) and start a fresh one.
    pub fn reset(&self) {
        let gen_id = {
            let mut st = self.state.lock();
            let id = st.current.id;
            st.current.broken.store(true, Ordering::SeqCst);
            Self::open_next_generation(&mut st);
            id
        };
        self.queue.unpark_all(gen_id);
    }

    fn open_next_generation(st: &mut BarrierState) {
        st.current.completed.store(true, Ordering::SeqCst);
        st.arrived = 0;
        st.current = Arc::new(Generation::new(st.next_gen_id));
        st.next_gen_id += 1;
    }

    fn wait_inner(
        &self,
        deadline: Option<Instant>,
        cancel: &CancelToken,
    ) -> Result<BarrierWaitResult, BarrierError> {
        let generation = {
            let mut st = self.state.lock();
            let generation = Arc::clone(&st.current);
            if generation.broken.load(Ordering::SeqCst) {
                return Err(BarrierError::Broken);
            }

            st.arrived += 1;
            if st.arrived == self.parties {
                // Last arrival: run the action, then release the cycle
                let action_panicked = self.run_action();
                if action_panicked {
                    generation.broken.store(true, Ordering::SeqCst);
                    st.arrived = 0;
                    drop(st);
                    self.queue.unpark_all(generation.id);
                    return Err(BarrierError::Broken);
                }
                Self::open_next_generation(&mut st);
                drop(st);
                self.queue.unpark_all(generation.id);
                return Ok(BarrierWaitResult { leader: true });
            }
            generation
        };

        let key = generation.id;
        let _watch = cancel.watch(&self.queue, key);
        loop {
            if generation.broken.load(Ordering::SeqCst) {
                return Err(BarrierError::Broken);
            }
            if generation.completed.load(Ordering::SeqCst) {
                return Ok(BarrierWaitResult { leader: false });
            }

            let timed_out = deadline.is_some_and(|d| Instant::now() >= d);
            if cancel.is_cancelled() || timed_out {
                let mut st = self.state.lock();
                if generation.broken.load(Ordering::SeqCst) {
                    return Err(BarrierError::Broken);
                }
                if generation.completed.load(Ordering::SeqCst) {
                    // Tripped while we were giving up: success after all
                    return Ok(BarrierWaitResult { leader: false });
                }
                // We poison the generation for every other party
                generation.broken.store(true, Ordering::SeqCst);
                st.arrived = 0;
                drop(st);
                log::trace!("barrier generation {key} broken by waiter");
                self.queue.unpark_all(key);
                return Err(if cancel.is_cancelled() {
                    BarrierError::Cancelled
                } else {
                    BarrierError::Timeout
                });
            }

            self.queue.park(key, deadline, &mut || {
                !generation.broken.load(Ordering::SeqCst)
                    && !generation.completed.load(Ordering::SeqCst)
                    && !cancel.is_cancelled()
            });
        }
    }

    fn run_action(&self) -> bool {
        match &self.action {
            Some(action) => {
                let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(action));
                if outcome.is_err() {
                    log::warn!("barrier action panicked; breaking current generation");
                }
                outcome.is_err()
            }
            None => false,
        }
    }
}

impl std::fmt::Debug for CyclicBarrier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CyclicBarrier")
            .field("parties", &self.parties)
            .field("arrived", &self.arrived())
            .field("broken", &self.is_broken())
            .finish_non_exhaustive()
    }
}

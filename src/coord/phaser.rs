/*!
 * Phase Barrier
 *
 * Multi-phase rendezvous with dynamic party registration. A phase
 * advances when every currently registered party has arrived;
 * deregistering lowers the threshold for the in-flight phase. An
 * optional advance hook decides whether the barrier terminates instead
 * of opening the next phase.
 */

use crate::cancel::CancelToken;
use crate::core::errors::WaitResult;
use crate::park::{ParkConfig, WaitQueue};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Handle for a registered party.
///
/// Consumed by deregistration, so a party cannot be deregistered twice.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct PartyId(u64);

/// What an arrival observed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseOutcome {
    /// The phase completed; the new phase number is attached
    Advanced(u64),
    /// The barrier terminated; no further phases will run
    Terminated,
}

struct PhaserState {
    phase: u64,
    parties: HashSet<u64>,
    next_party: u64,
    arrived: usize,
    terminated: bool,
}

type AdvanceHook = Box<dyn Fn(u64, usize) -> bool + Send + Sync>;

/// Multi-phase barrier with dynamic membership
///
/// # Examples
///
/// ```
/// use threadgate::{CancelToken, PhaseBarrier, PhaseOutcome};
/// use std::sync::Arc;
///
/// let phaser = Arc::new(PhaseBarrier::new());
/// let a = phaser.register();
/// let b = phaser.register();
///
/// let worker = {
///     let phaser = Arc::clone(&phaser);
///     std::thread::spawn(move || {
///         let outcome = phaser.arrive_and_await(CancelToken::ignored()).unwrap();
///         phaser.deregister(b);
///         outcome
///     })
/// };
///
/// let outcome = phaser.arrive_and_await(CancelToken::ignored()).unwrap();
/// assert_eq!(outcome, PhaseOutcome::Advanced(1));
/// assert_eq!(worker.join().unwrap(), PhaseOutcome::Advanced(1));
/// phaser.deregister(a);
/// ```
pub struct PhaseBarrier {
    state: parking_lot::Mutex<PhaserState>,
    /// Mirrors of `phase`/`terminated`, maintained under the state
    /// lock, so park validators can read them without locking
    phase_mirror: AtomicU64,
    terminated_mirror: AtomicBool,
    on_advance: Option<AdvanceHook>,
    queue: Arc<WaitQueue>,
}

impl PhaseBarrier {
    /// Create a barrier at phase 0 with no registered parties
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Create a barrier whose `hook(phase, registered)` runs on every
    /// phase completion; returning true terminates the barrier.
    ///
    /// The hook must not call back into this barrier.
    pub fn with_hook(hook: impl Fn(u64, usize) -> bool + Send + Sync + 'static) -> Self {
        Self::build(Some(Box::new(hook)))
    }

    fn build(on_advance: Option<AdvanceHook>) -> Self {
        Self {
            state: parking_lot::Mutex::new(PhaserState {
                phase: 0,
                parties: HashSet::new(),
                next_party: 1,
                arrived: 0,
                terminated: false,
            }),
            phase_mirror: AtomicU64::new(0),
            terminated_mirror: AtomicBool::new(false),
            on_advance,
            queue: Arc::new(WaitQueue::new(ParkConfig::keyed())),
        }
    }

    /// Current phase number (advisory)
    pub fn phase(&self) -> u64 {
        self.phase_mirror.load(Ordering::SeqCst)
    }

    /// Number of registered parties (advisory)
    pub fn registered_parties(&self) -> usize {
        self.state.lock().parties.len()
    }

    /// Arrivals recorded for the current phase (advisory)
    pub fn arrived_parties(&self) -> usize {
        self.state.lock().arrived
    }

    /// True once the barrier has terminated
    pub fn is_terminated(&self) -> bool {
        self.terminated_mirror.load(Ordering::SeqCst)
    }

    /// Add a party; the current phase now requires its arrival too.
    ///
    /// # Panics
    ///
    /// Panics if the barrier has terminated: joining a finished barrier
    /// is a programming error.
    pub fn register(&self) -> PartyId {
        let mut st = self.state.lock();
        assert!(
            !st.terminated,
            "register on a terminated phase barrier"
        );
        let id = st.next_party;
        st.next_party += 1;
        st.parties.insert(id);
        PartyId(id)
    }

    /// Remove a party that has not arrived in the current phase,
    /// lowering the threshold; if the remaining arrivals now complete
    /// the phase, it advances.
    ///
    /// # Panics
    ///
    /// Panics if the party is unknown to this barrier.
    pub fn deregister(&self, party: PartyId) {
        let wake = {
            let mut st = self.state.lock();
            assert!(
                st.parties.remove(&party.0),
                "deregister of a party unknown to this barrier"
            );
            self.maybe_advance(&mut st)
        };
        if let Some((phase, _)) = wake {
            self.queue.unpark_all(phase);
        }
    }

    /// Arrive and block until every registered party has arrived for
    /// the current phase.
    ///
    /// # Errors
    ///
    /// [`WaitError::Cancelled`](crate::WaitError::Cancelled) if `cancel`
    /// fires while parked; the arrival remains counted.
    pub fn arrive_and_await(&self, cancel: &CancelToken) -> WaitResult<PhaseOutcome> {
        self.arrive_and_await_inner(None, cancel)
    }

    /// Arrive and wait with a bound. A timeout leaves the arrival
    /// counted; the phase can still complete without this thread
    /// observing it.
    ///
    /// # Errors
    ///
    /// [`WaitError::Timeout`](crate::WaitError::Timeout) /
    /// [`WaitError::Cancelled`](crate::WaitError::Cancelled).
    pub fn arrive_and_await_for(
        &self,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> WaitResult<PhaseOutcome> {
        self.arrive_and_await_inner(Some(Instant::now() + timeout), cancel)
    }

    /// Arrive and leave the party set in one step, without waiting for
    /// the phase to complete. Returns the phase the arrival applied to.
    ///
    /// # Panics
    ///
    /// Panics if the party is unknown to this barrier.
    pub fn arrive_and_deregister(&self, party: PartyId) -> u64 {
        let (phase, wake) = {
            let mut st = self.state.lock();
            assert!(
                st.parties.remove(&party.0),
                "deregister of a party unknown to this barrier"
            );
            if st.terminated {
                (st.phase, None)
            } else {
                let phase = st.phase;
                (phase, self.maybe_advance(&mut st))
            }
        };
        if let Some((wake_phase, _)) = wake {
            self.queue.unpark_all(wake_phase);
        }
        phase
    }

    /// Terminate the barrier immediately: all waiters observe
    /// [`PhaseOutcome::Terminated`], and future arrivals return it
    /// without blocking.
    pub fn force_termination(&self) {
        let phase = {
            let mut st = self.state.lock();
            if st.terminated {
                return;
            }
            st.terminated = true;
            self.terminated_mirror.store(true, Ordering::SeqCst);
            st.arrived = 0;
            st.phase
        };
        self.queue.unpark_all(phase);
    }

    fn arrive_and_await_inner(
        &self,
        deadline: Option<Instant>,
        cancel: &CancelToken,
    ) -> WaitResult<PhaseOutcome> {
        let phase = {
            let mut st = self.state.lock();
            if st.terminated {
                return Ok(PhaseOutcome::Terminated);
            }
            let phase = st.phase;
            st.arrived += 1;
            if let Some((_, outcome)) = self.maybe_advance(&mut st) {
                drop(st);
                self.queue.unpark_all(phase);
                return Ok(outcome);
            }
            phase
        };

        WaitQueue::wait_while(&self.queue, phase, deadline, cancel, || {
            self.phase_mirror.load(Ordering::SeqCst) == phase
                && !self.terminated_mirror.load(Ordering::SeqCst)
        })?;

        let st = self.state.lock();
        Ok(if st.terminated {
            PhaseOutcome::Terminated
        } else {
            PhaseOutcome::Advanced(st.phase)
        })
    }

    /// Complete the phase if arrivals have met the threshold. Returns
    /// the finished phase and its outcome when it advanced.
    fn maybe_advance(&self, st: &mut PhaserState) -> Option<(u64, PhaseOutcome)> {
        if st.terminated || (st.parties.is_empty() && st.arrived == 0) {
            return None;
        }
        if st.arrived < st.parties.len() {
            return None;
        }

        let phase = st.phase;
        let registered = st.parties.len();
        let terminate = match &self.on_advance {
            Some(hook) => hook(phase, registered),
            // Without a hook, the barrier ends when its last party leaves
            None => registered == 0,
        };

        st.arrived = 0;
        let outcome = if terminate {
            st.terminated = true;
            self.terminated_mirror.store(true, Ordering::SeqCst);
            PhaseOutcome::Terminated
        } else {
            st.phase += 1;
            self.phase_mirror.store(st.phase, Ordering::SeqCst);
            PhaseOutcome::Advanced(st.phase)
        };
        Some((phase, outcome))
    }
}

impl Default for PhaseBarrier {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PhaseBarrier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let st = self.state.lock();
        f.debug_struct("PhaseBarrier")
            .field("phase", &st.phase)
            .field("registered", &st.parties.len())
            .field("arrived", &st.arrived)
            .field("terminated", &st.terminated)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::errors::WaitError;
    use std::thread;

    #[test]
    fn phase_advances_when_all_registered_arrive() {
        let phaser = Arc::new(PhaseBarrier::new());
        let _a = phaser.register();
        let _b = phaser.register();
        let _c = phaser.register();

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let phaser = Arc::clone(&phaser);
                thread::spawn(move || phaser.arrive_and_await(CancelToken::ignored()))
            })
            .collect();

        thread::sleep(Duration::from_millis(50));
        assert_eq!(phaser.phase(), 0);
        assert_eq!(phaser.arrived_parties(), 2);

        let outcome = phaser.arrive_and_await(CancelToken::ignored()).unwrap();
        assert_eq!(outcome, PhaseOutcome::Advanced(1));

        for handle in handles {
            assert_eq!(handle.join().unwrap(), Ok(PhaseOutcome::Advanced(1)));
        }
        assert_eq!(phaser.phase(), 1);
    }

    #[test]
    fn deregistration_lowers_in_flight_threshold() {
        let phaser = Arc::new(PhaseBarrier::new());
        let _a = phaser.register();
        let b = phaser.register();

        let waiter = {
            let phaser = Arc::clone(&phaser);
            thread::spawn(move || phaser.arrive_and_await(CancelToken::ignored()))
        };
        thread::sleep(Duration::from_millis(50));

        // Removing the absent party completes the phase for the waiter
        phaser.deregister(b);
        assert_eq!(waiter.join().unwrap(), Ok(PhaseOutcome::Advanced(1)));
    }

    #[test]
    fn arrive_and_deregister_does_not_wait() {
        let phaser = Arc::new(PhaseBarrier::new());
        let a = phaser.register();
        let b = phaser.register();

        let waiter = {
            let phaser = Arc::clone(&phaser);
            thread::spawn(move || phaser.arrive_and_await(CancelToken::ignored()))
        };
        thread::sleep(Duration::from_millis(50));

        // Leaves immediately; its arrival still trips the phase
        assert_eq!(phaser.arrive_and_deregister(b), 0);
        assert_eq!(waiter.join().unwrap(), Ok(PhaseOutcome::Advanced(1)));

        assert_eq!(phaser.registered_parties(), 1);
        phaser.deregister(a);
    }

    #[test]
    fn hook_terminates_barrier() {
        let phaser = Arc::new(PhaseBarrier::with_hook(|phase, _| phase == 1));
        let _a = phaser.register();

        assert_eq!(
            phaser.arrive_and_await(CancelToken::ignored()),
            Ok(PhaseOutcome::Advanced(1))
        );
        assert_eq!(
            phaser.arrive_and_await(CancelToken::ignored()),
            Ok(PhaseOutcome::Terminated)
        );
        assert!(phaser.is_terminated());

        // Terminated: arrivals return immediately
        assert_eq!(
            phaser.arrive_and_await(CancelToken::ignored()),
            Ok(PhaseOutcome::Terminated)
        );
    }

    #[test]
    fn force_termination_releases_waiters() {
        let phaser = Arc::new(PhaseBarrier::new());
        let _a = phaser.register();
        let _b = phaser.register();

        let waiter = {
            let phaser = Arc::clone(&phaser);
            thread::spawn(move || phaser.arrive_and_await(CancelToken::ignored()))
        };
        thread::sleep(Duration::from_millis(50));

        phaser.force_termination();
        assert_eq!(waiter.join().unwrap(), Ok(PhaseOutcome::Terminated));
    }

    #[test]
    #[should_panic(expected = "register on a terminated phase barrier")]
    fn register_after_termination_panics() {
        let phaser = PhaseBarrier::new();
        phaser.force_termination();
        let _ = phaser.register();
    }

    #[test]
    fn timed_arrival_leaves_arrival_counted() {
        let phaser = Arc::new(PhaseBarrier::new());
        let _a = phaser.register();
        let _b = phaser.register();

        assert_eq!(
            phaser.arrive_and_await_for(Duration::from_millis(50), CancelToken::ignored()),
            Err(WaitError::Timeout)
        );

        // The timed-out arrival still counts: one more trips the phase
        assert_eq!(
            phaser.arrive_and_await(CancelToken::ignored()),
            Ok(PhaseOutcome::Advanced(1))
        );
    }

    #[test]
    fn multi_phase_pipeline() {
        const PHASES: u64 = 3;
        const WORKERS: usize = 4;

        let phaser = Arc::new(PhaseBarrier::new());
        let ids: Vec<_> = (0..WORKERS).map(|_| phaser.register()).collect();

        let handles: Vec<_> = ids
            .into_iter()
            .map(|id| {
                let phaser = Arc::clone(&phaser);
                thread::spawn(move || {
                    for expected in 1..=PHASES {
                        let outcome = phaser.arrive_and_await(CancelToken::ignored()).unwrap();
                        assert_eq!(outcome, PhaseOutcome::Advanced(expected));
                    }
                    phaser.arrive_and_deregister(id)
                })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap(), PHASES);
        }
        assert_eq!(phaser.registered_parties(), 0);
    }
}

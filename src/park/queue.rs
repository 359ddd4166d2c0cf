/*!
 * Wait Queue
 *
 * High-level keyed parking with strategy selection, deadline-based
 * waits, and cancellation-aware condition loops.
 *
 * # Design: Enum Dispatch
 *
 * Strategies dispatch through an enum rather than `dyn Parker` to keep
 * the hot path free of vtable lookups, matching how the rest of the
 * crate treats parking as a zero-cost seam.
 */

use super::condvar::CondvarPark;
use super::config::{ParkConfig, StrategyType};
use super::futex::FutexPark;
use super::spin::SpinPark;
use super::traits::{Parker, WakeResult};
use crate::cancel::CancelToken;
use crate::core::errors::{WaitError, WaitResult};
use std::sync::Arc;
use std::time::Instant;

enum ParkerImpl {
    Futex(FutexPark),
    Condvar(CondvarPark),
    Spin(SpinPark),
}

impl ParkerImpl {
    #[inline(always)]
    fn as_parker(&self) -> &dyn Parker {
        match self {
            Self::Futex(p) => p,
            Self::Condvar(p) => p,
            Self::Spin(p) => p,
        }
    }
}

/// Keyed wait queue shared by one primitive (or a few cooperating ones)
///
/// Threads park on `u64` keys: a lock word, a waiter's ticket, a barrier
/// generation. Wakes target a key; waiters always re-validate their
/// condition after waking.
///
/// # Examples
///
/// ```
/// use threadgate::park::WaitQueue;
/// use std::time::{Duration, Instant};
///
/// let queue = WaitQueue::with_defaults();
///
/// // Nothing signals key 7: the deadline fires.
/// let woken = queue.park(7, Some(Instant::now() + Duration::from_millis(10)), &mut || true);
/// assert!(!woken);
/// ```
pub struct WaitQueue {
    strategy: ParkerImpl,
}

impl WaitQueue {
    /// Create a wait queue with the specified configuration
    pub fn new(config: ParkConfig) -> Self {
        let strategy = match config.select_strategy() {
            StrategyType::Futex => ParkerImpl::Futex(FutexPark::new(config.slots)),
            StrategyType::Condvar => ParkerImpl::Condvar(CondvarPark::new(config.slots)),
            StrategyType::Spin => ParkerImpl::Spin(SpinPark::new(
                config.slots,
                config.spin_duration,
                config.max_spins,
            )),
            // select_strategy resolves Auto; fall back to condvar if a
            // custom config slips it through
            StrategyType::Auto => ParkerImpl::Condvar(CondvarPark::new(config.slots)),
        };

        Self { strategy }
    }

    /// Create with default configuration (auto-selects best strategy)
    pub fn with_defaults() -> Self {
        Self::new(ParkConfig::default())
    }

    /// Park on `key` until woken, `deadline` passes, or `should_park`
    /// reports the wait is over. Returns `false` only on deadline expiry.
    ///
    /// `should_park` must be lock-free (atomic reads only); it runs
    /// with parking internals locked.
    #[inline]
    pub fn park(
        &self,
        key: u64,
        deadline: Option<Instant>,
        should_park: &mut dyn FnMut() -> bool,
    ) -> bool {
        self.strategy.as_parker().park(key, deadline, should_park)
    }

    /// Wake one waiter parked on `key`
    #[inline]
    pub fn unpark_one(&self, key: u64) -> WakeResult {
        self.strategy.as_parker().unpark_one(key)
    }

    /// Wake all waiters parked on `key`
    #[inline]
    pub fn unpark_all(&self, key: u64) -> WakeResult {
        self.strategy.as_parker().unpark_all(key)
    }

    /// Approximate waiter count for diagnostics
    #[inline]
    pub fn parked_count(&self, key: u64) -> usize {
        self.strategy.as_parker().parked_count(key)
    }

    /// Name of the active strategy
    #[inline]
    pub fn strategy_name(&self) -> &'static str {
        self.strategy.as_parker().name()
    }

    /// Block on `key` while `waiting` returns true.
    ///
    /// The condition is re-checked after every wake, including as the
    /// pre-sleep validator, so it must be lock-free (atomic reads
    /// only). Registers with `cancel` so a cancellation fired mid-wait
    /// unparks this thread promptly.
    ///
    /// # Errors
    ///
    /// [`WaitError::Timeout`] once `deadline` passes with the condition
    /// still true; [`WaitError::Cancelled`] if the token fires first.
    pub fn wait_while(
        queue: &Arc<WaitQueue>,
        key: u64,
        deadline: Option<Instant>,
        cancel: &CancelToken,
        mut waiting: impl FnMut() -> bool,
    ) -> WaitResult<()> {
        let _watch = cancel.watch(queue, key);

        loop {
            if !waiting() {
                return Ok(());
            }
            if cancel.is_cancelled() {
                return Err(WaitError::Cancelled);
            }
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    return Err(WaitError::Timeout);
                }
            }

            queue.park(key, deadline, &mut || {
                waiting() && !cancel.is_cancelled()
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn wake_one_releases_waiter() {
        let queue = Arc::new(WaitQueue::with_defaults());
        let queue_clone = queue.clone();

        let handle = thread::spawn(move || {
            queue_clone.park(42, Some(Instant::now() + Duration::from_secs(5)), &mut || true)
        });

        thread::sleep(Duration::from_millis(50));
        queue.unpark_one(42);

        assert!(handle.join().unwrap());
    }

    #[test]
    fn wait_while_times_out() {
        let queue = Arc::new(WaitQueue::with_defaults());
        let cancel = CancelToken::new();
        let start = Instant::now();

        let result = WaitQueue::wait_while(
            &queue,
            99,
            Some(start + Duration::from_millis(50)),
            &cancel,
            || true,
        );

        assert_eq!(result, Err(WaitError::Timeout));
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn wait_while_observes_condition_change() {
        let queue = Arc::new(WaitQueue::with_defaults());
        let flag = Arc::new(AtomicBool::new(false));

        let handle = {
            let queue = queue.clone();
            let flag = flag.clone();
            thread::spawn(move || {
                WaitQueue::wait_while(&queue, 100, None, &CancelToken::new(), || {
                    !flag.load(Ordering::SeqCst)
                })
            })
        };

        thread::sleep(Duration::from_millis(50));
        flag.store(true, Ordering::SeqCst);
        queue.unpark_all(100);

        assert_eq!(handle.join().unwrap(), Ok(()));
    }

    #[test]
    fn wait_while_cancels_promptly() {
        let queue = Arc::new(WaitQueue::with_defaults());
        let cancel = CancelToken::new();

        let handle = {
            let queue = queue.clone();
            let cancel = cancel.clone();
            thread::spawn(move || WaitQueue::wait_while(&queue, 7, None, &cancel, || true))
        };

        thread::sleep(Duration::from_millis(50));
        let start = Instant::now();
        cancel.cancel();

        assert_eq!(handle.join().unwrap(), Err(WaitError::Cancelled));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn strategy_name_reports_selection() {
        let queue = WaitQueue::new(ParkConfig {
            strategy: StrategyType::Condvar,
            ..ParkConfig::default()
        });
        assert_eq!(queue.strategy_name(), "condvar");
    }
}

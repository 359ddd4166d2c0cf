/*!
 * Adaptive Spin Strategy with Exponential Backoff
 *
 * For scenarios where waits are typically very short. Three phases:
 *
 * 1. **Tight spin** (first iterations): `spin_loop()` hint only
 * 2. **Yield** : `yield_now()` each iteration
 * 3. **Park**: falls back to the condvar strategy
 */

use super::condvar::CondvarPark;
use super::traits::{Parker, WakeResult};
use std::thread;
use std::time::{Duration, Instant};

/// Adaptive spin with condvar fallback for long waits
pub struct SpinPark {
    /// Fallback for waits that outlive the spin phase
    fallback: CondvarPark,
    /// Spin budget before parking
    spin_duration: Duration,
    /// Maximum spin iterations before parking
    max_spins: u32,
}

impl SpinPark {
    /// Create a new adaptive spin strategy over `slots` fallback slots
    pub fn new(slots: usize, spin_duration: Duration, max_spins: u32) -> Self {
        Self {
            fallback: CondvarPark::new(slots),
            spin_duration,
            max_spins,
        }
    }

    /// Spin until `done` reports the wait is over or the budget runs out.
    ///
    /// Returns true if `done` fired during the spin phase.
    fn spin(&self, mut done: impl FnMut() -> bool) -> bool {
        let start = Instant::now();
        let mut spin_count = 0u32;

        loop {
            if done() {
                return true;
            }

            if start.elapsed() >= self.spin_duration || spin_count >= self.max_spins {
                return false;
            }

            if spin_count < 10 {
                std::hint::spin_loop();
            } else {
                thread::yield_now();
            }

            spin_count += 1;
        }
    }
}

impl Parker for SpinPark {
    fn park(
        &self,
        key: u64,
        deadline: Option<Instant>,
        should_park: &mut dyn FnMut() -> bool,
    ) -> bool {
        if self.spin(|| !should_park()) {
            return true;
        }

        if let Some(deadline) = deadline {
            if Instant::now() >= deadline {
                return false;
            }
        }

        self.fallback.park(key, deadline, should_park)
    }

    fn unpark_one(&self, key: u64) -> WakeResult {
        self.fallback.unpark_one(key)
    }

    fn unpark_all(&self, key: u64) -> WakeResult {
        self.fallback.unpark_all(key)
    }

    fn parked_count(&self, key: u64) -> usize {
        self.fallback.parked_count(key)
    }

    fn name(&self) -> &'static str {
        "spin"
    }
}

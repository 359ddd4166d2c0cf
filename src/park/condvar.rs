/*!
 * Condvar-Based Parking Strategy
 *
 * Cross-platform fallback using parking_lot::Condvar.
 *
 * # Design: Fixed Sharded Slots
 *
 * A fixed array of condvar slots; keys hash to a slot. Colliding keys
 * share a condvar, so a single-wake request notifies the whole slot and
 * lets the waiters' own validation sort out who proceeds. That keeps
 * single wakes exact for the intended key at the cost of occasional
 * spurious wakeups, which every caller already tolerates.
 *
 * Wakes take the slot mutex, so a waiter that validated `should_park`
 * under that mutex cannot miss a wake issued before it sleeps.
 */

use super::traits::{Parker, WakeResult};
use parking_lot::{Condvar, Mutex};
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

/// A single condvar slot with waiter count
#[repr(C, align(64))] // Cache-line aligned to prevent false sharing
struct CondvarSlot {
    condvar: Condvar,
    mutex: Mutex<()>,
    waiters: AtomicUsize,
}

impl CondvarSlot {
    const fn new() -> Self {
        Self {
            condvar: Condvar::new(),
            mutex: Mutex::new(()),
            waiters: AtomicUsize::new(0),
        }
    }
}

/// Condvar-based parking with fixed sharded slots
pub struct CondvarPark {
    slots: Box<[CondvarSlot]>,
    slot_mask: usize,
}

impl CondvarPark {
    /// Create a new condvar-based strategy with `slots` slots (power of 2)
    pub fn new(slots: usize) -> Self {
        assert!(
            slots > 0 && slots.is_power_of_two(),
            "slot count must be a power of 2"
        );
        Self {
            slots: (0..slots).map(|_| CondvarSlot::new()).collect(),
            slot_mask: slots - 1,
        }
    }

    /// Hash key to slot index
    #[inline]
    fn slot_index(&self, key: u64) -> usize {
        let mut hasher = ahash::AHasher::default();
        key.hash(&mut hasher);
        (hasher.finish() as usize) & self.slot_mask
    }
}

impl Parker for CondvarPark {
    fn park(
        &self,
        key: u64,
        deadline: Option<Instant>,
        should_park: &mut dyn FnMut() -> bool,
    ) -> bool {
        let slot = &self.slots[self.slot_index(key)];
        slot.waiters.fetch_add(1, Ordering::SeqCst);

        let mut guard = slot.mutex.lock();

        // Last-moment validation under the slot mutex: a waker that
        // changed state before this point is observed here; one that
        // changes it later must first take this mutex to notify.
        let timed_out = if !should_park() {
            false
        } else if let Some(deadline) = deadline {
            slot.condvar.wait_until(&mut guard, deadline).timed_out()
        } else {
            slot.condvar.wait(&mut guard);
            false
        };

        drop(guard);
        slot.waiters.fetch_sub(1, Ordering::SeqCst);

        !timed_out
    }

    fn unpark_one(&self, key: u64) -> WakeResult {
        let slot = &self.slots[self.slot_index(key)];
        if slot.waiters.load(Ordering::SeqCst) == 0 {
            return WakeResult::NoWaiters;
        }

        // Slots are shared across keys: notify the whole slot so the
        // intended key's waiter is guaranteed to wake; wrong-key waiters
        // re-validate and re-park.
        let guard = slot.mutex.lock();
        slot.condvar.notify_all();
        drop(guard);
        WakeResult::Woken(1)
    }

    fn unpark_all(&self, key: u64) -> WakeResult {
        let slot = &self.slots[self.slot_index(key)];
        let count = slot.waiters.load(Ordering::SeqCst);
        if count == 0 {
            return WakeResult::NoWaiters;
        }

        let guard = slot.mutex.lock();
        slot.condvar.notify_all();
        drop(guard);
        WakeResult::Woken(count)
    }

    fn parked_count(&self, key: u64) -> usize {
        self.slots[self.slot_index(key)]
            .waiters
            .load(Ordering::SeqCst)
    }

    fn name(&self) -> &'static str {
        "condvar"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn wake_one_releases_parked_thread() {
        let cv = Arc::new(CondvarPark::new(16));
        let cv_clone = cv.clone();

        let handle = thread::spawn(move || {
            cv_clone.park(42, Some(Instant::now() + Duration::from_secs(5)), &mut || true)
        });

        thread::sleep(Duration::from_millis(50));

        assert!(cv.unpark_one(42).is_woken());
        assert!(handle.join().unwrap());
    }

    #[test]
    fn deadline_expires() {
        let cv = CondvarPark::new(16);
        let start = Instant::now();
        let woken = cv.park(99, Some(start + Duration::from_millis(50)), &mut || true);

        assert!(!woken);
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn wake_all_releases_every_waiter() {
        let cv = Arc::new(CondvarPark::new(16));

        let handles: Vec<_> = (0..3)
            .map(|_| {
                let cv = cv.clone();
                thread::spawn(move || {
                    cv.park(100, Some(Instant::now() + Duration::from_secs(5)), &mut || true)
                })
            })
            .collect();

        thread::sleep(Duration::from_millis(100));

        assert!(cv.unpark_all(100).is_woken());

        for handle in handles {
            assert!(handle.join().unwrap());
        }
    }
}

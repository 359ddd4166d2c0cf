/*!
 * Futex-Based Parking Strategy
 *
 * Uses parking_lot_core for futex-like operations on all platforms.
 * On Linux this maps directly to futex syscalls.
 *
 * # Design
 *
 * Parking addresses are exact: each (queue instance, key) pair composes
 * into a distinct 64-bit token, so `unpark_one` wakes a waiter of that
 * key and no other. A fixed sharded slot table carries per-slot waiter
 * counters for the no-waiter fast path and diagnostics; multiple keys
 * may share a counter slot, never a parking address.
 */

use super::traits::{Parker, WakeResult};
use parking_lot_core::{park, unpark_all, unpark_one, ParkResult, ParkToken, UnparkToken};
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Instant;

/// Instance tokens; never reused, so composed addresses never collide
/// across queues.
static NEXT_QUEUE_TOKEN: AtomicU64 = AtomicU64::new(1);

/// A single counter slot
#[repr(C, align(64))] // Cache-line aligned to prevent false sharing
struct CounterSlot {
    waiters: AtomicUsize,
}

impl CounterSlot {
    const fn new() -> Self {
        Self {
            waiters: AtomicUsize::new(0),
        }
    }
}

/// Futex-based parking with exact per-key addresses
pub struct FutexPark {
    /// Unique instance token mixed into every parking address
    token: u64,
    /// Fixed array of counter slots (never resizes)
    slots: Box<[CounterSlot]>,
    slot_mask: usize,
}

impl FutexPark {
    /// Create a new futex-based strategy with `slots` counter slots
    /// (power of 2).
    pub fn new(slots: usize) -> Self {
        assert!(
            slots > 0 && slots.is_power_of_two(),
            "slot count must be a power of 2"
        );
        Self {
            token: NEXT_QUEUE_TOKEN.fetch_add(1, Ordering::Relaxed),
            slots: (0..slots).map(|_| CounterSlot::new()).collect(),
            slot_mask: slots - 1,
        }
    }

    /// Hash key to counter slot index
    #[inline]
    fn slot_index(&self, key: u64) -> usize {
        let mut hasher = ahash::AHasher::default();
        key.hash(&mut hasher);
        (hasher.finish() as usize) & self.slot_mask
    }

    /// Compose the exact parking address for a key
    #[inline]
    fn address(&self, key: u64) -> usize {
        // Fibonacci mix spreads consecutive ticket keys across the
        // parking table's buckets
        (self.token ^ key.wrapping_mul(0x9E37_79B9_7F4A_7C15)) as usize
    }
}

impl Parker for FutexPark {
    fn park(
        &self,
        key: u64,
        deadline: Option<Instant>,
        should_park: &mut dyn FnMut() -> bool,
    ) -> bool {
        let slot = &self.slots[self.slot_index(key)];
        slot.waiters.fetch_add(1, Ordering::SeqCst);

        // The validate closure runs with the parking bucket locked, so
        // it is ordered against every unpark on the same address.
        let result = unsafe {
            park(
                self.address(key),
                || should_park(),
                || {},
                |_, _| {},
                ParkToken(0),
                deadline,
            )
        };

        slot.waiters.fetch_sub(1, Ordering::SeqCst);

        match result {
            ParkResult::Unparked(_) => true,
            ParkResult::Invalid => true, // validate aborted: wait already over
            ParkResult::TimedOut => false,
        }
    }

    fn unpark_one(&self, key: u64) -> WakeResult {
        let slot = &self.slots[self.slot_index(key)];
        if slot.waiters.load(Ordering::SeqCst) == 0 {
            return WakeResult::NoWaiters;
        }

        let result = unsafe { unpark_one(self.address(key), |_| UnparkToken(0)) };
        if result.unparked_threads == 0 {
            WakeResult::NoWaiters
        } else {
            WakeResult::Woken(result.unparked_threads)
        }
    }

    fn unpark_all(&self, key: u64) -> WakeResult {
        let slot = &self.slots[self.slot_index(key)];
        if slot.waiters.load(Ordering::SeqCst) == 0 {
            return WakeResult::NoWaiters;
        }

        let unparked = unsafe { unpark_all(self.address(key), UnparkToken(0)) };
        if unparked == 0 {
            WakeResult::NoWaiters
        } else {
            WakeResult::Woken(unparked)
        }
    }

    fn parked_count(&self, key: u64) -> usize {
        self.slots[self.slot_index(key)]
            .waiters
            .load(Ordering::SeqCst)
    }

    fn name(&self) -> &'static str {
        "futex"
    }
}

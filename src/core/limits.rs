/*!
 * Tuning Limits
 * Compile-time constants for parking slots and stripe clamps
 */

/// Parking slots for a wait queue dedicated to a single primitive.
///
/// Must be a power of 2 (slot lookup is a masked hash). Primitives wait
/// on a handful of distinct keys, so a small table keeps the per-instance
/// footprint at one cache line per slot.
pub const DEDICATED_PARKING_SLOTS: usize = 16;

/// Parking slots for a wait queue shared by many keys (ticket-fair
/// primitives hash one key per waiter). Power of 2.
pub const KEYED_PARKING_SLOTS: usize = 64;

/// Minimum stripe count for striped maps (avoids degeneration on 1-2
/// core systems).
pub const MIN_STRIPES: usize = 8;

/// Maximum stripe count (diminishing returns, excessive memory overhead
/// past this point).
pub const MAX_STRIPES: usize = 512;

/// Maximum concurrent readers a read/write lock admits. Leaves headroom
/// below the writer bit in the packed state word.
pub const MAX_READERS: u32 = (1 << 30) - 1;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_counts_are_powers_of_two() {
        assert!(DEDICATED_PARKING_SLOTS.is_power_of_two());
        assert!(KEYED_PARKING_SLOTS.is_power_of_two());
        assert!(MIN_STRIPES.is_power_of_two());
        assert!(MAX_STRIPES.is_power_of_two());
    }
}

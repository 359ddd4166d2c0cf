/*!
 * Shard Sizing
 *
 * CPU-topology-aware stripe count calculation for striped structures.
 * Pure functions with `#[inline]` so call sites constant-fold where the
 * CPU count is known.
 *
 * # Design Rationale
 *
 * - **Power-of-2 stripes**: fast modulo via bitwise AND (x & (n-1))
 * - **CPU-proportional scaling**: more cores, more useful parallelism
 * - **Contention multipliers**: based on expected access patterns
 */

use crate::core::limits::{MAX_STRIPES, MIN_STRIPES};

/// Hardware-aware stripe configuration (pure functions)
pub struct ShardPolicy;

impl ShardPolicy {
    /// Get CPU count.
    ///
    /// Repeated calls are O(1); stdlib caches the detection.
    #[inline]
    pub fn cpu_count() -> usize {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or_else(|_| {
                log::warn!("Failed to detect CPU count, defaulting to 8");
                8
            })
    }

    /// Calculate stripe count for a given workload profile.
    ///
    /// Always a power of 2, clamped to [`MIN_STRIPES`]..=[`MAX_STRIPES`].
    #[inline]
    pub fn stripes(profile: WorkloadProfile) -> usize {
        let base = Self::cpu_count();

        let multiplier = match profile {
            // Heavy concurrent access benefits from maximum parallelism
            WorkloadProfile::HighContention => 4,
            // Moderate access patterns don't justify 4x memory overhead
            WorkloadProfile::MediumContention => 2,
            // Rare contention makes extra stripes wasteful
            WorkloadProfile::LowContention => 1,
        };

        let calculated = (base * multiplier).next_power_of_two();
        calculated.clamp(MIN_STRIPES, MAX_STRIPES)
    }
}

/// Workload characterization for stripe count calculation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkloadProfile {
    /// Heavy concurrent access (shared caches hit from every thread)
    HighContention,

    /// Moderate concurrent access
    MediumContention,

    /// Light concurrent access (infrequent lookups)
    LowContention,
}

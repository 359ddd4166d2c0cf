/*!
 * Parking Configuration
 * Runtime selection of the wait strategy
 */

use crate::core::limits::DEDICATED_PARKING_SLOTS;
use std::time::Duration;

/// Strategy type selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyType {
    /// Futex-based (fastest; direct futex syscalls on Linux)
    Futex,
    /// Condvar-based (cross-platform, reliable)
    Condvar,
    /// Adaptive spin (low-latency, higher CPU for short waits)
    Spin,
    /// Auto-select based on platform
    Auto,
}

/// Parking configuration
#[derive(Debug, Clone)]
pub struct ParkConfig {
    /// Preferred strategy
    pub strategy: StrategyType,
    /// Counter/fallback slots (power of 2)
    pub slots: usize,
    /// Spin budget before parking (Spin strategy)
    pub spin_duration: Duration,
    /// Maximum spin iterations before parking (Spin strategy)
    pub max_spins: u32,
}

impl Default for ParkConfig {
    fn default() -> Self {
        Self {
            strategy: StrategyType::Auto,
            slots: DEDICATED_PARKING_SLOTS,
            spin_duration: Duration::from_micros(10),
            max_spins: 100,
        }
    }
}

impl ParkConfig {
    /// Configuration optimized for waits expected to resolve in < 1ms
    pub const fn low_latency() -> Self {
        Self {
            strategy: StrategyType::Spin,
            slots: DEDICATED_PARKING_SLOTS,
            spin_duration: Duration::from_micros(50),
            max_spins: 500,
        }
    }

    /// Configuration for queues hashing many distinct keys (ticket-fair
    /// primitives)
    pub fn keyed() -> Self {
        Self {
            slots: crate::core::limits::KEYED_PARKING_SLOTS,
            ..Self::default()
        }
    }

    /// Resolve `Auto` to the best strategy for this platform
    pub fn select_strategy(&self) -> StrategyType {
        match self.strategy {
            StrategyType::Auto => {
                #[cfg(target_os = "linux")]
                {
                    StrategyType::Futex
                }
                #[cfg(not(target_os = "linux"))]
                {
                    StrategyType::Condvar
                }
            }
            other => other,
        }
    }
}

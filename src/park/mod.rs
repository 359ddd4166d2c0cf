/*!
 * Parking Substrate
 *
 * Keyed wait/wake primitives every blocking component is built on:
 * - Futex-based (parking_lot_core) for minimal overhead
 * - Condvar-based (cross-platform) for reliability
 * - Adaptive spinwait for low-latency scenarios
 *
 * # Architecture
 *
 * A [`WaitQueue`] parks threads on arbitrary `u64` keys (lock words,
 * ticket numbers, barrier generations) with a strategy selected at
 * construction. Every park call carries a `should_park` closure that is
 * re-validated at the last moment before the thread sleeps, so a wake
 * issued between the caller's own check and the sleep is never lost.
 *
 * # Locking discipline
 *
 * `should_park` runs inside the parking machinery (futex bucket locked,
 * or condvar slot mutex held) and therefore must be lock-free: atomic
 * reads only, no mutexes, no parking calls. Primitives that guard their
 * state with a mutex mirror the waited-on condition into atomics for
 * the validator. On the wake side, state is published (atomics stored,
 * locks dropped) BEFORE `unpark_one`/`unpark_all` is called; together
 * the two rules make the validate-then-sleep window airtight.
 */

mod condvar;
mod config;
mod futex;
mod queue;
mod spin;
mod traits;

pub use condvar::CondvarPark;
pub use config::{ParkConfig, StrategyType};
pub use futex::FutexPark;
pub use queue::WaitQueue;
pub use spin::SpinPark;
pub use traits::{Parker, WakeResult};

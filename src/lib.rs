/*!
 * threadgate
 * Thread-coordination primitives built from first principles
 *
 * Lock-free atomic cells, parking-based locks and semaphores, one-shot
 * and cyclic barriers, a rendezvous exchanger, and blocking/striped
 * collections. The library coordinates already-running threads; it never
 * spawns, joins, or schedules them. Blocking calls park through a keyed
 * [`park::WaitQueue`] and honor cooperative cancellation via
 * [`cancel::CancelToken`].
 */

pub mod atomic;
pub mod cancel;
pub mod collections;
pub mod coord;
pub mod core;
pub mod lock;
pub mod park;
pub mod semaphore;

// Re-exports
pub use atomic::{AtomicArray, AtomicCell, AtomicRef};
pub use cancel::CancelToken;
pub use collections::{BoundedQueue, SnapshotList, StripedMap, UnboundedQueue};
pub use coord::{
    BarrierWaitResult, CountdownLatch, CyclicBarrier, Exchanger, PhaseBarrier, PhaseOutcome,
};
pub use crate::core::errors::{BarrierError, WaitError, WaitResult};
pub use lock::{
    Mutex, MutexGuard, ReentrantMutex, ReentrantMutexGuard, RwLock, RwLockReadGuard,
    RwLockWriteGuard,
};
pub use park::{ParkConfig, StrategyType, WaitQueue};
pub use semaphore::{Semaphore, SemaphorePermit};

/*!
 * Locks
 *
 * Mutual-exclusion and read/write locks built on an atomic fast path
 * and the parking substrate:
 * - [`Mutex`]: CAS fast path, parked slow path, optional FIFO fairness
 * - [`ReentrantMutex`]: tracks owning thread and hold count
 * - [`RwLock`]: many readers XOR one writer, writer-preference fair mode
 *
 * Guards release on drop, so unlocking from a non-holder is
 * unrepresentable in the typed API. The raw layer panics on that misuse
 * instead of corrupting state.
 */

mod mutex;
mod reentrant;
mod rwlock;

pub use mutex::{Mutex, MutexGuard, RawMutex};
pub use reentrant::{ReentrantMutex, ReentrantMutexGuard};
pub use rwlock::{RwLock, RwLockReadGuard, RwLockWriteGuard};

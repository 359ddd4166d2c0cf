/*!
 * Concurrent Collections
 *
 * - [`BoundedQueue`]: fixed-capacity FIFO with blocking put/take
 * - [`StripedMap`]: lock-striped map with per-key atomic compute
 * - [`SnapshotList`]: copy-on-write list for read-mostly workloads
 * - [`UnboundedQueue`]: lock-free MPMC queue with optional blocking pop
 */

mod bounded;
mod snapshot;
mod striped;
mod unbounded;

pub use bounded::{BoundedQueue, PutError};
pub use snapshot::SnapshotList;
pub use striped::StripedMap;
pub use unbounded::UnboundedQueue;

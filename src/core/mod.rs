/*!
 * Core Module
 * Error taxonomy, tuning limits, and shard sizing shared by every primitive
 */

pub mod errors;
pub mod limits;
pub mod shard;

// Re-export for convenience
pub use errors::*;
pub use shard::{ShardPolicy, WorkloadProfile};

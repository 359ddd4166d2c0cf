/*!
 * Coordination Points
 *
 * Multi-party rendezvous primitives:
 * - [`CountdownLatch`]: one-shot descending gate
 * - [`CyclicBarrier`]: reusable N-party rendezvous with generations
 * - [`PhaseBarrier`]: multi-phase rendezvous with dynamic registration
 * - [`Exchanger`]: two-party value swap
 */

mod barrier;
mod exchanger;
mod latch;
mod phaser;

pub use barrier::{BarrierWaitResult, CyclicBarrier};
pub use exchanger::{ExchangeError, Exchanger};
pub use latch::CountdownLatch;
pub use phaser::{PartyId, PhaseBarrier, PhaseOutcome};

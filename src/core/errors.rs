/*!
 * Error Types
 * Recoverable wait outcomes shared across the blocking primitives
 *
 * Timeouts and cancellations are ordinary returned outcomes the caller
 * handles. Misuse (unlocking a lock the caller does not hold,
 * deregistering an unknown barrier party) is a programming error and
 * panics instead of being encoded here.
 */

use thiserror::Error;

/// Result type for blocking and timed operations
pub type WaitResult<T> = Result<T, WaitError>;

/// Why a blocking or timed operation returned without succeeding
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitError {
    /// The timed form did not succeed within its bound
    #[error("operation timed out")]
    Timeout,

    /// The caller's cancel token fired while it was blocked
    #[error("operation cancelled")]
    Cancelled,
}

/// Why a cyclic barrier wait failed
///
/// A broken generation poisons every party waiting in it: the party
/// whose timeout or cancellation broke the barrier gets `Timeout` /
/// `Cancelled`, every other party of that generation gets `Broken`.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarrierError {
    /// The current generation was invalidated by a timeout,
    /// cancellation, or a panicking barrier action
    #[error("barrier generation is broken")]
    Broken,

    /// This party's timed wait elapsed (and broke the generation)
    #[error("barrier wait timed out")]
    Timeout,

    /// This party was cancelled (and broke the generation)
    #[error("barrier wait cancelled")]
    Cancelled,
}

impl From<WaitError> for BarrierError {
    fn from(err: WaitError) -> Self {
        match err {
            WaitError::Timeout => BarrierError::Timeout,
            WaitError::Cancelled => BarrierError::Cancelled,
        }
    }
}

/*!
 * Exchanger
 *
 * Two-party rendezvous that swaps one value each way.
 *
 * # Design
 *
 * A single mutex-guarded slot walks Empty -> Offered -> Fulfilled ->
 * Empty per exchange. The first party deposits its value and parks on a
 * ticket; the second replaces the offer with its own value, wakes the
 * ticket, and leaves with the first value. A timed-out first party
 * withdraws its offer under the same lock, so no partner ever observes
 * a stale or half-written slot.
 */

use crate::cancel::CancelToken;
use crate::park::{ParkConfig, WaitQueue};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Parking key for parties waiting out a busy slot; tickets start at 1
const SLOT_FREE_KEY: u64 = 0;

/// Why an exchange failed; carries the caller's value back out
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ExchangeError<T> {
    /// No partner arrived within the bound
    #[error("exchange timed out")]
    Timeout(T),

    /// The caller's cancel token fired first
    #[error("exchange cancelled")]
    Cancelled(T),
}

enum Slot<T> {
    Empty,
    /// First party's deposit, keyed by its parking ticket
    Offered { ticket: u64, value: T },
    /// Second party's reply, waiting for the first party to collect
    Fulfilled { ticket: u64, value: T },
}

/// Two-party single-value swap point
///
/// # Examples
///
/// ```
/// use threadgate::{CancelToken, coord::Exchanger};
/// use std::sync::Arc;
///
/// let swap = Arc::new(Exchanger::new());
/// let partner = {
///     let swap = Arc::clone(&swap);
///     std::thread::spawn(move || swap.exchange("b", CancelToken::ignored()).unwrap())
/// };
///
/// assert_eq!(swap.exchange("a", CancelToken::ignored()).unwrap(), "b");
/// assert_eq!(partner.join().unwrap(), "a");
/// ```
pub struct Exchanger<T> {
    slot: parking_lot::Mutex<Slot<T>>,
    /// Ticket of the pending Fulfilled reply (0 = none), maintained
    /// under the slot lock, so park validators can read it without
    /// locking
    fulfilled_for: AtomicU64,
    next_ticket: AtomicU64,
    queue: Arc<WaitQueue>,
}

impl<T: Send> Exchanger<T> {
    /// Create an exchanger with an empty slot
    pub fn new() -> Self {
        Self {
            slot: parking_lot::Mutex::new(Slot::Empty),
            fulfilled_for: AtomicU64::new(0),
            next_ticket: AtomicU64::new(1),
            queue: Arc::new(WaitQueue::new(ParkConfig::keyed())),
        }
    }

    /// Swap `value` with a partner, blocking until one arrives.
    ///
    /// For any pair of concurrent calls `exchange(a)` / `exchange(b)`,
    /// one returns `b` and the other `a`.
    ///
    /// # Errors
    ///
    /// [`ExchangeError::Cancelled`] (with `value` returned) if `cancel`
    /// fires while waiting.
    pub fn exchange(&self, value: T, cancel: &CancelToken) -> Result<T, ExchangeError<T>> {
        self.exchange_inner(value, None, cancel)
    }

    /// Swap with a bound on the wait for a partner.
    ///
    /// # Errors
    ///
    /// [`ExchangeError::Timeout`] / [`ExchangeError::Cancelled`], each
    /// carrying `value` back to the caller; the slot is vacated so a
    /// later partner never sees the aborted offer.
    pub fn exchange_for(
        &self,
        value: T,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> Result<T, ExchangeError<T>> {
        self.exchange_inner(value, Some(Instant::now() + timeout), cancel)
    }

    fn exchange_inner(
        &self,
        value: T,
        deadline: Option<Instant>,
        cancel: &CancelToken,
    ) -> Result<T, ExchangeError<T>> {
        let mut value = Some(value);

        // Phase 1: claim a role. Either fulfil a pending offer and
        // return at once, or deposit our own offer.
        let _busy_watch = cancel.watch(&self.queue, SLOT_FREE_KEY);
        let ticket = loop {
            {
                let mut slot = self.slot.lock();
                match std::mem::replace(&mut *slot, Slot::Empty) {
                    Slot::Empty => {
                        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
                        *slot = Slot::Offered {
                            ticket,
                            value: value.take().expect("value deposited once"),
                        };
                        break ticket;
                    }
                    Slot::Offered {
                        ticket,
                        value: first,
                    } => {
                        // We are the second party: swap in place and wake
                        *slot = Slot::Fulfilled {
                            ticket,
                            value: value.take().expect("value deposited once"),
                        };
                        self.fulfilled_for.store(ticket, Ordering::SeqCst);
                        drop(slot);
                        self.queue.unpark_all(ticket);
                        return Ok(first);
                    }
                    busy @ Slot::Fulfilled { .. } => {
                        // Previous exchange not collected yet
                        *slot = busy;
                    }
                }
            }

            if cancel.is_cancelled() {
                return Err(ExchangeError::Cancelled(
                    value.take().expect("value still held"),
                ));
            }
            if let Some(d) = deadline {
                if Instant::now() >= d {
                    return Err(ExchangeError::Timeout(
                        value.take().expect("value still held"),
                    ));
                }
            }

            self.queue.park(SLOT_FREE_KEY, deadline, &mut || {
                self.fulfilled_for.load(Ordering::SeqCst) != 0 && !cancel.is_cancelled()
            });
        };

        // Phase 2: wait for a partner to fulfil our offer.
        let _watch = cancel.watch(&self.queue, ticket);
        loop {
            {
                let mut slot = self.slot.lock();
                if matches!(&*slot, Slot::Fulfilled { ticket: t, .. } if *t == ticket) {
                    let Slot::Fulfilled { value: reply, .. } =
                        std::mem::replace(&mut *slot, Slot::Empty)
                    else {
                        unreachable!("matched Fulfilled above");
                    };
                    self.fulfilled_for.store(0, Ordering::SeqCst);
                    drop(slot);
                    self.queue.unpark_all(SLOT_FREE_KEY);
                    return Ok(reply);
                }
            }

            let timed_out = deadline.is_some_and(|d| Instant::now() >= d);
            if cancel.is_cancelled() || timed_out {
                let withdrawn = {
                    let mut slot = self.slot.lock();
                    match std::mem::replace(&mut *slot, Slot::Empty) {
                        Slot::Offered { ticket: t, value } if t == ticket => Some(value),
                        other => {
                            // A partner completed concurrently; keep the
                            // slot and collect the reply on the next pass
                            *slot = other;
                            None
                        }
                    }
                };
                if let Some(mine) = withdrawn {
                    self.queue.unpark_all(SLOT_FREE_KEY);
                    return Err(if cancel.is_cancelled() {
                        ExchangeError::Cancelled(mine)
                    } else {
                        ExchangeError::Timeout(mine)
                    });
                }
                continue;
            }

            self.queue.park(ticket, deadline, &mut || {
                self.fulfilled_for.load(Ordering::SeqCst) != ticket && !cancel.is_cancelled()
            });
        }
    }
}

impl<T: Send> Default for Exchanger<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for Exchanger<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match &*self.slot.lock() {
            Slot::Empty => "empty",
            Slot::Offered { .. } => "offered",
            Slot::Fulfilled { .. } => "fulfilled",
        };
        f.debug_struct("Exchanger").field("slot", &state).finish()
    }
}

//! Cancellable sleeps for the backoff schedule.
//!
//! A [CancelHandle] owns the sending half of a zero-capacity channel; every [CancelSignal]
//! clone holds the receiving half. Cancelling drops the sender, which disconnects the
//! channel and wakes every sleeping receiver at once.

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("operation cancelled")]
pub struct Cancelled;

/// Create a linked handle/signal pair.
pub fn cancel_pair() -> (CancelHandle, CancelSignal) {
    let (tx, rx) = crossbeam_channel::bounded(0);
    (
        CancelHandle { _tx: tx },
        CancelSignal {
            rx,
            deadline: None,
        },
    )
}

/// Fires the linked signals when cancelled or dropped.
#[derive(Debug)]
pub struct CancelHandle {
    _tx: Sender<()>,
}

impl CancelHandle {
    pub fn cancel(self) {
        drop(self);
    }
}

#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: Receiver<()>,
    deadline: Option<Instant>,
}

impl Default for CancelSignal {
    fn default() -> Self {
        Self::never()
    }
}

impl CancelSignal {
    /// A signal that only fires on its deadline, if one is set.
    pub fn never() -> Self {
        Self {
            rx: crossbeam_channel::never(),
            deadline: None,
        }
    }

    /// Also fire once `deadline` has passed.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(existing) => existing.min(deadline),
            None => deadline,
        });
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        match Instant::now().checked_add(timeout) {
            Some(deadline) => self.with_deadline(deadline),
            None => self,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return true;
        }
        !matches!(self.rx.try_recv(), Err(TryRecvError::Empty))
    }

    /// Sleep for `duration` unless cancelled first. A deadline falling inside the sleep
    /// ends it early with `Cancelled`.
    pub fn sleep(&self, duration: Duration) -> Result<(), Cancelled> {
        if self.is_cancelled() {
            return Err(Cancelled);
        }
        if duration.is_zero() {
            return Ok(());
        }
        let now = Instant::now();
        let (wait, cut_by_deadline) = match self.deadline {
            Some(deadline) if now.checked_add(duration).map_or(true, |wake| deadline < wake) => {
                (deadline.saturating_duration_since(now), true)
            }
            _ => (duration, false),
        };
        match self.rx.recv_timeout(wait) {
            Err(RecvTimeoutError::Timeout) if !cut_by_deadline => Ok(()),
            _ => Err(Cancelled),
        }
    }
}

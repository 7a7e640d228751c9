//! Completion signals for asynchronous device work
//!
//! A backend that launches work asynchronously hands out a [`CompletionSignal`]
//! with every buffer the work writes, and keeps the matching
//! [`CompletionNotifier`]. Readers block on the signal; the producer fires the
//! notifier exactly once when the work has finished (or failed).
//!
//! ```text
//! forward() ──launch──▶ device stream
//!    │                      │
//!    │ CompletionSignal     │ CompletionNotifier
//!    ▼                      ▼
//! await_readable() ◀──── complete() / fail()
//! ```

use std::fmt;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::error::{BackendError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Status {
    Pending,
    Ready,
    Failed(String),
}

#[derive(Debug)]
struct SignalState {
    status: Mutex<Status>,
    cond: Condvar,
}

/// Readiness of a value produced by device work
///
/// Cloning a signal yields another observer of the same producer. A signal
/// created with [`CompletionSignal::ready`] has no producer and never blocks.
#[derive(Clone, Default)]
pub struct CompletionSignal {
    state: Option<Arc<SignalState>>,
}

impl CompletionSignal {
    /// Signal for a value that is already readable
    pub fn ready() -> Self {
        Self { state: None }
    }

    /// Signal for a value still being produced, plus the producer's notifier
    pub fn pending() -> (Self, CompletionNotifier) {
        let state = Arc::new(SignalState {
            status: Mutex::new(Status::Pending),
            cond: Condvar::new(),
        });
        (
            Self {
                state: Some(Arc::clone(&state)),
            },
            CompletionNotifier { state, fired: false },
        )
    }

    /// True once the producer has completed or failed
    pub fn is_complete(&self) -> bool {
        match &self.state {
            None => true,
            Some(state) => *state.status.lock() != Status::Pending,
        }
    }

    /// Block until the producing work has finished
    ///
    /// Idempotent. Returns [`BackendError::DeviceFailure`] if the producer
    /// reported a failure; every later call reports the same failure.
    pub fn await_readable(&self) -> Result<()> {
        let Some(state) = &self.state else {
            return Ok(());
        };

        let mut status = state.status.lock();
        while *status == Status::Pending {
            state.cond.wait(&mut status);
        }
        Self::outcome(&status)
    }

    fn outcome(status: &Status) -> Result<()> {
        match status {
            Status::Failed(reason) => Err(BackendError::DeviceFailure(reason.clone())),
            _ => Ok(()),
        }
    }
}

impl fmt::Debug for CompletionSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = match &self.state {
            None => "ready".to_string(),
            Some(state) => match &*state.status.lock() {
                Status::Pending => "pending".to_string(),
                Status::Ready => "ready".to_string(),
                Status::Failed(reason) => format!("failed({reason})"),
            },
        };
        f.debug_struct("CompletionSignal").field("status", &status).finish()
    }
}

/// Producer side of a [`CompletionSignal`]
///
/// Dropping a notifier that never fired fails the signal, so readers cannot
/// block forever on a producer that panicked or was abandoned.
pub struct CompletionNotifier {
    state: Arc<SignalState>,
    fired: bool,
}

impl CompletionNotifier {
    /// Mark the produced values readable and wake every waiter
    pub fn complete(mut self) {
        self.finish(Status::Ready);
    }

    /// Mark the producing work failed and wake every waiter
    pub fn fail(mut self, reason: impl Into<String>) {
        self.finish(Status::Failed(reason.into()));
    }

    fn finish(&mut self, outcome: Status) {
        let mut status = self.state.status.lock();
        *status = outcome;
        self.fired = true;
        drop(status);
        self.state.cond.notify_all();
    }
}

impl Drop for CompletionNotifier {
    fn drop(&mut self) {
        if !self.fired {
            tracing::warn!("completion notifier dropped before the producer finished");
            self.finish(Status::Failed("producer abandoned before completion".into()));
        }
    }
}

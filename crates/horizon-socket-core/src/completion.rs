//! One-shot completion pairs for blocking on asynchronous results.
//!
//! A [`Resolver`] delivers exactly one value; the matching [`Waiter`] blocks
//! on a condition variable until that value arrives, a deadline passes, or
//! the resolver is dropped unresolved.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// Why a wait ended without a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitError {
    /// The deadline passed first.
    TimedOut,
    /// The resolver was dropped without resolving.
    Abandoned,
}

impl fmt::Display for WaitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TimedOut => write!(f, "Wait deadline elapsed"),
            Self::Abandoned => write!(f, "Completion dropped without a result"),
        }
    }
}

impl std::error::Error for WaitError {}

enum Slot<T> {
    Pending,
    Resolved(T),
    Abandoned,
    Taken,
}

struct CompletionState<T> {
    slot: Mutex<Slot<T>>,
    condvar: Condvar,
}

/// The producing half of a completion pair.
pub struct Resolver<T> {
    inner: Arc<CompletionState<T>>,
}

impl<T> Resolver<T> {
    /// Deliver the value and wake the waiter.
    pub fn resolve(self, value: T) {
        let mut slot = self.inner.slot.lock();
        if matches!(*slot, Slot::Pending) {
            *slot = Slot::Resolved(value);
            self.inner.condvar.notify_all();
        }
    }
}

impl<T> Drop for Resolver<T> {
    fn drop(&mut self) {
        let mut slot = self.inner.slot.lock();
        if matches!(*slot, Slot::Pending) {
            *slot = Slot::Abandoned;
            self.inner.condvar.notify_all();
        }
    }
}

/// The blocking half of a completion pair.
pub struct Waiter<T> {
    inner: Arc<CompletionState<T>>,
}

impl<T> Waiter<T> {
    /// Block until resolved or abandoned.
    pub fn wait(self) -> Result<T, WaitError> {
        let mut slot = self.inner.slot.lock();
        while matches!(*slot, Slot::Pending) {
            self.inner.condvar.wait(&mut slot);
        }
        take(&mut slot)
    }

    /// Block until resolved, abandoned, or `deadline` passes.
    ///
    /// Spurious wakeups are absorbed: the wait only gives up once the clock
    /// has actually reached the deadline.
    pub fn wait_deadline(self, deadline: Instant) -> Result<T, WaitError> {
        let mut slot = self.inner.slot.lock();
        while matches!(*slot, Slot::Pending) {
            if self.inner.condvar.wait_until(&mut slot, deadline).timed_out()
                && matches!(*slot, Slot::Pending)
            {
                return Err(WaitError::TimedOut);
            }
        }
        take(&mut slot)
    }

    /// Block for at most `timeout`.
    pub fn wait_timeout(self, timeout: Duration) -> Result<T, WaitError> {
        self.wait_deadline(Instant::now() + timeout)
    }

    /// Check if a value (or abandonment) is available without blocking.
    pub fn is_ready(&self) -> bool {
        !matches!(*self.inner.slot.lock(), Slot::Pending)
    }
}

fn take<T>(slot: &mut Slot<T>) -> Result<T, WaitError> {
    match std::mem::replace(slot, Slot::Taken) {
        Slot::Resolved(value) => Ok(value),
        _ => Err(WaitError::Abandoned),
    }
}

/// Create a resolver/waiter pair.
pub fn pair<T>() -> (Resolver<T>, Waiter<T>) {
    let state = Arc::new(CompletionState {
        slot: Mutex::new(Slot::Pending),
        condvar: Condvar::new(),
    });

    (
        Resolver {
            inner: state.clone(),
        },
        Waiter { inner: state },
    )
}

static_assertions::assert_impl_all!(Resolver<String>: Send, Sync);
static_assertions::assert_impl_all!(Waiter<String>: Send, Sync);

//! Worker identity tracking for serial execution contexts.
//!
//! Every [`ExecutionContext`](crate::context::ExecutionContext) owns a
//! [`WorkerToken`]. While the worker thread is running a task the token is
//! installed in a thread-local slot, which lets code ask "am I already inside
//! this worker?" without comparing OS thread handles or queue labels.
//!
//! # Example
//!
//! ```
//! use horizon_socket_core::affinity::WorkerToken;
//!
//! let token = WorkerToken::new();
//! assert!(!token.is_current());
//!
//! {
//!     let _scope = token.enter();
//!     assert!(token.is_current());
//! }
//!
//! assert!(!token.is_current());
//! ```

use std::cell::Cell;
use std::sync::atomic::{AtomicU64, Ordering};

/// Source of unique worker identities.
static NEXT_WORKER_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    /// The token of the worker currently executing on this thread, if any.
    static CURRENT_WORKER: Cell<Option<u64>> = const { Cell::new(None) };
}

/// Identity of a single serial worker.
///
/// Tokens are cheap to copy and compare. Two tokens are equal only if they
/// were copied from the same [`WorkerToken::new`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkerToken {
    id: u64,
}

impl Default for WorkerToken {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerToken {
    /// Allocate a fresh token.
    pub fn new() -> Self {
        Self {
            id: NEXT_WORKER_ID.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// The numeric id, mostly useful for log fields.
    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Check if the calling thread is currently executing inside this worker.
    #[inline]
    pub fn is_current(&self) -> bool {
        CURRENT_WORKER.with(|current| current.get() == Some(self.id))
    }

    /// Mark the calling thread as executing inside this worker.
    ///
    /// The previous marker is restored when the returned scope is dropped, so
    /// scopes nest correctly.
    pub fn enter(&self) -> WorkerScope {
        let previous = CURRENT_WORKER.with(|current| current.replace(Some(self.id)));
        WorkerScope { previous }
    }
}

/// Guard returned by [`WorkerToken::enter`].
#[derive(Debug)]
#[must_use = "the worker marker is removed as soon as the scope is dropped"]
pub struct WorkerScope {
    previous: Option<u64>,
}

impl Drop for WorkerScope {
    fn drop(&mut self) {
        let previous = self.previous;
        CURRENT_WORKER.with(|current| current.set(previous));
    }
}

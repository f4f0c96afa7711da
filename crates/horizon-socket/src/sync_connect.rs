//! Blocking connect.

use std::time::{Duration, Instant};

use horizon_socket_core::completion::{self, WaitError};
use horizon_socket_core::logging::{PerfSpan, targets};

use crate::error::{Result, SocketError};
use crate::socket::Socket;

/// Extra time the blocking wait allows past the connect timeout.
///
/// The socket's own deadline fires at `timeout` and reports
/// [`SocketError::ConnectTimeout`]. The blocking wait only gives up with
/// [`SocketError::SyncWaitTimeout`] if no resolution arrives even after this
/// margin, which means the socket's worker is stalled.
pub const DEFAULT_SYNC_GRACE: Duration = Duration::from_millis(250);

/// Turns [`Socket::connect`] into a call that blocks the calling thread.
#[derive(Debug)]
pub struct SyncConnectAdapter<'a> {
    socket: &'a Socket,
    grace: Duration,
}

impl<'a> SyncConnectAdapter<'a> {
    /// Wrap `socket` with the default grace period.
    pub fn new(socket: &'a Socket) -> Self {
        Self {
            socket,
            grace: DEFAULT_SYNC_GRACE,
        }
    }

    /// Set how long to wait past the connect timeout.
    pub fn grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Connect and wait for the outcome.
    ///
    /// A connect cancelled by [`Socket::close`] before it resolved reports
    /// [`SocketError::NotConnected`].
    pub fn connect(&self, timeout: Duration) -> Result<()> {
        if self.socket.is_worker_thread() {
            return Err(SocketError::WouldBlock);
        }

        let _perf = PerfSpan::new("sync_connect");
        // `None` when the timeout is too large to represent: wait unbounded.
        let deadline = Instant::now()
            .checked_add(timeout)
            .and_then(|at| at.checked_add(self.grace));
        let (resolver, waiter) = completion::pair::<std::result::Result<(), Option<SocketError>>>();
        self.socket.connect(timeout, move |connected, error| {
            resolver.resolve(if connected { Ok(()) } else { Err(error) });
        });

        let outcome = match deadline {
            Some(deadline) => waiter.wait_deadline(deadline),
            None => waiter.wait(),
        };
        match outcome {
            Ok(Ok(())) => Ok(()),
            Ok(Err(Some(error))) => Err(error),
            Ok(Err(None)) => Err(SocketError::NotConnected),
            Err(WaitError::TimedOut) => {
                tracing::warn!(
                    target: targets::SOCKET,
                    host = self.socket.host(),
                    ?timeout,
                    "blocking connect gave up waiting"
                );
                Err(SocketError::SyncWaitTimeout)
            }
            Err(WaitError::Abandoned) => Err(SocketError::ContextStopped),
        }
    }
}

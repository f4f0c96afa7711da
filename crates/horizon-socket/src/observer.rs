//! Observer notifications.
//!
//! Socket events are delivered to a [`SocketObserver`] on the observer's
//! [`Executor`], never on the socket's own worker. An observer may therefore
//! call straight back into the socket (for instance `close()` from
//! `did_receive_data`) without waiting on the transition that produced the
//! event.
//!
//! The socket only holds a weak reference to its observer. An observer that
//! has been dropped simply stops receiving events.

use std::sync::{Arc, Weak};

use bytes::Bytes;
use horizon_socket_core::Executor;
use horizon_socket_core::logging::targets;

use crate::error::SocketError;
use crate::socket::{Socket, SocketShared};

/// Receives connection lifecycle and data events. All methods default to
/// no-ops.
///
/// Events for one socket arrive in the order their transitions happened,
/// provided the executor runs tasks in FIFO order (as
/// [`SerialQueue`](horizon_socket_core::SerialQueue) does).
pub trait SocketObserver: Send + Sync + 'static {
    /// The transport is ready.
    fn did_connect(&self, _socket: &Socket) {}

    /// The connection failed. `did_close` follows once teardown is done.
    fn did_fail(&self, _socket: &Socket, _error: &SocketError) {}

    /// The connection is gone. Sent exactly once per connection.
    fn did_close(&self, _socket: &Socket) {}

    /// A chunk arrived. For datagram transports this is one datagram.
    fn did_receive_data(&self, _socket: &Socket, _data: Bytes) {}
}

/// Completion callback for a single send.
pub type SendCompletion = Box<dyn FnOnce(Option<SocketError>) + Send + 'static>;

/// A lifecycle event waiting to be delivered.
#[derive(Debug)]
pub(crate) enum SocketEvent {
    Connected,
    Failed(SocketError),
    Closed,
    Data(Bytes),
}

impl SocketEvent {
    fn name(&self) -> &'static str {
        match self {
            Self::Connected => "did_connect",
            Self::Failed(_) => "did_fail",
            Self::Closed => "did_close",
            Self::Data(_) => "did_receive_data",
        }
    }

    fn deliver(self, observer: &dyn SocketObserver, socket: &Socket) {
        match self {
            Self::Connected => observer.did_connect(socket),
            Self::Failed(error) => observer.did_fail(socket, &error),
            Self::Closed => observer.did_close(socket),
            Self::Data(data) => observer.did_receive_data(socket, data),
        }
    }
}

/// Posts events and send completions onto the observer executor.
pub(crate) struct ObserverDispatcher {
    executor: Arc<dyn Executor>,
    observer: Option<Weak<dyn SocketObserver>>,
    socket: Weak<SocketShared>,
}

impl ObserverDispatcher {
    pub(crate) fn new(executor: Arc<dyn Executor>, observer: Option<Weak<dyn SocketObserver>>) -> Self {
        Self {
            executor,
            observer,
            socket: Weak::new(),
        }
    }

    /// Bind to the socket handed to observers.
    pub(crate) fn attach(&mut self, socket: Weak<SocketShared>) {
        self.socket = socket;
    }

    pub(crate) fn set_observer(&mut self, observer: Option<Weak<dyn SocketObserver>>) {
        self.observer = observer;
    }

    /// Post `event` to the current observer.
    ///
    /// The observer and the socket are resolved now, so an event posted
    /// before the observer is swapped still reaches the old observer.
    pub(crate) fn post(&self, event: SocketEvent) {
        let Some(observer) = self.observer.as_ref().and_then(Weak::upgrade) else {
            tracing::trace!(target: targets::SOCKET, event = event.name(), "no observer, event dropped");
            return;
        };
        let Some(socket) = self.socket.upgrade().map(Socket::from_shared) else {
            return;
        };

        tracing::trace!(target: targets::SOCKET, event = event.name(), "posting event");
        self.executor
            .execute(Box::new(move || event.deliver(observer.as_ref(), &socket)));
    }

    /// Post a send completion.
    pub(crate) fn complete_send(&self, completion: SendCompletion, error: Option<SocketError>) {
        self.executor.execute(Box::new(move || completion(error)));
    }
}

impl std::fmt::Debug for ObserverDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverDispatcher")
            .field(
                "observer_alive",
                &self.observer.as_ref().is_some_and(|o| o.strong_count() > 0),
            )
            .finish_non_exhaustive()
    }
}

//! The socket state machine.
//!
//! [`SocketCore`] is the state of a socket's `ExecutionContext`. Every
//! mutation happens in one of its methods, on the socket's worker, one at a
//! time. Transport I/O runs as tokio tasks that post their results back here.
//!
//! ```text
//!   Setup ──connect──► Connecting ──ready──► Ready
//!     │                    │                   │
//!     │ close              │ error/timeout     │ error
//!     │                    ▼                   ▼
//!     │                 Failed ◄───────────────┘
//!     │
//!     └──────────────► Cancelled ◄── close / end-of-stream
//! ```
//!
//! Every error funnels through [`SocketCore::fail`]. Every user or peer
//! initiated shutdown funnels through [`SocketCore::close`].

use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::Bytes;
use horizon_socket_core::logging::{span_names, targets};
use horizon_socket_core::{DeadlineTimer, SerialState, Task, WeakContext};
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::config::MAX_READ_SIZE;
use crate::error::{Result, SocketError};
use crate::observer::{ObserverDispatcher, SendCompletion, SocketEvent, SocketObserver};
use crate::socket::SocketShared;
use crate::state::ConnectionState;
use crate::transport::{ConnectTarget, Connector, TransportIo, TransportReader, TransportWriter};

/// Completion callback for a connect attempt: `(success, error)`.
///
/// Cancellation resolves as `(false, None)`.
pub type ConnectCompletion = Box<dyn FnOnce(bool, Option<SocketError>) + Send + 'static>;

/// Mutable state of one socket, owned by its execution context.
pub(crate) struct SocketCore {
    target: ConnectTarget,
    state: ConnectionState,
    published: Arc<Mutex<ConnectionState>>,
    pending_connect: Option<ConnectCompletion>,
    deadline: DeadlineTimer,
    connecting: Option<JoinHandle<()>>,
    reader: Option<JoinHandle<()>>,
    writer: Option<JoinHandle<()>>,
    write_queue: Option<mpsc::UnboundedSender<Bytes>>,
    /// Completions of writes handed to the writer task, oldest first.
    pending_sends: VecDeque<Option<SendCompletion>>,
    dispatcher: ObserverDispatcher,
    deferred: Vec<Task>,
    context: WeakContext<SocketCore>,
    runtime: Handle,
    connector: Arc<dyn Connector>,
}

impl SerialState for SocketCore {
    fn drain_deferred(&mut self) -> Vec<Task> {
        std::mem::take(&mut self.deferred)
    }
}

fn deadline_of(core: &mut SocketCore) -> &mut DeadlineTimer {
    &mut core.deadline
}

impl SocketCore {
    pub(crate) fn new(
        target: ConnectTarget,
        published: Arc<Mutex<ConnectionState>>,
        dispatcher: ObserverDispatcher,
        context: WeakContext<SocketCore>,
        runtime: Handle,
        connector: Arc<dyn Connector>,
    ) -> Self {
        Self {
            target,
            state: ConnectionState::Setup,
            published,
            pending_connect: None,
            deadline: DeadlineTimer::new(),
            connecting: None,
            reader: None,
            writer: None,
            write_queue: None,
            pending_sends: VecDeque::new(),
            dispatcher,
            deferred: Vec::new(),
            context,
            runtime,
            connector,
        }
    }

    /// Bind the socket handle passed to observer callbacks.
    pub(crate) fn attach(&mut self, socket: Weak<SocketShared>) {
        self.dispatcher.attach(socket);
    }

    pub(crate) fn set_observer(&mut self, observer: Option<Weak<dyn SocketObserver>>) {
        self.dispatcher.set_observer(observer);
    }

    // -------------------------------------------------------------------------
    // Operations
    // -------------------------------------------------------------------------

    /// Start a connect attempt. Only valid from `Setup`.
    pub(crate) fn connect(&mut self, timeout: Duration, completion: ConnectCompletion) {
        if self.state != ConnectionState::Setup {
            tracing::warn!(
                target: targets::SOCKET,
                host = %self.target.host,
                state = %self.state,
                "connect rejected"
            );
            let error = SocketError::InvalidState(Box::new(self.state.clone()));
            self.defer(move || completion(false, Some(error)));
            return;
        }

        let span = tracing::debug_span!(
            target: targets::SOCKET,
            span_names::CONNECT,
            host = %self.target.host,
            port = self.target.port,
            kind = %self.target.config.kind(),
        );
        let _entered = span.enter();

        self.transition(ConnectionState::Connecting);
        self.pending_connect = Some(completion);
        self.deadline.arm(
            &self.runtime,
            timeout,
            self.context.clone(),
            deadline_of,
            |core| core.fail(SocketError::ConnectTimeout),
        );

        let establish = self.connector.connect(&self.target);
        let context = self.context.clone();
        self.connecting = Some(self.runtime.spawn(async move {
            let result = establish.await;
            context.run_serialized(move |core| core.on_connect_result(result));
        }));
    }

    /// Queue `data` for transmission. Only valid in `Ready`.
    pub(crate) fn send(&mut self, data: Bytes, completion: Option<SendCompletion>) {
        let queued = match (&self.state, &self.write_queue) {
            (ConnectionState::Ready, Some(queue)) => {
                let len = data.len();
                let queued = queue.send(data).is_ok();
                if queued {
                    tracing::trace!(target: targets::SOCKET, len, "send queued");
                }
                queued
            }
            _ => false,
        };

        if queued {
            self.pending_sends.push_back(completion);
        } else if let Some(completion) = completion {
            self.dispatcher
                .complete_send(completion, Some(SocketError::NotConnected));
        }
    }

    /// Close the connection. Idempotent.
    pub(crate) fn close(&mut self) {
        match self.state {
            ConnectionState::Setup => {
                self.transition(ConnectionState::Cancelled);
                self.dispatcher.post(SocketEvent::Closed);
            }
            ConnectionState::Connecting | ConnectionState::Ready => {
                self.deadline.disarm();
                self.transition(ConnectionState::Cancelled);
                if let Some(completion) = self.pending_connect.take() {
                    self.defer(move || completion(false, None));
                }
                self.teardown(SocketError::NotConnected);
                self.dispatcher.post(SocketEvent::Closed);
            }
            ConnectionState::Failed(_) | ConnectionState::Cancelled => {
                tracing::trace!(target: targets::SOCKET, state = %self.state, "close ignored");
            }
        }
    }

    /// The single failure path: disarm, resolve, notify, tear down.
    pub(crate) fn fail(&mut self, error: SocketError) {
        if !matches!(self.state, ConnectionState::Connecting | ConnectionState::Ready) {
            tracing::trace!(target: targets::SOCKET, %error, state = %self.state, "late error ignored");
            return;
        }

        tracing::warn!(
            target: targets::SOCKET,
            host = %self.target.host,
            port = self.target.port,
            %error,
            "socket failed"
        );

        self.deadline.disarm();
        self.transition(ConnectionState::Failed(error.clone()));
        if let Some(completion) = self.pending_connect.take() {
            let error = error.clone();
            self.defer(move || completion(false, Some(error)));
        }
        self.dispatcher.post(SocketEvent::Failed(error.clone()));
        self.teardown(error);
        self.dispatcher.post(SocketEvent::Closed);
    }

    // -------------------------------------------------------------------------
    // Transport events
    // -------------------------------------------------------------------------

    fn on_connect_result(&mut self, result: Result<TransportIo>) {
        self.connecting = None;
        if self.state != ConnectionState::Connecting {
            // Closed or timed out while the transport was still coming up.
            tracing::trace!(target: targets::SOCKET, state = %self.state, "stale connect result dropped");
            return;
        }

        match result {
            Ok(io) => self.on_ready(io),
            Err(error) => self.fail(error),
        }
    }

    fn on_ready(&mut self, io: TransportIo) {
        self.deadline.disarm();
        self.transition(ConnectionState::Ready);
        if let Some(completion) = self.pending_connect.take() {
            self.defer(move || completion(true, None));
        }

        let TransportIo { reader, writer } = io;
        let datagram = self.target.config.kind().is_datagram();
        let receive = tracing::trace_span!(target: targets::SOCKET, span_names::RECEIVE, datagram);
        self.reader = Some(
            self.runtime
                .spawn(read_loop(reader, datagram, self.context.clone()).instrument(receive)),
        );

        let (queue, requests) = mpsc::unbounded_channel();
        self.write_queue = Some(queue);
        self.writer = Some(
            self.runtime
                .spawn(write_loop(writer, requests, self.context.clone())),
        );

        self.dispatcher.post(SocketEvent::Connected);
    }

    fn on_data(&mut self, data: Bytes) {
        if self.state.is_ready() {
            self.dispatcher.post(SocketEvent::Data(data));
        }
    }

    fn on_end_of_stream(&mut self) {
        if self.state.is_ready() {
            tracing::debug!(target: targets::SOCKET, host = %self.target.host, "peer closed the stream");
            self.close();
        }
    }

    fn on_write_complete(&mut self, result: Result<()>) {
        if !self.state.is_ready() {
            return;
        }
        if let Some(Some(completion)) = self.pending_sends.pop_front() {
            self.dispatcher.complete_send(completion, result.clone().err());
        }
        if let Err(error) = result {
            self.fail(error);
        }
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    fn transition(&mut self, next: ConnectionState) {
        debug_assert!(
            self.state.can_transition_to(&next),
            "illegal transition {} -> {}",
            self.state,
            next
        );
        tracing::debug!(
            target: targets::SOCKET,
            host = %self.target.host,
            port = self.target.port,
            from = %self.state,
            to = %next,
            "state transition"
        );
        *self.published.lock() = next.clone();
        self.state = next;
    }

    /// Run `callback` on the worker once the current task releases the state.
    fn defer(&mut self, callback: impl FnOnce() + Send + 'static) {
        self.deferred.push(Box::new(callback));
    }

    /// Stop every transport task and fail queued sends with `reason`.
    fn teardown(&mut self, reason: SocketError) {
        self.abort_tasks();
        for completion in self.pending_sends.drain(..).flatten() {
            self.dispatcher.complete_send(completion, Some(reason.clone()));
        }
    }

    fn abort_tasks(&mut self) {
        self.write_queue = None;
        for task in [
            self.connecting.take(),
            self.reader.take(),
            self.writer.take(),
        ]
        .into_iter()
        .flatten()
        {
            task.abort();
        }
    }
}

impl Drop for SocketCore {
    fn drop(&mut self) {
        self.deadline.disarm();
        self.abort_tasks();
        for completion in self.pending_sends.drain(..).flatten() {
            self.dispatcher
                .complete_send(completion, Some(SocketError::NotConnected));
        }
        if let Some(completion) = self.pending_connect.take() {
            completion(false, None);
        }
    }
}

impl std::fmt::Debug for SocketCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SocketCore")
            .field("host", &self.target.host)
            .field("port", &self.target.port)
            .field("state", &self.state)
            .field("pending_sends", &self.pending_sends.len())
            .finish_non_exhaustive()
    }
}

/// Read until error or end-of-stream, posting every chunk to the worker.
async fn read_loop(mut reader: TransportReader, datagram: bool, context: WeakContext<SocketCore>) {
    let mut buf = vec![0u8; MAX_READ_SIZE];

    loop {
        match reader.read(&mut buf).await {
            Ok(0) if datagram => {
                tracing::trace!(target: targets::SOCKET, "empty datagram ignored");
            }
            Ok(0) => {
                context.run_serialized(SocketCore::on_end_of_stream);
                return;
            }
            Ok(n) => {
                tracing::trace!(target: targets::SOCKET, len = n, "received");
                let chunk = Bytes::copy_from_slice(&buf[..n]);
                if !context.run_serialized(move |core| core.on_data(chunk)) {
                    return;
                }
            }
            Err(e) => {
                let error = SocketError::from(e);
                context.run_serialized(move |core| core.fail(error));
                return;
            }
        }
    }
}

/// Write queued buffers in order, reporting each result to the worker.
async fn write_loop(
    mut writer: TransportWriter,
    mut requests: mpsc::UnboundedReceiver<Bytes>,
    context: WeakContext<SocketCore>,
) {
    while let Some(data) = requests.recv().await {
        let span = tracing::trace_span!(target: targets::SOCKET, span_names::WRITE, len = data.len());
        let result = async {
            if data.is_empty() {
                // One empty datagram; a no-op on streams.
                writer.write(&[]).await?;
            } else {
                writer.write_all(&data).await?;
            }
            writer.flush().await
        }
        .instrument(span)
        .await
        .map_err(SocketError::from);

        let failed = result.is_err();
        if !context.run_serialized(move |core| core.on_write_complete(result)) || failed {
            return;
        }
    }
}

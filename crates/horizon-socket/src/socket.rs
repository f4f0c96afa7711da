//! The public socket handle.

use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::Bytes;
use horizon_socket_core::logging::targets;
use horizon_socket_core::{AsyncRuntime, ContextConfig, ExecutionContext, Executor, SerialQueue};
use parking_lot::Mutex;
use tokio::runtime::Handle;

use crate::config::{ProtocolConfig, TransportKind};
use crate::error::{Result, SocketError};
use crate::observer::{ObserverDispatcher, SocketObserver};
use crate::socket_core::{ConnectCompletion, SocketCore};
use crate::state::ConnectionState;
use crate::sync_connect::SyncConnectAdapter;
use crate::tls::TlsConfig;
use crate::transport::{ConnectTarget, Connector, NetworkConnector};

/// State shared by every clone of a [`Socket`].
pub(crate) struct SocketShared {
    context: ExecutionContext<SocketCore>,
    state: Arc<Mutex<ConnectionState>>,
    host: String,
    port: u16,
    config: ProtocolConfig,
}

/// An asynchronous socket over TCP, UDP, TCP+TLS, UDP+DTLS or QUIC.
///
/// `Socket` is a cheap, cloneable handle and may be driven from any thread.
/// All of its state lives on a private worker; every method here only
/// schedules work there and returns immediately, except
/// [`sync_connect`](Self::sync_connect).
///
/// A socket connects once. After it fails or is closed, create a new one.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// use bytes::Bytes;
/// use horizon_socket::{Socket, SocketObserver, TransportKind};
///
/// struct Printer;
///
/// impl SocketObserver for Printer {
///     fn did_receive_data(&self, _socket: &Socket, data: Bytes) {
///         println!("received {} bytes", data.len());
///     }
/// }
///
/// let printer = Arc::new(Printer);
/// let socket = Socket::builder("example.com", 7, TransportKind::Tcp)
///     .observer(&printer)
///     .build()?;
///
/// socket.connect(Duration::from_secs(5), |connected, error| {
///     println!("connected: {connected}, error: {error:?}");
/// });
/// socket.send("hello", |error| assert!(error.is_none()));
/// # Ok::<(), horizon_socket::SocketError>(())
/// ```
#[derive(Clone)]
pub struct Socket {
    shared: Arc<SocketShared>,
}

impl Socket {
    /// Start building a socket to `host:port` over `kind`.
    pub fn builder(host: impl Into<String>, port: u16, kind: TransportKind) -> SocketBuilder {
        SocketBuilder::new(host, port, kind)
    }

    /// Create a socket with default options, no observer, the shared
    /// delegate queue and the global async runtime.
    pub fn new(host: impl Into<String>, port: u16, kind: TransportKind) -> Result<Self> {
        Self::builder(host, port, kind).build()
    }

    pub(crate) fn from_shared(shared: Arc<SocketShared>) -> Self {
        Self { shared }
    }

    /// Start connecting.
    ///
    /// `completion` runs exactly once: `(true, None)` when the transport is
    /// ready, `(false, Some(error))` on failure or timeout, `(false, None)`
    /// if the socket is closed first. Only valid in
    /// [`ConnectionState::Setup`]; otherwise `completion` receives
    /// [`SocketError::InvalidState`] and nothing changes.
    ///
    /// The completion runs on the socket's worker and may call back into the
    /// socket.
    pub fn connect<F>(&self, timeout: Duration, completion: F)
    where
        F: FnOnce(bool, Option<SocketError>) + Send + 'static,
    {
        let completion: ConnectCompletion = Box::new(completion);
        self.shared
            .context
            .run_serialized(move |core| core.connect(timeout, completion));
    }

    /// Start connecting without a completion. The observer still hears
    /// about the outcome.
    pub fn start_connect(&self, timeout: Duration) {
        self.connect(timeout, |_, _| {});
    }

    /// Connect and block the calling thread until the attempt resolves.
    ///
    /// Returns `None` once connected. Must not be called from the socket's
    /// own worker (for example inside a connect completion); that returns
    /// [`SocketError::WouldBlock`] immediately.
    pub fn sync_connect(&self, timeout: Duration) -> Option<SocketError> {
        SyncConnectAdapter::new(self).connect(timeout).err()
    }

    /// Queue `data` for transmission.
    ///
    /// Sends are transmitted in the order they reach the socket. For
    /// datagram transports each send is one datagram. `completion` runs on
    /// the observer executor with `None` on success. Sending while not
    /// [`Ready`](ConnectionState::Ready) transmits nothing and completes with
    /// [`SocketError::NotConnected`]. A write error fails the socket.
    pub fn send<F>(&self, data: impl Into<Bytes>, completion: F)
    where
        F: FnOnce(Option<SocketError>) + Send + 'static,
    {
        let data = data.into();
        self.shared
            .context
            .run_serialized(move |core| core.send(data, Some(Box::new(completion))));
    }

    /// Queue `data` for transmission without a completion.
    pub fn write(&self, data: impl Into<Bytes>) {
        let data = data.into();
        self.shared
            .context
            .run_serialized(move |core| core.send(data, None));
    }

    /// Close the socket. Safe to call any number of times from any thread.
    pub fn close(&self) {
        self.shared.context.run_serialized(SocketCore::close);
    }

    /// Replace the observer. The socket keeps only a weak reference.
    pub fn update_observer<O: SocketObserver>(&self, observer: &Arc<O>) {
        let observer: Weak<O> = Arc::downgrade(observer);
        let observer: Weak<dyn SocketObserver> = observer;
        self.shared
            .context
            .run_serialized(move |core| core.set_observer(Some(observer)));
    }

    /// Stop notifying any observer.
    pub fn clear_observer(&self) {
        self.shared
            .context
            .run_serialized(|core| core.set_observer(None));
    }

    /// Snapshot of the current state.
    pub fn state(&self) -> ConnectionState {
        self.shared.state.lock().clone()
    }

    /// The transport this socket runs over.
    pub fn kind(&self) -> TransportKind {
        self.shared.config.kind()
    }

    /// The remote host.
    pub fn host(&self) -> &str {
        &self.shared.host
    }

    /// The remote port.
    pub fn port(&self) -> u16 {
        self.shared.port
    }

    /// The transport options.
    pub fn config(&self) -> &ProtocolConfig {
        &self.shared.config
    }

    /// Check if the calling thread is this socket's worker.
    pub fn is_worker_thread(&self) -> bool {
        self.shared.context.is_current()
    }
}

impl PartialEq for Socket {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl Eq for Socket {}

impl std::fmt::Debug for Socket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Socket")
            .field("kind", &self.kind())
            .field("host", &self.shared.host)
            .field("port", &self.shared.port)
            .field("state", &self.state())
            .finish()
    }
}

static_assertions::assert_impl_all!(Socket: Send, Sync, Clone);

/// Builder for [`Socket`].
pub struct SocketBuilder {
    host: String,
    port: u16,
    config: ProtocolConfig,
    tls: Option<TlsConfig>,
    observer: Option<Weak<dyn SocketObserver>>,
    executor: Option<Arc<dyn Executor>>,
    runtime: Option<Handle>,
    connector: Option<Arc<dyn Connector>>,
    thread_name: Option<String>,
}

impl SocketBuilder {
    fn new(host: impl Into<String>, port: u16, kind: TransportKind) -> Self {
        Self {
            host: host.into(),
            port,
            config: ProtocolConfig::for_kind(kind),
            tls: None,
            observer: None,
            executor: None,
            runtime: None,
            connector: None,
            thread_name: None,
        }
    }

    /// Register an observer. Only a weak reference is kept.
    pub fn observer<O: SocketObserver>(mut self, observer: &Arc<O>) -> Self {
        let observer: Weak<O> = Arc::downgrade(observer);
        let observer: Weak<dyn SocketObserver> = observer;
        self.observer = Some(observer);
        self
    }

    /// Deliver observer events and send completions on `executor` instead
    /// of the shared delegate queue.
    pub fn executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Replace the transport options. This also selects the transport.
    pub fn config(mut self, config: ProtocolConfig) -> Self {
        self.config = config;
        self
    }

    /// Set TLS settings for a secure transport.
    ///
    /// Building fails with [`SocketError::Unsupported`] on plain TCP or UDP.
    pub fn tls(mut self, tls: TlsConfig) -> Self {
        self.tls = Some(tls);
        self
    }

    /// Run transport I/O on `runtime` instead of the global runtime.
    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Establish transports with `connector` instead of the network.
    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Name the socket's worker thread.
    pub fn thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = Some(name.into());
        self
    }

    /// Build the socket in [`ConnectionState::Setup`].
    ///
    /// Fails if the transport is not available in this build, if TLS
    /// settings were given for a plain transport, or if the worker thread
    /// or default runtime cannot be started.
    pub fn build(self) -> Result<Socket> {
        let Self {
            host,
            port,
            mut config,
            tls,
            observer,
            executor,
            runtime,
            connector,
            thread_name,
        } = self;

        if let Some(tls) = tls {
            config.set_tls(tls)?;
        }
        config.validate()?;

        let executor: Arc<dyn Executor> = match executor {
            Some(executor) => executor,
            None => SerialQueue::shared()?,
        };
        let runtime = match runtime {
            Some(runtime) => runtime,
            None => AsyncRuntime::global()?.handle().clone(),
        };
        let connector = connector.unwrap_or_else(|| Arc::new(NetworkConnector));

        let state = Arc::new(Mutex::new(ConnectionState::Setup));
        let target = ConnectTarget {
            host: host.clone(),
            port,
            config: config.clone(),
        };
        let published = state.clone();
        let context_config =
            ContextConfig::with_name(thread_name.unwrap_or_else(|| "horizon-socket".to_string()));
        let context = ExecutionContext::with_config(context_config, move |weak| {
            SocketCore::new(
                target,
                published,
                ObserverDispatcher::new(executor, observer),
                weak,
                runtime,
                connector,
            )
        })?;

        let shared = Arc::new(SocketShared {
            context,
            state,
            host,
            port,
            config,
        });
        let weak = Arc::downgrade(&shared);
        shared
            .context
            .run_serialized(move |core| core.attach(weak));

        tracing::debug!(
            target: targets::SOCKET,
            host = %shared.host,
            port = shared.port,
            kind = %shared.config.kind(),
            "socket created"
        );
        Ok(Socket { shared })
    }
}

impl std::fmt::Debug for SocketBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SocketBuilder")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runtime() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .unwrap()
    }

    #[test]
    fn test_new_socket_is_in_setup() {
        let rt = runtime();
        let socket = Socket::builder("127.0.0.1", 9, TransportKind::Udp)
            .runtime(rt.handle().clone())
            .build()
            .unwrap();

        assert_eq!(socket.state(), ConnectionState::Setup);
        assert_eq!(socket.kind(), TransportKind::Udp);
        assert_eq!(socket.host(), "127.0.0.1");
        assert_eq!(socket.port(), 9);
        assert!(!socket.is_worker_thread());
    }

    #[test]
    fn test_tls_on_plain_transport_is_rejected() {
        let rt = runtime();
        let result = Socket::builder("127.0.0.1", 9, TransportKind::Tcp)
            .runtime(rt.handle().clone())
            .tls(TlsConfig::new())
            .build();
        assert!(matches!(result, Err(SocketError::Unsupported(_))));
    }

    #[cfg(not(feature = "dtls"))]
    #[test]
    fn test_dtls_without_feature_fails_at_build() {
        let rt = runtime();
        let result = Socket::builder("127.0.0.1", 9, TransportKind::UdpDtls)
            .runtime(rt.handle().clone())
            .build();
        assert!(matches!(result, Err(SocketError::Unsupported(_))));
    }

    #[cfg(not(feature = "quic"))]
    #[test]
    fn test_quic_without_feature_fails_at_build() {
        let rt = runtime();
        let result = Socket::builder("127.0.0.1", 9, TransportKind::Quic)
            .runtime(rt.handle().clone())
            .build();
        assert!(matches!(result, Err(SocketError::Unsupported(msg)) if msg.contains("quic")));
    }

    #[test]
    fn test_observer_registration_keeps_weak_reference() {
        struct Quiet;
        impl SocketObserver for Quiet {}

        let rt = runtime();
        let observer = Arc::new(Quiet);
        let socket = Socket::builder("127.0.0.1", 9, TransportKind::Tcp)
            .runtime(rt.handle().clone())
            .observer(&observer)
            .build()
            .unwrap();
        socket.update_observer(&observer);
        socket.clear_observer();

        assert_eq!(Arc::strong_count(&observer), 1);
    }

    #[test]
    fn test_clones_are_the_same_socket() {
        let rt = runtime();
        let socket = Socket::builder("127.0.0.1", 9, TransportKind::Tcp)
            .runtime(rt.handle().clone())
            .build()
            .unwrap();
        let other = Socket::builder("127.0.0.1", 9, TransportKind::Tcp)
            .runtime(rt.handle().clone())
            .build()
            .unwrap();

        assert_eq!(socket.clone(), socket);
        assert_ne!(socket, other);
    }
}

//! Shared fixtures for socket integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::mpsc;
use std::task::{Context, Poll};
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use futures_util::future::BoxFuture;
use horizon_socket::{
    ConnectTarget, Connector, Executor, SerialQueue, Socket, SocketError, SocketObserver,
    TransportIo, TransportKind,
};
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream, ReadBuf};
use tokio::runtime::Runtime;

/// One observer notification.
#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    Connected,
    Failed(SocketError),
    Closed,
    Data(Bytes),
}

/// Records every notification in arrival order.
#[derive(Default)]
pub struct Recorder {
    events: Mutex<Vec<Event>>,
}

impl SocketObserver for Recorder {
    fn did_connect(&self, _socket: &Socket) {
        self.events.lock().push(Event::Connected);
    }

    fn did_fail(&self, _socket: &Socket, error: &SocketError) {
        self.events.lock().push(Event::Failed(error.clone()));
    }

    fn did_close(&self, _socket: &Socket) {
        self.events.lock().push(Event::Closed);
    }

    fn did_receive_data(&self, _socket: &Socket, data: Bytes) {
        self.events.lock().push(Event::Data(data));
    }
}

impl Recorder {
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    pub fn count(&self, event: &Event) -> usize {
        self.events.lock().iter().filter(|e| *e == event).count()
    }

    pub fn chunks(&self) -> Vec<Bytes> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                Event::Data(data) => Some(data.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn received(&self) -> Vec<u8> {
        self.chunks().concat()
    }
}

/// Poll `condition` for up to three seconds.
pub fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..300 {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    condition()
}

pub fn runtime() -> Runtime {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .unwrap()
}

pub fn observer_queue() -> Arc<dyn Executor> {
    Arc::new(SerialQueue::new("test-observer").unwrap())
}

/// Build a socket over `connector` that reports to `recorder`.
pub fn socket_over(
    connector: Arc<dyn Connector>,
    kind: TransportKind,
    rt: &Runtime,
    recorder: &Arc<Recorder>,
) -> Socket {
    Socket::builder("memory", 1, kind)
        .connector(connector)
        .runtime(rt.handle().clone())
        .executor(observer_queue())
        .observer(recorder)
        .build()
        .unwrap()
}

/// Connect and wait for the completion.
pub fn connect_and_wait(socket: &Socket, timeout: Duration) -> (bool, Option<SocketError>) {
    let (tx, rx) = mpsc::channel();
    socket.connect(timeout, move |connected, error| {
        let _ = tx.send((connected, error));
    });
    rx.recv_timeout(timeout + Duration::from_secs(2)).unwrap()
}

/// Send and wait for the completion.
pub fn send_and_wait(socket: &Socket, data: impl Into<Bytes>) -> Option<SocketError> {
    let (tx, rx) = mpsc::channel();
    socket.send(data, move |error| {
        let _ = tx.send(error);
    });
    rx.recv_timeout(Duration::from_secs(3)).unwrap()
}

/// Hands out in-memory duplex transports; the far ends arrive on a channel.
pub struct MemoryConnector {
    peers: Mutex<mpsc::Sender<DuplexStream>>,
}

impl MemoryConnector {
    pub fn new() -> (Arc<Self>, mpsc::Receiver<DuplexStream>) {
        let (tx, rx) = mpsc::channel();
        (
            Arc::new(Self {
                peers: Mutex::new(tx),
            }),
            rx,
        )
    }
}

impl Connector for MemoryConnector {
    fn connect(&self, _target: &ConnectTarget) -> BoxFuture<'static, horizon_socket::Result<TransportIo>> {
        let (local, remote) = tokio::io::duplex(64 * 1024);
        let _ = self.peers.lock().send(remote);
        Box::pin(async move { Ok(TransportIo::from_stream(local)) })
    }
}

/// Never finishes establishing.
pub struct PendingConnector;

impl Connector for PendingConnector {
    fn connect(&self, _target: &ConnectTarget) -> BoxFuture<'static, horizon_socket::Result<TransportIo>> {
        Box::pin(futures_util::future::pending())
    }
}

/// Finishes establishing after a delay.
pub struct DelayedConnector(pub Duration);

impl Connector for DelayedConnector {
    fn connect(&self, _target: &ConnectTarget) -> BoxFuture<'static, horizon_socket::Result<TransportIo>> {
        let delay = self.0;
        Box::pin(async move {
            tokio::time::sleep(delay).await;
            let (local, _remote) = tokio::io::duplex(1024);
            Ok(TransportIo::from_stream(local))
        })
    }
}

/// Fails establishment with an I/O error.
pub struct RefusingConnector;

impl Connector for RefusingConnector {
    fn connect(&self, _target: &ConnectTarget) -> BoxFuture<'static, horizon_socket::Result<TransportIo>> {
        Box::pin(async {
            Err(SocketError::from(io::Error::from(io::ErrorKind::ConnectionRefused)))
        })
    }
}

/// Yields a fixed sequence of reads, then an optional error, then hangs.
pub struct ScriptedReader {
    reads: VecDeque<Vec<u8>>,
    error: Option<io::ErrorKind>,
}

impl AsyncRead for ScriptedReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if let Some(chunk) = self.reads.pop_front() {
            buf.put_slice(&chunk);
            return Poll::Ready(Ok(()));
        }
        match self.error.take() {
            Some(kind) => Poll::Ready(Err(io::Error::from(kind))),
            None => Poll::Pending,
        }
    }
}

/// Connects to a [`ScriptedReader`] and a sink.
pub struct ScriptedConnector {
    reads: Vec<Vec<u8>>,
    error: Option<io::ErrorKind>,
}

impl ScriptedConnector {
    pub fn new(reads: &[&[u8]], error: Option<io::ErrorKind>) -> Arc<Self> {
        Arc::new(Self {
            reads: reads.iter().map(|r| r.to_vec()).collect(),
            error,
        })
    }
}

impl Connector for ScriptedConnector {
    fn connect(&self, _target: &ConnectTarget) -> BoxFuture<'static, horizon_socket::Result<TransportIo>> {
        let reader = ScriptedReader {
            reads: self.reads.iter().cloned().collect(),
            error: self.error,
        };
        Box::pin(async move { Ok(TransportIo::new(reader, tokio::io::sink())) })
    }
}

/// A writer whose every write fails with `BrokenPipe`.
pub struct BrokenWriter;

impl AsyncWrite for BrokenWriter {
    fn poll_write(self: Pin<&mut Self>, _cx: &mut Context<'_>, _buf: &[u8]) -> Poll<io::Result<usize>> {
        Poll::Ready(Err(io::Error::from(io::ErrorKind::BrokenPipe)))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

/// Connects to a silent reader and a [`BrokenWriter`].
pub struct BrokenPipeConnector;

impl Connector for BrokenPipeConnector {
    fn connect(&self, _target: &ConnectTarget) -> BoxFuture<'static, horizon_socket::Result<TransportIo>> {
        let reader = ScriptedReader {
            reads: VecDeque::new(),
            error: None,
        };
        Box::pin(async move { Ok(TransportIo::new(reader, BrokenWriter)) })
    }
}

/// A self-signed certificate for `localhost`: (certificate DER, PKCS#8 key DER).
pub fn localhost_cert() -> (Vec<u8>, Vec<u8>) {
    let certified = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
    (
        certified.cert.der().to_vec(),
        certified.key_pair.serialize_der(),
    )
}

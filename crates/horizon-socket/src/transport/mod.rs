//! Transport establishment.
//!
//! A [`Connector`] turns a [`ConnectTarget`] into a connected
//! [`TransportIo`]: a byte reader and a byte writer. The socket state machine
//! never touches sockets directly; it only awaits the connector's future and
//! then drives the two halves.
//!
//! [`NetworkConnector`] is the default and talks to the real network:
//!
//! | Transport | Stack |
//! |-----------|-------|
//! | TCP       | `tokio::net::TcpSocket` |
//! | TCP+TLS   | TCP + `tokio-rustls` |
//! | UDP       | connected `tokio::net::UdpSocket` |
//! | UDP+DTLS  | UDP + `tokio-openssl` (feature `dtls`) |
//! | QUIC      | `quinn`, one bidirectional stream (feature `quic`) |
//!
//! Tests and embedders can plug in their own connector, for instance one
//! backed by `tokio::io::duplex`.

mod datagram;
#[cfg(feature = "dtls")]
mod dtls;
#[cfg(feature = "quic")]
mod quic;
mod stream;

use std::net::SocketAddr;

use futures_util::future::BoxFuture;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::config::ProtocolConfig;
use crate::error::{Result, SocketError};

pub use datagram::DatagramStream;

/// The reading half of an established transport.
pub type TransportReader = Box<dyn AsyncRead + Send + Unpin>;

/// The writing half of an established transport.
pub type TransportWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// An established transport, split into independent halves.
///
/// Dropping both halves tears the transport down.
pub struct TransportIo {
    /// Incoming bytes. For datagram transports each successful read yields
    /// exactly one datagram.
    pub reader: TransportReader,
    /// Outgoing bytes. For datagram transports each write is one datagram.
    pub writer: TransportWriter,
}

impl TransportIo {
    /// Wrap separately owned halves.
    pub fn new(
        reader: impl AsyncRead + Send + Unpin + 'static,
        writer: impl AsyncWrite + Send + Unpin + 'static,
    ) -> Self {
        Self {
            reader: Box::new(reader),
            writer: Box::new(writer),
        }
    }

    /// Split a full-duplex stream into halves.
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        Self::new(reader, writer)
    }
}

impl std::fmt::Debug for TransportIo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportIo").finish_non_exhaustive()
    }
}

/// Where and how to connect.
#[derive(Clone, Debug)]
pub struct ConnectTarget {
    /// Host name or IP literal.
    pub host: String,
    /// Remote port.
    pub port: u16,
    /// Transport and its options.
    pub config: ProtocolConfig,
}

/// Establishes transports.
///
/// The returned future runs on the socket's async runtime. It is dropped
/// (cancelling establishment) if the socket is closed or its connect
/// deadline expires first.
pub trait Connector: Send + Sync + 'static {
    /// Start establishing a transport to `target`.
    fn connect(&self, target: &ConnectTarget) -> BoxFuture<'static, Result<TransportIo>>;
}

/// Connects over the real network.
#[derive(Debug, Default, Clone, Copy)]
pub struct NetworkConnector;

impl Connector for NetworkConnector {
    fn connect(&self, target: &ConnectTarget) -> BoxFuture<'static, Result<TransportIo>> {
        let target = target.clone();
        Box::pin(async move {
            let ConnectTarget { host, port, config } = target;
            match config {
                ProtocolConfig::Tcp(tcp) => stream::connect_tcp(&host, port, &tcp)
                    .await
                    .map(TransportIo::from_stream),
                ProtocolConfig::TcpTls { tcp, tls } => stream::connect_tls(&host, port, &tcp, &tls).await,
                ProtocolConfig::Udp(udp) => datagram::connect_udp(&host, port, &udp)
                    .await
                    .map(|socket| TransportIo::from_stream(DatagramStream::new(socket))),
                #[cfg(feature = "dtls")]
                ProtocolConfig::UdpDtls { udp, dtls } => dtls::connect(&host, port, &udp, &dtls).await,
                #[cfg(feature = "quic")]
                ProtocolConfig::Quic(options) => quic::connect(&host, port, &options).await,
                #[allow(unreachable_patterns)]
                other => Err(SocketError::Unsupported(format!(
                    "{} is not available in this build",
                    other.kind()
                ))),
            }
        })
    }
}

/// Resolve `host:port` to every address it maps to.
pub(crate) async fn resolve(host: &str, port: u16) -> Result<Vec<SocketAddr>> {
    let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| SocketError::Resolve(format!("{host}: {e}")))?
        .collect();

    if addrs.is_empty() {
        return Err(SocketError::Resolve(format!("{host}: no addresses found")));
    }
    Ok(addrs)
}

/// The unspecified address of the same family as `peer`, port 0.
pub(crate) fn unspecified_for(peer: &SocketAddr) -> SocketAddr {
    match peer {
        SocketAddr::V4(_) => SocketAddr::from(([0, 0, 0, 0], 0)),
        SocketAddr::V6(_) => SocketAddr::from(([0u16; 8], 0)),
    }
}

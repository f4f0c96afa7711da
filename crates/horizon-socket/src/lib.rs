//! Unified asynchronous sockets for Horizon.
//!
//! One [`Socket`] type covers five transports behind the same
//! connect/send/receive/close lifecycle:
//!
//! - **TCP** and **UDP** (connected to a single peer)
//! - **TCP+TLS** via rustls
//! - **UDP+DTLS** via OpenSSL (feature `dtls`)
//! - **QUIC** via quinn, one bidirectional stream (feature `quic`, on by default)
//!
//! Events reach a [`SocketObserver`] on an executor of your choosing, never
//! on the socket's own worker, so observers may call back into the socket
//! freely.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use bytes::Bytes;
//! use horizon_socket::{Socket, SocketError, SocketObserver, TransportKind};
//!
//! struct Echo;
//!
//! impl SocketObserver for Echo {
//!     fn did_connect(&self, socket: &Socket) {
//!         socket.write("hello");
//!     }
//!
//!     fn did_receive_data(&self, socket: &Socket, data: Bytes) {
//!         println!("{}", String::from_utf8_lossy(&data));
//!         socket.close();
//!     }
//!
//!     fn did_fail(&self, _socket: &Socket, error: &SocketError) {
//!         eprintln!("failed: {error} (errno {:?})", error.raw_os_error());
//!     }
//! }
//!
//! let echo = Arc::new(Echo);
//! let socket = Socket::builder("127.0.0.1", 7, TransportKind::Tcp)
//!     .observer(&echo)
//!     .build()?;
//!
//! if let Some(error) = socket.sync_connect(Duration::from_secs(5)) {
//!     eprintln!("connect failed: {error}");
//! }
//! # Ok::<(), SocketError>(())
//! ```
//!
//! # Secure transports
//!
//! ```no_run
//! use horizon_socket::{Certificate, Socket, TlsConfig, TransportKind};
//!
//! let tls = TlsConfig::new()
//!     .add_root_certificate(Certificate::from_pem_file("ca.pem")?)
//!     .server_name("service.internal");
//!
//! let socket = Socket::builder("10.0.0.5", 8443, TransportKind::TcpTls)
//!     .tls(tls)
//!     .build()?;
//! # Ok::<(), horizon_socket::SocketError>(())
//! ```
//!
//! # Custom transports
//!
//! Anything that yields an `AsyncRead` and an `AsyncWrite` can stand in for
//! the network through [`Connector`]; see [`transport`].

pub mod config;
mod error;
pub mod observer;
mod socket;
mod socket_core;
pub mod state;
pub mod sync_connect;
pub mod tls;
pub mod transport;

pub use config::{
    DtlsConfig, MAX_READ_SIZE, ProtocolConfig, QuicOptions, TcpOptions, TransportKind, UdpOptions,
};
pub use error::{Result, SocketError, errno};
pub use observer::{SendCompletion, SocketObserver};
pub use socket::{Socket, SocketBuilder};
pub use socket_core::ConnectCompletion;
pub use state::ConnectionState;
pub use sync_connect::SyncConnectAdapter;
pub use tls::{AlpnProtocol, Certificate, Identity, TlsConfig, TlsVersion};
pub use transport::{ConnectTarget, Connector, NetworkConnector, TransportIo};

pub use horizon_socket_core::{Executor, SerialQueue};

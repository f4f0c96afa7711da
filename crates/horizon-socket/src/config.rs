//! Transport selection and per-transport options.
//!
//! A socket's [`ProtocolConfig`] is chosen once, at construction, and never
//! changes afterwards. Each variant carries only the options that make sense
//! for its transport.

use std::net::SocketAddr;
use std::time::Duration;

use crate::error::{Result, SocketError};
use crate::tls::TlsConfig;

/// Largest amount of data delivered by a single receive.
pub const MAX_READ_SIZE: usize = 64 * 1024;

/// The transport a socket runs over.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum TransportKind {
    /// Plain TCP.
    #[default]
    Tcp,
    /// Plain UDP, connected to a single peer.
    Udp,
    /// TCP with TLS.
    TcpTls,
    /// UDP with DTLS.
    UdpDtls,
    /// QUIC, one bidirectional stream.
    Quic,
}

impl TransportKind {
    /// Check if the transport delivers datagrams rather than a byte stream.
    ///
    /// Datagram transports treat a zero-length read as an empty datagram
    /// instead of end-of-stream.
    pub fn is_datagram(self) -> bool {
        matches!(self, Self::Udp | Self::UdpDtls)
    }

    /// Check if the transport is encrypted.
    pub fn is_secure(self) -> bool {
        matches!(self, Self::TcpTls | Self::UdpDtls | Self::Quic)
    }

    /// Check if this build can establish the transport.
    pub fn is_available(self) -> bool {
        match self {
            Self::Tcp | Self::Udp | Self::TcpTls => true,
            Self::UdpDtls => cfg!(feature = "dtls"),
            Self::Quic => cfg!(feature = "quic"),
        }
    }
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tcp => write!(f, "TCP"),
            Self::Udp => write!(f, "UDP"),
            Self::TcpTls => write!(f, "TCP+TLS"),
            Self::UdpDtls => write!(f, "UDP+DTLS"),
            Self::Quic => write!(f, "QUIC"),
        }
    }
}

/// Socket-level options for TCP connections.
#[derive(Clone, Debug, Default)]
pub struct TcpOptions {
    /// Enable TCP_NODELAY (disable Nagle's algorithm).
    pub no_delay: bool,
    /// Enable SO_KEEPALIVE.
    pub keep_alive: bool,
    /// SO_RCVBUF size in bytes. `None` keeps the OS default.
    pub recv_buffer_size: Option<u32>,
    /// SO_SNDBUF size in bytes. `None` keeps the OS default.
    pub send_buffer_size: Option<u32>,
}

impl TcpOptions {
    /// Create TCP options with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable or disable TCP_NODELAY.
    pub fn no_delay(mut self, enabled: bool) -> Self {
        self.no_delay = enabled;
        self
    }

    /// Enable or disable keep-alive probes.
    pub fn keep_alive(mut self, enabled: bool) -> Self {
        self.keep_alive = enabled;
        self
    }

    /// Set the receive buffer size.
    pub fn recv_buffer_size(mut self, size: u32) -> Self {
        self.recv_buffer_size = Some(size);
        self
    }

    /// Set the send buffer size.
    pub fn send_buffer_size(mut self, size: u32) -> Self {
        self.send_buffer_size = Some(size);
        self
    }
}

/// Socket-level options for UDP sockets.
#[derive(Clone, Debug, Default)]
pub struct UdpOptions {
    /// Local address to bind. `None` binds an ephemeral port on the
    /// unspecified address of the peer's family.
    pub local_addr: Option<SocketAddr>,
    /// Enable SO_BROADCAST.
    pub broadcast: bool,
}

impl UdpOptions {
    /// Create UDP options with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind to a specific local address.
    pub fn local_addr(mut self, addr: SocketAddr) -> Self {
        self.local_addr = Some(addr);
        self
    }

    /// Enable or disable broadcast.
    pub fn broadcast(mut self, enabled: bool) -> Self {
        self.broadcast = enabled;
        self
    }
}

/// Options for the DTLS layer over UDP.
#[derive(Clone, Debug)]
pub struct DtlsConfig {
    /// Trust roots, identity and verification settings.
    pub tls: TlsConfig,
    /// Path MTU used for handshake fragmentation.
    pub mtu: u32,
}

impl Default for DtlsConfig {
    fn default() -> Self {
        Self {
            tls: TlsConfig::default(),
            mtu: 1200,
        }
    }
}

impl DtlsConfig {
    /// Create DTLS options with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the TLS settings.
    pub fn tls(mut self, tls: TlsConfig) -> Self {
        self.tls = tls;
        self
    }

    /// Set the path MTU.
    pub fn mtu(mut self, mtu: u32) -> Self {
        self.mtu = mtu;
        self
    }
}

/// Options for QUIC connections.
#[derive(Clone, Debug, Default)]
pub struct QuicOptions {
    /// TLS settings. QUIC always negotiates TLS 1.3 regardless of
    /// `min_version`.
    pub tls: TlsConfig,
    /// Local address for the client endpoint. `None` binds an ephemeral port.
    pub local_addr: Option<SocketAddr>,
    /// Interval for keep-alive pings. `None` disables them.
    pub keep_alive_interval: Option<Duration>,
    /// Idle timeout after which the connection is dropped. `None` keeps the
    /// transport default.
    pub idle_timeout: Option<Duration>,
}

impl QuicOptions {
    /// Create QUIC options with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the TLS settings.
    pub fn tls(mut self, tls: TlsConfig) -> Self {
        self.tls = tls;
        self
    }

    /// Bind the client endpoint to a specific local address.
    pub fn local_addr(mut self, addr: SocketAddr) -> Self {
        self.local_addr = Some(addr);
        self
    }

    /// Set the keep-alive interval.
    pub fn keep_alive_interval(mut self, interval: Duration) -> Self {
        self.keep_alive_interval = Some(interval);
        self
    }

    /// Set the idle timeout.
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }
}

/// The transport and its options, fixed at construction.
#[derive(Clone, Debug)]
pub enum ProtocolConfig {
    /// Plain TCP.
    Tcp(TcpOptions),
    /// Plain UDP.
    Udp(UdpOptions),
    /// TCP with TLS.
    TcpTls {
        /// TCP socket options.
        tcp: TcpOptions,
        /// TLS settings.
        tls: TlsConfig,
    },
    /// UDP with DTLS.
    UdpDtls {
        /// UDP socket options.
        udp: UdpOptions,
        /// DTLS settings.
        dtls: DtlsConfig,
    },
    /// QUIC.
    Quic(QuicOptions),
}

impl ProtocolConfig {
    /// Default options for `kind`.
    pub fn for_kind(kind: TransportKind) -> Self {
        match kind {
            TransportKind::Tcp => Self::Tcp(TcpOptions::default()),
            TransportKind::Udp => Self::Udp(UdpOptions::default()),
            TransportKind::TcpTls => Self::TcpTls {
                tcp: TcpOptions::default(),
                tls: TlsConfig::default(),
            },
            TransportKind::UdpDtls => Self::UdpDtls {
                udp: UdpOptions::default(),
                dtls: DtlsConfig::default(),
            },
            TransportKind::Quic => Self::Quic(QuicOptions::default()),
        }
    }

    /// The transport these options belong to.
    pub fn kind(&self) -> TransportKind {
        match self {
            Self::Tcp(_) => TransportKind::Tcp,
            Self::Udp(_) => TransportKind::Udp,
            Self::TcpTls { .. } => TransportKind::TcpTls,
            Self::UdpDtls { .. } => TransportKind::UdpDtls,
            Self::Quic(_) => TransportKind::Quic,
        }
    }

    /// The TLS settings, for secure transports.
    pub fn tls(&self) -> Option<&TlsConfig> {
        match self {
            Self::TcpTls { tls, .. } => Some(tls),
            Self::UdpDtls { dtls, .. } => Some(&dtls.tls),
            Self::Quic(quic) => Some(&quic.tls),
            Self::Tcp(_) | Self::Udp(_) => None,
        }
    }

    /// Replace the TLS settings of a secure transport.
    pub(crate) fn set_tls(&mut self, config: TlsConfig) -> Result<()> {
        match self {
            Self::TcpTls { tls, .. } => *tls = config,
            Self::UdpDtls { dtls, .. } => dtls.tls = config,
            Self::Quic(quic) => quic.tls = config,
            Self::Tcp(_) | Self::Udp(_) => {
                return Err(SocketError::Unsupported(format!(
                    "{} does not use TLS settings",
                    self.kind()
                )));
            }
        }
        Ok(())
    }

    /// Reject configurations this build cannot serve.
    pub(crate) fn validate(&self) -> Result<()> {
        let kind = self.kind();
        if !kind.is_available() {
            let feature = match kind {
                TransportKind::Quic => "quic",
                _ => "dtls",
            };
            return Err(SocketError::Unsupported(format!(
                "{kind} requires the `{feature}` feature"
            )));
        }
        Ok(())
    }
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self::for_kind(TransportKind::default())
    }
}

impl From<TransportKind> for ProtocolConfig {
    fn from(kind: TransportKind) -> Self {
        Self::for_kind(kind)
    }
}

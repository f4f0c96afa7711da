//! Error types for the socket layer.

use std::io;

use horizon_socket_core::CoreError;

use crate::state::ConnectionState;

/// POSIX error numbers for errors the socket synthesizes itself.
///
/// Values follow Linux; `raw_os_error` on pass-through transport errors
/// reports whatever the OS returned.
pub mod errno {
    /// Operation would block.
    pub const EWOULDBLOCK: i32 = 11;
    /// Invalid argument.
    pub const EINVAL: i32 = 22;
    /// Operation not supported.
    pub const EOPNOTSUPP: i32 = 95;
    /// Transport endpoint is not connected.
    pub const ENOTCONN: i32 = 107;
    /// Connection timed out.
    pub const ETIMEDOUT: i32 = 110;
    /// Protocol error.
    pub const EPROTO: i32 = 71;
    /// Operation cancelled.
    pub const ECANCELED: i32 = 125;
    /// Unknown host.
    pub const EHOSTUNREACH: i32 = 113;
}

/// Socket-level errors.
///
/// Cancellation is deliberately absent: a closed socket reports through
/// `did_close` and a `(false, None)` connect completion, never through an
/// error value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SocketError {
    /// The connect deadline elapsed before the transport became ready.
    #[error("Connection timed out")]
    ConnectTimeout,

    /// A blocking connect gave up waiting for its completion.
    #[error("Timed out waiting for connect to complete")]
    SyncWaitTimeout,

    /// An I/O error from the transport.
    #[error("Transport error: {message}")]
    Transport {
        /// The I/O error kind.
        kind: io::ErrorKind,
        /// The OS error number, when there is one.
        raw_os_error: Option<i32>,
        /// Human-readable description.
        message: String,
    },

    /// TLS configuration or handshake failure.
    #[error("TLS error: {0}")]
    Tls(String),

    /// QUIC configuration, handshake or stream failure.
    #[error("QUIC error: {0}")]
    Quic(String),

    /// DTLS configuration or handshake failure.
    #[error("DTLS error: {0}")]
    Dtls(String),

    /// The host name could not be resolved.
    #[error("Failed to resolve host: {0}")]
    Resolve(String),

    /// The operation needs a ready connection.
    #[error("Socket is not connected")]
    NotConnected,

    /// The operation is not valid in the socket's current state.
    #[error("Operation not valid in state {0}")]
    InvalidState(Box<ConnectionState>),

    /// The requested transport is not available in this build.
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// A blocking call was made from a thread it would deadlock.
    #[error("Blocking call would deadlock the socket's execution context")]
    WouldBlock,

    /// The socket's execution context is gone.
    #[error("Socket execution context has stopped")]
    ContextStopped,
}

impl SocketError {
    /// The POSIX error number for this error.
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            Self::ConnectTimeout | Self::SyncWaitTimeout => Some(errno::ETIMEDOUT),
            Self::Transport { raw_os_error, .. } => *raw_os_error,
            Self::Tls(_) | Self::Quic(_) | Self::Dtls(_) => Some(errno::EPROTO),
            Self::Resolve(_) => Some(errno::EHOSTUNREACH),
            Self::NotConnected => Some(errno::ENOTCONN),
            Self::InvalidState(_) => Some(errno::EINVAL),
            Self::Unsupported(_) => Some(errno::EOPNOTSUPP),
            Self::WouldBlock => Some(errno::EWOULDBLOCK),
            Self::ContextStopped => Some(errno::ECANCELED),
        }
    }

    /// Check if this is one of the timeout errors.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::ConnectTimeout | Self::SyncWaitTimeout)
            || matches!(self, Self::Transport { kind, .. } if *kind == io::ErrorKind::TimedOut)
    }
}

impl From<io::Error> for SocketError {
    fn from(err: io::Error) -> Self {
        Self::Transport {
            kind: err.kind(),
            raw_os_error: err.raw_os_error(),
            message: err.to_string(),
        }
    }
}

impl From<CoreError> for SocketError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::ContextStopped => Self::ContextStopped,
            other => Self::Transport {
                kind: io::ErrorKind::Other,
                raw_os_error: None,
                message: other.to_string(),
            },
        }
    }
}

/// A specialized Result type for socket operations.
pub type Result<T> = std::result::Result<T, SocketError>;

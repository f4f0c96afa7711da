//! Connection state of a socket.

use crate::error::SocketError;

/// Current state of a socket's connection.
///
/// States only move forward: `Setup → Connecting → Ready`, and from
/// `Connecting` or `Ready` into one of the terminal states. A socket in a
/// terminal state cannot be reconnected.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Created, `connect` not yet called.
    #[default]
    Setup,
    /// Transport establishment in progress.
    Connecting,
    /// Connected and ready to send/receive data.
    Ready,
    /// The connection failed; terminal.
    Failed(SocketError),
    /// The connection was closed; terminal.
    Cancelled,
}

impl ConnectionState {
    /// Check if no further transitions can happen.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Failed(_) | Self::Cancelled)
    }

    /// Check if the connection is ready for I/O.
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }

    /// The error of a failed connection.
    pub fn error(&self) -> Option<&SocketError> {
        match self {
            Self::Failed(error) => Some(error),
            _ => None,
        }
    }

    /// Check if moving from `self` to `next` is a legal transition.
    pub(crate) fn can_transition_to(&self, next: &ConnectionState) -> bool {
        matches!(
            (self, next),
            (Self::Setup, Self::Connecting | Self::Cancelled)
                | (Self::Connecting, Self::Ready)
                | (Self::Connecting | Self::Ready, Self::Failed(_) | Self::Cancelled)
        )
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Setup => write!(f, "Setup"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Ready => write!(f, "Ready"),
            Self::Failed(error) => write!(f, "Failed ({error})"),
            Self::Cancelled => write!(f, "Cancelled"),
        }
    }
}

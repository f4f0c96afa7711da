//! Connected UDP sockets as byte streams.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use horizon_socket_core::logging::targets;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::UdpSocket;

use super::{resolve, unspecified_for};
use crate::config::UdpOptions;
use crate::error::Result;

/// A connected UDP socket exposed through `AsyncRead`/`AsyncWrite`.
///
/// Each read receives one datagram (truncated to the buffer) and each write
/// sends one datagram. A zero-length read is an empty datagram, not
/// end-of-stream.
#[derive(Debug)]
pub struct DatagramStream {
    socket: UdpSocket,
}

impl DatagramStream {
    /// Wrap a socket that has already been `connect`ed to its peer.
    pub fn new(socket: UdpSocket) -> Self {
        Self { socket }
    }

    /// The wrapped socket.
    pub fn get_ref(&self) -> &UdpSocket {
        &self.socket
    }
}

impl AsyncRead for DatagramStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        self.socket.poll_recv(cx, buf)
    }
}

impl AsyncWrite for DatagramStream {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        self.socket.poll_send(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

/// Bind a UDP socket and connect it to the first resolved peer address.
pub(super) async fn connect_udp(host: &str, port: u16, options: &UdpOptions) -> Result<UdpSocket> {
    let addrs = resolve(host, port).await?;
    // Prefer a peer of the same family as an explicit local address.
    let peer = options
        .local_addr
        .and_then(|local| addrs.iter().find(|a| a.is_ipv4() == local.is_ipv4()).copied())
        .unwrap_or(addrs[0]);
    let local = options.local_addr.unwrap_or_else(|| unspecified_for(&peer));

    let socket = UdpSocket::bind(local).await?;
    socket.set_broadcast(options.broadcast)?;
    socket.connect(peer).await?;

    tracing::debug!(
        target: targets::TRANSPORT,
        local = ?socket.local_addr().ok(),
        %peer,
        "UDP socket connected"
    );
    Ok(socket)
}

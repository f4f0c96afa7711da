//! QUIC establishment via quinn.
//!
//! A socket maps onto a single bidirectional stream of one QUIC connection.
//! The endpoint and connection handles ride along with the write half so
//! they live exactly as long as the transport.

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use horizon_socket_core::logging::targets;
use quinn::crypto::rustls::QuicClientConfig;
use quinn::{Connection, Endpoint, IdleTimeout, SendStream, TransportConfig};
use tokio::io::AsyncWrite;

use super::{TransportIo, resolve, unspecified_for};
use crate::config::QuicOptions;
use crate::error::{Result, SocketError};

fn quic_error(e: impl std::fmt::Display) -> SocketError {
    SocketError::Quic(e.to_string())
}

fn build_client_config(options: &QuicOptions) -> Result<quinn::ClientConfig> {
    let crypto = QuicClientConfig::try_from(options.tls.build_quic_rustls_config()?)
        .map_err(quic_error)?;
    let mut client = quinn::ClientConfig::new(Arc::new(crypto));

    let mut transport = TransportConfig::default();
    transport.keep_alive_interval(options.keep_alive_interval);
    if let Some(timeout) = options.idle_timeout {
        transport.max_idle_timeout(Some(IdleTimeout::try_from(timeout).map_err(quic_error)?));
    }
    client.transport_config(Arc::new(transport));
    Ok(client)
}

/// Open a QUIC connection and its bidirectional stream.
pub(super) async fn connect(host: &str, port: u16, options: &QuicOptions) -> Result<TransportIo> {
    let client = build_client_config(options)?;
    let addrs = resolve(host, port).await?;
    let peer = addrs[0];
    let local = options.local_addr.unwrap_or_else(|| unspecified_for(&peer));

    let endpoint = Endpoint::client(local)?;
    let server_name = options.tls.server_name.as_deref().unwrap_or(host);
    let connection = endpoint
        .connect_with(client, peer, server_name)
        .map_err(quic_error)?
        .await
        .map_err(quic_error)?;

    let (send, recv) = connection.open_bi().await.map_err(quic_error)?;
    tracing::debug!(
        target: targets::TRANSPORT,
        %peer,
        stream = %send.id(),
        "QUIC stream open"
    );

    let writer = QuicWriter {
        send,
        _connection: connection,
        _endpoint: endpoint,
    };
    Ok(TransportIo::new(recv, writer))
}

/// Write half of a QUIC stream, owning the connection it belongs to.
struct QuicWriter {
    send: SendStream,
    _connection: Connection,
    _endpoint: Endpoint,
}

impl AsyncWrite for QuicWriter {
    fn poll_write(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        AsyncWrite::poll_write(Pin::new(&mut self.send), cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        AsyncWrite::poll_flush(Pin::new(&mut self.send), cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        AsyncWrite::poll_shutdown(Pin::new(&mut self.send), cx)
    }
}

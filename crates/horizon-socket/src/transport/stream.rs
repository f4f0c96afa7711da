//! TCP and TCP+TLS establishment.

use std::io;
use std::net::SocketAddr;

use horizon_socket_core::logging::targets;
use tokio::net::{TcpSocket, TcpStream};
use tokio_rustls::TlsConnector;

use super::{TransportIo, resolve};
use crate::config::TcpOptions;
use crate::error::{Result, SocketError};
use crate::tls::TlsConfig;

/// Connect a TCP stream, trying each resolved address in turn.
pub(super) async fn connect_tcp(host: &str, port: u16, options: &TcpOptions) -> Result<TcpStream> {
    let mut last_error = None;

    for addr in resolve(host, port).await? {
        match connect_addr(addr, options).await {
            Ok(stream) => {
                tracing::debug!(target: targets::TRANSPORT, %addr, "TCP connected");
                return Ok(stream);
            }
            Err(e) => {
                tracing::trace!(target: targets::TRANSPORT, %addr, error = %e, "TCP attempt failed");
                last_error = Some(e);
            }
        }
    }

    Err(last_error
        .map(SocketError::from)
        .unwrap_or_else(|| SocketError::Resolve(format!("{host}: no addresses found"))))
}

async fn connect_addr(addr: SocketAddr, options: &TcpOptions) -> io::Result<TcpStream> {
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };

    socket.set_keepalive(options.keep_alive)?;
    if let Some(size) = options.recv_buffer_size {
        socket.set_recv_buffer_size(size)?;
    }
    if let Some(size) = options.send_buffer_size {
        socket.set_send_buffer_size(size)?;
    }

    let stream = socket.connect(addr).await?;
    stream.set_nodelay(options.no_delay)?;
    Ok(stream)
}

/// Connect TCP, then run the TLS handshake over it.
pub(super) async fn connect_tls(
    host: &str,
    port: u16,
    tcp: &TcpOptions,
    tls: &TlsConfig,
) -> Result<TransportIo> {
    // Build the client config first so a bad configuration never opens a socket.
    let connector = TlsConnector::from(tls.build_rustls_config()?);
    let server_name = tls.server_name_for(host)?;

    let stream = connect_tcp(host, port, tcp).await?;
    let tls_stream = connector
        .connect(server_name, stream)
        .await
        .map_err(|e| SocketError::Tls(format!("TLS handshake failed: {e}")))?;

    tracing::debug!(
        target: targets::TRANSPORT,
        host,
        port,
        alpn = ?tls_stream.get_ref().1.alpn_protocol(),
        "TLS handshake complete"
    );
    Ok(TransportIo::from_stream(tls_stream))
}

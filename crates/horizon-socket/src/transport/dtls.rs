//! UDP+DTLS establishment via OpenSSL.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use horizon_socket_core::logging::targets;
use openssl::pkey::PKey;
use openssl::ssl::{SslConnector, SslMethod, SslVerifyMode};
use openssl::x509::X509;
use tokio::io::{AsyncRead, ReadBuf, ReadHalf};
use tokio_openssl::SslStream;

use super::datagram::{self, DatagramStream};
use super::TransportIo;
use crate::config::{DtlsConfig, UdpOptions};
use crate::error::{Result, SocketError};
use crate::tls::TlsConfig;

fn dtls_error(e: impl std::fmt::Display) -> SocketError {
    SocketError::Dtls(e.to_string())
}

/// Length-prefixed ALPN wire format.
fn alpn_wire(tls: &TlsConfig) -> Vec<u8> {
    let mut wire = Vec::new();
    for protocol in &tls.alpn_protocols {
        let bytes = protocol.as_bytes();
        if let Ok(len) = u8::try_from(bytes.len()) {
            wire.push(len);
            wire.extend_from_slice(bytes);
        }
    }
    wire
}

fn build_connector(tls: &TlsConfig) -> Result<SslConnector> {
    let mut builder = SslConnector::builder(SslMethod::dtls()).map_err(dtls_error)?;

    if tls.danger_accept_invalid_certs {
        builder.set_verify(SslVerifyMode::NONE);
    } else {
        if !tls.use_only_custom_roots {
            builder.set_default_verify_paths().map_err(dtls_error)?;
        }
        for cert in &tls.root_certificates {
            for der in cert.der_certs() {
                let x509 = X509::from_der(der.as_ref()).map_err(dtls_error)?;
                builder.cert_store_mut().add_cert(x509).map_err(dtls_error)?;
            }
        }
    }

    if let Some(identity) = &tls.identity {
        let mut chain = identity.cert_chain().iter();
        if let Some(leaf) = chain.next() {
            let leaf = X509::from_der(leaf.as_ref()).map_err(dtls_error)?;
            builder.set_certificate(&leaf).map_err(dtls_error)?;
        }
        for extra in chain {
            let extra = X509::from_der(extra.as_ref()).map_err(dtls_error)?;
            builder.add_extra_chain_cert(extra).map_err(dtls_error)?;
        }
        let key = PKey::private_key_from_der(identity.private_key().secret_der()).map_err(dtls_error)?;
        builder.set_private_key(&key).map_err(dtls_error)?;
    }

    let alpn = alpn_wire(tls);
    if !alpn.is_empty() {
        builder.set_alpn_protos(&alpn).map_err(dtls_error)?;
    }

    Ok(builder.build())
}

/// Connect UDP, then run the DTLS handshake over it.
pub(super) async fn connect(
    host: &str,
    port: u16,
    udp: &UdpOptions,
    dtls: &DtlsConfig,
) -> Result<TransportIo> {
    let connector = build_connector(&dtls.tls)?;
    let mut ssl_config = connector.configure().map_err(dtls_error)?;
    ssl_config.set_mtu(dtls.mtu).map_err(dtls_error)?;
    if dtls.tls.danger_accept_invalid_certs {
        ssl_config.set_verify_hostname(false);
    }
    let server_name = dtls.tls.server_name.as_deref().unwrap_or(host);
    let ssl = ssl_config.into_ssl(server_name).map_err(dtls_error)?;

    let socket = datagram::connect_udp(host, port, udp).await?;
    let mut stream = SslStream::new(ssl, DatagramStream::new(socket)).map_err(dtls_error)?;
    Pin::new(&mut stream)
        .connect()
        .await
        .map_err(|e| SocketError::Dtls(format!("DTLS handshake failed: {e}")))?;

    tracing::debug!(target: targets::TRANSPORT, host, port, mtu = dtls.mtu, "DTLS handshake complete");

    let (reader, writer) = tokio::io::split(stream);
    Ok(TransportIo::new(DtlsReader { inner: reader }, writer))
}

/// Read half of a DTLS session.
///
/// OpenSSL reports the peer's close_notify as a zero-length read. On a
/// datagram transport that would be indistinguishable from an empty datagram
/// and would repeat forever, so it surfaces as `ConnectionAborted` instead.
struct DtlsReader {
    inner: ReadHalf<SslStream<DatagramStream>>,
}

impl AsyncRead for DtlsReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let before = buf.filled().len();
        match Pin::new(&mut self.inner).poll_read(cx, buf) {
            Poll::Ready(Ok(())) if buf.filled().len() == before && buf.remaining() > 0 => {
                Poll::Ready(Err(io::Error::new(
                    io::ErrorKind::ConnectionAborted,
                    "peer closed the DTLS session",
                )))
            }
            other => other,
        }
    }
}

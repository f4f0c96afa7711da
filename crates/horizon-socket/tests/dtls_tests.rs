//! UDP+DTLS sockets against a local OpenSSL peer.

#![cfg(feature = "dtls")]

mod common;

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use common::*;
use horizon_socket::transport::DatagramStream;
use horizon_socket::{
    Certificate, ConnectionState, DtlsConfig, ProtocolConfig, Socket, TlsConfig, TransportKind,
    UdpOptions,
};
use openssl::pkey::PKey;
use openssl::ssl::{Ssl, SslContext, SslMethod};
use openssl::x509::X509;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UdpSocket;

/// Accept one DTLS session and echo records until it ends.
fn spawn_dtls_echo(rt: &tokio::runtime::Runtime, cert: &[u8], key: &[u8]) -> u16 {
    let mut context = SslContext::builder(SslMethod::dtls()).unwrap();
    context
        .set_certificate(&X509::from_der(cert).unwrap())
        .unwrap();
    context
        .set_private_key(&PKey::private_key_from_der(key).unwrap())
        .unwrap();
    let context = context.build();

    let socket = rt.block_on(UdpSocket::bind("127.0.0.1:0")).unwrap();
    let port = socket.local_addr().unwrap().port();

    rt.spawn(async move {
        let mut peeked = [0u8; 2048];
        let Ok((_, peer)) = socket.peek_from(&mut peeked).await else {
            return;
        };
        if socket.connect(peer).await.is_err() {
            return;
        }

        let mut ssl = Ssl::new(&context).unwrap();
        ssl.set_mtu(1200).unwrap();
        let mut stream = tokio_openssl::SslStream::new(ssl, DatagramStream::new(socket)).unwrap();
        if Pin::new(&mut stream).accept().await.is_err() {
            return;
        }

        let mut buf = [0u8; 2048];
        while let Ok(n) = stream.read(&mut buf).await {
            if n == 0 || stream.write_all(&buf[..n]).await.is_err() {
                break;
            }
        }
    });

    port
}

#[test]
fn test_dtls_echo() {
    let rt = runtime();
    let (cert, key) = localhost_cert();
    let port = spawn_dtls_echo(&rt, &cert, &key);

    let dtls = DtlsConfig::new().tls(
        TlsConfig::new()
            .add_root_certificate(Certificate::from_der(cert))
            .use_only_custom_roots()
            .server_name("localhost"),
    );
    let recorder = Arc::new(Recorder::default());
    let socket = Socket::builder("127.0.0.1", port, TransportKind::UdpDtls)
        .config(ProtocolConfig::UdpDtls {
            udp: UdpOptions::new(),
            dtls,
        })
        .runtime(rt.handle().clone())
        .executor(observer_queue())
        .observer(&recorder)
        .build()
        .unwrap();

    assert_eq!(connect_and_wait(&socket, Duration::from_secs(3)), (true, None));
    assert_eq!(send_and_wait(&socket, "hello over dtls"), None);
    assert!(wait_until(|| recorder.received() == b"hello over dtls"));

    socket.close();
    assert!(wait_until(|| recorder.count(&Event::Closed) == 1));
    assert_eq!(socket.state(), ConnectionState::Cancelled);
}

//! TCP and TCP+TLS sockets against local peers.

mod common;

use std::io::{self, Read, Write};
use std::net::TcpListener;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use common::*;
use horizon_socket::{
    Certificate, ConnectionState, ProtocolConfig, Socket, SocketBuilder, SocketError, TcpOptions,
    TlsConfig, TransportKind,
};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};

/// Accept one connection and echo until the client hangs up.
fn spawn_echo_server() -> (u16, thread::JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let handle = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let mut buf = [0u8; 4096];
        loop {
            match stream.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if stream.write_all(&buf[..n]).is_err() {
                        break;
                    }
                }
            }
        }
    });
    (port, handle)
}

fn tcp_socket(port: u16, kind: TransportKind, recorder: &Arc<Recorder>) -> SocketBuilder {
    Socket::builder("127.0.0.1", port, kind)
        .executor(observer_queue())
        .observer(recorder)
}

#[test]
fn test_tcp_echo() {
    let (port, server) = spawn_echo_server();
    let recorder = Arc::new(Recorder::default());
    let socket = tcp_socket(port, TransportKind::Tcp, &recorder)
        .config(ProtocolConfig::Tcp(TcpOptions::new().no_delay(true).keep_alive(true)))
        .build()
        .unwrap();

    assert_eq!(connect_and_wait(&socket, Duration::from_secs(2)), (true, None));
    assert_eq!(send_and_wait(&socket, "hello"), None);
    assert!(wait_until(|| recorder.received() == b"hello"));

    socket.close();
    assert!(wait_until(|| recorder.count(&Event::Closed) == 1));
    server.join().unwrap();

    let events = recorder.events();
    assert_eq!(events.first(), Some(&Event::Connected));
    assert_eq!(events.last(), Some(&Event::Closed));
    assert!(!events.iter().any(|e| matches!(e, Event::Failed(_))));
}

#[test]
fn test_tcp_sync_connect() {
    let (port, _server) = spawn_echo_server();
    let socket = Socket::new("127.0.0.1", port, TransportKind::Tcp).unwrap();

    assert_eq!(socket.sync_connect(Duration::from_secs(2)), None);
    assert_eq!(socket.state(), ConnectionState::Ready);
    socket.close();
}

#[test]
fn test_tcp_connection_refused() {
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let recorder = Arc::new(Recorder::default());
    let socket = tcp_socket(port, TransportKind::Tcp, &recorder).build().unwrap();

    let (connected, error) = connect_and_wait(&socket, Duration::from_secs(2));
    assert!(!connected);
    let error = error.unwrap();
    assert!(matches!(
        error,
        SocketError::Transport {
            kind: io::ErrorKind::ConnectionRefused,
            ..
        }
    ));
    assert!(error.raw_os_error().is_some());
    assert!(wait_until(|| recorder.count(&Event::Closed) == 1));
}

#[test]
fn test_tcp_peer_close_cancels() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let server = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        stream.write_all(b"goodbye").unwrap();
    });

    let recorder = Arc::new(Recorder::default());
    let socket = tcp_socket(port, TransportKind::Tcp, &recorder).build().unwrap();

    assert_eq!(connect_and_wait(&socket, Duration::from_secs(2)), (true, None));
    server.join().unwrap();

    assert!(wait_until(|| socket.state() == ConnectionState::Cancelled));
    assert!(wait_until(|| recorder.count(&Event::Closed) == 1));
    assert_eq!(recorder.received(), b"goodbye");
    assert_eq!(recorder.events().last(), Some(&Event::Closed));
}

// TLS

fn tls_server_config(cert: &[u8], key: &[u8]) -> Arc<rustls::ServerConfig> {
    let config = rustls::ServerConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .unwrap()
    .with_no_client_auth()
    .with_single_cert(
        vec![CertificateDer::from(cert.to_vec())],
        PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key.to_vec())),
    )
    .unwrap();
    Arc::new(config)
}

/// Accept one TLS connection on a private runtime and echo until EOF.
fn spawn_tls_echo_server(cert: &[u8], key: &[u8]) -> (u16, thread::JoinHandle<()>) {
    let acceptor = tokio_rustls::TlsAcceptor::from(tls_server_config(cert, key));
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.set_nonblocking(true).unwrap();
    let port = listener.local_addr().unwrap().port();

    let handle = thread::spawn(move || {
        let rt = runtime();
        rt.block_on(async move {
            use tokio::io::{AsyncReadExt, AsyncWriteExt};

            let listener = tokio::net::TcpListener::from_std(listener).unwrap();
            let (stream, _) = listener.accept().await.unwrap();
            let Ok(mut stream) = acceptor.accept(stream).await else {
                return;
            };
            let mut buf = [0u8; 4096];
            loop {
                match stream.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if stream.write_all(&buf[..n]).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });
    });
    (port, handle)
}

#[test]
fn test_tls_echo() {
    let (cert, key) = localhost_cert();
    let (port, server) = spawn_tls_echo_server(&cert, &key);

    let tls = TlsConfig::new()
        .add_root_certificate(Certificate::from_der(cert))
        .use_only_custom_roots()
        .server_name("localhost");
    let recorder = Arc::new(Recorder::default());
    let socket = tcp_socket(port, TransportKind::TcpTls, &recorder)
        .tls(tls)
        .build()
        .unwrap();

    assert_eq!(connect_and_wait(&socket, Duration::from_secs(3)), (true, None));
    assert_eq!(send_and_wait(&socket, "hello over tls"), None);
    assert!(wait_until(|| recorder.received() == b"hello over tls"));

    socket.close();
    assert!(wait_until(|| recorder.count(&Event::Closed) == 1));
    server.join().unwrap();
}

#[test]
fn test_tls_untrusted_certificate_fails() {
    let (cert, key) = localhost_cert();
    let (port, server) = spawn_tls_echo_server(&cert, &key);

    // Bundled roots only: the self-signed certificate is not trusted.
    let tls = TlsConfig::new().server_name("localhost");
    let recorder = Arc::new(Recorder::default());
    let socket = tcp_socket(port, TransportKind::TcpTls, &recorder)
        .tls(tls)
        .build()
        .unwrap();

    let (connected, error) = connect_and_wait(&socket, Duration::from_secs(3));
    assert!(!connected);
    assert!(matches!(error, Some(SocketError::Tls(_))));
    assert!(matches!(socket.state(), ConnectionState::Failed(SocketError::Tls(_))));
    assert!(wait_until(|| recorder.count(&Event::Closed) == 1));
    server.join().unwrap();
}

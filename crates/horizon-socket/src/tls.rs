//! TLS configuration shared by the secure transports.
//!
//! One [`TlsConfig`] drives all three secure transports: TCP+TLS and QUIC
//! build a rustls client configuration from it, and UDP+DTLS translates the
//! same trust roots and identity into an OpenSSL connector.
//!
//! # Custom CA Certificates
//!
//! ```ignore
//! use horizon_socket::tls::{Certificate, TlsConfig};
//!
//! let ca_cert = Certificate::from_pem_file("/path/to/ca.crt")?;
//! let tls = TlsConfig::new().add_root_certificate(ca_cert).use_only_custom_roots();
//! ```
//!
//! # Client Certificates (mTLS)
//!
//! ```ignore
//! use horizon_socket::tls::{Identity, TlsConfig};
//!
//! let identity = Identity::from_pem_files("/path/to/client.crt", "/path/to/client.key")?;
//! let tls = TlsConfig::new().identity(identity);
//! ```

use std::io::{BufReader, Cursor};
use std::path::Path;
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};

use crate::error::{Result, SocketError};

/// Minimum TLS protocol version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TlsVersion {
    /// TLS 1.2 (default minimum).
    #[default]
    Tls1_2,
    /// TLS 1.3 only.
    Tls1_3,
}

impl TlsVersion {
    pub(crate) fn to_rustls_versions(self) -> Vec<&'static rustls::SupportedProtocolVersion> {
        match self {
            TlsVersion::Tls1_2 => vec![&rustls::version::TLS12, &rustls::version::TLS13],
            TlsVersion::Tls1_3 => vec![&rustls::version::TLS13],
        }
    }
}

/// ALPN (Application-Layer Protocol Negotiation) protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlpnProtocol {
    /// HTTP/1.1
    Http1,
    /// HTTP/2
    H2,
    /// HTTP/3 (QUIC)
    H3,
    /// Custom protocol identifier.
    Custom(Vec<u8>),
}

impl AlpnProtocol {
    /// Get the protocol identifier bytes.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            AlpnProtocol::Http1 => b"http/1.1",
            AlpnProtocol::H2 => b"h2",
            AlpnProtocol::H3 => b"h3",
            AlpnProtocol::Custom(bytes) => bytes,
        }
    }
}

fn parse_pem_certs(pem: &[u8]) -> Result<Vec<CertificateDer<'static>>> {
    let mut reader = BufReader::new(Cursor::new(pem));
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| SocketError::Tls(format!("Failed to parse PEM certificate: {e}")))?;

    if certs.is_empty() {
        return Err(SocketError::Tls("No certificates found in PEM data".to_string()));
    }
    Ok(certs)
}

fn read_file(path: &Path, what: &str) -> Result<Vec<u8>> {
    std::fs::read(path)
        .map_err(|e| SocketError::Tls(format!("Failed to read {what} '{}': {e}", path.display())))
}

/// A certificate (or chain) to trust as a root.
#[derive(Clone)]
pub struct Certificate {
    der_certs: Vec<CertificateDer<'static>>,
}

impl std::fmt::Debug for Certificate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Certificate")
            .field("cert_count", &self.der_certs.len())
            .finish()
    }
}

impl Certificate {
    /// Load one or more certificates from PEM-encoded bytes.
    pub fn from_pem(pem_data: impl AsRef<[u8]>) -> Result<Self> {
        Ok(Self {
            der_certs: parse_pem_certs(pem_data.as_ref())?,
        })
    }

    /// Load certificates from a PEM-encoded file.
    pub fn from_pem_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_pem(read_file(path.as_ref(), "certificate file")?)
    }

    /// Wrap a DER-encoded certificate.
    pub fn from_der(der_data: impl Into<Vec<u8>>) -> Self {
        Self {
            der_certs: vec![CertificateDer::from(der_data.into())],
        }
    }

    pub(crate) fn der_certs(&self) -> &[CertificateDer<'static>] {
        &self.der_certs
    }
}

/// Client identity for mutual TLS: a certificate chain and its private key.
pub struct Identity {
    cert_chain: Vec<CertificateDer<'static>>,
    private_key: PrivateKeyDer<'static>,
}

impl Clone for Identity {
    fn clone(&self) -> Self {
        Self {
            cert_chain: self.cert_chain.clone(),
            private_key: self.private_key.clone_key(),
        }
    }
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identity")
            .field("cert_count", &self.cert_chain.len())
            .finish_non_exhaustive()
    }
}

impl Identity {
    /// Create an identity from PEM-encoded certificate chain and key bytes.
    ///
    /// The leaf certificate comes first, followed by any intermediates. The
    /// key may be PKCS#1, PKCS#8 or SEC1.
    pub fn from_pem(cert_pem: impl AsRef<[u8]>, key_pem: impl AsRef<[u8]>) -> Result<Self> {
        let cert_chain = parse_pem_certs(cert_pem.as_ref())?;

        let mut key_reader = BufReader::new(Cursor::new(key_pem.as_ref()));
        let private_key = rustls_pemfile::private_key(&mut key_reader)
            .map_err(|e| SocketError::Tls(format!("Failed to parse private key PEM: {e}")))?
            .ok_or_else(|| SocketError::Tls("No private key found in PEM data".to_string()))?;

        Ok(Self {
            cert_chain,
            private_key,
        })
    }

    /// Create an identity from PEM-encoded files.
    pub fn from_pem_files(cert_path: impl AsRef<Path>, key_path: impl AsRef<Path>) -> Result<Self> {
        let cert_pem = read_file(cert_path.as_ref(), "certificate file")?;
        let key_pem = read_file(key_path.as_ref(), "key file")?;
        Self::from_pem(cert_pem, key_pem)
    }

    /// Create an identity from DER-encoded certificate and PKCS#8 key bytes.
    pub fn from_der(cert_der: impl Into<Vec<u8>>, pkcs8_key_der: impl Into<Vec<u8>>) -> Self {
        Self {
            cert_chain: vec![CertificateDer::from(cert_der.into())],
            private_key: PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(pkcs8_key_der.into())),
        }
    }

    pub(crate) fn cert_chain(&self) -> &[CertificateDer<'static>] {
        &self.cert_chain
    }

    pub(crate) fn private_key(&self) -> &PrivateKeyDer<'static> {
        &self.private_key
    }
}

/// TLS settings for a secure transport.
#[derive(Debug, Clone, Default)]
pub struct TlsConfig {
    /// Additional root certificates to trust.
    pub root_certificates: Vec<Certificate>,
    /// Whether to use only the provided root certificates (no bundled roots).
    pub use_only_custom_roots: bool,
    /// Client identity for mutual TLS.
    pub identity: Option<Identity>,
    /// Minimum TLS version. QUIC always negotiates TLS 1.3.
    pub min_version: TlsVersion,
    /// ALPN protocols to advertise.
    pub alpn_protocols: Vec<AlpnProtocol>,
    /// Name to present for SNI and verify against. Defaults to the host.
    pub server_name: Option<String>,
    /// Accept invalid/self-signed certificates (DANGEROUS - testing only).
    pub danger_accept_invalid_certs: bool,
}

impl TlsConfig {
    /// Create a new TLS configuration with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a root certificate to trust.
    pub fn add_root_certificate(mut self, cert: Certificate) -> Self {
        self.root_certificates.push(cert);
        self
    }

    /// Use only custom root certificates (disable the bundled web roots).
    pub fn use_only_custom_roots(mut self) -> Self {
        self.use_only_custom_roots = true;
        self
    }

    /// Set the client identity for mutual TLS.
    pub fn identity(mut self, identity: Identity) -> Self {
        self.identity = Some(identity);
        self
    }

    /// Set the minimum TLS version.
    pub fn min_version(mut self, version: TlsVersion) -> Self {
        self.min_version = version;
        self
    }

    /// Add an ALPN protocol.
    pub fn alpn_protocol(mut self, protocol: AlpnProtocol) -> Self {
        self.alpn_protocols.push(protocol);
        self
    }

    /// Override the server name used for SNI and verification.
    pub fn server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = Some(name.into());
        self
    }

    /// Accept invalid certificates (DANGEROUS - for testing only).
    ///
    /// # Warning
    ///
    /// This disables certificate verification and makes the connection
    /// vulnerable to man-in-the-middle attacks.
    pub fn danger_accept_invalid_certs(mut self) -> Self {
        self.danger_accept_invalid_certs = true;
        self
    }

    /// Check if this configuration has any custom settings.
    pub fn is_default(&self) -> bool {
        self.root_certificates.is_empty()
            && !self.use_only_custom_roots
            && self.identity.is_none()
            && self.min_version == TlsVersion::Tls1_2
            && self.alpn_protocols.is_empty()
            && self.server_name.is_none()
            && !self.danger_accept_invalid_certs
    }

    /// The name to verify the peer against when connecting to `host`.
    pub(crate) fn server_name_for(&self, host: &str) -> Result<ServerName<'static>> {
        let name = self.server_name.as_deref().unwrap_or(host).to_string();
        ServerName::try_from(name.clone())
            .map_err(|e| SocketError::Tls(format!("Invalid server name '{name}': {e}")))
    }

    /// Build a rustls client configuration for TCP+TLS.
    pub fn build_rustls_config(&self) -> Result<Arc<ClientConfig>> {
        self.build_with_versions(&self.min_version.to_rustls_versions())
            .map(Arc::new)
    }

    /// Build a rustls client configuration restricted to TLS 1.3, as QUIC
    /// requires.
    #[cfg(feature = "quic")]
    pub(crate) fn build_quic_rustls_config(&self) -> Result<ClientConfig> {
        let mut config = self.build_with_versions(&[&rustls::version::TLS13])?;
        config.enable_sni = true;
        Ok(config)
    }

    fn build_with_versions(
        &self,
        versions: &[&'static rustls::SupportedProtocolVersion],
    ) -> Result<ClientConfig> {
        let builder = ClientConfig::builder_with_provider(Arc::new(
            rustls::crypto::ring::default_provider(),
        ))
        .with_protocol_versions(versions)
        .map_err(|e| SocketError::Tls(format!("Unsupported protocol versions: {e}")))?;

        let builder = if self.danger_accept_invalid_certs {
            builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(DangerousVerifier))
        } else {
            builder.with_root_certificates(self.build_root_store()?)
        };

        let mut config = match &self.identity {
            Some(identity) => builder
                .with_client_auth_cert(
                    identity.cert_chain().to_vec(),
                    identity.private_key().clone_key(),
                )
                .map_err(|e| SocketError::Tls(format!("Invalid client certificate: {e}")))?,
            None => builder.with_no_client_auth(),
        };

        config.alpn_protocols = self.alpn_protocols.iter().map(|p| p.as_bytes().to_vec()).collect();
        Ok(config)
    }

    fn build_root_store(&self) -> Result<RootCertStore> {
        let mut root_store = RootCertStore::empty();

        if !self.use_only_custom_roots {
            root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        }

        for cert in &self.root_certificates {
            for der_cert in cert.der_certs() {
                root_store.add(der_cert.clone()).map_err(|e| {
                    SocketError::Tls(format!("Failed to add root certificate: {e}"))
                })?;
            }
        }

        if root_store.is_empty() {
            return Err(SocketError::Tls(
                "No root certificates available: add custom roots or keep the bundled ones"
                    .to_string(),
            ));
        }

        Ok(root_store)
    }
}

/// A certificate verifier that accepts everything.
///
/// Only installed when `danger_accept_invalid_certs` is set.
#[derive(Debug)]
struct DangerousVerifier;

impl ServerCertVerifier for DangerousVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}

//! Buffered transport framing
//!
//! `ByteStream` owns the connection to the server and exposes exactly
//! the two read shapes IMAP mixes on one socket: CRLF-terminated lines
//! and counted literals of *n* octets. Writes are explicit and flushed
//! by the engine at protocol synchronisation points. All traffic is
//! mirrored to the connection's `ProtocolLogger`.
//!
//! The transport is a boxed `AsyncRead + AsyncWrite` so the same code
//! path serves TCP, TLS-wrapped TCP after STARTTLS, and in-memory
//! duplex pipes in tests.

use crate::error::{Error, Result};
use crate::logger::ProtocolLogger;
use rustls::pki_types::ServerName;
use std::future::Future;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio_rustls::TlsConnector;
use tokio_util::sync::CancellationToken;

/// Anything the engine can speak IMAP over.
pub trait Transport: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> Transport for T {}

/// Predicate over the server certificate chain, applied during the TLS
/// handshake in place of (not in addition to) the default validation.
pub trait CertificateValidator: Send + Sync {
    /// `end_entity` and `intermediates` are DER-encoded certificates.
    fn verify(&self, host: &str, end_entity: &[u8], intermediates: &[&[u8]]) -> bool;
}

/// How server certificates are checked during STARTTLS / TLS-on-connect.
#[derive(Clone, Default)]
pub enum TlsValidation {
    /// Platform trust store via `rustls-native-certs`.
    #[default]
    Platform,
    /// Accept any certificate (self-signed bridge setups).
    AcceptAll,
    /// Caller-supplied predicate.
    Custom(Arc<dyn CertificateValidator>),
}

impl std::fmt::Debug for TlsValidation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Platform => f.write_str("Platform"),
            Self::AcceptAll => f.write_str("AcceptAll"),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

async fn io_deadline<F, T>(timeout: Option<Duration>, fut: F) -> Result<T>
where
    F: Future<Output = io::Result<T>>,
{
    let out = match timeout {
        Some(d) => tokio::time::timeout(d, fut)
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "stream deadline exhausted"))?,
        None => fut.await,
    };
    out.map_err(Error::from)
}

/// Line- and literal-framed I/O over one connection.
pub struct ByteStream {
    reader: BufReader<Box<dyn Transport>>,
    read_timeout: Option<Duration>,
    write_timeout: Option<Duration>,
    logger: Arc<dyn ProtocolLogger>,
}

impl ByteStream {
    pub fn new(transport: Box<dyn Transport>, logger: Arc<dyn ProtocolLogger>) -> Self {
        Self {
            reader: BufReader::new(transport),
            read_timeout: None,
            write_timeout: None,
            logger,
        }
    }

    pub fn set_read_timeout(&mut self, timeout: Option<Duration>) {
        self.read_timeout = timeout;
    }

    pub fn set_write_timeout(&mut self, timeout: Option<Duration>) {
        self.write_timeout = timeout;
    }

    /// Read one line, appending to `buf` up to and including the LF.
    ///
    /// Callers never mix this with `read_literal_into` on the same
    /// logical read: a literal announced by `{n}` must be drained
    /// before the next line read.
    pub async fn read_line_into(&mut self, buf: &mut Vec<u8>) -> Result<()> {
        let start = buf.len();
        let timeout = self.read_timeout;
        let n = io_deadline(timeout, self.reader.read_until(b'\n', buf)).await?;
        if n == 0 || buf.last() != Some(&b'\n') {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed mid-line",
            )));
        }
        self.logger.log_server(&buf[start..]);
        Ok(())
    }

    /// Like `read_line_into`, but abandons the wait when `done` fires.
    ///
    /// Returns `true` when a complete line is in `buf`, `false` on
    /// cancellation. Partial progress stays in `buf`, so the caller can
    /// re-enter with the same buffer and lose nothing; this is what the
    /// IDLE loop relies on.
    pub async fn read_line_cancellable(
        &mut self,
        buf: &mut Vec<u8>,
        done: &CancellationToken,
    ) -> Result<bool> {
        let start = buf.len();
        tokio::select! {
            () = done.cancelled() => Ok(false),
            n = self.reader.read_until(b'\n', buf) => {
                let n = n.map_err(Error::from)?;
                if n == 0 || buf.last() != Some(&b'\n') {
                    return Err(Error::Io(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "connection closed mid-line",
                    )));
                }
                self.logger.log_server(&buf[start..]);
                Ok(true)
            }
        }
    }

    /// Drain exactly `n` octets of a literal into `out`.
    pub async fn read_literal_into(&mut self, n: usize, out: &mut Vec<u8>) -> Result<()> {
        let start = out.len();
        out.resize(start + n, 0);
        let timeout = self.read_timeout;
        io_deadline(timeout, self.reader.read_exact(&mut out[start..])).await?;
        self.logger.log_server(&out[start..]);
        Ok(())
    }

    pub async fn write(&mut self, bytes: &[u8]) -> Result<()> {
        self.logger.log_client(bytes);
        let timeout = self.write_timeout;
        io_deadline(timeout, self.reader.get_mut().write_all(bytes)).await
    }

    pub async fn flush(&mut self) -> Result<()> {
        let timeout = self.write_timeout;
        io_deadline(timeout, self.reader.get_mut().flush()).await
    }

    /// Give the raw transport back for a STARTTLS upgrade.
    ///
    /// Any buffered-but-unread server bytes are dropped; the protocol
    /// guarantees the server sends nothing between its STARTTLS OK and
    /// the client's TLS hello.
    pub fn into_transport(self) -> Box<dyn Transport> {
        self.reader.into_inner()
    }
}

/// Perform a client TLS handshake over `transport`.
pub async fn handshake_tls(
    transport: Box<dyn Transport>,
    host: &str,
    validation: &TlsValidation,
) -> Result<Box<dyn Transport>> {
    let tls_err = |message: String| Error::Tls {
        host: host.to_string(),
        message,
    };

    let builder = rustls::ClientConfig::builder();
    let config = match validation {
        TlsValidation::Platform => {
            let mut roots = rustls::RootCertStore::empty();
            let certs = rustls_native_certs::load_native_certs()
                .map_err(|e| tls_err(format!("no platform trust roots: {e}")))?;
            for cert in certs {
                roots.add(cert).ok();
            }
            builder.with_root_certificates(roots).with_no_client_auth()
        }
        TlsValidation::AcceptAll => builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAllVerifier))
            .with_no_client_auth(),
        TlsValidation::Custom(validator) => builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(ValidatorBridge(Arc::clone(validator))))
            .with_no_client_auth(),
    };

    let connector = TlsConnector::from(Arc::new(config));
    let server_name = ServerName::try_from(host.to_string())
        .map_err(|e| tls_err(format!("invalid server name: {e}")))?;
    let tls_stream = connector
        .connect(server_name, transport)
        .await
        .map_err(|e| tls_err(e.to_string()))?;
    Ok(Box::new(tls_stream))
}

fn supported_schemes() -> Vec<rustls::SignatureScheme> {
    vec![
        rustls::SignatureScheme::RSA_PKCS1_SHA256,
        rustls::SignatureScheme::RSA_PKCS1_SHA384,
        rustls::SignatureScheme::RSA_PKCS1_SHA512,
        rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
        rustls::SignatureScheme::ECDSA_NISTP384_SHA384,
        rustls::SignatureScheme::ECDSA_NISTP521_SHA512,
        rustls::SignatureScheme::RSA_PSS_SHA256,
        rustls::SignatureScheme::RSA_PSS_SHA384,
        rustls::SignatureScheme::RSA_PSS_SHA512,
        rustls::SignatureScheme::ED25519,
    ]
}

/// Certificate verifier that accepts all certificates
/// (for bridge daemons with self-signed certs).
#[derive(Debug)]
struct AcceptAllVerifier;

impl rustls::client::danger::ServerCertVerifier for AcceptAllVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> std::result::Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        supported_schemes()
    }
}

/// Adapts a `CertificateValidator` predicate to rustls.
struct ValidatorBridge(Arc<dyn CertificateValidator>);

impl std::fmt::Debug for ValidatorBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ValidatorBridge(..)")
    }
}

impl rustls::client::danger::ServerCertVerifier for ValidatorBridge {
    fn verify_server_cert(
        &self,
        end_entity: &rustls::pki_types::CertificateDer<'_>,
        intermediates: &[rustls::pki_types::CertificateDer<'_>],
        server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> std::result::Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        let host = server_name.to_str();
        let inters: Vec<&[u8]> = intermediates.iter().map(AsRef::as_ref).collect();
        if self.0.verify(&host, end_entity.as_ref(), &inters) {
            Ok(rustls::client::danger::ServerCertVerified::assertion())
        } else {
            Err(rustls::Error::InvalidCertificate(
                rustls::CertificateError::ApplicationVerificationFailure,
            ))
        }
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        supported_schemes()
    }
}

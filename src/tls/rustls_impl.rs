use std::fs::File;
use std::io::BufReader;
use std::net::SocketAddr;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio_rustls::rustls::{ClientConfig, ServerConfig};
use tracing::debug;

use crate::transport::Transport;

/// Errors from TLS setup and the TLS handshake.
#[derive(Error, Debug)]
pub enum TlsError {
    #[error("TLS I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TLS configuration error: {0}")]
    Configuration(String),

    #[error("no certificates found in file")]
    NoCertificatesFound,

    #[error("no private key found in file")]
    NoPrivateKeyFound,

    #[error("invalid DNS name: {0}")]
    InvalidDnsName(String),
}

/// A TLS session over a [`Transport`], usable as a `wss://` transport.
pub enum TlsStream<S> {
    Client(tokio_rustls::client::TlsStream<S>),
    Server(tokio_rustls::server::TlsStream<S>),
}

impl<S> TlsStream<S> {
    /// The transport under the TLS session.
    pub fn get_ref(&self) -> &S {
        match self {
            TlsStream::Client(s) => s.get_ref().0,
            TlsStream::Server(s) => s.get_ref().0,
        }
    }
}

impl<S: Transport> Transport for TlsStream<S> {
    fn peer_addr(&self) -> Option<SocketAddr> {
        self.get_ref().peer_addr()
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> AsyncRead for TlsStream<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            TlsStream::Client(s) => Pin::new(s).poll_read(cx, buf),
            TlsStream::Server(s) => Pin::new(s).poll_read(cx, buf),
        }
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> AsyncWrite for TlsStream<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match self.get_mut() {
            TlsStream::Client(s) => Pin::new(s).poll_write(cx, buf),
            TlsStream::Server(s) => Pin::new(s).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            TlsStream::Client(s) => Pin::new(s).poll_flush(cx),
            TlsStream::Server(s) => Pin::new(s).poll_flush(cx),
        }
    }

    /// Sends `close_notify`, then shuts down the underlying write half.
    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            TlsStream::Client(s) => Pin::new(s).poll_shutdown(cx),
            TlsStream::Server(s) => Pin::new(s).poll_shutdown(cx),
        }
    }
}

/// Client side of the TLS handshake.
#[derive(Clone)]
pub struct TlsConnector {
    inner: tokio_rustls::TlsConnector,
}

impl TlsConnector {
    pub fn new(config: Arc<ClientConfig>) -> Self {
        Self {
            inner: tokio_rustls::TlsConnector::from(config),
        }
    }

    /// Run the TLS handshake over `stream`, verifying the server as `domain`.
    ///
    /// # Errors
    ///
    /// `TlsError::InvalidDnsName` if `domain` is not a valid server name,
    /// `TlsError::Io` if the handshake fails.
    pub async fn connect<S: Transport>(
        &self,
        domain: &str,
        stream: S,
    ) -> Result<TlsStream<S>, TlsError> {
        let server_name = ServerName::try_from(domain.to_owned())
            .map_err(|_| TlsError::InvalidDnsName(domain.to_owned()))?;

        let tls_stream = self.inner.connect(server_name, stream).await?;
        debug!(domain, "TLS session established");
        Ok(TlsStream::Client(tls_stream))
    }
}

/// Server side of the TLS handshake.
#[derive(Clone)]
pub struct TlsAcceptor {
    inner: tokio_rustls::TlsAcceptor,
}

impl TlsAcceptor {
    pub fn new(config: Arc<ServerConfig>) -> Self {
        Self {
            inner: tokio_rustls::TlsAcceptor::from(config),
        }
    }

    /// # Errors
    ///
    /// `TlsError::Io` if the handshake fails.
    pub async fn accept<S: Transport>(&self, stream: S) -> Result<TlsStream<S>, TlsError> {
        let tls_stream = self.inner.accept(stream).await?;
        Ok(TlsStream::Server(tls_stream))
    }
}

/// Load every certificate from a PEM file.
///
/// # Errors
///
/// I/O errors, or `TlsError::NoCertificatesFound` for a file without any.
pub fn load_certs_from_file(path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let mut reader = BufReader::new(File::open(path)?);
    let certs = rustls_pemfile::certs(&mut reader).collect::<Result<Vec<_>, _>>()?;
    if certs.is_empty() {
        return Err(TlsError::NoCertificatesFound);
    }
    Ok(certs)
}

/// Load the first PKCS#1, PKCS#8 or SEC1 private key from a PEM file.
///
/// # Errors
///
/// I/O errors, or `TlsError::NoPrivateKeyFound`.
pub fn load_private_key_from_file(path: &Path) -> Result<PrivateKeyDer<'static>, TlsError> {
    let mut reader = BufReader::new(File::open(path)?);
    for item in rustls_pemfile::read_all(&mut reader) {
        match item? {
            rustls_pemfile::Item::Pkcs1Key(key) => return Ok(PrivateKeyDer::Pkcs1(key)),
            rustls_pemfile::Item::Pkcs8Key(key) => return Ok(PrivateKeyDer::Pkcs8(key)),
            rustls_pemfile::Item::Sec1Key(key) => return Ok(PrivateKeyDer::Sec1(key)),
            _ => {}
        }
    }
    Err(TlsError::NoPrivateKeyFound)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn temp_with(contents: &[u8]) -> NamedTempFile {
        let mut temp = NamedTempFile::new().unwrap();
        temp.write_all(contents).unwrap();
        temp.flush().unwrap();
        temp
    }

    #[test]
    fn test_tls_error_display() {
        let config_err = TlsError::Configuration("bad config".to_string());
        assert!(config_err.to_string().contains("bad config"));

        let invalid_dns = TlsError::InvalidDnsName("bad.name".to_string());
        assert!(invalid_dns.to_string().contains("invalid DNS name"));
        assert!(invalid_dns.to_string().contains("bad.name"));
    }

    #[test]
    fn test_tls_error_source() {
        let io_err = TlsError::Io(std::io::Error::other("test"));
        assert!(io_err.source().is_some());
        assert!(TlsError::NoCertificatesFound.source().is_none());
    }

    #[test]
    fn test_load_certs_file_not_found() {
        let result = load_certs_from_file(Path::new("/nonexistent/path/cert.pem"));
        assert!(matches!(result, Err(TlsError::Io(_))));
    }

    #[test]
    fn test_load_certs_no_certs_in_file() {
        let temp = temp_with(b"not a certificate\njust some text\n");
        let result = load_certs_from_file(temp.path());
        assert!(matches!(result, Err(TlsError::NoCertificatesFound)));
    }

    #[test]
    fn test_load_private_key_empty_file() {
        let temp = temp_with(b"");
        let result = load_private_key_from_file(temp.path());
        assert!(matches!(result, Err(TlsError::NoPrivateKeyFound)));
    }

    #[test]
    fn test_load_pem_round_trip() {
        let rcgen::CertifiedKey { cert, key_pair } =
            rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        let cert_file = temp_with(cert.pem().as_bytes());
        let key_file = temp_with(key_pair.serialize_pem().as_bytes());

        let certs = load_certs_from_file(cert_file.path()).unwrap();
        assert_eq!(certs.len(), 1);
        let key = load_private_key_from_file(key_file.path()).unwrap();
        assert!(matches!(key, PrivateKeyDer::Pkcs8(_)));
    }
}

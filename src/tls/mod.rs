//! TLS transport for secure WebSocket (`wss://`) connections, backed by
//! rustls.
//!
//! ```rust,ignore
//! use wstream::tls::{TlsConnector, client_config_with_webpki_roots};
//!
//! let connector = TlsConnector::new(client_config_with_webpki_roots());
//! let tcp = tokio::net::TcpStream::connect("example.com:443").await?;
//! let tls = connector.connect("example.com", tcp).await?;
//! let ws = wstream::WebSocket::client(tls);
//! ws.handshake("wss://example.com", "/socket").await?;
//! ```

mod rustls_impl;

use std::sync::Arc;

pub use rustls_impl::{
    TlsAcceptor, TlsConnector, TlsError, TlsStream, load_certs_from_file,
    load_private_key_from_file,
};
use tokio_rustls::rustls::{ClientConfig, ServerConfig};

/// Client configuration trusting the Mozilla root set.
pub fn client_config_with_webpki_roots() -> Arc<ClientConfig> {
    let root_store =
        rustls::RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let config = ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();
    Arc::new(config)
}

/// Server configuration presenting a single certificate chain.
///
/// # Errors
///
/// `TlsError::Configuration` if the key does not match the certificate.
pub fn server_config(
    cert_chain: Vec<rustls::pki_types::CertificateDer<'static>>,
    private_key: rustls::pki_types::PrivateKeyDer<'static>,
) -> Result<Arc<ServerConfig>, TlsError> {
    let config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(cert_chain, private_key)
        .map_err(|e| TlsError::Configuration(e.to_string()))?;

    Ok(Arc::new(config))
}

//! Transport abstraction and the STARTTLS upgrade.
//!
//! A session talks to a [`BoxedTransport`] so the channel can be swapped for
//! its TLS-wrapped counterpart in place. Anything that reads and writes
//! bytes qualifies, including the in-memory duplex streams used in tests.

use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use rustls::ServerConfig;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::TlsAcceptor;

use crate::error::{Error, Result};

/// A duplex byte channel a session can run over.
pub trait Transport: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T> Transport for T where T: AsyncRead + AsyncWrite + Unpin + Send + ?Sized {}

/// An owned, type-erased transport.
pub type BoxedTransport = Box<dyn Transport>;

/// Performs the server side of a TLS handshake on an existing channel.
pub trait Upgrader: Send + Sync + 'static {
    /// Returns true if STARTTLS may be offered.
    fn is_available(&self) -> bool {
        true
    }

    /// Runs the handshake and returns the secured channel.
    ///
    /// On error the plaintext channel is gone; the session must close.
    fn upgrade(&self, transport: BoxedTransport) -> impl Future<Output = Result<BoxedTransport>> + Send;
}

/// Upgrader for servers without TLS. STARTTLS is never offered.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoTls;

impl Upgrader for NoTls {
    fn is_available(&self) -> bool {
        false
    }

    async fn upgrade(&self, _transport: BoxedTransport) -> Result<BoxedTransport> {
        Err(Error::Handshake("TLS is not configured".into()))
    }
}

/// Upgrader backed by a rustls server configuration.
#[derive(Clone)]
pub struct TlsUpgrader {
    acceptor: TlsAcceptor,
}

impl std::fmt::Debug for TlsUpgrader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsUpgrader").finish_non_exhaustive()
    }
}

impl TlsUpgrader {
    /// Creates an upgrader from a rustls server configuration.
    #[must_use]
    pub fn new(config: Arc<ServerConfig>) -> Self {
        Self {
            acceptor: TlsAcceptor::from(config),
        }
    }

    /// Creates an upgrader from a PEM certificate chain and private key.
    ///
    /// The key may be PKCS#8, PKCS#1 or SEC1.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Certificate`] if either input holds no usable item,
    /// or [`Error::Tls`] if rustls rejects the pair.
    pub fn from_pem(cert_pem: &[u8], key_pem: &[u8]) -> Result<Self> {
        let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut &cert_pem[..])
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| Error::Certificate(format!("failed to parse certificates: {e}")))?;
        if certs.is_empty() {
            return Err(Error::Certificate("no certificates found".into()));
        }

        let key: PrivateKeyDer<'static> = rustls_pemfile::private_key(&mut &key_pem[..])
            .map_err(|e| Error::Certificate(format!("failed to read private key: {e}")))?
            .ok_or_else(|| Error::Certificate("no private key found".into()))?;

        let config = ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(certs, key)?;

        tracing::info!("Loaded TLS certificate chain for STARTTLS");
        Ok(Self::new(Arc::new(config)))
    }

    /// Creates an upgrader from PEM files on disk.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Certificate`] if a file cannot be read, plus the
    /// errors of [`Self::from_pem`].
    pub fn from_pem_files(cert_path: &Path, key_path: &Path) -> Result<Self> {
        let read = |path: &Path| {
            std::fs::read(path)
                .map_err(|e| Error::Certificate(format!("failed to read {}: {e}", path.display())))
        };
        Self::from_pem(&read(cert_path)?, &read(key_path)?)
    }
}

impl Upgrader for TlsUpgrader {
    async fn upgrade(&self, transport: BoxedTransport) -> Result<BoxedTransport> {
        let stream = self
            .acceptor
            .accept(transport)
            .await
            .map_err(|e| Error::Handshake(e.to_string()))?;
        Ok(Box::new(stream))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone, clippy::manual_string_new, clippy::needless_collect, clippy::unreadable_literal, clippy::used_underscore_items, clippy::similar_names)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_no_tls_refuses_upgrade() {
        let (server, _client) = tokio::io::duplex(64);
        assert!(!NoTls.is_available());
        let result = NoTls.upgrade(Box::new(server)).await;
        assert!(matches!(result, Err(Error::Handshake(_))));
    }

    #[test]
    fn test_from_pem_requires_certificates() {
        let result = TlsUpgrader::from_pem(b"", b"");
        assert!(matches!(result, Err(Error::Certificate(_))));
    }

    #[test]
    fn test_from_pem_files_missing() {
        let result = TlsUpgrader::from_pem_files(
            Path::new("/nonexistent/cert.pem"),
            Path::new("/nonexistent/key.pem"),
        );
        assert!(matches!(result, Err(Error::Certificate(message)) if message.contains("cert.pem")));
    }

    #[tokio::test]
    async fn test_tls_handshake_fails_on_plaintext() {
        use tokio::io::AsyncWriteExt;

        let config = ServerConfig::builder()
            .with_no_client_auth()
            .with_cert_resolver(Arc::new(rustls::server::ResolvesServerCertUsingSni::new()));
        let upgrader = TlsUpgrader::new(Arc::new(config));

        let (server, mut client) = tokio::io::duplex(1024);
        client.write_all(b"MAIL FROM:<a@b>\r\n").await.unwrap();
        client.shutdown().await.unwrap();

        let result = upgrader.upgrade(Box::new(server)).await;
        assert!(matches!(result, Err(Error::Handshake(_))));
    }
}

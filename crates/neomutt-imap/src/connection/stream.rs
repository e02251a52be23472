//! Byte transports for IMAP connections.

#![allow(clippy::missing_errors_doc)]

use std::fmt;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use rustls::pki_types::ServerName;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;

use super::deflate::DeflateStream;
use super::tunnel::TunnelStream;
use crate::{Error, Result};

/// Anything that can carry an IMAP session.
///
/// Implemented for every async byte stream, so tests can plug in
/// `tokio_test::io::Mock` or a `tokio::io::DuplexStream`.
pub trait Transport: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Transport for T {}

/// A connection stream, possibly layered.
///
/// TLS and DEFLATE wrap another `ImapStream`, so STARTTLS over a tunnel
/// or compression over TLS compose without extra types.
pub enum ImapStream {
    /// Plaintext TCP stream.
    Plain(TcpStream),
    /// TLS-encrypted stream (boxed to reduce enum size).
    Tls(Box<TlsStream<ImapStream>>),
    /// Subprocess stdin/stdout.
    Tunnel(Box<TunnelStream>),
    /// COMPRESS=DEFLATE layered over another stream.
    Deflate(Box<DeflateStream<ImapStream>>),
    /// A caller-supplied transport.
    Custom {
        /// The byte stream.
        io: Box<dyn Transport>,
        /// Whether to treat it as encrypted.
        secure: bool,
    },
}

impl ImapStream {
    /// Creates a new plaintext stream.
    pub const fn plain(stream: TcpStream) -> Self {
        Self::Plain(stream)
    }

    /// Wraps an arbitrary transport.
    pub fn custom(io: impl Transport + 'static, secure: bool) -> Self {
        Self::Custom {
            io: Box::new(io),
            secure,
        }
    }

    /// Starts a tunnel command.
    pub fn tunnel(command: &str, secure: bool) -> Result<Self> {
        Ok(Self::Tunnel(Box::new(TunnelStream::spawn(command, secure)?)))
    }

    /// Upgrades the stream to TLS using STARTTLS.
    pub async fn upgrade_to_tls(self, host: &str) -> Result<Self> {
        match self {
            Self::Tls(_) => Err(Error::InvalidState("Stream is already TLS".to_string())),
            Self::Deflate(_) => Err(Error::InvalidState(
                "Cannot start TLS inside a compressed stream".to_string(),
            )),
            stream => {
                let connector = create_tls_connector()?;
                let server_name = ServerName::try_from(host.to_string())?;
                let tls = connector.connect(server_name, stream).await?;
                tracing::debug!(host, "TLS established");
                Ok(Self::Tls(Box::new(tls)))
            }
        }
    }

    /// Layers DEFLATE over the stream.
    ///
    /// `prefix` holds bytes the line reader had already buffered; they were
    /// sent compressed and are inflated first.
    pub fn compress(self, prefix: &[u8]) -> Result<Self> {
        if self.is_compressed() {
            return Err(Error::InvalidState("Stream is already compressed".to_string()));
        }
        Ok(Self::Deflate(Box::new(DeflateStream::with_prefix(self, prefix))))
    }

    /// Returns true if the stream is TLS-encrypted.
    #[must_use]
    pub const fn is_tls(&self) -> bool {
        matches!(self, Self::Tls(_))
    }

    /// Returns true if DEFLATE is active.
    #[must_use]
    pub const fn is_compressed(&self) -> bool {
        matches!(self, Self::Deflate(_))
    }

    /// Returns true if the bytes on the wire are protected.
    #[must_use]
    pub fn is_secure(&self) -> bool {
        match self {
            Self::Plain(_) => false,
            Self::Tls(_) => true,
            Self::Tunnel(t) => t.is_secure(),
            Self::Deflate(d) => d.get_ref().is_secure(),
            Self::Custom { secure, .. } => *secure,
        }
    }
}

impl fmt::Debug for ImapStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Plain(_) => f.write_str("Plain"),
            Self::Tls(_) => f.write_str("Tls"),
            Self::Tunnel(t) => f.debug_tuple("Tunnel").field(&t.id()).finish(),
            Self::Deflate(d) => f.debug_tuple("Deflate").field(d.get_ref()).finish(),
            Self::Custom { secure, .. } => f.debug_struct("Custom").field("secure", secure).finish(),
        }
    }
}

macro_rules! delegate {
    ($self:ident, $s:ident => $call:expr) => {
        match $self.get_mut() {
            ImapStream::Plain($s) => {
                let $s = Pin::new($s);
                $call
            }
            ImapStream::Tls($s) => {
                let $s = Pin::new($s.as_mut());
                $call
            }
            ImapStream::Tunnel($s) => {
                let $s = Pin::new($s.as_mut());
                $call
            }
            ImapStream::Deflate($s) => {
                let $s = Pin::new($s.as_mut());
                $call
            }
            ImapStream::Custom { io: $s, .. } => {
                let $s = Pin::new($s.as_mut());
                $call
            }
        }
    };
}

impl AsyncRead for ImapStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        delegate!(self, s => s.poll_read(cx, buf))
    }
}

impl AsyncWrite for ImapStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        delegate!(self, s => s.poll_write(cx, buf))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        delegate!(self, s => s.poll_flush(cx))
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        delegate!(self, s => s.poll_shutdown(cx))
    }
}

/// Creates a TLS connector with default root certificates.
pub fn create_tls_connector() -> Result<TlsConnector> {
    let root_store = rustls::RootCertStore {
        roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
    };

    let config = rustls::ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();

    Ok(TlsConnector::from(Arc::new(config)))
}

/// Connects to a server with TLS from the start.
pub async fn connect_tls(host: &str, port: u16) -> Result<ImapStream> {
    connect_plain(host, port).await?.upgrade_to_tls(host).await
}

/// Opens a plaintext TCP connection.
pub async fn connect_plain(host: &str, port: u16) -> Result<ImapStream> {
    tracing::debug!(host, port, "connecting");
    let tcp = TcpStream::connect((host, port)).await?;
    Ok(ImapStream::Plain(tcp))
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[test]
    fn test_create_tls_connector() {
        let connector = create_tls_connector();
        assert!(connector.is_ok());
    }

    #[tokio::test]
    async fn test_custom_security_flags() {
        let (a, _b) = tokio::io::duplex(64);
        let stream = ImapStream::custom(a, false);
        assert!(!stream.is_secure());
        assert!(!stream.is_compressed());

        let stream = stream.compress(&[]).unwrap();
        assert!(stream.is_compressed());
        assert!(!stream.is_secure());
        assert!(stream.compress(&[]).is_err());

        let (a, _b) = tokio::io::duplex(64);
        let stream = ImapStream::custom(a, true).compress(&[]).unwrap();
        assert!(stream.is_secure());
    }

    #[tokio::test]
    async fn test_custom_passthrough() {
        let (a, mut b) = tokio::io::duplex(64);
        let mut stream = ImapStream::custom(a, false);
        stream.write_all(b"a0000 NOOP\r\n").await.unwrap();
        let mut buf = [0u8; 12];
        b.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"a0000 NOOP\r\n");
    }

    #[tokio::test]
    async fn test_starttls_refused_when_compressed() {
        let (a, _b) = tokio::io::duplex(64);
        let stream = ImapStream::custom(a, false).compress(&[]).unwrap();
        assert!(matches!(
            stream.upgrade_to_tls("example.com").await,
            Err(Error::InvalidState(_))
        ));
    }
}

//! Error types for the IMAP engine.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur during IMAP operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error during network operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TLS handshake or encryption error.
    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    /// Invalid DNS name for TLS.
    #[error("Invalid DNS name: {0}")]
    InvalidDnsName(#[from] rustls::pki_types::InvalidDnsNameError),

    /// Protocol parsing error.
    #[error("Protocol error at position {position}: {message}")]
    Parse {
        /// Byte position where the error occurred.
        position: usize,
        /// Description of what went wrong.
        message: String,
    },

    /// Authentication failed.
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Every enabled authenticator was unavailable or failed.
    #[error("No authenticators available")]
    NoAuthenticators,

    /// Server returned NO response.
    #[error("Server returned NO: {0}")]
    No(String),

    /// Server returned BAD response.
    #[error("Server returned BAD: {0}")]
    Bad(String),

    /// Server sent BYE (disconnecting).
    #[error("Server sent BYE: {0}")]
    Bye(String),

    /// Operation timed out.
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// The account hit a fatal error earlier and refuses further I/O.
    #[error("Connection is in a fatal state")]
    Fatal,

    /// Invalid state for the requested operation.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Protocol violation or unexpected data.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Modified UTF-7 data could not be decoded.
    #[error("Invalid modified UTF-7: {0}")]
    Codec(String),

    /// Invalid configuration value.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Malformed IMAP URL.
    #[error("Invalid IMAP URL: {0}")]
    Url(String),

    /// Header cache failure.
    #[error("Header cache error: {0}")]
    Cache(#[from] neomutt_hcache::Error),

    /// The operation was interrupted by the user between commands.
    #[error("Interrupted")]
    Interrupted,
}

/// Broad classification of an [`Error`], used to decide its blast radius.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The byte stream failed. Fatal to the account.
    Transport,
    /// The server said something unparseable or out of order. Fatal to the account.
    Protocol,
    /// Authentication failed. Fatal to the session, not the socket.
    Auth,
    /// A tagged NO/BAD. Returned to the caller; the account carries on.
    Command,
    /// The header cache failed. The engine carries on uncached.
    Cache,
    /// A mailbox name failed to decode.
    Codec,
    /// Rejected before any network I/O.
    Config,
}

impl Error {
    /// Classifies the error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Io(_) | Self::Tls(_) | Self::InvalidDnsName(_) | Self::Timeout(_) | Self::Fatal => {
                ErrorKind::Transport
            }
            Self::Parse { .. } | Self::Protocol(_) | Self::Bye(_) => ErrorKind::Protocol,
            Self::Auth(_) | Self::NoAuthenticators => ErrorKind::Auth,
            Self::No(_) | Self::Bad(_) | Self::InvalidState(_) | Self::Interrupted => {
                ErrorKind::Command
            }
            Self::Cache(_) => ErrorKind::Cache,
            Self::Codec(_) => ErrorKind::Codec,
            Self::Config(_) | Self::Url(_) => ErrorKind::Config,
        }
    }

    /// Returns true if the error leaves the account unusable.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self.kind(), ErrorKind::Transport | ErrorKind::Protocol)
    }
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds() {
        assert_eq!(Error::No("x".into()).kind(), ErrorKind::Command);
        assert!(!Error::Bad("x".into()).is_fatal());
        assert!(Error::Timeout(Duration::from_secs(1)).is_fatal());
        assert!(Error::Fatal.is_fatal());
        assert!(
            Error::Parse {
                position: 0,
                message: "x".into()
            }
            .is_fatal()
        );
        assert_eq!(Error::NoAuthenticators.kind(), ErrorKind::Auth);
        assert_eq!(Error::Config("x".into()).kind(), ErrorKind::Config);
        assert!(!Error::Codec("x".into()).is_fatal());
    }
}

//! Per-connection errors delivered to the [`ErrorSink`](crate::http::ErrorSink).
//!
//! None of these are fatal to the listener: the acceptor keeps running and
//! other connections are unaffected.

use std::fmt;
use std::io;
use std::time::Duration;

use thiserror::Error;

/// Why a TLS handshake failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeFailure {
    /// The peer certificate was required but missing, or did not verify.
    Verification,
    /// Any other TLS protocol error.
    Protocol,
    /// The transport failed underneath the handshake.
    Io,
}

impl HandshakeFailure {
    /// Classify an error returned by the TLS stream.
    pub fn classify(err: &io::Error) -> Self {
        let tls_error = err
            .get_ref()
            .and_then(|inner| inner.downcast_ref::<rustls::Error>());

        match tls_error {
            Some(
                rustls::Error::NoCertificatesPresented
                | rustls::Error::InvalidCertificate(_)
                | rustls::Error::InvalidCertRevocationList(_),
            ) => HandshakeFailure::Verification,
            Some(_) => HandshakeFailure::Protocol,
            None => HandshakeFailure::Io,
        }
    }
}

impl fmt::Display for HandshakeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandshakeFailure::Verification => write!(f, "verification"),
            HandshakeFailure::Protocol => write!(f, "protocol"),
            HandshakeFailure::Io => write!(f, "io"),
        }
    }
}

/// Error reported for a single accept attempt or connection.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// The accept operation itself failed. Transient.
    #[error("failed to accept: {0}")]
    Accept(#[source] io::Error),

    /// The TLS handshake failed.
    #[error("TLS handshake failed ({kind}): {source}")]
    Handshake {
        kind: HandshakeFailure,
        #[source]
        source: io::Error,
    },

    /// The handshake did not finish before the request-phase deadline.
    #[error("handshake timed out after {0:?}")]
    TimedOut(Duration),
}

/// Coarse error code, for sinks that only need to branch on the category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    Accept,
    Handshake(HandshakeFailure),
    TimedOut,
}

impl ConnectionError {
    pub fn handshake(source: io::Error) -> Self {
        ConnectionError::Handshake {
            kind: HandshakeFailure::classify(&source),
            source,
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            ConnectionError::Accept(_) => ErrorCode::Accept,
            ConnectionError::Handshake { kind, .. } => ErrorCode::Handshake(*kind),
            ConnectionError::TimedOut(_) => ErrorCode::TimedOut,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ConnectionError::TimedOut(_))
    }

    pub fn is_verification(&self) -> bool {
        self.code() == ErrorCode::Handshake(HandshakeFailure::Verification)
    }
}

//! Error taxonomy for the transport.
//!
//! Every fallible operation in the crate returns one of these kinds.
//! `Timeout` and `Interrupted` are transient outcomes the caller decides
//! how to handle; `WarningAlert` and `RehandshakeRefused` are non-fatal
//! protocol signals; everything else is terminal for the connection.

use std::io;

use thiserror::Error;

/// Result type for transport operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by connections, listeners and their setup.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid caller-supplied parameter, rejected before any resource is touched.
    #[error("invalid argument: {0}")]
    Argument(&'static str),

    /// Socket creation failed.
    #[error("failed to open socket")]
    Open(#[source] io::Error),

    /// Socket option or TLS session setup failed.
    #[error("configuration failed: {0}")]
    Config(String),

    /// Binding the listening socket failed.
    #[error("failed to bind listening socket")]
    Bind(#[source] io::Error),

    /// Entering the listening state failed.
    #[error("failed to listen")]
    Listen(#[source] io::Error),

    /// The TCP connect attempt failed.
    #[error("failed to connect")]
    Connect(#[source] io::Error),

    /// Host/port resolution failed or yielded no IPv6 stream endpoint.
    #[error("address resolution failed: {0}")]
    Address(String),

    /// Accepting a pending connection failed.
    #[error("failed to accept connection")]
    Accept(#[source] io::Error),

    /// The TLS handshake could not be completed.
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// The peer sent an alert during the handshake.
    #[error("peer sent alert: {0}")]
    WarningAlert(String),

    /// The peer declined a rehandshake request. Expected outcome, not a fault.
    #[error("peer refused to rehandshake")]
    RehandshakeRefused,

    /// A cached resumption entry exists but could not be applied.
    #[error("cached session could not be applied: {0}")]
    Cache(String),

    /// The peer's certificate failed one of the verification checks.
    /// The specific check is recorded in the message and in the log.
    #[error("peer certificate verification failed: {0}")]
    PeerCertVerify(String),

    /// A record-layer receive failed.
    #[error("read failed: {0}")]
    Read(String),

    /// A record-layer send failed.
    #[error("write failed: {0}")]
    Write(String),

    /// A bounded readiness wait expired.
    #[error("operation timed out")]
    Timeout,

    /// A wait or system call was interrupted by a signal.
    #[error("operation interrupted")]
    Interrupted,
}

impl Error {
    /// Whether the caller may keep the connection and retry (or simply
    /// take note), rather than tearing it down.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Timeout | Error::Interrupted | Error::RehandshakeRefused | Error::WarningAlert(_)
        )
    }

    pub(crate) fn config(err: impl std::fmt::Display) -> Self {
        Error::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_kinds() {
        assert!(Error::Timeout.is_transient());
        assert!(Error::Interrupted.is_transient());
        assert!(Error::RehandshakeRefused.is_transient());
        assert!(!Error::Handshake("x".into()).is_transient());
        assert!(!Error::PeerCertVerify("expired".into()).is_transient());
    }

    #[test]
    fn setup_errors_carry_source() {
        let err = Error::Connect(io::Error::new(io::ErrorKind::ConnectionRefused, "refused"));
        let source = std::error::Error::source(&err).expect("source");
        assert!(source.to_string().contains("refused"));
    }
}

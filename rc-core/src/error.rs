//! Domain-specific error types for the RC Remote streaming client.
//!
//! All fallible operations return `Result<T, RcError>`.
//! None of these are fatal: after any error the connection is left in
//! either `Faulted` or `Disconnected` and a fresh connect can be issued.

use thiserror::Error;

/// The canonical error type for the RC Remote client.
#[derive(Debug, Error)]
pub enum RcError {
    // ── Connection Errors ────────────────────────────────────────
    /// The address/port pair could not be composed into an endpoint.
    /// Raised before any I/O is attempted.
    #[error("{0}")]
    InvalidEndpoint(#[from] EndpointError),

    /// The underlying WebSocket connect failed or timed out.
    #[error("failed to open connection: {0}")]
    TransportOpenFailure(String),

    /// The peer answered the probe with something other than the
    /// handshake token, or dropped while we were waiting for it.
    #[error("connected to the wrong peer: {0}")]
    HandshakeRejected(String),

    /// The link dropped while streaming.
    #[error("connection lost: {0}")]
    TransportReceiveFailure(String),

    /// Writing a frame to the link failed.
    #[error("failed to send: {0}")]
    TransportSendFailure(String),

    /// A send was attempted outside the `Streaming` state.
    #[error("not connected (state: {0})")]
    NotConnected(&'static str),

    /// A connection state transition was requested from the wrong state.
    #[error("invalid transition: {0}")]
    InvalidTransition(&'static str),

    // ── Protocol Errors ──────────────────────────────────────────
    /// A `Data:` line could not be parsed.
    #[error("malformed telemetry: {0}")]
    MalformedTelemetry(String),

    /// An mpsc/oneshot channel was closed unexpectedly.
    #[error("channel closed")]
    ChannelClosed,

    // ── Underlying I/O ───────────────────────────────────────────
    /// The TCP/IO layer reported an error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The WebSocket layer reported an error.
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Catch-all for errors that do not fit another variant.
    #[error("{0}")]
    Other(String),
}

// ── EndpointError ─────────────────────────────────────────────────

/// Why an `(address, port)` pair was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EndpointError {
    /// Address or port left empty by the operator.
    #[error("Please fill in all fields.")]
    MissingField,

    /// Port is not a number in `1..=65535`.
    #[error("invalid port: {0:?}")]
    InvalidPort(String),

    /// Address contains characters that cannot appear in a host.
    #[error("invalid address: {0:?}")]
    InvalidAddress(String),
}

impl RcError {
    /// Returns `true` for errors caused by operator input rather than
    /// the network.
    pub fn is_input_error(&self) -> bool {
        matches!(self, RcError::InvalidEndpoint(_))
    }
}

// ── Convenient From implementations ──────────────────────────────

impl From<String> for RcError {
    fn from(s: String) -> Self {
        RcError::Other(s)
    }
}

impl From<&str> for RcError {
    fn from(s: &str) -> Self {
        RcError::Other(s.to_string())
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for RcError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        RcError::ChannelClosed
    }
}

impl From<tokio::sync::oneshot::error::RecvError> for RcError {
    fn from(_: tokio::sync::oneshot::error::RecvError) -> Self {
        RcError::ChannelClosed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let e = RcError::HandshakeRejected("\"wrong-token\"".into());
        assert!(e.to_string().contains("wrong peer"));

        let e = RcError::NotConnected("Faulted");
        assert!(e.to_string().contains("Faulted"));
    }

    #[test]
    fn missing_field_reads_as_operator_prompt() {
        let e: RcError = EndpointError::MissingField.into();
        assert_eq!(e.to_string(), "Please fill in all fields.");
        assert!(e.is_input_error());
    }

    #[test]
    fn from_string() {
        let e: RcError = "something broke".into();
        assert!(matches!(e, RcError::Other(_)));
    }

    #[test]
    fn from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe broke");
        let e: RcError = io_err.into();
        assert!(matches!(e, RcError::Io(_)));
        assert!(!e.is_input_error());
    }
}

//! Failures of the IMAP client and queue.

use std::time::Duration;

use thiserror::Error;

/// Everything that can go wrong talking to an IMAP server.
#[derive(Debug, Error)]
pub enum Error {
    /// Socket read, write or connect failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TLS setup or handshake failed.
    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    /// The host name cannot be used for certificate verification.
    #[error("Host name not usable for TLS: {0}")]
    InvalidDnsName(#[from] rustls::pki_types::InvalidDnsNameError),

    /// Bytes received from the server do not follow the response grammar.
    #[error("Protocol error at position {position}: {message}")]
    Parse {
        /// Offset into the frame.
        position: usize,
        /// What the parser expected.
        message: String,
    },

    /// The stream ended in the middle of a response.
    #[error("Incomplete response: stream ended after {0} bytes of a frame")]
    IncompleteResponse(usize),

    /// A command completed with a status other than OK.
    #[error("{command} failed with {status}: {text}")]
    Server {
        /// Command name, e.g. `SELECT` or `UID MOVE`.
        command: String,
        /// Status word of the tagged completion, e.g. `NO`.
        status: String,
        /// Human-readable text of the tagged completion.
        text: String,
    },

    /// No response of any kind arrived within the inactivity window.
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// The connection was closed while the operation was outstanding.
    #[error("Connection closed: {0}")]
    ConnectionClosed(String),

    /// The server lacks a capability the operation needs.
    #[error("Server does not support {0}")]
    MissingCapability(String),

    /// The server broke the protocol in a way the parser does not cover.
    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl Error {
    /// Returns true if the error came from a tagged NO or BAD completion.
    #[must_use]
    pub const fn is_server_error(&self) -> bool {
        matches!(self, Self::Server { .. })
    }
}

/// Result of a client operation.
pub type Result<T> = std::result::Result<T, Error>;

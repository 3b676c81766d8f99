//! # Error Taxonomy
//!
//! Purpose: Give every client operation a single typed error so nothing
//! escapes the public API as a panic or a stringly-typed failure.
//!
//! ## Design Principles
//! 1. **Typed Categories**: Each variant belongs to exactly one [`ErrorKind`].
//! 2. **Verbatim Transport Text**: IO and TLS failures display the text of the
//!    underlying stack unchanged.
//! 3. **Validate Before IO**: [`ValidationError`] is produced before any bytes
//!    hit the wire, so it is always safe to fix the input and retry.

use std::io;

use thiserror::Error;

/// Result type shared by all shrmpl clients.
pub type ClientResult<T> = Result<T, ClientError>;

/// Maximum KV key length in bytes.
pub const MAX_KV_KEY_LEN: usize = 100;

/// Maximum KV value length in bytes.
pub const MAX_KV_VALUE_LEN: usize = 100;

/// Input rejected before any IO was attempted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("key length exceeds 100 characters")]
    KeyTooLong { len: usize },
    #[error("key or value length exceeds 100 characters")]
    ValueTooLong { len: usize },
    #[error("{field} must not contain line breaks")]
    LineBreak { field: &'static str },
    #[error("level must be exactly 4 characters")]
    LevelLength { len: usize },
    #[error("host must be <= 32 characters")]
    HostTooLong { len: usize },
    #[error("code must be exactly 4 characters")]
    CodeLength { len: usize },
    #[error("message must be <= 4096 characters")]
    MessageTooLong { len: usize },
    #[error("{field} must not contain whitespace or control characters")]
    UnsafeUrlComponent { field: &'static str },
    #[error("invalid url: {0}")]
    InvalidUrl(String),
}

/// Coarse category of a [`ClientError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Input constraint violated before IO.
    Validation,
    /// Connect/read/write/TLS/certificate failure.
    Transport,
    /// The server answered with an explicit error.
    Protocol,
    /// Out-of-band server notice (heartbeat or shutdown).
    Notice,
}

/// Errors surfaced by the shrmpl clients.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// Operation attempted while the client holds no connection.
    #[error("not connected")]
    NotConnected,
    /// Network or IO failure while connecting, reading or writing.
    #[error("{0}")]
    Io(#[from] io::Error),
    /// TLS handshake or record layer failure.
    #[error("{0}")]
    Tls(#[from] rustls::Error),
    /// Client certificate, key or CA bundle could not be loaded.
    #[error("failed to load certificates: {0}")]
    Certificate(String),
    /// Peer closed the stream before a complete response arrived.
    #[error("connection closed by server")]
    ConnectionClosed,
    /// The KV server sent a keep-alive instead of a response.
    #[error("heartbeat received")]
    Heartbeat,
    /// The KV server announced it is going away.
    #[error("server shutting down")]
    ShuttingDown,
    /// `ERROR ...` line from the KV server, kept verbatim.
    #[error("{0}")]
    Server(String),
    /// Payload could not be interpreted for the issued command.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    /// Vault answered 404.
    #[error("file not found")]
    FileNotFound,
    /// Vault answered 401.
    #[error("unauthorized — invalid certificate or secret")]
    Unauthorized,
    /// Vault answered 429.
    #[error("rate limit exceeded")]
    RateLimited { retry_after: Option<String> },
    /// Any other HTTP status.
    #[error("HTTP error: {status} - {reason}")]
    Http { status: u16, reason: String },
}

impl ClientError {
    /// Converts an IO error, unwrapping TLS failures that rustls tunnels
    /// through `std::io`.
    pub fn from_transport(err: io::Error) -> Self {
        if let Some(tls) = err
            .get_ref()
            .and_then(|inner| inner.downcast_ref::<rustls::Error>())
        {
            return ClientError::Tls(tls.clone());
        }
        ClientError::Io(err)
    }

    /// Returns the taxonomy bucket for this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ClientError::Validation(_) => ErrorKind::Validation,
            ClientError::NotConnected
            | ClientError::Io(_)
            | ClientError::Tls(_)
            | ClientError::Certificate(_)
            | ClientError::ConnectionClosed => ErrorKind::Transport,
            ClientError::Heartbeat | ClientError::ShuttingDown => ErrorKind::Notice,
            ClientError::Server(_)
            | ClientError::InvalidResponse(_)
            | ClientError::FileNotFound
            | ClientError::Unauthorized
            | ClientError::RateLimited { .. }
            | ClientError::Http { .. } => ErrorKind::Protocol,
        }
    }

    /// True for heartbeat and shutdown notices, which are not malfunctions.
    pub fn is_notice(&self) -> bool {
        self.kind() == ErrorKind::Notice
    }

    /// True when the underlying connection can no longer be trusted.
    pub fn breaks_connection(&self) -> bool {
        matches!(
            self,
            ClientError::Io(_) | ClientError::Tls(_) | ClientError::ConnectionClosed
        )
    }
}

//! Error taxonomy shared by the HTTP layer, the framing protocol, and the tunnel engine.

use std::{fmt, io};

/// All ways an operation in this crate can fail.
///
/// Mirrors the status/errno taxonomy the tunnel engine classifies HTTP
/// responses and socket errors into; see [`StatusCode`](crate::http::StatusCode)
/// for the HTTP status -> variant mapping.
#[derive(Debug, thiserror::Error)]
pub enum TunnelError {
    /// An option name was not recognized, or two mutually exclusive modes were requested.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A frame, request line, or response line did not match the wire grammar.
    #[error("protocol error: {0}")]
    ProtocolError(String),

    /// A socket or device I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The peer's HTTP response carried a 401 or 403 status.
    #[error("permission denied")]
    PermissionDenied,

    /// The peer's HTTP response carried a 404 status.
    #[error("not found")]
    NotFound,

    /// The peer sent a clean CLOSE frame; the caller should treat this as end-of-stream.
    #[error("tunnel closed")]
    Closed,

    /// The operation would block or must be retried after an internal state change
    /// (reconnect in progress, a pad-only frame was consumed, the inbound half isn't
    /// ready yet). Not a hard failure.
    #[error("would block")]
    Again,
}

impl TunnelError {
    pub(crate) fn protocol(detail: impl fmt::Display) -> Self {
        TunnelError::ProtocolError(detail.to_string())
    }

    pub(crate) fn invalid_argument(detail: impl fmt::Display) -> Self {
        TunnelError::InvalidArgument(detail.to_string())
    }

    /// True for [`TunnelError::Again`], the one variant callers are expected to
    /// retry rather than surface to a user.
    #[inline]
    pub fn is_again(&self) -> bool {
        matches!(self, TunnelError::Again)
    }
}

pub type Result<T> = std::result::Result<T, TunnelError>;

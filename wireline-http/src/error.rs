use std::io;

use wireline_h2::{ErrorCode, H2Error};

/// Errors produced by the HTTP client surface.
#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    /// The connection was closed unexpectedly.
    #[error("connection closed")]
    ConnectionClosed,

    /// HTTP/2 protocol engine error.
    #[error("h2 error: {0}")]
    H2(#[from] H2Error),

    /// I/O error from the caller's transport.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// Invalid configuration value.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Response parsing error.
    #[error("parse error")]
    Parse,

    /// The HTTP/2 upgrade offer is unanswered; a second request cannot be
    /// pipelined until the protocol is known.
    #[error("upgrade pending; requests cannot be pipelined")]
    UpgradeInProgress,

    /// An HTTP/1.1 exchange is already in flight on this connection.
    #[error("request already in flight")]
    RequestInFlight,

    /// The exchange's stream was reset. `retryable` marks REFUSED_STREAM
    /// class resets that are safe to replay on another connection.
    #[error("stream reset ({code:?})")]
    StreamReset { code: ErrorCode, retryable: bool },

    /// Protocol-state error (unexpected bytes, bad mode).
    #[error("protocol error: {0}")]
    Protocol(String),
}

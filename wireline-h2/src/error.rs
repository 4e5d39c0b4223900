/// HTTP/2 error codes (RFC 7540 Section 7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ErrorCode {
    NoError = 0x0,
    ProtocolError = 0x1,
    InternalError = 0x2,
    FlowControlError = 0x3,
    SettingsTimeout = 0x4,
    StreamClosed = 0x5,
    FrameSizeError = 0x6,
    RefusedStream = 0x7,
    Cancel = 0x8,
    CompressionError = 0x9,
    ConnectError = 0xa,
    EnhanceYourCalm = 0xb,
    InadequateSecurity = 0xc,
    Http11Required = 0xd,
}

impl ErrorCode {
    pub fn from_u32(v: u32) -> Self {
        match v {
            0x0 => Self::NoError,
            0x1 => Self::ProtocolError,
            0x2 => Self::InternalError,
            0x3 => Self::FlowControlError,
            0x4 => Self::SettingsTimeout,
            0x5 => Self::StreamClosed,
            0x6 => Self::FrameSizeError,
            0x7 => Self::RefusedStream,
            0x8 => Self::Cancel,
            0x9 => Self::CompressionError,
            0xa => Self::ConnectError,
            0xb => Self::EnhanceYourCalm,
            0xc => Self::InadequateSecurity,
            0xd => Self::Http11Required,
            _ => Self::InternalError,
        }
    }
}

/// Errors produced by the HTTP/2 engine.
///
/// Connection-fatal variants (`Protocol`, `FrameSize`, `Compression`,
/// `FlowControl`, `Connection`) cause the session to queue a GOAWAY and
/// refuse further frames. `Stream` affects a single stream only and is
/// signaled on the wire with RST_STREAM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum H2Error {
    /// Connection-fatal protocol violation.
    Protocol(String),
    /// Frame exceeds the negotiated maximum size, or a fixed-size payload
    /// has the wrong length.
    FrameSize,
    /// HPACK coding failure. Always fatal: the shared decoder state can no
    /// longer be trusted.
    Compression,
    /// Session-level flow control violation.
    FlowControl,
    /// Stream-scoped error; the stream is reset, the session survives.
    Stream { stream_id: u32, code: ErrorCode },
    /// Connection error carrying an explicit peer-visible code.
    Connection { code: ErrorCode, message: String },
    /// The session is going away; the request was not sent and is safe to
    /// retry on another connection.
    Refused,
    /// The peer's MAX_CONCURRENT_STREAMS limit is reached; retry on this
    /// connection once a stream completes.
    StreamLimit,
    /// The output scheduler's queued-byte cap is reached; retry after the
    /// pending data drains.
    SendQueueFull,
    /// Operation on a closed session.
    Closed,
}

impl H2Error {
    /// The RFC 7540 error code this error maps to on the wire.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Protocol(_) => ErrorCode::ProtocolError,
            Self::FrameSize => ErrorCode::FrameSizeError,
            Self::Compression => ErrorCode::CompressionError,
            Self::FlowControl => ErrorCode::FlowControlError,
            Self::Stream { code, .. } => *code,
            Self::Connection { code, .. } => *code,
            Self::Refused | Self::StreamLimit => ErrorCode::RefusedStream,
            Self::SendQueueFull | Self::Closed => ErrorCode::InternalError,
        }
    }

    /// Whether this error is fatal to the whole session.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Protocol(_)
                | Self::FrameSize
                | Self::Compression
                | Self::FlowControl
                | Self::Connection { .. }
        )
    }
}

impl std::fmt::Display for H2Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Protocol(s) => write!(f, "protocol error: {s}"),
            Self::FrameSize => write!(f, "frame size error"),
            Self::Compression => write!(f, "HPACK compression error"),
            Self::FlowControl => write!(f, "flow control error"),
            Self::Stream { stream_id, code } => write!(f, "stream {stream_id} error: {code:?}"),
            Self::Connection { code, message } => {
                write!(f, "connection error {code:?}: {message}")
            }
            Self::Refused => write!(f, "session going away; retry on another connection"),
            Self::StreamLimit => write!(f, "peer concurrent stream limit reached"),
            Self::SendQueueFull => write!(f, "send queue full"),
            Self::Closed => write!(f, "session closed"),
        }
    }
}

impl std::error::Error for H2Error {}

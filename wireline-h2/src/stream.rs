//! Per-stream state tracking for HTTP/2 (RFC 7540 Section 5.1).
//!
//! `Stream` carries the seven-state lifecycle plus the per-stream flow
//! control windows. Transition methods return a verdict rather than acting
//! on the session: the session maps `Violation::Stream` to RST_STREAM and
//! `Violation::Connection` to GOAWAY, which keeps the error-promotion policy
//! in one place.

use crate::error::ErrorCode;
use crate::flowcontrol::{FlowControl, ReceiveWindow};

/// State of an HTTP/2 stream (RFC 7540 Section 5.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// Created but no frames exchanged.
    Idle,
    /// Reserved by a locally-sent PUSH_PROMISE. Clients never enter this
    /// state; it exists so the state space matches the protocol.
    ReservedLocal,
    /// Reserved by a peer PUSH_PROMISE; the response is still to come.
    ReservedRemote,
    /// Both directions open.
    Open,
    /// We sent END_STREAM; only receiving from here.
    HalfClosedLocal,
    /// Peer sent END_STREAM; only sending from here.
    HalfClosedRemote,
    /// Fully closed (both directions done, or RST_STREAM sent/received).
    Closed,
}

/// A rejected stream operation, scoped per RFC 7540 Section 5.4.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Violation {
    /// Reset this stream, the session survives.
    Stream(ErrorCode),
    /// Fatal to the whole connection.
    Connection(ErrorCode),
}

/// State and flow control for a single HTTP/2 stream.
pub(crate) struct Stream {
    pub id: u32,
    pub state: StreamState,
    pub recv_window: ReceiveWindow,
    pub send_window: FlowControl,
    /// Inbound header blocks seen: 1 = leading headers, 2 = trailers.
    /// Informational (1xx) blocks are not counted.
    pub header_blocks: u8,
    /// An END_STREAM (final DATA or trailers) is queued locally; further
    /// writes are refused even though the state transition happens when the
    /// frame drains.
    pub end_queued: bool,
}

impl Stream {
    pub fn new(id: u32, recv_configured: i64, send_initial: i64) -> Self {
        Self {
            id,
            state: StreamState::Idle,
            recv_window: ReceiveWindow::new(recv_configured),
            send_window: FlowControl::new(send_initial),
            header_blocks: 0,
            end_queued: false,
        }
    }

    /// Whether the stream counts against MAX_CONCURRENT_STREAMS
    /// (RFC 7540 Section 5.1.2: open or either half-closed state).
    pub fn is_active(&self) -> bool {
        matches!(
            self.state,
            StreamState::Open | StreamState::HalfClosedLocal | StreamState::HalfClosedRemote
        )
    }

    /// Whether the local side may still emit DATA or trailers.
    pub fn can_send(&self) -> bool {
        !self.end_queued
            && matches!(self.state, StreamState::Open | StreamState::HalfClosedRemote)
    }

    /// Local HEADERS emission: idle -> open (-> half-closed local when the
    /// request has no body).
    pub fn send_headers(&mut self, end_stream: bool) {
        debug_assert_eq!(self.state, StreamState::Idle);
        self.state = if end_stream {
            self.end_queued = true;
            StreamState::HalfClosedLocal
        } else {
            StreamState::Open
        };
    }

    /// Local END_STREAM actually emitted (final DATA frame or trailers
    /// drained to the wire).
    pub fn send_end_stream(&mut self) {
        self.state = match self.state {
            StreamState::HalfClosedRemote => StreamState::Closed,
            _ => StreamState::HalfClosedLocal,
        };
    }

    /// Peer HEADERS observed (leading headers or trailers).
    pub fn recv_headers(&mut self, end_stream: bool) -> Result<(), Violation> {
        match self.state {
            StreamState::Open | StreamState::HalfClosedLocal => {}
            StreamState::ReservedRemote => {
                // Promised response headers: reserved -> half-closed local.
                self.state = StreamState::HalfClosedLocal;
            }
            StreamState::HalfClosedRemote => {
                // Peer already finished its direction.
                return Err(Violation::Stream(ErrorCode::StreamClosed));
            }
            StreamState::Closed => {
                return Err(Violation::Connection(ErrorCode::StreamClosed));
            }
            StreamState::Idle | StreamState::ReservedLocal => {
                return Err(Violation::Connection(ErrorCode::ProtocolError));
            }
        }
        if end_stream {
            self.recv_end_stream();
        }
        Ok(())
    }

    /// Peer DATA observed. RFC 7540 Section 6.1: only open and half-closed
    /// (local) may receive DATA; a closed direction is a stream error, a
    /// stream that never existed is a connection error.
    pub fn recv_data(&mut self, end_stream: bool) -> Result<(), Violation> {
        match self.state {
            StreamState::Open | StreamState::HalfClosedLocal => {}
            StreamState::HalfClosedRemote => {
                return Err(Violation::Stream(ErrorCode::StreamClosed));
            }
            StreamState::Closed => {
                return Err(Violation::Connection(ErrorCode::StreamClosed));
            }
            StreamState::Idle | StreamState::ReservedLocal | StreamState::ReservedRemote => {
                return Err(Violation::Connection(ErrorCode::ProtocolError));
            }
        }
        if end_stream {
            self.recv_end_stream();
        }
        Ok(())
    }

    /// Peer END_STREAM observed.
    pub fn recv_end_stream(&mut self) {
        self.state = match self.state {
            StreamState::HalfClosedLocal => StreamState::Closed,
            _ => StreamState::HalfClosedRemote,
        };
    }
}

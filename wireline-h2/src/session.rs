//! HTTP/2 client session state machine.
//!
//! `Session` is sans-IO. Feed bytes from the transport via `recv()`, pull
//! bytes for the transport via `take_pending_send()`, and drain events with
//! `poll_event()`. All mutation goes through `&mut Session`, so inbound
//! demux and outbound scheduling are serialized by construction: stream ids
//! are allocated and their HEADERS emitted atomically, and header sequences
//! for different streams can never interleave on the wire.
//!
//! Lifecycle: construction queues the 24-byte preface and the initial
//! SETTINGS frame; the session is then `SettingsPending` until the server
//! preface (a SETTINGS frame) arrives, `Ready` afterwards, `GoingAway` once
//! either side sends GOAWAY, and `Closed` after a fatal error. Closing the
//! transport is the caller's job.

use std::collections::{HashMap, VecDeque};

use crate::error::{ErrorCode, H2Error};
use crate::flowcontrol::{FlowControl, ReceiveWindow};
use crate::frame::{self, Frame};
use crate::hpack::{Decoder, Encoder, HeaderField};
use crate::scheduler::OutputScheduler;
use crate::settings::{Settings, SettingsUpdate};
use crate::stream::{Stream, StreamState, Violation};

/// HTTP/2 connection preface (RFC 7540 Section 3.5).
pub const CLIENT_PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

/// How many locally-reset stream ids are remembered so that frames already
/// in flight from the peer are ignored instead of killing the connection.
const RESET_GRACE_ENTRIES: usize = 32;

/// Events produced by the session for the application.
#[derive(Debug)]
pub enum H2Event {
    /// Response headers on a stream. Informational (1xx) blocks surface as
    /// their own `Response` events ahead of the final one.
    Response {
        stream_id: u32,
        headers: Vec<HeaderField>,
        end_stream: bool,
    },
    /// Response body bytes on a stream.
    Data {
        stream_id: u32,
        data: Vec<u8>,
        end_stream: bool,
    },
    /// Trailing headers on a stream; the stream is done.
    Trailers {
        stream_id: u32,
        headers: Vec<HeaderField>,
    },
    /// The stream died, by peer RST_STREAM or a local stream error.
    /// `retryable` marks REFUSED_STREAM-class resets that are safe to
    /// replay on another connection.
    StreamReset {
        stream_id: u32,
        error_code: ErrorCode,
        retryable: bool,
    },
    /// Server push: the promised stream is reserved and its request
    /// headers decoded. The response follows on `promised_stream_id`.
    PushPromise {
        stream_id: u32,
        promised_stream_id: u32,
        headers: Vec<HeaderField>,
    },
    /// Peer sent GOAWAY. Streams above `last_stream_id` have already been
    /// reset locally as retryable.
    GoAway {
        last_stream_id: u32,
        error_code: ErrorCode,
        debug_data: Vec<u8>,
    },
    /// Peer acknowledged our SETTINGS.
    SettingsAcknowledged,
    /// Peer answered a PING we sent.
    Pong { payload: [u8; 8] },
    /// Fatal connection error; a GOAWAY is queued and the session is
    /// closed.
    Error(H2Error),
}

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    /// Preface and SETTINGS queued; waiting for the server preface.
    SettingsPending,
    /// Settings exchanged; streams flow.
    Ready,
    /// GOAWAY sent or received; existing streams may complete.
    GoingAway,
    /// Fatal error observed; no further frames are processed.
    Closed,
}

/// An inbound header block being reassembled across HEADERS/PUSH_PROMISE
/// and CONTINUATION frames. While one is pending, no other frame may
/// arrive (RFC 7540 Section 4.3).
struct HeaderBlock {
    stream_id: u32,
    kind: HeaderBlockKind,
    end_stream: bool,
    buf: Vec<u8>,
}

enum HeaderBlockKind {
    Headers,
    PushPromise { promised_stream_id: u32 },
}

/// Client-side HTTP/2 session.
pub struct Session {
    state: SessionState,
    local_settings: Settings,
    remote_settings: Settings,

    /// Stream table, keyed by id. Streams are owned here and never point
    /// back at the session. Closed streams are removed.
    streams: HashMap<u32, Stream>,

    /// Next locally-allocated stream id (odd, strictly increasing).
    next_stream_id: u32,
    /// Highest stream id the peer has promised (even, strictly increasing).
    last_promised_id: u32,
    /// Highest peer-initiated stream fully processed; advertised in any
    /// GOAWAY we send.
    highest_processed_peer: u32,

    goaway_sent: Option<u32>,
    goaway_received: Option<u32>,

    /// In-progress inbound header block, if any.
    continuation: Option<HeaderBlock>,

    /// HPACK encoder (requests out) and decoder (responses in).
    encoder: Encoder,
    decoder: Decoder,

    /// Session-level receive accounting and send credit.
    recv_window: ReceiveWindow,
    send_window: FlowControl,

    scheduler: OutputScheduler,

    recv_buf: Vec<u8>,
    events: VecDeque<H2Event>,

    /// Streams we reset locally; peer frames for them are still in flight
    /// and are dropped instead of treated as protocol violations.
    recently_reset: VecDeque<u32>,
}

impl Session {
    /// Create a client session. Queues the connection preface, the initial
    /// SETTINGS announcement, and — when the configured receive window
    /// exceeds the protocol default — a session WINDOW_UPDATE topping it up.
    pub fn client(settings: Settings) -> Self {
        Self::new(settings, false)
    }

    /// Create a client session adopted from an HTTP/1.1 upgrade: the
    /// upgraded request is installed as stream 1 in half-closed (local)
    /// and local allocation starts at 3.
    pub fn upgraded(settings: Settings) -> Self {
        Self::new(settings, true)
    }

    fn new(settings: Settings, upgrade_stream: bool) -> Self {
        let mut scheduler = OutputScheduler::new();
        scheduler.control().extend_from_slice(CLIENT_PREFACE);
        Frame::Settings {
            ack: false,
            update: settings.to_update(),
        }
        .encode(scheduler.control());

        // The session receive window starts at the protocol default and is
        // only grown by WINDOW_UPDATE (SETTINGS_INITIAL_WINDOW_SIZE applies
        // to stream windows alone, RFC 7540 Section 6.9.2).
        let configured_recv = i64::from(settings.initial_window_size);
        if configured_recv > crate::flowcontrol::DEFAULT_WINDOW_SIZE {
            Frame::WindowUpdate {
                stream_id: 0,
                increment: (configured_recv - crate::flowcontrol::DEFAULT_WINDOW_SIZE) as u32,
            }
            .encode(scheduler.control());
        }

        let mut decoder = Decoder::new(settings.header_table_size as usize);
        decoder.set_max_header_list_size(settings.max_header_list_size.map(|v| v as usize));

        let mut session = Self {
            state: SessionState::SettingsPending,
            remote_settings: Settings::default(),
            streams: HashMap::new(),
            next_stream_id: if upgrade_stream { 3 } else { 1 },
            last_promised_id: 0,
            highest_processed_peer: 0,
            goaway_sent: None,
            goaway_received: None,
            continuation: None,
            // Until the peer's SETTINGS arrive its encoder is bound by the
            // protocol-default table size.
            encoder: Encoder::new(4096),
            decoder,
            recv_window: ReceiveWindow::new(configured_recv),
            send_window: FlowControl::default(),
            scheduler,
            recv_buf: Vec::new(),
            events: VecDeque::new(),
            recently_reset: VecDeque::new(),
            local_settings: settings,
        };

        if upgrade_stream {
            let mut stream = session.new_local_stream(1);
            stream.send_headers(true);
            session.streams.insert(1, stream);
        }

        session
    }

    fn new_local_stream(&self, id: u32) -> Stream {
        Stream::new(
            id,
            i64::from(self.local_settings.initial_window_size),
            i64::from(self.remote_settings.initial_window_size),
        )
    }

    // ── Observability ──────────────────────────────────────────────────

    /// Poll the next event, if any.
    pub fn poll_event(&mut self) -> Option<H2Event> {
        self.events.pop_front()
    }

    pub fn is_closed(&self) -> bool {
        self.state == SessionState::Closed
    }

    pub fn is_going_away(&self) -> bool {
        self.state == SessionState::GoingAway || self.goaway_received.is_some()
    }

    /// Settings exchange completed (server preface observed).
    pub fn is_ready(&self) -> bool {
        matches!(self.state, SessionState::Ready | SessionState::GoingAway)
    }

    pub fn local_settings(&self) -> &Settings {
        &self.local_settings
    }

    pub fn remote_settings(&self) -> &Settings {
        &self.remote_settings
    }

    /// Current state of a stream, `None` once it is closed and reaped.
    pub fn stream_state(&self, stream_id: u32) -> Option<StreamState> {
        self.streams.get(&stream_id).map(|s| s.state)
    }

    /// Locally-initiated streams currently counting against the peer's
    /// MAX_CONCURRENT_STREAMS limit.
    pub fn active_local_streams(&self) -> usize {
        self.streams
            .values()
            .filter(|s| s.id % 2 == 1 && s.is_active())
            .count()
    }

    // ── Outbound API ───────────────────────────────────────────────────

    /// Take all bytes ready for the transport: committed control frames
    /// first, then as much queued DATA as the flow-control windows allow.
    pub fn take_pending_send(&mut self) -> Vec<u8> {
        let max_frame = self.remote_settings.max_frame_size;
        let (out, finished) =
            self.scheduler
                .take(&mut self.send_window, &mut self.streams, max_frame);
        for stream_id in finished {
            self.reap_if_closed(stream_id);
        }
        out
    }

    /// Whether any control frames or queued data are waiting. Queued data
    /// may still be window-blocked; `take_pending_send` returns only what
    /// the windows allow.
    pub fn has_pending_send(&self) -> bool {
        self.scheduler.has_pending()
    }

    /// Bound the bytes the scheduler will buffer before `send_data`
    /// reports `SendQueueFull`.
    pub fn set_send_queue_limit(&mut self, limit: usize) {
        self.scheduler.set_queue_limit(limit);
    }

    /// Open a stream and send a request header block. Returns the stream
    /// id. The block is committed atomically: id allocation and HEADERS
    /// (+CONTINUATION) emission cannot interleave with another stream.
    pub fn send_request(
        &mut self,
        headers: &[HeaderField],
        end_stream: bool,
    ) -> Result<u32, H2Error> {
        match self.state {
            SessionState::Closed => return Err(H2Error::Closed),
            SessionState::GoingAway => return Err(H2Error::Refused),
            _ => {}
        }
        if self.goaway_received.is_some() {
            return Err(H2Error::Refused);
        }
        if let Some(limit) = self.remote_settings.max_concurrent_streams
            && self.active_local_streams() >= limit as usize
        {
            return Err(H2Error::StreamLimit);
        }

        let stream_id = self.next_stream_id;
        self.next_stream_id += 2;

        let mut block = Vec::new();
        self.encoder.encode(headers, &mut block);
        frame::encode_headers_frames(
            self.scheduler.control(),
            stream_id,
            &block,
            end_stream,
            self.remote_settings.max_frame_size,
        );

        let mut stream = self.new_local_stream(stream_id);
        stream.send_headers(end_stream);
        self.streams.insert(stream_id, stream);

        Ok(stream_id)
    }

    /// Queue body bytes on a stream. The data drains through
    /// `take_pending_send` as the send windows allow; exhausted windows
    /// queue rather than fail. Fails with `SendQueueFull` at the queue cap.
    pub fn send_data(
        &mut self,
        stream_id: u32,
        data: &[u8],
        end_stream: bool,
    ) -> Result<(), H2Error> {
        if self.state == SessionState::Closed {
            return Err(H2Error::Closed);
        }
        let stream = self.streams.get_mut(&stream_id).ok_or(H2Error::Stream {
            stream_id,
            code: ErrorCode::StreamClosed,
        })?;
        if !stream.can_send() {
            return Err(H2Error::Stream {
                stream_id,
                code: ErrorCode::StreamClosed,
            });
        }
        self.scheduler.queue_data(stream_id, data.to_vec(), end_stream)?;
        if end_stream {
            stream.end_queued = true;
        }
        Ok(())
    }

    /// Queue a trailing header block; implies end of stream. Serializes
    /// after any DATA already queued for the stream.
    pub fn send_trailers(
        &mut self,
        stream_id: u32,
        headers: &[HeaderField],
    ) -> Result<(), H2Error> {
        if self.state == SessionState::Closed {
            return Err(H2Error::Closed);
        }
        let stream = self.streams.get_mut(&stream_id).ok_or(H2Error::Stream {
            stream_id,
            code: ErrorCode::StreamClosed,
        })?;
        if !stream.can_send() {
            return Err(H2Error::Stream {
                stream_id,
                code: ErrorCode::StreamClosed,
            });
        }
        let mut block = Vec::new();
        self.encoder.encode(headers, &mut block);
        self.scheduler.queue_trailers(stream_id, block)?;
        stream.end_queued = true;
        Ok(())
    }

    /// Reset a stream. Queued output is dropped and released.
    pub fn reset_stream(&mut self, stream_id: u32, error_code: ErrorCode) {
        Frame::RstStream {
            stream_id,
            error_code,
        }
        .encode(self.scheduler.control());
        self.scheduler.drop_stream(stream_id);
        if self.streams.remove(&stream_id).is_some() {
            self.remember_reset(stream_id);
        }
    }

    /// Cancel a stream locally (RST_STREAM with CANCEL).
    pub fn cancel(&mut self, stream_id: u32) {
        self.reset_stream(stream_id, ErrorCode::Cancel);
    }

    /// Send a PING probe; the peer's answer surfaces as `Pong`.
    pub fn send_ping(&mut self, payload: [u8; 8]) {
        Frame::Ping {
            ack: false,
            opaque_data: payload,
        }
        .encode(self.scheduler.control());
    }

    /// Begin graceful shutdown: advertise the last peer stream we will
    /// process and stop opening new streams. Existing streams may finish.
    pub fn go_away(&mut self, error_code: ErrorCode) {
        if self.goaway_sent.is_some() || self.state == SessionState::Closed {
            return;
        }
        let last = self.highest_processed_peer;
        Frame::GoAway {
            last_stream_id: last,
            error_code,
            debug_data: Vec::new(),
        }
        .encode(self.scheduler.control());
        self.goaway_sent = Some(last);
        self.state = SessionState::GoingAway;
    }

    // ── Inbound ────────────────────────────────────────────────────────

    /// Feed bytes received from the transport. On a connection error the
    /// session queues a GOAWAY (flush `take_pending_send` before closing
    /// the transport), emits `H2Event::Error`, and returns the error.
    pub fn recv(&mut self, data: &[u8]) -> Result<(), H2Error> {
        if self.state == SessionState::Closed {
            return Err(H2Error::Closed);
        }
        self.recv_buf.extend_from_slice(data);
        loop {
            match frame::decode_frame(&self.recv_buf, self.local_settings.max_frame_size) {
                Ok(Some((frame, consumed))) => {
                    self.recv_buf.drain(..consumed);
                    if let Err(e) = self.handle_frame(frame) {
                        return Err(self.connection_failure(e));
                    }
                }
                Ok(None) => break,
                Err(e) => return Err(self.connection_failure(e)),
            }
        }
        Ok(())
    }

    /// Dispatch one inbound frame. `Err` is connection-fatal; stream-scoped
    /// problems are handled internally (RST + event).
    fn handle_frame(&mut self, frame: Frame) -> Result<(), H2Error> {
        // Server preface: the very first frame must be SETTINGS.
        if self.state == SessionState::SettingsPending
            && !matches!(frame, Frame::Settings { ack: false, .. })
        {
            return Err(H2Error::Protocol(
                "expected SETTINGS as server preface".into(),
            ));
        }

        // While a header block is open, only its CONTINUATION frames may
        // arrive (RFC 7540 Section 4.3).
        if let Some(block) = &self.continuation {
            match &frame {
                Frame::Continuation { stream_id, .. } if *stream_id == block.stream_id => {}
                _ => {
                    return Err(H2Error::Protocol(
                        "header block interrupted by another frame".into(),
                    ));
                }
            }
        }

        match frame {
            Frame::Settings { ack, update } => self.handle_settings(ack, update),
            Frame::Headers {
                stream_id,
                fragment,
                end_stream,
                end_headers,
                priority: _,
            } => self.handle_headers(stream_id, fragment, end_stream, end_headers),
            Frame::Continuation {
                stream_id: _,
                fragment,
                end_headers,
            } => self.handle_continuation(fragment, end_headers),
            Frame::Data {
                stream_id,
                payload,
                end_stream,
            } => self.handle_data(stream_id, payload, end_stream),
            Frame::PushPromise {
                stream_id,
                promised_stream_id,
                fragment,
                end_headers,
            } => self.handle_push_promise(stream_id, promised_stream_id, fragment, end_headers),
            Frame::RstStream {
                stream_id,
                error_code,
            } => self.handle_rst_stream(stream_id, error_code),
            Frame::Ping { ack, opaque_data } => {
                if ack {
                    self.events.push_back(H2Event::Pong {
                        payload: opaque_data,
                    });
                } else {
                    // Echo through the control queue, ahead of queued DATA.
                    Frame::Ping {
                        ack: true,
                        opaque_data,
                    }
                    .encode(self.scheduler.control());
                }
                Ok(())
            }
            Frame::GoAway {
                last_stream_id,
                error_code,
                debug_data,
            } => self.handle_goaway(last_stream_id, error_code, debug_data),
            Frame::WindowUpdate {
                stream_id,
                increment,
            } => self.handle_window_update(stream_id, increment),
            // Priority is advisory and deprecated; parse and drop.
            Frame::Priority { .. } => Ok(()),
            // Unknown frame types MUST be ignored (RFC 7540 Section 4.1).
            Frame::Unknown { .. } => Ok(()),
        }
    }

    fn handle_settings(&mut self, ack: bool, update: SettingsUpdate) -> Result<(), H2Error> {
        if ack {
            self.events.push_back(H2Event::SettingsAcknowledged);
            return Ok(());
        }

        let old_initial = i64::from(self.remote_settings.initial_window_size);
        self.remote_settings.apply(&update);

        if let Some(size) = update.header_table_size {
            // Announced to the peer's decoder at the start of our next
            // header block (RFC 7541 Section 4.2).
            self.encoder.update_max_table_size(size as usize);
        }

        // Retroactively adjust every stream's send window
        // (RFC 7540 Section 6.9.2).
        let delta = i64::from(self.remote_settings.initial_window_size) - old_initial;
        if delta != 0 {
            for stream in self.streams.values_mut() {
                stream.send_window.adjust(delta)?;
            }
        }

        Frame::Settings {
            ack: true,
            update: SettingsUpdate::default(),
        }
        .encode(self.scheduler.control());

        if self.state == SessionState::SettingsPending {
            self.state = SessionState::Ready;
        }

        Ok(())
    }

    fn handle_headers(
        &mut self,
        stream_id: u32,
        fragment: Vec<u8>,
        end_stream: bool,
        end_headers: bool,
    ) -> Result<(), H2Error> {
        let block = HeaderBlock {
            stream_id,
            kind: HeaderBlockKind::Headers,
            end_stream,
            buf: fragment,
        };
        if end_headers {
            self.finish_header_block(block)
        } else {
            self.continuation = Some(block);
            Ok(())
        }
    }

    fn handle_continuation(&mut self, fragment: Vec<u8>, end_headers: bool) -> Result<(), H2Error> {
        let Some(block) = &mut self.continuation else {
            return Err(H2Error::Protocol("CONTINUATION without header block".into()));
        };
        block.buf.extend_from_slice(&fragment);
        if end_headers {
            let block = self.continuation.take().unwrap();
            self.finish_header_block(block)
        } else {
            Ok(())
        }
    }

    /// Complete header block received: decode it (always, so the HPACK
    /// dynamic table stays in sync even when the block is discarded), then
    /// dispatch by kind.
    fn finish_header_block(&mut self, block: HeaderBlock) -> Result<(), H2Error> {
        let headers = self.decoder.decode(&block.buf)?;
        match block.kind {
            HeaderBlockKind::Headers => {
                self.deliver_headers(block.stream_id, headers, block.end_stream)
            }
            HeaderBlockKind::PushPromise { promised_stream_id } => {
                self.deliver_push_promise(block.stream_id, promised_stream_id, headers)
            }
        }
    }

    fn deliver_headers(
        &mut self,
        stream_id: u32,
        headers: Vec<HeaderField>,
        end_stream: bool,
    ) -> Result<(), H2Error> {
        let Some(stream) = self.streams.get_mut(&stream_id) else {
            return self.on_frame_for_missing_stream(stream_id, true);
        };

        if let Err(violation) = stream.recv_headers(end_stream) {
            return self.on_violation(stream_id, violation);
        }

        let status = headers
            .iter()
            .find(|h| h.name == b":status")
            .map(|h| h.value.clone());

        if stream.header_blocks == 0 {
            let Some(status) = status else {
                // A leading block with no :status is not a response.
                return self.on_violation(stream_id, Violation::Stream(ErrorCode::ProtocolError));
            };
            // Interim (1xx) responses do not consume the leading-block
            // slot; trailers accounting starts at the final response.
            if !status.starts_with(b"1") {
                stream.header_blocks = 1;
            }
            self.events.push_back(H2Event::Response {
                stream_id,
                headers,
                end_stream,
            });
        } else {
            // Second block: trailers. Only valid when it ends the stream
            // (RFC 7540 Section 8.1).
            if !end_stream {
                return self.on_violation(stream_id, Violation::Stream(ErrorCode::ProtocolError));
            }
            stream.header_blocks = 2;
            self.events.push_back(H2Event::Trailers { stream_id, headers });
        }

        self.reap_if_closed(stream_id);
        Ok(())
    }

    fn handle_data(
        &mut self,
        stream_id: u32,
        payload: Vec<u8>,
        end_stream: bool,
    ) -> Result<(), H2Error> {
        let len = payload.len() as u32;

        // Connection-level accounting covers every DATA frame, whatever
        // stream it names.
        if self.recv_window.on_data(len).is_err() {
            return Err(H2Error::FlowControl);
        }
        if let Some(increment) = self.recv_window.poll_update() {
            Frame::WindowUpdate {
                stream_id: 0,
                increment,
            }
            .encode(self.scheduler.control());
        }

        let Some(stream) = self.streams.get_mut(&stream_id) else {
            return self.on_frame_for_missing_stream(stream_id, true);
        };

        if let Err(violation) = stream.recv_data(end_stream) {
            return self.on_violation(stream_id, violation);
        }
        if stream.recv_window.on_data(len).is_err() {
            return self.on_violation(stream_id, Violation::Stream(ErrorCode::FlowControlError));
        }

        if !end_stream
            && let Some(increment) = stream.recv_window.poll_update()
        {
            Frame::WindowUpdate {
                stream_id,
                increment,
            }
            .encode(self.scheduler.control());
        }

        self.events.push_back(H2Event::Data {
            stream_id,
            data: payload,
            end_stream,
        });

        self.reap_if_closed(stream_id);
        Ok(())
    }

    fn handle_push_promise(
        &mut self,
        stream_id: u32,
        promised_stream_id: u32,
        fragment: Vec<u8>,
        end_headers: bool,
    ) -> Result<(), H2Error> {
        if !self.local_settings.enable_push {
            return Err(H2Error::Protocol(
                "PUSH_PROMISE received but ENABLE_PUSH=0".into(),
            ));
        }
        // Promised ids are even and strictly increasing; anything else
        // (including reuse of an old id) is fatal.
        if promised_stream_id % 2 != 0
            || promised_stream_id == 0
            || promised_stream_id <= self.last_promised_id
        {
            return Err(H2Error::Protocol("invalid promised stream id".into()));
        }
        // The promise must ride an active request stream.
        match self.streams.get(&stream_id) {
            Some(s) if matches!(s.state, StreamState::Open | StreamState::HalfClosedLocal) => {}
            _ => {
                return Err(H2Error::Protocol(
                    "PUSH_PROMISE on unknown or closed stream".into(),
                ));
            }
        }

        self.last_promised_id = promised_stream_id;

        let mut promised = Stream::new(
            promised_stream_id,
            i64::from(self.local_settings.initial_window_size),
            i64::from(self.remote_settings.initial_window_size),
        );
        promised.state = StreamState::ReservedRemote;
        self.streams.insert(promised_stream_id, promised);

        let block = HeaderBlock {
            stream_id,
            kind: HeaderBlockKind::PushPromise { promised_stream_id },
            end_stream: false,
            buf: fragment,
        };
        if end_headers {
            self.finish_header_block(block)
        } else {
            self.continuation = Some(block);
            Ok(())
        }
    }

    fn deliver_push_promise(
        &mut self,
        stream_id: u32,
        promised_stream_id: u32,
        headers: Vec<HeaderField>,
    ) -> Result<(), H2Error> {
        // While going away (either direction), promises are refused after
        // decoding: the block already updated the HPACK state, but the
        // stream must not produce any application-visible effect.
        let past_cutoff = self
            .goaway_sent
            .is_some_and(|last| promised_stream_id > last);
        if self.is_going_away() || past_cutoff {
            self.streams.remove(&promised_stream_id);
            Frame::RstStream {
                stream_id: promised_stream_id,
                error_code: ErrorCode::RefusedStream,
            }
            .encode(self.scheduler.control());
            self.remember_reset(promised_stream_id);
            return Ok(());
        }

        self.highest_processed_peer = self.highest_processed_peer.max(promised_stream_id);
        self.events.push_back(H2Event::PushPromise {
            stream_id,
            promised_stream_id,
            headers,
        });
        Ok(())
    }

    fn handle_rst_stream(&mut self, stream_id: u32, error_code: ErrorCode) -> Result<(), H2Error> {
        if self.streams.remove(&stream_id).is_none() {
            // RST for a stream we never opened is only legal for streams
            // that once existed.
            return self.on_frame_for_missing_stream(stream_id, false);
        }
        self.scheduler.drop_stream(stream_id);
        self.events.push_back(H2Event::StreamReset {
            stream_id,
            error_code,
            retryable: error_code == ErrorCode::RefusedStream,
        });
        Ok(())
    }

    fn handle_goaway(
        &mut self,
        last_stream_id: u32,
        error_code: ErrorCode,
        debug_data: Vec<u8>,
    ) -> Result<(), H2Error> {
        self.goaway_received = Some(last_stream_id);
        if self.state != SessionState::Closed {
            self.state = SessionState::GoingAway;
        }

        // Streams the server will never process are retryable elsewhere.
        let abandoned: Vec<u32> = self
            .streams
            .keys()
            .copied()
            .filter(|id| id % 2 == 1 && *id > last_stream_id)
            .collect();
        for stream_id in abandoned {
            self.streams.remove(&stream_id);
            self.scheduler.drop_stream(stream_id);
            self.remember_reset(stream_id);
            self.events.push_back(H2Event::StreamReset {
                stream_id,
                error_code: ErrorCode::RefusedStream,
                retryable: true,
            });
        }

        self.events.push_back(H2Event::GoAway {
            last_stream_id,
            error_code,
            debug_data,
        });
        Ok(())
    }

    fn handle_window_update(&mut self, stream_id: u32, increment: u32) -> Result<(), H2Error> {
        if stream_id == 0 {
            if increment == 0 {
                return Err(H2Error::Protocol("WINDOW_UPDATE with 0 increment".into()));
            }
            return self.send_window.increase(increment);
        }

        let Some(stream) = self.streams.get_mut(&stream_id) else {
            // Late WINDOW_UPDATE after stream closure is within the grace
            // the RFC allows; an update for an idle stream is not.
            return self.on_frame_for_missing_stream(stream_id, false);
        };
        if increment == 0 {
            return self.on_violation(stream_id, Violation::Stream(ErrorCode::ProtocolError));
        }
        if stream.send_window.increase(increment).is_err() {
            return self.on_violation(stream_id, Violation::Stream(ErrorCode::FlowControlError));
        }
        Ok(())
    }

    // ── Error paths and bookkeeping ────────────────────────────────────

    /// A frame addressed a stream that is not in the table. Decide between
    /// ignore (recently reset, or closed with grace), connection error
    /// (frames after END_STREAM), and protocol error (idle stream).
    /// `strict` marks frame types with no post-close grace (DATA, HEADERS).
    fn on_frame_for_missing_stream(&mut self, stream_id: u32, strict: bool) -> Result<(), H2Error> {
        if self.recently_reset.contains(&stream_id) {
            return Ok(());
        }
        let once_existed = if stream_id % 2 == 1 {
            stream_id < self.next_stream_id
        } else {
            stream_id <= self.last_promised_id
        };
        if !once_existed {
            return Err(H2Error::Protocol("frame on idle stream".into()));
        }
        if strict {
            return Err(H2Error::Connection {
                code: ErrorCode::StreamClosed,
                message: format!("frame on closed stream {stream_id}"),
            });
        }
        Ok(())
    }

    /// Map a stream-machine verdict onto the wire.
    fn on_violation(&mut self, stream_id: u32, violation: Violation) -> Result<(), H2Error> {
        match violation {
            Violation::Stream(code) => {
                self.stream_error(stream_id, code);
                Ok(())
            }
            Violation::Connection(code) => Err(H2Error::Connection {
                code,
                message: format!("illegal frame for stream {stream_id}"),
            }),
        }
    }

    /// Reset a stream because of a locally-detected violation and tell the
    /// application.
    fn stream_error(&mut self, stream_id: u32, code: ErrorCode) {
        self.reset_stream(stream_id, code);
        self.events.push_back(H2Event::StreamReset {
            stream_id,
            error_code: code,
            retryable: false,
        });
    }

    /// Promote to a connection failure: queue GOAWAY with the highest
    /// fully-processed peer stream, emit the error event, close.
    fn connection_failure(&mut self, error: H2Error) -> H2Error {
        if self.state != SessionState::Closed {
            Frame::GoAway {
                last_stream_id: self.highest_processed_peer,
                error_code: error.code(),
                debug_data: error.to_string().into_bytes(),
            }
            .encode(self.scheduler.control());
            self.goaway_sent = Some(self.highest_processed_peer);
            self.state = SessionState::Closed;
            self.events.push_back(H2Event::Error(error.clone()));
        }
        error
    }

    fn remember_reset(&mut self, stream_id: u32) {
        if self.recently_reset.len() == RESET_GRACE_ENTRIES {
            self.recently_reset.pop_front();
        }
        self.recently_reset.push_back(stream_id);
    }

    /// Remove a stream whose both directions have finished. Buffers and
    /// queued output go with it.
    fn reap_if_closed(&mut self, stream_id: u32) {
        if let Some(stream) = self.streams.get(&stream_id)
            && stream.state == StreamState::Closed
        {
            self.streams.remove(&stream_id);
            self.scheduler.drop_stream(stream_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client_settings() -> Settings {
        Settings {
            enable_push: false,
            ..Default::default()
        }
    }

    fn server_settings_frame(update: SettingsUpdate) -> Vec<u8> {
        let mut buf = Vec::new();
        Frame::Settings { ack: false, update }.encode(&mut buf);
        buf
    }

    /// Build a session, deliver the server preface, and drain the initial
    /// output (preface + SETTINGS + ACK).
    fn ready_session() -> Session {
        let mut session = Session::client(client_settings());
        let _ = session.take_pending_send();
        session
            .recv(&server_settings_frame(SettingsUpdate::default()))
            .unwrap();
        let _ = session.take_pending_send();
        session
    }

    fn decode_all(buf: &[u8]) -> Vec<Frame> {
        let mut frames = Vec::new();
        let mut rest = buf;
        while let Some((frame, consumed)) = frame::decode_frame(rest, 1 << 24).unwrap() {
            rest = &rest[consumed..];
            frames.push(frame);
        }
        frames
    }

    fn respond(session: &mut Session, stream_id: u32, end_stream: bool) {
        let mut enc = Encoder::new(4096);
        let mut block = Vec::new();
        enc.encode(&[HeaderField::new(b":status", b"200")], &mut block);
        let mut buf = Vec::new();
        Frame::Headers {
            stream_id,
            fragment: block,
            end_stream,
            end_headers: true,
            priority: None,
        }
        .encode(&mut buf);
        session.recv(&buf).unwrap();
    }

    #[test]
    fn preface_precedes_settings() {
        let mut session = Session::client(client_settings());
        let out = session.take_pending_send();
        assert!(out.starts_with(CLIENT_PREFACE));
        let frames = decode_all(&out[CLIENT_PREFACE.len()..]);
        assert!(matches!(frames[0], Frame::Settings { ack: false, .. }));
    }

    #[test]
    fn first_frame_must_be_settings() {
        let mut session = Session::client(client_settings());
        let _ = session.take_pending_send();
        let mut buf = Vec::new();
        Frame::Ping {
            ack: false,
            opaque_data: [0; 8],
        }
        .encode(&mut buf);
        let err = session.recv(&buf).unwrap_err();
        assert!(matches!(err, H2Error::Protocol(_)));
        assert!(session.is_closed());
        // GOAWAY queued for the transport.
        let frames = decode_all(&session.take_pending_send());
        assert!(matches!(
            frames.last(),
            Some(Frame::GoAway {
                error_code: ErrorCode::ProtocolError,
                ..
            })
        ));
    }

    #[test]
    fn settings_are_acknowledged_in_order() {
        let mut session = ready_session();
        session
            .recv(&server_settings_frame(SettingsUpdate {
                max_concurrent_streams: Some(10),
                ..Default::default()
            }))
            .unwrap();
        let frames = decode_all(&session.take_pending_send());
        assert!(matches!(frames[0], Frame::Settings { ack: true, .. }));
        assert_eq!(session.remote_settings().max_concurrent_streams, Some(10));
    }

    #[test]
    fn stream_ids_are_odd_and_increasing() {
        let mut session = ready_session();
        let headers = [HeaderField::new(b":method", b"GET")];
        let a = session.send_request(&headers, true).unwrap();
        let b = session.send_request(&headers, true).unwrap();
        let c = session.send_request(&headers, true).unwrap();
        assert_eq!((a, b, c), (1, 3, 5));
    }

    #[test]
    fn request_response_exchange() {
        let mut session = ready_session();
        let stream_id = session
            .send_request(
                &[
                    HeaderField::new(b":method", b"GET"),
                    HeaderField::new(b":path", b"/"),
                    HeaderField::new(b":scheme", b"https"),
                    HeaderField::new(b":authority", b"example.com"),
                ],
                true,
            )
            .unwrap();
        let out = session.take_pending_send();
        let frames = decode_all(&out);
        match &frames[0] {
            Frame::Headers {
                stream_id: sid,
                end_stream,
                end_headers,
                ..
            } => {
                assert_eq!(*sid, stream_id);
                assert!(end_stream);
                assert!(end_headers);
            }
            other => panic!("expected Headers, got {other:?}"),
        }
        assert_eq!(
            session.stream_state(stream_id),
            Some(StreamState::HalfClosedLocal)
        );

        respond(&mut session, stream_id, true);
        match session.poll_event().unwrap() {
            H2Event::Response {
                stream_id: sid,
                headers,
                end_stream,
            } => {
                assert_eq!(sid, stream_id);
                assert!(end_stream);
                assert_eq!(headers[0].value, b"200");
            }
            other => panic!("expected Response, got {other:?}"),
        }
        // Both halves done: the stream is gone.
        assert_eq!(session.stream_state(stream_id), None);
    }

    #[test]
    fn max_concurrent_streams_enforced() {
        let mut session = ready_session();
        session
            .recv(&server_settings_frame(SettingsUpdate {
                max_concurrent_streams: Some(1),
                ..Default::default()
            }))
            .unwrap();
        let headers = [HeaderField::new(b":method", b"GET")];
        let first = session.send_request(&headers, true).unwrap();
        assert_eq!(
            session.send_request(&headers, true),
            Err(H2Error::StreamLimit)
        );
        // Completing the first stream frees a slot.
        respond(&mut session, first, true);
        assert!(session.send_request(&headers, true).is_ok());
    }

    #[test]
    fn ping_is_echoed_ahead_of_data() {
        let mut session = ready_session();
        let stream_id = session
            .send_request(&[HeaderField::new(b":method", b"POST")], false)
            .unwrap();
        let _ = session.take_pending_send();
        session.send_data(stream_id, b"body", false).unwrap();

        let mut buf = Vec::new();
        Frame::Ping {
            ack: false,
            opaque_data: [7; 8],
        }
        .encode(&mut buf);
        session.recv(&buf).unwrap();

        let frames = decode_all(&session.take_pending_send());
        match &frames[0] {
            Frame::Ping { ack, opaque_data } => {
                assert!(ack);
                assert_eq!(*opaque_data, [7; 8]);
            }
            other => panic!("expected Ping first, got {other:?}"),
        }
        assert!(matches!(frames[1], Frame::Data { .. }));
    }

    #[test]
    fn trailers_without_end_stream_reset_the_stream() {
        let mut session = ready_session();
        let stream_id = session
            .send_request(&[HeaderField::new(b":method", b"GET")], true)
            .unwrap();
        let _ = session.take_pending_send();
        respond(&mut session, stream_id, false);
        let _ = session.poll_event();

        // Second header block without END_STREAM.
        let mut enc = Encoder::new(4096);
        let mut block = Vec::new();
        enc.encode(&[HeaderField::new(b"grpc-status", b"0")], &mut block);
        let mut buf = Vec::new();
        Frame::Headers {
            stream_id,
            fragment: block,
            end_stream: false,
            end_headers: true,
            priority: None,
        }
        .encode(&mut buf);
        session.recv(&buf).unwrap();

        match session.poll_event().unwrap() {
            H2Event::StreamReset {
                stream_id: sid,
                error_code,
                ..
            } => {
                assert_eq!(sid, stream_id);
                assert_eq!(error_code, ErrorCode::ProtocolError);
            }
            other => panic!("expected StreamReset, got {other:?}"),
        }
        let frames = decode_all(&session.take_pending_send());
        assert!(matches!(frames[0], Frame::RstStream { .. }));
        assert!(!session.is_closed());
    }

    #[test]
    fn goaway_resets_streams_past_cutoff() {
        let mut session = ready_session();
        let headers = [HeaderField::new(b":method", b"GET")];
        let s1 = session.send_request(&headers, true).unwrap();
        let s3 = session.send_request(&headers, true).unwrap();
        let _ = session.take_pending_send();

        let mut buf = Vec::new();
        Frame::GoAway {
            last_stream_id: s1,
            error_code: ErrorCode::NoError,
            debug_data: Vec::new(),
        }
        .encode(&mut buf);
        session.recv(&buf).unwrap();

        match session.poll_event().unwrap() {
            H2Event::StreamReset {
                stream_id,
                error_code,
                retryable,
            } => {
                assert_eq!(stream_id, s3);
                assert_eq!(error_code, ErrorCode::RefusedStream);
                assert!(retryable);
            }
            other => panic!("expected StreamReset, got {other:?}"),
        }
        assert!(matches!(
            session.poll_event().unwrap(),
            H2Event::GoAway { .. }
        ));
        assert!(session.is_going_away());
        assert_eq!(session.send_request(&headers, true), Err(H2Error::Refused));
        // The cut stream is gone, the survivor remains.
        assert_eq!(session.stream_state(s3), None);
        assert!(session.stream_state(s1).is_some());
    }

    #[test]
    fn window_update_zero_is_scoped() {
        // Stream scope: RST, session survives.
        let mut session = ready_session();
        let stream_id = session
            .send_request(&[HeaderField::new(b":method", b"GET")], true)
            .unwrap();
        let _ = session.take_pending_send();
        let mut buf = Vec::new();
        Frame::WindowUpdate {
            stream_id,
            increment: 0,
        }
        .encode(&mut buf);
        session.recv(&buf).unwrap();
        assert!(!session.is_closed());
        assert!(matches!(
            session.poll_event(),
            Some(H2Event::StreamReset { .. })
        ));

        // Connection scope: fatal.
        let mut session = ready_session();
        let mut buf = Vec::new();
        Frame::WindowUpdate {
            stream_id: 0,
            increment: 0,
        }
        .encode(&mut buf);
        assert!(session.recv(&buf).is_err());
        assert!(session.is_closed());
    }

    #[test]
    fn settings_delta_adjusts_open_stream_windows() {
        let mut session = ready_session();
        let stream_id = session
            .send_request(&[HeaderField::new(b":method", b"POST")], false)
            .unwrap();
        let _ = session.take_pending_send();

        // Shrink the initial window: the open stream follows.
        session
            .recv(&server_settings_frame(SettingsUpdate {
                initial_window_size: Some(10),
                ..Default::default()
            }))
            .unwrap();
        let _ = session.take_pending_send();

        session.send_data(stream_id, &[0u8; 25], false).unwrap();
        let frames = decode_all(&session.take_pending_send());
        match &frames[0] {
            Frame::Data { payload, .. } => assert_eq!(payload.len(), 10),
            other => panic!("expected Data, got {other:?}"),
        }
    }

    #[test]
    fn settings_window_overflow_is_fatal() {
        let mut session = ready_session();
        let _ = session
            .send_request(&[HeaderField::new(b":method", b"POST")], false)
            .unwrap();
        let _ = session.take_pending_send();

        // Credit the stream window up to the maximum, then a positive
        // SETTINGS delta pushes it past 2^31-1.
        let mut buf = Vec::new();
        Frame::WindowUpdate {
            stream_id: 1,
            increment: 0x7fff_ffff - 65_535,
        }
        .encode(&mut buf);
        session.recv(&buf).unwrap();

        let err = session.recv(&server_settings_frame(SettingsUpdate {
            initial_window_size: Some(65_536),
            ..Default::default()
        }));
        assert_eq!(err, Err(H2Error::FlowControl));
        assert!(session.is_closed());
    }

    #[test]
    fn interleaved_frame_during_header_block_is_fatal() {
        let mut session = ready_session();
        let stream_id = session
            .send_request(&[HeaderField::new(b":method", b"GET")], true)
            .unwrap();
        let _ = session.take_pending_send();

        let mut buf = Vec::new();
        Frame::Headers {
            stream_id,
            fragment: vec![0x82],
            end_stream: false,
            end_headers: false,
            priority: None,
        }
        .encode(&mut buf);
        Frame::Data {
            stream_id,
            payload: b"x".to_vec(),
            end_stream: false,
        }
        .encode(&mut buf);

        let err = session.recv(&buf).unwrap_err();
        assert!(matches!(err, H2Error::Protocol(_)));
        let frames = decode_all(&session.take_pending_send());
        match frames.last() {
            Some(Frame::GoAway {
                last_stream_id,
                error_code,
                ..
            }) => {
                assert_eq!(*last_stream_id, 0);
                assert_eq!(*error_code, ErrorCode::ProtocolError);
            }
            other => panic!("expected GoAway, got {other:?}"),
        }
    }

    #[test]
    fn push_promise_with_push_disabled_is_fatal() {
        let mut session = ready_session();
        let stream_id = session
            .send_request(&[HeaderField::new(b":method", b"GET")], true)
            .unwrap();
        let _ = session.take_pending_send();

        let mut enc = Encoder::new(4096);
        let mut block = Vec::new();
        enc.encode(&[HeaderField::new(b":method", b"GET")], &mut block);
        let mut buf = Vec::new();
        Frame::PushPromise {
            stream_id,
            promised_stream_id: 2,
            fragment: block,
            end_headers: true,
        }
        .encode(&mut buf);

        let err = session.recv(&buf).unwrap_err();
        assert!(matches!(err, H2Error::Protocol(_)));
        assert!(session.is_closed());
        assert!(session.poll_event().is_some());
    }

    #[test]
    fn push_promise_reserves_and_delivers() {
        let mut session = Session::client(Settings::default()); // push enabled
        let _ = session.take_pending_send();
        session
            .recv(&server_settings_frame(SettingsUpdate::default()))
            .unwrap();
        let _ = session.take_pending_send();

        let stream_id = session
            .send_request(&[HeaderField::new(b":method", b"GET")], true)
            .unwrap();
        let _ = session.take_pending_send();

        let mut enc = Encoder::new(4096);
        let mut block = Vec::new();
        enc.encode(
            &[
                HeaderField::new(b":method", b"GET"),
                HeaderField::new(b":path", b"/style.css"),
            ],
            &mut block,
        );
        let mut buf = Vec::new();
        Frame::PushPromise {
            stream_id,
            promised_stream_id: 2,
            fragment: block,
            end_headers: true,
        }
        .encode(&mut buf);
        session.recv(&buf).unwrap();

        match session.poll_event().unwrap() {
            H2Event::PushPromise {
                stream_id: sid,
                promised_stream_id,
                headers,
            } => {
                assert_eq!(sid, stream_id);
                assert_eq!(promised_stream_id, 2);
                assert_eq!(headers[1].value, b"/style.css");
            }
            other => panic!("expected PushPromise, got {other:?}"),
        }
        assert_eq!(
            session.stream_state(2),
            Some(StreamState::ReservedRemote)
        );

        // The promised response flows on stream 2.
        respond(&mut session, 2, true);
        match session.poll_event().unwrap() {
            H2Event::Response { stream_id: 2, .. } => {}
            other => panic!("expected Response on stream 2, got {other:?}"),
        }
    }

    #[test]
    fn push_promise_reuse_of_old_id_is_fatal() {
        let mut session = Session::client(Settings::default());
        let _ = session.take_pending_send();
        session
            .recv(&server_settings_frame(SettingsUpdate::default()))
            .unwrap();
        let stream_id = session
            .send_request(&[HeaderField::new(b":method", b"GET")], false)
            .unwrap();
        let _ = session.take_pending_send();

        for promised in [4u32, 2u32] {
            let mut enc = Encoder::new(4096);
            let mut block = Vec::new();
            enc.encode(&[HeaderField::new(b":method", b"GET")], &mut block);
            let mut buf = Vec::new();
            Frame::PushPromise {
                stream_id,
                promised_stream_id: promised,
                fragment: block,
                end_headers: true,
            }
            .encode(&mut buf);
            if promised == 4 {
                session.recv(&buf).unwrap();
            } else {
                // 2 < 4: monotonicity violation.
                assert!(session.recv(&buf).is_err());
                assert!(session.is_closed());
            }
        }
    }

    #[test]
    fn cancel_drops_queued_output() {
        let mut session = ready_session();
        let stream_id = session
            .send_request(&[HeaderField::new(b":method", b"POST")], false)
            .unwrap();
        let _ = session.take_pending_send();
        session.send_data(stream_id, &[0u8; 1000], false).unwrap();
        session.cancel(stream_id);

        let frames = decode_all(&session.take_pending_send());
        // The RST goes out; the queued DATA does not.
        assert!(matches!(
            frames[0],
            Frame::RstStream {
                error_code: ErrorCode::Cancel,
                ..
            }
        ));
        assert!(!frames.iter().any(|f| matches!(f, Frame::Data { .. })));
        assert_eq!(session.stream_state(stream_id), None);
    }

    #[test]
    fn frames_for_recently_reset_streams_are_ignored() {
        let mut session = ready_session();
        let stream_id = session
            .send_request(&[HeaderField::new(b":method", b"GET")], true)
            .unwrap();
        let _ = session.take_pending_send();
        session.cancel(stream_id);
        let _ = session.take_pending_send();

        // A response already in flight when our RST left.
        respond(&mut session, stream_id, true);
        assert!(session.poll_event().is_none());
        assert!(!session.is_closed());
    }

    #[test]
    fn data_on_idle_stream_is_fatal() {
        let mut session = ready_session();
        let mut buf = Vec::new();
        Frame::Data {
            stream_id: 9,
            payload: b"x".to_vec(),
            end_stream: false,
        }
        .encode(&mut buf);
        assert!(session.recv(&buf).is_err());
        assert!(session.is_closed());
    }

    #[test]
    fn receive_windows_replenish() {
        let mut session = ready_session();
        let stream_id = session
            .send_request(&[HeaderField::new(b":method", b"GET")], true)
            .unwrap();
        let _ = session.take_pending_send();
        respond(&mut session, stream_id, false);
        let _ = session.poll_event();
        let _ = session.take_pending_send();

        // Push enough DATA to cross the half-window threshold (the frames
        // must each fit in our MAX_FRAME_SIZE).
        let mut buf = Vec::new();
        for _ in 0..3 {
            Frame::Data {
                stream_id,
                payload: vec![0u8; 16_000],
                end_stream: false,
            }
            .encode(&mut buf);
        }
        session.recv(&buf).unwrap();

        let frames = decode_all(&session.take_pending_send());
        let updates: Vec<&Frame> = frames
            .iter()
            .filter(|f| matches!(f, Frame::WindowUpdate { .. }))
            .collect();
        // One for the session window, one for the stream window.
        assert_eq!(updates.len(), 2);
        for f in updates {
            if let Frame::WindowUpdate { increment, .. } = f {
                assert_eq!(*increment, 48_000);
            }
        }
    }

    #[test]
    fn upgraded_session_owns_stream_one() {
        let mut session = Session::upgraded(client_settings());
        assert_eq!(
            session.stream_state(1),
            Some(StreamState::HalfClosedLocal)
        );
        let _ = session.take_pending_send();
        session
            .recv(&server_settings_frame(SettingsUpdate::default()))
            .unwrap();
        let _ = session.take_pending_send();

        // The next explicit request gets stream 3.
        let sid = session
            .send_request(&[HeaderField::new(b":method", b"GET")], true)
            .unwrap();
        assert_eq!(sid, 3);

        // The upgraded response arrives on stream 1.
        respond(&mut session, 1, true);
        match session.poll_event().unwrap() {
            H2Event::Response { stream_id: 1, .. } => {}
            other => panic!("expected Response on stream 1, got {other:?}"),
        }
    }

    #[test]
    fn upgraded_stream_follows_settings_delta() {
        // Open question (c): the implicit stream 1 participates in the
        // INITIAL_WINDOW_SIZE adjustment like any open stream, including
        // the overflow check.
        let mut session = Session::upgraded(client_settings());
        let _ = session.take_pending_send();
        session
            .recv(&server_settings_frame(SettingsUpdate::default()))
            .unwrap();

        // Credit stream 1 to the window maximum.
        let mut buf = Vec::new();
        Frame::WindowUpdate {
            stream_id: 1,
            increment: 0x7fff_ffff - 65_535,
        }
        .encode(&mut buf);
        session.recv(&buf).unwrap();

        let err = session.recv(&server_settings_frame(SettingsUpdate {
            initial_window_size: Some(100),
            ..Default::default()
        }));
        assert!(err.is_ok(), "lowering the window must not overflow");

        let err = session.recv(&server_settings_frame(SettingsUpdate {
            initial_window_size: Some(65_536),
            ..Default::default()
        }));
        assert_eq!(err, Err(H2Error::FlowControl));
        assert!(session.is_closed());
    }

    #[test]
    fn graceful_goaway_allows_existing_streams() {
        let mut session = ready_session();
        let stream_id = session
            .send_request(&[HeaderField::new(b":method", b"GET")], true)
            .unwrap();
        let _ = session.take_pending_send();

        session.go_away(ErrorCode::NoError);
        let frames = decode_all(&session.take_pending_send());
        assert!(matches!(frames[0], Frame::GoAway { .. }));
        assert!(session.is_going_away());

        // No new streams...
        assert_eq!(
            session.send_request(&[HeaderField::new(b":method", b"GET")], true),
            Err(H2Error::Refused)
        );
        // ...but the in-flight one still completes.
        respond(&mut session, stream_id, true);
        assert!(matches!(
            session.poll_event(),
            Some(H2Event::Response { .. })
        ));
    }

    #[test]
    fn continuation_reassembles_header_block() {
        let mut session = ready_session();
        let stream_id = session
            .send_request(&[HeaderField::new(b":method", b"GET")], true)
            .unwrap();
        let _ = session.take_pending_send();

        let mut enc = Encoder::new(4096);
        let mut block = Vec::new();
        enc.encode(
            &[
                HeaderField::new(b":status", b"200"),
                HeaderField::new(b"x-big", b"split-across-frames"),
            ],
            &mut block,
        );
        let mid = block.len() / 2;

        let mut buf = Vec::new();
        Frame::Headers {
            stream_id,
            fragment: block[..mid].to_vec(),
            end_stream: true,
            end_headers: false,
            priority: None,
        }
        .encode(&mut buf);
        Frame::Continuation {
            stream_id,
            fragment: block[mid..].to_vec(),
            end_headers: true,
        }
        .encode(&mut buf);
        session.recv(&buf).unwrap();

        match session.poll_event().unwrap() {
            H2Event::Response {
                headers,
                end_stream,
                ..
            } => {
                assert!(end_stream);
                assert_eq!(headers.len(), 2);
                assert_eq!(headers[1].value, b"split-across-frames");
            }
            other => panic!("expected Response, got {other:?}"),
        }
    }

    #[test]
    fn informational_response_keeps_trailer_accounting() {
        let mut session = ready_session();
        let stream_id = session
            .send_request(&[HeaderField::new(b":method", b"POST")], false)
            .unwrap();
        let _ = session.take_pending_send();

        let mut enc = Encoder::new(4096);
        // 100 Continue, then the real response.
        for status in [b"100".as_slice(), b"200".as_slice()] {
            let mut block = Vec::new();
            enc.encode(&[HeaderField::new(b":status", status)], &mut block);
            let mut buf = Vec::new();
            Frame::Headers {
                stream_id,
                fragment: block,
                end_stream: false,
                end_headers: true,
                priority: None,
            }
            .encode(&mut buf);
            session.recv(&buf).unwrap();
        }

        match session.poll_event().unwrap() {
            H2Event::Response { headers, .. } => assert_eq!(headers[0].value, b"100"),
            other => panic!("expected interim Response, got {other:?}"),
        }
        match session.poll_event().unwrap() {
            H2Event::Response { headers, .. } => assert_eq!(headers[0].value, b"200"),
            other => panic!("expected final Response, got {other:?}"),
        }
    }
}

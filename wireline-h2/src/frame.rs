//! HTTP/2 frame encoding/decoding (RFC 7540 Section 4).
//!
//! HTTP/2 frames have a fixed 9-byte header:
//! ```text
//! +-----------------------------------------------+
//! |                 Length (24)                    |
//! +---------------+---------------+---------------+
//! |   Type (8)    |   Flags (8)   |
//! +-+-------------+---------------+------...------+
//! |R|                 Stream Identifier (31)       |
//! +-+---------------------------------------------+
//! |                   Frame Payload ...            |
//! +-----------------------------------------------+
//! ```
//!
//! `decode_frame` consumes exactly one complete frame and leaves the tail
//! for the next call; `Frame::encode` is the inverse. Header blocks larger
//! than the peer's MAX_FRAME_SIZE are fragmented across CONTINUATION frames
//! by `encode_headers_frames` / `encode_push_promise_frames`; DATA
//! fragmentation belongs to the output scheduler.

use crate::error::{ErrorCode, H2Error};
use crate::settings::SettingsUpdate;

/// Frame header size in bytes.
pub const FRAME_HEADER_LEN: usize = 9;

// Frame type constants (RFC 7540 Section 6).
pub const FRAME_DATA: u8 = 0x0;
pub const FRAME_HEADERS: u8 = 0x1;
pub const FRAME_PRIORITY: u8 = 0x2;
pub const FRAME_RST_STREAM: u8 = 0x3;
pub const FRAME_SETTINGS: u8 = 0x4;
pub const FRAME_PUSH_PROMISE: u8 = 0x5;
pub const FRAME_PING: u8 = 0x6;
pub const FRAME_GOAWAY: u8 = 0x7;
pub const FRAME_WINDOW_UPDATE: u8 = 0x8;
pub const FRAME_CONTINUATION: u8 = 0x9;

// Flag constants.
pub const FLAG_END_STREAM: u8 = 0x1;
pub const FLAG_ACK: u8 = 0x1;
pub const FLAG_END_HEADERS: u8 = 0x4;
pub const FLAG_PADDED: u8 = 0x8;
pub const FLAG_PRIORITY: u8 = 0x20;

/// An HTTP/2 frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// DATA frame (type 0x0): request or response body bytes.
    Data {
        stream_id: u32,
        payload: Vec<u8>,
        end_stream: bool,
    },
    /// HEADERS frame (type 0x1): HPACK-encoded header block fragment.
    Headers {
        stream_id: u32,
        fragment: Vec<u8>,
        end_stream: bool,
        end_headers: bool,
        priority: Option<Priority>,
    },
    /// PRIORITY frame (type 0x2): stream dependency and weight. Parsed and
    /// surfaced; scheduling ignores it (deprecated by RFC 9113).
    Priority { stream_id: u32, priority: Priority },
    /// RST_STREAM frame (type 0x3): abnormal stream termination.
    RstStream {
        stream_id: u32,
        error_code: ErrorCode,
    },
    /// SETTINGS frame (type 0x4): configuration delta, or a bare ACK.
    Settings {
        ack: bool,
        update: SettingsUpdate,
    },
    /// PUSH_PROMISE frame (type 0x5): server reserves a stream.
    PushPromise {
        stream_id: u32,
        promised_stream_id: u32,
        fragment: Vec<u8>,
        end_headers: bool,
    },
    /// PING frame (type 0x6): connection liveness probe.
    Ping { ack: bool, opaque_data: [u8; 8] },
    /// GOAWAY frame (type 0x7): session shutdown announcement.
    GoAway {
        last_stream_id: u32,
        error_code: ErrorCode,
        debug_data: Vec<u8>,
    },
    /// WINDOW_UPDATE frame (type 0x8): flow control credit.
    WindowUpdate { stream_id: u32, increment: u32 },
    /// CONTINUATION frame (type 0x9): remainder of a header block.
    Continuation {
        stream_id: u32,
        fragment: Vec<u8>,
        end_headers: bool,
    },
    /// Unknown frame type — ignored on receipt per RFC 7540 Section 4.1.
    Unknown {
        frame_type: u8,
        flags: u8,
        stream_id: u32,
        payload: Vec<u8>,
    },
}

/// Stream priority information (exclusive bit, dependency, weight).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Priority {
    pub exclusive: bool,
    pub dependency: u32,
    pub weight: u8,
}

// -- Frame header encoding/decoding --

/// Encode a 9-byte frame header.
pub fn encode_frame_header(
    buf: &mut Vec<u8>,
    payload_len: u32,
    frame_type: u8,
    flags: u8,
    stream_id: u32,
) {
    buf.push((payload_len >> 16) as u8);
    buf.push((payload_len >> 8) as u8);
    buf.push(payload_len as u8);
    buf.push(frame_type);
    buf.push(flags);
    let sid = stream_id & 0x7fff_ffff; // clear reserved bit
    buf.push((sid >> 24) as u8);
    buf.push((sid >> 16) as u8);
    buf.push((sid >> 8) as u8);
    buf.push(sid as u8);
}

/// Decoded frame header.
pub struct FrameHeader {
    pub length: u32,
    pub frame_type: u8,
    pub flags: u8,
    pub stream_id: u32,
}

/// Decode a 9-byte frame header from the start of `buf`.
/// Returns `None` if the buffer is too short.
pub fn decode_frame_header(buf: &[u8]) -> Option<FrameHeader> {
    if buf.len() < FRAME_HEADER_LEN {
        return None;
    }
    let length = (u32::from(buf[0]) << 16) | (u32::from(buf[1]) << 8) | u32::from(buf[2]);
    let frame_type = buf[3];
    let flags = buf[4];
    let stream_id = (u32::from(buf[5]) << 24)
        | (u32::from(buf[6]) << 16)
        | (u32::from(buf[7]) << 8)
        | u32::from(buf[8]);
    let stream_id = stream_id & 0x7fff_ffff; // clear reserved bit
    Some(FrameHeader {
        length,
        frame_type,
        flags,
        stream_id,
    })
}

fn put_u32(buf: &mut Vec<u8>, v: u32) {
    buf.push((v >> 24) as u8);
    buf.push((v >> 16) as u8);
    buf.push((v >> 8) as u8);
    buf.push(v as u8);
}

fn read_u32(buf: &[u8]) -> u32 {
    (u32::from(buf[0]) << 24)
        | (u32::from(buf[1]) << 16)
        | (u32::from(buf[2]) << 8)
        | u32::from(buf[3])
}

// -- Frame encoding --

impl Frame {
    /// Encode this frame into `buf` (header + payload).
    pub fn encode(&self, buf: &mut Vec<u8>) {
        match self {
            Frame::Data {
                stream_id,
                payload,
                end_stream,
            } => {
                let flags = if *end_stream { FLAG_END_STREAM } else { 0 };
                encode_frame_header(buf, payload.len() as u32, FRAME_DATA, flags, *stream_id);
                buf.extend_from_slice(payload);
            }
            Frame::Headers {
                stream_id,
                fragment,
                end_stream,
                end_headers,
                priority,
            } => {
                let mut flags = 0u8;
                if *end_stream {
                    flags |= FLAG_END_STREAM;
                }
                if *end_headers {
                    flags |= FLAG_END_HEADERS;
                }
                let mut payload_len = fragment.len() as u32;
                if let Some(pri) = priority {
                    flags |= FLAG_PRIORITY;
                    payload_len += 5; // 4 bytes dependency + 1 byte weight
                    encode_frame_header(buf, payload_len, FRAME_HEADERS, flags, *stream_id);
                    let dep = if pri.exclusive {
                        pri.dependency | 0x8000_0000
                    } else {
                        pri.dependency
                    };
                    put_u32(buf, dep);
                    buf.push(pri.weight);
                } else {
                    encode_frame_header(buf, payload_len, FRAME_HEADERS, flags, *stream_id);
                }
                buf.extend_from_slice(fragment);
            }
            Frame::Priority {
                stream_id,
                priority,
            } => {
                encode_frame_header(buf, 5, FRAME_PRIORITY, 0, *stream_id);
                let dep = if priority.exclusive {
                    priority.dependency | 0x8000_0000
                } else {
                    priority.dependency
                };
                put_u32(buf, dep);
                buf.push(priority.weight);
            }
            Frame::RstStream {
                stream_id,
                error_code,
            } => {
                encode_frame_header(buf, 4, FRAME_RST_STREAM, 0, *stream_id);
                put_u32(buf, *error_code as u32);
            }
            Frame::Settings { ack, update } => {
                let flags = if *ack { FLAG_ACK } else { 0 };
                if *ack {
                    encode_frame_header(buf, 0, FRAME_SETTINGS, flags, 0);
                } else {
                    let payload = update.encode_to_vec();
                    encode_frame_header(buf, payload.len() as u32, FRAME_SETTINGS, flags, 0);
                    buf.extend_from_slice(&payload);
                }
            }
            Frame::PushPromise {
                stream_id,
                promised_stream_id,
                fragment,
                end_headers,
            } => {
                let flags = if *end_headers { FLAG_END_HEADERS } else { 0 };
                let payload_len = 4 + fragment.len() as u32;
                encode_frame_header(buf, payload_len, FRAME_PUSH_PROMISE, flags, *stream_id);
                put_u32(buf, *promised_stream_id & 0x7fff_ffff);
                buf.extend_from_slice(fragment);
            }
            Frame::Ping { ack, opaque_data } => {
                let flags = if *ack { FLAG_ACK } else { 0 };
                encode_frame_header(buf, 8, FRAME_PING, flags, 0);
                buf.extend_from_slice(opaque_data);
            }
            Frame::GoAway {
                last_stream_id,
                error_code,
                debug_data,
            } => {
                let payload_len = 8 + debug_data.len() as u32;
                encode_frame_header(buf, payload_len, FRAME_GOAWAY, 0, 0);
                put_u32(buf, *last_stream_id & 0x7fff_ffff);
                put_u32(buf, *error_code as u32);
                buf.extend_from_slice(debug_data);
            }
            Frame::WindowUpdate {
                stream_id,
                increment,
            } => {
                encode_frame_header(buf, 4, FRAME_WINDOW_UPDATE, 0, *stream_id);
                put_u32(buf, *increment & 0x7fff_ffff);
            }
            Frame::Continuation {
                stream_id,
                fragment,
                end_headers,
            } => {
                let flags = if *end_headers { FLAG_END_HEADERS } else { 0 };
                encode_frame_header(
                    buf,
                    fragment.len() as u32,
                    FRAME_CONTINUATION,
                    flags,
                    *stream_id,
                );
                buf.extend_from_slice(fragment);
            }
            Frame::Unknown {
                frame_type,
                flags,
                stream_id,
                payload,
            } => {
                encode_frame_header(buf, payload.len() as u32, *frame_type, *flags, *stream_id);
                buf.extend_from_slice(payload);
            }
        }
    }
}

/// Emit a complete header block as HEADERS + CONTINUATION frames, none of
/// whose payloads exceed `max_frame_size`. The frames land in `buf`
/// back-to-back; callers must not interleave other frames until the final
/// END_HEADERS frame (RFC 7540 Section 4.3).
pub fn encode_headers_frames(
    buf: &mut Vec<u8>,
    stream_id: u32,
    block: &[u8],
    end_stream: bool,
    max_frame_size: u32,
) {
    let max = max_frame_size as usize;
    let first_len = block.len().min(max);
    let (first, mut rest) = block.split_at(first_len);

    Frame::Headers {
        stream_id,
        fragment: first.to_vec(),
        end_stream,
        end_headers: rest.is_empty(),
        priority: None,
    }
    .encode(buf);

    while !rest.is_empty() {
        let take = rest.len().min(max);
        let (chunk, tail) = rest.split_at(take);
        Frame::Continuation {
            stream_id,
            fragment: chunk.to_vec(),
            end_headers: tail.is_empty(),
        }
        .encode(buf);
        rest = tail;
    }
}

/// PUSH_PROMISE counterpart of `encode_headers_frames`. Clients never send
/// promises; this exists so serialization round-trips cover every frame the
/// engine can parse.
pub fn encode_push_promise_frames(
    buf: &mut Vec<u8>,
    stream_id: u32,
    promised_stream_id: u32,
    block: &[u8],
    max_frame_size: u32,
) {
    // The promised-stream-id field occupies 4 bytes of the first payload.
    let max = max_frame_size as usize;
    let first_len = block.len().min(max.saturating_sub(4));
    let (first, mut rest) = block.split_at(first_len);

    Frame::PushPromise {
        stream_id,
        promised_stream_id,
        fragment: first.to_vec(),
        end_headers: rest.is_empty(),
    }
    .encode(buf);

    while !rest.is_empty() {
        let take = rest.len().min(max);
        let (chunk, tail) = rest.split_at(take);
        Frame::Continuation {
            stream_id,
            fragment: chunk.to_vec(),
            end_headers: tail.is_empty(),
        }
        .encode(buf);
        rest = tail;
    }
}

// -- Frame decoding --

/// Decode one frame from the start of `buf`.
///
/// Returns `Ok(Some((frame, bytes_consumed)))` on success,
/// `Ok(None)` if the buffer holds a partial frame (need more data),
/// or `Err` on protocol error.
pub fn decode_frame(buf: &[u8], max_frame_size: u32) -> Result<Option<(Frame, usize)>, H2Error> {
    let header = match decode_frame_header(buf) {
        Some(h) => h,
        None => return Ok(None),
    };

    // The declared length is checked before waiting for the payload, so an
    // oversized frame fails fast instead of stalling the connection.
    if header.length > max_frame_size {
        return Err(H2Error::FrameSize);
    }

    let total_len = FRAME_HEADER_LEN + header.length as usize;
    if buf.len() < total_len {
        return Ok(None);
    }

    let payload = &buf[FRAME_HEADER_LEN..total_len];
    let flags = header.flags;
    let stream_id = header.stream_id;

    let frame = match header.frame_type {
        FRAME_DATA => {
            if stream_id == 0 {
                return Err(H2Error::Protocol("DATA on stream 0".into()));
            }
            let (payload_data, _pad) = strip_padding(payload, flags)?;
            Frame::Data {
                stream_id,
                payload: payload_data.to_vec(),
                end_stream: flags & FLAG_END_STREAM != 0,
            }
        }
        FRAME_HEADERS => {
            if stream_id == 0 {
                return Err(H2Error::Protocol("HEADERS on stream 0".into()));
            }
            let (data, _pad) = strip_padding(payload, flags)?;
            let (priority, fragment) = if flags & FLAG_PRIORITY != 0 {
                if data.len() < 5 {
                    return Err(H2Error::FrameSize);
                }
                let dep_raw = read_u32(data);
                (
                    Some(Priority {
                        exclusive: dep_raw & 0x8000_0000 != 0,
                        dependency: dep_raw & 0x7fff_ffff,
                        weight: data[4],
                    }),
                    &data[5..],
                )
            } else {
                (None, data)
            };
            Frame::Headers {
                stream_id,
                fragment: fragment.to_vec(),
                end_stream: flags & FLAG_END_STREAM != 0,
                end_headers: flags & FLAG_END_HEADERS != 0,
                priority,
            }
        }
        FRAME_PRIORITY => {
            if stream_id == 0 {
                return Err(H2Error::Protocol("PRIORITY on stream 0".into()));
            }
            if payload.len() != 5 {
                return Err(H2Error::FrameSize);
            }
            let dep_raw = read_u32(payload);
            Frame::Priority {
                stream_id,
                priority: Priority {
                    exclusive: dep_raw & 0x8000_0000 != 0,
                    dependency: dep_raw & 0x7fff_ffff,
                    weight: payload[4],
                },
            }
        }
        FRAME_RST_STREAM => {
            if stream_id == 0 {
                return Err(H2Error::Protocol("RST_STREAM on stream 0".into()));
            }
            if payload.len() != 4 {
                return Err(H2Error::FrameSize);
            }
            Frame::RstStream {
                stream_id,
                error_code: ErrorCode::from_u32(read_u32(payload)),
            }
        }
        FRAME_SETTINGS => {
            if stream_id != 0 {
                return Err(H2Error::Protocol("SETTINGS on non-zero stream".into()));
            }
            let ack = flags & FLAG_ACK != 0;
            if ack {
                if !payload.is_empty() {
                    return Err(H2Error::FrameSize);
                }
                Frame::Settings {
                    ack: true,
                    update: SettingsUpdate::default(),
                }
            } else {
                Frame::Settings {
                    ack: false,
                    update: SettingsUpdate::decode(payload)?,
                }
            }
        }
        FRAME_PUSH_PROMISE => {
            if stream_id == 0 {
                return Err(H2Error::Protocol("PUSH_PROMISE on stream 0".into()));
            }
            let (data, _pad) = strip_padding(payload, flags)?;
            if data.len() < 4 {
                return Err(H2Error::FrameSize);
            }
            Frame::PushPromise {
                stream_id,
                promised_stream_id: read_u32(data) & 0x7fff_ffff,
                fragment: data[4..].to_vec(),
                end_headers: flags & FLAG_END_HEADERS != 0,
            }
        }
        FRAME_PING => {
            if stream_id != 0 {
                return Err(H2Error::Protocol("PING on non-zero stream".into()));
            }
            if payload.len() != 8 {
                return Err(H2Error::FrameSize);
            }
            let mut data = [0u8; 8];
            data.copy_from_slice(payload);
            Frame::Ping {
                ack: flags & FLAG_ACK != 0,
                opaque_data: data,
            }
        }
        FRAME_GOAWAY => {
            if stream_id != 0 {
                return Err(H2Error::Protocol("GOAWAY on non-zero stream".into()));
            }
            if payload.len() < 8 {
                return Err(H2Error::FrameSize);
            }
            Frame::GoAway {
                last_stream_id: read_u32(payload) & 0x7fff_ffff,
                error_code: ErrorCode::from_u32(read_u32(&payload[4..])),
                debug_data: payload[8..].to_vec(),
            }
        }
        FRAME_WINDOW_UPDATE => {
            if payload.len() != 4 {
                return Err(H2Error::FrameSize);
            }
            // Zero increments are left for the session: the error is
            // stream- or connection-scoped depending on the stream id
            // (RFC 7540 Section 6.9).
            Frame::WindowUpdate {
                stream_id,
                increment: read_u32(payload) & 0x7fff_ffff,
            }
        }
        FRAME_CONTINUATION => {
            if stream_id == 0 {
                return Err(H2Error::Protocol("CONTINUATION on stream 0".into()));
            }
            Frame::Continuation {
                stream_id,
                fragment: payload.to_vec(),
                end_headers: flags & FLAG_END_HEADERS != 0,
            }
        }
        _ => Frame::Unknown {
            frame_type: header.frame_type,
            flags,
            stream_id,
            payload: payload.to_vec(),
        },
    };

    Ok(Some((frame, total_len)))
}

/// Strip padding from a frame payload if the PADDED flag is set.
/// Padding that swallows the whole payload is a protocol error.
fn strip_padding(payload: &[u8], flags: u8) -> Result<(&[u8], usize), H2Error> {
    if flags & FLAG_PADDED != 0 {
        if payload.is_empty() {
            return Err(H2Error::FrameSize);
        }
        let pad_len = payload[0] as usize;
        if pad_len >= payload.len() {
            return Err(H2Error::Protocol("padding exceeds payload".into()));
        }
        Ok((&payload[1..payload.len() - pad_len], pad_len))
    } else {
        Ok((payload, 0))
    }
}

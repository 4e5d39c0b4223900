//! Minimal HTTP/1.1 plumbing for the upgrade handshake and for connections
//! that stay HTTP/1.1 after a declined offer.
//!
//! Request serialization plus an incremental response parser: feed bytes as
//! they arrive, get a complete response back once the head and body (by
//! content-length or chunked coding) are in. Bytes past the end of the
//! response — HTTP/2 frames following a 101 — stay buffered for handoff.

use bytes::BytesMut;

use crate::error::HttpError;
use crate::request::Request;

/// Serialize an HTTP/1.1 request.
pub(crate) fn serialize_request(request: &Request) -> Vec<u8> {
    let mut out = Vec::with_capacity(256);
    out.extend_from_slice(request.method.as_bytes());
    out.push(b' ');
    out.extend_from_slice(request.path.as_bytes());
    out.extend_from_slice(b" HTTP/1.1\r\n");
    out.extend_from_slice(b"host: ");
    out.extend_from_slice(request.authority.as_bytes());
    out.extend_from_slice(b"\r\n");

    for (name, value) in &request.headers {
        out.extend_from_slice(name.as_bytes());
        out.extend_from_slice(b": ");
        out.extend_from_slice(value.as_bytes());
        out.extend_from_slice(b"\r\n");
    }

    if let Some(body) = &request.body
        && !body.is_empty()
    {
        out.extend_from_slice(b"content-length: ");
        out.extend_from_slice(body.len().to_string().as_bytes());
        out.extend_from_slice(b"\r\n");
    }

    out.extend_from_slice(b"\r\n");

    if let Some(body) = &request.body {
        out.extend_from_slice(body);
    }

    out
}

/// A parsed HTTP/1.1 response.
#[derive(Debug)]
pub(crate) struct H1Response {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: BytesMut,
}

enum ParsePhase {
    Head,
    FixedBody { remaining: usize },
    ChunkedBody,
    Done,
}

/// Incremental response parser. One response per parser.
pub(crate) struct ResponseParser {
    buf: Vec<u8>,
    phase: ParsePhase,
    status: u16,
    headers: Vec<(String, String)>,
    body: BytesMut,
}

impl ResponseParser {
    pub fn new() -> Self {
        Self {
            buf: Vec::new(),
            phase: ParsePhase::Head,
            status: 0,
            headers: Vec::new(),
            body: BytesMut::new(),
        }
    }

    /// Feed received bytes. Returns the complete response once the body
    /// is in; until then `Ok(None)`.
    pub fn feed(&mut self, data: &[u8]) -> Result<Option<H1Response>, HttpError> {
        self.buf.extend_from_slice(data);
        self.advance()?;
        if matches!(self.phase, ParsePhase::Done) {
            let response = H1Response {
                status: self.status,
                headers: std::mem::take(&mut self.headers),
                body: std::mem::take(&mut self.body),
            };
            return Ok(Some(response));
        }
        Ok(None)
    }

    /// Bytes past the end of the response (e.g. HTTP/2 frames after a
    /// 101). Only meaningful once `feed` returned a response.
    pub fn take_leftover(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buf)
    }

    fn advance(&mut self) -> Result<(), HttpError> {
        if matches!(self.phase, ParsePhase::Head) {
            let Some(head_end) = find_header_end(&self.buf) else {
                return Ok(());
            };
            let head = parse_response_head(&self.buf[..head_end]).ok_or(HttpError::Parse)?;
            self.buf.drain(..head_end + 4); // head + \r\n\r\n

            self.status = head.status;
            self.headers = head.headers;
            // 1xx, 204 and 304 responses carry no body; absent framing
            // headers also mean no body here (the upgrade-phase exchanges
            // this parser serves never use read-until-close).
            self.phase = if self.status < 200 || self.status == 204 || self.status == 304 {
                ParsePhase::Done
            } else if head.chunked {
                ParsePhase::ChunkedBody
            } else if let Some(len) = head.content_length {
                if len == 0 {
                    ParsePhase::Done
                } else {
                    ParsePhase::FixedBody { remaining: len }
                }
            } else {
                ParsePhase::Done
            };
        }

        loop {
            match &mut self.phase {
                ParsePhase::FixedBody { remaining } => {
                    let take = (*remaining).min(self.buf.len());
                    self.body.extend_from_slice(&self.buf[..take]);
                    self.buf.drain(..take);
                    *remaining -= take;
                    if *remaining == 0 {
                        self.phase = ParsePhase::Done;
                    }
                    return Ok(());
                }
                ParsePhase::ChunkedBody => match decode_chunk(&self.buf) {
                    ChunkResult::Complete {
                        data,
                        consumed,
                        is_last,
                    } => {
                        self.body.extend_from_slice(data);
                        self.buf.drain(..consumed);
                        if is_last {
                            self.phase = ParsePhase::Done;
                            return Ok(());
                        }
                    }
                    ChunkResult::NeedMore => return Ok(()),
                },
                ParsePhase::Head | ParsePhase::Done => return Ok(()),
            }
        }
    }
}

/// Find the position of `\r\n\r\n`, returning the index of the first `\r`.
fn find_header_end(data: &[u8]) -> Option<usize> {
    (0..data.len().saturating_sub(3)).find(|&i| {
        data[i] == b'\r' && data[i + 1] == b'\n' && data[i + 2] == b'\r' && data[i + 3] == b'\n'
    })
}

struct ResponseHead {
    status: u16,
    headers: Vec<(String, String)>,
    content_length: Option<usize>,
    chunked: bool,
}

/// Parse the response head (everything before `\r\n\r\n`).
fn parse_response_head(data: &[u8]) -> Option<ResponseHead> {
    let text = std::str::from_utf8(data).ok()?;
    let mut lines = text.split("\r\n");

    // Status line: HTTP/1.1 200 OK
    let status_line = lines.next()?;
    let mut parts = status_line.splitn(3, ' ');
    let version = parts.next()?;
    if !version.starts_with("HTTP/1.") {
        return None;
    }
    let status: u16 = parts.next()?.parse().ok()?;

    let mut headers = Vec::new();
    let mut content_length = None;
    let mut chunked = false;

    for line in lines {
        if line.is_empty() {
            break;
        }
        let (name, value) = line.split_once(':')?;
        let name = name.trim().to_string();
        let value = value.trim().to_string();

        if name.eq_ignore_ascii_case("content-length") {
            content_length = value.parse().ok();
        }
        if name.eq_ignore_ascii_case("transfer-encoding") && value.eq_ignore_ascii_case("chunked")
        {
            chunked = true;
        }

        headers.push((name, value));
    }

    Some(ResponseHead {
        status,
        headers,
        content_length,
        chunked,
    })
}

enum ChunkResult<'a> {
    Complete {
        data: &'a [u8],
        consumed: usize,
        is_last: bool,
    },
    NeedMore,
}

/// Decode one chunk of a chunked transfer coding.
fn decode_chunk(data: &[u8]) -> ChunkResult<'_> {
    let crlf = match find_crlf(data) {
        Some(pos) => pos,
        None => return ChunkResult::NeedMore,
    };

    let size_str = match std::str::from_utf8(&data[..crlf]) {
        Ok(s) => s.trim(),
        Err(_) => return ChunkResult::NeedMore,
    };

    // Strip chunk extensions (;key=value).
    let size_hex = size_str.split(';').next().unwrap_or("").trim();

    let size = match usize::from_str_radix(size_hex, 16) {
        Ok(s) => s,
        Err(_) => return ChunkResult::NeedMore,
    };

    if size == 0 {
        // Last chunk. Swallow the terminating \r\n too when it has
        // already arrived (no trailer support; the upgrade-phase flows
        // never send any).
        let consumed = if data.len() >= crlf + 4 && &data[crlf + 2..crlf + 4] == b"\r\n" {
            crlf + 4
        } else {
            crlf + 2
        };
        return ChunkResult::Complete {
            data: &[],
            consumed,
            is_last: true,
        };
    }

    let chunk_start = crlf + 2;
    let chunk_end = chunk_start + size;
    let total = chunk_end + 2; // trailing \r\n

    if data.len() < total {
        return ChunkResult::NeedMore;
    }

    ChunkResult::Complete {
        data: &data[chunk_start..chunk_end],
        consumed: total,
        is_last: false,
    }
}

fn find_crlf(data: &[u8]) -> Option<usize> {
    (0..data.len().saturating_sub(1)).find(|&i| data[i] == b'\r' && data[i + 1] == b'\n')
}

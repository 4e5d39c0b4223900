//! HTTP/2 connection establishment: ALPN, HTTP/1.1 Upgrade, and prior
//! knowledge.
//!
//! Three mutually-exclusive paths, chosen before any HTTP/2 byte flows:
//!
//! - **ALPN over TLS.** `configure_alpn` installs `h2` (with `http/1.1`
//!   fallback) on a rustls client config; after the caller drives the TLS
//!   handshake, `Negotiated::from_alpn` maps the selected protocol and
//!   `ClientConn::from_alpn` installs either the session or HTTP/1.1-only
//!   mode. The handshake itself is the caller's suspension point.
//! - **HTTP/1.1 Upgrade.** `insert_upgrade_headers` adds the `Upgrade:
//!   h2c` offer to a request that does not already steer `Connection`;
//!   `upgrade_accepted` validates the server's 101. The preface is emitted
//!   at adoption time — only once the server has committed to HTTP/2 — so a
//!   declined offer leaves a clean HTTP/1.1 byte stream. (The lineage
//!   implementation raced the preface against the 101; adopting on the 101
//!   is the conservative reading and is what the declined path requires.)
//! - **Prior knowledge.** No driver work at all: `Session::client` already
//!   queues the preface for the first flush after connect.

use wireline_h2::Settings;

/// ALPN protocol id for HTTP/2 over TLS (RFC 7540 Section 3.3).
pub const ALPN_H2: &[u8] = b"h2";
/// ALPN fallback protocol id.
pub const ALPN_HTTP1: &[u8] = b"http/1.1";

/// Upgrade token for cleartext HTTP/2 (RFC 7540 Section 3.2).
pub const HTTP2_CLEAR: &str = "h2c";

/// The protocols we offer, most-preferred first.
pub fn alpn_protocols() -> Vec<Vec<u8>> {
    vec![ALPN_H2.to_vec(), ALPN_HTTP1.to_vec()]
}

/// Install our ALPN offer on a rustls client config.
pub fn configure_alpn(config: &mut rustls::ClientConfig) {
    config.alpn_protocols = alpn_protocols();
}

/// Outcome of protocol negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Negotiated {
    H2,
    Http1,
}

impl Negotiated {
    /// Map the TLS engine's negotiated ALPN protocol. No protocol (or an
    /// unknown one) falls back to HTTP/1.1.
    pub fn from_alpn(alpn: Option<&[u8]>) -> Self {
        match alpn {
            Some(proto) if proto == ALPN_H2 => Self::H2,
            _ => Self::Http1,
        }
    }
}

/// Add the cleartext upgrade offer to an HTTP/1.1 request's headers:
/// `Upgrade: h2c`, `Connection: Upgrade, HTTP2-Settings`, and the
/// base64url-encoded SETTINGS payload. Returns `false` — leaving the
/// headers untouched — when the request already carries a `Connection` or
/// `Upgrade` header the offer would conflict with.
pub fn insert_upgrade_headers(
    headers: &mut Vec<(String, String)>,
    settings: &Settings,
) -> bool {
    let conflicted = headers
        .iter()
        .any(|(n, _)| n.eq_ignore_ascii_case("connection") || n.eq_ignore_ascii_case("upgrade"));
    if conflicted {
        return false;
    }
    headers.push(("Upgrade".to_string(), HTTP2_CLEAR.to_string()));
    headers.push((
        "Connection".to_string(),
        "Upgrade, HTTP2-Settings".to_string(),
    ));
    headers.push((
        "HTTP2-Settings".to_string(),
        base64url_encode(&settings.encode_payload()),
    ));
    true
}

/// Whether an HTTP/1.1 response accepts our upgrade offer:
/// `101 Switching Protocols` with `Connection: Upgrade` and `Upgrade: h2c`.
pub fn upgrade_accepted(status: u16, headers: &[(String, String)]) -> bool {
    if status != 101 {
        return false;
    }
    let connection_upgrade = headers.iter().any(|(n, v)| {
        n.eq_ignore_ascii_case("connection")
            && v.split(',').any(|t| t.trim().eq_ignore_ascii_case("upgrade"))
    });
    let upgrade_h2c = headers
        .iter()
        .any(|(n, v)| n.eq_ignore_ascii_case("upgrade") && v.trim().eq_ignore_ascii_case(HTTP2_CLEAR));
    connection_upgrade && upgrade_h2c
}

const BASE64_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

/// Encode base64url without padding (RFC 4648 Section 5), the form the
/// HTTP2-Settings header requires.
pub fn base64url_encode(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len().div_ceil(3) * 4);
    let mut chunks = data.chunks_exact(3);
    for chunk in &mut chunks {
        let n = (u32::from(chunk[0]) << 16) | (u32::from(chunk[1]) << 8) | u32::from(chunk[2]);
        for shift in [18, 12, 6, 0] {
            out.push(url_safe(BASE64_ALPHABET[(n >> shift & 0x3f) as usize]));
        }
    }
    match chunks.remainder() {
        [a] => {
            let n = u32::from(*a) << 16;
            out.push(url_safe(BASE64_ALPHABET[(n >> 18 & 0x3f) as usize]));
            out.push(url_safe(BASE64_ALPHABET[(n >> 12 & 0x3f) as usize]));
        }
        [a, b] => {
            let n = (u32::from(*a) << 16) | (u32::from(*b) << 8);
            out.push(url_safe(BASE64_ALPHABET[(n >> 18 & 0x3f) as usize]));
            out.push(url_safe(BASE64_ALPHABET[(n >> 12 & 0x3f) as usize]));
            out.push(url_safe(BASE64_ALPHABET[(n >> 6 & 0x3f) as usize]));
        }
        _ => {}
    }
    out
}

fn url_safe(b: u8) -> char {
    match b {
        b'+' => '-',
        b'/' => '_',
        other => other as char,
    }
}

/// Decode base64url (URL-safe base64, padding optional).
pub fn base64url_decode(input: &str) -> Option<Vec<u8>> {
    let mut output = Vec::with_capacity(input.len() * 3 / 4);
    let mut buffer = 0u32;
    let mut bits = 0;

    for c in input.bytes() {
        if c == b'=' {
            break;
        }
        let c = match c {
            b'-' => b'+',
            b'_' => b'/',
            other => other,
        };
        let value = BASE64_ALPHABET.iter().position(|&x| x == c)? as u32;
        buffer = (buffer << 6) | value;
        bits += 6;

        if bits >= 8 {
            bits -= 8;
            output.push((buffer >> bits) as u8);
            buffer &= (1 << bits) - 1;
        }
    }

    Some(output)
}

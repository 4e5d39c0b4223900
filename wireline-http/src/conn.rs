//! Sans-IO client connection with protocol dispatch.
//!
//! `ClientConn` owns the handshake outcome and one protocol engine. The
//! pump contract matches the engine crate: `recv()` bytes from the
//! transport, `take_pending_send()` bytes for it, `poll_response()` /
//! `poll_push()` for completed work. Exchanges are identified by the id
//! `send_request` returns, which stays stable across the upgrade handoff
//! (the upgraded request becomes HTTP/2 stream 1 under its original id).

use std::collections::HashMap;
use std::collections::VecDeque;

use bytes::BytesMut;
use wireline_h2::{H2Error, H2Event, HeaderField, Session, StreamState};

use crate::config::ClientConfig;
use crate::error::HttpError;
use crate::h1;
use crate::handshake::{self, Negotiated};
use crate::request::Request;
use crate::response::Response;

/// Identifier for one request/response exchange on a connection.
pub type ExchangeId = u64;

/// A server push surfaced to the application
/// (`send_push_request_upstream`). The response arrives under `exchange`.
#[derive(Debug)]
pub struct PushedRequest {
    pub exchange: ExchangeId,
    pub headers: Vec<(String, String)>,
}

/// One in-flight HTTP/2 exchange being assembled from session events.
struct PendingExchange {
    exchange: ExchangeId,
    status: Option<u16>,
    headers: Vec<(String, String)>,
    trailers: Vec<(String, String)>,
    body: BytesMut,
}

impl PendingExchange {
    fn new(exchange: ExchangeId) -> Self {
        Self {
            exchange,
            status: None,
            headers: Vec::new(),
            trailers: Vec::new(),
            body: BytesMut::new(),
        }
    }

    fn into_result(self) -> (ExchangeId, Result<Response, HttpError>) {
        (
            self.exchange,
            Ok(Response::new(
                self.status.unwrap_or(0),
                self.headers,
                self.body.freeze(),
                self.trailers,
            )),
        )
    }
}

struct Http2State {
    session: Session,
    exchanges: HashMap<u32, PendingExchange>,
    fatal: Option<H2Error>,
}

struct UpgradingState {
    parser: h1::ResponseParser,
    exchange: ExchangeId,
}

struct Http1State {
    inflight: Option<(ExchangeId, h1::ResponseParser)>,
}

enum Mode {
    /// Cleartext connection, nothing sent yet; the first request carries
    /// the upgrade offer.
    AwaitingFirstRequest,
    /// Upgrade offer on the wire; the protocol is ambiguous until the
    /// server answers.
    Upgrading(UpgradingState),
    /// HTTP/1.1 for the life of the connection.
    Http1(Http1State),
    /// HTTP/2 session active.
    Http2(Http2State),
}

/// A client connection over one transport.
pub struct ClientConn {
    config: ClientConfig,
    mode: Mode,
    scheme: &'static str,
    never_http2: bool,
    next_exchange: ExchangeId,
    out_buf: Vec<u8>,
    completed: VecDeque<(ExchangeId, Result<Response, HttpError>)>,
    pushes: VecDeque<PushedRequest>,
}

impl ClientConn {
    /// Cleartext connection. With `prior_knowledge` the session speaks
    /// HTTP/2 from the first byte; otherwise the first request offers the
    /// HTTP/1.1 upgrade (unless `never_force_upgrade`).
    pub fn new(config: ClientConfig) -> Result<Self, HttpError> {
        config.validate()?;
        let mode = if config.prior_knowledge {
            Mode::Http2(Http2State {
                session: new_session(&config, false),
                exchanges: HashMap::new(),
                fatal: None,
            })
        } else if config.never_force_upgrade {
            Mode::Http1(Http1State { inflight: None })
        } else {
            Mode::AwaitingFirstRequest
        };
        let never_http2 = matches!(mode, Mode::Http1(_));
        Ok(Self {
            config,
            mode,
            scheme: "http",
            never_http2,
            next_exchange: 0,
            out_buf: Vec::new(),
            completed: VecDeque::new(),
            pushes: VecDeque::new(),
        })
    }

    /// TLS connection whose ALPN negotiation has completed; `alpn` is the
    /// protocol the TLS engine reports (`rustls` `alpn_protocol()`).
    pub fn from_alpn(config: ClientConfig, alpn: Option<&[u8]>) -> Result<Self, HttpError> {
        config.validate()?;
        let mode = match Negotiated::from_alpn(alpn) {
            Negotiated::H2 => Mode::Http2(Http2State {
                session: new_session(&config, false),
                exchanges: HashMap::new(),
                fatal: None,
            }),
            Negotiated::Http1 => Mode::Http1(Http1State { inflight: None }),
        };
        let never_http2 = matches!(mode, Mode::Http1(_));
        Ok(Self {
            config,
            mode,
            scheme: "https",
            never_http2,
            next_exchange: 0,
            out_buf: Vec::new(),
            completed: VecDeque::new(),
            pushes: VecDeque::new(),
        })
    }

    /// Whether the connection is (or became) HTTP/2.
    pub fn is_http2(&self) -> bool {
        matches!(self.mode, Mode::Http2(_))
    }

    /// The connection answered the upgrade question negatively and will
    /// never speak HTTP/2.
    pub fn never_http2(&self) -> bool {
        self.never_http2
    }

    // ── Requests ───────────────────────────────────────────────────────

    /// Send (or queue) a request. Returns the exchange id its response
    /// will carry.
    pub fn send_request(&mut self, request: Request) -> Result<ExchangeId, HttpError> {
        match &mut self.mode {
            Mode::AwaitingFirstRequest => self.send_upgrade_request(request),
            Mode::Upgrading(_) => Err(HttpError::UpgradeInProgress),
            Mode::Http1(state) => {
                if state.inflight.is_some() {
                    return Err(HttpError::RequestInFlight);
                }
                let exchange = self.next_exchange;
                self.next_exchange += 1;
                self.out_buf.extend_from_slice(&h1::serialize_request(&request));
                state.inflight = Some((exchange, h1::ResponseParser::new()));
                Ok(exchange)
            }
            Mode::Http2(state) => {
                if state.fatal.is_some() {
                    return Err(HttpError::ConnectionClosed);
                }
                let exchange = self.next_exchange;
                self.next_exchange += 1;
                let fields = h2_request_fields(&request, self.scheme);
                let stream_id = state.session.send_request(&fields, !request.has_body())?;
                if let Some(body) = &request.body
                    && !body.is_empty()
                {
                    state.session.send_data(stream_id, body, true)?;
                }
                state
                    .exchanges
                    .insert(stream_id, PendingExchange::new(exchange));
                Ok(exchange)
            }
        }
    }

    fn send_upgrade_request(&mut self, mut request: Request) -> Result<ExchangeId, HttpError> {
        let exchange = self.next_exchange;
        self.next_exchange += 1;

        let offered =
            handshake::insert_upgrade_headers(&mut request.headers, &self.config.to_settings());
        self.out_buf.extend_from_slice(&h1::serialize_request(&request));

        if offered {
            self.mode = Mode::Upgrading(UpgradingState {
                parser: h1::ResponseParser::new(),
                exchange,
            });
        } else {
            // The caller steers Connection/Upgrade itself; stay HTTP/1.1.
            self.never_http2 = true;
            self.mode = Mode::Http1(Http1State {
                inflight: Some((exchange, h1::ResponseParser::new())),
            });
        }
        Ok(exchange)
    }

    /// Cancel an in-flight HTTP/2 exchange (RST_STREAM CANCEL). Buffered
    /// response data is dropped.
    pub fn cancel(&mut self, exchange: ExchangeId) {
        if let Mode::Http2(state) = &mut self.mode
            && let Some(stream_id) = state
                .exchanges
                .iter()
                .find(|(_, pending)| pending.exchange == exchange)
                .map(|(id, _)| *id)
        {
            state.exchanges.remove(&stream_id);
            state.session.cancel(stream_id);
        }
    }

    // ── Pump ───────────────────────────────────────────────────────────

    /// Feed bytes received from the transport.
    pub fn recv(&mut self, data: &[u8]) -> Result<(), HttpError> {
        match &mut self.mode {
            Mode::AwaitingFirstRequest => Err(HttpError::Protocol(
                "server bytes before any request".into(),
            )),
            Mode::Upgrading(state) => {
                let Some(response) = state.parser.feed(data)? else {
                    return Ok(());
                };
                let exchange = state.exchange;
                let leftover = state.parser.take_leftover();

                if handshake::upgrade_accepted(response.status, &response.headers) {
                    // Adoption: the upgraded request is implicit stream 1,
                    // already half-closed on our side; the preface goes out
                    // with the next flush.
                    let mut session = new_session(&self.config, true);
                    debug_assert_eq!(
                        session.stream_state(1),
                        Some(StreamState::HalfClosedLocal)
                    );
                    let mut exchanges = HashMap::new();
                    exchanges.insert(1u32, PendingExchange::new(exchange));
                    let result = if leftover.is_empty() {
                        Ok(())
                    } else {
                        session.recv(&leftover)
                    };
                    self.mode = Mode::Http2(Http2State {
                        session,
                        exchanges,
                        fatal: None,
                    });
                    self.drain_session_events();
                    result?;
                    Ok(())
                } else {
                    // Declined: the response answers the original request
                    // and the connection stays HTTP/1.1 for good.
                    self.never_http2 = true;
                    self.mode = Mode::Http1(Http1State { inflight: None });
                    self.completed.push_back((
                        exchange,
                        Ok(Response::new(
                            response.status,
                            response.headers,
                            response.body.freeze(),
                            Vec::new(),
                        )),
                    ));
                    Ok(())
                }
            }
            Mode::Http1(state) => {
                let Some((exchange, parser)) = &mut state.inflight else {
                    return Err(HttpError::Protocol("response without a request".into()));
                };
                if let Some(response) = parser.feed(data)? {
                    let exchange = *exchange;
                    state.inflight = None;
                    self.completed.push_back((
                        exchange,
                        Ok(Response::new(
                            response.status,
                            response.headers,
                            response.body.freeze(),
                            Vec::new(),
                        )),
                    ));
                }
                Ok(())
            }
            Mode::Http2(state) => {
                let result = state.session.recv(data).map_err(HttpError::from);
                self.drain_session_events();
                result
            }
        }
    }

    /// Take all bytes ready for the transport.
    pub fn take_pending_send(&mut self) -> Vec<u8> {
        let mut out = std::mem::take(&mut self.out_buf);
        if let Mode::Http2(state) = &mut self.mode {
            out.extend_from_slice(&state.session.take_pending_send());
        }
        out
    }

    pub fn has_pending_send(&self) -> bool {
        if !self.out_buf.is_empty() {
            return true;
        }
        match &self.mode {
            Mode::Http2(state) => state.session.has_pending_send(),
            _ => false,
        }
    }

    /// Pop the next finished exchange.
    pub fn poll_response(&mut self) -> Option<(ExchangeId, Result<Response, HttpError>)> {
        self.completed.pop_front()
    }

    /// Pop the next surfaced server push (only with
    /// `send_push_request_upstream`).
    pub fn poll_push(&mut self) -> Option<PushedRequest> {
        self.pushes.pop_front()
    }

    // ── HTTP/2 event assembly ──────────────────────────────────────────

    fn drain_session_events(&mut self) {
        let Mode::Http2(state) = &mut self.mode else {
            return;
        };
        while let Some(event) = state.session.poll_event() {
            match event {
                H2Event::Response {
                    stream_id,
                    headers,
                    end_stream,
                } => {
                    let Some(pending) = state.exchanges.get_mut(&stream_id) else {
                        continue;
                    };
                    let mut status = None;
                    for field in &headers {
                        if field.name == b":status" {
                            status = std::str::from_utf8(&field.value)
                                .ok()
                                .and_then(|s| s.parse().ok());
                        }
                    }
                    // Interim responses never complete the exchange and
                    // are not folded into the final header set.
                    if status.is_some_and(|s: u16| (100..200).contains(&s)) {
                        continue;
                    }
                    pending.status = status;
                    for field in &headers {
                        if !field.name.starts_with(b":") {
                            pending.headers.push(stringify(field));
                        }
                    }
                    if end_stream {
                        finish_exchange(state, stream_id, &mut self.completed);
                    }
                }
                H2Event::Data {
                    stream_id,
                    data,
                    end_stream,
                } => {
                    let Some(pending) = state.exchanges.get_mut(&stream_id) else {
                        continue;
                    };
                    pending.body.extend_from_slice(&data);
                    if end_stream {
                        finish_exchange(state, stream_id, &mut self.completed);
                    }
                }
                H2Event::Trailers { stream_id, headers } => {
                    if let Some(pending) = state.exchanges.get_mut(&stream_id) {
                        pending.trailers.extend(headers.iter().map(stringify));
                        finish_exchange(state, stream_id, &mut self.completed);
                    }
                }
                H2Event::StreamReset {
                    stream_id,
                    error_code,
                    retryable,
                } => {
                    if let Some(pending) = state.exchanges.remove(&stream_id) {
                        self.completed.push_back((
                            pending.exchange,
                            Err(HttpError::StreamReset {
                                code: error_code,
                                retryable,
                            }),
                        ));
                    }
                }
                H2Event::PushPromise {
                    promised_stream_id,
                    headers,
                    ..
                } => {
                    // The pushed response is always collected; the promise
                    // itself surfaces only on request.
                    let exchange = self.next_exchange;
                    self.next_exchange += 1;
                    state
                        .exchanges
                        .insert(promised_stream_id, PendingExchange::new(exchange));
                    if self.config.send_push_request_upstream {
                        self.pushes.push_back(PushedRequest {
                            exchange,
                            headers: headers.iter().map(stringify).collect(),
                        });
                    }
                }
                H2Event::GoAway { .. } => {
                    // Streams past the cutoff already produced retryable
                    // resets; nothing else to do here.
                }
                H2Event::SettingsAcknowledged | H2Event::Pong { .. } => {}
                H2Event::Error(error) => {
                    state.fatal = Some(error.clone());
                    for (_, pending) in state.exchanges.drain() {
                        self.completed
                            .push_back((pending.exchange, Err(HttpError::H2(error.clone()))));
                    }
                }
            }
        }
    }
}

fn new_session(config: &ClientConfig, upgraded: bool) -> Session {
    let settings = config.to_settings();
    let mut session = if upgraded {
        Session::upgraded(settings)
    } else {
        Session::client(settings)
    };
    session.set_send_queue_limit(config.send_queue_limit);
    session
}

fn finish_exchange(
    state: &mut Http2State,
    stream_id: u32,
    completed: &mut VecDeque<(ExchangeId, Result<Response, HttpError>)>,
) {
    if let Some(pending) = state.exchanges.remove(&stream_id) {
        completed.push_back(pending.into_result());
    }
}

fn stringify(field: &HeaderField) -> (String, String) {
    (
        String::from_utf8_lossy(&field.name).into_owned(),
        String::from_utf8_lossy(&field.value).into_owned(),
    )
}

/// Map a request onto HTTP/2 header fields: pseudo-headers first, then the
/// caller's headers lowercased, with connection-specific headers dropped
/// (RFC 7540 Section 8.1.2.2).
fn h2_request_fields(request: &Request, scheme: &str) -> Vec<HeaderField> {
    let mut fields = vec![
        HeaderField::new(b":method".as_slice(), request.method.as_bytes()),
        HeaderField::new(b":path".as_slice(), request.path.as_bytes()),
        HeaderField::new(b":scheme".as_slice(), scheme.as_bytes()),
        HeaderField::new(b":authority".as_slice(), request.authority.as_bytes()),
    ];
    for (name, value) in &request.headers {
        if is_connection_header(name) {
            continue;
        }
        fields.push(HeaderField::new(
            name.to_ascii_lowercase().into_bytes(),
            value.as_bytes(),
        ));
    }
    fields
}

fn is_connection_header(name: &str) -> bool {
    name.eq_ignore_ascii_case("connection")
        || name.eq_ignore_ascii_case("upgrade")
        || name.eq_ignore_ascii_case("http2-settings")
        || name.eq_ignore_ascii_case("keep-alive")
        || name.eq_ignore_ascii_case("proxy-connection")
        || name.eq_ignore_ascii_case("transfer-encoding")
        || name.eq_ignore_ascii_case("host")
}

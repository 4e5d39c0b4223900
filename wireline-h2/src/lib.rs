//! Sans-IO HTTP/2 client protocol engine.
//!
//! This crate is a pure state machine with zero runtime dependencies: the
//! caller feeds received bytes in via `recv()`, pulls outbound bytes via
//! `take_pending_send()`, and drains protocol events with `poll_event()`.
//! TLS, sockets, and event loops all live with the caller.
//!
//! # Architecture
//!
//! ```text
//!   TCP + TLS bytes
//!        |
//!   +----v-----------+
//!   | wireline-h2    |  framing + HPACK + flow control
//!   |   Session      |  H2Event: Response, Data, Trailers, PushPromise ...
//!   +----------------+
//! ```
//!
//! Inside the session, inbound frames flow through the frame codec into the
//! stream table; outbound requests are HPACK-encoded and committed to an
//! output scheduler that keeps control frames ahead of flow-controlled DATA.
//!
//! # Example
//!
//! ```rust,ignore
//! use wireline_h2::{HeaderField, H2Event, Session, Settings};
//!
//! let mut session = Session::client(Settings::default());
//!
//! // Connection preface + SETTINGS go first.
//! transport_send(&session.take_pending_send());
//!
//! // Send a GET request.
//! let stream_id = session.send_request(&[
//!     HeaderField::new(b":method", b"GET"),
//!     HeaderField::new(b":path", b"/"),
//!     HeaderField::new(b":scheme", b"https"),
//!     HeaderField::new(b":authority", b"example.com"),
//! ], true)?;
//! transport_send(&session.take_pending_send());
//!
//! // Feed received bytes and drain events.
//! session.recv(&received)?;
//! while let Some(event) = session.poll_event() {
//!     match event {
//!         H2Event::Response { stream_id, headers, end_stream } => { /* ... */ }
//!         H2Event::Data { stream_id, data, end_stream } => { /* ... */ }
//!         _ => {}
//!     }
//! }
//! ```

pub mod error;
pub mod flowcontrol;
pub mod frame;
pub mod hpack;
mod huffman;
mod scheduler;
pub mod session;
pub mod settings;
pub mod stream;

pub use error::{ErrorCode, H2Error};
pub use frame::Frame;
pub use hpack::HeaderField;
pub use scheduler::DEFAULT_SEND_QUEUE_LIMIT;
pub use session::{H2Event, Session, CLIENT_PREFACE};
pub use settings::{Settings, SettingsUpdate};
pub use stream::StreamState;

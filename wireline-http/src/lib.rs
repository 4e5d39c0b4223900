//! Client surface for the wireline HTTP/2 engine.
//!
//! Bridges the sans-IO `wireline-h2` session to an application-facing
//! request/response model, and owns connection establishment: ALPN over
//! TLS, the cleartext HTTP/1.1 `Upgrade: h2c` dance, and prior knowledge.
//! The crate stays sans-IO itself — the caller moves bytes between its
//! transport and `ClientConn`.
//!
//! # Example
//!
//! ```rust,ignore
//! use wireline_http::{ClientConfig, ClientConn, Request};
//!
//! // Cleartext with upgrade offer (the default):
//! let mut conn = ClientConn::new(ClientConfig::default())?;
//! let exchange = conn.send_request(Request::get("/", "example.com"))?;
//!
//! transport_send(&conn.take_pending_send());
//! loop {
//!     conn.recv(&transport_recv())?;
//!     transport_send(&conn.take_pending_send());
//!     if let Some((id, result)) = conn.poll_response() {
//!         assert_eq!(id, exchange);
//!         let response = result?;
//!         println!("{}", response.status());
//!         break;
//!     }
//! }
//! ```
//!
//! Over TLS, install the ALPN offer with `handshake::configure_alpn`,
//! drive the handshake, then hand the negotiated protocol to
//! `ClientConn::from_alpn`.

pub mod config;
pub mod conn;
pub mod error;
mod h1;
pub mod handshake;
pub mod request;
pub mod response;

pub use config::ClientConfig;
pub use conn::{ClientConn, ExchangeId, PushedRequest};
pub use error::HttpError;
pub use handshake::Negotiated;
pub use request::Request;
pub use response::Response;

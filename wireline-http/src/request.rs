//! Request description.

/// An HTTP request to send on a client connection. Protocol-agnostic: the
/// connection maps it onto HTTP/2 pseudo-headers or an HTTP/1.1 request
/// line depending on the negotiated protocol.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: String,
    pub path: String,
    /// Host (and optional port) — `:authority` on HTTP/2, `host` on
    /// HTTP/1.1.
    pub authority: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
}

impl Request {
    pub fn new(method: &str, path: &str, authority: &str) -> Self {
        Self {
            method: method.to_string(),
            path: path.to_string(),
            authority: authority.to_string(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn get(path: &str, authority: &str) -> Self {
        Self::new("GET", path, authority)
    }

    pub fn post(path: &str, authority: &str) -> Self {
        Self::new("POST", path, authority)
    }

    /// Add a header.
    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// Set the request body.
    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub(crate) fn has_body(&self) -> bool {
        self.body.as_ref().is_some_and(|b| !b.is_empty())
    }

    pub(crate) fn has_header(&self, name: &str) -> bool {
        self.headers
            .iter()
            .any(|(n, _)| n.eq_ignore_ascii_case(name))
    }
}

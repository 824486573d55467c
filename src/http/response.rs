//! Response construction and serialization.
//!
//! # Responsibilities
//! - Pick a representation for view-model payloads from the `Accept` value
//! - Render full-state, patch, and HTML payloads
//! - Serialize status line, headers, and body into wire bytes
//! - Map request-path errors to status codes
//!
//! # Design Decisions
//! - Representations are a closed [`ResponseKind`] enum; the call site picks
//!   one explicitly
//! - Error bodies are small JSON objects and never contain session tokens

use bytes::{BufMut, Bytes, BytesMut};
use serde_json::json;
use tokio_tungstenite::tungstenite::handshake::derive_accept_key;

use crate::error::Error;
use crate::http::request::ParseError;
use crate::worker::WorkerError;

/// Representation of a view-model payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    /// Complete view-model state as a JSON document.
    FullJson,
    /// JSON-Patch document.
    Patch,
    /// HTML page bootstrapping the view-model.
    Html,
}

impl ResponseKind {
    pub fn content_type(&self) -> &'static str {
        match self {
            ResponseKind::FullJson => "application/json",
            ResponseKind::Patch => "application/json-patch+json",
            ResponseKind::Html => "text/html; charset=utf-8",
        }
    }

    /// Choose a representation from an `Accept` value, falling back to `default`.
    pub fn negotiate(accept: Option<&[u8]>, default: ResponseKind) -> ResponseKind {
        let Some(accept) = accept else {
            return default;
        };
        let has = |needle: &[u8]| accept.windows(needle.len()).any(|w| w == needle);
        if has(b"application/json-patch+json") {
            ResponseKind::Patch
        } else if has(b"text/html") {
            ResponseKind::Html
        } else if has(b"application/json") {
            ResponseKind::FullJson
        } else {
            default
        }
    }

    /// Turn a JSON payload into the body for this representation.
    pub fn render(&self, payload: &[u8]) -> Bytes {
        match self {
            ResponseKind::FullJson | ResponseKind::Patch => Bytes::copy_from_slice(payload),
            ResponseKind::Html => render_html(payload),
        }
    }
}

fn render_html(state: &[u8]) -> Bytes {
    const HEAD: &[u8] = b"<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\"><script>window.__vm_state=";
    const TAIL: &[u8] = b";</script></head><body></body></html>\n";

    let mut out = BytesMut::with_capacity(HEAD.len() + state.len() + TAIL.len());
    out.put_slice(HEAD);
    // `</` would let a string value close the script element early.
    let mut i = 0;
    while i < state.len() {
        if state[i] == b'<' && state.get(i + 1) == Some(&b'/') {
            out.put_slice(b"<\\/");
            i += 2;
        } else {
            out.put_u8(state[i]);
            i += 1;
        }
    }
    out.put_slice(TAIL);
    out.freeze()
}

/// A complete response ready to be written to the transport.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    status: u16,
    headers: Vec<(&'static str, String)>,
    body: Bytes,
}

impl HttpResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Bytes::new(),
        }
    }

    /// Response carrying a view-model payload in the given representation.
    pub fn payload(status: u16, kind: ResponseKind, json: &[u8]) -> Self {
        Self::new(status)
            .with_header("Content-Type", kind.content_type())
            .with_body(kind.render(json))
    }

    /// JSON error body `{"error": message}` plus any extra fields.
    pub fn error(status: u16, message: impl Into<String>) -> Self {
        Self::error_with(status, json!({ "error": message.into() }))
    }

    pub fn error_with(status: u16, body: serde_json::Value) -> Self {
        Self::new(status)
            .with_header("Content-Type", "application/json")
            .with_body(Bytes::from(body.to_string()))
    }

    pub fn from_parse_error(err: &ParseError) -> Self {
        Self::error_with(
            err.status(),
            json!({ "error": err.to_string(), "code": err.code() }),
        )
        .with_header("Connection", "close")
    }

    /// Client-visible form of a request-path error.
    pub fn from_error(err: &Error) -> Self {
        match err {
            Error::Parse(e) => Self::from_parse_error(e),
            Error::Patch(e) | Error::Worker(WorkerError::Patch(e)) => Self::error_with(400, e.to_json()),
            Error::Session(_) | Error::Worker(WorkerError::SlotsExhausted) => {
                Self::error(503, err.to_string()).with_header("Retry-After", "1")
            }
            other => Self::error(other.status(), other.to_string()),
        }
    }

    /// `101 Switching Protocols` answering a WebSocket key.
    pub fn switching_protocols(websocket_key: &[u8]) -> Self {
        Self::new(101)
            .with_header("Upgrade", "websocket")
            .with_header("Connection", "Upgrade")
            .with_header("Sec-WebSocket-Accept", derive_accept_key(websocket_key))
    }

    pub fn with_header(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }

    pub fn with_body(mut self, body: Bytes) -> Self {
        self.body = body;
        self
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Whether the transport must close after writing this response.
    pub fn closes_connection(&self) -> bool {
        self.header("Connection") == Some("close")
    }

    /// Wire bytes: status line, headers, `Content-Length`, body.
    pub fn to_bytes(&self) -> Bytes {
        let mut out = BytesMut::with_capacity(128 + self.body.len());
        out.put_slice(format!("HTTP/1.1 {} {}\r\n", self.status, reason_phrase(self.status)).as_bytes());
        for (name, value) in &self.headers {
            out.put_slice(name.as_bytes());
            out.put_slice(b": ");
            out.put_slice(value.as_bytes());
            out.put_slice(b"\r\n");
        }
        if self.status != 101 && self.status != 204 {
            out.put_slice(format!("Content-Length: {}\r\n", self.body.len()).as_bytes());
        }
        out.put_slice(b"\r\n");
        out.put_slice(&self.body);
        out.freeze()
    }
}

fn reason_phrase(status: u16) -> &'static str {
    match status {
        101 => "Switching Protocols",
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        400 => "Bad Request",
        401 => "Unauthorized",
        404 => "Not Found",
        405 => "Method Not Allowed",
        413 => "Payload Too Large",
        431 => "Request Header Fields Too Large",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "Unknown",
    }
}

//! Zero-copy HTTP/1.x request parsing.
//!
//! # Responsibilities
//! - Split a raw request region into method, URI, headers, and body
//! - Capture the fields the session protocol needs (cookies, `Accept`,
//!   session token, WebSocket upgrade key) while scanning
//! - Enforce configured header/body bounds before anything else sees the bytes
//!
//! # Design Decisions
//! - The parser records [`Span`]s only; it never allocates or copies
//! - At most [`MAX_HEADERS`] headers are kept for lookup, the rest are scanned
//!   for well-known fields and then dropped
//! - Header names compare byte-for-byte, case-sensitive

use thiserror::Error;

use crate::http::buffer::{BufferView, Span};

/// Capacity of the per-request header table.
pub const MAX_HEADERS: usize = 16;

/// Name of the cookie that may carry the session token.
pub const SESSION_COOKIE: &str = "ScSessionId";

const CRLF: &[u8] = b"\r\n";
const HEADER_END: &[u8] = b"\r\n\r\n";
const WS_UPGRADE_SEGMENT: &[u8] = b"wsupgrade/";

/// Request method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Method {
    #[default]
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
    Options,
    Other,
}

impl Method {
    fn from_bytes(raw: &[u8]) -> Self {
        match raw {
            b"GET" => Method::Get,
            b"POST" => Method::Post,
            b"PUT" => Method::Put,
            b"PATCH" => Method::Patch,
            b"DELETE" => Method::Delete,
            b"HEAD" => Method::Head,
            b"OPTIONS" => Method::Options,
            _ => Method::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
            Method::Head => "HEAD",
            Method::Options => "OPTIONS",
            Method::Other => "OTHER",
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors produced while parsing a request region.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("malformed request line")]
    MalformedRequestLine,

    #[error("malformed header line at byte {offset}")]
    MalformedHeader { offset: usize },

    #[error("too many headers (limit {limit})")]
    TooManyHeaders { limit: usize },

    #[error("header section exceeds {limit} bytes")]
    HeadersTooLarge { limit: usize },

    #[error("body of {length} bytes exceeds limit of {limit} bytes")]
    BodyTooLarge { length: usize, limit: usize },

    #[error("request is truncated")]
    Truncated,

    #[error("invalid Content-Length value")]
    InvalidContentLength,
}

impl ParseError {
    /// Stable numeric code for logs and client-visible error bodies.
    pub fn code(&self) -> u32 {
        match self {
            ParseError::MalformedRequestLine => 1001,
            ParseError::MalformedHeader { .. } => 1002,
            ParseError::TooManyHeaders { .. } => 1003,
            ParseError::HeadersTooLarge { .. } => 1004,
            ParseError::BodyTooLarge { .. } => 1005,
            ParseError::Truncated => 1006,
            ParseError::InvalidContentLength => 1007,
        }
    }

    /// HTTP status the protocol handler answers with.
    pub fn status(&self) -> u16 {
        match self {
            ParseError::TooManyHeaders { .. } | ParseError::HeadersTooLarge { .. } => 431,
            ParseError::BodyTooLarge { .. } => 413,
            _ => 400,
        }
    }
}

/// Configured parsing bounds.
#[derive(Debug, Clone)]
pub struct ParseLimits {
    /// Maximum size of request line plus header block.
    pub max_header_bytes: usize,
    /// Maximum number of header lines, stored or not.
    pub max_header_count: usize,
    /// Maximum accepted `Content-Length`.
    pub max_body_bytes: usize,
    /// Path prefix under which the next segment is a session token (e.g. `/vm`).
    pub session_prefix: String,
}

impl Default for ParseLimits {
    fn default() -> Self {
        Self {
            max_header_bytes: 8 * 1024,
            max_header_count: 64,
            max_body_bytes: 1024 * 1024,
            session_prefix: "/vm".to_string(),
        }
    }
}

/// One stored header: name and value positions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeaderSpan {
    pub name: Span,
    pub value: Span,
}

/// Offsets of every parsed field. Plain data, so it can travel to another
/// worker next to the owned buffer it describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestLayout {
    method: Method,
    method_span: Span,
    uri: Span,
    headers: [HeaderSpan; MAX_HEADERS],
    header_count: usize,
    cookies: Span,
    accept: Span,
    session: Span,
    websocket_key: Span,
    body: Span,
    request_len: usize,
    gzip_accepted: bool,
    websocket_upgrade: bool,
    keep_alive: bool,
}

impl RequestLayout {
    /// Total bytes this request occupies in the region, body included.
    pub fn request_len(&self) -> usize {
        self.request_len
    }

    pub fn method(&self) -> Method {
        self.method
    }
}

/// A request parsed in place over its buffer.
#[derive(Debug, Clone, Copy)]
pub struct ParsedRequest<'a> {
    view: BufferView<'a>,
    layout: RequestLayout,
}

impl<'a> ParsedRequest<'a> {
    /// Re-attach a previously computed layout to the bytes it was parsed from.
    pub fn from_layout(view: BufferView<'a>, layout: RequestLayout) -> Self {
        Self { view, layout }
    }

    pub fn layout(&self) -> &RequestLayout {
        &self.layout
    }

    pub fn method(&self) -> Method {
        self.layout.method
    }

    /// Method exactly as sent, useful when it parsed as [`Method::Other`].
    pub fn raw_method(&self) -> &'a [u8] {
        self.view.slice(self.layout.method_span).unwrap_or(&[])
    }

    pub fn uri(&self) -> &'a [u8] {
        self.view.slice(self.layout.uri).unwrap_or(&[])
    }

    /// URI path with any query string stripped.
    pub fn path(&self) -> &'a [u8] {
        let uri = self.uri();
        match uri.iter().position(|&b| b == b'?') {
            Some(q) => &uri[..q],
            None => uri,
        }
    }

    /// Linear scan over the stored headers; exact, case-sensitive name match.
    pub fn get_header(&self, name: &str) -> Option<&'a [u8]> {
        let name = name.as_bytes();
        self.layout.headers[..self.layout.header_count]
            .iter()
            .find(|h| self.view.slice(h.name) == Some(name))
            .and_then(|h| self.view.slice(h.value))
    }

    /// Stored headers in arrival order.
    pub fn headers(&self) -> impl Iterator<Item = (&'a [u8], &'a [u8])> + '_ {
        self.layout.headers[..self.layout.header_count]
            .iter()
            .filter_map(|h| Some((self.view.slice(h.name)?, self.view.slice(h.value)?)))
    }

    pub fn header_count(&self) -> usize {
        self.layout.header_count
    }

    pub fn cookies(&self) -> Option<&'a [u8]> {
        self.view.field(self.layout.cookies)
    }

    pub fn accept(&self) -> Option<&'a [u8]> {
        self.view.field(self.layout.accept)
    }

    pub fn session_token(&self) -> Option<&'a [u8]> {
        self.view.field(self.layout.session)
    }

    pub fn websocket_key(&self) -> Option<&'a [u8]> {
        self.view.field(self.layout.websocket_key)
    }

    pub fn body(&self) -> &'a [u8] {
        self.view.slice(self.layout.body).unwrap_or(&[])
    }

    pub fn gzip_accepted(&self) -> bool {
        self.layout.gzip_accepted
    }

    pub fn is_websocket_upgrade(&self) -> bool {
        self.layout.websocket_upgrade
    }

    pub fn keep_alive(&self) -> bool {
        self.layout.keep_alive
    }
}

/// Parse one complete request out of `view`.
///
/// Never reads past `view.len()`. Returns [`ParseError::Truncated`] when the
/// region ends before the header terminator or before `Content-Length` bytes
/// of body, so a transport can read more and retry.
pub fn parse<'a>(view: BufferView<'a>, limits: &ParseLimits) -> Result<ParsedRequest<'a>, ParseError> {
    let header_end = match view.find(0, HEADER_END) {
        Some(pos) if pos + HEADER_END.len() <= limits.max_header_bytes => pos,
        Some(_) => {
            return Err(ParseError::HeadersTooLarge {
                limit: limits.max_header_bytes,
            })
        }
        None if view.len() > limits.max_header_bytes => {
            return Err(ParseError::HeadersTooLarge {
                limit: limits.max_header_bytes,
            })
        }
        None => return Err(ParseError::Truncated),
    };

    let line_end = view.find(0, CRLF).ok_or(ParseError::MalformedRequestLine)?;
    let (method_span, uri, http_10) = parse_request_line(&view, line_end)?;

    let mut layout = RequestLayout {
        method: view
            .slice(method_span)
            .map(Method::from_bytes)
            .unwrap_or(Method::Other),
        method_span,
        uri,
        headers: [HeaderSpan::default(); MAX_HEADERS],
        header_count: 0,
        cookies: Span::EMPTY,
        accept: Span::EMPTY,
        session: Span::EMPTY,
        websocket_key: Span::EMPTY,
        body: Span::EMPTY,
        request_len: 0,
        gzip_accepted: false,
        websocket_upgrade: false,
        keep_alive: !http_10,
    };

    let mut content_length = 0usize;
    let mut total_headers = 0usize;
    let mut pos = line_end + CRLF.len();
    // The last header's CRLF is the first half of the terminator.
    let block_end = header_end + CRLF.len();

    while pos < block_end {
        let end = view.find(pos, CRLF).unwrap_or(block_end);
        total_headers += 1;
        if total_headers > limits.max_header_count {
            return Err(ParseError::TooManyHeaders {
                limit: limits.max_header_count,
            });
        }

        let header = parse_header_line(&view, pos, end)?;
        if layout.header_count < MAX_HEADERS {
            layout.headers[layout.header_count] = header;
            layout.header_count += 1;
        }
        apply_known_header(&view, header, &mut layout, &mut content_length)?;

        pos = end + CRLF.len();
    }

    if content_length > limits.max_body_bytes {
        return Err(ParseError::BodyTooLarge {
            length: content_length,
            limit: limits.max_body_bytes,
        });
    }

    let body_start = header_end + HEADER_END.len();
    if view.len() < body_start + content_length {
        return Err(ParseError::Truncated);
    }
    layout.body = Span::new(body_start, content_length);
    layout.request_len = body_start + content_length;

    if let Some(token) = session_from_uri(&view, layout.uri, &limits.session_prefix) {
        layout.session = token;
    }

    Ok(ParsedRequest { view, layout })
}

fn parse_request_line(view: &BufferView<'_>, line_end: usize) -> Result<(Span, Span, bool), ParseError> {
    let line = view
        .slice(Span::between(0, line_end))
        .ok_or(ParseError::MalformedRequestLine)?;

    let sp1 = line
        .iter()
        .position(|&b| b == b' ')
        .ok_or(ParseError::MalformedRequestLine)?;
    let sp2 = line[sp1 + 1..]
        .iter()
        .position(|&b| b == b' ')
        .map(|p| p + sp1 + 1)
        .ok_or(ParseError::MalformedRequestLine)?;

    let version = &line[sp2 + 1..];
    if sp1 == 0 || sp2 == sp1 + 1 || !version.starts_with(b"HTTP/") {
        return Err(ParseError::MalformedRequestLine);
    }

    Ok((
        Span::between(0, sp1),
        Span::between(sp1 + 1, sp2),
        version == b"HTTP/1.0",
    ))
}

fn parse_header_line(view: &BufferView<'_>, start: usize, end: usize) -> Result<HeaderSpan, ParseError> {
    let line = view
        .slice(Span::between(start, end))
        .ok_or(ParseError::Truncated)?;

    let colon = match line.iter().position(|&b| b == b':') {
        Some(c) if c > 0 => c,
        _ => return Err(ParseError::MalformedHeader { offset: start }),
    };

    let mut value_start = colon + 1;
    while value_start < line.len() && matches!(line[value_start], b' ' | b'\t') {
        value_start += 1;
    }
    let mut value_end = line.len();
    while value_end > value_start && matches!(line[value_end - 1], b' ' | b'\t') {
        value_end -= 1;
    }

    Ok(HeaderSpan {
        name: Span::new(start, colon),
        value: Span::between(start + value_start, start + value_end),
    })
}

fn apply_known_header(
    view: &BufferView<'_>,
    header: HeaderSpan,
    layout: &mut RequestLayout,
    content_length: &mut usize,
) -> Result<(), ParseError> {
    let name = view.slice(header.name).unwrap_or(&[]);
    let value = view.slice(header.value).unwrap_or(&[]);

    match name {
        b"Cookie" => {
            layout.cookies = header.value;
            if let Some(token) = session_from_cookies(value) {
                layout.session = Span::new(header.value.offset as usize + token.0, token.1);
            }
        }
        b"Accept" => layout.accept = header.value,
        b"Accept-Encoding" => {
            layout.gzip_accepted = value.windows(4).any(|w| w == b"gzip");
        }
        b"Content-Length" => *content_length = parse_content_length(value)?,
        b"Upgrade" => layout.websocket_upgrade = value.eq_ignore_ascii_case(b"websocket"),
        b"Sec-WebSocket-Key" => layout.websocket_key = header.value,
        b"Connection" => {
            if value.eq_ignore_ascii_case(b"close") {
                layout.keep_alive = false;
            } else if value.eq_ignore_ascii_case(b"keep-alive") {
                layout.keep_alive = true;
            }
        }
        _ => {}
    }
    Ok(())
}

fn parse_content_length(value: &[u8]) -> Result<usize, ParseError> {
    if value.is_empty() {
        return Err(ParseError::InvalidContentLength);
    }
    value.iter().try_fold(0usize, |acc, &b| {
        if !b.is_ascii_digit() {
            return Err(ParseError::InvalidContentLength);
        }
        acc.checked_mul(10)
            .and_then(|v| v.checked_add((b - b'0') as usize))
            .ok_or(ParseError::InvalidContentLength)
    })
}

/// Offset and length of the session cookie value inside a `Cookie` header value.
fn session_from_cookies(cookies: &[u8]) -> Option<(usize, usize)> {
    let key = SESSION_COOKIE.as_bytes();
    let mut start = 0;
    while start < cookies.len() {
        let end = cookies[start..]
            .iter()
            .position(|&b| b == b';')
            .map(|p| p + start)
            .unwrap_or(cookies.len());
        let mut pair_start = start;
        while pair_start < end && cookies[pair_start] == b' ' {
            pair_start += 1;
        }
        let pair = &cookies[pair_start..end];
        if pair.len() > key.len() && pair.starts_with(key) && pair[key.len()] == b'=' {
            let value_start = pair_start + key.len() + 1;
            return Some((value_start, end - value_start));
        }
        start = end + 1;
    }
    None
}

fn session_from_uri(view: &BufferView<'_>, uri: Span, prefix: &str) -> Option<Span> {
    let uri_bytes = view.slice(uri)?;
    let path_len = uri_bytes
        .iter()
        .position(|&b| b == b'?')
        .unwrap_or(uri_bytes.len());
    let path = &uri_bytes[..path_len];

    let prefix = prefix.as_bytes();
    if !path.starts_with(prefix) || path.get(prefix.len()) != Some(&b'/') {
        return None;
    }
    let mut start = prefix.len() + 1;
    if path[start..].starts_with(WS_UPGRADE_SEGMENT) {
        start += WS_UPGRADE_SEGMENT.len();
    }
    let len = path[start..]
        .iter()
        .position(|&b| b == b'/')
        .unwrap_or(path.len() - start);
    if len == 0 {
        return None;
    }
    Some(Span::new(uri.offset as usize + start, len))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_str(raw: &str) -> Result<ParsedRequest<'_>, ParseError> {
        parse(BufferView::new(raw.as_bytes()), &ParseLimits::default())
    }

    #[test]
    fn parses_simple_get() {
        let req = parse_str("GET /x HTTP/1.1\r\nHost: a\r\n\r\n").unwrap();
        assert_eq!(req.method(), Method::Get);
        assert_eq!(req.uri(), b"/x");
        assert_eq!(req.get_header("Host"), Some(&b"a"[..]));
        assert!(req.body().is_empty());
        assert!(req.keep_alive());
    }

    #[test]
    fn header_lookup_is_case_sensitive() {
        let req = parse_str("GET / HTTP/1.1\r\nHost: example.com\r\n\r\n").unwrap();
        assert_eq!(req.get_header("Host"), Some(&b"example.com"[..]));
        assert_eq!(req.get_header("host"), None);
    }

    #[test]
    fn request_without_headers() {
        let req = parse_str("DELETE /vm/abc HTTP/1.1\r\n\r\n").unwrap();
        assert_eq!(req.method(), Method::Delete);
        assert_eq!(req.header_count(), 0);
        assert_eq!(req.session_token(), Some(&b"abc"[..]));
    }

    #[test]
    fn unknown_method_is_not_an_error() {
        let req = parse_str("BREW /pot HTTP/1.1\r\n\r\n").unwrap();
        assert_eq!(req.method(), Method::Other);
        assert_eq!(req.raw_method(), b"BREW");
    }

    #[test]
    fn malformed_request_lines_are_rejected() {
        assert_eq!(
            parse_str("GET\r\n\r\n").unwrap_err(),
            ParseError::MalformedRequestLine
        );
        assert_eq!(
            parse_str("GET  HTTP/1.1\r\n\r\n").unwrap_err(),
            ParseError::MalformedRequestLine
        );
        assert_eq!(
            parse_str("GET / FTP/1.1\r\n\r\n").unwrap_err(),
            ParseError::MalformedRequestLine
        );
    }

    #[test]
    fn malformed_header_reports_offset() {
        let err = parse_str("GET / HTTP/1.1\r\nNoColonHere\r\n\r\n").unwrap_err();
        assert_eq!(err, ParseError::MalformedHeader { offset: 16 });
        assert_eq!(err.code(), 1002);
        assert_eq!(err.status(), 400);
    }

    #[test]
    fn extra_headers_beyond_table_are_ignored() {
        let mut raw = String::from("GET / HTTP/1.1\r\n");
        for i in 0..20 {
            raw.push_str(&format!("X-H{}: {}\r\n", i, i));
        }
        raw.push_str("Accept: application/json\r\n\r\n");
        let req = parse_str(&raw).unwrap();
        assert_eq!(req.header_count(), MAX_HEADERS);
        assert_eq!(req.get_header("X-H0"), Some(&b"0"[..]));
        assert_eq!(req.get_header("X-H19"), None);
        // Well-known fields are still captured past the table.
        assert_eq!(req.accept(), Some(&b"application/json"[..]));
    }

    #[test]
    fn header_count_limit() {
        let limits = ParseLimits {
            max_header_count: 2,
            ..ParseLimits::default()
        };
        let raw = b"GET / HTTP/1.1\r\nA: 1\r\nB: 2\r\nC: 3\r\n\r\n";
        let err = parse(BufferView::new(raw), &limits).unwrap_err();
        assert_eq!(err, ParseError::TooManyHeaders { limit: 2 });
        assert_eq!(err.status(), 431);
    }

    #[test]
    fn header_size_limit() {
        let limits = ParseLimits {
            max_header_bytes: 32,
            ..ParseLimits::default()
        };
        let raw = b"GET / HTTP/1.1\r\nX-Long: aaaaaaaaaaaaaaaaaaaaaaaa\r\n\r\n";
        let err = parse(BufferView::new(raw), &limits).unwrap_err();
        assert_eq!(err, ParseError::HeadersTooLarge { limit: 32 });

        // Still incomplete but already over the limit.
        let err = parse(BufferView::new(&raw[..40]), &limits).unwrap_err();
        assert_eq!(err, ParseError::HeadersTooLarge { limit: 32 });
    }

    #[test]
    fn body_is_bounded_by_content_length() {
        let req = parse_str("PATCH /vm/t HTTP/1.1\r\nContent-Length: 2\r\n\r\n[]extra").unwrap();
        assert_eq!(req.body(), b"[]");
        assert_eq!(req.layout().request_len(), 45);
    }

    #[test]
    fn oversized_body_is_rejected() {
        let limits = ParseLimits {
            max_body_bytes: 4,
            ..ParseLimits::default()
        };
        let raw = b"PATCH / HTTP/1.1\r\nContent-Length: 5\r\n\r\n12345";
        let err = parse(BufferView::new(raw), &limits).unwrap_err();
        assert_eq!(err, ParseError::BodyTooLarge { length: 5, limit: 4 });
        assert_eq!(err.status(), 413);
    }

    #[test]
    fn truncated_requests() {
        assert_eq!(
            parse_str("GET / HTTP/1.1\r\nHost: a\r\n").unwrap_err(),
            ParseError::Truncated
        );
        assert_eq!(
            parse_str("PATCH / HTTP/1.1\r\nContent-Length: 10\r\n\r\n[]").unwrap_err(),
            ParseError::Truncated
        );
    }

    #[test]
    fn invalid_content_length() {
        assert_eq!(
            parse_str("PATCH / HTTP/1.1\r\nContent-Length: 1x\r\n\r\n").unwrap_err(),
            ParseError::InvalidContentLength
        );
    }

    #[test]
    fn session_from_cookie() {
        let req = parse_str("GET / HTTP/1.1\r\nCookie: theme=dark; ScSessionId=00ff; x=1\r\n\r\n").unwrap();
        assert_eq!(req.cookies(), Some(&b"theme=dark; ScSessionId=00ff; x=1"[..]));
        assert_eq!(req.session_token(), Some(&b"00ff"[..]));
    }

    #[test]
    fn uri_session_takes_precedence() {
        let req = parse_str("GET /vm/wsupgrade/aa11?x=1 HTTP/1.1\r\nCookie: ScSessionId=bb22\r\n\r\n").unwrap();
        assert_eq!(req.session_token(), Some(&b"aa11"[..]));
        assert_eq!(req.path(), b"/vm/wsupgrade/aa11");
    }

    #[test]
    fn prefix_must_be_a_whole_segment() {
        let req = parse_str("GET /vmx/aa11 HTTP/1.1\r\n\r\n").unwrap();
        assert_eq!(req.session_token(), None);
    }

    #[test]
    fn upgrade_and_encoding_flags() {
        let req = parse_str(
            "GET /vm/wsupgrade/t HTTP/1.1\r\nUpgrade: WebSocket\r\nSec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\nAccept-Encoding: deflate, gzip\r\nConnection: close\r\n\r\n",
        )
        .unwrap();
        assert!(req.is_websocket_upgrade());
        assert!(req.gzip_accepted());
        assert!(!req.keep_alive());
        assert_eq!(req.websocket_key(), Some(&b"dGhlIHNhbXBsZSBub25jZQ=="[..]));
    }

    #[test]
    fn http_10_defaults_to_close() {
        let req = parse_str("GET / HTTP/1.0\r\n\r\n").unwrap();
        assert!(!req.keep_alive());
    }

    #[test]
    fn layout_reattaches_to_same_bytes() {
        let raw = b"GET /vm/tok HTTP/1.1\r\nHost: h\r\n\r\n".to_vec();
        let layout = *parse(BufferView::new(&raw), &ParseLimits::default())
            .unwrap()
            .layout();
        let again = ParsedRequest::from_layout(BufferView::new(&raw), layout);
        assert_eq!(again.get_header("Host"), Some(&b"h"[..]));
        assert_eq!(again.session_token(), Some(&b"tok"[..]));
    }
}

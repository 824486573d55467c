//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection (net::connection)
//!     → buffer.rs (spans over the connection's read buffer)
//!     → request.rs (zero-copy parse into a RequestLayout)
//!     → [owning worker handles the route]
//!     → response.rs (status line, headers, negotiated body)
//!     → Send to client
//!
//! After a 101 response:
//!     → websocket.rs (patch frames in both directions)
//! ```
//!
//! # Design Decisions
//! - Requests are parsed in place; headers and body are spans, never copies
//! - The parser reports `Truncated` until a whole request is buffered
//! - Only HTTP/1.x; the accept loop in server.rs owns the TCP side

pub mod buffer;
pub mod request;
pub mod response;
pub mod server;
pub mod websocket;

pub use buffer::{BufferView, Span};
pub use request::{parse, Method, ParseError, ParseLimits, ParsedRequest, RequestLayout};
pub use response::{HttpResponse, ResponseKind};
pub use server::SessionServer;

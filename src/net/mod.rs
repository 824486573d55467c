//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept, connection limits)
//!     → connection.rs (read buffer, parse, route to worker, keep-alive)
//!     → http::websocket (after a successful upgrade)
//!
//! Connection States:
//!     Reading → Dispatched → Writing → (Reading | Upgraded | Closed)
//! ```
//!
//! # Design Decisions
//! - Bounded accept via semaphore prevents resource exhaustion
//! - Each connection tracked for graceful shutdown
//! - Connection tasks never touch session state; workers own it

pub mod connection;
pub mod listener;

pub use connection::{ConnectionContext, ConnectionId, ConnectionTracker};
pub use listener::{Listener, ListenerError};

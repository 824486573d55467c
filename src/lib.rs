//! View-model session server library.
//!
//! Clients create a session over HTTP, then read and mutate a JSON
//! view-model tree with JSON-Patch documents over HTTP or a WebSocket. The
//! server answers every patch with the changes made on its side.
//!
//! ```text
//!     Client ──TCP──▶ net::listener ──▶ net::connection ──parse──▶ http::request
//!                                            │
//!                              token's worker_id (round-robin on create)
//!                                            ▼
//!                     worker::pool ──mpsc──▶ worker task ──▶ session::table
//!                                                │                 │
//!                                                ▼                 ▼
//!                                       patch::codec ◀──── viewmodel::tree
//! ```

// Core data
pub mod patch;
pub mod session;
pub mod viewmodel;

// Protocol and transport
pub mod http;
pub mod net;
pub mod worker;

// Cross-cutting concerns
pub mod admin;
pub mod app;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod observability;

pub use app::{Application, EmptyApplication};
pub use config::ServerConfig;
pub use error::{Error, Result};
pub use lifecycle::{start, RunningServer, Shutdown};
pub use session::SessionToken;
pub use viewmodel::ViewModel;
pub use worker::{Delivery, WorkerPool};

//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Validate config → Spawn workers → Bind listeners → Accept traffic
//!
//! Shutdown (shutdown.rs):
//!     Trigger → Stop accepting → Workers exit → Drain connections
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config first, then workers, then listeners
//! - Ordered shutdown: stop accept, drain, close
//! - Draining has a deadline; stragglers are abandoned

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
pub use signals::wait_for_signal;
pub use startup::{start, RunningServer};

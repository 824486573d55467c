//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! http / worker / net produce:
//!     → logging.rs (structured log events)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → stdout (fmt subscriber)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Events carry `worker_id` and `session` (application session id) fields
//! - Metrics are cheap (atomic increments)

pub mod logging;
pub mod metrics;

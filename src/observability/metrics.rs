//! Metrics collection and exposition.
//!
//! # Metrics
//! - `vmsync_requests_total` (counter): requests by method, status
//! - `vmsync_request_duration_seconds` (histogram): time from parse to response
//! - `vmsync_sessions_created_total` (counter)
//! - `vmsync_sessions_destroyed_total` (counter): by reason (`logout`, `idle`)
//! - `vmsync_active_sessions` (gauge): live sessions per worker
//! - `vmsync_patches_applied_total` / `vmsync_patches_rejected_total` (counters)
//! - `vmsync_websocket_channels` (gauge): bound WebSocket channels
//!
//! Without an installed recorder every call is a no-op.

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus recorder and its scrape endpoint on `addr`.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

pub fn record_request(method: &'static str, status: u16, start: Instant) {
    metrics::counter!("vmsync_requests_total", "method" => method, "status" => status.to_string()).increment(1);
    metrics::histogram!("vmsync_request_duration_seconds", "method" => method).record(start.elapsed().as_secs_f64());
}

pub fn record_session_created() {
    metrics::counter!("vmsync_sessions_created_total").increment(1);
}

pub fn record_session_destroyed(reason: &'static str) {
    metrics::counter!("vmsync_sessions_destroyed_total", "reason" => reason).increment(1);
}

pub fn set_active_sessions(worker_id: u32, active: usize) {
    metrics::gauge!("vmsync_active_sessions", "worker" => worker_id.to_string()).set(active as f64);
}

pub fn record_patch_applied() {
    metrics::counter!("vmsync_patches_applied_total").increment(1);
}

pub fn record_patch_rejected() {
    metrics::counter!("vmsync_patches_rejected_total").increment(1);
}

pub fn websocket_opened() {
    metrics::gauge!("vmsync_websocket_channels").increment(1.0);
}

pub fn websocket_closed() {
    metrics::gauge!("vmsync_websocket_channels").decrement(1.0);
}

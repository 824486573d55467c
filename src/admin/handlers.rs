use axum::{extract::State, Json};
use serde::Serialize;

use crate::admin::AdminState;
use crate::session::TableStats;

#[derive(Debug, Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub workers: usize,
    pub uptime_secs: u64,
}

#[derive(Debug, Serialize)]
pub struct SessionSummary {
    pub capacity: u64,
    pub active: u64,
    pub websocket_bound: u64,
    pub workers: Vec<TableStats>,
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        workers: state.pool.worker_count(),
        uptime_secs: state.started.elapsed().as_secs(),
    })
}

pub async fn get_sessions(State(state): State<AdminState>) -> Json<SessionSummary> {
    let workers = state.pool.stats().await;
    Json(SessionSummary {
        capacity: workers.iter().map(|w| w.capacity as u64).sum(),
        active: workers.iter().map(|w| w.active as u64).sum(),
        websocket_bound: workers.iter().map(|w| w.websocket_bound as u64).sum(),
        workers,
    })
}

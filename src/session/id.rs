//! Process-wide application session ids.

use std::sync::atomic::{AtomicU64, Ordering};

/// Shared by every worker. Relaxed ordering is enough: callers need unique
/// values, not synchronization with other memory.
static APP_SESSION_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Application session id of a destroyed or never-used slot.
pub const INVALID_APP_SESSION_ID: u64 = u64::MAX;

/// Next unique id. Never reset, never reused.
pub fn next_app_session_id() -> u64 {
    APP_SESSION_COUNTER.fetch_add(1, Ordering::Relaxed)
}

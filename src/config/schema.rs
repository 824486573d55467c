//! Configuration schema definitions.
//!
//! All types derive Serde traits for deserialization from TOML files and
//! default every field, so a partial file is a valid configuration.

use serde::{Deserialize, Serialize};

use crate::http::request::ParseLimits;
use crate::patch::version::DEFAULT_QUEUE_LIMIT;

/// Root configuration for the session server.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ServerConfig {
    /// Listener configuration (bind address, connection limit).
    pub listener: ListenerConfig,

    /// Session table and routing settings.
    pub session: SessionConfig,

    /// Worker pool sizing.
    pub workers: WorkerConfig,

    /// Request size bounds.
    pub limits: LimitsConfig,

    /// Patch protocol options.
    pub patch: PatchConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    pub admin: AdminConfig,
}

impl ServerConfig {
    /// Parser bounds derived from `limits` and the session prefix.
    pub fn parse_limits(&self) -> ParseLimits {
        ParseLimits {
            max_header_bytes: self.limits.max_header_bytes,
            max_header_count: self.limits.max_header_count,
            max_body_bytes: self.limits.max_body_bytes,
            session_prefix: self.session.prefix.clone(),
        }
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Maximum concurrent connections (backpressure).
    pub max_connections: usize,

    /// Idle keep-alive connections are closed after this many seconds.
    pub keep_alive_secs: u64,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            max_connections: 10_000,
            keep_alive_secs: 75,
        }
    }
}

/// Session table configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Path prefix of the session routes. Starts with `/`, no trailing `/`.
    pub prefix: String,

    /// Capacity of each worker's session table.
    pub slots_per_worker: u32,

    /// Sessions idle longer than this are evicted. 0 disables eviction.
    pub idle_timeout_secs: u64,

    /// Period of the idle sweep.
    pub sweep_interval_ms: u64,

    /// Patches queued for a WebSocket before pushes are dropped.
    pub outbound_queue: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            prefix: "/vm".to_string(),
            slots_per_worker: 4096,
            idle_timeout_secs: 1200,
            sweep_interval_ms: 1000,
            outbound_queue: 64,
        }
    }
}

/// Worker pool configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Number of workers. 0 means one per available core.
    pub count: usize,

    /// Pending commands per worker before senders wait.
    pub queue_depth: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            count: 0,
            queue_depth: 1024,
        }
    }
}

/// Request bounds enforced by the parser.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_header_bytes: usize,
    pub max_header_count: usize,
    pub max_body_bytes: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        let parser = ParseLimits::default();
        Self {
            max_header_bytes: parser.max_header_bytes,
            max_header_count: parser.max_header_count,
            max_body_bytes: parser.max_body_bytes,
        }
    }
}

/// Patch protocol configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PatchConfig {
    /// Stamp patches with `/_ver#s` and `/_ver#c$` versions.
    pub versioning: bool,

    /// Out-of-order client patches held while waiting for a gap to close.
    pub version_queue_limit: usize,
}

impl Default for PatchConfig {
    fn default() -> Self {
        Self {
            versioning: false,
            version_queue_limit: DEFAULT_QUEUE_LIMIT,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable the admin API.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    /// Admin API bind address.
    pub bind_address: String,
}

/// Placeholder key that validation refuses when the admin API is enabled.
pub const DEFAULT_ADMIN_KEY: &str = "CHANGE_ME_IN_PRODUCTION";

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_key: DEFAULT_ADMIN_KEY.to_string(),
            bind_address: "127.0.0.1:8081".to_string(),
        }
    }
}

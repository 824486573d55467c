//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (limits and timeouts > 0, addresses parse)
//! - Refuse the placeholder admin key when the admin API is on
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ServerConfig → Result<(), Vec<ValidationError>>

use std::fmt;
use std::net::SocketAddr;

use crate::config::schema::{ServerConfig, DEFAULT_ADMIN_KEY};

/// One semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: &'static str,
    pub message: String,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

pub fn validate_config(config: &ServerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    let mut check = |ok: bool, field: &'static str, message: &str| {
        if !ok {
            errors.push(ValidationError {
                field,
                message: message.to_string(),
            });
        }
    };

    let prefix = &config.session.prefix;
    check(prefix.starts_with('/'), "session.prefix", "must start with '/'");
    check(!prefix.ends_with('/'), "session.prefix", "must not end with '/'");
    check(!prefix.contains('?'), "session.prefix", "must not contain '?'");
    check(config.session.slots_per_worker > 0, "session.slots_per_worker", "must be > 0");
    check(config.session.sweep_interval_ms > 0, "session.sweep_interval_ms", "must be > 0");
    check(config.session.outbound_queue > 0, "session.outbound_queue", "must be > 0");

    check(
        config.listener.bind_address.parse::<SocketAddr>().is_ok(),
        "listener.bind_address",
        "must be a socket address",
    );
    check(config.listener.max_connections > 0, "listener.max_connections", "must be > 0");
    check(config.listener.keep_alive_secs > 0, "listener.keep_alive_secs", "must be > 0");

    check(config.workers.queue_depth > 0, "workers.queue_depth", "must be > 0");

    check(config.limits.max_header_bytes > 0, "limits.max_header_bytes", "must be > 0");
    check(config.limits.max_header_count > 0, "limits.max_header_count", "must be > 0");
    check(config.limits.max_body_bytes > 0, "limits.max_body_bytes", "must be > 0");

    if config.patch.versioning {
        check(config.patch.version_queue_limit > 0, "patch.version_queue_limit", "must be > 0");
    }

    if config.observability.metrics_enabled {
        check(
            config.observability.metrics_address.parse::<SocketAddr>().is_ok(),
            "observability.metrics_address",
            "must be a socket address",
        );
    }

    if config.admin.enabled {
        check(
            config.admin.api_key != DEFAULT_ADMIN_KEY && !config.admin.api_key.is_empty(),
            "admin.api_key",
            "must be changed from the default",
        );
        check(
            config.admin.bind_address.parse::<SocketAddr>().is_ok(),
            "admin.bind_address",
            "must be a socket address",
        );
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

//! Session server accept loop.
//!
//! # Responsibilities
//! - Accept TCP connections under the listener's connection limit
//! - Spawn one task per connection running the request loop
//! - Stop accepting on shutdown and drain open connections

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use crate::net::connection::{serve_connection, ConnectionContext, ConnectionTracker};
use crate::net::listener::{Listener, ListenerError};

/// How long open connections get to finish after shutdown.
pub const DRAIN_DEADLINE: Duration = Duration::from_secs(10);

/// HTTP/WebSocket front end of the worker pool.
pub struct SessionServer {
    listener: Listener,
    context: Arc<ConnectionContext>,
    tracker: ConnectionTracker,
}

impl SessionServer {
    pub fn new(listener: Listener, context: ConnectionContext) -> Self {
        Self {
            listener,
            context: Arc::new(context),
            tracker: ConnectionTracker::new(),
        }
    }

    pub fn local_addr(&self) -> Result<SocketAddr, std::io::Error> {
        self.listener.local_addr()
    }

    /// Connection count handle, usable after `run` takes the server.
    pub fn tracker(&self) -> ConnectionTracker {
        self.tracker.clone()
    }

    /// Accept connections until `shutdown` fires, then wait for open ones to
    /// finish.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) -> Result<(), ListenerError> {
        tracing::info!(
            address = ?self.listener.local_addr().ok(),
            prefix = %self.context.limits.session_prefix,
            "Session server starting"
        );

        loop {
            let accepted = tokio::select! {
                accepted = self.listener.accept() => accepted,
                _ = shutdown.recv() => break,
            };
            let (stream, peer, permit) = match accepted {
                Ok(accepted) => accepted,
                Err(ListenerError::Accept(e)) => {
                    tracing::warn!(error = %e, "Accept failed");
                    continue;
                }
                Err(e) => return Err(e),
            };

            let guard = self.tracker.track();
            let context = Arc::clone(&self.context);
            let connection_shutdown = shutdown.resubscribe();
            tokio::spawn(async move {
                serve_connection(stream, peer, context, guard, connection_shutdown).await;
                drop(permit);
            });
        }

        let open = self.tracker.active_count();
        tracing::info!(open_connections = open, "Session server draining");
        if !self.tracker.drain(DRAIN_DEADLINE).await {
            tracing::warn!(
                open_connections = self.tracker.active_count(),
                "Drain deadline passed with connections open"
            );
        }
        tracing::info!("Session server stopped");
        Ok(())
    }
}

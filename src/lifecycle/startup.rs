//! Startup orchestration.
//!
//! # Responsibilities
//! - Validate configuration
//! - Spawn the worker pool before anything can route to it
//! - Bind the session listener and, when enabled, the admin API
//! - Hand back a handle for shutdown and in-process access to sessions
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal and stops already spawned workers
//! - Listeners start last (traffic only when ready)

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use crate::admin::{serve_admin, AdminState};
use crate::app::Application;
use crate::config::validation::validate_config;
use crate::config::{ConfigError, ServerConfig};
use crate::error::Result;
use crate::http::SessionServer;
use crate::lifecycle::Shutdown;
use crate::net::{ConnectionContext, Listener};
use crate::worker::WorkerPool;

/// A started server.
pub struct RunningServer {
    local_addr: SocketAddr,
    admin_addr: Option<SocketAddr>,
    pool: Arc<WorkerPool>,
    shutdown: Shutdown,
    tasks: Vec<JoinHandle<()>>,
}

impl RunningServer {
    /// Address the session listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn admin_addr(&self) -> Option<SocketAddr> {
        self.admin_addr
    }

    /// Worker pool, for pushing server-side updates into sessions.
    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }

    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    /// Wait until every server task has stopped.
    pub async fn wait(self) {
        for task in self.tasks {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "Server task panicked");
            }
        }
    }

    /// Trigger shutdown and wait for the server to stop.
    pub async fn stop(self) {
        self.shutdown.trigger();
        self.wait().await;
    }
}

/// Start workers and listeners for `config`.
pub async fn start(config: &ServerConfig, app: Arc<dyn Application>) -> Result<RunningServer> {
    validate_config(config).map_err(ConfigError::Validation)?;

    let shutdown = Shutdown::new();
    let pool = Arc::new(WorkerPool::spawn(config, app, &shutdown));

    match bind(config, &pool, &shutdown).await {
        Ok((local_addr, admin_addr, tasks)) => {
            tracing::info!(
                address = %local_addr,
                workers = pool.worker_count(),
                admin = ?admin_addr,
                "Server ready"
            );
            Ok(RunningServer {
                local_addr,
                admin_addr,
                pool,
                shutdown,
                tasks,
            })
        }
        Err(e) => {
            shutdown.trigger();
            Err(e)
        }
    }
}

async fn bind(
    config: &ServerConfig,
    pool: &Arc<WorkerPool>,
    shutdown: &Shutdown,
) -> Result<(SocketAddr, Option<SocketAddr>, Vec<JoinHandle<()>>)> {
    let listener = Listener::bind(&config.listener).await?;
    let server = SessionServer::new(listener, ConnectionContext::new(Arc::clone(pool), config));
    let local_addr = server.local_addr()?;

    let admin = if config.admin.enabled {
        let listener = TcpListener::bind(&config.admin.bind_address).await?;
        let addr = listener.local_addr()?;
        Some((listener, addr))
    } else {
        None
    };

    let mut tasks = Vec::with_capacity(2);
    let server_shutdown = shutdown.subscribe();
    tasks.push(tokio::spawn(async move {
        if let Err(e) = server.run(server_shutdown).await {
            tracing::error!(error = %e, "Session server failed");
        }
    }));

    let admin_addr = admin.map(|(listener, addr)| {
        let state = AdminState::new(Arc::clone(pool), &config.admin.api_key);
        let admin_shutdown = shutdown.subscribe();
        tasks.push(tokio::spawn(async move {
            if let Err(e) = serve_admin(listener, state, admin_shutdown).await {
                tracing::error!(error = %e, "Admin API failed");
            }
        }));
        addr
    });

    Ok((local_addr, admin_addr, tasks))
}

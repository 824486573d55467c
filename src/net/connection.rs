//! Per-connection request loop.
//!
//! # Responsibilities
//! - Read until one complete request is buffered, parse it in place
//! - Route it to the worker owning the session (round-robin for new ones)
//! - Write the response and keep the connection alive when asked to
//! - Hand upgraded connections to the WebSocket channel loop
//! - Track open connections for graceful shutdown

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};

use crate::config::ServerConfig;
use crate::error::Error;
use crate::http::buffer::BufferView;
use crate::http::request::{parse, ParseError, ParseLimits, ParsedRequest, RequestLayout};
use crate::http::response::HttpResponse;
use crate::http::websocket;
use crate::observability::metrics;
use crate::session::SessionToken;
use crate::worker::{ChannelRegistration, Route, WorkerError, WorkerPool};

/// Global atomic counter for connection IDs.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection. Doubles as the WebSocket channel id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Counts open connections so shutdown can wait for them.
#[derive(Debug, Clone, Default)]
pub struct ConnectionTracker {
    active_count: Arc<AtomicU64>,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new connection. The guard decrements on drop.
    pub fn track(&self) -> ConnectionGuard {
        self.active_count.fetch_add(1, Ordering::SeqCst);
        ConnectionGuard {
            active_count: Arc::clone(&self.active_count),
            id: ConnectionId::new(),
        }
    }

    pub fn active_count(&self) -> u64 {
        self.active_count.load(Ordering::SeqCst)
    }

    /// Wait until every connection has closed or `deadline` passes. Returns
    /// whether all of them closed.
    pub async fn drain(&self, deadline: Duration) -> bool {
        let wait = async {
            while self.active_count() > 0 {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        };
        tokio::time::timeout(deadline, wait).await.is_ok()
    }
}

/// Lifetime of one tracked connection.
#[derive(Debug)]
pub struct ConnectionGuard {
    active_count: Arc<AtomicU64>,
    id: ConnectionId,
}

impl ConnectionGuard {
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.active_count.fetch_sub(1, Ordering::SeqCst);
        tracing::trace!(connection_id = %self.id, "Connection closed");
    }
}

/// Everything a connection task needs, shared by all of them.
#[derive(Debug)]
pub struct ConnectionContext {
    pub pool: Arc<WorkerPool>,
    pub limits: ParseLimits,
    pub keep_alive: Duration,
    pub outbound_queue: usize,
}

impl ConnectionContext {
    pub fn new(pool: Arc<WorkerPool>, config: &ServerConfig) -> Self {
        Self {
            pool,
            limits: config.parse_limits(),
            keep_alive: Duration::from_secs(config.listener.keep_alive_secs),
            outbound_queue: config.session.outbound_queue,
        }
    }
}

/// What to do with the connection after a response.
enum Next {
    KeepAlive,
    Close,
    Upgrade {
        token: SessionToken,
        outbound: mpsc::Receiver<Bytes>,
    },
}

/// Serve requests on `stream` until the peer closes, keep-alive ends, the
/// connection upgrades, or shutdown is signalled.
pub async fn serve_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    context: Arc<ConnectionContext>,
    guard: ConnectionGuard,
    mut shutdown: broadcast::Receiver<()>,
) {
    let id = guard.id();
    let mut buffer = BytesMut::with_capacity(4096);
    tracing::debug!(connection_id = %id, peer_addr = %peer, "Connection opened");

    loop {
        let parsed = parse(BufferView::new(&buffer), &context.limits).map(|request| *request.layout());
        let layout = match parsed {
            Ok(layout) => layout,
            Err(ParseError::Truncated) => {
                let read = tokio::select! {
                    read = tokio::time::timeout(context.keep_alive, stream.read_buf(&mut buffer)) => read,
                    _ = shutdown.recv() => break,
                };
                match read {
                    Ok(Ok(0)) => {
                        if !buffer.is_empty() {
                            tracing::debug!(connection_id = %id, pending = buffer.len(), "Peer closed mid-request");
                        }
                        break;
                    }
                    Ok(Ok(_)) => continue,
                    Ok(Err(e)) => {
                        tracing::debug!(connection_id = %id, error = %e, "Read failed");
                        break;
                    }
                    Err(_) => {
                        tracing::debug!(connection_id = %id, "Keep-alive timeout");
                        break;
                    }
                }
            }
            Err(e) => {
                tracing::warn!(connection_id = %id, peer_addr = %peer, code = e.code(), error = %e, "Rejected request");
                let response = HttpResponse::from_parse_error(&e);
                metrics::record_request("unknown", response.status(), Instant::now());
                let _ = stream.write_all(&response.to_bytes()).await;
                break;
            }
        };

        let request = buffer.split_to(layout.request_len()).freeze();
        let (response, next) = handle_request(&context, id, request, layout).await;
        if let Err(e) = stream.write_all(&response.to_bytes()).await {
            tracing::debug!(connection_id = %id, error = %e, "Write failed");
            break;
        }
        match next {
            Next::KeepAlive => continue,
            Next::Close => break,
            Next::Upgrade { token, outbound } => {
                let leftover = buffer.split().to_vec();
                let pool = Arc::clone(&context.pool);
                websocket::run_channel(stream, leftover, token, id.as_u64(), outbound, pool).await;
                return;
            }
        }
    }

    let _ = stream.shutdown().await;
}

async fn handle_request(
    context: &ConnectionContext,
    id: ConnectionId,
    request: Bytes,
    layout: RequestLayout,
) -> (HttpResponse, Next) {
    let start = Instant::now();
    let parsed = ParsedRequest::from_layout(BufferView::new(&request), layout);
    let method = parsed.method().as_str();
    let keep_alive = parsed.keep_alive();
    let route = Route::of(&parsed, &context.limits.session_prefix);

    let (response, upgrade) = match route {
        Route::Create => {
            let worker_id = context.pool.next_worker();
            (dispatch(context, worker_id, request.clone(), layout, None).await, None)
        }
        Route::NotFound | Route::MethodNotAllowed => (
            route.rejection().unwrap_or_else(|| HttpResponse::error(404, "not found")),
            None,
        ),
        _ => match route.token().and_then(SessionToken::decode) {
            None => (HttpResponse::from_error(&WorkerError::SessionNotFound.into()), None),
            Some(token) if matches!(route, Route::Upgrade(_)) => {
                let (outbound_tx, outbound_rx) = mpsc::channel(context.outbound_queue);
                let registration = ChannelRegistration {
                    id: id.as_u64(),
                    outbound: outbound_tx,
                };
                let response = dispatch(context, token.worker_id, request.clone(), layout, Some(registration)).await;
                (response, Some((token, outbound_rx)))
            }
            Some(token) => (dispatch(context, token.worker_id, request.clone(), layout, None).await, None),
        },
    };

    metrics::record_request(method, response.status(), start);
    tracing::debug!(connection_id = %id, method, status = response.status(), "Request served");

    let next = match upgrade {
        Some((token, outbound)) if response.status() == 101 => Next::Upgrade { token, outbound },
        _ if !keep_alive || response.closes_connection() => Next::Close,
        _ => Next::KeepAlive,
    };
    let response = match next {
        Next::Close if response.header("Connection").is_none() => response.with_header("Connection", "close"),
        _ => response,
    };
    (response, next)
}

async fn dispatch(
    context: &ConnectionContext,
    worker_id: u32,
    request: Bytes,
    layout: RequestLayout,
    channel: Option<ChannelRegistration>,
) -> HttpResponse {
    match context.pool.request(worker_id, request, layout, channel).await {
        Ok(response) => response,
        Err(e) => {
            tracing::error!(worker_id, error = %e, "Worker did not answer");
            HttpResponse::from_error(&Error::Worker(e))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_id_unique() {
        let id1 = ConnectionId::new();
        let id2 = ConnectionId::new();
        assert_ne!(id1, id2);
        assert!(id1.to_string().starts_with("conn-"));
    }

    #[tokio::test]
    async fn tracker_drains() {
        let tracker = ConnectionTracker::new();
        let guard = tracker.track();
        assert_eq!(tracker.active_count(), 1);
        assert!(!tracker.drain(Duration::from_millis(60)).await);

        drop(guard);
        assert!(tracker.drain(Duration::from_millis(60)).await);
    }
}

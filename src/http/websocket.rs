//! WebSocket session channel.
//!
//! # Responsibilities
//! - Take over a connection after the `101 Switching Protocols` response
//! - Route each incoming frame (one patch document) to the owning worker
//! - Reply with the generated patch in the same frame type
//! - Forward server-side pushes from the worker's outbound queue
//!
//! # Data Flow
//! ```text
//! Client ──frame──▶ channel ──WorkerPool::apply_patch──▶ owning worker
//! Client ◀─frame─── channel ◀──reply / outbound mpsc──── owning worker
//! ```
//!
//! # Design Decisions
//! - A failing document is answered with `{"error": ...}`; the channel stays open
//! - The outbound queue closing (session destroyed or bound elsewhere) ends
//!   the channel
//! - On exit the worker is told to unbind; the session itself survives

use std::sync::Arc;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::Role;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use crate::session::SessionToken;
use crate::worker::{WorkerError, WorkerPool};

/// Frame type a reply goes out as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameKind {
    Text,
    Binary,
}

fn frame(kind: FrameKind, payload: Bytes) -> Message {
    match kind {
        FrameKind::Text => Message::text(String::from_utf8_lossy(&payload).into_owned()),
        FrameKind::Binary => Message::binary(payload),
    }
}

fn error_frame(err: &WorkerError) -> Message {
    let body = match err {
        WorkerError::Patch(e) => e.to_json(),
        other => json!({ "error": other.to_string() }),
    };
    Message::text(body.to_string())
}

/// Run the channel on an upgraded stream. `leftover` holds bytes read past
/// the upgrade request. Returns when either side closes.
pub async fn run_channel<S>(
    stream: S,
    leftover: Vec<u8>,
    token: SessionToken,
    channel: u64,
    mut outbound: mpsc::Receiver<Bytes>,
    pool: Arc<WorkerPool>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let ws = WebSocketStream::from_partially_read(stream, leftover, Role::Server, None).await;
    let (mut sink, mut frames) = ws.split();
    tracing::debug!(session = token.app_session_id, channel, "Channel open");

    loop {
        let outgoing = tokio::select! {
            incoming = frames.next() => {
                let (kind, payload) = match incoming {
                    Some(Ok(Message::Text(text))) => (FrameKind::Text, Bytes::copy_from_slice(text.as_bytes())),
                    Some(Ok(Message::Binary(data))) => (FrameKind::Binary, data),
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        tracing::debug!(session = token.app_session_id, channel, error = %e, "Channel read failed");
                        break;
                    }
                };
                match pool.apply_patch(&token, channel, payload).await {
                    Ok(patch) => frame(kind, patch),
                    Err(e @ WorkerError::Patch(_)) => error_frame(&e),
                    Err(e) => {
                        let _ = sink.send(error_frame(&e)).await;
                        break;
                    }
                }
            }
            pushed = outbound.recv() => match pushed {
                Some(patch) => frame(FrameKind::Text, patch),
                None => break,
            },
        };

        if let Err(e) = sink.send(outgoing).await {
            tracing::debug!(session = token.app_session_id, channel, error = %e, "Channel write failed");
            break;
        }
    }

    let _ = sink.close().await;
    pool.unbind(&token, channel).await;
    tracing::debug!(session = token.app_session_id, channel, "Channel closed");
}

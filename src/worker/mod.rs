//! Session workers and the routing between them.
//!
//! # Data Flow
//! ```text
//! connection task
//!     → WorkerPool (token.worker_id, or round-robin for new sessions)
//!     → mpsc::Sender<WorkerCommand>
//!     → worker task: Worker::handle_* over its own SessionTable
//!     → oneshot reply (HttpResponse / patch bytes)
//!     → connection task writes to the socket
//! ```
//!
//! # Design Decisions
//! - A session is only ever touched by the worker that created it; other
//!   tasks reach it by sending a command, never by locking
//! - Workers own no sockets; they reply with bytes and the connection writes
//! - Idle sessions are swept on a periodic tick inside the worker loop

pub mod handler;
pub mod pool;

use thiserror::Error;

use crate::patch::PatchError;
use crate::session::SessionError;

pub use handler::{ChannelRegistration, Delivery, Route, Worker};
pub use pool::{WorkerCommand, WorkerPool};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum WorkerError {
    #[error("session not found")]
    SessionNotFound,

    #[error("no free session slots")]
    SlotsExhausted,

    #[error(transparent)]
    Patch(#[from] PatchError),

    #[error("worker {0} is unavailable")]
    WorkerUnavailable(u32),

    #[error("websocket channel disconnected")]
    ChannelDisconnected,
}

impl WorkerError {
    pub fn status(&self) -> u16 {
        match self {
            WorkerError::SessionNotFound => 404,
            WorkerError::SlotsExhausted | WorkerError::WorkerUnavailable(_) => 503,
            WorkerError::Patch(_) => 400,
            WorkerError::ChannelDisconnected => 500,
        }
    }
}

impl From<SessionError> for WorkerError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::SlotsExhausted { .. } => WorkerError::SlotsExhausted,
        }
    }
}

//! Crate-level error type.

use thiserror::Error;

use crate::config::loader::ConfigError;
use crate::http::request::ParseError;
use crate::net::listener::ListenerError;
use crate::patch::PatchError;
use crate::session::SessionError;
use crate::viewmodel::TreeError;
use crate::worker::WorkerError;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Tree(#[from] TreeError),

    #[error(transparent)]
    Patch(#[from] PatchError),

    #[error(transparent)]
    Worker(#[from] WorkerError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Listener(#[from] ListenerError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// HTTP status a client sees for this error.
    pub fn status(&self) -> u16 {
        match self {
            Error::Parse(e) => e.status(),
            Error::Session(SessionError::SlotsExhausted { .. }) => 503,
            Error::Tree(_) | Error::Patch(_) => 400,
            Error::Worker(e) => e.status(),
            Error::Config(_) | Error::Listener(_) | Error::Io(_) => 500,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

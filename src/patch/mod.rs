//! JSON-Patch codec between change logs and the wire.
//!
//! # Data Flow
//! ```text
//! outgoing: ViewModel::checkpoint() ──▶ encode() ──▶ [VersionState::stamp] ──▶ bytes
//! incoming: bytes ──▶ [VersionState::accept] ──▶ apply_elements() ──▶ ViewModel (Origin::Remote)
//! ```
//!
//! # Design Decisions
//! - Application stops at the first failing operation; earlier operations
//!   stay applied
//! - Errors carry the failing operation's index and JSON text, never session
//!   identifiers

pub mod codec;
pub mod operation;
pub mod version;

use serde_json::{json, Value};
use thiserror::Error;

pub use codec::{apply_elements, decode_and_apply, encode, parse_document, PatchDocument};
pub use operation::{PatchOp, PatchOperation};
pub use version::VersionState;

/// A patch document that could not be (fully) applied.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message}")]
pub struct PatchError {
    /// Index of the failing operation; `None` when the document itself is bad.
    pub operation_index: Option<usize>,
    pub message: String,
    /// JSON text of the failing operation.
    pub operation: Option<String>,
}

impl PatchError {
    pub fn document(message: impl Into<String>) -> Self {
        Self {
            operation_index: None,
            message: message.into(),
            operation: None,
        }
    }

    pub fn at(index: usize, element: &Value, message: impl Into<String>) -> Self {
        Self {
            operation_index: Some(index),
            message: message.into(),
            operation: Some(element.to_string()),
        }
    }

    /// Client-facing body: `{"error", "operationIndex", "operation"}`.
    pub fn to_json(&self) -> Value {
        json!({
            "error": self.message,
            "operationIndex": self.operation_index,
            "operation": self.operation,
        })
    }
}

//! Per-session view-model state.
//!
//! # Data Flow
//! ```text
//! server code ──set/add_element/remove──▶ ViewModel ──▶ ChangeLog
//!                                             │             │
//! client patch ──apply_* (Origin::Remote)─────┘             │
//!                                                           ▼
//!                                  checkpoint() ──▶ Vec<ChangeRecord> ──▶ patch::encode
//! ```
//!
//! # Design Decisions
//! - Nodes live in an arena owned by the tree; children are owned through
//!   their parent's child list and `parent` is a plain index
//! - Paths are JSON Pointers, derived on demand from parent links

pub mod change_log;
pub mod node;
pub mod pointer;
pub mod tree;

use thiserror::Error;

pub use change_log::{ChangeLog, ChangeOp, ChangeRecord};
pub use node::{Node, NodeId, NodeKind};
pub use tree::{Origin, ViewModel};

/// Errors from addressing or mutating a view-model.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TreeError {
    #[error("invalid JSON pointer: {0:?}")]
    InvalidPointer(String),

    #[error("path not found: {0}")]
    PathNotFound(String),

    #[error("not a container: {path}")]
    NotAContainer { path: String },

    #[error("index {index} out of bounds at {path}")]
    IndexOutOfBounds { path: String, index: usize },

    #[error("type mismatch at {path}: expected {expected}, found {found}")]
    TypeMismatch {
        path: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("invalid target: {0:?}")]
    InvalidTarget(String),
}

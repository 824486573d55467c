//! Client sessions and their tokens.
//!
//! # Data Flow
//! ```text
//! token text ──SessionToken::decode──▶ SessionToken ──worker_id──▶ owning worker
//!                                                                      │
//!                                        SessionTable::resolve ◀───────┘
//!                                                │
//!                                       SessionSlot { salts, ViewModel, Binding }
//! ```
//!
//! # Design Decisions
//! - Each worker owns its own [`SessionTable`]; tables are never shared
//! - The application session id counter in [`id`] is the only process-wide
//!   mutable state
//! - A token is valid only while both of its salts match the slot

pub mod id;
pub mod table;
pub mod token;

use thiserror::Error;

pub use table::{Binding, BindingState, SessionSlot, SessionTable, TableStats};
pub use token::SessionToken;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("no free session slots (capacity {capacity})")]
    SlotsExhausted { capacity: usize },
}

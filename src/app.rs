//! Seam between the session server and the application it serves.

use serde_json::{Map, Value};

use crate::patch::PatchOperation;
use crate::viewmodel::ViewModel;

/// Application logic behind every session.
///
/// Implementations are shared by all workers, so they hold no per-session
/// state: that lives in the [`ViewModel`] passed to each call.
pub trait Application: Send + Sync + 'static {
    /// State a new session starts from.
    fn initial_state(&self) -> Value {
        Value::Object(Map::new())
    }

    /// Called after each client operation has been applied. Mutations made
    /// here are server-side and show up in the response patch.
    fn on_input(&self, _vm: &mut ViewModel, _op: &PatchOperation) {}
}

/// Serves an empty object and ignores input.
#[derive(Debug, Default, Clone, Copy)]
pub struct EmptyApplication;

impl Application for EmptyApplication {}

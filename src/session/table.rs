//! Fixed-capacity table of session slots owned by one worker.

use std::collections::BTreeSet;
use std::time::Instant;

use bytes::Bytes;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::patch::VersionState;
use crate::session::id::{next_app_session_id, INVALID_APP_SESSION_ID};
use crate::session::token::SessionToken;
use crate::session::SessionError;
use crate::viewmodel::ViewModel;

/// Salt value no live slot ever carries.
pub const INVALID_SALT: u64 = 0;

/// How the client of a session is currently attached.
#[derive(Debug, Clone, Default)]
pub enum Binding {
    #[default]
    Unbound,
    /// Plain request/response access.
    Http,
    /// Persistent channel; `outbound` feeds the connection's writer.
    WebSocket { channel: u64, outbound: mpsc::Sender<Bytes> },
    /// The WebSocket went away. The session can be resumed over HTTP.
    Closed,
}

/// Shape of a [`Binding`] without the channel handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BindingState {
    Unbound,
    Http,
    WebSocket,
    Closed,
}

impl Binding {
    pub fn state(&self) -> BindingState {
        match self {
            Binding::Unbound => BindingState::Unbound,
            Binding::Http => BindingState::Http,
            Binding::WebSocket { .. } => BindingState::WebSocket,
            Binding::Closed => BindingState::Closed,
        }
    }
}

/// One entry of a worker's table.
#[derive(Debug)]
pub struct SessionSlot {
    in_use: bool,
    salt: u64,
    app_session_id: u64,
    app_salt: u64,
    tree: Option<ViewModel>,
    pub binding: Binding,
    /// Present when patch versioning is on.
    pub versions: Option<VersionState>,
    created: Instant,
    last_active: u64,
}

impl SessionSlot {
    fn empty() -> Self {
        Self {
            in_use: false,
            salt: INVALID_SALT,
            app_session_id: INVALID_APP_SESSION_ID,
            app_salt: INVALID_SALT,
            tree: None,
            binding: Binding::Unbound,
            versions: None,
            created: Instant::now(),
            last_active: 0,
        }
    }

    pub fn app_session_id(&self) -> u64 {
        self.app_session_id
    }

    pub fn created(&self) -> Instant {
        self.created
    }

    pub fn last_active(&self) -> u64 {
        self.last_active
    }

    /// The session's view-model. Every live slot has one.
    pub fn tree(&self) -> &ViewModel {
        match &self.tree {
            Some(tree) => tree,
            None => unreachable!("active session slot without a view-model"),
        }
    }

    pub fn tree_mut(&mut self) -> &mut ViewModel {
        match &mut self.tree {
            Some(tree) => tree,
            None => unreachable!("active session slot without a view-model"),
        }
    }

    /// Note plain HTTP access. A live WebSocket binding is kept.
    pub fn mark_http(&mut self) {
        if !matches!(self.binding, Binding::WebSocket { .. }) {
            self.binding = Binding::Http;
        }
    }

    fn matches(&self, token: &SessionToken) -> bool {
        self.in_use
            && self.salt == token.salt
            && self.app_salt == token.app_salt
            && self.app_session_id == token.app_session_id
    }
}

/// Per-worker counters reported by the admin API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TableStats {
    pub worker_id: u32,
    pub capacity: usize,
    pub active: usize,
    pub websocket_bound: usize,
}

/// Session slots of one worker. Never shared: the owning worker is the only
/// reader and writer.
#[derive(Debug)]
pub struct SessionTable {
    worker_id: u32,
    slots: Vec<SessionSlot>,
    free: BTreeSet<u32>,
    rng: StdRng,
    now_tick: u64,
    idle_timeout_ticks: Option<u64>,
    version_queue_limit: Option<usize>,
}

impl SessionTable {
    pub fn new(worker_id: u32, capacity: u32) -> Self {
        Self {
            worker_id,
            slots: (0..capacity).map(|_| SessionSlot::empty()).collect(),
            free: (0..capacity).collect(),
            rng: StdRng::from_entropy(),
            now_tick: 0,
            idle_timeout_ticks: None,
            version_queue_limit: None,
        }
    }

    /// Evict sessions idle for more than `ticks` on [`sweep_inactive`](Self::sweep_inactive).
    pub fn with_idle_timeout(mut self, ticks: u64) -> Self {
        self.idle_timeout_ticks = Some(ticks);
        self
    }

    /// Give every new session version-stamped patches.
    pub fn with_versioning(mut self, queue_limit: usize) -> Self {
        self.version_queue_limit = Some(queue_limit);
        self
    }

    pub fn worker_id(&self) -> u32 {
        self.worker_id
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn active(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    fn draw_salt(&mut self) -> u64 {
        loop {
            let salt: u64 = self.rng.gen();
            if salt != INVALID_SALT {
                return salt;
            }
        }
    }

    /// Take the lowest free slot and start a session in it, seeded with
    /// `initial_state` (an empty object when `None`).
    pub fn create_session(&mut self, initial_state: Option<&Value>) -> Result<SessionToken, SessionError> {
        let Some(index) = self.free.pop_first() else {
            return Err(SessionError::SlotsExhausted {
                capacity: self.slots.len(),
            });
        };
        let salt = self.draw_salt();
        let app_salt = self.draw_salt();
        let app_session_id = next_app_session_id();
        let now_tick = self.now_tick;
        let versions = self.version_queue_limit.map(VersionState::new);

        let slot = &mut self.slots[index as usize];
        *slot = SessionSlot {
            in_use: true,
            salt,
            app_session_id,
            app_salt,
            tree: Some(match initial_state {
                Some(state) => ViewModel::from_value(state),
                None => ViewModel::new(),
            }),
            binding: Binding::Unbound,
            versions,
            created: Instant::now(),
            last_active: now_tick,
        };

        Ok(SessionToken {
            salt,
            linear_index: index,
            worker_id: self.worker_id,
            app_session_id,
            app_salt,
        })
    }

    /// The live slot `token` was issued for, marked active at the current tick.
    pub fn resolve(&mut self, token: &SessionToken) -> Option<&mut SessionSlot> {
        if token.worker_id != self.worker_id {
            return None;
        }
        let now_tick = self.now_tick;
        let slot = self.slots.get_mut(token.linear_index as usize)?;
        if !slot.matches(token) {
            return None;
        }
        slot.last_active = now_tick;
        Some(slot)
    }

    /// End the session. Returns `false` for tokens that resolve to nothing.
    pub fn destroy(&mut self, token: &SessionToken) -> bool {
        if self.resolve(token).is_none() {
            return false;
        }
        self.release(token.linear_index);
        true
    }

    fn release(&mut self, index: u32) {
        let slot = &mut self.slots[index as usize];
        slot.in_use = false;
        slot.salt = INVALID_SALT;
        slot.app_session_id = INVALID_APP_SESSION_ID;
        slot.app_salt = INVALID_SALT;
        slot.binding = Binding::Unbound;
        slot.versions = None;
        slot.tree = None;
        self.free.insert(index);
    }

    /// Drop the WebSocket binding registered as `channel`, if it is still the
    /// current one. Returns whether a binding was closed.
    pub fn unbind(&mut self, token: &SessionToken, channel: u64) -> bool {
        let Some(slot) = self.resolve(token) else {
            return false;
        };
        match slot.binding {
            Binding::WebSocket { channel: bound, .. } if bound == channel => {
                slot.binding = Binding::Closed;
                true
            }
            _ => false,
        }
    }

    /// Advance the clock to `now_tick` and evict every session idle for longer
    /// than the idle timeout. Sessions bound to a WebSocket are kept. Returns
    /// the application session ids of evicted sessions.
    pub fn sweep_inactive(&mut self, now_tick: u64) -> Vec<u64> {
        self.now_tick = now_tick;
        let Some(timeout) = self.idle_timeout_ticks else {
            return Vec::new();
        };

        let expired: Vec<(u32, u64)> = self
            .slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| {
                slot.in_use
                    && !matches!(slot.binding, Binding::WebSocket { .. })
                    && now_tick.saturating_sub(slot.last_active) > timeout
            })
            .map(|(index, slot)| (index as u32, slot.app_session_id))
            .collect();

        for (index, _) in &expired {
            self.release(*index);
        }
        expired.into_iter().map(|(_, id)| id).collect()
    }

    pub fn stats(&self) -> TableStats {
        TableStats {
            worker_id: self.worker_id,
            capacity: self.slots.len(),
            active: self.active(),
            websocket_bound: self
                .slots
                .iter()
                .filter(|s| s.in_use && matches!(s.binding, Binding::WebSocket { .. }))
                .count(),
        }
    }
}

//! Optional version stamps on patch documents.
//!
//! Outgoing documents start with
//! `replace /_ver#s <local>` and `test /_ver#c$ <remote>`; incoming documents
//! start with `replace /_ver#c$ <n>` and `test /_ver#s <seen>`. A client
//! document is applied only when `n == remote + 1`; documents from the future
//! wait in a bounded queue until the gap closes.

use std::collections::BTreeMap;

use serde_json::{json, Value};

use crate::patch::codec::{parse_document, PatchDocument};
use crate::patch::operation::{PatchOp, PatchOperation};
use crate::patch::PatchError;

pub const SERVER_VERSION_PATH: &str = "/_ver#s";
pub const CLIENT_VERSION_PATH: &str = "/_ver#c$";
pub const DEFAULT_QUEUE_LIMIT: usize = 16;

/// Client operations cleared for application, in version order.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadyDocument {
    pub version: u64,
    /// Elements after the two version stamps.
    pub elements: Vec<Value>,
}

impl ReadyDocument {
    /// Index of `elements[0]` in the document the client sent.
    pub const FIRST_INDEX: usize = 2;
}

/// Version bookkeeping of one session.
#[derive(Debug, Clone)]
pub struct VersionState {
    local: u64,
    remote: u64,
    queue: BTreeMap<u64, Vec<Value>>,
    queue_limit: usize,
}

impl Default for VersionState {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_LIMIT)
    }
}

impl VersionState {
    pub fn new(queue_limit: usize) -> Self {
        Self {
            local: 0,
            remote: 0,
            queue: BTreeMap::new(),
            queue_limit,
        }
    }

    pub fn local(&self) -> u64 {
        self.local
    }

    pub fn remote(&self) -> u64 {
        self.remote
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Bump the local version and prefix the document with both stamps.
    pub fn stamp(&mut self, document: &mut PatchDocument) {
        self.local += 1;
        document.prepend([
            PatchOperation::new(PatchOp::Replace, SERVER_VERSION_PATH, Some(json!(self.local))),
            PatchOperation::new(PatchOp::Test, CLIENT_VERSION_PATH, Some(json!(self.remote))),
        ]);
    }

    /// Check the stamps of an incoming document. Returns every document that
    /// became applicable, which is empty when this one had to be queued.
    pub fn accept(&mut self, bytes: &[u8]) -> Result<Vec<ReadyDocument>, PatchError> {
        let mut elements = parse_document(bytes)?;
        if elements.len() < ReadyDocument::FIRST_INDEX {
            return Err(PatchError::document("versioned patch must start with version operations"));
        }

        let version = stamp_value(&elements[0], 0, PatchOp::Replace, CLIENT_VERSION_PATH)?;
        let seen = stamp_value(&elements[1], 1, PatchOp::Test, SERVER_VERSION_PATH)?;
        if seen > self.local {
            return Err(PatchError::at(
                1,
                &elements[1],
                format!("server version {seen} was never sent"),
            ));
        }
        if version <= self.remote {
            return Err(PatchError::at(
                0,
                &elements[0],
                format!("remote version mismatch: expected {}, got {version}", self.remote + 1),
            ));
        }

        let rest = elements.split_off(ReadyDocument::FIRST_INDEX);
        if version > self.remote + 1 {
            if self.queue.len() >= self.queue_limit {
                return Err(PatchError::at(0, &elements[0], "too many out-of-order patches"));
            }
            self.queue.insert(version, rest);
            return Ok(Vec::new());
        }

        self.remote = version;
        let mut ready = vec![ReadyDocument {
            version,
            elements: rest,
        }];
        while let Some(elements) = self.queue.remove(&(self.remote + 1)) {
            self.remote += 1;
            ready.push(ReadyDocument {
                version: self.remote,
                elements,
            });
        }
        Ok(ready)
    }
}

fn stamp_value(element: &Value, index: usize, op: PatchOp, path: &str) -> Result<u64, PatchError> {
    let operation = PatchOperation::from_json(element).map_err(|msg| PatchError::at(index, element, msg))?;
    if operation.op != op || operation.path != path {
        return Err(PatchError::at(
            index,
            element,
            format!("expected {} {path}", op.as_str()),
        ));
    }
    operation
        .value
        .as_ref()
        .and_then(Value::as_u64)
        .ok_or_else(|| PatchError::at(index, element, "version must be a non-negative integer"))
}

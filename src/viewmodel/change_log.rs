//! Append-only record of view-model mutations between checkpoints.

use serde_json::Value;

/// Kind of a recorded mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOp {
    /// A path that did not exist before.
    Add,
    /// A new value at an existing path.
    Replace,
    /// A path that no longer exists.
    Remove,
}

/// One mutation: where, what kind, and the value right after it happened.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeRecord {
    pub path: String,
    pub op: ChangeOp,
    pub value: Option<Value>,
}

/// Ordered mutation records of one tree. Entries are only ever removed by
/// [`ChangeLog::drain`], which the tree calls on checkpoint.
#[derive(Debug, Clone, Default)]
pub struct ChangeLog {
    records: Vec<ChangeRecord>,
}

impl ChangeLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, path: String, op: ChangeOp, value: Option<Value>) {
        self.records.push(ChangeRecord { path, op, value });
    }

    pub fn records(&self) -> &[ChangeRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub(crate) fn drain(&mut self) -> Vec<ChangeRecord> {
        std::mem::take(&mut self.records)
    }
}

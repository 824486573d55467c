//! Single JSON-Patch operations.

use serde_json::{json, Value};

use crate::viewmodel::{ChangeOp, ChangeRecord};

/// Operation kinds understood by the protocol. `move` and `copy` are not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchOp {
    Add,
    Replace,
    Remove,
    /// Only used for version control stamps.
    Test,
}

impl PatchOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            PatchOp::Add => "add",
            PatchOp::Replace => "replace",
            PatchOp::Remove => "remove",
            PatchOp::Test => "test",
        }
    }

    fn parse(name: &str) -> Option<Self> {
        match name {
            "add" => Some(PatchOp::Add),
            "replace" => Some(PatchOp::Replace),
            "remove" => Some(PatchOp::Remove),
            "test" => Some(PatchOp::Test),
            _ => None,
        }
    }
}

impl From<ChangeOp> for PatchOp {
    fn from(op: ChangeOp) -> Self {
        match op {
            ChangeOp::Add => PatchOp::Add,
            ChangeOp::Replace => PatchOp::Replace,
            ChangeOp::Remove => PatchOp::Remove,
        }
    }
}

/// `{"op", "path", "value"?}`. `value` is `None` only for `remove`; an explicit
/// JSON `null` is `Some(Value::Null)`.
#[derive(Debug, Clone, PartialEq)]
pub struct PatchOperation {
    pub op: PatchOp,
    pub path: String,
    pub value: Option<Value>,
}

impl PatchOperation {
    pub fn new(op: PatchOp, path: impl Into<String>, value: Option<Value>) -> Self {
        Self {
            op,
            path: path.into(),
            value,
        }
    }

    /// Validate one element of an incoming document.
    pub fn from_json(element: &Value) -> Result<Self, String> {
        let Some(object) = element.as_object() else {
            return Err("operation must be a JSON object".to_string());
        };
        let op_name = object
            .get("op")
            .and_then(Value::as_str)
            .ok_or_else(|| "operation is missing \"op\"".to_string())?;
        let op = PatchOp::parse(op_name).ok_or_else(|| format!("unsupported operation {op_name:?}"))?;
        let path = object
            .get("path")
            .and_then(Value::as_str)
            .ok_or_else(|| "operation is missing \"path\"".to_string())?;
        let value = object.get("value").cloned();
        if value.is_none() && op != PatchOp::Remove {
            return Err(format!("{op_name} operation is missing \"value\""));
        }

        Ok(Self {
            op,
            path: path.to_string(),
            value: if op == PatchOp::Remove { None } else { value },
        })
    }

    pub fn to_json(&self) -> Value {
        let mut out = json!({ "op": self.op.as_str(), "path": self.path });
        if let (Some(value), Some(map)) = (&self.value, out.as_object_mut()) {
            map.insert("value".to_string(), value.clone());
        }
        out
    }
}

impl From<&ChangeRecord> for PatchOperation {
    fn from(record: &ChangeRecord) -> Self {
        Self {
            op: record.op.into(),
            path: record.path.clone(),
            value: record.value.clone(),
        }
    }
}

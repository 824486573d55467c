//! Arena nodes of a view-model tree.

use serde_json::Value;

/// Index of a node in its tree's arena. Only meaningful for the tree that
/// issued it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub(crate) u32);

impl NodeId {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// Shape of a node.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    /// Scalar value (null, bool, number, string).
    Leaf(Value),
    /// Named children; insertion order is kept for serialization.
    Object(Vec<(String, NodeId)>),
    /// Indexed children.
    Array(Vec<NodeId>),
}

impl NodeKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            NodeKind::Leaf(v) => value_type_name(v),
            NodeKind::Object(_) => "object",
            NodeKind::Array(_) => "array",
        }
    }

    /// Whether a client may overwrite this node with `value` without
    /// changing its shape. Null is interchangeable with any scalar; a null
    /// leaf may become anything.
    pub fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (NodeKind::Leaf(Value::Null), _) => true,
            (NodeKind::Leaf(_), Value::Null) => true,
            (NodeKind::Leaf(Value::Bool(_)), Value::Bool(_)) => true,
            (NodeKind::Leaf(Value::Number(_)), Value::Number(_)) => true,
            (NodeKind::Leaf(Value::String(_)), Value::String(_)) => true,
            (NodeKind::Object(_), Value::Object(_)) => true,
            (NodeKind::Array(_), Value::Array(_)) => true,
            _ => false,
        }
    }
}

pub fn value_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// One tree node. `parent` is a non-owning back reference; the parent's
/// child list is the owner.
#[derive(Debug, Clone)]
pub struct Node {
    pub(crate) parent: Option<NodeId>,
    pub(crate) kind: NodeKind,
    pub(crate) dirty: bool,
}

impl Node {
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn shape_compatibility() {
        let s = NodeKind::Leaf(json!("x"));
        assert!(s.accepts(&json!("y")));
        assert!(s.accepts(&Value::Null));
        assert!(!s.accepts(&json!(1)));
        assert!(!s.accepts(&json!({})));

        assert!(NodeKind::Leaf(Value::Null).accepts(&json!([1])));
        assert!(NodeKind::Object(Vec::new()).accepts(&json!({"a": 1})));
        assert!(!NodeKind::Array(Vec::new()).accepts(&json!({})));
    }
}

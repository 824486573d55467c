//! The mutable view-model tree.
//!
//! # Responsibilities
//! - Hold object/array/leaf nodes in an arena with parent back references
//! - Apply add/replace/remove at JSON Pointer paths
//! - Record server-side mutations in the tree's [`ChangeLog`]
//! - Track dirty nodes until the next checkpoint
//!
//! # Design Decisions
//! - One change log per tree, owned by the tree itself
//! - Client-originated mutations ([`Origin::Remote`]) are applied and marked
//!   dirty but not logged: the client already has them
//! - Records snapshot the value at mutation time, so replaying the log on an
//!   identical tree reproduces the same state
//! - Replacing a node keeps its shape whatever the origin: a replace that
//!   server code could log is one a client replay accepts

use serde_json::{Map, Value};

use crate::viewmodel::change_log::{ChangeLog, ChangeOp, ChangeRecord};
use crate::viewmodel::node::{value_type_name, Node, NodeId, NodeKind};
use crate::viewmodel::pointer::{format_pointer, parse_index, parse_pointer};
use crate::viewmodel::TreeError;

/// Who caused a mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Server-side code; logged for the next outgoing patch.
    Local,
    /// An incoming client patch; not logged.
    Remote,
}

/// Where a path's last token lands inside its parent container.
enum Slot {
    Member(Option<NodeId>),
    Item { index: usize, existing: Option<NodeId> },
}

/// Server-held state of one session.
#[derive(Debug, Clone)]
pub struct ViewModel {
    nodes: Vec<Option<Node>>,
    free: Vec<NodeId>,
    root: NodeId,
    log: ChangeLog,
}

impl Default for ViewModel {
    fn default() -> Self {
        Self::new()
    }
}

impl ViewModel {
    /// Tree with an empty object root.
    pub fn new() -> Self {
        Self::from_value(&Value::Object(Map::new()))
    }

    /// Tree holding `value`, clean and with an empty log.
    pub fn from_value(value: &Value) -> Self {
        let mut vm = Self {
            nodes: Vec::new(),
            free: Vec::new(),
            root: NodeId(0),
            log: ChangeLog::new(),
        };
        vm.root = vm.build(value, None);
        vm.clear_dirty();
        vm
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Number of live nodes.
    pub fn len(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Node behind `id`, or `None` once it has been removed.
    pub fn try_node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.index()).and_then(Option::as_ref)
    }

    pub(crate) fn node(&self, id: NodeId) -> &Node {
        match self.try_node(id) {
            Some(node) => node,
            None => panic!("dangling view-model node {:?}", id),
        }
    }

    fn node_mut(&mut self, id: NodeId) -> &mut Node {
        match self.nodes.get_mut(id.index()) {
            Some(Some(node)) => node,
            _ => panic!("dangling view-model node {:?}", id),
        }
    }

    /// Node addressed by `path`.
    pub fn node_id(&self, path: &str) -> Result<NodeId, TreeError> {
        let tokens = parse_pointer(path)?;
        self.resolve(&tokens)
    }

    /// Value at `path`.
    pub fn get(&self, path: &str) -> Result<Value, TreeError> {
        Ok(self.materialize(self.node_id(path)?))
    }

    pub fn contains(&self, path: &str) -> bool {
        self.node_id(path).is_ok()
    }

    pub fn is_dirty(&self, path: &str) -> Result<bool, TreeError> {
        Ok(self.node(self.node_id(path)?).dirty)
    }

    /// Path of a node, derived by walking parents up to the root.
    pub(crate) fn path_of(&self, id: NodeId) -> String {
        let mut tokens = Vec::new();
        let mut current = id;
        while let Some(parent) = self.node(current).parent {
            match &self.node(parent).kind {
                NodeKind::Object(members) => {
                    if let Some((key, _)) = members.iter().find(|(_, c)| *c == current) {
                        tokens.push(key.clone());
                    }
                }
                NodeKind::Array(items) => {
                    if let Some(index) = items.iter().position(|c| *c == current) {
                        tokens.push(index.to_string());
                    }
                }
                NodeKind::Leaf(_) => {}
            }
            current = parent;
        }
        tokens.reverse();
        format_pointer(&tokens)
    }

    /// Whole tree as a JSON value.
    pub fn to_value(&self) -> Value {
        self.materialize(self.root)
    }

    /// Complete JSON document, regardless of dirty state. Does not checkpoint.
    pub fn serialize_full(&self) -> Vec<u8> {
        self.to_value().to_string().into_bytes()
    }

    pub fn change_log(&self) -> &ChangeLog {
        &self.log
    }

    /// Drain the change log and mark every node clean.
    pub fn checkpoint(&mut self) -> Vec<ChangeRecord> {
        self.clear_dirty();
        self.log.drain()
    }

    /// Set `path` to `value`: replaces an existing member or element, adds a
    /// missing member, or appends when the index equals the array length.
    /// Replacing with a value of another kind is a `TypeMismatch`.
    pub fn set(&mut self, path: &str, value: Value) -> Result<(), TreeError> {
        let tokens = parse_pointer(path)?;
        let Some((last, parent_tokens)) = tokens.split_last() else {
            return self.replace_node(self.root, value, Origin::Local);
        };
        let parent = self.resolve(parent_tokens)?;
        match self.locate(parent, parent_tokens, last, false)? {
            Slot::Member(Some(existing)) | Slot::Item { existing: Some(existing), .. } => {
                self.replace_node(existing, value, Origin::Local)
            }
            Slot::Member(None) => {
                self.insert_member(parent, last, value, Origin::Local);
                Ok(())
            }
            Slot::Item { index, existing: None } => {
                self.insert_item(parent, index, value, Origin::Local);
                Ok(())
            }
        }
    }

    /// Append `value` to the array at `array_path`; returns its index.
    pub fn add_element(&mut self, array_path: &str, value: Value) -> Result<usize, TreeError> {
        let array = self.node_id(array_path)?;
        let index = match &self.node(array).kind {
            NodeKind::Array(items) => items.len(),
            _ => {
                return Err(TreeError::NotAContainer {
                    path: array_path.to_string(),
                })
            }
        };
        self.insert_item(array, index, value, Origin::Local);
        Ok(index)
    }

    /// Remove the member or element at `path`; returns the removed value.
    pub fn remove(&mut self, path: &str) -> Result<Value, TreeError> {
        self.apply_remove(path, Origin::Local)
    }

    /// JSON-Patch `add`: overwrite or create an object member, or insert into
    /// an array at an index (`-` appends).
    pub fn apply_add(&mut self, path: &str, value: Value, origin: Origin) -> Result<(), TreeError> {
        let tokens = parse_pointer(path)?;
        let Some((last, parent_tokens)) = tokens.split_last() else {
            return self.replace_node(self.root, value, origin);
        };
        let parent = self.resolve(parent_tokens)?;
        match self.locate(parent, parent_tokens, last, true)? {
            Slot::Member(Some(existing)) => self.replace_node(existing, value, origin),
            Slot::Member(None) => {
                self.insert_member(parent, last, value, origin);
                Ok(())
            }
            Slot::Item { index, .. } => {
                self.insert_item(parent, index, value, origin);
                Ok(())
            }
        }
    }

    /// JSON-Patch `replace`: the path must exist and the node keeps its shape.
    pub fn apply_replace(&mut self, path: &str, value: Value, origin: Origin) -> Result<(), TreeError> {
        let target = self.node_id(path)?;
        self.replace_node(target, value, origin)
    }

    /// JSON-Patch `remove`.
    pub fn apply_remove(&mut self, path: &str, origin: Origin) -> Result<Value, TreeError> {
        let tokens = parse_pointer(path)?;
        let Some((last, parent_tokens)) = tokens.split_last() else {
            return Err(TreeError::InvalidTarget(path.to_string()));
        };
        let parent = self.resolve(parent_tokens)?;
        let target = match self.locate(parent, parent_tokens, last, false)? {
            Slot::Member(Some(id)) | Slot::Item { existing: Some(id), .. } => id,
            _ => return Err(TreeError::PathNotFound(format_pointer(&tokens))),
        };

        let record_path = self.path_of(target);
        let removed = self.materialize(target);
        match &mut self.node_mut(parent).kind {
            NodeKind::Object(members) => members.retain(|(_, c)| *c != target),
            NodeKind::Array(items) => items.retain(|c| *c != target),
            NodeKind::Leaf(_) => {}
        }
        self.node_mut(parent).dirty = true;
        self.free_subtree(target);
        self.record(origin, record_path, ChangeOp::Remove, None);
        Ok(removed)
    }

    fn resolve<S: AsRef<str>>(&self, tokens: &[S]) -> Result<NodeId, TreeError> {
        let mut current = self.root;
        for (depth, token) in tokens.iter().enumerate() {
            let token = token.as_ref();
            let next = match &self.node(current).kind {
                NodeKind::Object(members) => members.iter().find(|(k, _)| k == token).map(|(_, id)| *id),
                NodeKind::Array(items) => parse_index(token).and_then(|i| items.get(i).copied()),
                NodeKind::Leaf(_) => None,
            };
            current = next.ok_or_else(|| TreeError::PathNotFound(format_pointer(&tokens[..=depth])))?;
        }
        Ok(current)
    }

    fn locate(
        &self,
        parent: NodeId,
        parent_tokens: &[String],
        token: &str,
        allow_dash: bool,
    ) -> Result<Slot, TreeError> {
        match &self.node(parent).kind {
            NodeKind::Object(members) => Ok(Slot::Member(
                members.iter().find(|(k, _)| k == token).map(|(_, id)| *id),
            )),
            NodeKind::Array(items) => {
                let index = if allow_dash && token == "-" {
                    items.len()
                } else {
                    parse_index(token).ok_or_else(|| {
                        let mut path = format_pointer(parent_tokens);
                        path.push('/');
                        path.push_str(token);
                        TreeError::PathNotFound(path)
                    })?
                };
                if index > items.len() {
                    return Err(TreeError::IndexOutOfBounds {
                        path: format_pointer(parent_tokens),
                        index,
                    });
                }
                Ok(Slot::Item {
                    index,
                    existing: items.get(index).copied(),
                })
            }
            NodeKind::Leaf(_) => Err(TreeError::NotAContainer {
                path: format_pointer(parent_tokens),
            }),
        }
    }

    fn replace_node(&mut self, target: NodeId, value: Value, origin: Origin) -> Result<(), TreeError> {
        let kind = &self.node(target).kind;
        if !kind.accepts(&value) {
            return Err(TreeError::TypeMismatch {
                path: self.path_of(target),
                expected: kind.type_name(),
                found: value_type_name(&value),
            });
        }

        let path = self.path_of(target);
        let recorded = self.snapshot(origin, &value);
        let scalar_in_place = matches!(kind, NodeKind::Leaf(_)) && !value.is_object() && !value.is_array();

        if scalar_in_place {
            let node = self.node_mut(target);
            node.kind = NodeKind::Leaf(value);
            node.dirty = true;
        } else {
            let parent = self.node(target).parent;
            let replacement = self.build(&value, parent);
            match parent {
                Some(p) => self.swap_child(p, target, replacement),
                None => self.root = replacement,
            }
            self.free_subtree(target);
        }

        self.record(origin, path, ChangeOp::Replace, recorded);
        Ok(())
    }

    fn insert_member(&mut self, parent: NodeId, key: &str, value: Value, origin: Origin) {
        let recorded = self.snapshot(origin, &value);
        let child = self.build(&value, Some(parent));
        if let NodeKind::Object(members) = &mut self.node_mut(parent).kind {
            members.push((key.to_string(), child));
        }
        let path = self.path_of(child);
        self.record(origin, path, ChangeOp::Add, recorded);
    }

    fn insert_item(&mut self, parent: NodeId, index: usize, value: Value, origin: Origin) {
        let recorded = self.snapshot(origin, &value);
        let child = self.build(&value, Some(parent));
        if let NodeKind::Array(items) = &mut self.node_mut(parent).kind {
            items.insert(index, child);
        }
        let path = self.path_of(child);
        self.record(origin, path, ChangeOp::Add, recorded);
    }

    fn swap_child(&mut self, parent: NodeId, old: NodeId, new: NodeId) {
        match &mut self.node_mut(parent).kind {
            NodeKind::Object(members) => {
                if let Some(slot) = members.iter_mut().find(|(_, c)| *c == old) {
                    slot.1 = new;
                }
            }
            NodeKind::Array(items) => {
                if let Some(slot) = items.iter_mut().find(|c| **c == old) {
                    *slot = new;
                }
            }
            NodeKind::Leaf(_) => {}
        }
    }

    fn snapshot(&self, origin: Origin, value: &Value) -> Option<Value> {
        match origin {
            Origin::Local => Some(value.clone()),
            Origin::Remote => None,
        }
    }

    fn record(&mut self, origin: Origin, path: String, op: ChangeOp, value: Option<Value>) {
        if origin == Origin::Local {
            self.log.push(path, op, value);
        }
    }

    fn alloc(&mut self, node: Node) -> NodeId {
        match self.free.pop() {
            Some(id) => {
                self.nodes[id.index()] = Some(node);
                id
            }
            None => {
                self.nodes.push(Some(node));
                NodeId((self.nodes.len() - 1) as u32)
            }
        }
    }

    fn build(&mut self, value: &Value, parent: Option<NodeId>) -> NodeId {
        let kind = match value {
            Value::Object(_) => NodeKind::Object(Vec::new()),
            Value::Array(_) => NodeKind::Array(Vec::new()),
            scalar => NodeKind::Leaf(scalar.clone()),
        };
        let id = self.alloc(Node {
            parent,
            kind,
            dirty: true,
        });

        match value {
            Value::Object(map) => {
                for (key, child_value) in map {
                    let child = self.build(child_value, Some(id));
                    if let NodeKind::Object(members) = &mut self.node_mut(id).kind {
                        members.push((key.clone(), child));
                    }
                }
            }
            Value::Array(values) => {
                for child_value in values {
                    let child = self.build(child_value, Some(id));
                    if let NodeKind::Array(items) = &mut self.node_mut(id).kind {
                        items.push(child);
                    }
                }
            }
            _ => {}
        }
        id
    }

    fn free_subtree(&mut self, id: NodeId) {
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if let Some(node) = self.nodes[current.index()].take() {
                match node.kind {
                    NodeKind::Object(members) => stack.extend(members.into_iter().map(|(_, c)| c)),
                    NodeKind::Array(items) => stack.extend(items),
                    NodeKind::Leaf(_) => {}
                }
                self.free.push(current);
            }
        }
    }

    fn materialize(&self, id: NodeId) -> Value {
        match &self.node(id).kind {
            NodeKind::Leaf(value) => value.clone(),
            NodeKind::Object(members) => {
                let mut map = Map::with_capacity(members.len());
                for (key, child) in members {
                    map.insert(key.clone(), self.materialize(*child));
                }
                Value::Object(map)
            }
            NodeKind::Array(items) => Value::Array(items.iter().map(|c| self.materialize(*c)).collect()),
        }
    }

    fn clear_dirty(&mut self) {
        for node in self.nodes.iter_mut().flatten() {
            node.dirty = false;
        }
    }
}

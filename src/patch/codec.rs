use serde_json::Value;

use crate::patch::operation::{PatchOp, PatchOperation};
use crate::patch::PatchError;
use crate::viewmodel::{ChangeRecord, Origin, ViewModel};

/// Ordered list of operations, ready to go on the wire.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PatchDocument {
    operations: Vec<PatchOperation>,
}

impl PatchDocument {
    pub fn new(operations: Vec<PatchOperation>) -> Self {
        Self { operations }
    }

    pub fn operations(&self) -> &[PatchOperation] {
        &self.operations
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Put `operations` in front of the existing ones.
    pub fn prepend(&mut self, operations: impl IntoIterator<Item = PatchOperation>) {
        let mut head: Vec<PatchOperation> = operations.into_iter().collect();
        head.append(&mut self.operations);
        self.operations = head;
    }

    pub fn to_json(&self) -> Value {
        Value::Array(self.operations.iter().map(PatchOperation::to_json).collect())
    }

    /// Compact JSON array.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.to_json().to_string().into_bytes()
    }
}

/// One operation per record, in log order. An empty log is an empty document.
pub fn encode(records: &[ChangeRecord]) -> PatchDocument {
    PatchDocument::new(records.iter().map(PatchOperation::from).collect())
}

/// Parse an incoming document into its raw elements.
pub fn parse_document(bytes: &[u8]) -> Result<Vec<Value>, PatchError> {
    match serde_json::from_slice::<Value>(bytes) {
        Ok(Value::Array(elements)) => Ok(elements),
        Ok(_) => Err(PatchError::document("patch document must be a JSON array")),
        Err(e) => Err(PatchError::document(format!("patch document is not valid JSON: {e}"))),
    }
}

/// Validate and apply `elements` in order as client changes, calling
/// `on_applied` after each one. `first_index` is the position of
/// `elements[0]` in the original document.
///
/// Stops at the first failure. Operations applied before it stay applied.
pub fn apply_elements<F>(
    tree: &mut ViewModel,
    elements: &[Value],
    first_index: usize,
    mut on_applied: F,
) -> Result<usize, PatchError>
where
    F: FnMut(&mut ViewModel, &PatchOperation),
{
    for (offset, element) in elements.iter().enumerate() {
        let index = first_index + offset;
        let operation = PatchOperation::from_json(element).map_err(|msg| PatchError::at(index, element, msg))?;
        apply_operation(tree, &operation).map_err(|msg| PatchError::at(index, element, msg))?;
        on_applied(tree, &operation);
    }
    Ok(elements.len())
}

/// Parse `bytes` and apply every operation to `tree`. Returns the number of
/// operations applied.
pub fn decode_and_apply(tree: &mut ViewModel, bytes: &[u8]) -> Result<usize, PatchError> {
    let elements = parse_document(bytes)?;
    apply_elements(tree, &elements, 0, |_, _| {})
}

fn apply_operation(tree: &mut ViewModel, operation: &PatchOperation) -> Result<(), String> {
    let value = || operation.value.clone().unwrap_or(Value::Null);
    let result = match operation.op {
        PatchOp::Add => tree.apply_add(&operation.path, value(), Origin::Remote),
        PatchOp::Replace => tree.apply_replace(&operation.path, value(), Origin::Remote),
        PatchOp::Remove => tree.apply_remove(&operation.path, Origin::Remote).map(|_| ()),
        PatchOp::Test => return Err("test operations are only valid as version stamps".to_string()),
    };
    result.map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn encodes_log_then_checkpoint_empties_it() {
        let mut vm = ViewModel::new();
        vm.set("/name", json!("Joe")).unwrap();

        let doc = encode(&vm.checkpoint());
        assert_eq!(doc.to_bytes(), br#"[{"op":"add","path":"/name","value":"Joe"}]"#.to_vec());

        assert_eq!(encode(&vm.checkpoint()).to_bytes(), b"[]".to_vec());
    }

    #[test]
    fn repeated_checkpoints_yield_empty_patches() {
        let mut vm = ViewModel::from_value(&json!({"a": 1}));
        vm.set("/a", json!(2)).unwrap();
        vm.checkpoint();
        assert!(encode(&vm.checkpoint()).is_empty());
        assert!(encode(&vm.checkpoint()).is_empty());
    }

    #[test]
    fn stops_at_first_failure() {
        let mut vm = ViewModel::from_value(&json!({"a": 1}));
        let err = decode_and_apply(
            &mut vm,
            br#"[{"op":"replace","path":"/missing/x","value":1}]"#,
        )
        .unwrap_err();
        assert_eq!(err.operation_index, Some(0));
        assert!(err.message.contains("/missing"));
        assert_eq!(vm.to_value(), json!({"a": 1}));
    }

    #[test]
    fn earlier_operations_stay_applied() {
        let mut vm = ViewModel::from_value(&json!({"a": 1}));
        let err = decode_and_apply(
            &mut vm,
            br#"[{"op":"replace","path":"/a","value":2},{"op":"copy","from":"/a","path":"/b"}]"#,
        )
        .unwrap_err();
        assert_eq!(err.operation_index, Some(1));
        assert_eq!(err.operation.as_deref(), Some(r#"{"op":"copy","from":"/a","path":"/b"}"#));
        assert_eq!(vm.get("/a").unwrap(), json!(2));
    }

    #[test]
    fn rejects_non_array_documents() {
        let mut vm = ViewModel::new();
        let err = decode_and_apply(&mut vm, br#"{"op":"add"}"#).unwrap_err();
        assert_eq!(err.operation_index, None);
        assert!(decode_and_apply(&mut vm, b"not json").is_err());
        assert_eq!(decode_and_apply(&mut vm, b"[]").unwrap(), 0);
    }

    #[test]
    fn on_applied_sees_every_operation() {
        let mut vm = ViewModel::new();
        let elements = parse_document(br#"[{"op":"add","path":"/x","value":1},{"op":"add","path":"/y","value":2}]"#)
            .unwrap();
        let mut seen = Vec::new();
        let applied = apply_elements(&mut vm, &elements, 0, |_, op| seen.push(op.path.clone())).unwrap();
        assert_eq!(applied, 2);
        assert_eq!(seen, vec!["/x", "/y"]);
    }

    #[test]
    fn kind_changes_are_refused_before_logging() {
        let start = json!({"n": 1, "o": {"a": 1}, "z": null});
        let mut direct = ViewModel::from_value(&start);
        assert!(direct.set("/n", json!("one")).is_err());
        assert!(direct.set("/o", json!(5)).is_err());
        direct.set("/z", json!({"k": [true]})).unwrap();
        direct.set("/n", Value::Null).unwrap();

        let bytes = encode(&direct.checkpoint()).to_bytes();
        let mut replayed = ViewModel::from_value(&start);
        assert_eq!(decode_and_apply(&mut replayed, &bytes).unwrap(), 2);
        assert_eq!(replayed.to_value(), direct.to_value());
    }

    const KEYS: [&str; 3] = ["/a", "/s~1b", "/nested"];

    #[derive(Debug, Clone)]
    enum Mutation {
        Set(usize, Value),
        SetChild(usize, Value),
        Push(Value),
        SetItem(usize, Value),
        Remove(usize),
        PopFront,
    }

    fn value() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::from),
            any::<i64>().prop_map(Value::from),
            "[a-z~/]{0,6}".prop_map(Value::from),
            any::<i64>().prop_map(|v| json!({"v": v, "w": [v]})),
            prop::collection::vec(any::<i64>(), 0..3).prop_map(|v| json!(v)),
        ]
    }

    fn mutation() -> impl Strategy<Value = Mutation> {
        prop_oneof![
            (0..KEYS.len(), value()).prop_map(|(k, v)| Mutation::Set(k, v)),
            (0..KEYS.len(), value()).prop_map(|(k, v)| Mutation::SetChild(k, v)),
            value().prop_map(Mutation::Push),
            (0..3usize, value()).prop_map(|(i, v)| Mutation::SetItem(i, v)),
            (0..KEYS.len()).prop_map(Mutation::Remove),
            Just(Mutation::PopFront),
        ]
    }

    fn apply(vm: &mut ViewModel, m: &Mutation) {
        // Failures (removing something absent, changing a node's kind) are
        // part of the sequence and leave no record.
        let _ = match m {
            Mutation::Set(k, v) => vm.set(KEYS[*k], v.clone()),
            Mutation::SetChild(k, v) => vm.set(&format!("{}/v", KEYS[*k]), v.clone()),
            Mutation::Push(v) => vm.add_element("/list", v.clone()).map(|_| ()),
            Mutation::SetItem(i, v) => vm.set(&format!("/list/{i}"), v.clone()),
            Mutation::Remove(k) => vm.remove(KEYS[*k]).map(|_| ()),
            Mutation::PopFront => vm.remove("/list/0").map(|_| ()),
        };
    }

    proptest! {
        #[test]
        fn replaying_encoded_log_matches_direct_mutation(mutations in prop::collection::vec(mutation(), 0..40)) {
            let start = json!({"list": []});
            let mut direct = ViewModel::from_value(&start);
            for m in &mutations {
                apply(&mut direct, m);
            }

            let bytes = encode(&direct.checkpoint()).to_bytes();
            let mut replayed = ViewModel::from_value(&start);
            decode_and_apply(&mut replayed, &bytes).unwrap();

            prop_assert_eq!(replayed.to_value(), direct.to_value());
        }
    }
}

use serde_json::{Map, Value};

/// Ordered set of dotted-field-path updates applied to a JSON document.
///
/// Each update replaces the targeted field wholesale; concurrent patches to
/// different paths both land, concurrent patches to the same path resolve
/// last-write-wins. This mirrors the merge semantics of the backing document
/// service, so code written against [`MemoryStore`](super::MemoryStore)
/// behaves the same against a real backend.
#[derive(Debug, Clone, Default)]
pub struct Patch {
    ops: Vec<(String, Value)>,
}

impl Patch {
    /// Start an empty patch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `path = value`. Intermediate objects are created on demand when
    /// the patch is applied; a later `set` on the same path wins.
    pub fn set(mut self, path: impl Into<String>, value: Value) -> Self {
        self.ops.push((path.into(), value));
        self
    }

    /// Whether the patch carries no updates.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// The queued updates in insertion order.
    pub fn ops(&self) -> &[(String, Value)] {
        &self.ops
    }

    /// Apply every queued update to `target` in insertion order.
    pub fn apply(&self, target: &mut Value) {
        for (path, value) in &self.ops {
            set_field(target, path, value.clone());
        }
    }
}

/// Replace the field at `path` inside `target`, materializing intermediate
/// objects. A non-object intermediate is overwritten, so the last write wins
/// on the whole subtree.
fn set_field(target: &mut Value, path: &str, value: Value) {
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    let Value::Object(map) = target else {
        return;
    };
    match path.split_once('.') {
        Some((head, tail)) => {
            let slot = map.entry(head.to_string()).or_insert(Value::Null);
            set_field(slot, tail, value);
        }
        None => {
            map.insert(path.to_string(), value);
        }
    }
}

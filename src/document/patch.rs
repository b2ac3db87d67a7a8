//! Shallow patches over top-level document fields
//!
//! Used both as the input of `stage_update` (merge into the current
//! document) and as the diff carried by update events.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::Attributes;

/// Change to a single top-level field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", content = "value", rename_all = "snake_case")]
pub enum FieldChange {
    Set(Value),
    Remove,
}

/// Ordered set of top-level field changes
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Patch {
    changes: BTreeMap<String, FieldChange>,
}

impl Patch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `field` to `value`
    pub fn set(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.changes.insert(field.into(), FieldChange::Set(value.into()));
        self
    }

    /// Remove `field`
    pub fn remove(mut self, field: impl Into<String>) -> Self {
        self.changes.insert(field.into(), FieldChange::Remove);
        self
    }

    /// Merge-patch convenience: every key of `object` is set, except `null`
    /// values which remove the field. Non-object values yield an empty patch.
    pub fn from_merge(object: &Value) -> Self {
        let mut patch = Patch::new();
        if let Value::Object(map) = object {
            for (field, value) in map {
                patch = if value.is_null() {
                    patch.remove(field.clone())
                } else {
                    patch.set(field.clone(), value.clone())
                };
            }
        }
        patch
    }

    /// Top-level diff turning `old` into `new`
    pub fn diff(old: &Attributes, new: &Attributes) -> Self {
        let mut changes = BTreeMap::new();
        for (field, value) in new {
            if old.get(field) != Some(value) {
                changes.insert(field.clone(), FieldChange::Set(value.clone()));
            }
        }
        for field in old.keys() {
            if !new.contains_key(field) {
                changes.insert(field.clone(), FieldChange::Remove);
            }
        }
        Self { changes }
    }

    /// Apply onto `attributes` in place
    pub fn apply_to(&self, attributes: &mut Attributes) {
        for (field, change) in &self.changes {
            match change {
                FieldChange::Set(value) => {
                    attributes.insert(field.clone(), value.clone());
                }
                FieldChange::Remove => {
                    attributes.remove(field);
                }
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn get(&self, field: &str) -> Option<&FieldChange> {
        self.changes.get(field)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &FieldChange)> {
        self.changes.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn attrs(v: Value) -> Attributes {
        match v {
            Value::Object(m) => m,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_apply_sets_and_removes() {
        let mut doc = attrs(json!({"name": "Alice", "age": 30}));
        Patch::new().set("name", "Bob").remove("age").apply_to(&mut doc);
        assert_eq!(Value::Object(doc), json!({"name": "Bob"}));
    }

    #[test]
    fn test_diff_round_trips() {
        let old = attrs(json!({"name": "Alice", "age": 30, "city": "Oslo"}));
        let new = attrs(json!({"name": "Bob", "city": "Oslo", "email": "b@x"}));
        let patch = Patch::diff(&old, &new);

        assert_eq!(patch.len(), 3);
        assert_eq!(patch.get("age"), Some(&FieldChange::Remove));
        assert!(patch.get("city").is_none());

        let mut applied = old.clone();
        patch.apply_to(&mut applied);
        assert_eq!(applied, new);
    }

    #[test]
    fn test_from_merge_null_removes() {
        let patch = Patch::from_merge(&json!({"a": 1, "b": null}));
        assert_eq!(patch.get("a"), Some(&FieldChange::Set(json!(1))));
        assert_eq!(patch.get("b"), Some(&FieldChange::Remove));
    }

    #[test]
    fn test_serialized_shape() {
        let patch = Patch::new().set("name", "Bob").remove("age");
        let value = serde_json::to_value(&patch).unwrap();
        assert_eq!(
            value,
            json!({"changes": {"age": {"op": "remove"}, "name": {"op": "set", "value": "Bob"}}})
        );
    }
}

//! Documents, identifiers and patches
//!
//! A document is an explicit value: an identifier plus a mapping of
//! top-level fields. References to other documents are values of the form
//! `{"$ref": "<TYPE>_<id>"}`.

mod id;
mod patch;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use id::{Collection, DocumentId};
pub use patch::{FieldChange, Patch};

/// Top-level fields of a document
pub type Attributes = serde_json::Map<String, Value>;

/// Key marking a reference value
pub const REFERENCE_KEY: &str = "$ref";

/// Fixed bookkeeping overhead charged per resident cache entry
pub const ENTRY_OVERHEAD_BYTES: usize = 96;

/// A stored document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    id: DocumentId,
    attributes: Attributes,
}

impl Document {
    pub fn new(id: DocumentId, attributes: Attributes) -> Self {
        Self { id, attributes }
    }

    /// Build from a JSON value. Non-object values yield an empty document.
    pub fn from_value(id: DocumentId, value: Value) -> Self {
        let attributes = match value {
            Value::Object(map) => map,
            _ => Attributes::new(),
        };
        Self { id, attributes }
    }

    pub fn id(&self) -> &DocumentId {
        &self.id
    }

    pub fn collection(&self) -> Collection {
        self.id.collection()
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    pub fn into_attributes(self) -> Attributes {
        self.attributes
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.attributes.get(field)
    }

    /// Document with `patch` merged in
    pub fn patched(&self, patch: &Patch) -> Document {
        let mut attributes = self.attributes.clone();
        patch.apply_to(&mut attributes);
        Document {
            id: self.id.clone(),
            attributes,
        }
    }

    /// Shallow equality match: every field of `pattern` is present with an
    /// equal value
    pub fn matches_pattern(&self, pattern: &Attributes) -> bool {
        matches_pattern(&self.attributes, pattern)
    }

    /// Identifiers referenced by top-level `{"$ref": id}` fields, and by such
    /// values inside top-level arrays
    pub fn references(&self) -> Vec<DocumentId> {
        let mut refs = Vec::new();
        for value in self.attributes.values() {
            match value {
                Value::Array(items) => refs.extend(items.iter().filter_map(reference_target)),
                other => refs.extend(reference_target(other)),
            }
        }
        refs
    }

    /// Estimated resident size in bytes
    pub fn estimated_size(&self) -> usize {
        estimated_size(&self.id, &self.attributes)
    }

    /// JSON value with the identifier under `id`, as handed to outer layers
    pub fn to_value(&self) -> Value {
        let mut map = self.attributes.clone();
        map.insert("id".into(), Value::String(self.id.to_string()));
        Value::Object(map)
    }
}

/// Build a reference value pointing at `id`
pub fn reference(id: &DocumentId) -> Value {
    let mut map = Attributes::new();
    map.insert(REFERENCE_KEY.into(), Value::String(id.to_string()));
    Value::Object(map)
}

fn reference_target(value: &Value) -> Option<DocumentId> {
    let map = value.as_object()?;
    if map.len() != 1 {
        return None;
    }
    map.get(REFERENCE_KEY)?
        .as_str()
        .and_then(|raw| DocumentId::parse(raw).ok())
}

pub(crate) fn matches_pattern(attributes: &Attributes, pattern: &Attributes) -> bool {
    pattern
        .iter()
        .all(|(field, expected)| attributes.get(field) == Some(expected))
}

pub(crate) fn estimated_size(id: &DocumentId, attributes: &Attributes) -> usize {
    // Serializing a Map cannot fail
    let body = serde_json::to_vec(attributes).map(|v| v.len()).unwrap_or(0);
    body + id.as_str().len() + ENTRY_OVERHEAD_BYTES
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(id: &str, value: Value) -> Document {
        Document::from_value(DocumentId::parse(id).unwrap(), value)
    }

    #[test]
    fn test_pattern_match_is_shallow_equality() {
        let d = doc("USER_1", json!({"name": "Alice", "tags": ["a"], "age": 30}));
        let pattern = json!({"name": "Alice", "age": 30});
        assert!(d.matches_pattern(pattern.as_object().unwrap()));

        let pattern = json!({"name": "Alice", "age": 31});
        assert!(!d.matches_pattern(pattern.as_object().unwrap()));

        let pattern = json!({"missing": null});
        assert!(!d.matches_pattern(pattern.as_object().unwrap()));
    }

    #[test]
    fn test_references() {
        let order = DocumentId::parse("ORDER_1").unwrap();
        let item = DocumentId::parse("ITEM_9").unwrap();
        let d = doc(
            "PAYMENT_1",
            json!({"order": reference(&order), "items": [reference(&item), 3], "note": {"$ref": "bad id"}}),
        );
        let refs = d.references();
        assert_eq!(refs.len(), 2);
        assert!(refs.contains(&order));
        assert!(refs.contains(&item));
    }

    #[test]
    fn test_patched_keeps_identifier() {
        let d = doc("USER_1", json!({"name": "Alice"}));
        let p = d.patched(&Patch::new().set("name", "Bob"));
        assert_eq!(p.id(), d.id());
        assert_eq!(p.get("name"), Some(&json!("Bob")));
    }

    #[test]
    fn test_estimated_size_grows_with_body() {
        let small = doc("USER_1", json!({"a": 1}));
        let large = doc("USER_1", json!({"a": "x".repeat(1000)}));
        assert!(large.estimated_size() > small.estimated_size() + 900);
        assert!(small.estimated_size() > ENTRY_OVERHEAD_BYTES);
    }

    #[test]
    fn test_to_value_includes_id() {
        let d = doc("USER_1", json!({"name": "Alice"}));
        assert_eq!(d.to_value(), json!({"id": "USER_1", "name": "Alice"}));
    }
}

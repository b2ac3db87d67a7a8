//! Document filters
//!
//! A pattern matches when every field it names is present and equal at the
//! top level. No coercion: `1` and `1.0` are different values, as are `"1"`
//! and `1`. A predicate sees the whole document.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::document::{Attributes, Document};

type PredicateFn = dyn Fn(&Document) -> bool + Send + Sync;

/// Selects documents within a collection
#[derive(Clone)]
pub enum Filter {
    /// Every document
    All,
    /// Shallow top-level equality
    Pattern(Attributes),
    /// Arbitrary test over the full document
    Predicate(Arc<PredicateFn>),
}

impl Filter {
    /// Pattern filter from a JSON object. Non-object values match everything.
    pub fn pattern(value: Value) -> Self {
        match value {
            Value::Object(map) => Filter::Pattern(map),
            _ => Filter::All,
        }
    }

    pub fn predicate<F>(f: F) -> Self
    where
        F: Fn(&Document) -> bool + Send + Sync + 'static,
    {
        Filter::Predicate(Arc::new(f))
    }

    pub fn matches(&self, document: &Document) -> bool {
        match self {
            Filter::All => true,
            Filter::Pattern(pattern) => document.matches_pattern(pattern),
            Filter::Predicate(f) => f(document),
        }
    }
}

impl Default for Filter {
    fn default() -> Self {
        Filter::All
    }
}

impl fmt::Debug for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Filter::All => write!(f, "Filter::All"),
            Filter::Pattern(p) => f.debug_tuple("Filter::Pattern").field(p).finish(),
            Filter::Predicate(_) => write!(f, "Filter::Predicate(..)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::DocumentId;
    use serde_json::json;

    fn doc(v: Value) -> Document {
        Document::from_value(DocumentId::parse("USER_1").unwrap(), v)
    }

    #[test]
    fn test_pattern_is_exact_top_level_equality() {
        let d = doc(json!({"age": 30, "address": {"city": "Oslo"}}));
        assert!(Filter::pattern(json!({"age": 30})).matches(&d));
        assert!(!Filter::pattern(json!({"age": "30"})).matches(&d));
        assert!(!Filter::pattern(json!({"age": 30.5})).matches(&d));
        assert!(Filter::pattern(json!({"address": {"city": "Oslo"}})).matches(&d));
        assert!(!Filter::pattern(json!({"city": "Oslo"})).matches(&d));
        assert!(!Filter::pattern(json!({"missing": null})).matches(&d));
    }

    #[test]
    fn test_predicate_and_all() {
        let d = doc(json!({"age": 30}));
        let adults = Filter::predicate(|d| d.get("age").and_then(Value::as_u64).unwrap_or(0) >= 18);
        assert!(adults.matches(&d));
        assert!(Filter::All.matches(&d));
        assert!(Filter::pattern(json!(null)).matches(&d));
    }
}

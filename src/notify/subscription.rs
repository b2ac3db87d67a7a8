//! Subscription filters and registry entries

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::document::{Attributes, Collection, Document, DocumentId};

use super::event::ChangeEvent;

/// Delivery channel of a subscriber
pub type EventSender = mpsc::UnboundedSender<ChangeEvent>;

/// Receiving end of a subscriber's channel
pub type EventReceiver = mpsc::UnboundedReceiver<ChangeEvent>;

/// Unique subscription id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a subscription watches
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionTarget {
    Collection(Collection),
    Document(DocumentId),
}

/// Target plus an optional shallow pattern
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionFilter {
    pub target: SubscriptionTarget,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<Attributes>,
}

impl SubscriptionFilter {
    pub fn collection(collection: Collection) -> Self {
        Self {
            target: SubscriptionTarget::Collection(collection),
            pattern: None,
        }
    }

    pub fn document(id: DocumentId) -> Self {
        Self {
            target: SubscriptionTarget::Document(id),
            pattern: None,
        }
    }

    /// Narrow to documents matching `pattern` (top-level equality)
    pub fn with_pattern(mut self, pattern: Attributes) -> Self {
        self.pattern = Some(pattern);
        self
    }

    /// The collection whose documents can match
    pub fn collection_scope(&self) -> Collection {
        match &self.target {
            SubscriptionTarget::Collection(c) => c.clone(),
            SubscriptionTarget::Document(id) => id.collection(),
        }
    }

    pub fn covers(&self, id: &DocumentId) -> bool {
        match &self.target {
            SubscriptionTarget::Collection(c) => c.contains(id),
            SubscriptionTarget::Document(target) => target == id,
        }
    }

    /// True if `document` is one the subscriber asked about
    pub fn matches_document(&self, document: &Document) -> bool {
        self.covers(document.id())
            && self
                .pattern
                .as_ref()
                .map_or(true, |p| document.matches_pattern(p))
    }

    /// A change matches when either side of it matches, so subscribers see
    /// documents leaving the pattern as well as entering it
    pub fn matches(&self, event: &ChangeEvent) -> bool {
        if !self.covers(&event.id) {
            return false;
        }
        let Some(pattern) = &self.pattern else {
            return true;
        };
        [&event.document, &event.previous]
            .into_iter()
            .flatten()
            .any(|doc| doc.matches_pattern(pattern))
    }
}

/// A registered subscriber
#[derive(Debug)]
pub(crate) struct Subscription {
    pub(crate) connection: String,
    pub(crate) filter: SubscriptionFilter,
    pub(crate) sender: EventSender,
    pub(crate) last_delivered: u64,
    /// Changes at or below this sequence were part of the initial state
    pub(crate) floor: u64,
}

impl Subscription {
    /// Whether `event` should go to this subscriber
    pub(crate) fn wants(&self, event: &ChangeEvent) -> bool {
        event.sequence > self.floor && self.filter.matches(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::ChangeKind;
    use chrono::Utc;
    use serde_json::json;

    fn event(raw: &str, document: Option<serde_json::Value>, previous: Option<serde_json::Value>) -> ChangeEvent {
        let id = DocumentId::parse(raw).unwrap();
        ChangeEvent {
            sequence: 1,
            kind: ChangeKind::Update,
            collection: id.collection(),
            document: document.map(|v| Document::from_value(id.clone(), v)),
            previous: previous.map(|v| Document::from_value(id.clone(), v)),
            id,
            patch: None,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_collection_and_document_targets() {
        let users = SubscriptionFilter::collection(Collection::new("USER").unwrap());
        assert!(users.matches(&event("USER_1", Some(json!({})), None)));
        assert!(!users.matches(&event("ORDER_1", Some(json!({})), None)));

        let one = SubscriptionFilter::document(DocumentId::parse("USER_1").unwrap());
        assert!(one.matches(&event("USER_1", None, Some(json!({})))));
        assert!(!one.matches(&event("USER_2", Some(json!({})), None)));
    }

    #[test]
    fn test_pattern_matches_either_side() {
        let admins = SubscriptionFilter::collection(Collection::new("USER").unwrap())
            .with_pattern(json!({"role": "admin"}).as_object().cloned().unwrap());
        assert!(admins.matches(&event(
            "USER_1",
            Some(json!({"role": "user"})),
            Some(json!({"role": "admin"}))
        )));
        assert!(!admins.matches(&event("USER_1", Some(json!({"role": "user"})), None)));
    }
}

//! Change events

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::document::{Collection, Document, DocumentId, Patch};
use crate::txn::ResolvedChange;
use crate::wal::OpKind;

/// What happened to the document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Create,
    Update,
    Delete,
    /// Synthetic: the document's state when the subscription started
    Current,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChangeKind::Create => "create",
            ChangeKind::Update => "update",
            ChangeKind::Delete => "delete",
            ChangeKind::Current => "current",
        };
        f.write_str(s)
    }
}

impl From<OpKind> for ChangeKind {
    fn from(kind: OpKind) -> Self {
        match kind {
            OpKind::Create => ChangeKind::Create,
            OpKind::Update => ChangeKind::Update,
            OpKind::Delete => ChangeKind::Delete,
        }
    }
}

/// One change, as delivered to a subscriber
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// WAL sequence of the change (for `Current`, of the version shown)
    pub sequence: u64,
    pub kind: ChangeKind,
    pub collection: Collection,
    pub id: DocumentId,
    /// New state; absent for deletes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document: Option<Document>,
    /// Prior state for updates and deletes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous: Option<Document>,
    /// Field-level diff for updates
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patch: Option<Patch>,
    pub timestamp: DateTime<Utc>,
}

impl ChangeEvent {
    /// Event for a committed change
    pub fn from_change(sequence: u64, change: &ResolvedChange) -> Self {
        Self {
            sequence,
            kind: change.kind.into(),
            collection: change.id.collection(),
            id: change.id.clone(),
            document: change.document.as_deref().cloned(),
            previous: change.previous.as_deref().cloned(),
            patch: change.patch.clone(),
            timestamp: Utc::now(),
        }
    }

    /// Synthetic event describing an existing document
    pub fn current(sequence: u64, document: &Document) -> Self {
        Self {
            sequence,
            kind: ChangeKind::Current,
            collection: document.collection(),
            id: document.id().clone(),
            document: Some(document.clone()),
            previous: None,
            patch: None,
            timestamp: Utc::now(),
        }
    }
}

//! Staged state on top of committed state
//!
//! Resolving a transaction's operations in order needs to see the effect of
//! earlier operations on the same id (create then update). `Overlay` holds
//! those effects. Commit resolves strictly; reads from the owning context
//! resolve leniently and skip operations that would fail at commit.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::document::{Collection, Document, DocumentId, Patch};
use crate::errors::{DbError, DbResult};
use crate::wal::{OpKind, PendingEntry};

use super::transaction::StagedOp;

/// One operation resolved against the state it applies to
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedChange {
    pub id: DocumentId,
    pub kind: OpKind,
    pub previous: Option<Arc<Document>>,
    /// `None` for deletes
    pub document: Option<Arc<Document>>,
    /// Top-level diff between `previous` and `document` (updates only)
    pub patch: Option<Patch>,
}

impl ResolvedChange {
    /// The WAL entry recording this change
    pub fn to_pending(&self) -> PendingEntry {
        match (&self.kind, &self.document) {
            (OpKind::Create, Some(doc)) => {
                PendingEntry::create(self.id.clone(), doc.attributes().clone())
            }
            (OpKind::Update, Some(doc)) => PendingEntry::update(
                self.id.clone(),
                self.patch.clone().unwrap_or_default(),
                doc.attributes().clone(),
            ),
            _ => PendingEntry::delete(self.id.clone()),
        }
    }
}

/// Effects of staged operations, keyed by id (`None` = deleted)
#[derive(Debug, Clone, Default)]
pub struct Overlay {
    docs: BTreeMap<DocumentId, Option<Arc<Document>>>,
}

impl Overlay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the view a context sees of its own staged operations.
    /// Operations that would be rejected at commit are skipped.
    pub fn from_staged<F>(ops: &[StagedOp], mut base: F) -> DbResult<Self>
    where
        F: FnMut(&DocumentId) -> DbResult<Option<Arc<Document>>>,
    {
        let mut overlay = Self::new();
        for op in ops {
            match overlay.apply(op, &mut base) {
                Ok(_) => {}
                Err(DbError::NotFound(_)) | Err(DbError::DuplicateIdentifier(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(overlay)
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    /// `Some(state)` if the overlay decides `id`
    pub fn get(&self, id: &DocumentId) -> Option<Option<Arc<Document>>> {
        self.docs.get(id).cloned()
    }

    /// Overlay entries belonging to `collection`
    pub fn collection_entries<'a>(
        &'a self,
        collection: &'a Collection,
    ) -> impl Iterator<Item = (&'a DocumentId, &'a Option<Arc<Document>>)> + 'a {
        self.docs.iter().filter(move |(id, _)| collection.contains(id))
    }

    /// Resolve `op` against the overlay, falling back to `base` for ids the
    /// overlay has not seen
    pub fn apply<F>(&mut self, op: &StagedOp, base: &mut F) -> DbResult<ResolvedChange>
    where
        F: FnMut(&DocumentId) -> DbResult<Option<Arc<Document>>>,
    {
        let id = op.target();
        let previous = match self.docs.get(id) {
            Some(state) => state.clone(),
            None => base(id)?,
        };

        let change = match op {
            StagedOp::Create { attributes, .. } => {
                if previous.is_some() {
                    return Err(DbError::DuplicateIdentifier(id.clone()));
                }
                ResolvedChange {
                    id: id.clone(),
                    kind: OpKind::Create,
                    previous: None,
                    document: Some(Arc::new(Document::new(id.clone(), attributes.clone()))),
                    patch: None,
                }
            }
            StagedOp::Update { patch, .. } => {
                let prev = previous.ok_or_else(|| DbError::NotFound(id.clone()))?;
                let next = prev.patched(patch);
                let diff = Patch::diff(prev.attributes(), next.attributes());
                ResolvedChange {
                    id: id.clone(),
                    kind: OpKind::Update,
                    previous: Some(prev),
                    document: Some(Arc::new(next)),
                    patch: Some(diff),
                }
            }
            StagedOp::Replace { attributes, .. } => {
                let prev = previous.ok_or_else(|| DbError::NotFound(id.clone()))?;
                let diff = Patch::diff(prev.attributes(), attributes);
                ResolvedChange {
                    id: id.clone(),
                    kind: OpKind::Update,
                    previous: Some(prev),
                    document: Some(Arc::new(Document::new(id.clone(), attributes.clone()))),
                    patch: Some(diff),
                }
            }
            StagedOp::Delete { .. } => {
                let prev = previous.ok_or_else(|| DbError::NotFound(id.clone()))?;
                ResolvedChange {
                    id: id.clone(),
                    kind: OpKind::Delete,
                    previous: Some(prev),
                    document: None,
                    patch: None,
                }
            }
        };

        self.docs.insert(id.clone(), change.document.clone());
        Ok(change)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Attributes;
    use serde_json::json;

    fn id(raw: &str) -> DocumentId {
        DocumentId::parse(raw).unwrap()
    }

    fn attrs(v: serde_json::Value) -> Attributes {
        v.as_object().cloned().unwrap()
    }

    fn empty_base(_: &DocumentId) -> DbResult<Option<Arc<Document>>> {
        Ok(None)
    }

    #[test]
    fn test_create_then_update_in_one_batch() {
        let mut overlay = Overlay::new();
        let mut base = empty_base;
        let create = StagedOp::Create {
            id: id("ORDER_1"),
            attributes: attrs(json!({"total": 10})),
        };
        let update = StagedOp::Update {
            id: id("ORDER_1"),
            patch: Patch::new().set("total", 12).set("paid", true),
        };
        overlay.apply(&create, &mut base).unwrap();
        let change = overlay.apply(&update, &mut base).unwrap();

        assert_eq!(change.kind, OpKind::Update);
        assert_eq!(change.document.unwrap().get("total"), Some(&json!(12)));
        assert_eq!(change.patch.unwrap().len(), 2);
    }

    #[test]
    fn test_duplicate_and_missing_rejected() {
        let existing = Arc::new(Document::new(id("USER_1"), attrs(json!({"name": "Alice"}))));
        let mut base = |_: &DocumentId| -> DbResult<Option<Arc<Document>>> {
            Ok(Some(Arc::clone(&existing)))
        };
        let mut overlay = Overlay::new();
        let err = overlay
            .apply(
                &StagedOp::Create {
                    id: id("USER_1"),
                    attributes: Attributes::new(),
                },
                &mut base,
            )
            .unwrap_err();
        assert!(matches!(err, DbError::DuplicateIdentifier(_)));

        let mut overlay = Overlay::new();
        let mut base = empty_base;
        let err = overlay
            .apply(&StagedOp::Delete { id: id("USER_9") }, &mut base)
            .unwrap_err();
        assert!(matches!(err, DbError::NotFound(_)));
    }

    #[test]
    fn test_replace_diff_marks_removed_fields() {
        let existing = Arc::new(Document::new(
            id("USER_1"),
            attrs(json!({"name": "Alice", "age": 30})),
        ));
        let mut base = |_: &DocumentId| -> DbResult<Option<Arc<Document>>> {
            Ok(Some(Arc::clone(&existing)))
        };
        let mut overlay = Overlay::new();
        let change = overlay
            .apply(
                &StagedOp::Replace {
                    id: id("USER_1"),
                    attributes: attrs(json!({"name": "Bob"})),
                },
                &mut base,
            )
            .unwrap();
        let patch = change.patch.as_ref().unwrap();
        assert_eq!(patch.len(), 2);
        assert!(matches!(
            change.to_pending().payload,
            crate::wal::WalPayload::Patch { .. }
        ));
    }

    #[test]
    fn test_lenient_view_skips_failing_ops() {
        let ops = vec![
            StagedOp::Delete { id: id("USER_9") },
            StagedOp::Create {
                id: id("USER_2"),
                attributes: attrs(json!({"name": "Cy"})),
            },
        ];
        let overlay = Overlay::from_staged(&ops, empty_base).unwrap();
        assert!(overlay.get(&id("USER_9")).is_none());
        assert!(overlay.get(&id("USER_2")).unwrap().is_some());
    }
}

//! Query engine
//!
//! Reads by id, by id list and by filter over both storage tiers. A query
//! run on behalf of a context with an open transaction also sees that
//! context's staged operations.
//!
//! Results of collection reads are ordered by ascending identifier.

mod filter;

use std::sync::Arc;

use crate::cache::TieredStore;
use crate::document::{Collection, Document, DocumentId};
use crate::errors::{DbError, DbResult};
use crate::txn::Overlay;

pub use filter::Filter;

/// Read-only view over the tiers, optionally through an overlay
pub struct QueryEngine<'a> {
    store: &'a TieredStore,
    overlay: Option<&'a Overlay>,
}

impl<'a> QueryEngine<'a> {
    pub fn new(store: &'a TieredStore) -> Self {
        Self {
            store,
            overlay: None,
        }
    }

    pub fn with_overlay(store: &'a TieredStore, overlay: &'a Overlay) -> Self {
        Self {
            store,
            overlay: Some(overlay),
        }
    }

    fn lookup(&self, id: &DocumentId) -> DbResult<Option<Arc<Document>>> {
        if let Some(state) = self.overlay.and_then(|o| o.get(id)) {
            return Ok(state);
        }
        self.store.resolve(id)
    }

    /// Fetch one document
    pub fn get_by_id(&self, id: &DocumentId) -> DbResult<Arc<Document>> {
        self.lookup(id)?
            .ok_or_else(|| DbError::NotFound(id.clone()))
    }

    /// Fetch several documents, in request order, omitting misses
    pub fn get_by_ids(&self, ids: &[DocumentId]) -> DbResult<Vec<Arc<Document>>> {
        let mut found = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(doc) = self.lookup(id)? {
                found.push(doc);
            }
        }
        Ok(found)
    }

    /// Documents of `collection` matching `filter`, ascending by id
    pub fn get_by_filter(
        &self,
        collection: &Collection,
        filter: &Filter,
    ) -> DbResult<Vec<Arc<Document>>> {
        let mut docs = self.store.collection_documents(collection)?;

        if let Some(overlay) = self.overlay {
            for (id, state) in overlay.collection_entries(collection) {
                match docs.binary_search_by(|d| d.id().cmp(id)) {
                    Ok(pos) => match state {
                        Some(doc) => docs[pos] = Arc::clone(doc),
                        None => {
                            docs.remove(pos);
                        }
                    },
                    Err(pos) => {
                        if let Some(doc) = state {
                            docs.insert(pos, Arc::clone(doc));
                        }
                    }
                }
            }
        }

        docs.retain(|d| filter.matches(d));
        Ok(docs)
    }

    /// Every document of `collection`
    pub fn list(&self, collection: &Collection) -> DbResult<Vec<Arc<Document>>> {
        self.get_by_filter(collection, &Filter::All)
    }

    pub fn count(&self, collection: &Collection, filter: &Filter) -> DbResult<usize> {
        Ok(self.get_by_filter(collection, filter)?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheTier;
    use crate::segment::{SegmentOptions, SegmentStore};
    use crate::txn::StagedOp;
    use serde_json::json;
    use tempfile::TempDir;

    fn id(raw: &str) -> DocumentId {
        DocumentId::parse(raw).unwrap()
    }

    fn seeded(dir: &TempDir) -> TieredStore {
        let (segments, _) =
            SegmentStore::open(dir.path(), SegmentOptions::new(1 << 20)).unwrap();
        let store = TieredStore::new(CacheTier::new(1 << 20, 1 << 19), segments);
        let rows = [
            ("USER_c", json!({"role": "admin", "age": 40})),
            ("USER_a", json!({"role": "user", "age": 20})),
            ("USER_b", json!({"role": "admin", "age": 31})),
            ("ORDER_1", json!({"role": "admin"})),
        ];
        for (seq, (raw, v)) in rows.into_iter().enumerate() {
            store.apply(
                id(raw),
                Some(Arc::new(Document::from_value(id(raw), v))),
                seq as u64 + 1,
            );
        }
        store
    }

    fn ids(docs: &[Arc<Document>]) -> Vec<&str> {
        docs.iter().map(|d| d.id().as_str()).collect()
    }

    #[test]
    fn test_filter_results_sorted_by_id() {
        let dir = TempDir::new().unwrap();
        let store = seeded(&dir);
        let engine = QueryEngine::new(&store);
        let users = Collection::new("USER").unwrap();

        let admins = engine
            .get_by_filter(&users, &Filter::pattern(json!({"role": "admin"})))
            .unwrap();
        assert_eq!(ids(&admins), vec!["USER_b", "USER_c"]);

        let over_30 = engine
            .get_by_filter(
                &users,
                &Filter::predicate(|d| d.get("age").and_then(|v| v.as_u64()) > Some(30)),
            )
            .unwrap();
        assert_eq!(ids(&over_30), vec!["USER_b", "USER_c"]);
        assert_eq!(engine.count(&users, &Filter::All).unwrap(), 3);
    }

    #[test]
    fn test_get_by_ids_preserves_order_and_skips_misses() {
        let dir = TempDir::new().unwrap();
        let store = seeded(&dir);
        let engine = QueryEngine::new(&store);
        let docs = engine
            .get_by_ids(&[id("USER_c"), id("USER_zz"), id("USER_a")])
            .unwrap();
        assert_eq!(ids(&docs), vec!["USER_c", "USER_a"]);
        assert!(matches!(
            engine.get_by_id(&id("USER_zz")),
            Err(DbError::NotFound(_))
        ));
    }

    #[test]
    fn test_overlay_visible_through_engine() {
        let dir = TempDir::new().unwrap();
        let store = seeded(&dir);
        let ops = vec![
            StagedOp::Delete { id: id("USER_a") },
            StagedOp::Create {
                id: id("USER_0"),
                attributes: json!({"role": "user"}).as_object().cloned().unwrap(),
            },
        ];
        let overlay = Overlay::from_staged(&ops, |id| store.resolve(id)).unwrap();
        let engine = QueryEngine::with_overlay(&store, &overlay);
        let users = Collection::new("USER").unwrap();
        assert_eq!(
            ids(&engine.list(&users).unwrap()),
            vec!["USER_0", "USER_b", "USER_c"]
        );
        assert!(engine.get_by_id(&id("USER_a")).is_err());

        // Outside the context nothing changed
        assert_eq!(QueryEngine::new(&store).list(&users).unwrap().len(), 3);
    }
}

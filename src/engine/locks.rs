//! Per-identifier write serialization
//!
//! A fixed set of mutexes indexed by identifier hash. A writer takes the
//! stripes of every id it touches, in ascending stripe order, so two writers
//! never wait on each other in a cycle.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::{Mutex, MutexGuard};

use crate::document::DocumentId;
use crate::sync::lock;

pub const DEFAULT_STRIPES: usize = 64;

pub(crate) struct LockStripes {
    stripes: Vec<Mutex<()>>,
}

impl LockStripes {
    pub(crate) fn new(count: usize) -> Self {
        Self {
            stripes: (0..count.max(1)).map(|_| Mutex::new(())).collect(),
        }
    }

    fn stripe_of(&self, id: &DocumentId) -> usize {
        let mut hasher = DefaultHasher::new();
        id.hash(&mut hasher);
        (hasher.finish() % self.stripes.len() as u64) as usize
    }

    /// Lock the stripes covering `ids`. Held until the guards drop.
    pub(crate) fn lock_all<'a, I>(&self, ids: I) -> Vec<MutexGuard<'_, ()>>
    where
        I: IntoIterator<Item = &'a DocumentId>,
    {
        let mut indexes: Vec<usize> = ids.into_iter().map(|id| self.stripe_of(id)).collect();
        indexes.sort_unstable();
        indexes.dedup();
        indexes.into_iter().map(|i| lock(&self.stripes[i])).collect()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.stripes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_same_id_maps_to_one_stripe() {
        let stripes = LockStripes::new(DEFAULT_STRIPES);
        let id = DocumentId::parse("USER_1").unwrap();
        let guards = stripes.lock_all([&id, &id]);
        assert_eq!(guards.len(), 1);
        assert_eq!(stripes.len(), DEFAULT_STRIPES);
    }

    #[test]
    fn test_overlapping_sets_do_not_deadlock() {
        let stripes = Arc::new(LockStripes::new(4));
        let ids: Vec<DocumentId> = (0..16)
            .map(|i| DocumentId::parse(&format!("USER_{}", i)).unwrap())
            .collect();
        let ids = Arc::new(ids);

        let handles: Vec<_> = (0..4)
            .map(|t| {
                let stripes = Arc::clone(&stripes);
                let ids = Arc::clone(&ids);
                thread::spawn(move || {
                    for round in 0..200 {
                        let a = &ids[(t + round) % ids.len()];
                        let b = &ids[(t * 3 + round * 7) % ids.len()];
                        // Alternate argument order; acquisition order is fixed
                        let _guards = if round % 2 == 0 {
                            stripes.lock_all([a, b])
                        } else {
                            stripes.lock_all([b, a])
                        };
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
    }
}

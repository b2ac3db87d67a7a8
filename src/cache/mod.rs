//! Cache tier (hot) and the tiered read path over the segment store (cold)

mod entry;
mod tier;
mod tiered;

pub use entry::{CacheEntry, CachedState, EvictionCandidate};
pub use tier::{CacheLookup, CacheStats, CacheTier, EvictionReport};
pub use tiered::TieredStore;

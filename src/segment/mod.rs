//! Segment store (cold tier)
//!
//! Append-only files of checksummed document records plus an in-memory index
//! of the newest record per document. Compaction rewrites sealed segments
//! and publishes the result with a brief index write lock.

mod compaction;
mod errors;
mod index;
mod record;
mod store;

pub use errors::{SegmentError, SegmentErrorCode, SegmentResult};
pub use index::{segment_file_name, RecordLocation};
pub use record::{RecordHeader, SegmentRecord};
pub use store::{SegmentOpenReport, SegmentOptions, SegmentStats, SegmentStore};

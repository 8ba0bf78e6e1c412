//! Segment bookkeeping: identifier allocation, segment records and the
//! per-block segment arena.

pub mod id_allocator;
pub mod pool;
pub mod record;

pub use id_allocator::{INVALID_SEGMENT_ID, SegmentId, SegmentIdAllocator};
pub use pool::SegmentPool;
pub use record::{BoundingBox, NeighborSet, RETIRED_ITERATION, Segment, SegmentHandle};

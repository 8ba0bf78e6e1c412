//! Segment records and their neighbor sets.

use ahash::AHashMap;

use crate::segment::id_allocator::{INVALID_SEGMENT_ID, SegmentId};

/// Merge iteration marking a segment that was absorbed and is gone for good.
pub const RETIRED_ITERATION: u16 = u16::MAX;

/// Stable index of a segment inside a [`SegmentPool`](super::SegmentPool).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SegmentHandle(u32);

impl SegmentHandle {
    pub(crate) fn from_index(index: usize) -> Self {
        SegmentHandle(index as u32)
    }

    /// Position of the segment inside its pool.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Half-open pixel rectangle `[x_start, x_bound) × [y_start, y_bound)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BoundingBox {
    pub x_start: usize,
    pub y_start: usize,
    pub x_bound: usize,
    pub y_bound: usize,
}

impl BoundingBox {
    /// Bounding box of a single pixel.
    pub fn pixel(x: usize, y: usize) -> Self {
        BoundingBox {
            x_start: x,
            y_start: y,
            x_bound: x + 1,
            y_bound: y + 1,
        }
    }

    /// Smallest box covering both boxes.
    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        BoundingBox {
            x_start: self.x_start.min(other.x_start),
            y_start: self.y_start.min(other.y_start),
            x_bound: self.x_bound.max(other.x_bound),
            y_bound: self.y_bound.max(other.y_bound),
        }
    }

    /// Grow the box so it covers the given pixel.
    pub fn include(&mut self, x: usize, y: usize) {
        *self = self.union(&BoundingBox::pixel(x, y));
    }

    pub fn width(&self) -> usize {
        self.x_bound.saturating_sub(self.x_start)
    }

    pub fn height(&self) -> usize {
        self.y_bound.saturating_sub(self.y_start)
    }

    /// Perimeter of the box in pixel edges.
    pub fn perimeter(&self) -> usize {
        2 * self.width() + 2 * self.height()
    }

    pub fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }

    pub fn contains(&self, x: usize, y: usize) -> bool {
        x >= self.x_start && x < self.x_bound && y >= self.y_start && y < self.y_bound
    }
}

/// Set of neighbor handles with tombstoned removal.
///
/// Handles keep their slot order for iteration; a hash index maps each live
/// handle to its slot. Removal leaves an empty slot behind that the next
/// insert reuses, and the slots are compacted once fewer than half of them
/// hold a live entry.
#[derive(Debug, Clone, Default)]
pub struct NeighborSet {
    slots: Vec<Option<SegmentHandle>>,
    index: AHashMap<SegmentHandle, usize>,
    vacant: Vec<usize>,
}

impl NeighborSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a handle. Returns false if it was already present.
    pub fn insert(&mut self, handle: SegmentHandle) -> bool {
        if self.index.contains_key(&handle) {
            return false;
        }

        let slot = match self.vacant.pop() {
            Some(slot) => {
                self.slots[slot] = Some(handle);
                slot
            }
            None => {
                self.slots.push(Some(handle));
                self.slots.len() - 1
            }
        };
        self.index.insert(handle, slot);
        true
    }

    /// Remove a handle. Returns false if it was not present.
    pub fn remove(&mut self, handle: SegmentHandle) -> bool {
        let Some(slot) = self.index.remove(&handle) else {
            return false;
        };
        self.slots[slot] = None;
        self.vacant.push(slot);

        if self.index.len() < self.slots.len() / 2 {
            self.compact();
        }
        true
    }

    fn compact(&mut self) {
        self.slots.retain(Option::is_some);
        self.vacant.clear();
        for (slot, handle) in self.slots.iter().enumerate() {
            if let Some(handle) = handle {
                self.index.insert(*handle, slot);
            }
        }
    }

    pub fn contains(&self, handle: SegmentHandle) -> bool {
        self.index.contains_key(&handle)
    }

    /// Live handles in slot order.
    pub fn iter(&self) -> impl Iterator<Item = SegmentHandle> + '_ {
        self.slots.iter().flatten().copied()
    }

    /// Number of live handles.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Number of slots including tombstones.
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.index.clear();
        self.vacant.clear();
    }
}

/// A connected pixel region under construction.
///
/// The feature vector lives in the owning pool, addressed by the segment's
/// handle.
#[derive(Debug, Clone, Default)]
pub struct Segment {
    /// Identifier written to the segment-ID raster; 0 when unused.
    pub id: SegmentId,
    /// Pixel count.
    pub size: usize,
    pub bbox: BoundingBox,
    /// Segments with at least one 4-adjacent pixel.
    pub neighbors: NeighborSet,
    /// Iteration of the last merge; [`RETIRED_ITERATION`] once absorbed.
    pub merge_iteration: u16,
    pub(crate) prev_active: Option<SegmentHandle>,
    pub(crate) next_active: Option<SegmentHandle>,
}

impl Segment {
    /// Whether the segment still takes part in region growing.
    pub fn is_active(&self) -> bool {
        self.id != INVALID_SEGMENT_ID && self.merge_iteration != RETIRED_ITERATION
    }

    /// Clear the record for reuse.
    pub(crate) fn reset(&mut self) {
        self.id = INVALID_SEGMENT_ID;
        self.size = 0;
        self.bbox = BoundingBox::default();
        self.neighbors.clear();
        self.merge_iteration = 0;
        self.prev_active = None;
        self.next_active = None;
    }

    /// Mark the segment as absorbed.
    pub(crate) fn retire(&mut self) {
        self.id = INVALID_SEGMENT_ID;
        self.neighbors.clear();
        self.merge_iteration = RETIRED_ITERATION;
        self.prev_active = None;
        self.next_active = None;
    }
}

//! Fixed-capacity arena of segment records.

use crate::segment::record::{Segment, SegmentHandle};

/// Arena of segments plus a parallel feature matrix.
///
/// Slots are handed out in order by [`next_segment`](Self::next_segment) and
/// never freed individually; [`reset_cursor`](Self::reset_cursor) rewinds the
/// pool so the next block can reuse the same allocation. Active segments are
/// chained in an intrusive doubly-linked list for O(1) removal.
#[derive(Debug, Default)]
pub struct SegmentPool {
    segments: Vec<Segment>,
    features: Vec<f64>,
    features_per_segment: usize,
    cursor: usize,
    active_head: Option<SegmentHandle>,
    active_tail: Option<SegmentHandle>,
    active_count: usize,
}

impl SegmentPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lay out `capacity` segment slots with `features_per_segment` features
    /// each and rewind the cursor.
    ///
    /// The existing allocation is kept when it is large enough and the
    /// feature length is unchanged.
    pub fn initialize(&mut self, capacity: usize, features_per_segment: usize) {
        if capacity > self.segments.len() || features_per_segment != self.features_per_segment {
            self.segments = (0..capacity).map(|_| Segment::default()).collect();
            self.features = vec![0.0; capacity * features_per_segment];
            self.features_per_segment = features_per_segment;
        }
        self.reset_cursor();
    }

    /// Hand out the next unused slot, or `None` when the pool is exhausted.
    pub fn next_segment(&mut self) -> Option<SegmentHandle> {
        if self.cursor >= self.segments.len() {
            return None;
        }
        let handle = SegmentHandle::from_index(self.cursor);
        self.cursor += 1;

        self.segments[handle.index()].reset();
        self.features_mut(handle).fill(0.0);
        Some(handle)
    }

    /// Rewind the cursor; every slot becomes available again.
    pub fn reset_cursor(&mut self) {
        self.cursor = 0;
        self.active_head = None;
        self.active_tail = None;
        self.active_count = 0;
    }

    /// Number of slots.
    pub fn capacity(&self) -> usize {
        self.segments.len()
    }

    /// Number of slots handed out since the last rewind.
    pub fn used(&self) -> usize {
        self.cursor
    }

    pub fn features_per_segment(&self) -> usize {
        self.features_per_segment
    }

    pub fn segment(&self, handle: SegmentHandle) -> &Segment {
        &self.segments[handle.index()]
    }

    pub fn segment_mut(&mut self, handle: SegmentHandle) -> &mut Segment {
        &mut self.segments[handle.index()]
    }

    pub fn features(&self, handle: SegmentHandle) -> &[f64] {
        let start = handle.index() * self.features_per_segment;
        &self.features[start..start + self.features_per_segment]
    }

    pub fn features_mut(&mut self, handle: SegmentHandle) -> &mut [f64] {
        let start = handle.index() * self.features_per_segment;
        &mut self.features[start..start + self.features_per_segment]
    }

    /// Record and features of one segment, both mutable.
    pub fn parts_mut(&mut self, handle: SegmentHandle) -> (&mut Segment, &mut [f64]) {
        let start = handle.index() * self.features_per_segment;
        (
            &mut self.segments[handle.index()],
            &mut self.features[start..start + self.features_per_segment],
        )
    }

    /// Append a segment to the tail of the active list.
    pub fn link_active(&mut self, handle: SegmentHandle) {
        let tail = self.active_tail;
        {
            let segment = self.segment_mut(handle);
            segment.prev_active = tail;
            segment.next_active = None;
        }
        match tail {
            Some(tail) => self.segment_mut(tail).next_active = Some(handle),
            None => self.active_head = Some(handle),
        }
        self.active_tail = Some(handle);
        self.active_count += 1;
    }

    /// Remove a segment from the active list.
    pub fn unlink_active(&mut self, handle: SegmentHandle) {
        let (prev, next) = {
            let segment = self.segment_mut(handle);
            let links = (segment.prev_active, segment.next_active);
            segment.prev_active = None;
            segment.next_active = None;
            links
        };

        match prev {
            Some(prev) => self.segment_mut(prev).next_active = next,
            None => self.active_head = next,
        }
        match next {
            Some(next) => self.segment_mut(next).prev_active = prev,
            None => self.active_tail = prev,
        }
        self.active_count -= 1;
    }

    pub fn active_head(&self) -> Option<SegmentHandle> {
        self.active_head
    }

    /// Successor of a segment in the active list.
    pub fn next_active(&self, handle: SegmentHandle) -> Option<SegmentHandle> {
        self.segment(handle).next_active
    }

    pub fn active_count(&self) -> usize {
        self.active_count
    }

    /// Iterate the active list from head to tail.
    pub fn active_iter(&self) -> ActiveIter<'_> {
        ActiveIter {
            pool: self,
            cursor: self.active_head,
        }
    }
}

/// Iterator over the active segment list.
pub struct ActiveIter<'a> {
    pool: &'a SegmentPool,
    cursor: Option<SegmentHandle>,
}

impl Iterator for ActiveIter<'_> {
    type Item = SegmentHandle;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.cursor?;
        self.cursor = self.pool.next_active(current);
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_segment_until_exhausted() {
        let mut pool = SegmentPool::new();
        pool.initialize(3, 2);

        let handles: Vec<_> = std::iter::from_fn(|| pool.next_segment()).collect();
        assert_eq!(handles.len(), 3);
        assert_eq!(pool.used(), 3);
        assert!(pool.next_segment().is_none());

        pool.reset_cursor();
        assert_eq!(pool.next_segment(), Some(handles[0]));
    }

    #[test]
    fn test_features_are_isolated_and_cleared() {
        let mut pool = SegmentPool::new();
        pool.initialize(2, 3);
        let a = pool.next_segment().unwrap();
        let b = pool.next_segment().unwrap();

        pool.features_mut(a).copy_from_slice(&[1.0, 2.0, 3.0]);
        pool.features_mut(b).copy_from_slice(&[4.0, 5.0, 6.0]);
        assert_eq!(pool.features(a), &[1.0, 2.0, 3.0]);
        assert_eq!(pool.features(b), &[4.0, 5.0, 6.0]);

        pool.reset_cursor();
        let a = pool.next_segment().unwrap();
        assert_eq!(pool.features(a), &[0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_initialize_reuses_allocation() {
        let mut pool = SegmentPool::new();
        pool.initialize(10, 2);
        pool.initialize(4, 2);
        assert_eq!(pool.capacity(), 10);

        pool.initialize(4, 5);
        assert_eq!(pool.capacity(), 4);
        assert_eq!(pool.features_per_segment(), 5);
    }

    #[test]
    fn test_active_list() {
        let mut pool = SegmentPool::new();
        pool.initialize(4, 1);
        let handles: Vec<_> = (0..4).map(|_| pool.next_segment().unwrap()).collect();
        for &h in &handles {
            pool.link_active(h);
        }
        assert_eq!(pool.active_count(), 4);
        assert_eq!(pool.active_iter().collect::<Vec<_>>(), handles);

        // Middle, head and tail removal.
        pool.unlink_active(handles[1]);
        pool.unlink_active(handles[0]);
        pool.unlink_active(handles[3]);
        assert_eq!(pool.active_iter().collect::<Vec<_>>(), vec![handles[2]]);
        assert_eq!(pool.active_head(), Some(handles[2]));
        assert_eq!(pool.active_count(), 1);

        pool.unlink_active(handles[2]);
        assert!(pool.active_head().is_none());
        assert_eq!(pool.active_iter().count(), 0);
    }
}

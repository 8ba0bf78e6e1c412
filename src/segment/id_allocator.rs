//! Thread-safe provider of unique, reusable segment identifiers.

use parking_lot::Mutex;

/// Numeric segment identifier as stored in segment-ID rasters.
pub type SegmentId = u32;

/// Identifier meaning "no segment" (unassigned or no-data pixel).
pub const INVALID_SEGMENT_ID: SegmentId = 0;

#[derive(Debug)]
struct AllocatorState {
    /// Last identifier handed out from the counter.
    counter: SegmentId,
    /// Largest identifier the counter may reach.
    limit: SegmentId,
    /// Reclaimed identifiers, reused LIFO.
    free: Vec<SegmentId>,
    /// Identifiers currently issued.
    live: usize,
}

/// Hands out segment identifiers that are unique among all live segments.
///
/// Released identifiers are recycled before the counter advances. Every
/// operation takes a single short-lived lock.
#[derive(Debug)]
pub struct SegmentIdAllocator {
    state: Mutex<AllocatorState>,
}

impl Default for SegmentIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl SegmentIdAllocator {
    /// Create an allocator covering the full identifier range.
    pub fn new() -> Self {
        Self::with_limit(SegmentId::MAX)
    }

    /// Create an allocator that never issues identifiers above `limit`.
    pub fn with_limit(limit: SegmentId) -> Self {
        SegmentIdAllocator {
            state: Mutex::new(AllocatorState {
                counter: INVALID_SEGMENT_ID,
                limit,
                free: Vec::new(),
                live: 0,
            }),
        }
    }

    /// Acquire one identifier, or `None` once the range is exhausted.
    pub fn acquire(&self) -> Option<SegmentId> {
        let mut state = self.state.lock();
        let id = Self::take(&mut state)?;
        state.live += 1;
        Some(id)
    }

    /// Acquire `count` identifiers at once.
    ///
    /// Either all identifiers are returned or none are; on exhaustion the ones
    /// already taken go back to the free list.
    pub fn acquire_many(&self, count: usize) -> Option<Vec<SegmentId>> {
        let mut state = self.state.lock();
        let mut ids = Vec::with_capacity(count);

        while ids.len() < count {
            match Self::take(&mut state) {
                Some(id) => ids.push(id),
                None => {
                    state.free.extend(ids.into_iter().rev());
                    return None;
                }
            }
        }

        state.live += count;
        Some(ids)
    }

    fn take(state: &mut AllocatorState) -> Option<SegmentId> {
        if let Some(id) = state.free.pop() {
            return Some(id);
        }
        if state.counter < state.limit {
            state.counter += 1;
            return Some(state.counter);
        }
        None
    }

    /// Return an identifier for reuse. The invalid identifier is ignored.
    pub fn release(&self, id: SegmentId) {
        if id == INVALID_SEGMENT_ID {
            return;
        }
        let mut state = self.state.lock();
        state.free.push(id);
        state.live = state.live.saturating_sub(1);
    }

    /// Return several identifiers for reuse.
    pub fn release_many(&self, ids: &[SegmentId]) {
        let mut state = self.state.lock();
        for &id in ids {
            if id != INVALID_SEGMENT_ID {
                state.free.push(id);
                state.live = state.live.saturating_sub(1);
            }
        }
    }

    /// Number of identifiers currently issued.
    pub fn live_count(&self) -> usize {
        self.state.lock().live
    }

    /// Highest identifier ever produced by the counter.
    pub fn issued_count(&self) -> SegmentId {
        self.state.lock().counter
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_sequential_acquire() {
        let allocator = SegmentIdAllocator::new();

        assert_eq!(allocator.acquire(), Some(1));
        assert_eq!(allocator.acquire(), Some(2));
        assert_eq!(allocator.live_count(), 2);
        assert_eq!(allocator.issued_count(), 2);
    }

    #[test]
    fn test_release_and_reuse() {
        let allocator = SegmentIdAllocator::new();
        let a = allocator.acquire().unwrap();
        let _b = allocator.acquire().unwrap();

        allocator.release(a);
        assert_eq!(allocator.live_count(), 1);
        assert_eq!(allocator.acquire(), Some(a));
        assert_eq!(allocator.issued_count(), 2);
    }

    #[test]
    fn test_release_invalid_is_ignored() {
        let allocator = SegmentIdAllocator::new();
        allocator.release(INVALID_SEGMENT_ID);
        allocator.release_many(&[INVALID_SEGMENT_ID]);

        assert_eq!(allocator.acquire(), Some(1));
    }

    #[test]
    fn test_exhaustion() {
        let allocator = SegmentIdAllocator::with_limit(2);

        assert_eq!(allocator.acquire(), Some(1));
        assert_eq!(allocator.acquire(), Some(2));
        assert_eq!(allocator.acquire(), None);

        allocator.release(1);
        assert_eq!(allocator.acquire(), Some(1));
    }

    #[test]
    fn test_acquire_many_all_or_nothing() {
        let allocator = SegmentIdAllocator::with_limit(5);
        let first = allocator.acquire_many(3).unwrap();
        assert_eq!(first, vec![1, 2, 3]);

        allocator.release(2);
        assert!(allocator.acquire_many(4).is_none());
        assert_eq!(allocator.live_count(), 2);

        // Everything taken by the failed batch is available again.
        let retry: HashSet<_> = allocator.acquire_many(3).unwrap().into_iter().collect();
        assert_eq!(retry, HashSet::from([2, 4, 5]));
        assert_eq!(allocator.acquire(), None);
    }

    #[test]
    fn test_release_many() {
        let allocator = SegmentIdAllocator::new();
        let ids = allocator.acquire_many(4).unwrap();
        allocator.release_many(&ids);

        assert_eq!(allocator.live_count(), 0);
        let again: HashSet<_> = allocator.acquire_many(4).unwrap().into_iter().collect();
        assert_eq!(again, ids.into_iter().collect());
    }
}

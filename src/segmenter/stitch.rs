//! Union-find over segment IDs merged across block seams.

use ahash::AHashMap;

use crate::segment::SegmentId;

/// Disjoint sets of segment IDs.
///
/// IDs never passed to [`union`](Self::union) are their own root.
#[derive(Debug, Clone, Default)]
pub struct IdUnion {
    parent: AHashMap<SegmentId, SegmentId>,
}

impl IdUnion {
    pub fn new() -> Self {
        Self::default()
    }

    /// Representative of the set containing `id`, compressing the path.
    pub fn find(&mut self, id: SegmentId) -> SegmentId {
        let mut root = id;
        while let Some(&parent) = self.parent.get(&root) {
            root = parent;
        }

        let mut current = id;
        while current != root {
            match self.parent.insert(current, root) {
                Some(next) => current = next,
                None => break,
            }
        }
        root
    }

    /// Attach the set of `absorbed` under the root of `survivor`.
    ///
    /// Returns false when both already share a root.
    pub fn union(&mut self, survivor: SegmentId, absorbed: SegmentId) -> bool {
        let survivor = self.find(survivor);
        let absorbed = self.find(absorbed);
        if survivor == absorbed {
            return false;
        }
        self.parent.insert(absorbed, survivor);
        true
    }

    /// Apply a `(survivor, absorbed)` merge log in order. Returns the number
    /// of pairs that joined two sets.
    pub fn union_all(&mut self, merges: &[(SegmentId, SegmentId)]) -> usize {
        merges
            .iter()
            .filter(|&&(survivor, absorbed)| self.union(survivor, absorbed))
            .count()
    }

    /// Number of IDs that are not their own root.
    pub fn len(&self) -> usize {
        self.parent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parent.is_empty()
    }
}

//! Connected-component repair of committed block labels.

use ahash::AHashSet;

use crate::error::{Result, SegmenterError};
use crate::segment::{INVALID_SEGMENT_ID, SegmentId, SegmentIdAllocator};

/// Give every 4-connected component of an ID its own ID.
///
/// `labels` is a row-major `width × height` grid. The first component of
/// each ID in raster order keeps it; later components get fresh IDs from
/// `allocator`. Returns the number of IDs acquired.
pub fn split_disconnected(
    labels: &mut [SegmentId],
    width: usize,
    height: usize,
    allocator: &SegmentIdAllocator,
) -> Result<usize> {
    debug_assert_eq!(labels.len(), width * height);

    let mut visited = vec![false; labels.len()];
    let mut seen = AHashSet::new();
    let mut stack = Vec::new();
    let mut component = Vec::new();
    let mut acquired = 0;

    for start in 0..labels.len() {
        let id = labels[start];
        if visited[start] || id == INVALID_SEGMENT_ID {
            continue;
        }

        component.clear();
        stack.push(start);
        visited[start] = true;
        while let Some(index) = stack.pop() {
            component.push(index);
            let (x, y) = (index % width, index / width);
            let mut visit = |next: usize| {
                if !visited[next] && labels[next] == id {
                    visited[next] = true;
                    stack.push(next);
                }
            };
            if x > 0 {
                visit(index - 1);
            }
            if x + 1 < width {
                visit(index + 1);
            }
            if y > 0 {
                visit(index - width);
            }
            if y + 1 < height {
                visit(index + width);
            }
        }

        if !seen.insert(id) {
            let fresh = allocator.acquire().ok_or_else(|| {
                SegmenterError::allocation("Unable to acquire an id for a split segment")
            })?;
            for &index in &component {
                labels[index] = fresh;
            }
            seen.insert(fresh);
            acquired += 1;
        }
    }
    Ok(acquired)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connected_labels_untouched() {
        let allocator = SegmentIdAllocator::new();
        let mut labels = vec![1, 1, 2, 1, 2, 2, 0, 0, 2];

        assert_eq!(split_disconnected(&mut labels, 3, 3, &allocator).unwrap(), 0);
        assert_eq!(labels, vec![1, 1, 2, 1, 2, 2, 0, 0, 2]);
    }

    #[test]
    fn test_pieces_get_fresh_ids() {
        let allocator = SegmentIdAllocator::new();
        let used = allocator.acquire_many(2).unwrap();
        assert_eq!(used, vec![1, 2]);

        // Id 1 is split into three pieces.
        let mut labels = vec![
            1, 1, 2, //
            2, 2, 2, //
            1, 0, 1, //
        ];
        let acquired = split_disconnected(&mut labels, 3, 3, &allocator).unwrap();

        assert_eq!(acquired, 2);
        assert_eq!(&labels[..6], &[1, 1, 2, 2, 2, 2]);
        assert_eq!(labels[7], 0);
        let fresh: AHashSet<_> = [labels[6], labels[8]].into_iter().collect();
        assert_eq!(fresh.len(), 2);
        assert!(fresh.iter().all(|id| ![0, 1, 2].contains(id)));
        assert_eq!(allocator.live_count(), 4);
    }

    #[test]
    fn test_exhaustion_is_an_error() {
        let allocator = SegmentIdAllocator::with_limit(1);
        allocator.acquire().unwrap();
        let mut labels = vec![1, 0, 1];

        assert!(matches!(
            split_disconnected(&mut labels, 3, 1, &allocator),
            Err(SegmenterError::Allocation(_))
        ));
    }
}

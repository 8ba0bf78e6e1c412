//! Concurrency tests for the segment ID allocator.

use std::thread;

use ahash::AHashSet;
use parking_lot::Mutex;
use segmenta::segment::{INVALID_SEGMENT_ID, SegmentIdAllocator};

#[test]
fn test_concurrent_ids_never_duplicate() {
    let allocator = SegmentIdAllocator::new();
    let held = Mutex::new(AHashSet::new());

    thread::scope(|scope| {
        for worker in 0..8 {
            let allocator = &allocator;
            let held = &held;
            scope.spawn(move || {
                let mut mine = Vec::new();
                for round in 0..500 {
                    let id = allocator.acquire().unwrap();
                    assert_ne!(id, INVALID_SEGMENT_ID);
                    assert!(held.lock().insert(id), "id {id} issued twice");
                    mine.push(id);

                    if (round + worker) % 3 == 0 {
                        let id = mine.swap_remove(0);
                        held.lock().remove(&id);
                        allocator.release(id);
                    }
                }
                for id in mine.drain(..) {
                    held.lock().remove(&id);
                    allocator.release(id);
                }
            });
        }
    });

    assert!(held.lock().is_empty());
    assert_eq!(allocator.live_count(), 0);
}

#[test]
fn test_concurrent_batches_never_duplicate() {
    let allocator = SegmentIdAllocator::new();
    let held = Mutex::new(AHashSet::new());

    thread::scope(|scope| {
        for _ in 0..4 {
            let allocator = &allocator;
            let held = &held;
            scope.spawn(move || {
                for _ in 0..50 {
                    let batch = allocator.acquire_many(20).unwrap();
                    {
                        let mut held = held.lock();
                        for &id in &batch {
                            assert!(held.insert(id));
                        }
                    }
                    {
                        let mut held = held.lock();
                        for id in &batch {
                            held.remove(id);
                        }
                    }
                    allocator.release_many(&batch);
                }
            });
        }
    });

    assert_eq!(allocator.live_count(), 0);
    assert!(allocator.issued_count() <= 4 * 20);
}

#[test]
fn test_exhaustion_is_reported() {
    let allocator = SegmentIdAllocator::with_limit(3);

    assert!(allocator.acquire_many(4).is_none());
    let ids = allocator.acquire_many(3).unwrap();
    assert_eq!(ids.len(), 3);
    assert!(allocator.acquire().is_none());

    allocator.release(ids[1]);
    assert_eq!(allocator.acquire(), Some(ids[1]));
}

// Hard reference queue tests: scan window, reference counting and the
// eviction callback.

use std::collections::HashMap;

use bptree_engine::cache::{EvictionListener, HardReferenceQueue, RingBuffer};
use bptree_engine::{Error, Result};

/// Counts per handle plus a log of eviction callbacks. Panics if a handle
/// is evicted while its count is positive.
#[derive(Default)]
struct Recorder {
    counts: HashMap<u32, u32>,
    evicted: Vec<u32>,
    fail_on_evict: bool,
}

impl EvictionListener<u32> for Recorder {
    fn increment(&mut self, h: u32) -> u32 {
        let c = self.counts.entry(h).or_insert(0);
        *c += 1;
        *c
    }

    fn decrement(&mut self, h: u32) -> u32 {
        let c = self.counts.entry(h).or_insert(0);
        *c -= 1;
        *c
    }

    fn evicted(&mut self, h: u32) -> Result<()> {
        assert_eq!(self.counts[&h], 0, "handle {h} evicted with references");
        if self.fail_on_evict {
            return Err(Error::Io(std::io::Error::other("disk full")));
        }
        self.evicted.push(h);
        Ok(())
    }
}

// =============================================================================
// Test 1: Touch outside the window increments and appends
// =============================================================================
#[test]
fn touch_increments_and_appends() {
    let mut q = HardReferenceQueue::new(2, 0).unwrap();
    let mut l = Recorder::default();

    assert!(q.touch(7, &mut l).unwrap());
    assert_eq!(l.counts[&7], 1);
    assert_eq!(q.len(), 1);

    assert!(q.touch(7, &mut l).unwrap());
    assert_eq!(l.counts[&7], 2);
    assert_eq!(q.len(), 2);

    // full: one slot in, one out, count unchanged and no eviction
    assert!(q.touch(7, &mut l).unwrap());
    assert_eq!(l.counts[&7], 2);
    assert_eq!(q.len(), 2);
    assert!(l.evicted.is_empty());
}

// =============================================================================
// Test 2: Touch inside the window is a no-op
// =============================================================================
#[test]
fn touch_in_scan_window_is_noop() {
    let mut q = HardReferenceQueue::new(2, 1).unwrap();
    let mut l = Recorder::default();

    assert!(q.touch(7, &mut l).unwrap());
    assert!(!q.touch(7, &mut l).unwrap());
    assert_eq!(l.counts[&7], 1);
    assert_eq!(q.len(), 1);

    // a different handle pushes 7 out of the one-slot window
    assert!(q.touch(8, &mut l).unwrap());
    assert!(q.touch(7, &mut l).unwrap());
    assert_eq!(l.counts[&7], 1);
    assert_eq!(q.to_vec(), vec![8, 7]);
}

// =============================================================================
// Test 3: Eviction only fires at count zero
// =============================================================================
#[test]
fn eviction_fires_at_zero_only() {
    let mut q = HardReferenceQueue::new(3, 0).unwrap();
    let mut l = Recorder::default();

    for h in [1, 1, 2] {
        q.touch(h, &mut l).unwrap();
    }
    // evicts the first slot of 1; 1 still has a reference
    q.touch(3, &mut l).unwrap();
    assert_eq!(l.counts[&1], 1);
    assert!(l.evicted.is_empty());

    // evicts the last slot of 1
    q.touch(4, &mut l).unwrap();
    assert_eq!(l.counts[&1], 0);
    assert_eq!(l.evicted, vec![1]);

    q.touch(5, &mut l).unwrap();
    assert_eq!(l.evicted, vec![1, 2]);
    assert_eq!(q.to_vec(), vec![3, 4, 5]);
}

// =============================================================================
// Test 4: Capacity 1 never lets a re-touched handle reach zero
// =============================================================================
#[test]
fn capacity_one_retouch_keeps_reference() {
    let mut q = HardReferenceQueue::new(1, 0).unwrap();
    let mut l = Recorder::default();

    q.touch(9, &mut l).unwrap();
    for _ in 0..10 {
        q.touch(9, &mut l).unwrap();
        assert_eq!(l.counts[&9], 1);
    }
    assert!(l.evicted.is_empty());

    q.touch(10, &mut l).unwrap();
    assert_eq!(l.evicted, vec![9]);
}

// =============================================================================
// Test 5: Listener failures propagate out of touch
// =============================================================================
#[test]
fn eviction_error_propagates() {
    let mut q = HardReferenceQueue::new(1, 0).unwrap();
    let mut l = Recorder {
        fail_on_evict: true,
        ..Default::default()
    };
    q.touch(1, &mut l).unwrap();
    assert!(matches!(q.touch(2, &mut l), Err(Error::Io(_))));
}

#[test]
fn evict_all_releases_every_slot() {
    let mut q = HardReferenceQueue::new(4, 0).unwrap();
    let mut l = Recorder::default();
    for h in [1, 2, 1, 3] {
        q.touch(h, &mut l).unwrap();
    }
    q.evict_all(&mut l).unwrap();
    assert!(q.is_empty());
    assert_eq!(l.evicted, vec![2, 1, 3]);
}

#[test]
fn invalid_shapes_rejected() {
    assert!(matches!(
        HardReferenceQueue::<u32>::new(2, 3),
        Err(Error::InvalidArgument(_))
    ));
    assert!(HardReferenceQueue::<u32>::new(0, 0).is_err());
}

// =============================================================================
// Ring buffer
// =============================================================================
#[test]
fn ring_buffer_fifo_and_scan() {
    let mut ring = RingBuffer::new(3).unwrap();
    ring.add(1).unwrap();
    ring.add(2).unwrap();
    ring.add(3).unwrap();
    assert!(ring.is_full());
    assert!(matches!(ring.add(4), Err(Error::IllegalState(_))));
    assert!(!ring.offer(4));

    assert!(ring.scan_head(1, 3));
    assert!(!ring.scan_head(1, 2));
    assert!(ring.scan_head(2, 2));
    assert!(ring.scan_tail(1, 1));

    assert_eq!(ring.peek(), Some(1));
    assert_eq!(ring.poll(), Some(1));
    assert!(ring.offer(4));
    // wrapped around
    assert_eq!(ring.iter().collect::<Vec<_>>(), vec![2, 3, 4]);
    assert!(ring.scan_head(1, 4));

    ring.clear();
    assert!(ring.is_empty());
    assert_eq!(ring.poll(), None);
}

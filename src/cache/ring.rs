use crate::error::{Error, Result};

/// Fixed-capacity circular buffer.
///
/// New references enter at the head, the least recently added reference
/// sits at the tail. Comparisons are by handle identity (`Eq` on the
/// handle type), never by the contents of whatever the handle names.
///
/// ```text
///        tail                head
///         │                   │
///  [ _ ][ a ][ b ][ a ][ c ][ _ ]
///         LRU ───────────► MRU
/// ```
#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    refs: Vec<Option<T>>,
    head: usize,
    tail: usize,
    size: usize,
}

impl<T: Copy + Eq> RingBuffer<T> {
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::invalid("ring buffer capacity must be positive"));
        }
        Ok(RingBuffer {
            refs: vec![None; capacity],
            head: 0,
            tail: 0,
            size: 0,
        })
    }

    pub fn capacity(&self) -> usize {
        self.refs.len()
    }

    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn is_full(&self) -> bool {
        self.size == self.refs.len()
    }

    /// Adds at the head. Fails with `IllegalState` when full.
    pub fn add(&mut self, r: T) -> Result<()> {
        if self.offer(r) {
            Ok(())
        } else {
            Err(Error::illegal_state("ring buffer is full"))
        }
    }

    /// Adds at the head, returning false when full.
    pub fn offer(&mut self, r: T) -> bool {
        if self.is_full() {
            return false;
        }
        self.refs[self.head] = Some(r);
        self.head = (self.head + 1) % self.refs.len();
        self.size += 1;
        true
    }

    /// Removes and returns the LRU reference.
    pub fn poll(&mut self) -> Option<T> {
        if self.size == 0 {
            return None;
        }
        let r = self.refs[self.tail].take();
        self.tail = (self.tail + 1) % self.refs.len();
        self.size -= 1;
        r
    }

    /// The LRU reference, without removing it.
    pub fn peek(&self) -> Option<T> {
        if self.size == 0 {
            None
        } else {
            self.refs[self.tail]
        }
    }

    /// Reference at `index` slots from the tail (0 = LRU).
    pub fn get(&self, index: usize) -> Option<T> {
        if index >= self.size {
            return None;
        }
        self.refs[(self.tail + index) % self.refs.len()]
    }

    /// True if `r` is among the `nscan` most recently added references.
    pub fn scan_head(&self, nscan: usize, r: T) -> bool {
        let cap = self.refs.len();
        let mut i = self.head;
        for _ in 0..nscan.min(self.size) {
            i = if i == 0 { cap - 1 } else { i - 1 };
            if self.refs[i] == Some(r) {
                return true;
            }
        }
        false
    }

    /// True if `r` is among the `nscan` least recently added references.
    pub fn scan_tail(&self, nscan: usize, r: T) -> bool {
        self.iter().take(nscan).any(|x| x == r)
    }

    pub fn contains(&self, r: T) -> bool {
        self.iter().any(|x| x == r)
    }

    /// Iterates LRU to MRU.
    pub fn iter(&self) -> impl Iterator<Item = T> + '_ {
        (0..self.size).filter_map(move |i| self.get(i))
    }

    /// Drops every reference.
    pub fn clear(&mut self) {
        self.refs.iter_mut().for_each(|r| *r = None);
        self.head = 0;
        self.tail = 0;
        self.size = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_capacity_rejected() {
        assert!(RingBuffer::<u32>::new(0).is_err());
    }

    #[test]
    fn fifo_order_with_wraparound() {
        let mut ring = RingBuffer::new(3).unwrap();
        ring.add(1).unwrap();
        ring.add(2).unwrap();
        ring.add(3).unwrap();
        assert!(ring.is_full());
        assert!(ring.add(4).is_err());
        assert!(!ring.offer(4));
        assert_eq!(ring.poll(), Some(1));
        ring.add(4).unwrap();
        assert_eq!(ring.iter().collect::<Vec<_>>(), vec![2, 3, 4]);
        assert_eq!(ring.peek(), Some(2));
        assert_eq!(ring.get(2), Some(4));
        assert_eq!(ring.get(3), None);
    }

    #[test]
    fn scan_head_only_sees_recent_slots() {
        let mut ring = RingBuffer::new(4).unwrap();
        for r in [1, 2, 3, 4] {
            ring.add(r).unwrap();
        }
        assert!(ring.scan_head(1, 4));
        assert!(!ring.scan_head(1, 3));
        assert!(ring.scan_head(2, 3));
        assert!(!ring.scan_head(3, 1));
        assert!(ring.scan_head(4, 1));
        // wrap the head past index 0
        ring.poll();
        ring.add(5).unwrap();
        assert!(ring.scan_head(1, 5));
        assert!(ring.scan_tail(1, 2));
        assert!(!ring.scan_tail(1, 5));
    }

    #[test]
    fn scan_is_bounded_by_size() {
        let mut ring = RingBuffer::new(4).unwrap();
        ring.add(7).unwrap();
        assert!(ring.scan_head(10, 7));
        assert!(!ring.scan_head(10, 8));
    }

    #[test]
    fn clear_empties() {
        let mut ring = RingBuffer::new(2).unwrap();
        ring.add(1).unwrap();
        ring.clear();
        assert!(ring.is_empty());
        assert_eq!(ring.poll(), None);
        assert!(!ring.contains(1));
    }
}

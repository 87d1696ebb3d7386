//! Hard reference queue: bounded, reference-counted page retention.
//!
//! The queue decides which pages stay resident. Every touch of a page (not
//! already among the `nscan` most recent slots) takes one reference-count
//! unit and one queue slot. When the queue is full the oldest slot is
//! released; a page whose count reaches zero is handed to the eviction
//! listener, which persists it if dirty.
//!
//! The queue stores handles only. Reference counts live with whatever the
//! handles name and are reached through [`EvictionListener`].

pub mod ring;

use crate::error::{Error, Result};

pub use ring::RingBuffer;

/// Owner of the reference counts behind a [`HardReferenceQueue`].
pub trait EvictionListener<H> {
    /// Increments the count for `handle` and returns the new value.
    fn increment(&mut self, handle: H) -> u32;

    /// Decrements the count for `handle` and returns the new value.
    fn decrement(&mut self, handle: H) -> u32;

    /// Called once the count for `handle` has dropped to zero.
    /// An error propagates out of the `touch` that caused the eviction.
    fn evicted(&mut self, handle: H) -> Result<()>;
}

/// Bounded ring of page handles with a no-scan window.
#[derive(Debug, Clone)]
pub struct HardReferenceQueue<H> {
    ring: RingBuffer<H>,
    nscan: usize,
}

impl<H: Copy + Eq> HardReferenceQueue<H> {
    /// `nscan` is the number of most recent slots checked before a touch
    /// takes a new slot; 0 disables the check.
    pub fn new(capacity: usize, nscan: usize) -> Result<Self> {
        if nscan > capacity {
            return Err(Error::invalid(format!(
                "nscan {nscan} exceeds capacity {capacity}"
            )));
        }
        Ok(HardReferenceQueue {
            ring: RingBuffer::new(capacity)?,
            nscan,
        })
    }

    /// Records a use of `handle`.
    ///
    /// Returns false on the cheap path, when the handle was found in the
    /// no-scan window and nothing changed. Otherwise the handle's count is
    /// incremented and a slot appended, evicting the LRU slot if full.
    ///
    /// The count is incremented before the LRU slot is released, so with a
    /// capacity of 1 a page touched again never transiently reaches zero.
    pub fn touch<L>(&mut self, handle: H, listener: &mut L) -> Result<bool>
    where
        L: EvictionListener<H> + ?Sized,
    {
        if self.nscan > 0 && self.ring.scan_head(self.nscan, handle) {
            return Ok(false);
        }
        listener.increment(handle);
        let lru = if self.ring.is_full() {
            self.ring.poll()
        } else {
            None
        };
        // the slot was just freed (or never full), so this cannot fail
        self.ring.add(handle)?;
        if let Some(lru) = lru {
            if listener.decrement(lru) == 0 {
                listener.evicted(lru)?;
            }
        }
        Ok(true)
    }

    /// Releases every slot, oldest first, firing the listener for each
    /// handle whose count reaches zero.
    pub fn evict_all<L>(&mut self, listener: &mut L) -> Result<()>
    where
        L: EvictionListener<H> + ?Sized,
    {
        while let Some(lru) = self.ring.poll() {
            if listener.decrement(lru) == 0 {
                listener.evicted(lru)?;
            }
        }
        Ok(())
    }

    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }

    pub fn nscan(&self) -> usize {
        self.nscan
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    pub fn contains(&self, handle: H) -> bool {
        self.ring.contains(handle)
    }

    /// Handles in LRU to MRU order.
    pub fn to_vec(&self) -> Vec<H> {
        self.ring.iter().collect()
    }
}

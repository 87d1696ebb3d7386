use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

use crate::bloom::BloomFilter;
use crate::btree::{IndexMetadata, PageData, child_index};
use crate::cache::{EvictionListener, HardReferenceQueue};
use crate::error::{Error, Result};
use crate::rawstore::{Address, FileRawStore, RawStore};
use crate::segment::checkpoint::SegmentCheckpoint;
use crate::types::{Key, Tuple, Value};

/// A loaded, read-only index segment. Supports point lookups, bloom filter
/// membership and range scans.
///
/// Pages are read and decoded on demand. Decoded pages are retained while
/// they hold slots in a [`HardReferenceQueue`] shaped by the segment's
/// metadata; the bloom filter is read once and cached.
pub struct IndexSegment {
    store: Arc<FileRawStore>,
    checkpoint: SegmentCheckpoint,
    metadata: IndexMetadata,
    bloom: Mutex<Option<Arc<BloomFilter>>>,
    cache: Mutex<PageCache>,
}

impl IndexSegment {
    pub(crate) fn new(
        store: Arc<FileRawStore>,
        checkpoint: SegmentCheckpoint,
        metadata: IndexMetadata,
    ) -> Result<Self> {
        let queue = HardReferenceQueue::new(
            metadata.write_retention_queue_capacity(),
            metadata.write_retention_queue_scan(),
        )?;
        Ok(IndexSegment {
            store,
            checkpoint,
            metadata,
            bloom: Mutex::new(None),
            cache: Mutex::new(PageCache {
                queue,
                pages: CachedPages::default(),
            }),
        })
    }

    pub fn checkpoint(&self) -> &SegmentCheckpoint {
        &self.checkpoint
    }

    pub fn metadata(&self) -> &IndexMetadata {
        &self.metadata
    }

    pub fn entry_count(&self) -> u64 {
        self.checkpoint.entry_count
    }

    pub fn height(&self) -> u32 {
        self.checkpoint.height
    }

    pub fn branching_factor(&self) -> usize {
        self.metadata.branching_factor()
    }

    /// Number of decoded pages currently cached.
    pub fn cached_pages(&self) -> usize {
        self.cache.lock().pages.0.len()
    }

    /// The segment's bloom filter, read from the file on first use.
    /// `None` when the segment was built without one.
    pub fn bloom_filter(&self) -> Result<Option<Arc<BloomFilter>>> {
        if self.checkpoint.bloom_filter.is_null() {
            return Ok(None);
        }
        let mut cached = self.bloom.lock();
        if let Some(filter) = cached.as_ref() {
            return Ok(Some(filter.clone()));
        }
        let filter = Arc::new(BloomFilter::deserialize(
            &self.store.read(self.checkpoint.bloom_filter)?,
        )?);
        trace!(bits = filter.num_bits(), hashes = filter.num_hashes(), "loaded segment bloom filter");
        *cached = Some(filter.clone());
        Ok(Some(filter))
    }

    /// Point lookup. Consults the bloom filter first when there is one.
    pub fn lookup(&self, key: &[u8]) -> Result<Option<Value>> {
        if let Some(filter) = self.bloom_filter()? {
            if !filter.contains(key) {
                return Ok(None);
            }
        }
        let mut addr = self.checkpoint.root;
        loop {
            let page = self.page(addr)?;
            match &*page {
                PageData::Node { keys, children } => {
                    addr = children[child_index(keys, key)];
                }
                PageData::Leaf { keys, values } => {
                    return Ok(keys
                        .binary_search_by(|k| k.as_slice().cmp(key))
                        .ok()
                        .map(|i| values[i].clone()));
                }
            }
        }
    }

    pub fn contains(&self, key: &[u8]) -> Result<bool> {
        Ok(self.lookup(key)?.is_some())
    }

    /// Ascending iterator over `[from, to)`; `None` leaves a side open.
    /// Every call starts an independent traversal.
    pub fn range_iterator(&self, from: Option<&[u8]>, to: Option<&[u8]>) -> SegmentIterator<'_> {
        SegmentIterator {
            segment: self,
            from: from.map(<[u8]>::to_vec),
            to: to.map(<[u8]>::to_vec),
            stack: Vec::new(),
            leaf: None,
            pos: 0,
            done: matches!((from, to), (Some(f), Some(t)) if f >= t),
        }
    }

    pub fn iter(&self) -> SegmentIterator<'_> {
        self.range_iterator(None, None)
    }

    /// Checks that the bloom filter answers true for every key in the
    /// segment.
    pub fn verify_bloom_filter(&self) -> Result<()> {
        let Some(filter) = self.bloom_filter()? else {
            return Ok(());
        };
        for entry in self.iter() {
            let (key, _) = entry?;
            if !filter.contains(&key) {
                return Err(Error::ConsistencyViolation(format!(
                    "bloom filter false negative for key {key:02x?}"
                )));
            }
        }
        Ok(())
    }

    /// Decoded page at `addr`. The cache lock is not held across the read
    /// and decode, so concurrent misses proceed in parallel; when two
    /// readers race on one page the first insert wins.
    fn page(&self, addr: Address) -> Result<Arc<PageData>> {
        {
            let mut cache = self.cache.lock();
            if let Some(page) = cache.pages.get(addr) {
                cache.touch(addr)?;
                return Ok(page);
            }
        }
        let decoded = Arc::new(PageData::decode(&self.store.read(addr)?)?);
        let mut cache = self.cache.lock();
        let page = cache
            .pages
            .0
            .entry(addr)
            .or_insert_with(|| CachedPage {
                page: decoded,
                count: 0,
            })
            .page
            .clone();
        cache.touch(addr)?;
        trace!(%addr, "loaded segment page");
        Ok(page)
    }
}

struct CachedPage {
    page: Arc<PageData>,
    count: u32,
}

#[derive(Default)]
struct CachedPages(HashMap<Address, CachedPage>);

impl CachedPages {
    fn get(&self, addr: Address) -> Option<Arc<PageData>> {
        self.0.get(&addr).map(|c| c.page.clone())
    }
}

impl EvictionListener<Address> for CachedPages {
    fn increment(&mut self, addr: Address) -> u32 {
        self.0.get_mut(&addr).map_or(0, |c| {
            c.count += 1;
            c.count
        })
    }

    fn decrement(&mut self, addr: Address) -> u32 {
        self.0.get_mut(&addr).map_or(0, |c| {
            c.count = c.count.saturating_sub(1);
            c.count
        })
    }

    fn evicted(&mut self, addr: Address) -> Result<()> {
        self.0.remove(&addr);
        Ok(())
    }
}

struct PageCache {
    queue: HardReferenceQueue<Address>,
    pages: CachedPages,
}

impl PageCache {
    fn touch(&mut self, addr: Address) -> Result<()> {
        self.queue.touch(addr, &mut self.pages)?;
        Ok(())
    }
}

/// Lazy ascending traversal of an [`IndexSegment`].
///
/// Holds the decoded pages on the path to the current leaf, so the page
/// cache may drop them without affecting the iteration.
pub struct SegmentIterator<'a> {
    segment: &'a IndexSegment,
    from: Option<Key>,
    to: Option<Key>,
    stack: Vec<(Arc<PageData>, usize)>,
    leaf: Option<Arc<PageData>>,
    pos: usize,
    done: bool,
}

impl SegmentIterator<'_> {
    fn seek(&mut self) -> Result<()> {
        let mut addr = self.segment.checkpoint.root;
        loop {
            let page = self.segment.page(addr)?;
            let down = match &*page {
                PageData::Leaf { keys, .. } => {
                    self.pos = match &self.from {
                        Some(from) => keys.partition_point(|k| k < from),
                        None => 0,
                    };
                    None
                }
                PageData::Node { keys, children } => {
                    let idx = match &self.from {
                        Some(from) => child_index(keys, from),
                        None => 0,
                    };
                    Some((children[idx], idx))
                }
            };
            match down {
                Some((child, idx)) => {
                    self.stack.push((page, idx));
                    addr = child;
                }
                None => {
                    self.leaf = Some(page);
                    return Ok(());
                }
            }
        }
    }

    /// Moves to the first entry of the next leaf. Returns false past the
    /// last leaf.
    fn advance(&mut self) -> Result<bool> {
        let mut addr = loop {
            let Some((node, idx)) = self.stack.last_mut() else {
                return Ok(false);
            };
            let PageData::Node { children, .. } = &**node else {
                return Err(Error::ConsistencyViolation("leaf on iterator stack".into()));
            };
            if *idx + 1 < children.len() {
                *idx += 1;
                break children[*idx];
            }
            self.stack.pop();
        };
        loop {
            let page = self.segment.page(addr)?;
            let first_child = match &*page {
                PageData::Node { children, .. } => Some(children[0]),
                PageData::Leaf { .. } => None,
            };
            let Some(child) = first_child else {
                self.leaf = Some(page);
                self.pos = 0;
                return Ok(true);
            };
            self.stack.push((page, 0));
            addr = child;
        }
    }

    fn step(&mut self) -> Result<Option<Tuple>> {
        if self.leaf.is_none() {
            self.seek()?;
        }
        loop {
            if let Some(PageData::Leaf { keys, values }) = self.leaf.as_deref() {
                if let Some(key) = keys.get(self.pos) {
                    if self.to.as_ref().is_some_and(|to| key >= to) {
                        return Ok(None);
                    }
                    let tuple = (key.clone(), values[self.pos].clone());
                    self.pos += 1;
                    return Ok(Some(tuple));
                }
            }
            if !self.advance()? {
                return Ok(None);
            }
        }
    }
}

impl Iterator for SegmentIterator<'_> {
    type Item = Result<Tuple>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.step() {
            Ok(Some(tuple)) => Some(Ok(tuple)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

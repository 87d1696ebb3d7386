//! Mutable copy-on-write B+Tree over a [`RawStore`].
//!
//! Resident pages live in an arena and are named by [`PageId`]. A page is
//! either dirty (no address yet, freely mutable) or persistent (written,
//! immutable). A mutation first descends to the target leaf, then copies
//! every persistent page on that path top-down so that the whole path is
//! dirty before anything is changed. A dirty page therefore always has a
//! dirty parent.
//!
//! Residency is decided by the write retention queue. Each page visited by
//! an operation is touched; a page whose count reaches zero is persisted if
//! dirty and becomes a release candidate. Candidates are only dropped from
//! the arena at the end of an operation, once no handle is held on the
//! stack. Pages created during a mutation are touched after the mutation
//! has finished, so an eviction never observes a half-updated structure.

pub mod arena;
pub mod checkpoint;
pub mod iterator;
pub mod metadata;
pub mod page;

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, trace, warn};

use crate::bloom::BloomFilter;
use crate::cache::{EvictionListener, HardReferenceQueue};
use crate::error::{Error, Result};
use crate::rawstore::{Address, RawStore};
use crate::types::{Key, Value};

pub use arena::PageId;
pub use checkpoint::Checkpoint;
pub use iterator::RangeIterator;
pub use metadata::IndexMetadata;
pub use page::{PageData, child_index};

use arena::{Arena, Body, Child, Page};

/// Root-to-leaf path of one operation. `nodes[i].1` is the index of the
/// child taken out of `nodes[i].0`.
struct Path {
    nodes: Vec<(PageId, usize)>,
    leaf: PageId,
}

enum Bloom {
    /// No factory configured.
    Absent,
    /// Persisted, read on first use.
    Stored(Address),
    Live {
        filter: BloomFilter,
        dirty: bool,
        addr: Address,
    },
    /// Saturated, or never maintained for the committed entries.
    Disabled,
}

pub struct BTree {
    store: Arc<dyn RawStore>,
    metadata: IndexMetadata,
    metadata_addr: Address,
    read_only: bool,
    arena: Arena,
    root: PageId,
    queue: HardReferenceQueue<PageId>,
    height: u32,
    node_count: u64,
    leaf_count: u64,
    entry_count: u64,
    bloom: Bloom,
    last_checkpoint: Option<(Address, Checkpoint)>,
    /// Page records written since the last commit. Only these may be
    /// deleted from the store when superseded.
    uncommitted: HashSet<Address>,
    /// Pages created by the running mutation, touched once it completes.
    pending: Vec<PageId>,
    /// Pages whose reference count dropped to zero.
    released: Vec<PageId>,
}

impl BTree {
    /// Creates an empty tree whose pages will be written to `store`. The
    /// metadata record is written immediately.
    pub fn create(store: Arc<dyn RawStore>, metadata: IndexMetadata) -> Result<Self> {
        metadata::check_branching_factor(metadata.branching_factor())?;
        let queue = HardReferenceQueue::new(
            metadata.write_retention_queue_capacity(),
            metadata.write_retention_queue_scan(),
        )?;
        let metadata_addr = store.write(&metadata.encode())?;
        let bloom = match metadata.bloom_filter_factory() {
            Some(factory) => Bloom::Live {
                filter: factory.new_filter(),
                dirty: true,
                addr: Address::NULL,
            },
            None => Bloom::Absent,
        };
        let mut arena = Arena::default();
        let root = arena.alloc(Page::dirty(None, Body::empty_leaf()));
        let mut tree = BTree {
            store,
            metadata,
            metadata_addr,
            read_only: false,
            arena,
            root,
            queue,
            height: 0,
            node_count: 0,
            leaf_count: 1,
            entry_count: 0,
            bloom,
            last_checkpoint: None,
            uncommitted: HashSet::new(),
            pending: Vec::new(),
            released: Vec::new(),
        };
        tree.touch_page(root)?;
        debug!(
            uuid = %tree.metadata.uuid(),
            m = tree.metadata.branching_factor(),
            "created btree"
        );
        Ok(tree)
    }

    /// Loads the tree committed at `checkpoint_addr`. Only the root is read
    /// eagerly.
    pub fn load(store: Arc<dyn RawStore>, checkpoint_addr: Address, read_only: bool) -> Result<Self> {
        let checkpoint = Checkpoint::read(&*store, checkpoint_addr)?;
        let metadata = IndexMetadata::decode(&store.read(checkpoint.metadata)?)?;
        let root_data = PageData::decode(&store.read(checkpoint.root)?)?;
        if root_data.is_leaf() != (checkpoint.height == 0) {
            return Err(Error::corruption(format!(
                "checkpoint height {} does not match root page kind",
                checkpoint.height
            )));
        }
        let queue = HardReferenceQueue::new(
            metadata.write_retention_queue_capacity(),
            metadata.write_retention_queue_scan(),
        )?;
        let bloom = if !checkpoint.bloom_filter.is_null() {
            Bloom::Stored(checkpoint.bloom_filter)
        } else if metadata.bloom_filter_factory().is_some() {
            Bloom::Disabled
        } else {
            Bloom::Absent
        };
        let mut arena = Arena::default();
        let root = arena.alloc(Page::loaded(checkpoint.root, None, root_data));
        let mut tree = BTree {
            store,
            metadata,
            metadata_addr: checkpoint.metadata,
            read_only,
            arena,
            root,
            queue,
            height: checkpoint.height,
            node_count: checkpoint.node_count,
            leaf_count: checkpoint.leaf_count,
            entry_count: checkpoint.entry_count,
            bloom,
            last_checkpoint: Some((checkpoint_addr, checkpoint)),
            uncommitted: HashSet::new(),
            pending: Vec::new(),
            released: Vec::new(),
        };
        tree.touch_page(root)?;
        debug!(
            checkpoint = %checkpoint_addr,
            entries = checkpoint.entry_count,
            height = checkpoint.height,
            read_only,
            "loaded btree"
        );
        Ok(tree)
    }

    // ---------------------------------------------------------------
    // Public operations
    // ---------------------------------------------------------------

    /// Inserts or replaces the value under `key`, returning the prior value.
    pub fn insert(&mut self, key: &[u8], value: &[u8]) -> Result<Option<Value>> {
        self.assert_mutable()?;
        let result = self.insert_inner(key, value);
        let finished = self.finish_op();
        let prior = result?;
        finished?;
        Ok(prior)
    }

    /// Removes `key`, returning its value if it was present.
    pub fn remove(&mut self, key: &[u8]) -> Result<Option<Value>> {
        self.assert_mutable()?;
        let result = self.remove_inner(key);
        let finished = self.finish_op();
        let prior = result?;
        finished?;
        Ok(prior)
    }

    pub fn lookup(&mut self, key: &[u8]) -> Result<Option<Value>> {
        if !self.bloom_may_contain(key)? {
            return Ok(None);
        }
        let result = self
            .descend(key)
            .map(|path| self.leaf_get(path.leaf, key));
        let finished = self.finish_op();
        let found = result?;
        finished?;
        Ok(found)
    }

    pub fn contains(&mut self, key: &[u8]) -> Result<bool> {
        Ok(self.lookup(key)?.is_some())
    }

    /// Ascending iterator over `[from, to)`; `None` leaves a side open.
    pub fn range_iterator(&mut self, from: Option<&[u8]>, to: Option<&[u8]>) -> RangeIterator<'_> {
        RangeIterator::new(self, from.map(<[u8]>::to_vec), to.map(<[u8]>::to_vec))
    }

    /// Iterator over every entry.
    pub fn iter(&mut self) -> RangeIterator<'_> {
        self.range_iterator(None, None)
    }

    /// Persists every dirty page, the bloom filter if changed, and a new
    /// checkpoint. Returns the checkpoint address. A commit with nothing
    /// changed returns the previous checkpoint.
    pub fn commit(&mut self) -> Result<Address> {
        self.assert_mutable()?;
        let root = write_page(&mut self.arena, &*self.store, &mut self.uncommitted, self.root)?;
        let bloom_filter = match &mut self.bloom {
            Bloom::Live {
                filter,
                dirty,
                addr,
            } => {
                if *dirty || addr.is_null() {
                    *addr = self.store.write(&filter.serialize())?;
                    *dirty = false;
                }
                *addr
            }
            Bloom::Stored(addr) => *addr,
            Bloom::Absent | Bloom::Disabled => Address::NULL,
        };
        let checkpoint = Checkpoint {
            root,
            metadata: self.metadata_addr,
            bloom_filter,
            height: self.height,
            node_count: self.node_count,
            leaf_count: self.leaf_count,
            entry_count: self.entry_count,
        };
        if let Some((addr, last)) = &self.last_checkpoint {
            if *last == checkpoint {
                return Ok(*addr);
            }
        }
        let addr = checkpoint.write(&*self.store)?;
        let written = self.uncommitted.len();
        self.uncommitted.clear();
        self.last_checkpoint = Some((addr, checkpoint));
        debug!(
            checkpoint = %addr,
            root = %root,
            entries = self.entry_count,
            height = self.height,
            pages_written = written,
            "committed btree"
        );
        Ok(addr)
    }

    // ---------------------------------------------------------------
    // Accessors
    // ---------------------------------------------------------------

    pub fn last_checkpoint(&self) -> Option<(Address, &Checkpoint)> {
        self.last_checkpoint.as_ref().map(|(addr, cp)| (*addr, cp))
    }

    pub fn metadata(&self) -> &IndexMetadata {
        &self.metadata
    }

    pub fn store(&self) -> &Arc<dyn RawStore> {
        &self.store
    }

    pub fn branching_factor(&self) -> usize {
        self.metadata.branching_factor()
    }

    pub fn entry_count(&self) -> u64 {
        self.entry_count
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn node_count(&self) -> u64 {
        self.node_count
    }

    pub fn leaf_count(&self) -> u64 {
        self.leaf_count
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// The live or loaded bloom filter, reading it from the store on first
    /// use. `None` without a factory or once the filter was disabled.
    pub fn bloom_filter(&mut self) -> Result<Option<&BloomFilter>> {
        if let Bloom::Stored(addr) = self.bloom {
            let filter = BloomFilter::deserialize(&self.store.read(addr)?)?;
            trace!(%addr, bits = filter.num_bits(), "loaded bloom filter");
            self.bloom = Bloom::Live {
                filter,
                dirty: false,
                addr,
            };
        }
        Ok(match &self.bloom {
            Bloom::Live { filter, .. } => Some(filter),
            _ => None,
        })
    }

    /// Handle of the root page, touching it first if it holds no queue
    /// slot.
    pub fn root(&mut self) -> Result<PageId> {
        let root = self.root;
        if self.arena[root].reference_count == 0 {
            self.touch_page(root)?;
            self.release(&[]);
        }
        Ok(root)
    }

    /// Records a use of a resident page in the retention queue.
    pub fn touch(&mut self, id: PageId) -> Result<bool> {
        if self.arena.get(id).is_none() {
            return Err(Error::invalid(format!("page {id:?} is not resident")));
        }
        let appended = self.touch_page(id)?;
        self.release(&[]);
        Ok(appended)
    }

    /// `None` when the page is no longer resident.
    pub fn reference_count(&self, id: PageId) -> Option<u32> {
        self.arena.get(id).map(|p| p.reference_count)
    }

    /// `None` when the page is no longer resident.
    pub fn is_persistent(&self, id: PageId) -> Option<bool> {
        self.arena.get(id).map(Page::is_persistent)
    }

    /// Store address of a persistent resident page.
    pub fn page_address(&self, id: PageId) -> Option<Address> {
        self.arena.get(id).and_then(|p| p.addr)
    }

    pub fn retention_queue(&self) -> &HardReferenceQueue<PageId> {
        &self.queue
    }

    /// Number of pages currently held in memory.
    pub fn resident_pages(&self) -> usize {
        self.arena.len()
    }

    // ---------------------------------------------------------------
    // Traversal
    // ---------------------------------------------------------------

    fn assert_mutable(&self) -> Result<()> {
        if self.read_only {
            return Err(Error::illegal_state("btree is read-only"));
        }
        Ok(())
    }

    fn min_fill(&self) -> usize {
        self.metadata.branching_factor().div_ceil(2)
    }

    pub(crate) fn touch_page(&mut self, id: PageId) -> Result<bool> {
        let mut evictor = Evictor {
            arena: &mut self.arena,
            store: &*self.store,
            uncommitted: &mut self.uncommitted,
            released: &mut self.released,
        };
        self.queue.touch(id, &mut evictor)
    }

    pub(crate) fn root_id(&self) -> PageId {
        self.root
    }

    pub(crate) fn body(&self, id: PageId) -> &Body {
        &self.arena[id].body
    }

    /// Returns the resident child `idx` of `parent`, reading it from the
    /// store if needed. With `defer` the touch is postponed to the end of
    /// the running mutation.
    pub(crate) fn fetch_child(&mut self, parent: PageId, idx: usize, defer: bool) -> Result<PageId> {
        let slot = match &self.arena[parent].body {
            Body::Node { children, .. } => children.get(idx).copied().ok_or_else(|| {
                Error::ConsistencyViolation(format!("child index {idx} out of range"))
            })?,
            Body::Leaf { .. } => {
                return Err(Error::ConsistencyViolation("leaf has no children".into()));
            }
        };
        let id = match slot.page {
            Some(id) => id,
            None => {
                let addr = slot
                    .addr
                    .ok_or_else(|| Error::ConsistencyViolation("child slot is empty".into()))?;
                let data = PageData::decode(&self.store.read(addr)?)?;
                let id = self.arena.alloc(Page::loaded(addr, Some(parent), data));
                if let Body::Node { children, .. } = &mut self.arena[parent].body {
                    children[idx].page = Some(id);
                }
                trace!(page = id.index(), %addr, "loaded page");
                id
            }
        };
        if defer {
            self.pending.push(id);
        } else {
            self.touch_page(id)?;
        }
        Ok(id)
    }

    fn descend(&mut self, key: &[u8]) -> Result<Path> {
        let mut nodes = Vec::with_capacity(self.height as usize);
        let mut id = self.root;
        self.touch_page(id)?;
        loop {
            let idx = match &self.arena[id].body {
                Body::Leaf { .. } => return Ok(Path { nodes, leaf: id }),
                Body::Node { keys, .. } => child_index(keys, key),
            };
            nodes.push((id, idx));
            id = self.fetch_child(id, idx, false)?;
        }
    }

    fn leaf_get(&self, leaf: PageId, key: &[u8]) -> Option<Value> {
        match &self.arena[leaf].body {
            Body::Leaf { keys, values } => keys
                .binary_search_by(|k| k.as_slice().cmp(key))
                .ok()
                .map(|i| values[i].clone()),
            Body::Node { .. } => None,
        }
    }

    fn bloom_may_contain(&mut self, key: &[u8]) -> Result<bool> {
        Ok(self.bloom_filter()?.is_none_or(|f| f.contains(key)))
    }

    fn bloom_insert(&mut self, key: &[u8]) -> Result<()> {
        self.bloom_filter()?;
        let saturated = match &mut self.bloom {
            Bloom::Live { filter, dirty, .. } => {
                filter.insert(key);
                *dirty = true;
                filter.is_saturated().then(|| filter.max_inserts())
            }
            _ => None,
        };
        if let Some(max_inserts) = saturated {
            warn!(
                uuid = %self.metadata.uuid(),
                max_inserts,
                "bloom filter exceeded its error-rate ceiling, disabling"
            );
            self.bloom = Bloom::Disabled;
        }
        Ok(())
    }

    // ---------------------------------------------------------------
    // Mutation
    // ---------------------------------------------------------------

    fn insert_inner(&mut self, key: &[u8], value: &[u8]) -> Result<Option<Value>> {
        let mut path = self.descend(key)?;
        self.make_mutable(&mut path)?;
        let m = self.metadata.branching_factor();
        let (prior, overflow) = match &mut self.arena[path.leaf].body {
            Body::Leaf { keys, values } => match keys.binary_search_by(|k| k.as_slice().cmp(key)) {
                Ok(i) => (Some(std::mem::replace(&mut values[i], value.to_vec())), false),
                Err(i) => {
                    keys.insert(i, key.to_vec());
                    values.insert(i, value.to_vec());
                    (None, keys.len() > m)
                }
            },
            Body::Node { .. } => {
                return Err(Error::ConsistencyViolation("descent ended on a node".into()));
            }
        };
        if prior.is_none() {
            self.entry_count += 1;
            self.bloom_insert(key)?;
        }
        if overflow {
            self.split(path.nodes, path.leaf)?;
        }
        Ok(prior)
    }

    fn remove_inner(&mut self, key: &[u8]) -> Result<Option<Value>> {
        let mut path = self.descend(key)?;
        // a miss leaves every page as it was
        if self.leaf_get(path.leaf, key).is_none() {
            return Ok(None);
        }
        self.make_mutable(&mut path)?;
        let (prior, fill) = match &mut self.arena[path.leaf].body {
            Body::Leaf { keys, values } => {
                let i = keys
                    .binary_search_by(|k| k.as_slice().cmp(key))
                    .map_err(|_| Error::ConsistencyViolation("key vanished from leaf".into()))?;
                keys.remove(i);
                (values.remove(i), keys.len())
            }
            Body::Node { .. } => {
                return Err(Error::ConsistencyViolation("descent ended on a node".into()));
            }
        };
        self.entry_count -= 1;
        if !path.nodes.is_empty() && fill < self.min_fill() {
            self.rebalance(path.nodes, path.leaf)?;
        }
        Ok(Some(prior))
    }

    /// Copies every persistent page on `path`, root first.
    fn make_mutable(&mut self, path: &mut Path) -> Result<()> {
        let mut parent = None;
        for step in path.nodes.iter_mut() {
            step.0 = self.copy_on_write(step.0, parent)?;
            parent = Some(*step);
        }
        path.leaf = self.copy_on_write(path.leaf, parent)?;
        Ok(())
    }

    /// Returns `id` if it is dirty, otherwise a dirty copy that replaces it
    /// in slot `parent.1` of `parent.0` (or as the root).
    fn copy_on_write(&mut self, id: PageId, parent: Option<(PageId, usize)>) -> Result<PageId> {
        if !self.arena[id].is_persistent() {
            return Ok(id);
        }
        let body = self.arena[id].body.clone();
        let copy = self.arena.alloc(Page::dirty(parent.map(|(p, _)| p), body));
        self.reparent_children(copy);
        match parent {
            Some((p, slot)) => match &mut self.arena[p].body {
                Body::Node { children, .. } => children[slot] = Child::dirty(copy),
                Body::Leaf { .. } => {
                    return Err(Error::ConsistencyViolation("parent is a leaf".into()));
                }
            },
            None => self.root = copy,
        }
        self.discard(id)?;
        self.pending.push(copy);
        Ok(copy)
    }

    /// Marks a page superseded. Its record is deleted if it was written
    /// after the last commit.
    fn discard(&mut self, id: PageId) -> Result<()> {
        let page = &mut self.arena[id];
        page.deleted = true;
        page.parent = None;
        page.body = Body::empty_leaf();
        if page.reference_count == 0 {
            self.released.push(id);
        }
        if let Some(addr) = page.addr {
            if self.uncommitted.remove(&addr) {
                self.store.delete(addr)?;
                trace!(%addr, "deleted superseded page");
            }
        }
        Ok(())
    }

    fn reparent_children(&mut self, id: PageId) {
        for child in self.arena[id].body.resident_children() {
            if let Some(page) = self.arena.get_mut(child) {
                page.parent = Some(id);
            }
        }
    }

    fn take_body(&mut self, id: PageId) -> Body {
        std::mem::replace(&mut self.arena[id].body, Body::empty_leaf())
    }

    /// Splits `id` while it overflows, walking up `path`.
    fn split(&mut self, mut path: Vec<(PageId, usize)>, mut id: PageId) -> Result<()> {
        let m = self.metadata.branching_factor();
        loop {
            let (separator, right_body) = match &mut self.arena[id].body {
                Body::Leaf { keys, values } => {
                    if keys.len() <= m {
                        return Ok(());
                    }
                    let at = keys.len().div_ceil(2);
                    let right_keys = keys.split_off(at);
                    let right_values = values.split_off(at);
                    (
                        right_keys[0].clone(),
                        Body::Leaf {
                            keys: right_keys,
                            values: right_values,
                        },
                    )
                }
                Body::Node { keys, children } => {
                    if children.len() <= m {
                        return Ok(());
                    }
                    let at = children.len().div_ceil(2);
                    let right_children = children.split_off(at);
                    let mut right_keys = keys.split_off(at - 1);
                    let separator = right_keys.remove(0);
                    (
                        separator,
                        Body::Node {
                            keys: right_keys,
                            children: right_children,
                        },
                    )
                }
            };
            if right_body.is_leaf() {
                self.leaf_count += 1;
            } else {
                self.node_count += 1;
            }
            let right = self.arena.alloc(Page::dirty(None, right_body));
            self.reparent_children(right);
            self.pending.push(right);

            match path.pop() {
                Some((parent, idx)) => {
                    self.arena[right].parent = Some(parent);
                    match &mut self.arena[parent].body {
                        Body::Node { keys, children } => {
                            keys.insert(idx, separator);
                            children.insert(idx + 1, Child::dirty(right));
                        }
                        Body::Leaf { .. } => {
                            return Err(Error::ConsistencyViolation("parent is a leaf".into()));
                        }
                    }
                    id = parent;
                }
                None => {
                    let root = self.arena.alloc(Page::dirty(
                        None,
                        Body::Node {
                            keys: vec![separator],
                            children: vec![Child::dirty(id), Child::dirty(right)],
                        },
                    ));
                    self.arena[id].parent = Some(root);
                    self.arena[right].parent = Some(root);
                    self.root = root;
                    self.height += 1;
                    self.node_count += 1;
                    self.pending.push(root);
                    trace!(height = self.height, "root split");
                    return Ok(());
                }
            }
        }
    }

    /// Restores minimum fill of `id` by borrowing from or merging with a
    /// sibling, walking up `path` while merges leave parents short.
    fn rebalance(&mut self, mut path: Vec<(PageId, usize)>, mut id: PageId) -> Result<()> {
        let min = self.min_fill();
        while let Some((parent, idx)) = path.pop() {
            if self.arena[id].body.fill() >= min {
                return Ok(());
            }
            let nchildren = self.arena[parent].body.fill();
            let sib_idx = if idx + 1 < nchildren {
                idx + 1
            } else if idx > 0 {
                idx - 1
            } else {
                return Err(Error::ConsistencyViolation("node with a single child".into()));
            };
            let sibling = self.fetch_child(parent, sib_idx, true)?;
            let sibling = self.copy_on_write(sibling, Some((parent, sib_idx)))?;
            let from_right = sib_idx > idx;
            let (sep, left, right) = if from_right {
                (idx, id, sibling)
            } else {
                (sib_idx, sibling, id)
            };
            if self.arena[sibling].body.fill() > min {
                return self.borrow_entry(parent, sep, left, right, from_right);
            }
            self.merge(parent, sep, left, right)?;
            id = parent;
        }
        if let Body::Node { children, .. } = &self.arena[id].body {
            if children.len() == 1 {
                self.collapse_root()?;
            }
        }
        Ok(())
    }

    /// Moves one entry across the boundary `sep` between two adjacent
    /// children, from the sibling into the deficient page.
    fn borrow_entry(
        &mut self,
        parent: PageId,
        sep: usize,
        left: PageId,
        right: PageId,
        from_right: bool,
    ) -> Result<()> {
        let mut lb = self.take_body(left);
        let mut rb = self.take_body(right);
        let mut pb = self.take_body(parent);
        let moved = match &mut pb {
            Body::Node { keys, .. } => shift_entry(&mut lb, &mut rb, &mut keys[sep], from_right),
            Body::Leaf { .. } => Err(Error::ConsistencyViolation("parent is a leaf".into())),
        };
        self.arena[left].body = lb;
        self.arena[right].body = rb;
        self.arena[parent].body = pb;
        if let Some(child) = moved? {
            let owner = if from_right { left } else { right };
            if let Some(page) = self.arena.get_mut(child) {
                page.parent = Some(owner);
            }
        }
        Ok(())
    }

    /// Folds `right` into `left` and drops the separator between them.
    fn merge(&mut self, parent: PageId, sep: usize, left: PageId, right: PageId) -> Result<()> {
        let rb = self.take_body(right);
        let is_leaf = rb.is_leaf();
        let mut lb = self.take_body(left);
        let mut pb = self.take_body(parent);
        let result = match &mut pb {
            Body::Node { keys, children } => {
                let separator = keys.remove(sep);
                children.remove(sep + 1);
                append_body(&mut lb, rb, separator)
            }
            Body::Leaf { .. } => Err(Error::ConsistencyViolation("parent is a leaf".into())),
        };
        self.arena[left].body = lb;
        self.arena[parent].body = pb;
        result?;
        self.reparent_children(left);
        self.discard(right)?;
        if is_leaf {
            self.leaf_count -= 1;
        } else {
            self.node_count -= 1;
        }
        Ok(())
    }

    fn collapse_root(&mut self) -> Result<()> {
        let old = self.root;
        let child = match &self.arena[old].body {
            Body::Node { children, .. } => children.first().and_then(|c| c.page),
            Body::Leaf { .. } => None,
        }
        .ok_or_else(|| Error::ConsistencyViolation("sole child of root is not resident".into()))?;
        self.arena[child].parent = None;
        self.root = child;
        self.discard(old)?;
        self.height -= 1;
        self.node_count -= 1;
        trace!(height = self.height, "root collapsed");
        Ok(())
    }

    // ---------------------------------------------------------------
    // Retention
    // ---------------------------------------------------------------

    /// Touches the pages created by the last mutation, then drops released
    /// pages.
    fn finish_op(&mut self) -> Result<()> {
        let pending = std::mem::take(&mut self.pending);
        let mut result = Ok(());
        for id in pending {
            if self.arena.get(id).is_some_and(|p| !p.deleted) {
                if let Err(e) = self.touch_page(id) {
                    result = Err(e);
                    break;
                }
            }
        }
        self.release(&[]);
        result
    }

    /// Drops release candidates that are clean (or superseded) and still
    /// unreferenced. Handles in `pinned` survive until a later call.
    pub(crate) fn release(&mut self, pinned: &[PageId]) {
        let candidates = std::mem::take(&mut self.released);
        for id in candidates {
            if pinned.contains(&id) {
                self.released.push(id);
                continue;
            }
            let Some(page) = self.arena.get(id) else {
                continue;
            };
            if id == self.root || page.reference_count > 0 {
                continue;
            }
            if page.deleted || page.is_persistent() {
                self.drop_page(id);
            }
        }
    }

    fn drop_page(&mut self, id: PageId) {
        let Some(page) = self.arena.release(id) else {
            return;
        };
        if let Some(parent) = page.parent.and_then(|p| self.arena.get_mut(p)) {
            if let Body::Node { children, .. } = &mut parent.body {
                if let Some(slot) = children.iter_mut().find(|c| c.page == Some(id)) {
                    slot.page = None;
                }
            }
        }
        for child in page.body.resident_children() {
            if let Some(c) = self.arena.get_mut(child) {
                if c.parent == Some(id) {
                    c.parent = None;
                }
            }
        }
        trace!(page = id.index(), "released page");
    }
}

/// Routes retention-queue callbacks to the page arena.
struct Evictor<'a> {
    arena: &'a mut Arena,
    store: &'a dyn RawStore,
    uncommitted: &'a mut HashSet<Address>,
    released: &'a mut Vec<PageId>,
}

impl EvictionListener<PageId> for Evictor<'_> {
    fn increment(&mut self, id: PageId) -> u32 {
        let page = &mut self.arena[id];
        page.reference_count += 1;
        page.reference_count
    }

    fn decrement(&mut self, id: PageId) -> u32 {
        let page = &mut self.arena[id];
        page.reference_count = page.reference_count.saturating_sub(1);
        page.reference_count
    }

    fn evicted(&mut self, id: PageId) -> Result<()> {
        let page = &self.arena[id];
        if !page.deleted && !page.is_persistent() {
            let addr = write_page(self.arena, self.store, self.uncommitted, id)?;
            trace!(page = id.index(), %addr, "persisted evicted page");
        }
        self.released.push(id);
        Ok(())
    }
}

/// Writes a dirty page after its dirty children, post-order, and records
/// the new address in the parent's slot.
fn write_page(
    arena: &mut Arena,
    store: &dyn RawStore,
    uncommitted: &mut HashSet<Address>,
    id: PageId,
) -> Result<Address> {
    if let Some(addr) = arena[id].addr {
        return Ok(addr);
    }
    let dirty: Vec<(usize, PageId)> = match &arena[id].body {
        Body::Node { children, .. } => children
            .iter()
            .enumerate()
            .filter(|(_, c)| c.addr.is_none())
            .filter_map(|(i, c)| c.page.map(|p| (i, p)))
            .collect(),
        Body::Leaf { .. } => Vec::new(),
    };
    for (i, child) in dirty {
        let addr = write_page(arena, store, uncommitted, child)?;
        if let Body::Node { children, .. } = &mut arena[id].body {
            children[i].addr = Some(addr);
        }
    }
    let addr = store.write(&arena[id].body.to_page_data()?.encode())?;
    uncommitted.insert(addr);
    let page = &mut arena[id];
    page.addr = Some(addr);
    let parent = page.parent;
    if let Some(Body::Node { children, .. }) = parent.and_then(|p| arena.get_mut(p)).map(|p| &mut p.body) {
        if let Some(slot) = children.iter_mut().find(|c| c.page == Some(id)) {
            slot.addr = Some(addr);
        }
    }
    Ok(addr)
}

/// Moves the boundary entry between two adjacent siblings. Returns the
/// resident child that changed owner, if any.
fn shift_entry(lb: &mut Body, rb: &mut Body, sep: &mut Key, from_right: bool) -> Result<Option<PageId>> {
    match (lb, rb) {
        (Body::Leaf { keys: lk, values: lv }, Body::Leaf { keys: rk, values: rv }) => {
            if from_right {
                lk.push(rk.remove(0));
                lv.push(rv.remove(0));
            } else {
                let (Some(k), Some(v)) = (lk.pop(), lv.pop()) else {
                    return Err(Error::ConsistencyViolation("borrow from empty leaf".into()));
                };
                rk.insert(0, k);
                rv.insert(0, v);
            }
            *sep = rk
                .first()
                .cloned()
                .ok_or_else(|| Error::ConsistencyViolation("empty right leaf".into()))?;
            Ok(None)
        }
        (Body::Node { keys: lk, children: lc }, Body::Node { keys: rk, children: rc }) => {
            if from_right {
                lk.push(std::mem::replace(sep, rk.remove(0)));
                let child = rc.remove(0);
                lc.push(child);
                Ok(child.page)
            } else {
                let (Some(k), Some(child)) = (lk.pop(), lc.pop()) else {
                    return Err(Error::ConsistencyViolation("borrow from empty node".into()));
                };
                rk.insert(0, std::mem::replace(sep, k));
                rc.insert(0, child);
                Ok(child.page)
            }
        }
        _ => Err(Error::ConsistencyViolation("siblings of different kinds".into())),
    }
}

fn append_body(lb: &mut Body, rb: Body, separator: Key) -> Result<()> {
    match (lb, rb) {
        (Body::Leaf { keys: lk, values: lv }, Body::Leaf { keys: rk, values: rv }) => {
            lk.extend(rk);
            lv.extend(rv);
            Ok(())
        }
        (Body::Node { keys: lk, children: lc }, Body::Node { keys: rk, children: rc }) => {
            lk.push(separator);
            lk.extend(rk);
            lc.extend(rc);
            Ok(())
        }
        _ => Err(Error::ConsistencyViolation("siblings of different kinds".into())),
    }
}

use std::path::{Path, PathBuf};

use tracing::{debug, info};
use uuid::Uuid;

use crate::bloom::BloomFilter;
use crate::btree::{IndexMetadata, PageData};
use crate::error::{Error, Result};
use crate::rawstore::{Address, FileRawStore, RawStore};
use crate::segment::checkpoint::SegmentCheckpoint;
use crate::segment::plan::IndexSegmentPlan;
use crate::types::{Key, Tuple, Value};

/// Compiles an ascending stream of entries into an immutable index segment
/// file.
///
/// Build process:
/// 1. Entries fill leaves; a leaf is written as soon as it holds its
///    planned number of entries.
/// 2. Each written page hands its first key and address to the level above,
///    where a node is written once it holds its planned number of children.
/// 3. After the last entry the metadata and bloom filter are written,
///    then the header, then the file is synced and closed.
///
/// Working memory is one open page per level.
pub struct IndexSegmentBuilder {
    path: PathBuf,
    plan: IndexSegmentPlan,
    metadata: IndexMetadata,
    commit_time: u64,
    compacting_merge: bool,
    bloom: Option<BloomFilter>,
    checkpoint: Option<SegmentCheckpoint>,
}

impl IndexSegmentBuilder {
    /// Prepares a build of exactly `entry_count` entries into `path` with
    /// output branching factor `m`. The output metadata is `metadata` with
    /// its branching factor replaced by `m`; its bloom filter factory, if
    /// any, decides whether a filter is built.
    pub fn new(
        path: &Path,
        entry_count: u64,
        m: usize,
        metadata: &IndexMetadata,
        commit_time: u64,
        compacting_merge: bool,
    ) -> Result<Self> {
        let plan = IndexSegmentPlan::new(m, entry_count)?;
        let metadata = metadata.clone().with_branching_factor(m)?;
        let bloom = metadata
            .bloom_filter_factory()
            .map(|f| f.new_filter_exact(entry_count));
        Ok(IndexSegmentBuilder {
            path: path.to_path_buf(),
            plan,
            metadata,
            commit_time,
            compacting_merge,
            bloom,
            checkpoint: None,
        })
    }

    pub fn plan(&self) -> &IndexSegmentPlan {
        &self.plan
    }

    pub fn metadata(&self) -> &IndexMetadata {
        &self.metadata
    }

    /// The filter filled during the build. Available once `build` has run.
    pub fn bloom_filter(&self) -> Option<&BloomFilter> {
        self.bloom.as_ref()
    }

    pub fn checkpoint(&self) -> Option<&SegmentCheckpoint> {
        self.checkpoint.as_ref()
    }

    /// Consumes `entries` and writes the segment. Keys must be strictly
    /// ascending and exactly `entry_count` entries must be supplied. On
    /// error the partial file is left for the caller to discard, and the
    /// builder may be retried with a fresh iterator.
    pub fn build<I>(&mut self, entries: I) -> Result<SegmentCheckpoint>
    where
        I: IntoIterator<Item = Result<Tuple>>,
    {
        if self.checkpoint.is_some() {
            return Err(Error::illegal_state("segment already built"));
        }
        // a failed earlier attempt may have left keys in the filter
        self.bloom = self
            .metadata
            .bloom_filter_factory()
            .map(|f| f.new_filter_exact(self.plan.entry_count()));
        let store = FileRawStore::create(&self.path, SegmentCheckpoint::SIZE as u64)?;
        let mut state = BuildState::new(&store, &self.plan);

        for entry in entries {
            let (key, value) = entry?;
            if state.entries == self.plan.entry_count() {
                return Err(Error::invalid(format!(
                    "iterator yielded more than the declared {} entries",
                    self.plan.entry_count()
                )));
            }
            if let Some(filter) = self.bloom.as_mut() {
                filter.insert(&key);
            }
            state.add(key, value)?;
        }
        if state.entries != self.plan.entry_count() {
            return Err(Error::invalid(format!(
                "iterator yielded {} entries, {} declared",
                state.entries,
                self.plan.entry_count()
            )));
        }
        if self.plan.entry_count() == 0 {
            state.flush_leaf()?;
        }
        let root = state
            .root
            .ok_or_else(|| Error::ConsistencyViolation("build finished without a root".into()))?;

        let metadata = store.write(&self.metadata.encode())?;
        let bloom_filter = match &self.bloom {
            Some(filter) => store.write(&filter.serialize())?,
            None => Address::NULL,
        };
        let checkpoint = SegmentCheckpoint {
            uuid: Uuid::new_v4(),
            height: self.plan.height(),
            leaf_count: self.plan.leaf_count(),
            node_count: self.plan.node_count(),
            entry_count: self.plan.entry_count(),
            max_record_len: state.max_record_len,
            root,
            metadata,
            bloom_filter,
            first_leaf: state.first_leaf,
            last_leaf: state.last_leaf,
            file_size: store.size(),
            compacting_merge: self.compacting_merge,
            commit_time: self.commit_time,
        };
        store.write_header(&checkpoint.encode())?;
        store.close()?;

        info!(
            path = %self.path.display(),
            entries = checkpoint.entry_count,
            height = checkpoint.height,
            leaves = checkpoint.leaf_count,
            nodes = checkpoint.node_count,
            bytes = checkpoint.file_size,
            bloom = !bloom_filter.is_null(),
            "built index segment"
        );
        self.checkpoint = Some(checkpoint);
        Ok(checkpoint)
    }
}

/// Page under construction on one node level.
#[derive(Default)]
struct OpenNode {
    /// Position of this page within its level.
    index: u64,
    first_key: Option<Key>,
    keys: Vec<Key>,
    children: Vec<Address>,
}

struct BuildState<'a> {
    store: &'a FileRawStore,
    plan: &'a IndexSegmentPlan,
    entries: u64,
    last_key: Option<Key>,
    leaf_index: u64,
    leaf_keys: Vec<Key>,
    leaf_values: Vec<Value>,
    /// `nodes[i]` is the open page of level `i + 1`.
    nodes: Vec<OpenNode>,
    root: Option<Address>,
    first_leaf: Address,
    last_leaf: Address,
    max_record_len: u32,
}

impl<'a> BuildState<'a> {
    fn new(store: &'a FileRawStore, plan: &'a IndexSegmentPlan) -> Self {
        let capacity = plan.capacity(0, 0);
        BuildState {
            store,
            plan,
            entries: 0,
            last_key: None,
            leaf_index: 0,
            leaf_keys: Vec::with_capacity(capacity),
            leaf_values: Vec::with_capacity(capacity),
            nodes: (0..plan.height()).map(|_| OpenNode::default()).collect(),
            root: None,
            first_leaf: Address::NULL,
            last_leaf: Address::NULL,
            max_record_len: 0,
        }
    }

    fn add(&mut self, key: Key, value: Value) -> Result<()> {
        if let Some(last) = &self.last_key {
            if key <= *last {
                return Err(Error::invalid(format!(
                    "keys out of order at entry {}",
                    self.entries
                )));
            }
        }
        self.last_key = Some(key.clone());
        self.leaf_keys.push(key);
        self.leaf_values.push(value);
        self.entries += 1;
        if self.leaf_keys.len() == self.plan.capacity(0, self.leaf_index) {
            self.flush_leaf()?;
        }
        Ok(())
    }

    fn write(&mut self, page: &PageData) -> Result<Address> {
        let data = page.encode();
        self.max_record_len = self.max_record_len.max(data.len() as u32);
        self.store.write(&data)
    }

    fn flush_leaf(&mut self) -> Result<()> {
        let keys = std::mem::take(&mut self.leaf_keys);
        let values = std::mem::take(&mut self.leaf_values);
        let first = keys.first().cloned().unwrap_or_default();
        let addr = self.write(&PageData::Leaf { keys, values })?;
        if self.first_leaf.is_null() {
            self.first_leaf = addr;
        }
        self.last_leaf = addr;
        self.leaf_index += 1;
        let capacity = self.plan.capacity(0, self.leaf_index);
        self.leaf_keys.reserve(capacity);
        self.leaf_values.reserve(capacity);
        self.push_child(1, first, addr)
    }

    /// Adds a finished page to the open node of `level`, writing nodes
    /// upward as they fill. A page above the last node level is the root.
    fn push_child(&mut self, mut level: usize, mut first: Key, mut addr: Address) -> Result<()> {
        loop {
            if level > self.plan.height() as usize {
                self.root = Some(addr);
                return Ok(());
            }
            let capacity = self.plan.capacity(level, self.nodes[level - 1].index);
            let node = &mut self.nodes[level - 1];
            if node.first_key.is_none() {
                node.first_key = Some(first);
            } else {
                node.keys.push(first);
            }
            node.children.push(addr);
            if node.children.len() < capacity {
                return Ok(());
            }
            let page = PageData::Node {
                keys: std::mem::take(&mut node.keys),
                children: std::mem::take(&mut node.children),
            };
            first = node.first_key.take().unwrap_or_default();
            node.index += 1;
            addr = self.write(&page)?;
            debug!(level, %addr, "wrote segment node");
            level += 1;
        }
    }
}

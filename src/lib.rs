//! # B+Tree Storage Engine
//!
//! The storage core of a graph/RDF database: mutable copy-on-write
//! B+Trees for live indices and immutable, bulk-built index segments for
//! read-optimized snapshots.
//!
//! ## Core idea
//! Pages are written once to an append-style raw store and never updated
//! in place. A mutable tree copies any persistent page it needs to change,
//! so every committed checkpoint stays readable. A bounded retention queue
//! decides which pages stay in memory and persists dirty pages as they
//! fall out of it. When a tree is no longer updated, a single streaming
//! pass compiles it into a compact segment file with an optional bloom
//! filter in front of point lookups.

pub mod bloom;
pub mod btree;
pub mod cache;
pub(crate) mod codec;
pub mod error;
pub mod keys;
pub mod rawstore;
pub mod segment;
pub mod types;

// Public re-exports for the top-level API
pub use bloom::{BloomFilter, BloomFilterFactory};
pub use btree::{BTree, Checkpoint, IndexMetadata, PageId, RangeIterator};
pub use cache::{EvictionListener, HardReferenceQueue};
pub use error::{Error, Result};
pub use rawstore::{Address, FileRawStore, MemoryRawStore, RawStore};
pub use segment::{IndexSegment, IndexSegmentBuilder, IndexSegmentStore, SegmentCheckpoint};
pub use types::{Key, Tuple, Value};

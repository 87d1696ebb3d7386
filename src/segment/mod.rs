//! Immutable index segments: bulk-built B+Tree files.
//!
//! An [`IndexSegmentBuilder`] compiles a sorted entry stream (usually a
//! full range scan of a mutable tree) into a single file. An
//! [`IndexSegmentStore`] opens such a file and hands out read-only
//! [`IndexSegment`] views.
//!
//! ```text
//! ┌──────────────────┬─────────────────────────────┬──────────┬───────────────┐
//! │ SegmentCheckpoint│ leaves and nodes, bottom-up │ metadata │ bloom filter? │
//! └──────────────────┴─────────────────────────────┴──────────┴───────────────┘
//! ```

pub mod builder;
pub mod checkpoint;
pub mod plan;
pub mod reader;
pub mod store;

pub use builder::IndexSegmentBuilder;
pub use checkpoint::SegmentCheckpoint;
pub use plan::IndexSegmentPlan;
pub use reader::{IndexSegment, SegmentIterator};
pub use store::IndexSegmentStore;

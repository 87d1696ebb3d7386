use crate::btree::metadata::check_branching_factor;
use crate::error::{Error, Result};

/// Shape of an index segment computed from the branching factor and the
/// exact entry count before any page is written.
///
/// Each level holds as few pages as the branching factor allows, and the
/// items of a level (entries for leaves, children for nodes) are spread
/// evenly so that page `i` of a level with `N` pages and `I` items holds
/// `I / N` items, plus one when `i < I % N`. Every non-root page therefore
/// holds at least `⌈m/2⌉` items.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSegmentPlan {
    branching_factor: usize,
    entry_count: u64,
    /// Page count per level; index 0 is the leaf level, the last is the root.
    levels: Vec<u64>,
}

impl IndexSegmentPlan {
    pub fn new(branching_factor: usize, entry_count: u64) -> Result<Self> {
        check_branching_factor(branching_factor)?;
        let m = branching_factor as u64;
        let leaves = entry_count.div_ceil(m).max(1);
        if leaves > u32::MAX as u64 {
            return Err(Error::invalid(format!(
                "{entry_count} entries need {leaves} leaves at branching factor {m}"
            )));
        }
        let mut levels = vec![leaves];
        let mut count = leaves;
        while count > 1 {
            count = count.div_ceil(m);
            levels.push(count);
        }
        Ok(IndexSegmentPlan {
            branching_factor,
            entry_count,
            levels,
        })
    }

    pub fn branching_factor(&self) -> usize {
        self.branching_factor
    }

    pub fn entry_count(&self) -> u64 {
        self.entry_count
    }

    /// Node levels above the leaves.
    pub fn height(&self) -> u32 {
        (self.levels.len() - 1) as u32
    }

    pub fn leaf_count(&self) -> u64 {
        self.levels[0]
    }

    pub fn node_count(&self) -> u64 {
        self.levels[1..].iter().sum()
    }

    /// Pages on `level` (0 = leaves).
    pub fn pages_at(&self, level: usize) -> u64 {
        self.levels.get(level).copied().unwrap_or(0)
    }

    /// Items held by all pages of `level`: entries for leaves, children
    /// for nodes.
    pub fn items_at(&self, level: usize) -> u64 {
        match level {
            0 => self.entry_count,
            _ => self.pages_at(level - 1),
        }
    }

    /// Items held by page `index` of `level`.
    pub fn capacity(&self, level: usize, index: u64) -> usize {
        let pages = self.pages_at(level);
        if pages == 0 || index >= pages {
            return 0;
        }
        let items = self.items_at(level);
        let extra = u64::from(index < items % pages);
        (items / pages + extra) as usize
    }
}

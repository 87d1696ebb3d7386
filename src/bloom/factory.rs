use crate::bloom::BloomFilter;
use crate::error::{Error, Result};

/// Per-index bloom filter configuration, persisted in `IndexMetadata`.
///
/// - `n`: expected number of inserts into a live (mutable) index
/// - `p`: target false positive rate at `n` inserts
/// - `max_p`: ceiling; a live filter past this rate is disabled
///
/// When the exact key count is known up front (segment builds), only `p`
/// matters: the filter is sized for that count and never saturates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BloomFilterFactory {
    n: usize,
    p: f64,
    max_p: f64,
}

impl BloomFilterFactory {
    pub const DEFAULT_N: usize = 1_000_000;
    pub const DEFAULT_P: f64 = 0.02;
    pub const DEFAULT_MAX_P: f64 = 0.15;

    pub fn new(n: usize, p: f64, max_p: f64) -> Result<Self> {
        if n == 0 {
            return Err(Error::invalid("bloom filter n must be positive"));
        }
        if !(p > 0.0 && p < 1.0) {
            return Err(Error::invalid(format!("bloom filter p={p} not in (0, 1)")));
        }
        if !(max_p >= p && max_p < 1.0) {
            return Err(Error::invalid(format!(
                "bloom filter maxP={max_p} not in [p, 1)"
            )));
        }
        Ok(BloomFilterFactory { n, p, max_p })
    }

    pub fn n(&self) -> usize {
        self.n
    }

    pub fn p(&self) -> f64 {
        self.p
    }

    pub fn max_p(&self) -> f64 {
        self.max_p
    }

    /// Filter for a live index: sized from `n`/`p`, saturating at `max_p`.
    pub fn new_filter(&self) -> BloomFilter {
        BloomFilter::sized_with_ceiling(self.n, self.p, self.max_p)
    }

    /// Filter for exactly `count` keys; `n` and `max_p` are ignored.
    pub fn new_filter_exact(&self, count: u64) -> BloomFilter {
        let count = usize::try_from(count).unwrap_or(usize::MAX).max(1);
        BloomFilter::sized(count, self.p)
    }
}

impl Default for BloomFilterFactory {
    fn default() -> Self {
        BloomFilterFactory {
            n: Self::DEFAULT_N,
            p: Self::DEFAULT_P,
            max_p: Self::DEFAULT_MAX_P,
        }
    }
}

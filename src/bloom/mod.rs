pub mod factory;

use xxhash_rust::xxh3::xxh3_128;

use crate::codec::{CRC_SIZE, Decoder, seal, unseal};
use crate::error::{Error, Result};

pub use factory::BloomFilterFactory;

/// Magic number leading a serialized bloom filter ("BLM1").
pub const BLOOM_MAGIC: u32 = 0x424C_4D31;

/// Set-membership filter over raw keys.
///
/// `contains` never answers false for an inserted key; after the expected
/// number of inserts it answers true for an absent key with probability at
/// most the configured rate. Positions
/// are derived by double hashing, `h1 + i·h2 mod m`, with `h1` and `h2` the
/// two halves of one xxh3-128 digest.
///
/// ```text
///   k ∈ {⌊-log2 p⌋, ⌈-log2 p⌉}
///   m = ⌈-k·n / ln(1 - p^(1/k))⌉      n = 100, p = 1/64  → k = 6, m = 866
/// ```
///
/// The filter counts inserts. Past `max_inserts` the expected rate is above
/// the ceiling it was built with and [`is_saturated`] turns true.
///
/// [`is_saturated`]: BloomFilter::is_saturated
#[derive(Debug, Clone, PartialEq)]
pub struct BloomFilter {
    words: Vec<u64>,
    num_hashes: u32,
    num_bits: u64,
    inserts: u64,
    max_inserts: u64,
    target_rate: f64,
    max_rate: f64,
}

impl BloomFilter {
    /// Sizes a filter so that `expected_items` keys give an expected false
    /// positive rate of at most `false_positive_rate`. Never smaller than
    /// one word.
    pub fn new(expected_items: usize, false_positive_rate: f64) -> Result<Self> {
        check_sizing(expected_items, false_positive_rate)?;
        Ok(Self::sized(expected_items, false_positive_rate))
    }

    /// Like [`new`](Self::new), but saturates once the expected error rate
    /// would exceed `max_rate`.
    pub fn with_ceiling(
        expected_items: usize,
        false_positive_rate: f64,
        max_rate: f64,
    ) -> Result<Self> {
        check_sizing(expected_items, false_positive_rate)?;
        if !(max_rate >= false_positive_rate && max_rate < 1.0) {
            return Err(Error::invalid(format!(
                "bloom filter ceiling {max_rate} not in [{false_positive_rate}, 1)"
            )));
        }
        Ok(Self::sized_with_ceiling(expected_items, false_positive_rate, max_rate))
    }

    /// Unchecked constructor for validated parameters.
    ///
    /// The real optimum `k* = -log2 p` is rounded both ways. For each
    /// integer `k` the smallest `m` with `(1 - e^(-k·n/m))^k <= p` is
    /// `m = -k·n / ln(1 - p^(1/k))`, and the pair needing fewer bits wins.
    fn sized(expected_items: usize, false_positive_rate: f64) -> Self {
        let n = expected_items.max(1) as f64;
        let optimum = -false_positive_rate.log2();
        let candidates = [optimum.floor().max(1.0), optimum.ceil().max(1.0)];
        let (num_bits, num_hashes) = candidates
            .iter()
            .map(|&k| {
                let m = (-k * n / (1.0 - false_positive_rate.powf(1.0 / k)).ln()).ceil();
                let mut m = (m as u64).max(64);
                // absorb floating point error at the boundary
                while rate_at(k, n, m as f64) > false_positive_rate {
                    m += 1;
                }
                (m, k as u32)
            })
            .min_by_key(|&(m, _)| m)
            .unwrap_or((64, 1));

        BloomFilter {
            words: vec![0u64; num_bits.div_ceil(64) as usize],
            num_hashes,
            num_bits,
            inserts: 0,
            max_inserts: u64::MAX,
            target_rate: false_positive_rate,
            max_rate: false_positive_rate,
        }
    }

    fn sized_with_ceiling(expected_items: usize, false_positive_rate: f64, max_rate: f64) -> Self {
        let mut filter = Self::sized(expected_items, false_positive_rate);
        filter.max_rate = max_rate;
        filter.max_inserts = filter
            .inserts_at_rate(max_rate)
            .max(expected_items as u64);
        filter
    }

    /// Returns true if any bit flipped.
    pub fn insert(&mut self, key: &[u8]) -> bool {
        let (h1, h2) = digest(key);
        let mut changed = false;
        for i in 0..self.num_hashes {
            changed |= self.set(self.probe(h1, h2, i));
        }
        self.inserts += 1;
        changed
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        let (h1, h2) = digest(key);
        (0..self.num_hashes).all(|i| self.is_set(self.probe(h1, h2, i)))
    }

    /// Number of `insert` calls so far (duplicates included).
    pub fn inserts(&self) -> u64 {
        self.inserts
    }

    /// Insert count beyond which the filter exceeds its error-rate ceiling.
    pub fn max_inserts(&self) -> u64 {
        self.max_inserts
    }

    pub fn is_saturated(&self) -> bool {
        self.inserts > self.max_inserts
    }

    pub fn target_rate(&self) -> f64 {
        self.target_rate
    }

    pub fn max_rate(&self) -> f64 {
        self.max_rate
    }

    /// Expected false positive rate after `n` distinct inserts,
    /// `(1 - e^(-k·n/m))^k`.
    pub fn expected_error_rate(&self, n: u64) -> f64 {
        rate_at(self.num_hashes as f64, n as f64, self.num_bits as f64)
    }

    // inverse of expected_error_rate
    fn inserts_at_rate(&self, rate: f64) -> u64 {
        let k = self.num_hashes as f64;
        let m = self.num_bits as f64;
        let n = -(m / k) * (1.0 - rate.powf(1.0 / k)).ln();
        if n.is_finite() && n > 0.0 {
            n.floor() as u64
        } else {
            0
        }
    }

    pub fn num_hashes(&self) -> u32 {
        self.num_hashes
    }

    pub fn num_bits(&self) -> u64 {
        self.num_bits
    }

    /// Encodes the filter as a standalone raw-store record.
    ///
    /// ```text
    /// [magic(4B)][num_hashes(4B)][num_bits(8B)][inserts(8B)][max_inserts(8B)]
    /// [target_rate(8B)][max_rate(8B)][words(8B each)...][crc(4B)]
    /// ```
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(48 + self.words.len() * 8 + CRC_SIZE);
        buf.extend_from_slice(&BLOOM_MAGIC.to_le_bytes());
        buf.extend_from_slice(&self.num_hashes.to_le_bytes());
        buf.extend_from_slice(&self.num_bits.to_le_bytes());
        buf.extend_from_slice(&self.inserts.to_le_bytes());
        buf.extend_from_slice(&self.max_inserts.to_le_bytes());
        buf.extend_from_slice(&self.target_rate.to_le_bytes());
        buf.extend_from_slice(&self.max_rate.to_le_bytes());
        for word in &self.words {
            buf.extend_from_slice(&word.to_le_bytes());
        }
        seal(&mut buf);
        buf
    }

    pub fn deserialize(data: &[u8]) -> Result<Self> {
        let mut d = Decoder::new(unseal(data, "bloom filter")?, "bloom filter");
        let magic = d.u32()?;
        if magic != BLOOM_MAGIC {
            return Err(Error::corruption(format!(
                "bad bloom magic: expected {BLOOM_MAGIC:#x}, got {magic:#x}"
            )));
        }
        let num_hashes = d.u32()?;
        let num_bits = d.u64()?;
        let inserts = d.u64()?;
        let max_inserts = d.u64()?;
        let target_rate = d.f64()?;
        let max_rate = d.f64()?;

        if num_hashes == 0 || num_bits == 0 || d.remaining() as u64 != num_bits.div_ceil(64) * 8 {
            return Err(Error::corruption(format!(
                "bloom filter shape mismatch: {num_bits} bits in {} bytes",
                d.remaining()
            )));
        }
        let words = (0..num_bits.div_ceil(64))
            .map(|_| d.u64())
            .collect::<Result<Vec<_>>>()?;
        d.finish()?;

        Ok(BloomFilter {
            words,
            num_hashes,
            num_bits,
            inserts,
            max_inserts,
            target_rate,
            max_rate,
        })
    }

    fn probe(&self, h1: u64, h2: u64, i: u32) -> u64 {
        h1.wrapping_add((i as u64).wrapping_mul(h2)) % self.num_bits
    }

    /// Returns true if the bit was clear.
    fn set(&mut self, pos: u64) -> bool {
        let word = &mut self.words[(pos / 64) as usize];
        let mask = 1u64 << (pos % 64);
        let was_clear = *word & mask == 0;
        *word |= mask;
        was_clear
    }

    fn is_set(&self, pos: u64) -> bool {
        (self.words[(pos / 64) as usize] >> (pos % 64)) & 1 == 1
    }
}

fn check_sizing(expected_items: usize, false_positive_rate: f64) -> Result<()> {
    if expected_items == 0 {
        return Err(Error::invalid("bloom filter expected_items must be positive"));
    }
    if !(false_positive_rate > 0.0 && false_positive_rate < 1.0) {
        return Err(Error::invalid(format!(
            "bloom filter rate {false_positive_rate} not in (0, 1)"
        )));
    }
    Ok(())
}

fn rate_at(k: f64, n: f64, m: f64) -> f64 {
    (1.0 - (-k * n / m).exp()).powf(k)
}

fn digest(key: &[u8]) -> (u64, u64) {
    let h = xxh3_128(key);
    (h as u64, (h >> 64) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inserted_key_is_found() {
        let mut filter = BloomFilter::new(100, 0.01).unwrap();
        assert!(filter.insert(b"hello"));
        assert!(filter.contains(b"hello"));
        assert!(!filter.contains(b"world"));
    }

    #[test]
    fn serialize_preserves_membership() {
        let mut bf = BloomFilter::with_ceiling(100, 1.0 / 64.0, 1.0 / 32.0).unwrap();
        for i in 0..50u32 {
            bf.insert(&i.to_be_bytes());
        }
        let decoded = BloomFilter::deserialize(&bf.serialize()).unwrap();
        assert_eq!(decoded, bf);
        for i in 0..50u32 {
            assert!(decoded.contains(&i.to_be_bytes()));
        }
    }

    #[test]
    fn deserialize_detects_corruption() {
        let bf = BloomFilter::new(10, 0.01).unwrap();
        let mut data = bf.serialize();
        data[20] ^= 0xFF;
        assert!(matches!(
            BloomFilter::deserialize(&data),
            Err(Error::Corruption(_))
        ));
        assert!(BloomFilter::deserialize(&[0u8; 8]).is_err());
    }

    #[test]
    fn ceiling_is_above_expected_count() {
        let bf = BloomFilter::with_ceiling(100, 1.0 / 64.0, 1.0 / 32.0).unwrap();
        assert!(bf.max_inserts() >= 100);
        assert!(bf.expected_error_rate(bf.max_inserts()) <= 1.0 / 32.0 + 1e-9);
        assert!(bf.expected_error_rate(100) <= 1.0 / 64.0);
    }

    #[test]
    fn rate_at_expected_count_never_exceeds_target() {
        for n in [1usize, 3, 10, 100, 1000, 12_345, 1_000_000] {
            for p in [0.5, 0.2, 0.1, 0.05, 0.02, 1.0 / 64.0, 0.01, 0.001, 1e-6] {
                let bf = BloomFilter::sized(n, p);
                let rate = bf.expected_error_rate(n as u64);
                assert!(rate <= p, "n={n} p={p}: {} bits, k={} gives {rate}", bf.num_bits, bf.num_hashes);
            }
        }
    }

    #[test]
    fn rejects_unusable_parameters() {
        for (n, p) in [(0, 0.01), (10, 0.0), (10, 1.0), (10, -0.5), (10, f64::NAN)] {
            assert!(matches!(BloomFilter::new(n, p), Err(Error::InvalidArgument(_))));
        }
        assert!(matches!(
            BloomFilter::with_ceiling(10, 0.1, 0.05),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn saturates_past_ceiling() {
        let mut bf = BloomFilter::with_ceiling(4, 0.1, 0.2).unwrap();
        let max = bf.max_inserts();
        for i in 0..=max {
            bf.insert(&i.to_le_bytes());
        }
        assert!(bf.is_saturated());
    }
}

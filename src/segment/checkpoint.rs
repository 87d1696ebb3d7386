use uuid::Uuid;

use crate::codec::{self, Decoder};
use crate::error::{Error, Result};
use crate::rawstore::Address;

/// Magic number to identify index segment files.
pub const SEGMENT_MAGIC: u64 = 0x4250_5452_5345_4700; // "BPTRSEG\0"
pub const SEGMENT_VERSION: u32 = 1;

/// Fixed-size header at offset 0 of every index segment file.
///
/// Written last, once every page, the metadata and the bloom filter are on
/// disk, so a file whose header does not verify was never completed.
///
/// ```text
/// ┌──────────────────────────────────────┐
/// │ Magic (8B)  Version (4B)  UUID (16B) │
/// │ Height (4B)                          │
/// │ Leaves (8B) Nodes (8B) Entries (8B)  │
/// │ Max record length (4B)               │
/// │ Root / metadata / bloom addr (8B ×3) │
/// │ First / last leaf addr (8B ×2)       │
/// │ File size (8B)                       │
/// │ Compacting merge (1B)                │
/// │ Commit time (8B)                     │
/// │ CRC (4B)                             │
/// └──────────────────────────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentCheckpoint {
    pub uuid: Uuid,
    pub height: u32,
    pub leaf_count: u64,
    pub node_count: u64,
    pub entry_count: u64,
    /// Largest page record in the file, in bytes.
    pub max_record_len: u32,
    pub root: Address,
    pub metadata: Address,
    /// `Address::NULL` when the segment carries no bloom filter.
    pub bloom_filter: Address,
    pub first_leaf: Address,
    pub last_leaf: Address,
    pub file_size: u64,
    pub compacting_merge: bool,
    /// Opaque commit timestamp supplied by the caller of the build.
    pub commit_time: u64,
}

impl SegmentCheckpoint {
    /// Size of the header in bytes (fixed).
    pub const SIZE: usize = 8 + 4 + 16 + 4 + 8 * 3 + 4 + 8 * 5 + 8 + 1 + 8 + codec::CRC_SIZE;

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::SIZE);
        buf.extend_from_slice(&SEGMENT_MAGIC.to_le_bytes());
        buf.extend_from_slice(&SEGMENT_VERSION.to_le_bytes());
        buf.extend_from_slice(self.uuid.as_bytes());
        buf.extend_from_slice(&self.height.to_le_bytes());
        buf.extend_from_slice(&self.leaf_count.to_le_bytes());
        buf.extend_from_slice(&self.node_count.to_le_bytes());
        buf.extend_from_slice(&self.entry_count.to_le_bytes());
        buf.extend_from_slice(&self.max_record_len.to_le_bytes());
        for addr in [
            self.root,
            self.metadata,
            self.bloom_filter,
            self.first_leaf,
            self.last_leaf,
        ] {
            buf.extend_from_slice(&addr.raw().to_le_bytes());
        }
        buf.extend_from_slice(&self.file_size.to_le_bytes());
        buf.push(u8::from(self.compacting_merge));
        buf.extend_from_slice(&self.commit_time.to_le_bytes());
        codec::seal(&mut buf);
        buf
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE {
            return Err(Error::corruption("segment header too short"));
        }
        let body = codec::unseal(&data[..Self::SIZE], "segment header")?;
        let mut d = Decoder::new(body, "segment header");
        let magic = d.u64()?;
        if magic != SEGMENT_MAGIC {
            return Err(Error::corruption(format!(
                "bad magic: expected {SEGMENT_MAGIC:#x}, got {magic:#x}"
            )));
        }
        let version = d.u32()?;
        if version != SEGMENT_VERSION {
            return Err(Error::corruption(format!(
                "unsupported segment version {version}"
            )));
        }
        let cp = SegmentCheckpoint {
            uuid: Uuid::from_bytes(d.array::<16>()?),
            height: d.u32()?,
            leaf_count: d.u64()?,
            node_count: d.u64()?,
            entry_count: d.u64()?,
            max_record_len: d.u32()?,
            root: Address::from_raw(d.u64()?),
            metadata: Address::from_raw(d.u64()?),
            bloom_filter: Address::from_raw(d.u64()?),
            first_leaf: Address::from_raw(d.u64()?),
            last_leaf: Address::from_raw(d.u64()?),
            file_size: d.u64()?,
            compacting_merge: d.u8()? != 0,
            commit_time: d.u64()?,
        };
        d.finish()?;
        if cp.root.is_null() || cp.metadata.is_null() {
            return Err(Error::corruption("segment header without root or metadata"));
        }
        Ok(cp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SegmentCheckpoint {
        SegmentCheckpoint {
            uuid: Uuid::new_v4(),
            height: 1,
            leaf_count: 3,
            node_count: 1,
            entry_count: 9,
            max_record_len: 512,
            root: Address::new(900, 60).unwrap(),
            metadata: Address::new(960, 80).unwrap(),
            bloom_filter: Address::NULL,
            first_leaf: Address::new(SegmentCheckpoint::SIZE as u64, 100).unwrap(),
            last_leaf: Address::new(700, 200).unwrap(),
            file_size: 1040,
            compacting_merge: true,
            commit_time: 1_700_000_000_000,
        }
    }

    #[test]
    fn header_roundtrip() {
        let cp = sample();
        let encoded = cp.encode();
        assert_eq!(encoded.len(), SegmentCheckpoint::SIZE);
        assert_eq!(SegmentCheckpoint::decode(&encoded).unwrap(), cp);
    }

    #[test]
    fn header_bad_magic() {
        let mut encoded = sample().encode();
        // Corrupt the magic
        encoded[0] = 0xFF;
        assert!(SegmentCheckpoint::decode(&encoded).is_err());
    }

    #[test]
    fn unwritten_header_rejected() {
        assert!(SegmentCheckpoint::decode(&[0u8; SegmentCheckpoint::SIZE]).is_err());
    }

    #[test]
    fn header_too_short() {
        assert!(SegmentCheckpoint::decode(&[0u8; 10]).is_err());
    }
}

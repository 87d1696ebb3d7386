use crate::codec::{self, Decoder};
use crate::error::{Error, Result};
use crate::rawstore::{Address, RawStore};

const CHECKPOINT_MAGIC: u32 = 0x4350_4B54; // "CPKT"
const CHECKPOINT_VERSION: u8 = 1;

/// Point-in-time descriptor of a mutable B+Tree.
///
/// Written as its own record on every commit; loading a tree from a
/// checkpoint address recovers exactly the state committed there.
///
/// ```text
/// ┌──────────┬────────────┬───────────┬───────────────┬────────────┬─────────────┐
/// │ magic(4B)│ version(1B)│ root(8B)  │ metadata(8B)  │ bloom(8B)  │ height(4B)  │
/// ├──────────┴────────────┴───────────┴───────────────┴────────────┴─────────────┤
/// │ nnodes(8B) │ nleaves(8B) │ nentries(8B) │ CRC(4B)                            │
/// └──────────────────────────────────────────────────────────────────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checkpoint {
    pub root: Address,
    pub metadata: Address,
    /// `Address::NULL` when the index has no (or a disabled) bloom filter.
    pub bloom_filter: Address,
    /// Number of node levels above the leaves; 0 means a root leaf.
    pub height: u32,
    pub node_count: u64,
    pub leaf_count: u64,
    pub entry_count: u64,
}

impl Checkpoint {
    pub const SIZE: usize = 4 + 1 + 8 * 3 + 4 + 8 * 3 + codec::CRC_SIZE;

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::SIZE);
        buf.extend_from_slice(&CHECKPOINT_MAGIC.to_le_bytes());
        buf.push(CHECKPOINT_VERSION);
        buf.extend_from_slice(&self.root.raw().to_le_bytes());
        buf.extend_from_slice(&self.metadata.raw().to_le_bytes());
        buf.extend_from_slice(&self.bloom_filter.raw().to_le_bytes());
        buf.extend_from_slice(&self.height.to_le_bytes());
        buf.extend_from_slice(&self.node_count.to_le_bytes());
        buf.extend_from_slice(&self.leaf_count.to_le_bytes());
        buf.extend_from_slice(&self.entry_count.to_le_bytes());
        codec::seal(&mut buf);
        buf
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() != Self::SIZE {
            return Err(Error::corruption(format!(
                "checkpoint is {} bytes, expected {}",
                data.len(),
                Self::SIZE
            )));
        }
        let body = codec::unseal(data, "checkpoint")?;
        let mut d = Decoder::new(body, "checkpoint");
        let magic = d.u32()?;
        if magic != CHECKPOINT_MAGIC {
            return Err(Error::corruption(format!(
                "bad checkpoint magic: expected {CHECKPOINT_MAGIC:#x}, got {magic:#x}"
            )));
        }
        let version = d.u8()?;
        if version != CHECKPOINT_VERSION {
            return Err(Error::corruption(format!(
                "unsupported checkpoint version {version}"
            )));
        }
        let cp = Checkpoint {
            root: Address::from_raw(d.u64()?),
            metadata: Address::from_raw(d.u64()?),
            bloom_filter: Address::from_raw(d.u64()?),
            height: d.u32()?,
            node_count: d.u64()?,
            leaf_count: d.u64()?,
            entry_count: d.u64()?,
        };
        d.finish()?;
        if cp.root.is_null() || cp.metadata.is_null() {
            return Err(Error::corruption("checkpoint without root or metadata"));
        }
        Ok(cp)
    }

    pub fn write(&self, store: &dyn RawStore) -> Result<Address> {
        store.write(&self.encode())
    }

    pub fn read(store: &dyn RawStore, addr: Address) -> Result<Self> {
        Self::decode(&store.read(addr)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rawstore::MemoryRawStore;

    fn sample() -> Checkpoint {
        Checkpoint {
            root: Address::new(100, 40).unwrap(),
            metadata: Address::new(0, 100).unwrap(),
            bloom_filter: Address::NULL,
            height: 2,
            node_count: 4,
            leaf_count: 9,
            entry_count: 25,
        }
    }

    #[test]
    fn checkpoint_roundtrip_through_store() {
        let store = MemoryRawStore::new();
        let addr = sample().write(&store).unwrap();
        assert_eq!(addr.byte_count(), Checkpoint::SIZE);
        assert_eq!(Checkpoint::read(&store, addr).unwrap(), sample());
    }

    #[test]
    fn checkpoint_bad_magic() {
        let mut encoded = sample().encode();
        encoded[0] = 0xFF;
        assert!(Checkpoint::decode(&encoded).is_err());
    }

    #[test]
    fn checkpoint_too_short() {
        assert!(Checkpoint::decode(&[0u8; 10]).is_err());
    }
}

use crate::codec::{self, Decoder};
use crate::error::{Error, Result};
use crate::rawstore::Address;
use crate::types::{Key, Value};

const KIND_LEAF: u8 = 0x01;
const KIND_NODE: u8 = 0x02;

/// Serialized form of one B+Tree page, shared by mutable trees and index
/// segments.
///
/// On-disk layout:
/// ```text
/// ┌─────────┬───────────┬──────────────────────────┬─────────────────────────────┬──────────┐
/// │ kind(1B)│ nkeys(4B) │ keys: [len(4B)][bytes]…  │ leaf: values [len(4B)][b]…  │ CRC (4B) │
/// │         │           │                          │ node: child addrs (8B)…×n+1 │          │
/// └─────────┴───────────┴──────────────────────────┴─────────────────────────────┴──────────┘
/// ```
///
/// A node with `n` separator keys has `n + 1` children; child `i` holds the
/// keys `k` with `keys[i-1] <= k < keys[i]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageData {
    Leaf { keys: Vec<Key>, values: Vec<Value> },
    Node { keys: Vec<Key>, children: Vec<Address> },
}

impl PageData {
    pub fn empty_leaf() -> Self {
        PageData::Leaf {
            keys: Vec::new(),
            values: Vec::new(),
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, PageData::Leaf { .. })
    }

    pub fn keys(&self) -> &[Key] {
        match self {
            PageData::Leaf { keys, .. } | PageData::Node { keys, .. } => keys,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_size_hint());
        match self {
            PageData::Leaf { keys, values } => {
                buf.push(KIND_LEAF);
                buf.extend_from_slice(&(keys.len() as u32).to_le_bytes());
                for k in keys {
                    codec::put_bytes(&mut buf, k);
                }
                for v in values {
                    codec::put_bytes(&mut buf, v);
                }
            }
            PageData::Node { keys, children } => {
                buf.push(KIND_NODE);
                buf.extend_from_slice(&(keys.len() as u32).to_le_bytes());
                for k in keys {
                    codec::put_bytes(&mut buf, k);
                }
                for c in children {
                    buf.extend_from_slice(&c.raw().to_le_bytes());
                }
            }
        }
        codec::seal(&mut buf);
        buf
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let body = codec::unseal(data, "page")?;
        let mut d = Decoder::new(body, "page");
        let kind = d.u8()?;
        let nkeys = d.u32()? as usize;
        // every key costs at least its 4-byte length prefix
        if nkeys > d.remaining() / 4 {
            return Err(Error::corruption(format!("page claims {nkeys} keys")));
        }
        let mut keys = Vec::with_capacity(nkeys);
        for _ in 0..nkeys {
            keys.push(d.bytes()?);
        }
        let page = match kind {
            KIND_LEAF => {
                let mut values = Vec::with_capacity(nkeys);
                for _ in 0..nkeys {
                    values.push(d.bytes()?);
                }
                PageData::Leaf { keys, values }
            }
            KIND_NODE => {
                let mut children = Vec::with_capacity(nkeys + 1);
                for _ in 0..=nkeys {
                    children.push(Address::from_raw(d.u64()?));
                }
                PageData::Node { keys, children }
            }
            other => {
                return Err(Error::corruption(format!("invalid page kind: {other:#x}")));
            }
        };
        d.finish()?;
        Ok(page)
    }

    fn encoded_size_hint(&self) -> usize {
        let keys: usize = self.keys().iter().map(|k| 4 + k.len()).sum();
        let rest = match self {
            PageData::Leaf { values, .. } => values.iter().map(|v| 4 + v.len()).sum(),
            PageData::Node { children, .. } => children.len() * 8,
        };
        1 + 4 + keys + rest + codec::CRC_SIZE
    }
}

/// Index of the child of a node that covers `key`.
pub fn child_index(separators: &[Key], key: &[u8]) -> usize {
    separators.partition_point(|k| k.as_slice() <= key)
}

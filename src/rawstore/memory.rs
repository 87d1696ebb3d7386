use std::collections::HashMap;

use bytes::Bytes;
use parking_lot::RwLock;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::rawstore::{Address, RawStore};

/// Fully buffered raw store. Records live in a hash map keyed by address.
///
/// Offsets are assigned as if records were appended to a file, so the
/// addresses look exactly like those of [`FileRawStore`](super::FileRawStore).
/// Offsets are never reused, so a deleted address simply has no entry and
/// nothing is kept per deleted record.
pub struct MemoryRawStore {
    uuid: Uuid,
    inner: RwLock<Inner>,
}

struct Inner {
    open: bool,
    next_offset: u64,
    records: HashMap<Address, Bytes>,
}

impl MemoryRawStore {
    pub fn new() -> Self {
        Self::with_capacity(1000)
    }

    /// Pre-sizes the record table for `capacity` records.
    pub fn with_capacity(capacity: usize) -> Self {
        MemoryRawStore {
            uuid: Uuid::new_v4(),
            inner: RwLock::new(Inner {
                open: true,
                next_offset: 0,
                records: HashMap::with_capacity(capacity),
            }),
        }
    }

    /// Number of live (written and not deleted) records.
    pub fn record_count(&self) -> usize {
        self.inner.read().records.len()
    }
}

impl Default for MemoryRawStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RawStore for MemoryRawStore {
    fn write(&self, data: &[u8]) -> Result<Address> {
        if data.is_empty() {
            return Err(Error::invalid("no bytes remaining in buffer"));
        }
        let mut inner = self.inner.write();
        if !inner.open {
            return Err(Error::illegal_state("store is closed"));
        }
        let addr = Address::new(inner.next_offset, data.len())?;
        inner.next_offset += data.len() as u64;
        // exact-fit copy, the caller keeps ownership of its buffer
        inner.records.insert(addr, Bytes::copy_from_slice(data));
        Ok(addr)
    }

    fn read(&self, addr: Address) -> Result<Bytes> {
        addr.validate()?;
        let inner = self.inner.read();
        if !inner.open {
            return Err(Error::illegal_state("store is closed"));
        }
        inner
            .records
            .get(&addr)
            .cloned()
            .ok_or_else(|| Error::invalid(format!("no record at {addr}")))
    }

    fn delete(&self, addr: Address) -> Result<()> {
        addr.validate()?;
        let mut inner = self.inner.write();
        if !inner.open {
            return Err(Error::illegal_state("store is closed"));
        }
        match inner.records.remove(&addr) {
            Some(_) => Ok(()),
            None => Err(Error::invalid(format!("no record at {addr}"))),
        }
    }

    fn force(&self) -> Result<()> {
        Ok(())
    }

    fn close(&self) -> Result<()> {
        let mut inner = self.inner.write();
        if !inner.open {
            return Err(Error::illegal_state("store already closed"));
        }
        inner.open = false;
        inner.records.clear();
        Ok(())
    }

    fn destroy(&self) -> Result<()> {
        if self.is_open() {
            self.close()?;
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.inner.read().open
    }

    fn is_read_only(&self) -> bool {
        false
    }

    fn size(&self) -> u64 {
        self.inner.read().next_offset
    }

    fn uuid(&self) -> Uuid {
        self.uuid
    }
}

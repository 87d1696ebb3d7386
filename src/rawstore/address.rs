use std::fmt;

use crate::error::{Error, Result};

/// Number of low-order bits holding the record's byte count.
pub const BYTE_COUNT_BITS: u32 = 24;

/// Number of high-order bits holding the record's byte offset.
pub const OFFSET_BITS: u32 = 64 - BYTE_COUNT_BITS;

/// Largest record a store can address.
pub const MAX_RECORD_LEN: usize = (1 << BYTE_COUNT_BITS) - 1;

/// Largest byte offset a store can address.
pub const MAX_OFFSET: u64 = (1 << OFFSET_BITS) - 1;

/// Opaque token naming a record in a raw store.
///
/// ```text
/// ┌──────────────────────────┬──────────────────────┐
/// │ offset (40 bits)         │ byte count (24 bits) │
/// └──────────────────────────┴──────────────────────┘
/// ```
///
/// `Address::NULL` (0) and any address encoding a zero byte count are
/// never returned by `write` and are rejected by `read`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Address(u64);

impl Address {
    pub const NULL: Address = Address(0);

    /// Packs an offset and byte count.
    pub fn new(offset: u64, nbytes: usize) -> Result<Self> {
        if nbytes == 0 {
            return Err(Error::invalid("record length of zero"));
        }
        if nbytes > MAX_RECORD_LEN {
            return Err(Error::invalid(format!(
                "record length {nbytes} exceeds maximum {MAX_RECORD_LEN}"
            )));
        }
        if offset > MAX_OFFSET {
            return Err(Error::invalid(format!("offset {offset} not addressable")));
        }
        Ok(Address((offset << BYTE_COUNT_BITS) | nbytes as u64))
    }

    pub fn from_raw(raw: u64) -> Self {
        Address(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }

    pub fn offset(self) -> u64 {
        self.0 >> BYTE_COUNT_BITS
    }

    pub fn byte_count(self) -> usize {
        (self.0 & MAX_RECORD_LEN as u64) as usize
    }

    pub fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Rejects NULL and zero-length encodings.
    pub fn validate(self) -> Result<()> {
        if self.is_null() {
            return Err(Error::invalid("address is 0"));
        }
        if self.byte_count() == 0 {
            return Err(Error::invalid("address encodes record length of zero"));
        }
        Ok(())
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            write!(f, "{{NULL}}")
        } else {
            write!(f, "{{off={},len={}}}", self.offset(), self.byte_count())
        }
    }
}

//! Raw record stores.
//!
//! A raw store holds immutable, variable-length byte records. Each `write`
//! returns an [`Address`] encoding where the record landed and how long it
//! is; `read` hands back an independent copy of those bytes. Records are
//! never updated in place.
//!
//! Delete policy: `delete(addr)` makes the address permanently unreadable
//! through the store handle. The memory backend frees the bytes and keeps
//! nothing for the address. The file backend is write-once, reclaims no
//! space and holds one tombstone per deleted record for the life of the
//! handle.

pub mod address;
pub mod file;
pub mod memory;
pub mod stream;

use bytes::Bytes;
use uuid::Uuid;

use crate::error::Result;

pub use address::Address;
pub use file::FileRawStore;
pub use memory::MemoryRawStore;
pub use stream::{RecordInputStream, RecordOutputStream};

/// Append-style store of immutable records.
///
/// Implementations are shared between a tree and its readers, so every
/// method takes `&self` and the backend guards its own state.
pub trait RawStore: Send + Sync {
    /// Copies `data` into a new record and returns its address.
    ///
    /// Fails with `InvalidArgument` on an empty buffer and with
    /// `IllegalState` on a closed or read-only store.
    fn write(&self, data: &[u8]) -> Result<Address>;

    /// Reads the record at `addr`. The returned buffer starts at 0 and is
    /// exactly the record's length. It shares nothing mutable with the store.
    fn read(&self, addr: Address) -> Result<Bytes>;

    /// Releases the record at `addr` (see the module-level delete policy).
    fn delete(&self, addr: Address) -> Result<()>;

    /// Flushes buffered writes to stable storage.
    fn force(&self) -> Result<()>;

    /// Closes the store. Fails with `IllegalState` when already closed.
    fn close(&self) -> Result<()>;

    /// Closes the store if open and deletes its backing resources.
    fn destroy(&self) -> Result<()>;

    fn is_open(&self) -> bool;

    fn is_read_only(&self) -> bool;

    /// Bytes allocated so far, including any reserved header.
    fn size(&self) -> u64;

    fn uuid(&self) -> Uuid;
}

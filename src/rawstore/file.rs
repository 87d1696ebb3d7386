use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
#[cfg(unix)]
use std::os::unix::fs::FileExt;
#[cfg(windows)]
use std::os::windows::fs::FileExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::rawstore::{Address, RawStore};

/// Write-once raw store backed by a single file.
///
/// ```text
/// ┌────────────────────────┬──────────┬──────────┬─────
/// │ header (header_len B)  │ record 0 │ record 1 │ ...
/// └────────────────────────┴──────────┴──────────┴─────
/// ```
///
/// Records are appended after an optional fixed-size header region that
/// the owner (e.g. the segment checkpoint) fills via [`write_header`].
/// Addresses are absolute file offsets.
///
/// Reads use positional I/O (`pread`) on a shared handle and never take
/// the write lock, so readers of an immutable file do not serialize.
/// Appends, close and reopen are serialized by `write_lock`.
///
/// Deleted addresses are remembered as tombstones until the handle is
/// dropped: one entry per deleted record, since no space is reclaimed.
///
/// [`write_header`]: FileRawStore::write_header
pub struct FileRawStore {
    path: PathBuf,
    uuid: Uuid,
    header_len: u64,
    read_only: bool,
    /// None once closed.
    file: RwLock<Option<Arc<File>>>,
    /// End of the last complete record.
    next_offset: AtomicU64,
    deleted: RwLock<HashSet<Address>>,
    write_lock: Mutex<()>,
}

impl FileRawStore {
    /// Creates (or truncates) `path` and reserves `header_len` zero bytes.
    pub fn create(path: &Path, header_len: u64) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.set_len(header_len)?;
        Ok(Self::with_file(path, file, header_len, header_len, false))
    }

    /// Opens an existing store. New records are appended at end of file.
    pub fn open(path: &Path, header_len: u64, read_only: bool) -> Result<Self> {
        let file = Self::open_file(path, read_only)?;
        let len = file.metadata()?.len();
        if len < header_len {
            return Err(Error::corruption(format!(
                "{}: {len} bytes is too small for a {header_len} byte header",
                path.display()
            )));
        }
        Ok(Self::with_file(path, file, header_len, len, read_only))
    }

    fn with_file(path: &Path, file: File, header_len: u64, len: u64, read_only: bool) -> Self {
        FileRawStore {
            path: path.to_path_buf(),
            uuid: Uuid::new_v4(),
            header_len,
            read_only,
            file: RwLock::new(Some(Arc::new(file))),
            next_offset: AtomicU64::new(len),
            deleted: RwLock::new(HashSet::new()),
            write_lock: Mutex::new(()),
        }
    }

    fn open_file(path: &Path, read_only: bool) -> Result<File> {
        Ok(OpenOptions::new().read(true).write(!read_only).open(path)?)
    }

    /// The open handle. The `file` lock is held only long enough to clone it.
    fn handle(&self) -> Result<Arc<File>> {
        self.file
            .read()
            .clone()
            .ok_or_else(|| Error::illegal_state("store is closed"))
    }

    /// Re-opens a closed store on the same file. A no-op when already open.
    pub fn reopen(&self) -> Result<()> {
        let _guard = self.write_lock.lock();
        let mut slot = self.file.write();
        if slot.is_some() {
            return Ok(());
        }
        let file = Self::open_file(&self.path, self.read_only)?;
        self.next_offset
            .store(file.metadata()?.len(), Ordering::Release);
        *slot = Some(Arc::new(file));
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn header_len(&self) -> u64 {
        self.header_len
    }

    /// Overwrites the reserved header region starting at offset 0.
    pub fn write_header(&self, data: &[u8]) -> Result<()> {
        if data.len() as u64 > self.header_len {
            return Err(Error::invalid(format!(
                "header of {} bytes exceeds reserved {} bytes",
                data.len(),
                self.header_len
            )));
        }
        if self.read_only {
            return Err(Error::illegal_state("store is read-only"));
        }
        let _guard = self.write_lock.lock();
        write_all_at(&*self.handle()?, data, 0)
    }

    /// Reads the whole reserved header region.
    pub fn read_header(&self) -> Result<Vec<u8>> {
        let file = self.handle()?;
        let mut buf = vec![0u8; self.header_len as usize];
        read_exact_at(&file, &mut buf, 0)?;
        Ok(buf)
    }

    fn check_extent(&self, addr: Address) -> Result<()> {
        let end = addr.offset() + addr.byte_count() as u64;
        let next = self.next_offset.load(Ordering::Acquire);
        if addr.offset() < self.header_len || end > next {
            return Err(Error::invalid(format!(
                "address {addr} outside of store extent [{}, {next})",
                self.header_len
            )));
        }
        Ok(())
    }
}

impl RawStore for FileRawStore {
    fn write(&self, data: &[u8]) -> Result<Address> {
        if data.is_empty() {
            return Err(Error::invalid("no bytes remaining in buffer"));
        }
        if self.read_only {
            return Err(Error::illegal_state("store is read-only"));
        }
        let _guard = self.write_lock.lock();
        let file = self.handle()?;
        let offset = self.next_offset.load(Ordering::Acquire);
        let addr = Address::new(offset, data.len())?;
        write_all_at(&file, data, offset)?;
        // publish only after the bytes are in the file
        self.next_offset
            .store(offset + data.len() as u64, Ordering::Release);
        Ok(addr)
    }

    fn read(&self, addr: Address) -> Result<Bytes> {
        addr.validate()?;
        let file = self.handle()?;
        if self.deleted.read().contains(&addr) {
            return Err(Error::invalid(format!("record was deleted: {addr}")));
        }
        self.check_extent(addr)?;
        let mut buf = vec![0u8; addr.byte_count()];
        read_exact_at(&file, &mut buf, addr.offset())?;
        Ok(Bytes::from(buf))
    }

    fn delete(&self, addr: Address) -> Result<()> {
        addr.validate()?;
        self.handle()?;
        self.check_extent(addr)?;
        if !self.deleted.write().insert(addr) {
            return Err(Error::invalid(format!("record was deleted: {addr}")));
        }
        Ok(())
    }

    fn force(&self) -> Result<()> {
        let file = self.handle()?;
        if !self.read_only {
            file.sync_all()?;
        }
        Ok(())
    }

    fn close(&self) -> Result<()> {
        let _guard = self.write_lock.lock();
        match self.file.write().take() {
            Some(file) => {
                if !self.read_only {
                    file.sync_all()?;
                }
                Ok(())
            }
            None => Err(Error::illegal_state("store already closed")),
        }
    }

    fn destroy(&self) -> Result<()> {
        if self.is_open() {
            self.close()?;
        }
        fs::remove_file(&self.path)?;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.file.read().is_some()
    }

    fn is_read_only(&self) -> bool {
        self.read_only
    }

    fn size(&self) -> u64 {
        self.next_offset.load(Ordering::Acquire)
    }

    fn uuid(&self) -> Uuid {
        self.uuid
    }
}

// ---------------------------------------------------------------------------
// Positional I/O
// ---------------------------------------------------------------------------

#[cfg(unix)]
fn read_exact_at(file: &File, buf: &mut [u8], offset: u64) -> Result<()> {
    file.read_exact_at(buf, offset)?;
    Ok(())
}

/// `seek_read` moves the cursor, but every access here is positional so
/// no caller depends on it.
#[cfg(windows)]
fn read_exact_at(file: &File, buf: &mut [u8], offset: u64) -> Result<()> {
    let mut pos = 0;
    while pos < buf.len() {
        let n = file.seek_read(&mut buf[pos..], offset + pos as u64)?;
        if n == 0 {
            return Err(std::io::Error::from(std::io::ErrorKind::UnexpectedEof).into());
        }
        pos += n;
    }
    Ok(())
}

#[cfg(unix)]
fn write_all_at(file: &File, data: &[u8], offset: u64) -> Result<()> {
    file.write_all_at(data, offset)?;
    Ok(())
}

#[cfg(windows)]
fn write_all_at(file: &File, data: &[u8], offset: u64) -> Result<()> {
    let mut pos = 0;
    while pos < data.len() {
        let n = file.seek_write(&data[pos..], offset + pos as u64)?;
        pos += n;
    }
    Ok(())
}

use std::path::Path;
use std::sync::Arc;

use tracing::debug;

use crate::btree::IndexMetadata;
use crate::error::{Error, Result};
use crate::rawstore::{FileRawStore, RawStore};
use crate::segment::checkpoint::SegmentCheckpoint;
use crate::segment::reader::IndexSegment;

/// Read-only handle on an index segment file.
///
/// On open:
/// 1. Read the fixed header at offset 0 and verify magic, version, CRC
/// 2. Check the recorded file size against the file
/// 3. Read the index metadata record
///
/// Pages are only read once an [`IndexSegment`] is loaded and queried.
pub struct IndexSegmentStore {
    raw: Arc<FileRawStore>,
    checkpoint: SegmentCheckpoint,
    metadata: IndexMetadata,
}

impl IndexSegmentStore {
    pub fn open(path: &Path) -> Result<Self> {
        let raw = FileRawStore::open(path, SegmentCheckpoint::SIZE as u64, true)?;
        let checkpoint = SegmentCheckpoint::decode(&raw.read_header()?)?;
        if checkpoint.file_size != raw.size() {
            return Err(Error::corruption(format!(
                "segment header records {} bytes, file has {}",
                checkpoint.file_size,
                raw.size()
            )));
        }
        let metadata = IndexMetadata::decode(&raw.read(checkpoint.metadata)?)?;
        debug!(
            path = %path.display(),
            uuid = %checkpoint.uuid,
            entries = checkpoint.entry_count,
            height = checkpoint.height,
            "opened index segment"
        );
        Ok(IndexSegmentStore {
            raw: Arc::new(raw),
            checkpoint,
            metadata,
        })
    }

    /// Returns a new segment view over this store. Views share the file
    /// handle; closing the store makes their reads fail.
    pub fn load_index_segment(&self) -> Result<IndexSegment> {
        if !self.raw.is_open() {
            return Err(Error::illegal_state("segment store is closed"));
        }
        IndexSegment::new(self.raw.clone(), self.checkpoint, self.metadata.clone())
    }

    pub fn checkpoint(&self) -> &SegmentCheckpoint {
        &self.checkpoint
    }

    pub fn metadata(&self) -> &IndexMetadata {
        &self.metadata
    }

    pub fn path(&self) -> &Path {
        self.raw.path()
    }

    pub fn is_open(&self) -> bool {
        self.raw.is_open()
    }

    /// Fails with `IllegalState` when already closed.
    pub fn close(&self) -> Result<()> {
        self.raw.close()
    }

    /// Re-opens a closed store on the same file.
    pub fn reopen(&self) -> Result<()> {
        self.raw.reopen()
    }

    /// Closes the store if open and deletes the file.
    pub fn destroy(self) -> Result<()> {
        self.raw.destroy()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::builder::IndexSegmentBuilder;
    use crate::types::Tuple;
    use tempfile::tempdir;

    #[test]
    fn truncated_file_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("seg.dat");
        let md = IndexMetadata::random();
        let entries: Vec<Result<Tuple>> = (0u8..20).map(|i| Ok((vec![i], vec![i]))).collect();
        IndexSegmentBuilder::new(&path, 20, 4, &md, 0, false)
            .unwrap()
            .build(entries)
            .unwrap();
        let len = std::fs::metadata(&path).unwrap().len();
        let file = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(len - 1).unwrap();
        assert!(matches!(
            IndexSegmentStore::open(&path),
            Err(Error::Corruption(_))
        ));
    }

    #[test]
    fn load_after_close_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("seg.dat");
        let md = IndexMetadata::random();
        IndexSegmentBuilder::new(&path, 0, 3, &md, 0, false)
            .unwrap()
            .build(Vec::new())
            .unwrap();
        let store = IndexSegmentStore::open(&path).unwrap();
        store.close().unwrap();
        assert!(matches!(
            store.load_index_segment(),
            Err(Error::IllegalState(_))
        ));
    }
}

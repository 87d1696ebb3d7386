use std::io::{self, Read, Write};

use bytes::{Buf, Bytes};

use crate::error::{Error, Result};
use crate::rawstore::{Address, RawStore};

/// Streaming sink that becomes a single record on [`finish`].
///
/// The record's address is only known once the stream is finished;
/// [`addr`] fails before that. Finishing an empty stream writes nothing
/// and yields `Address::NULL`, which [`RecordInputStream::open`] reads back
/// as an immediately exhausted stream.
///
/// [`finish`]: RecordOutputStream::finish
/// [`addr`]: RecordOutputStream::addr
pub struct RecordOutputStream<'a> {
    store: &'a dyn RawStore,
    buf: Vec<u8>,
    addr: Option<Address>,
}

impl<'a> RecordOutputStream<'a> {
    pub fn new(store: &'a dyn RawStore) -> Self {
        RecordOutputStream {
            store,
            buf: Vec::new(),
            addr: None,
        }
    }

    /// Writes the buffered bytes as one record.
    pub fn finish(&mut self) -> Result<Address> {
        if let Some(addr) = self.addr {
            return Ok(addr);
        }
        let addr = if self.buf.is_empty() {
            Address::NULL
        } else {
            self.store.write(&self.buf)?
        };
        self.buf = Vec::new();
        self.addr = Some(addr);
        Ok(addr)
    }

    /// Address of the finished record.
    pub fn addr(&self) -> Result<Address> {
        self.addr
            .ok_or_else(|| Error::illegal_state("output stream not finished"))
    }
}

impl Write for RecordOutputStream<'_> {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        if self.addr.is_some() {
            return Err(io::Error::other("output stream already finished"));
        }
        self.buf.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Streaming source over one record.
pub struct RecordInputStream {
    data: Bytes,
}

impl RecordInputStream {
    /// Opens the record at `addr`. `Address::NULL` yields an empty stream.
    pub fn open(store: &dyn RawStore, addr: Address) -> Result<Self> {
        let data = if addr.is_null() {
            Bytes::new()
        } else {
            store.read(addr)?
        };
        Ok(RecordInputStream { data })
    }

    pub fn remaining(&self) -> usize {
        self.data.remaining()
    }
}

impl Read for RecordInputStream {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        let n = out.len().min(self.data.remaining());
        self.data.copy_to_slice(&mut out[..n]);
        Ok(n)
    }
}

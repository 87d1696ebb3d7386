//! Little-endian record encoding helpers shared by every on-disk format.
//!
//! Each record ends with a CRC32 over everything before it.

use crate::error::{Error, Result};

pub(crate) const CRC_SIZE: usize = 4;

/// Appends the CRC of `buf` to `buf`.
pub(crate) fn seal(buf: &mut Vec<u8>) {
    let crc = crc32fast::hash(buf);
    buf.extend_from_slice(&crc.to_le_bytes());
}

/// Verifies the trailing CRC and returns the body without it.
pub(crate) fn unseal<'a>(data: &'a [u8], what: &str) -> Result<&'a [u8]> {
    if data.len() < CRC_SIZE {
        return Err(Error::corruption(format!("{what} too short")));
    }
    let (body, crc) = data.split_at(data.len() - CRC_SIZE);
    let stored = u32::from_le_bytes(crc.try_into().unwrap());
    let computed = crc32fast::hash(body);
    if stored != computed {
        return Err(Error::corruption(format!(
            "{what} CRC mismatch: stored {stored:#x}, computed {computed:#x}"
        )));
    }
    Ok(body)
}

pub(crate) fn put_bytes(buf: &mut Vec<u8>, b: &[u8]) {
    buf.extend_from_slice(&(b.len() as u32).to_le_bytes());
    buf.extend_from_slice(b);
}

/// Bounds-checked cursor over a record body.
pub(crate) struct Decoder<'a> {
    data: &'a [u8],
    pos: usize,
    what: &'static str,
}

impl<'a> Decoder<'a> {
    pub(crate) fn new(data: &'a [u8], what: &'static str) -> Self {
        Decoder { data, pos: 0, what }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.data.len() - self.pos < n {
            return Err(Error::corruption(format!(
                "{} truncated at byte {} (wanted {n} more)",
                self.what, self.pos
            )));
        }
        let s = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(s)
    }

    pub(crate) fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub(crate) fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    pub(crate) fn u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    pub(crate) fn f64(&mut self) -> Result<f64> {
        Ok(f64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    pub(crate) fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        Ok(self.take(N)?.try_into().unwrap())
    }

    /// Length-prefixed byte string written by [`put_bytes`].
    pub(crate) fn bytes(&mut self) -> Result<Vec<u8>> {
        let len = self.u32()? as usize;
        Ok(self.take(len)?.to_vec())
    }

    pub(crate) fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Fails if unread bytes remain.
    pub(crate) fn finish(self) -> Result<()> {
        if self.remaining() != 0 {
            return Err(Error::corruption(format!(
                "{} has {} trailing bytes",
                self.what,
                self.remaining()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_and_unseal() {
        let mut buf = b"payload".to_vec();
        seal(&mut buf);
        assert_eq!(unseal(&buf, "test").unwrap(), b"payload");
        buf[0] ^= 1;
        assert!(unseal(&buf, "test").is_err());
    }

    #[test]
    fn decoder_detects_truncation() {
        let mut buf = Vec::new();
        put_bytes(&mut buf, b"abcdef");
        let mut d = Decoder::new(&buf[..5], "test");
        assert!(d.bytes().is_err());
        let mut d = Decoder::new(&buf, "test");
        assert_eq!(d.bytes().unwrap(), b"abcdef");
        d.finish().unwrap();
    }
}

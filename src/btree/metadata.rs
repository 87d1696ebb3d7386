use uuid::Uuid;

use crate::bloom::BloomFilterFactory;
use crate::codec::{self, Decoder};
use crate::error::{Error, Result};
use crate::keys::KeyFormat;

const METADATA_MAGIC: u32 = 0x4D45_5441; // "META"
const METADATA_VERSION: u8 = 1;

pub const MIN_BRANCHING_FACTOR: usize = 3;
pub const DEFAULT_BRANCHING_FACTOR: usize = 32;
pub const DEFAULT_WRITE_RETENTION_QUEUE_CAPACITY: usize = 500;
pub const DEFAULT_WRITE_RETENTION_QUEUE_SCAN: usize = 20;

/// Persistent description of an index: identity, shape, retention and
/// bloom filter configuration, and how keys/values are encoded.
///
/// Written once per tree (and once per segment) and referenced from every
/// checkpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexMetadata {
    uuid: Uuid,
    name: Option<String>,
    branching_factor: usize,
    write_retention_queue_capacity: usize,
    write_retention_queue_scan: usize,
    bloom_filter_factory: Option<BloomFilterFactory>,
    key_format: KeyFormat,
    value_format: KeyFormat,
}

impl IndexMetadata {
    pub fn new(uuid: Uuid) -> Self {
        IndexMetadata {
            uuid,
            name: None,
            branching_factor: DEFAULT_BRANCHING_FACTOR,
            write_retention_queue_capacity: DEFAULT_WRITE_RETENTION_QUEUE_CAPACITY,
            write_retention_queue_scan: DEFAULT_WRITE_RETENTION_QUEUE_SCAN,
            bloom_filter_factory: None,
            key_format: KeyFormat::Bytes,
            value_format: KeyFormat::Bytes,
        }
    }

    /// Metadata with a fresh random UUID.
    pub fn random() -> Self {
        Self::new(Uuid::new_v4())
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_branching_factor(mut self, m: usize) -> Result<Self> {
        check_branching_factor(m)?;
        self.branching_factor = m;
        Ok(self)
    }

    /// Sets the write retention queue shape. `scan` must not exceed
    /// `capacity`; `capacity` must be positive.
    pub fn with_write_retention_queue(mut self, capacity: usize, scan: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::invalid("retention queue capacity must be positive"));
        }
        if scan > capacity {
            return Err(Error::invalid(format!(
                "retention queue scan {scan} exceeds capacity {capacity}"
            )));
        }
        self.write_retention_queue_capacity = capacity;
        self.write_retention_queue_scan = scan;
        Ok(self)
    }

    /// `None` disables the bloom filter.
    pub fn with_bloom_filter(mut self, factory: Option<BloomFilterFactory>) -> Self {
        self.bloom_filter_factory = factory;
        self
    }

    pub fn with_key_format(mut self, format: KeyFormat) -> Self {
        self.key_format = format;
        self
    }

    pub fn with_value_format(mut self, format: KeyFormat) -> Self {
        self.value_format = format;
        self
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn branching_factor(&self) -> usize {
        self.branching_factor
    }

    pub fn write_retention_queue_capacity(&self) -> usize {
        self.write_retention_queue_capacity
    }

    pub fn write_retention_queue_scan(&self) -> usize {
        self.write_retention_queue_scan
    }

    pub fn bloom_filter_factory(&self) -> Option<&BloomFilterFactory> {
        self.bloom_filter_factory.as_ref()
    }

    pub fn key_format(&self) -> KeyFormat {
        self.key_format
    }

    pub fn value_format(&self) -> KeyFormat {
        self.value_format
    }

    /// ```text
    /// [magic(4B)][version(1B)][uuid(16B)][has_name(1B)][name?][m(4B)]
    /// [queue_capacity(4B)][queue_scan(4B)][key_fmt(1B)][value_fmt(1B)]
    /// [has_bloom(1B)][n(8B) p(8B) max_p(8B)]?[CRC(4B)]
    /// ```
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(96);
        buf.extend_from_slice(&METADATA_MAGIC.to_le_bytes());
        buf.push(METADATA_VERSION);
        buf.extend_from_slice(self.uuid.as_bytes());
        match &self.name {
            Some(name) => {
                buf.push(1);
                codec::put_bytes(&mut buf, name.as_bytes());
            }
            None => buf.push(0),
        }
        buf.extend_from_slice(&(self.branching_factor as u32).to_le_bytes());
        buf.extend_from_slice(&(self.write_retention_queue_capacity as u32).to_le_bytes());
        buf.extend_from_slice(&(self.write_retention_queue_scan as u32).to_le_bytes());
        buf.push(self.key_format as u8);
        buf.push(self.value_format as u8);
        match &self.bloom_filter_factory {
            Some(f) => {
                buf.push(1);
                buf.extend_from_slice(&(f.n() as u64).to_le_bytes());
                buf.extend_from_slice(&f.p().to_le_bytes());
                buf.extend_from_slice(&f.max_p().to_le_bytes());
            }
            None => buf.push(0),
        }
        codec::seal(&mut buf);
        buf
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let body = codec::unseal(data, "index metadata")?;
        let mut d = Decoder::new(body, "index metadata");
        let magic = d.u32()?;
        if magic != METADATA_MAGIC {
            return Err(Error::corruption(format!(
                "bad metadata magic: expected {METADATA_MAGIC:#x}, got {magic:#x}"
            )));
        }
        let version = d.u8()?;
        if version != METADATA_VERSION {
            return Err(Error::corruption(format!(
                "unsupported metadata version {version}"
            )));
        }
        let uuid = Uuid::from_bytes(d.array::<16>()?);
        let name = match d.u8()? {
            0 => None,
            _ => Some(
                String::from_utf8(d.bytes()?)
                    .map_err(|e| Error::corruption(format!("index name: {e}")))?,
            ),
        };
        let branching_factor = d.u32()? as usize;
        let capacity = d.u32()? as usize;
        let scan = d.u32()? as usize;
        let key_format = KeyFormat::from_u8(d.u8()?)?;
        let value_format = KeyFormat::from_u8(d.u8()?)?;
        let bloom_filter_factory = match d.u8()? {
            0 => None,
            _ => {
                let n = d.u64()? as usize;
                let p = d.f64()?;
                let max_p = d.f64()?;
                Some(
                    BloomFilterFactory::new(n, p, max_p)
                        .map_err(|e| Error::corruption(format!("bloom filter factory: {e}")))?,
                )
            }
        };
        d.finish()?;

        let md = IndexMetadata {
            uuid,
            name,
            branching_factor: MIN_BRANCHING_FACTOR,
            write_retention_queue_capacity: DEFAULT_WRITE_RETENTION_QUEUE_CAPACITY,
            write_retention_queue_scan: 0,
            bloom_filter_factory,
            key_format,
            value_format,
        };
        md.with_branching_factor(branching_factor)
            .and_then(|md| md.with_write_retention_queue(capacity, scan))
            .map_err(|e| Error::corruption(format!("index metadata: {e}")))
    }
}

pub(crate) fn check_branching_factor(m: usize) -> Result<()> {
    if m < MIN_BRANCHING_FACTOR {
        return Err(Error::invalid(format!(
            "branching factor {m} is less than {MIN_BRANCHING_FACTOR}"
        )));
    }
    if m > u32::MAX as usize {
        return Err(Error::invalid(format!("branching factor {m} too large")));
    }
    Ok(())
}

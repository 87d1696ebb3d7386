/// Raw key bytes. Keys compare as unsigned byte strings.
pub type Key = Vec<u8>;

/// Raw value bytes.
pub type Value = Vec<u8>;

/// A key/value pair as produced by range iteration.
pub type Tuple = (Key, Value);

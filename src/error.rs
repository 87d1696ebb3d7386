use std::io;

use thiserror::Error;

/// Unified error type for the storage engine.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed address, empty buffer, bad branching factor and the like.
    /// Never retried internally.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Operation not permitted in the current state: closed store,
    /// read-only tree, double close.
    #[error("Illegal state: {0}")]
    IllegalState(String),

    /// IO error from the underlying medium.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Data corruption detected (CRC mismatch, bad magic, truncated record).
    #[error("Corruption: {0}")]
    Corruption(String),

    /// An invariant that must always hold was observed broken, e.g. a bloom
    /// filter false negative. This is a defect, not a runtime condition.
    #[error("Consistency violation: {0}")]
    ConsistencyViolation(String),
}

impl Error {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }

    pub(crate) fn illegal_state(msg: impl Into<String>) -> Self {
        Error::IllegalState(msg.into())
    }

    pub(crate) fn corruption(msg: impl Into<String>) -> Self {
        Error::Corruption(msg.into())
    }
}

/// Result type alias used throughout the engine.
pub type Result<T> = std::result::Result<T, Error>;

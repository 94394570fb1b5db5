// src/error.rs

//! Crate-wide error type.
//!
//! Every variant maps onto one of the error kinds named in spec §7. Nothing
//! in this crate panics on a recoverable condition; conditions the original
//! C implementation treated as assert-fatal surface here as typed errors.

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// KV adapter failure. Fatal for the in-flight compound if it occurs
    /// during commit; the transaction log record is left in place so the
    /// compound can be retried on restart.
    #[error("storage error: {0}")]
    Storage(String),

    /// Propagated unchanged from the lower FSAL.
    #[error("no space left on device")]
    NoSpace,

    /// Propagated unchanged from the lower FSAL.
    #[error("permission denied")]
    PermissionDenied,

    /// A wire UUID had no entry in the identity map.
    #[error("unknown handle")]
    HandleUnknown,

    /// A compound's pre-allocated UUID pool was exhausted.
    #[error("uuid pool exhausted")]
    PoolExhausted,

    /// The async cleanup queue is at capacity.
    #[error("cleanup queue full")]
    QueueFull,

    /// An op referenced a path that escapes the export root.
    #[error("path traversal attempt: {0}")]
    PathTraversal(String),

    /// A path was syntactically invalid (empty after normalization, etc).
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// A compound, transaction, or lock manager call happened out of order
    /// (e.g. `end_compound` without `start_compound`).
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// A backup artifact referenced by the undo executor was missing.
    #[error("missing backup artifact at {0}")]
    MissingBackup(PathBuf),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl From<sled::Error> for Error {
    fn from(e: sled::Error) -> Self {
        Error::Storage(e.to_string())
    }
}

impl Error {
    pub fn storage(msg: impl Into<String>) -> Self {
        Error::Storage(msg.into())
    }
}

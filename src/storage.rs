//! Backend-independent checkpoint storage interface.

use crate::counter::CounterSet;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Failure reported by a [`Storage`] backend.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage I/O failed")]
    Io(#[from] io::Error),

    #[error("cannot (de)serialize state document")]
    Json(#[from] serde_json::Error),

    #[error("redis command failed")]
    Redis(#[from] redis::RedisError),

    #[error("state document {path} is corrupt: {reason}")]
    Corrupt { path: PathBuf, reason: String },
}

/// Where counters and the read checkpoint are persisted.
///
/// Implementations must apply a flush as one unit: the counter deltas, the
/// path and the offset are either all stored or none of them are.
pub trait Storage {
    /// The checkpoint recorded by the last successful flush, or `(None, 0)`.
    fn last_position(&mut self) -> Result<(Option<PathBuf>, u64), StorageError>;

    /// Add `counters` to the stored totals and record `(path, offset)` as the
    /// new checkpoint.
    fn flush(
        &mut self,
        counters: &CounterSet,
        path: &Path,
        offset: u64,
    ) -> Result<(), StorageError>;
}

impl<S: Storage + ?Sized> Storage for Box<S> {
    fn last_position(&mut self) -> Result<(Option<PathBuf>, u64), StorageError> {
        (**self).last_position()
    }

    fn flush(
        &mut self,
        counters: &CounterSet,
        path: &Path,
        offset: u64,
    ) -> Result<(), StorageError> {
        (**self).flush(counters, path, offset)
    }
}

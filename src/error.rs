//! Crate-level error type.

use crate::storage::StorageError;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Why a [`Worker`](crate::Worker) stopped.
///
/// Malformed log lines never end up here; they are counted under `errors`.
#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot read access log {path}")]
    Tail {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("flushing counters failed")]
    Storage(#[from] StorageError),
}

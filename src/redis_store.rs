//! Redis hash-counter storage.

use crate::counter::{Accumulator, CounterSet};
use crate::storage::{Storage, StorageError};
use std::path::{Path, PathBuf};

/// Keeps counter totals in Redis hashes, incremented server-side.
///
/// For a namespace `name` on host `host`:
///
/// | key                  | type   | content                           |
/// |----------------------|--------|-----------------------------------|
/// | `name`               | hash   | totals across every host          |
/// | `name@host`          | hash   | totals for this host only         |
/// | `name@host:path`     | string | path of the checkpointed log file |
/// | `name@host:position` | string | checkpointed byte offset          |
///
/// A flush runs as a single `MULTI`/`EXEC` pipeline.
pub struct RedisStorage {
    conn: redis::Connection,
    keys: Keys,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Keys {
    global: String,
    host: String,
    path: String,
    position: String,
}

impl Keys {
    fn new(name: &str, host: &str) -> Self {
        let host = format!("{name}@{host}");
        Keys {
            global: name.to_string(),
            path: format!("{host}:path"),
            position: format!("{host}:position"),
            host,
        }
    }
}

impl RedisStorage {
    /// Connect to the server at `url` (e.g. `redis://localhost:6379/`).
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid or the server is unreachable.
    pub fn connect(url: &str, name: &str, host: &str) -> Result<Self, StorageError> {
        let client = redis::Client::open(url)?;
        let conn = client.get_connection()?;
        log::info!("connected to redis at {url}, counters under `{name}@{host}`");
        Ok(RedisStorage {
            conn,
            keys: Keys::new(name, host),
        })
    }
}

impl Storage for RedisStorage {
    fn last_position(&mut self) -> Result<(Option<PathBuf>, u64), StorageError> {
        let (path, position): (Option<String>, Option<u64>) = redis::cmd("MGET")
            .arg(&self.keys.path)
            .arg(&self.keys.position)
            .query(&mut self.conn)?;
        Ok((path.map(PathBuf::from), position.unwrap_or(0)))
    }

    fn flush(
        &mut self,
        counters: &CounterSet,
        path: &Path,
        offset: u64,
    ) -> Result<(), StorageError> {
        let mut pipe = redis::pipe();
        pipe.atomic();
        for hash in [&self.keys.global, &self.keys.host] {
            for (key, value) in counters {
                match *value {
                    value if value.is_zero() => {}
                    Accumulator::Count(n) => {
                        pipe.cmd("HINCRBY").arg(hash).arg(key).arg(n).ignore();
                    }
                    Accumulator::Sum(x) => {
                        pipe.cmd("HINCRBYFLOAT").arg(hash).arg(key).arg(x).ignore();
                    }
                }
            }
        }
        pipe.cmd("SET")
            .arg(&self.keys.position)
            .arg(offset)
            .ignore();
        pipe.cmd("SET")
            .arg(&self.keys.path)
            .arg(path.to_string_lossy().as_ref())
            .ignore();

        pipe.query::<()>(&mut self.conn)?;
        Ok(())
    }
}

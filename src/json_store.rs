//! Local JSON document storage.

use crate::counter::{Accumulator, CounterSet};
use crate::storage::{Storage, StorageError};
use fs2::FileExt;
use serde_json::{Map, Value};
use std::ffi::OsString;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Section that holds the counter totals unless configured otherwise.
pub const DEFAULT_SECTION: &str = "counters";

/// Keeps lifetime counter totals and the read checkpoint in one JSON file.
///
/// The document is a single object:
///
/// ```text
/// $ cat wwwatch-frontend.json | jq .
/// {
///   "counters": { "method_GET": 1520, "response_time": 31.207, "total": 1544 },
///   "offset": 208113,
///   "path": "/var/log/nginx/access.log"
/// }
/// ```
///
/// Every flush reads the whole document, adds the deltas, and replaces the
/// file atomically (`.tmp` + rename) under an exclusive lock on a sidecar
/// `.lock` file. Top-level keys it does not know about are carried over.
#[derive(Debug, Clone)]
pub struct JsonStorage {
    path: PathBuf,
    section: String,
}

impl JsonStorage {
    /// Use the document at `path`; it is created on the first flush.
    pub fn open(path: impl AsRef<Path>) -> Self {
        JsonStorage {
            path: path.as_ref().to_path_buf(),
            section: DEFAULT_SECTION.to_string(),
        }
    }

    /// Keep the counter totals under `section` instead of `"counters"`.
    pub fn with_section(mut self, section: impl Into<String>) -> Self {
        self.section = section.into();
        self
    }

    /// Returns the path to the JSON document.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the counter totals currently stored.
    pub fn totals(&self) -> Result<Map<String, Value>, StorageError> {
        let mut doc = self.load()?;
        match doc.remove(&self.section) {
            None => Ok(Map::new()),
            Some(Value::Object(totals)) => Ok(totals),
            Some(_) => Err(self.corrupt(format!("`{}` is not an object", self.section))),
        }
    }

    fn load(&self) -> Result<Map<String, Value>, StorageError> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Map::new()),
            Err(e) => return Err(e.into()),
        };
        if contents.trim().is_empty() {
            return Ok(Map::new());
        }
        match serde_json::from_str(&contents)? {
            Value::Object(doc) => Ok(doc),
            _ => Err(self.corrupt("top level is not an object".to_string())),
        }
    }

    fn save(&self, doc: &Map<String, Value>) -> Result<(), StorageError> {
        let tmp_path = sibling(&self.path, ".tmp");
        let json = serde_json::to_string_pretty(doc)?;

        let mut file = fs::File::create(&tmp_path)?;
        file.write_all(json.as_bytes())?;
        file.sync_data()?;
        drop(file);

        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }

    fn corrupt(&self, reason: String) -> StorageError {
        StorageError::Corrupt {
            path: self.path.clone(),
            reason,
        }
    }
}

impl Storage for JsonStorage {
    fn last_position(&mut self) -> Result<(Option<PathBuf>, u64), StorageError> {
        let doc = self.load()?;
        let path = doc.get("path").and_then(Value::as_str).map(PathBuf::from);
        let offset = doc.get("offset").and_then(Value::as_u64).unwrap_or(0);
        Ok((path, offset))
    }

    fn flush(
        &mut self,
        counters: &CounterSet,
        path: &Path,
        offset: u64,
    ) -> Result<(), StorageError> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }
        let lock = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(sibling(&self.path, ".lock"))?;
        FileExt::lock_exclusive(&lock)?;

        let mut doc = self.load()?;
        let section = doc
            .entry(self.section.clone())
            .or_insert_with(|| Value::Object(Map::new()));
        let Value::Object(totals) = section else {
            return Err(self.corrupt(format!("`{}` is not an object", self.section)));
        };

        for (key, delta) in counters {
            if delta.is_zero() {
                continue;
            }
            let total = add_to_total(totals.get(key), *delta)
                .ok_or_else(|| self.corrupt(format!("total for `{key}` is not a number")))?;
            totals.insert(key.clone(), total);
        }

        doc.insert(
            "path".to_string(),
            Value::from(path.to_string_lossy().into_owned()),
        );
        doc.insert("offset".to_string(), Value::from(offset));
        self.save(&doc)?;

        FileExt::unlock(&lock)?;
        log::debug!(
            "{}: flushed {} counters at {}:{}",
            self.path.display(),
            counters.len(),
            path.display(),
            offset
        );
        Ok(())
    }
}

/// Stored total plus a delta, or `None` if the stored value is not numeric.
fn add_to_total(current: Option<&Value>, delta: Accumulator) -> Option<Value> {
    let Some(current) = current else {
        return Some(match delta {
            Accumulator::Count(n) => Value::from(n),
            Accumulator::Sum(x) => Value::from(x),
        });
    };
    match (delta, current.as_u64()) {
        (Accumulator::Count(n), Some(base)) => Some(Value::from(base.saturating_add(n))),
        _ => {
            let base = current.as_f64()?;
            let total = base + delta.as_f64();
            // A float total that overflows stays where it was; JSON has no infinity.
            Some(Value::from(if total.is_finite() { total } else { base }))
        }
    }
}

/// `path` with `suffix` appended to its file name.
fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path
        .file_name()
        .map(OsString::from)
        .unwrap_or_default();
    name.push(suffix);
    path.with_file_name(name)
}

#![allow(dead_code)]

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use wwwatch::{Accumulator, CounterSet, LogTailer, Storage, StorageError, TailEvent};

pub const FAST: Duration = Duration::from_millis(10);

/// A combined-format line with extras, logged at `29/Jul/2014:13:07:06 +0000`
/// plus `secs` seconds.
pub fn access_line(status: &str, secs: u32, extra: &str) -> String {
    let (mm, ss) = (7 + secs / 60, 6 + secs % 60);
    let (mm, ss) = (mm + ss / 60, ss % 60);
    format!(
        r#"10.0.0.1 - - [29/Jul/2014:13:{mm:02}:{ss:02} +0000] "GET /index.html HTTP/1.1" {status} 612 "-" "curl/7.35" "-" {extra}"#
    )
}

pub fn append(path: &Path, text: &str) {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .unwrap();
    file.write_all(text.as_bytes()).unwrap();
    file.sync_data().unwrap();
}

pub fn append_lines(path: &Path, lines: &[String]) -> u64 {
    let mut text = String::new();
    for line in lines {
        text.push_str(line);
        text.push('\n');
    }
    append(path, &text);
    fs::metadata(path).unwrap().len()
}

/// Read lines until the tailer goes idle.
pub fn drain(tailer: &mut LogTailer) -> Vec<String> {
    let mut lines = Vec::new();
    loop {
        match tailer.next_line().unwrap() {
            TailEvent::Line(line) => lines.push(line),
            TailEvent::Idle => return lines,
            TailEvent::Rotated => panic!("unexpected rotation"),
        }
    }
}

pub fn count(counters: &CounterSet, key: &str) -> u64 {
    match counters.get(key) {
        Some(Accumulator::Count(n)) => *n,
        Some(other) => panic!("{key} is not a count: {other:?}"),
        None => 0,
    }
}

pub fn sum(counters: &CounterSet, key: &str) -> f64 {
    match counters.get(key) {
        Some(Accumulator::Sum(x)) => *x,
        Some(other) => panic!("{key} is not a sum: {other:?}"),
        None => 0.0,
    }
}

#[derive(Debug, Clone)]
pub struct Flush {
    pub counters: CounterSet,
    pub path: PathBuf,
    pub offset: u64,
}

/// In-memory storage double that records every flush.
///
/// Can be told to fail, and to raise a stop flag after a number of flushes
/// so a worker run ends deterministically.
#[derive(Default)]
pub struct MemoryStorage {
    pub position: (Option<PathBuf>, u64),
    pub flushes: Vec<Flush>,
    pub fail: bool,
    stop: Option<(Arc<AtomicBool>, usize)>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn at(path: &Path, offset: u64) -> Self {
        MemoryStorage {
            position: (Some(path.to_path_buf()), offset),
            ..Self::default()
        }
    }

    pub fn stop_after(mut self, flushes: usize, stop: Arc<AtomicBool>) -> Self {
        self.stop = Some((stop, flushes));
        self
    }

    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    /// Sum of a count over every flush.
    pub fn total(&self, key: &str) -> u64 {
        self.flushes.iter().map(|f| count(&f.counters, key)).sum()
    }
}

impl Storage for MemoryStorage {
    fn last_position(&mut self) -> Result<(Option<PathBuf>, u64), StorageError> {
        Ok(self.position.clone())
    }

    fn flush(
        &mut self,
        counters: &CounterSet,
        path: &Path,
        offset: u64,
    ) -> Result<(), StorageError> {
        if self.fail {
            return Err(StorageError::Io(std::io::Error::other("storage is down")));
        }
        self.flushes.push(Flush {
            counters: counters.clone(),
            path: path.to_path_buf(),
            offset,
        });
        self.position = (Some(path.to_path_buf()), offset);
        if let Some((stop, after)) = &self.stop {
            if self.flushes.len() >= *after {
                stop.store(true, Ordering::Relaxed);
            }
        }
        Ok(())
    }
}

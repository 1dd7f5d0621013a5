//! The tail, aggregate and flush loop.

use crate::accesslog::parse_line;
use crate::counter::Aggregator;
use crate::error::Error;
use crate::storage::Storage;
use crate::tail::{LogTailer, TailEvent, DEFAULT_DELAY};
use log::{debug, info};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Default flush interval, in seconds of log time.
pub const DEFAULT_FLUSH_INTERVAL: u64 = 15;

/// Tail `log_path` forever, flushing counters to `storage` at least every
/// `flush_interval` seconds of log time.
///
/// Returns only on a fatal error. Use [`Worker::builder`] for a stop signal
/// or a custom poll delay.
pub fn run<S: Storage>(
    log_path: impl AsRef<Path>,
    flush_interval: u64,
    storage: S,
) -> Result<(), Error> {
    Worker::builder(log_path)
        .flush_interval(flush_interval)
        .build(storage)
        .run()
}

/// Builder for a [`Worker`].
///
/// # Examples
///
/// ```no_run
/// use std::sync::atomic::AtomicBool;
/// use std::sync::Arc;
/// use wwwatch::{JsonStorage, Worker};
///
/// let stop = Arc::new(AtomicBool::new(false));
/// let mut worker = Worker::builder("/var/log/nginx/access.log")
///     .flush_interval(30)
///     .stop_signal(stop.clone())
///     .build(JsonStorage::open("/var/lib/wwwatch/frontend.json"));
/// worker.run()?;
/// # Ok::<(), wwwatch::Error>(())
/// ```
#[derive(Debug, Clone)]
pub struct WorkerBuilder {
    log_path: PathBuf,
    flush_interval: u64,
    poll_delay: Duration,
    stop: Option<Arc<AtomicBool>>,
}

impl WorkerBuilder {
    fn new(log_path: &Path) -> Self {
        WorkerBuilder {
            log_path: log_path.to_path_buf(),
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            poll_delay: DEFAULT_DELAY,
            stop: None,
        }
    }

    /// Seconds of log time between flushes.
    pub fn flush_interval(mut self, seconds: u64) -> Self {
        self.flush_interval = seconds;
        self
    }

    /// Pause between reads once the end of the file is reached.
    pub fn poll_delay(mut self, delay: Duration) -> Self {
        self.poll_delay = delay;
        self
    }

    /// Stop cleanly, with a final flush, once `stop` is set.
    pub fn stop_signal(mut self, stop: Arc<AtomicBool>) -> Self {
        self.stop = Some(stop);
        self
    }

    pub fn build<S: Storage>(self, storage: S) -> Worker<S> {
        Worker {
            log_path: self.log_path,
            flush_interval: i64::try_from(self.flush_interval).unwrap_or(i64::MAX),
            poll_delay: self.poll_delay,
            stop: self.stop,
            storage,
            aggregator: Aggregator::new(),
            last_flush_at: None,
        }
    }
}

/// Tails one access log and checkpoints its counters into a [`Storage`].
///
/// Counters are flushed together with the read offset:
/// - when a line's timestamp is more than the flush interval past the
///   timestamp of the previous flush (log time, not wall-clock time);
/// - whenever the tailer reports it is idle or the file was rotated.
///
/// Counters are only reset after the storage confirms the flush, so a failed
/// flush never drops a window.
pub struct Worker<S> {
    log_path: PathBuf,
    flush_interval: i64,
    poll_delay: Duration,
    stop: Option<Arc<AtomicBool>>,
    storage: S,
    aggregator: Aggregator,
    last_flush_at: Option<i64>,
}

impl Worker<()> {
    /// Start configuring a worker for `log_path`.
    pub fn builder(log_path: impl AsRef<Path>) -> WorkerBuilder {
        WorkerBuilder::new(log_path.as_ref())
    }
}

impl<S: Storage> Worker<S> {
    /// Run until the stop signal is set or a fatal error occurs.
    ///
    /// Resumes from the storage's checkpoint when it was recorded for this
    /// same path, otherwise from the start of the file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] when the storage fails (the counters of the
    /// failed window are kept) and [`Error::Tail`] on I/O errors reading the
    /// log other than the file being absent.
    pub fn run(&mut self) -> Result<(), Error> {
        let (last_path, last_offset) = self.storage.last_position()?;
        let start = match last_path {
            Some(path) if path == self.log_path => last_offset,
            Some(path) => {
                info!(
                    "checkpoint belongs to {}, reading {} from the start",
                    path.display(),
                    self.log_path.display()
                );
                0
            }
            None => 0,
        };

        let mut tailer = LogTailer::open(&self.log_path, start).with_delay(self.poll_delay);
        loop {
            if self.stop_requested() {
                info!("stop requested, flushing and exiting");
                self.flush(&tailer)?;
                tailer.close();
                return Ok(());
            }

            let event = tailer.next_line().map_err(|source| Error::Tail {
                path: self.log_path.clone(),
                source,
            })?;
            match event {
                TailEvent::Line(line) => self.handle_line(&line, &tailer)?,
                TailEvent::Idle | TailEvent::Rotated => self.flush(&tailer)?,
            }
        }
    }

    /// Counters accumulated since the last flush.
    pub fn aggregator(&self) -> &Aggregator {
        &self.aggregator
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn into_storage(self) -> S {
        self.storage
    }

    fn handle_line(&mut self, line: &str, tailer: &LogTailer) -> Result<(), Error> {
        let record = match parse_line(line) {
            Ok(record) => record,
            Err(e) => {
                debug!("{e}: {line:?}");
                self.aggregator.record_error();
                return Ok(());
            }
        };
        let timestamp = match record.timestamp() {
            Ok(ts) => ts,
            Err(e) => {
                debug!("{e}");
                self.aggregator.record_error();
                return Ok(());
            }
        };

        self.aggregator.update(&record);

        match self.last_flush_at {
            None => self.last_flush_at = Some(timestamp),
            Some(last) if timestamp.saturating_sub(last) > self.flush_interval => {
                self.flush(tailer)?;
                self.last_flush_at = Some(timestamp);
            }
            Some(_) => {}
        }
        Ok(())
    }

    fn flush(&mut self, tailer: &LogTailer) -> Result<(), Error> {
        if self.aggregator.is_empty() {
            return Ok(());
        }
        let cursor = tailer.position();
        // No open handle: everything read so far is accounted for and the
        // next file at this path will be read from its start.
        let path = cursor.path.unwrap_or_else(|| self.log_path.clone());
        let snapshot = self.aggregator.snapshot();

        self.storage.flush(&snapshot, &path, cursor.offset)?;
        self.aggregator.reset();
        info!(
            "flushed counters at {}:{}",
            path.display(),
            cursor.offset
        );
        Ok(())
    }

    fn stop_requested(&self) -> bool {
        self.stop
            .as_ref()
            .is_some_and(|stop| stop.load(Ordering::Relaxed))
    }
}

//! Rotation-aware tailing of a growing log file.

use log::{debug, info, warn};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::fs::{self, File, Metadata};
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::Duration;

/// Default pause between reads once the reader has caught up with the writer.
pub const DEFAULT_DELAY: Duration = Duration::from_millis(100);

/// What a call to [`LogTailer::next_line`] produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TailEvent {
    /// A complete line, without its terminator.
    Line(String),
    /// No new data (or the file does not exist yet). The next call waits
    /// for the tailer's delay before reading again.
    Idle,
    /// The file was replaced or truncated. The next call reopens it from
    /// the start.
    Rotated,
}

/// How much of the log has been handed out.
///
/// `offset` always sits just past the last complete line returned, never
/// inside a partially written one. `path` is `None` while no file is open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cursor {
    pub path: Option<PathBuf>,
    pub offset: u64,
}

struct OpenFile {
    reader: BufReader<File>,
    identity: u64,
    offset: u64,
}

/// Wakes the idle wait early when something changes next to the log file.
struct Waker {
    _watcher: RecommendedWatcher,
    rx: Receiver<()>,
}

/// Follows a single log file across appends, truncation and rotation.
///
/// Opening is lazy: a missing file is not an error, [`next_line`](Self::next_line)
/// simply reports [`TailEvent::Idle`] until it appears.
pub struct LogTailer {
    path: PathBuf,
    start_offset: u64,
    delay: Duration,
    file: Option<OpenFile>,
    partial: Vec<u8>,
    wait_pending: bool,
    waker: Option<Waker>,
}

impl LogTailer {
    /// Create a tailer for `path` that resumes at `start_offset` on its first
    /// successful open.
    ///
    /// A non-zero offset is only trusted if the byte before it is a newline
    /// and it lies within the file; otherwise reading starts from byte 0.
    pub fn open(path: impl AsRef<Path>, start_offset: u64) -> Self {
        LogTailer {
            path: path.as_ref().to_path_buf(),
            start_offset,
            delay: DEFAULT_DELAY,
            file: None,
            partial: Vec::new(),
            wait_pending: false,
            waker: None,
        }
    }

    /// Set the pause used after an [`TailEvent::Idle`].
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Returns the path being tailed.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `true` while a file handle is open.
    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    /// Pull the next event from the file.
    ///
    /// Blocks for at most the configured delay, and only when the previous
    /// call returned [`TailEvent::Idle`].
    ///
    /// # Errors
    ///
    /// Returns any I/O error other than the file being absent.
    pub fn next_line(&mut self) -> io::Result<TailEvent> {
        if self.wait_pending {
            self.wait_pending = false;
            self.wait();
        }

        if self.file.is_none() {
            match open_file(&self.path, self.start_offset)? {
                Some(open) => {
                    self.start_offset = 0;
                    self.file = Some(open);
                    if self.waker.is_none() {
                        self.waker = watch_parent(&self.path);
                    }
                }
                None => {
                    self.wait_pending = true;
                    return Ok(TailEvent::Idle);
                }
            }
        }
        let Some(open) = self.file.as_mut() else {
            return Ok(TailEvent::Idle);
        };

        open.reader.read_until(b'\n', &mut self.partial)?;
        if self.partial.last() == Some(&b'\n') {
            open.offset += self.partial.len() as u64;
            return Ok(TailEvent::Line(take_line(&mut self.partial)));
        }

        // EOF, possibly with an unterminated line buffered.
        if replaced(&self.path, open) {
            if !self.partial.is_empty() {
                warn!(
                    "{}: discarding {} bytes of unterminated line at rotation",
                    self.path.display(),
                    self.partial.len()
                );
                self.partial.clear();
            }
            info!(
                "{}: file rotated after offset {}, reopening from start",
                self.path.display(),
                open.offset
            );
            self.file = None;
            return Ok(TailEvent::Rotated);
        }

        self.wait_pending = true;
        Ok(TailEvent::Idle)
    }

    /// Current read position.
    pub fn position(&self) -> Cursor {
        match &self.file {
            Some(open) => Cursor {
                path: Some(self.path.clone()),
                offset: open.offset,
            },
            None => Cursor {
                path: None,
                offset: 0,
            },
        }
    }

    /// Release the file handle.
    pub fn close(mut self) {
        if self.file.take().is_some() {
            debug!("{}: closed", self.path.display());
        }
    }

    fn wait(&mut self) {
        let Some(waker) = &self.waker else {
            thread::sleep(self.delay);
            return;
        };
        match waker.rx.recv_timeout(self.delay) {
            Ok(()) => while waker.rx.try_recv().is_ok() {},
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                debug!("{}: change watcher stopped", self.path.display());
                self.waker = None;
                thread::sleep(self.delay);
            }
        }
    }
}

/// Open `path` and position it at `start_offset`, or `None` if it is absent.
fn open_file(path: &Path, start_offset: u64) -> io::Result<Option<OpenFile>> {
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!("{}: not present yet", path.display());
            return Ok(None);
        }
        Err(e) => return Err(e),
    };
    let meta = file.metadata()?;
    let offset = restore_offset(&mut file, start_offset, meta.len())?;
    if offset != start_offset {
        warn!(
            "{}: offset {} is not at a line boundary, reading from start",
            path.display(),
            start_offset
        );
    }
    info!("{}: opened at offset {}", path.display(), offset);

    Ok(Some(OpenFile {
        reader: BufReader::new(file),
        identity: file_identity(&meta),
        offset,
    }))
}

/// Seek to `offset` if the byte before it is a newline, else to 0.
/// Returns the position actually used.
fn restore_offset(file: &mut File, offset: u64, len: u64) -> io::Result<u64> {
    if offset == 0 {
        return Ok(0);
    }
    if offset <= len {
        file.seek(SeekFrom::Start(offset - 1))?;
        let mut byte = [0u8; 1];
        file.read_exact(&mut byte)?;
        if byte[0] == b'\n' {
            return Ok(offset);
        }
    }
    file.seek(SeekFrom::Start(0))?;
    Ok(0)
}

/// Whether the file at `path` is no longer the one behind the handle.
fn replaced(path: &Path, open: &OpenFile) -> bool {
    match fs::metadata(path) {
        Ok(meta) => file_identity(&meta) != open.identity || meta.len() < open.offset,
        // Renamed away and not recreated yet: keep draining the old handle.
        Err(e) => {
            if e.kind() != io::ErrorKind::NotFound {
                debug!("{}: stat failed: {e}", path.display());
            }
            false
        }
    }
}

fn take_line(buf: &mut Vec<u8>) -> String {
    let mut bytes = std::mem::take(buf);
    bytes.pop();
    if bytes.last() == Some(&b'\r') {
        bytes.pop();
    }
    match String::from_utf8(bytes) {
        Ok(line) => line,
        Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
    }
}

#[cfg(unix)]
fn file_identity(meta: &Metadata) -> u64 {
    use std::os::unix::fs::MetadataExt;
    meta.ino()
}

#[cfg(not(unix))]
fn file_identity(_meta: &Metadata) -> u64 {
    // No inode; rotation is still caught through truncation.
    0
}

fn watch_parent(path: &Path) -> Option<Waker> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let (tx, rx) = mpsc::channel();
    let handler = move |res: notify::Result<notify::Event>| {
        let Ok(event) = res else {
            return;
        };
        if matches!(
            event.kind,
            EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
        ) {
            let _ = tx.send(());
        }
    };

    let mut watcher = match notify::recommended_watcher(handler) {
        Ok(watcher) => watcher,
        Err(e) => {
            debug!("change notifications unavailable, polling: {e}");
            return None;
        }
    };
    if let Err(e) = watcher.watch(dir, RecursiveMode::NonRecursive) {
        debug!("cannot watch {}, polling: {e}", dir.display());
        return None;
    }
    Some(Waker {
        _watcher: watcher,
        rx,
    })
}

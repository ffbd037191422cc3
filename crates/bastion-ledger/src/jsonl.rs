//! Durable JSON-lines files.
//!
//! One record per line. A record is written with a single `write_all` of the
//! complete line followed by `sync_data`, so a reader sees either the whole
//! line or a tail without its terminating newline. Readers never yield such a
//! torn tail; writers refuse to open a file that ends with one.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::LedgerError;

/// Append handle for a JSON-lines file. Not shared: callers wrap it in a
/// `Mutex` to get a single writer.
#[derive(Debug)]
pub struct JsonlAppender {
    path: PathBuf,
    file: File,
    len: u64,
}

impl JsonlAppender {
    /// Open for appending, creating the file and its parent directory.
    ///
    /// Fails with [`LedgerError::TornTail`] if the file does not end with a
    /// newline. Such a file is reported, never repaired.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, LedgerError> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| write_err(&path, e))?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)
            .map_err(|e| write_err(&path, e))?;
        let len = file.metadata().map_err(|e| read_err(&path, e))?.len();

        if len > 0 {
            let mut last = [0u8; 1];
            file.seek(SeekFrom::Start(len - 1)).map_err(|e| read_err(&path, e))?;
            file.read_exact(&mut last).map_err(|e| read_err(&path, e))?;
            if last[0] != b'\n' {
                warn!(path = %path.display(), len, "refusing to append after torn tail");
                return Err(LedgerError::TornTail { path });
            }
        }

        Ok(Self { path, file, len })
    }

    /// Like [`JsonlAppender::open`], and additionally take an exclusive
    /// advisory lock on the file for the lifetime of the handle.
    ///
    /// Fails with [`LedgerError::Locked`] while another handle, in this or
    /// any other process, holds the lock.
    pub fn open_exclusive(path: impl Into<PathBuf>) -> Result<Self, LedgerError> {
        let appender = Self::open(path)?;
        match try_lock_exclusive(&appender.file) {
            Ok(true) => Ok(appender),
            Ok(false) => {
                warn!(path = %appender.path.display(), "file is locked by another writer");
                Err(LedgerError::Locked {
                    path: appender.path,
                })
            }
            Err(e) => Err(write_err(&appender.path, e)),
        }
    }

    /// Cut the file back to `len` bytes, a value earlier returned by
    /// [`JsonlAppender::append`], and sync.
    pub fn truncate(&mut self, len: u64) -> Result<(), LedgerError> {
        if len > self.len {
            return Err(LedgerError::Corrupt {
                line: 0,
                reason: format!("cannot truncate {} to {len}: only {} bytes", self.path.display(), self.len),
            });
        }
        self.file
            .set_len(len)
            .and_then(|()| self.file.sync_data())
            .map_err(|e| write_err(&self.path, e))?;
        debug!(path = %self.path.display(), from = self.len, to = len, "jsonl truncate");
        self.len = len;
        Ok(())
    }

    /// Serialize `record` as one line, write it, and sync it to disk.
    ///
    /// On failure the file is cut back to its previous length so that a
    /// partial line cannot precede the next append.
    pub fn append<T: Serialize>(&mut self, record: &T) -> Result<u64, LedgerError> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        let offset = self.len;
        let written = self
            .file
            .write_all(&line)
            .and_then(|()| self.file.sync_data());
        if let Err(e) = written {
            if let Err(trunc) = self.file.set_len(offset) {
                warn!(path = %self.path.display(), error = %trunc, "could not cut back partial line");
            }
            return Err(write_err(&self.path, e));
        }

        self.len += line.len() as u64;
        debug!(path = %self.path.display(), offset, len = line.len(), "jsonl append");
        Ok(offset)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bytes currently in the file.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Lazy reader over the complete lines of a JSON-lines file.
///
/// Blank lines are skipped. A line that fails to parse ends iteration with
/// [`LedgerError::Corrupt`]. A missing file reads as empty.
pub struct JsonlReader<T> {
    path: PathBuf,
    reader: Option<BufReader<File>>,
    line_no: usize,
    buf: Vec<u8>,
    _record: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned> JsonlReader<T> {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, LedgerError> {
        let path = path.into();
        let reader = match File::open(&path) {
            Ok(file) => Some(BufReader::new(file)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(read_err(&path, e)),
        };
        Ok(Self {
            path,
            reader,
            line_no: 0,
            buf: Vec::new(),
            _record: PhantomData,
        })
    }

    fn fail(&mut self, err: LedgerError) -> Option<Result<T, LedgerError>> {
        self.reader = None;
        Some(Err(err))
    }
}

impl<T: DeserializeOwned> Iterator for JsonlReader<T> {
    type Item = Result<T, LedgerError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let reader = self.reader.as_mut()?;
            self.buf.clear();
            let n = match reader.read_until(b'\n', &mut self.buf) {
                Ok(n) => n,
                Err(e) => {
                    let err = read_err(&self.path, e);
                    return self.fail(err);
                }
            };
            if n == 0 {
                self.reader = None;
                return None;
            }
            self.line_no += 1;

            if self.buf.last() != Some(&b'\n') {
                debug!(path = %self.path.display(), line = self.line_no, "skipping torn tail");
                self.reader = None;
                return None;
            }

            let line = &self.buf[..self.buf.len() - 1];
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }

            return match serde_json::from_slice::<T>(line) {
                Ok(record) => Some(Ok(record)),
                Err(e) => {
                    let err = LedgerError::Corrupt {
                        line: self.line_no,
                        reason: e.to_string(),
                    };
                    self.fail(err)
                }
            };
        }
    }
}

/// Bytes after the last newline of the file at `path`; 0 when the file is
/// missing, empty, or ends cleanly.
pub fn torn_tail_len(path: &Path) -> Result<u64, LedgerError> {
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(read_err(path, e)),
    };
    let len = file.metadata().map_err(|e| read_err(path, e))?.len();
    let window = len.min(64 * 1024);
    file.seek(SeekFrom::Start(len - window))
        .map_err(|e| read_err(path, e))?;
    let mut tail = Vec::with_capacity(window as usize);
    file.read_to_end(&mut tail).map_err(|e| read_err(path, e))?;
    Ok(match tail.iter().rposition(|b| *b == b'\n') {
        Some(pos) => (tail.len() - pos - 1) as u64,
        None if window == len => len,
        None => window,
    })
}

/// Try to take an exclusive `flock` without blocking.
///
/// `Ok(false)` when another open file description holds it.
fn try_lock_exclusive(file: &File) -> std::io::Result<bool> {
    #[cfg(unix)]
    {
        use std::os::unix::io::AsRawFd;
        // SAFETY: the descriptor belongs to `file`, which outlives the call.
        let result = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        if result == 0 {
            return Ok(true);
        }
        let err = std::io::Error::last_os_error();
        if err.kind() == std::io::ErrorKind::WouldBlock || err.raw_os_error() == Some(libc::EWOULDBLOCK) {
            return Ok(false);
        }
        Err(err)
    }
    #[cfg(not(unix))]
    {
        let _ = file;
        Ok(true)
    }
}

fn write_err(path: &Path, source: std::io::Error) -> LedgerError {
    LedgerError::Write {
        path: path.to_path_buf(),
        source,
    }
}

fn read_err(path: &Path, source: std::io::Error) -> LedgerError {
    LedgerError::Read {
        path: path.to_path_buf(),
        source,
    }
}

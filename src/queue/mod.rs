//! Durable on-disk command queue.
//!
//! An append-only text file holding one serialized command per line, FIFO.
//! Dequeue pops the front entry by rewriting the remainder into a scratch
//! file and atomically renaming it over the original. The rename is the only
//! destructive step and happens last: a crash before it leaves the original
//! file untouched, so the popped entry is re-delivered after restart
//! (at-least-once, never lost).

use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::debug;

use crate::{AppError, Result};

/// Handle on the queue file. Owned by the dispatcher task; no other writer
/// ever opens the file, so no locking is involved.
#[derive(Debug)]
pub struct CommandQueue {
    path: PathBuf,
}

impl CommandQueue {
    /// Open (creating the parent directory if needed) a queue at `path`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Queue` if the parent directory cannot be created.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| {
                AppError::Queue(format!(
                    "failed to create queue directory {}: {err}",
                    parent.display()
                ))
            })?;
        }
        Ok(Self { path })
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one entry to the back of the queue.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Queue` on any I/O failure.
    pub fn append(&self, line: &str) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|err| {
                AppError::Queue(format!("failed to open {}: {err}", self.path.display()))
            })?;
        writeln!(file, "{line}")
            .and_then(|()| file.flush())
            .map_err(|err| {
                AppError::Queue(format!("failed to append to {}: {err}", self.path.display()))
            })?;
        debug!(queue = %self.path.display(), "entry appended to command queue");
        Ok(())
    }

    /// Whether the queue holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        fs::metadata(&self.path).map_or(true, |meta| meta.len() == 0)
    }

    /// Non-destructive read of every queued entry, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Queue` if the file exists but cannot be read.
    pub fn entries(&self) -> Result<Vec<String>> {
        if self.is_empty() {
            return Ok(Vec::new());
        }
        let raw = fs::read_to_string(&self.path).map_err(|err| {
            AppError::Queue(format!("failed to read {}: {err}", self.path.display()))
        })?;
        Ok(raw.lines().map(str::to_owned).collect())
    }

    /// Pop the oldest entry, rewriting the remainder.
    ///
    /// Returns `None` when the queue is empty. The remainder is written to a
    /// scratch file in the same directory and renamed over the original only
    /// once fully flushed.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Queue` on any I/O failure; the original file is
    /// left intact in that case.
    pub fn pop_front(&self) -> Result<Option<String>> {
        if self.is_empty() {
            return Ok(None);
        }

        let file = fs::File::open(&self.path).map_err(|err| {
            AppError::Queue(format!("failed to open {}: {err}", self.path.display()))
        })?;
        let mut lines = BufReader::new(file).lines();

        let Some(front) = lines.next() else {
            return Ok(None);
        };
        let front = front.map_err(|err| {
            AppError::Queue(format!("failed to read {}: {err}", self.path.display()))
        })?;

        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        let mut scratch = NamedTempFile::new_in(dir)
            .map_err(|err| AppError::Queue(format!("failed to create scratch file: {err}")))?;
        for line in lines {
            let line = line.map_err(|err| {
                AppError::Queue(format!("failed to read {}: {err}", self.path.display()))
            })?;
            writeln!(scratch, "{line}")
                .map_err(|err| AppError::Queue(format!("failed to write scratch file: {err}")))?;
        }
        scratch
            .flush()
            .map_err(|err| AppError::Queue(format!("failed to flush scratch file: {err}")))?;

        // Atomic swap; the queue never observes a half-written state.
        scratch.persist(&self.path).map_err(|err| {
            AppError::Queue(format!("failed to rotate {}: {err}", self.path.display()))
        })?;

        debug!(queue = %self.path.display(), "entry popped from command queue");
        Ok(Some(front))
    }
}

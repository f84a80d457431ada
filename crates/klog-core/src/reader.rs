//! Reader interface over the committed region
//!
//! A [`LogReader`] is a cursor private to its caller. Reads are clamped to
//! whatever is committed at the moment of the read; seeking past the end is
//! allowed and simply reads as end-of-stream, like seeking past the end of a
//! regular file.
//!
//! `LogReader` also implements [`std::io::Read`] and [`std::io::Seek`], which
//! is all a file-node front end needs.

use std::io;
use std::sync::Arc;

use bytes::Bytes;

use crate::buffer::LogBuffer;
use crate::error::{KlogError, KlogResult};

/// Reference point for [`LogReader::seek`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    /// Offset from the start of the log
    Start,
    /// Offset from the cursor's current position
    Current,
    /// Offset from the committed end at the time of the call
    End,
}

/// Per-caller cursor over a [`LogBuffer`]
#[derive(Debug, Clone)]
pub struct LogReader {
    buffer: Arc<LogBuffer>,
    position: u64,
}

impl LogReader {
    /// Create a cursor positioned at the start of the log
    pub fn new(buffer: Arc<LogBuffer>) -> Self {
        Self {
            buffer,
            position: 0,
        }
    }

    /// Current cursor position
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Read up to `length` bytes at `offset` without moving the cursor
    pub fn read_at(&self, offset: u64, length: usize) -> Bytes {
        self.buffer.read_at(offset, length)
    }

    /// Read up to `length` bytes at the cursor and advance past them
    ///
    /// An empty result means the cursor is at or past the committed end.
    pub fn read(&mut self, length: usize) -> Bytes {
        let bytes = self.buffer.read_at(self.position, length);
        self.position += bytes.len() as u64;
        bytes
    }

    /// Read everything from the cursor to the committed end
    pub fn read_remaining(&mut self) -> Bytes {
        let remaining = (self.buffer.committed_offset() as u64).saturating_sub(self.position);
        self.read(usize::try_from(remaining).unwrap_or(usize::MAX))
    }

    /// Move the cursor and return the new position
    ///
    /// `End` is resolved against the committed offset now, not against any
    /// earlier read, so concurrent appends move it between calls. Fails with
    /// `InvalidArgument` if the result would be negative; the cursor is left
    /// where it was.
    pub fn seek(&mut self, base: i64, whence: Whence) -> KlogResult<u64> {
        let origin = match whence {
            Whence::Start => 0,
            Whence::Current => self.position,
            Whence::End => self.buffer.committed_offset() as u64,
        };

        let target = i128::from(origin) + i128::from(base);
        if target < 0 {
            return Err(KlogError::invalid_argument(format!(
                "seek to negative offset {target} ({whence:?} {base:+})"
            )));
        }
        let target = u64::try_from(target)
            .map_err(|_| KlogError::invalid_argument(format!("seek offset {target} overflows")))?;

        self.position = target;
        Ok(target)
    }
}

impl io::Read for LogReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.buffer.read_into(self.position, buf);
        self.position += n as u64;
        Ok(n)
    }
}

impl io::Seek for LogReader {
    fn seek(&mut self, pos: io::SeekFrom) -> io::Result<u64> {
        let result = match pos {
            io::SeekFrom::Start(offset) => {
                let base = i64::try_from(offset).map_err(|_| {
                    KlogError::invalid_argument(format!("seek offset {offset} overflows"))
                })?;
                LogReader::seek(self, base, Whence::Start)
            }
            io::SeekFrom::Current(delta) => LogReader::seek(self, delta, Whence::Current),
            io::SeekFrom::End(delta) => LogReader::seek(self, delta, Whence::End),
        };
        result.map_err(io::Error::from)
    }
}

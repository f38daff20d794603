// Copyright (c) The romtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Incremental, non-blocking reads of a child process's output.
//!
//! The supervisor polls a [`StreamReader`] once per tick. A read never blocks: if the emulator
//! hasn't written anything since the last tick, the reader reports [`ReadOutcome::Pending`] and the
//! supervisor moves on to its other checks. A read is also bounded: an emulator that writes faster
//! than the harness can keep up with is read over several ticks.

use crate::errors::SupervisorError;
use bstr::{BStr, ByteSlice};
use std::{
    fmt,
    io::{self, Read},
    os::fd::{AsFd, BorrowedFd},
    process::{ChildStderr, ChildStdout},
};

/// Which of the emulator's output streams a reader is attached to.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum OutputStream {
    /// Standard output. This carries the serial trace the classifier watches.
    Stdout,

    /// Standard error.
    Stderr,
}

impl fmt::Display for OutputStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stdout => write!(f, "stdout"),
            Self::Stderr => write!(f, "stderr"),
        }
    }
}

/// A byte source that can be switched into a mode where reads return
/// [`io::ErrorKind::WouldBlock`] instead of blocking.
pub trait NonBlockingSource: Read {
    /// Switches this source into non-blocking mode.
    ///
    /// Called exactly once, when a [`StreamReader`] is constructed.
    fn set_nonblocking(&mut self) -> io::Result<()>;
}

impl NonBlockingSource for ChildStdout {
    fn set_nonblocking(&mut self) -> io::Result<()> {
        set_fd_nonblocking(self.as_fd())
    }
}

impl NonBlockingSource for ChildStderr {
    fn set_nonblocking(&mut self) -> io::Result<()> {
        set_fd_nonblocking(self.as_fd())
    }
}

fn set_fd_nonblocking(fd: BorrowedFd<'_>) -> io::Result<()> {
    use nix::fcntl::{FcntlArg, OFlag, fcntl};

    let flags = fcntl(fd, FcntlArg::F_GETFL)?;
    let new_flags = OFlag::from_bits_truncate(flags) | OFlag::O_NONBLOCK;
    fcntl(fd, FcntlArg::F_SETFL(new_flags))?;
    Ok(())
}

/// The result of a single [`StreamReader::poll_read`] call.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ReadOutcome<'a> {
    /// New bytes were read. Contains only the newly read bytes.
    Data(&'a BStr),

    /// Nothing new is available right now.
    Pending,

    /// The writing end has been closed and everything has been read.
    Closed,
}

const READ_CHUNK_SIZE: usize = 8 * 1024;

/// The most a single [`StreamReader::poll_read`] call reads.
pub const MAX_READ_PER_POLL: usize = 32 * READ_CHUNK_SIZE;

/// Accumulates everything ever read from one output stream.
#[derive(Debug)]
pub struct StreamReader<S> {
    stream: OutputStream,
    source: S,
    buf: Vec<u8>,
    // Start of the output not yet returned by `unscanned_lines`.
    scan_offset: usize,
    closed: bool,
}

impl<S: NonBlockingSource> StreamReader<S> {
    /// Creates a new reader, switching `source` into non-blocking mode.
    pub fn new(stream: OutputStream, mut source: S) -> Result<Self, SupervisorError> {
        source
            .set_nonblocking()
            .map_err(|err| SupervisorError::SetNonBlocking { stream, err })?;
        Ok(Self {
            stream,
            source,
            buf: Vec::new(),
            scan_offset: 0,
            closed: false,
        })
    }

    /// Reads what is currently available without blocking, up to [`MAX_READ_PER_POLL`] bytes.
    pub fn poll_read(&mut self) -> Result<ReadOutcome<'_>, SupervisorError> {
        if self.closed {
            return Ok(ReadOutcome::Closed);
        }

        let start = self.buf.len();
        let mut chunk = [0u8; READ_CHUNK_SIZE];
        while self.buf.len() - start < MAX_READ_PER_POLL {
            match self.source.read(&mut chunk) {
                Ok(0) => {
                    self.closed = true;
                    break;
                }
                Ok(n) => self.buf.extend_from_slice(&chunk[..n]),
                // "Would block" is the steady state while polling.
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    return Err(SupervisorError::ReadOutput {
                        stream: self.stream,
                        err,
                    });
                }
            }
        }

        if self.buf.len() > start {
            Ok(ReadOutcome::Data(self.buf[start..].as_bstr()))
        } else if self.closed {
            Ok(ReadOutcome::Closed)
        } else {
            Ok(ReadOutcome::Pending)
        }
    }
}

impl<S> StreamReader<S> {
    /// Returns the stream this reader is attached to.
    pub fn stream(&self) -> OutputStream {
        self.stream
    }

    /// Returns all lines read so far, in the order they were produced.
    ///
    /// A trailing line without a line terminator is included.
    pub fn lines(&self) -> Vec<&BStr> {
        self.buf.lines().map(ByteSlice::as_bstr).collect()
    }

    /// Returns the lines that received output since the last call, in the order they were
    /// produced.
    ///
    /// An incomplete last line is returned again by the next call, together with whatever was
    /// appended to it. Once a call returns nothing but part of a single incomplete line, the next
    /// call repeats only its final `overlap` bytes. Passing one less than the longest marker's
    /// length keeps a marker that was split across reads whole.
    pub fn unscanned_lines(&mut self, overlap: usize) -> Vec<&BStr> {
        let start = self.scan_offset;
        let new = &self.buf[start..];
        self.scan_offset = match new.rfind_byte(b'\n') {
            Some(idx) => start + idx + 1,
            // Still inside one incomplete line.
            None => self.buf.len().saturating_sub(overlap).max(start),
        };
        new.lines().map(ByteSlice::as_bstr).collect()
    }

    /// Returns everything read so far, lossily converted to UTF-8.
    pub fn contents(&self) -> String {
        self.buf.to_str_lossy().into_owned()
    }

    /// Returns true if the writing end was closed and fully drained.
    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

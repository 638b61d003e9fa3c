//! Stream duplication
//!
//! The pipeline has to look at the input more than once: the sniffer wants
//! a prefix, the SVG metrics reader wants the whole document, and the
//! external program wants every byte from the start. `TeeSource` wraps the
//! caller's reader once and hands out sequential probes. Each probe starts
//! at byte zero, replays what earlier probes already pulled, then keeps
//! reading from the live source and remembers those bytes too.
//!
//! Only the bytes some probe actually asked for are buffered, in memory.
//! A sniff costs a few KiB; reading SVG metrics buffers the whole document.
//! Raster inputs are never buffered beyond the sniff prefix.

use std::io::{self, Cursor, Read};

pub struct TeeSource<R> {
    inner: R,
    buffer: Vec<u8>,
}

impl<R: Read> TeeSource<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buffer: Vec::new(),
        }
    }

    /// A reader over the stream from its first byte.
    pub fn probe(&mut self) -> Probe<'_, R> {
        Probe {
            source: self,
            pos: 0,
        }
    }

    /// Bytes pulled from the source so far.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Pull the rest of the source into the buffer and return all of it.
    pub fn read_all(&mut self) -> io::Result<&[u8]> {
        self.inner.read_to_end(&mut self.buffer)?;
        Ok(&self.buffer)
    }

    /// Give up probing: the returned reader yields the buffered prefix
    /// followed by the untouched remainder of the source.
    pub fn into_replay(self) -> Replay<R> {
        Replay {
            prefix: Cursor::new(self.buffer),
            rest: self.inner,
        }
    }
}

pub struct Probe<'a, R> {
    source: &'a mut TeeSource<R>,
    pos: usize,
}

impl<R: Read> Read for Probe<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        let buffered = &self.source.buffer;
        if self.pos < buffered.len() {
            let n = (buffered.len() - self.pos).min(buf.len());
            buf[..n].copy_from_slice(&buffered[self.pos..self.pos + n]);
            self.pos += n;
            return Ok(n);
        }

        let n = self.source.inner.read(buf)?;
        self.source.buffer.extend_from_slice(&buf[..n]);
        self.pos += n;
        Ok(n)
    }
}

/// The caller's stream, reassembled: a buffered prefix, then the live source.
pub struct Replay<R> {
    prefix: Cursor<Vec<u8>>,
    rest: R,
}

impl<R> Replay<R> {
    /// Wrap a reader nobody has read from yet.
    pub fn untouched(rest: R) -> Self {
        Self {
            prefix: Cursor::new(Vec::new()),
            rest,
        }
    }

    /// Reassemble a stream from bytes already taken off the front and
    /// the reader holding the remainder.
    pub fn from_parts(prefix: Vec<u8>, rest: R) -> Self {
        Self {
            prefix: Cursor::new(prefix),
            rest,
        }
    }

    /// Unread buffered bytes and the live remainder.
    pub fn into_parts(self) -> (Vec<u8>, R) {
        let pos = self.prefix.position() as usize;
        let mut prefix = self.prefix.into_inner();
        prefix.drain(..pos.min(prefix.len()));
        (prefix, self.rest)
    }
}

impl<R: Read> Read for Replay<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.prefix.read(buf)?;
        if n > 0 || buf.is_empty() {
            return Ok(n);
        }
        self.rest.read(buf)
    }
}

//! Internal buffer for line-delimited byte streams.

use std::io;

/// Initial allocation of the buffer.
const LINEBUF_INITIAL: usize = 4096;

/// Least spare room offered to the reader by one `refill`.
const LINEBUF_READ_MIN: usize = 64 * 1024;

/// Longest line accepted before the link is considered broken. Image
/// payloads serialized as JSON can be tens of megabytes.
pub const LINEBUF_MAX_LINE: usize = 128 * 1024 * 1024;

#[derive(Debug)]
pub enum FillError {
    /// No data available at this time.
    NotReady,
    /// The peer closed the stream.
    Disconnected,
    /// A line exceeded `LINEBUF_MAX_LINE`.
    Overlong,
    IO(io::Error),
}

/// Growable buffer used by the stream transport to split incoming data into
/// lines and to hold outgoing data the socket could not take yet.
/// Valid data is in `buf[start..end]`; the first `scanned` bytes of it are
/// known not to contain a line terminator. `buf[end..]` is spare room for
/// the next read.
pub struct LineBuf {
    buf: Vec<u8>,
    start: usize,
    end: usize,
    scanned: usize,
}

impl LineBuf {
    pub fn new() -> LineBuf {
        LineBuf {
            buf: vec![0; LINEBUF_INITIAL],
            start: 0,
            end: 0,
            scanned: 0,
        }
    }

    pub fn empty(&self) -> bool {
        self.start == self.end
    }

    pub fn size(&self) -> usize {
        self.end - self.start
    }

    pub fn data(&self) -> &[u8] {
        &self.buf[self.start..self.end]
    }

    /// Discards `len` bytes off the beginning of the contained data.
    pub fn consume(&mut self, len: usize) {
        self.start = (self.start + len).min(self.end);
        self.scanned = self.scanned.saturating_sub(len);
        if self.empty() {
            self.start = 0;
            self.end = 0;
        }
    }

    /// Moves the data internally to the start of the buffer.
    fn compact(&mut self) {
        if self.start != 0 {
            self.buf.copy_within(self.start..self.end, 0);
            self.end -= self.start;
            self.start = 0;
        }
    }

    /// Makes room for at least `extra` more bytes after the data. Growth
    /// doubles, so zeroing the new room stays linear overall.
    fn reserve(&mut self, extra: usize) {
        self.compact();
        let needed = self.end + extra;
        if needed > self.buf.len() {
            let len = needed.max(self.buf.len() * 2);
            self.buf.resize(len, 0);
        }
    }

    pub fn add_data(&mut self, data: &[u8]) {
        self.reserve(data.len());
        self.buf[self.end..self.end + data.len()].copy_from_slice(data);
        self.end += data.len();
    }

    /// Reads once from `reader` straight into the spare room, returning how
    /// many bytes were added.
    pub fn refill<T: io::Read>(&mut self, reader: &mut T) -> Result<usize, FillError> {
        if self.size() > LINEBUF_MAX_LINE {
            return Err(FillError::Overlong);
        }
        if self.buf.len() - self.end < LINEBUF_READ_MIN {
            self.reserve(LINEBUF_READ_MIN);
        }
        match reader.read(&mut self.buf[self.end..]) {
            Ok(0) => Err(FillError::Disconnected),
            Ok(size) => {
                self.end += size;
                Ok(size)
            }
            Err(e) => match e.kind() {
                io::ErrorKind::WouldBlock => Err(FillError::NotReady),
                io::ErrorKind::Interrupted => Ok(0),
                _ => Err(FillError::IO(e)),
            },
        }
    }

    /// Pops the next complete line, without its terminator.
    pub fn next_line(&mut self) -> Option<Vec<u8>> {
        let from = self.scanned;
        let Some(offset) = self.data()[from..].iter().position(|&b| b == b'\n') else {
            self.scanned = self.size();
            return None;
        };
        let pos = from + offset;
        let line = self.data()[..pos].to_vec();
        self.consume(pos + 1);
        self.scanned = 0;
        Some(line)
    }

    /// Writes as much of the contained data as possible. Returns true once
    /// the buffer is empty.
    pub fn drain<T: io::Write>(&mut self, writer: &mut T) -> io::Result<bool> {
        while !self.empty() {
            match writer.write(self.data()) {
                Ok(0) => return Err(io::Error::from(io::ErrorKind::WriteZero)),
                Ok(size) => self.consume(size),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(true)
    }
}

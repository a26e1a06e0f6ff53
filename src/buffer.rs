//! Growable byte buffer for socket and file I/O.
//!
//! The buffer keeps a single contiguous allocation split by two cursors:
//!
//! ```text
//! +-------------------+------------------+------------------+
//! | prependable bytes |  readable bytes  |  writable bytes  |
//! |   (consumed)      |    (content)     |     (free)       |
//! +-------------------+------------------+------------------+
//! 0        <=      read_pos    <=     write_pos    <=    capacity
//! ```
//!
//! Consumed space at the front is reclaimed by compacting before the buffer
//! is ever reallocated, so memory grows to the high-water mark of pending
//! plus requested data rather than on every partial consume.

use std::fmt;
use std::io::{self, IoSliceMut, Read, Write};

/// Initial capacity used by [`Buffer::default`].
pub const DEFAULT_INITIAL_SIZE: usize = 1024;

/// Size of the stack scratch area used by [`Buffer::read_from`].
const EXTRA_READ_SIZE: usize = 64 * 1024;

/// A growable byte buffer with separate read and write cursors.
///
/// A `Buffer` is owned by one connection (or one logger) at a time. It is
/// `Send` but carries no internal locking; wrap it in a mutex to share it.
///
/// # Example
///
/// ```
/// use serverkit::Buffer;
///
/// let mut buf = Buffer::new(16);
/// buf.append_str("GET / HTTP/1.1\r\nHost: a\r\n");
///
/// let end = buf.find_crlf().unwrap();
/// assert_eq!(&buf.peek()[..end], b"GET / HTTP/1.1");
/// buf.retrieve_until(end + 2);
///
/// assert_eq!(buf.retrieve_all_to_string(), "Host: a\r\n");
/// ```
#[derive(Debug, Clone)]
pub struct Buffer {
    buf: Vec<u8>,
    read_pos: usize,
    write_pos: usize,
}

impl Default for Buffer {
    fn default() -> Self {
        Self::new(DEFAULT_INITIAL_SIZE)
    }
}

impl Buffer {
    /// Creates an empty buffer with `initial_size` bytes of writable space.
    pub fn new(initial_size: usize) -> Self {
        Self {
            buf: vec![0; initial_size],
            read_pos: 0,
            write_pos: 0,
        }
    }

    /// Total size of the backing store.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Bytes that can be written without growing or compacting.
    #[inline]
    pub fn writable_bytes(&self) -> usize {
        self.buf.len() - self.write_pos
    }

    /// Bytes produced but not yet consumed.
    #[inline]
    pub fn readable_bytes(&self) -> usize {
        self.write_pos - self.read_pos
    }

    /// Bytes already consumed at the front of the store.
    #[inline]
    pub fn prependable_bytes(&self) -> usize {
        self.read_pos
    }

    /// Returns `true` if there is nothing to read.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.read_pos == self.write_pos
    }

    /// The readable region.
    ///
    /// The slice borrows the buffer, so it cannot outlive the next append
    /// or retrieve.
    #[inline]
    pub fn peek(&self) -> &[u8] {
        &self.buf[self.read_pos..self.write_pos]
    }

    /// The writable region, for callers that fill it directly and then
    /// report the amount with [`has_written`](Self::has_written).
    #[inline]
    pub fn writable_mut(&mut self) -> &mut [u8] {
        &mut self.buf[self.write_pos..]
    }

    /// Marks `len` bytes of the writable region as written.
    ///
    /// # Panics
    ///
    /// Panics if `len` exceeds [`writable_bytes`](Self::writable_bytes).
    #[inline]
    pub fn has_written(&mut self, len: usize) {
        assert!(
            len <= self.writable_bytes(),
            "has_written({}) exceeds writable bytes ({})",
            len,
            self.writable_bytes()
        );
        self.write_pos += len;
    }

    /// Makes sure at least `len` bytes are writable. Never shrinks.
    pub fn ensure_writable(&mut self, len: usize) {
        if self.writable_bytes() < len {
            self.make_space(len);
        }
        debug_assert!(self.writable_bytes() >= len);
    }

    /// Copies `data` to the end of the readable region.
    pub fn append(&mut self, data: &[u8]) {
        self.ensure_writable(data.len());
        self.buf[self.write_pos..self.write_pos + data.len()].copy_from_slice(data);
        self.write_pos += data.len();
    }

    pub fn append_str(&mut self, s: &str) {
        self.append(s.as_bytes());
    }

    /// Copies the readable region of `other` without consuming it.
    pub fn append_buffer(&mut self, other: &Buffer) {
        self.append(other.peek());
    }

    /// Consumes `len` readable bytes.
    ///
    /// # Panics
    ///
    /// Panics if `len` exceeds [`readable_bytes`](Self::readable_bytes).
    pub fn retrieve(&mut self, len: usize) {
        assert!(
            len <= self.readable_bytes(),
            "retrieve({}) exceeds readable bytes ({})",
            len,
            self.readable_bytes()
        );
        self.read_pos += len;
    }

    /// Consumes everything before offset `end` of [`peek`](Self::peek).
    ///
    /// # Panics
    ///
    /// Panics if `end` lies past the readable region.
    pub fn retrieve_until(&mut self, end: usize) {
        self.retrieve(end);
    }

    /// Zeroes the store and resets both cursors.
    pub fn retrieve_all(&mut self) {
        self.buf.fill(0);
        self.read_pos = 0;
        self.write_pos = 0;
    }

    /// Drains the readable region into an owned string.
    ///
    /// Invalid UTF-8 sequences are replaced with `U+FFFD`.
    pub fn retrieve_all_to_string(&mut self) -> String {
        let s = String::from_utf8_lossy(self.peek()).into_owned();
        self.retrieve_all();
        s
    }

    /// Offset of the first `\r\n` in the readable region.
    pub fn find_crlf(&self) -> Option<usize> {
        self.peek().windows(2).position(|w| w == b"\r\n")
    }

    /// Reads once from `reader` into the writable region, spilling into a
    /// 64 KiB stack area when the region is too small.
    ///
    /// A single vectored read fills the writable tail first and the scratch
    /// area second. When the data fit, only the write cursor moves; otherwise
    /// the buffer is filled to capacity and the overflow is appended. The
    /// result is the number of bytes read, or the error reported by the
    /// reader (with its OS error code, if any). The buffer is unchanged on
    /// error.
    pub fn read_from<R: Read + ?Sized>(&mut self, reader: &mut R) -> io::Result<usize> {
        let mut extra = [0u8; EXTRA_READ_SIZE];
        let writable = self.writable_bytes();

        let len = {
            let mut iov = [
                IoSliceMut::new(&mut self.buf[self.write_pos..]),
                IoSliceMut::new(&mut extra),
            ];
            reader.read_vectored(&mut iov)?
        };

        if len <= writable {
            self.write_pos += len;
        } else {
            self.write_pos = self.buf.len();
            self.append(&extra[..len - writable]);
        }
        Ok(len)
    }

    /// Writes the readable region to `writer` in one call and consumes
    /// however much was accepted.
    pub fn write_to<W: Write + ?Sized>(&mut self, writer: &mut W) -> io::Result<usize> {
        let len = writer.write(self.peek())?;
        self.retrieve(len);
        Ok(len)
    }

    fn make_space(&mut self, len: usize) {
        if self.writable_bytes() + self.prependable_bytes() < len {
            self.buf.resize(self.write_pos + len + 1, 0);
        } else {
            let readable = self.readable_bytes();
            self.buf.copy_within(self.read_pos..self.write_pos, 0);
            self.read_pos = 0;
            self.write_pos = readable;
        }
    }
}

impl Write for Buffer {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.append(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl fmt::Write for Buffer {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.append_str(s);
        Ok(())
    }
}

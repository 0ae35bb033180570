//! Growable byte buffer with reclaim-on-compact semantics and scatter/gather
//! syscalls, grounded on `examples/original_source/code/buffer/buffer.cpp`
//! and shaped like `xitca-http`'s `h1::proto::buf::FlatBuf` (a `Deref`-able
//! wrapper around a contiguous byte store with explicit read/write cursors).

use std::io;
use std::os::unix::io::RawFd;

/// Size of the stack scratch segment used by [`ByteBuffer::read_fd`] to
/// absorb a read burst larger than the buffer's current capacity in a
/// single `readv(2)`.
const SCRATCH_LEN: usize = 65536;

#[derive(Debug)]
pub struct ByteBuffer {
    buf: Vec<u8>,
    read_pos: usize,
    write_pos: usize,
}

impl ByteBuffer {
    pub fn new() -> Self {
        Self::with_capacity(1024)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: vec![0; capacity],
            read_pos: 0,
            write_pos: 0,
        }
    }

    #[inline]
    pub fn readable_bytes(&self) -> usize {
        self.write_pos - self.read_pos
    }

    #[inline]
    pub fn writable_bytes(&self) -> usize {
        self.buf.len() - self.write_pos
    }

    #[inline]
    pub fn recyclable_bytes(&self) -> usize {
        self.read_pos
    }

    #[inline]
    pub fn peek(&self) -> &[u8] {
        &self.buf[self.read_pos..self.write_pos]
    }

    /// Absolute offset of the start of the readable region, for callers
    /// (the HTTP parser) that need to re-derive a slice bound found via
    /// `peek()` into a position to hand back to [`Self::retrieve_to`].
    #[inline]
    pub fn read_pos(&self) -> usize {
        self.read_pos
    }

    pub fn retrieve(&mut self, len: usize) {
        assert!(self.read_pos + len <= self.write_pos);
        self.read_pos += len;
    }

    /// Retrieve up through (not including) the given absolute offset, then
    /// skip `skip` further bytes (used by the request parser to also
    /// consume a trailing CRLF it already located).
    pub fn retrieve_to(&mut self, end: usize, skip: usize) {
        assert!(end >= self.read_pos && end <= self.write_pos);
        self.read_pos = (end + skip).min(self.write_pos);
    }

    pub fn retrieve_all(&mut self) {
        self.read_pos = 0;
        self.write_pos = 0;
    }

    pub fn retrieve_all_to_string(&mut self) -> String {
        let s = String::from_utf8_lossy(self.peek()).into_owned();
        self.retrieve_all();
        s
    }

    #[inline]
    pub fn begin_write(&mut self) -> &mut [u8] {
        let pos = self.write_pos;
        &mut self.buf[pos..]
    }

    pub fn has_written(&mut self, len: usize) {
        assert!(self.write_pos + len <= self.buf.len());
        self.write_pos += len;
    }

    pub fn ensure_writable(&mut self, len: usize) {
        if self.writable_bytes() < len {
            self.make_space(len);
        }
        debug_assert!(self.writable_bytes() >= len);
    }

    pub fn append(&mut self, data: &[u8]) {
        self.ensure_writable(data.len());
        let pos = self.write_pos;
        self.buf[pos..pos + data.len()].copy_from_slice(data);
        self.has_written(data.len());
    }

    pub fn append_str(&mut self, s: &str) {
        self.append(s.as_bytes());
    }

    fn make_space(&mut self, len: usize) {
        if self.writable_bytes() + self.recyclable_bytes() < len {
            self.buf.resize(self.write_pos + len + 1, 0);
        } else {
            let readable = self.readable_bytes();
            self.buf.copy_within(self.read_pos..self.write_pos, 0);
            self.read_pos = 0;
            self.write_pos = readable;
        }
    }

    /// Scatter-read from `fd` into the writable tail and, if the kernel
    /// handed back more than fits, a stack scratch segment that is then
    /// appended. Mirrors the two-`iovec` `readv` in the reference buffer.
    pub fn read_fd(&mut self, fd: RawFd) -> io::Result<usize> {
        let mut scratch = [0u8; SCRATCH_LEN];
        let writable = self.writable_bytes();

        let mut iov = [
            libc::iovec {
                iov_base: self.begin_write().as_mut_ptr().cast(),
                iov_len: writable,
            },
            libc::iovec {
                iov_base: scratch.as_mut_ptr().cast(),
                iov_len: scratch.len(),
            },
        ];

        let n = unsafe { libc::readv(fd, iov.as_mut_ptr(), iov.len() as i32) };
        if n < 0 {
            return Err(io::Error::last_os_error());
        }
        let n = n as usize;
        if n <= writable {
            self.has_written(n);
        } else {
            self.has_written(writable);
            self.append(&scratch[..n - writable]);
        }
        Ok(n)
    }

    /// Single `write(2)` of the whole readable region; partial writes are
    /// expected and the caller re-arms for write readiness.
    pub fn write_fd(&mut self, fd: RawFd) -> io::Result<usize> {
        let slice = self.peek();
        let n = unsafe { libc::write(fd, slice.as_ptr().cast(), slice.len()) };
        if n < 0 {
            return Err(io::Error::last_os_error());
        }
        let n = n as usize;
        self.retrieve(n);
        Ok(n)
    }
}

impl Default for ByteBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_then_retrieve_all_round_trips() {
        let mut buf = ByteBuffer::with_capacity(8);
        buf.append(b"hello world");
        assert_eq!(buf.readable_bytes(), 11);
        assert_eq!(buf.retrieve_all_to_string(), "hello world");
        assert_eq!(buf.readable_bytes(), 0);
    }

    #[test]
    fn invariants_hold_after_mixed_ops() {
        let mut buf = ByteBuffer::with_capacity(4);
        buf.append(b"abcdef");
        assert_eq!(buf.readable_bytes(), buf.write_pos - buf.read_pos);
        buf.retrieve(2);
        assert_eq!(buf.peek(), b"cdef");
        buf.append(b"gh");
        assert_eq!(buf.peek(), b"cdefgh");
        assert!(buf.read_pos <= buf.write_pos);
        assert!(buf.write_pos <= buf.buf.len());
    }

    #[test]
    fn compacts_instead_of_growing_when_space_is_reclaimable() {
        let mut buf = ByteBuffer::with_capacity(16);
        buf.append(b"0123456789");
        buf.retrieve(8);
        let cap_before = buf.buf.len();
        buf.ensure_writable(10);
        assert_eq!(buf.buf.len(), cap_before, "should compact, not grow");
        assert_eq!(buf.peek(), b"89");
    }

    #[test]
    fn grows_when_compacting_is_not_enough() {
        let mut buf = ByteBuffer::with_capacity(4);
        buf.append(b"ab");
        buf.ensure_writable(100);
        assert!(buf.writable_bytes() >= 100);
    }
}

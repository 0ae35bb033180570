//! Per-connection I/O engine, grounded on
//! `examples/original_source/code/http/httpconn.cpp`. Each `Connection`
//! owns its read/write buffers and walks a two-segment `iovec` to `writev`
//! a response header block alongside an `mmap`'d file body without copying
//! it into userspace.

use std::net::SocketAddr;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::buffer::ByteBuffer;
use crate::dbpool::{user_verify, DbPool};
use crate::http::{HttpRequest, HttpResponse};
use crate::log_info;

/// Live connection count, mirroring `HttpConn::UserCount`.
pub static USER_COUNT: AtomicUsize = AtomicUsize::new(0);

pub struct Connection {
    fd: RawFd,
    addr: SocketAddr,
    closed: bool,

    read_buf: ByteBuffer,
    write_buf: ByteBuffer,

    request: HttpRequest,
    response: HttpResponse,

    write_file: bool,
    file_offset: usize,

    src_dir: Arc<str>,
    db: Arc<DbPool>,
    is_et: bool,
}

pub enum ReadOutcome {
    /// Zero or more bytes read; caller should proceed to `process`.
    Progress,
    /// The peer closed, or a fatal (non-EAGAIN) error occurred.
    Closed,
    /// Non-blocking read would block; nothing more to do this pass.
    WouldBlock,
}

pub enum WriteOutcome {
    /// All buffered bytes were written.
    Done,
    /// Partial write; re-arm for `EPOLLOUT` and call `write` again later.
    Pending,
    /// Fatal write error or peer gone.
    Closed,
}

impl Connection {
    pub fn new(fd: RawFd, addr: SocketAddr, src_dir: Arc<str>, db: Arc<DbPool>, is_et: bool) -> Self {
        USER_COUNT.fetch_add(1, Ordering::SeqCst);
        log_info!(
            "Client[{fd}]({addr}) in, userCount:{}",
            USER_COUNT.load(Ordering::SeqCst)
        );
        Self {
            fd,
            addr,
            closed: false,
            read_buf: ByteBuffer::new(),
            write_buf: ByteBuffer::new(),
            request: HttpRequest::new(),
            response: HttpResponse::new(),
            write_file: false,
            file_offset: 0,
            src_dir,
            db,
            is_et,
        }
    }

    pub fn fd(&self) -> RawFd {
        self.fd
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn is_keep_alive(&self) -> bool {
        self.request.is_keep_alive()
    }

    /// Whether `close()` has already run for this connection. Callers
    /// holding the connection lock across a dispatch sequence check this
    /// before issuing any further `epoll_ctl` call on the fd, since the fd
    /// may already be back in the kernel's free pool by the time a stale
    /// worker gets around to re-arming it.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Bytes still queued to go out: the unread tail of the header buffer
    /// plus whatever of the mapped file body hasn't been written yet.
    pub fn to_write_bytes(&self) -> usize {
        let file_remaining = if self.write_file {
            self.response.file_len() as usize - self.file_offset
        } else {
            0
        };
        self.write_buf.readable_bytes() + file_remaining
    }

    /// Reads from the socket into `read_buf`. In ET mode keeps reading
    /// until the kernel returns `EAGAIN` (edge-triggered fds only notify
    /// once per readiness edge); in LT mode a single `readv` suffices.
    pub fn read(&mut self) -> ReadOutcome {
        loop {
            match self.read_buf.read_fd(self.fd) {
                Ok(0) => return ReadOutcome::Closed,
                Ok(_) => {
                    if !self.is_et {
                        return ReadOutcome::Progress;
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    return ReadOutcome::WouldBlock;
                }
                Err(_) => return ReadOutcome::Closed,
            }
        }
    }

    /// Parses whatever is buffered and builds a response. Returns `true`
    /// when the connection should switch to waiting on `EPOLLOUT`.
    pub fn process(&mut self) -> bool {
        self.request.reset();
        if self.read_buf.readable_bytes() == 0 {
            return false;
        }

        let db = Arc::clone(&self.db);
        let mut verify =
            |name: &str, password: &str, is_login: bool| user_verify(&db, name, password, is_login);

        let parsed = self.request.parse(&mut self.read_buf, &mut verify);
        if parsed {
            self.response
                .init(&self.src_dir, self.request.path(), self.request.is_keep_alive(), 200);
        } else {
            self.response.init(&self.src_dir, self.request.path(), false, 400);
        }

        self.response.make_response(&mut self.write_buf);

        self.file_offset = 0;
        self.write_file = self.response.file_len() > 0 && self.response.file().is_some();

        true
    }

    /// Writes the header segment followed by the mapped file segment via a
    /// single `writev`, advancing both segments across partial writes the
    /// way the reference implementation walks its two-element `iovec`.
    pub fn write(&mut self) -> WriteOutcome {
        loop {
            let header = self.write_buf.peek();
            let file_slice: &[u8] = if self.write_file {
                self.response.file().map(|f| &f[self.file_offset..]).unwrap_or(&[])
            } else {
                &[]
            };

            if header.is_empty() && file_slice.is_empty() {
                return WriteOutcome::Done;
            }

            let mut iov = [
                libc::iovec {
                    iov_base: header.as_ptr() as *mut _,
                    iov_len: header.len(),
                },
                libc::iovec {
                    iov_base: file_slice.as_ptr() as *mut _,
                    iov_len: file_slice.len(),
                },
            ];

            let n = unsafe { libc::writev(self.fd, iov.as_mut_ptr(), 2) };
            if n < 0 {
                let err = std::io::Error::last_os_error();
                return if err.kind() == std::io::ErrorKind::WouldBlock {
                    WriteOutcome::Pending
                } else {
                    WriteOutcome::Closed
                };
            }
            let n = n as usize;
            let header_len = header.len();

            if n >= header_len {
                if header_len > 0 {
                    self.write_buf.retrieve_all();
                }
                self.file_offset += n - header_len;
                if !self.write_file || self.file_offset >= self.response.file_len() as usize {
                    self.write_file = false;
                }
            } else {
                self.write_buf.retrieve(n);
            }

            if self.to_write_bytes() == 0 {
                return WriteOutcome::Done;
            }
            if !self.is_et && self.to_write_bytes() <= 10240 {
                return WriteOutcome::Pending;
            }
        }
    }

    pub fn close(&mut self) {
        self.response.unmap_file();
        if !self.closed {
            self.closed = true;
            USER_COUNT.fetch_sub(1, Ordering::SeqCst);
            unsafe {
                libc::close(self.fd);
            }
            log_info!(
                "Client[{}]({}) close, userCount:{}",
                self.fd,
                self.addr,
                USER_COUNT.load(Ordering::SeqCst)
            );
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

//! Thin wrapper over raw epoll syscalls, grounded on
//! `examples/original_source/code/server/epoller.cpp`. Uses `libc` directly
//! rather than an abstraction crate (`mio`/`tokio`) so the LT/ET/ONESHOT
//! knobs the dispatcher needs stay directly visible at the call site.

use std::io;
use std::os::unix::io::RawFd;

pub const EPOLLIN: u32 = libc::EPOLLIN as u32;
pub const EPOLLOUT: u32 = libc::EPOLLOUT as u32;
pub const EPOLLET: u32 = libc::EPOLLET as u32;
pub const EPOLLRDHUP: u32 = libc::EPOLLRDHUP as u32;
pub const EPOLLHUP: u32 = libc::EPOLLHUP as u32;
pub const EPOLLERR: u32 = libc::EPOLLERR as u32;
pub const EPOLLONESHOT: u32 = libc::EPOLLONESHOT as u32;

fn epoll_ctl_raw(epoll_fd: RawFd, op: i32, fd: RawFd, events: u32) -> io::Result<()> {
    let mut ev = libc::epoll_event {
        events,
        u64: fd as u64,
    };
    let ret = unsafe { libc::epoll_ctl(epoll_fd, op, fd, &mut ev) };
    if ret != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// A `Copy`able, thread-safe handle good for `epoll_ctl` only (add/mod/del).
/// `epoll_ctl` is safe to call concurrently from any thread holding the
/// epoll fd; only `epoll_wait` and its event buffer need single-threaded,
/// `&mut` access, which is why that part stays on [`Epoller`] instead.
#[derive(Clone, Copy)]
pub struct EpollHandle(RawFd);

impl EpollHandle {
    pub fn add_fd(&self, fd: RawFd, events: u32) -> io::Result<()> {
        epoll_ctl_raw(self.0, libc::EPOLL_CTL_ADD, fd, events)
    }

    pub fn mod_fd(&self, fd: RawFd, events: u32) -> io::Result<()> {
        epoll_ctl_raw(self.0, libc::EPOLL_CTL_MOD, fd, events)
    }

    pub fn del_fd(&self, fd: RawFd) -> io::Result<()> {
        epoll_ctl_raw(self.0, libc::EPOLL_CTL_DEL, fd, 0)
    }
}

pub struct Epoller {
    epoll_fd: RawFd,
    events: Vec<libc::epoll_event>,
}

impl Epoller {
    pub fn new(max_events: usize) -> io::Result<Self> {
        assert!(max_events > 0);
        let epoll_fd = unsafe { libc::epoll_create1(0) };
        if epoll_fd < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Self {
            epoll_fd,
            events: vec![unsafe { std::mem::zeroed() }; max_events],
        })
    }

    pub fn handle(&self) -> EpollHandle {
        EpollHandle(self.epoll_fd)
    }

    pub fn add_fd(&self, fd: RawFd, events: u32) -> io::Result<()> {
        epoll_ctl_raw(self.epoll_fd, libc::EPOLL_CTL_ADD, fd, events)
    }

    pub fn mod_fd(&self, fd: RawFd, events: u32) -> io::Result<()> {
        epoll_ctl_raw(self.epoll_fd, libc::EPOLL_CTL_MOD, fd, events)
    }

    pub fn del_fd(&self, fd: RawFd) -> io::Result<()> {
        epoll_ctl_raw(self.epoll_fd, libc::EPOLL_CTL_DEL, fd, 0)
    }

    /// Blocks up to `timeout_ms` (`-1` = indefinitely) and returns the
    /// number of ready events, `0 .. Self::events` indices now populated.
    pub fn wait(&mut self, timeout_ms: i32) -> io::Result<usize> {
        let n = unsafe {
            libc::epoll_wait(
                self.epoll_fd,
                self.events.as_mut_ptr(),
                self.events.len() as i32,
                timeout_ms,
            )
        };
        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(0);
            }
            return Err(err);
        }
        Ok(n as usize)
    }

    pub fn event_fd(&self, i: usize) -> RawFd {
        self.events[i].u64 as RawFd
    }

    pub fn events(&self, i: usize) -> u32 {
        self.events[i].events
    }
}

impl Drop for Epoller {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.epoll_fd);
        }
    }
}

/// Sets `fd` non-blocking via `fcntl`, mirroring `WebServer::SetFdNonBlock_`.
pub fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL, 0) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    let ret = unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_wait_sees_readable_pipe() {
        let (r, w) = {
            let mut fds = [0; 2];
            assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);
            (fds[0], fds[1])
        };

        let mut epoller = Epoller::new(8).unwrap();
        epoller.add_fd(r, EPOLLIN).unwrap();

        unsafe {
            libc::write(w, b"x".as_ptr().cast(), 1);
        }

        let n = epoller.wait(1000).unwrap();
        assert_eq!(n, 1);
        assert_eq!(epoller.event_fd(0), r);
        assert_ne!(epoller.events(0) & EPOLLIN, 0);

        unsafe {
            libc::close(r);
            libc::close(w);
        }
    }

    #[test]
    fn set_nonblocking_sets_the_flag() {
        let (r, w) = {
            let mut fds = [0; 2];
            assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);
            (fds[0], fds[1])
        };
        set_nonblocking(r).unwrap();
        let flags = unsafe { libc::fcntl(r, libc::F_GETFL, 0) };
        assert_ne!(flags & libc::O_NONBLOCK, 0);
        unsafe {
            libc::close(r);
            libc::close(w);
        }
    }
}

//! Server dispatch loop, grounded on
//! `examples/original_source/code/server/webserver.cpp`. The accept/epoll
//! loop runs on the calling thread; per-connection read/process/write work
//! is hashed out to the [`crate::threadpool::ThreadPool`], matching the
//! reference's `DealRead_`/`DealWrite_` handing `OnRead_`/`OnWrite_` off to
//! its own thread pool while keeping `DealListen_`/`CloseConn_` on the
//! reactor thread.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::os::unix::io::RawFd;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::config::ServerConfig;
use crate::connection::{Connection, ReadOutcome, WriteOutcome};
use crate::dbpool::DbPool;
use crate::error::{Error, Result};
use crate::reactor::{EpollHandle, Epoller, EPOLLERR, EPOLLHUP, EPOLLIN, EPOLLOUT, EPOLLRDHUP};
use crate::threadpool::ThreadPool;
use crate::timer::TimerHeap;
use crate::{log_error, log_info, log_warn};

/// Matches `WebServer::MAX_FD`: once this many connections are open, new
/// accepts get a busy response instead of a slot.
const MAX_FD: usize = 65536;

type ClientMap = Mutex<HashMap<RawFd, Arc<Mutex<Connection>>>>;

pub struct Server {
    config: ServerConfig,
    listen_fd: RawFd,
    listen_event: u32,
    conn_event: u32,

    epoller: Mutex<Epoller>,
    timer: Mutex<TimerHeap>,
    pool: ThreadPool,
    db: Arc<DbPool>,

    clients: ClientMap,
    src_dir: Arc<str>,
}

impl Server {
    pub fn new(config: ServerConfig) -> Result<Arc<Self>> {
        let db = DbPool::init(
            &config.db_host,
            config.db_port,
            &config.db_user,
            &config.db_password,
            &config.db_name,
            config.db_pool_size,
        )?;

        let (listen_event, conn_event) = config.event_modes();
        let listen_fd = init_listen_socket(config.port)?;

        let epoller = Epoller::new(512).map_err(Error::Reactor)?;
        epoller
            .add_fd(listen_fd, listen_event | EPOLLIN)
            .map_err(Error::Reactor)?;
        crate::reactor::set_nonblocking(listen_fd).map_err(Error::Reactor)?;

        let src_dir: Arc<str> = Arc::from(config.src_dir.to_string_lossy().into_owned());

        log_info!("============== Server Init ==============");
        log_info!(
            "Listen Mode: {}, OpenConn Mode: {}",
            if listen_event & crate::reactor::EPOLLET != 0 { "ET" } else { "LT" },
            if conn_event & crate::reactor::EPOLLET != 0 { "ET" } else { "LT" },
        );
        log_info!("srcDir: {src_dir}");
        log_info!(
            "SqlConnPool num: {}, ThreadPool num: {}",
            config.db_pool_size,
            config.thread_count
        );

        let pool = ThreadPool::new(config.thread_count);

        tracing::info!(port = config.port, trig_mode = config.trig_mode, "server initialized");

        Ok(Arc::new(Self {
            listen_fd,
            listen_event,
            conn_event,
            epoller: Mutex::new(epoller),
            timer: Mutex::new(TimerHeap::new()),
            pool,
            db,
            clients: Mutex::new(HashMap::new()),
            src_dir,
            config,
        }))
    }

    pub fn connection_count(&self) -> usize {
        self.clients.lock().unwrap().len()
    }

    /// Runs the accept/epoll loop until a fatal reactor error occurs. Never
    /// returns `Ok` in normal operation (matches `WebServer::Start`'s
    /// `while(!isClose_)`, which only exits via process termination).
    pub fn start(self: &Arc<Self>) -> Result<()> {
        log_info!("=========== Server start! ==========");
        loop {
            let timeout_ms = if self.config.timeout_ms > 0 {
                self.timer.lock().unwrap().next_tick_ms()
            } else {
                -1
            };

            let n = {
                let mut epoller = self.epoller.lock().unwrap();
                match epoller.wait(timeout_ms) {
                    Ok(n) => n,
                    Err(e) => {
                        tracing::error!(error = %e, "epoll_wait failed, stopping reactor loop");
                        return Err(Error::Reactor(e));
                    }
                }
            };

            for i in 0..n {
                let (fd, events) = {
                    let epoller = self.epoller.lock().unwrap();
                    (epoller.event_fd(i), epoller.events(i))
                };

                if fd == self.listen_fd {
                    self.deal_listen();
                } else if events & (EPOLLRDHUP | EPOLLHUP | EPOLLERR) != 0 {
                    self.close_conn(fd);
                } else if events & EPOLLIN != 0 {
                    self.deal_read(fd);
                } else if events & EPOLLOUT != 0 {
                    self.deal_write(fd);
                } else {
                    log_error!("Unexpected event");
                }
            }
        }
    }

    fn epoll_handle(&self) -> EpollHandle {
        self.epoller.lock().unwrap().handle()
    }

    fn deal_listen(self: &Arc<Self>) {
        loop {
            let mut addr: libc::sockaddr_in = unsafe { std::mem::zeroed() };
            let mut len = std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t;
            let fd = unsafe {
                libc::accept(
                    self.listen_fd,
                    (&mut addr as *mut libc::sockaddr_in).cast(),
                    &mut len,
                )
            };
            if fd <= 0 {
                return;
            }
            if self.connection_count() >= MAX_FD {
                send_busy(fd);
                log_warn!("Clients are full!");
                tracing::warn!(fd, "connection rejected: server at MAX_FD capacity");
                let _ = unsafe { libc::close(fd) };
                return;
            }
            self.add_client(fd, sockaddr_to_std(&addr));

            if self.listen_event & crate::reactor::EPOLLET == 0 {
                return;
            }
        }
    }

    fn add_client(self: &Arc<Self>, fd: RawFd, addr: SocketAddr) {
        if self.config.graceful_close {
            set_linger(fd, true, 1);
        }

        let conn = Connection::new(fd, addr, Arc::clone(&self.src_dir), Arc::clone(&self.db), self.conn_event & crate::reactor::EPOLLET != 0);
        let conn = Arc::new(Mutex::new(conn));
        self.clients.lock().unwrap().insert(fd, Arc::clone(&conn));

        if self.config.timeout_ms > 0 {
            let this = Arc::clone(self);
            self.timer
                .lock()
                .unwrap()
                .add(fd, Duration::from_millis(self.config.timeout_ms as u64), move || {
                    this.close_conn(fd);
                });
        }

        if let Err(e) = self.epoll_handle().add_fd(fd, EPOLLIN | self.conn_event) {
            log_error!("epoll add_fd failed: {e}");
        }
        if let Err(e) = crate::reactor::set_nonblocking(fd) {
            log_error!("set_nonblocking failed: {e}");
        }
        log_info!("Client[{fd}] in!");
    }

    /// Looks the connection up and closes it. Acquires the connection's own
    /// lock before touching the fd, so this can never interleave with a
    /// worker thread's in-flight `read`/`process`/`write` → `mod_fd`
    /// sequence for the same fd (see [`Self::close_conn_locked`]).
    fn close_conn(self: &Arc<Self>, fd: RawFd) {
        let Some(conn) = self.clients.lock().unwrap().get(&fd).cloned() else {
            return;
        };
        let mut guard = conn.lock().unwrap();
        self.close_conn_locked(fd, &mut guard);
    }

    /// Closes `fd`, given a lock already held on its connection. Removing
    /// the registry entry, `EPOLL_CTL_DEL`, and the actual `close(2)` all
    /// happen while the caller still holds the per-connection mutex, so a
    /// concurrent worker that is mid-dispatch for this same fd is either
    /// still ahead of us (holds the lock, we block here until it re-arms or
    /// finishes) or strictly behind us (blocks on this same lock and then
    /// observes `is_closed()` and skips its own `epoll_ctl` call). Either
    /// way no `epoll_ctl`/`mod_fd` can land on the fd after it has actually
    /// been closed and potentially reused by a new `accept()`.
    fn close_conn_locked(self: &Arc<Self>, fd: RawFd, guard: &mut std::sync::MutexGuard<'_, Connection>) {
        if guard.is_closed() {
            return;
        }
        self.clients.lock().unwrap().remove(&fd);
        let _ = self.epoll_handle().del_fd(fd);
        guard.close();
    }

    fn extend_time(&self, fd: RawFd) {
        if self.config.timeout_ms > 0 {
            self.timer
                .lock()
                .unwrap()
                .adjust(fd, Duration::from_millis(self.config.timeout_ms as u64));
        }
    }

    fn deal_read(self: &Arc<Self>, fd: RawFd) {
        self.extend_time(fd);
        let Some(conn) = self.clients.lock().unwrap().get(&fd).cloned() else {
            return;
        };
        let this = Arc::clone(self);
        self.pool.add_task(move || this.on_read(fd, conn));
    }

    fn deal_write(self: &Arc<Self>, fd: RawFd) {
        self.extend_time(fd);
        let Some(conn) = self.clients.lock().unwrap().get(&fd).cloned() else {
            return;
        };
        let this = Arc::clone(self);
        self.pool.add_task(move || this.on_write(fd, conn));
    }

    /// Reads, then (on success) parses/responds and re-arms the fd, all
    /// while holding a single lock on the connection. Holding the lock
    /// across the whole sequence — through the final `mod_fd`/`close_conn`
    /// decision — is what makes the `ONESHOT` serialisation actually safe:
    /// see [`Self::close_conn_locked`].
    fn on_read(self: Arc<Self>, fd: RawFd, conn: Arc<Mutex<Connection>>) {
        let mut guard = conn.lock().unwrap();
        if guard.is_closed() {
            return;
        }
        let outcome = guard.read();
        match outcome {
            ReadOutcome::Closed => {
                self.close_conn_locked(fd, &mut guard);
                return;
            }
            ReadOutcome::WouldBlock | ReadOutcome::Progress => {}
        }
        self.on_process_locked(fd, &mut guard);
    }

    fn on_process_locked(self: &Arc<Self>, fd: RawFd, guard: &mut std::sync::MutexGuard<'_, Connection>) {
        let wants_write = guard.process();
        let events = self.conn_event | if wants_write { EPOLLOUT } else { EPOLLIN };
        if let Err(e) = self.epoll_handle().mod_fd(fd, events) {
            log_error!("epoll mod_fd failed: {e}");
        }
    }

    fn on_write(self: Arc<Self>, fd: RawFd, conn: Arc<Mutex<Connection>>) {
        let mut guard = conn.lock().unwrap();
        if guard.is_closed() {
            return;
        }
        let outcome = guard.write();
        let keep_alive = guard.is_keep_alive();

        match outcome {
            WriteOutcome::Done => {
                if keep_alive {
                    if let Err(e) = self.epoll_handle().mod_fd(fd, self.conn_event | EPOLLIN) {
                        log_error!("epoll mod_fd failed: {e}");
                    }
                    return;
                }
                self.close_conn_locked(fd, &mut guard);
            }
            WriteOutcome::Pending => {
                if let Err(e) = self.epoll_handle().mod_fd(fd, self.conn_event | EPOLLOUT) {
                    log_error!("epoll mod_fd failed: {e}");
                }
            }
            WriteOutcome::Closed => self.close_conn_locked(fd, &mut guard),
        }
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.listen_fd);
        }
    }
}

fn init_listen_socket(port: u16) -> Result<RawFd> {
    let fd = unsafe { libc::socket(libc::AF_INET, libc::SOCK_STREAM, 0) };
    if fd < 0 {
        return Err(Error::Listen { port, source: std::io::Error::last_os_error() });
    }

    let optval: libc::c_int = 1;
    let ret = unsafe {
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_REUSEADDR,
            (&optval as *const libc::c_int).cast(),
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if ret == -1 {
        let source = std::io::Error::last_os_error();
        unsafe { libc::close(fd) };
        return Err(Error::Listen { port, source });
    }

    let addr = libc::sockaddr_in {
        sin_family: libc::AF_INET as libc::sa_family_t,
        sin_port: port.to_be(),
        sin_addr: libc::in_addr { s_addr: libc::INADDR_ANY },
        sin_zero: [0; 8],
    };

    let ret = unsafe {
        libc::bind(
            fd,
            (&addr as *const libc::sockaddr_in).cast(),
            std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
        )
    };
    if ret < 0 {
        let source = std::io::Error::last_os_error();
        unsafe { libc::close(fd) };
        return Err(Error::Listen { port, source });
    }

    let ret = unsafe { libc::listen(fd, 8) };
    if ret < 0 {
        let source = std::io::Error::last_os_error();
        unsafe { libc::close(fd) };
        return Err(Error::Listen { port, source });
    }

    Ok(fd)
}

fn sockaddr_to_std(addr: &libc::sockaddr_in) -> SocketAddr {
    let ip = std::net::Ipv4Addr::from(u32::from_be(addr.sin_addr.s_addr));
    SocketAddr::from((ip, u16::from_be(addr.sin_port)))
}

fn send_busy(fd: RawFd) {
    const MSG: &[u8] = b"Internal Server Busy";
    let ret = unsafe { libc::send(fd, MSG.as_ptr().cast(), MSG.len(), 0) };
    if ret < 0 {
        log_warn!("send error to client error!");
    }
}

/// Sets `SO_LINGER` on an accepted connection fd, mirroring the reference's
/// `openLinger_` flag (`webserver.h`). `onoff=1, linger=1` makes `close()`
/// block briefly to flush queued data instead of an abortive RST.
fn set_linger(fd: RawFd, onoff: bool, linger_secs: i32) {
    let l = libc::linger {
        l_onoff: onoff as i32,
        l_linger: linger_secs,
    };
    let ret = unsafe {
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_LINGER,
            (&l as *const libc::linger).cast(),
            std::mem::size_of::<libc::linger>() as libc::socklen_t,
        )
    };
    if ret < 0 {
        log_warn!("setsockopt SO_LINGER failed: {}", std::io::Error::last_os_error());
    }
}

use std::io;

/// Crate-wide error type. Connection-local failures never surface as this
/// type past the connection engine (they resolve to a status code or a
/// close instead); this enum is reserved for subsystem failures that are
/// fatal at startup or otherwise cross a clear API boundary.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("database error: {0}")]
    Db(#[from] mysql::Error),

    #[error("epoll_ctl/epoll_wait failed: {0}")]
    Reactor(io::Error),

    #[error("listener setup failed on port {port}: {source}")]
    Listen { port: u16, source: io::Error },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

//! Single-process, multi-reactor HTTP/1.1 server: epoll-driven I/O,
//! a bounded worker pool for request handling, a bounded MySQL connection
//! pool, and an async file logger — grounded throughout on
//! `examples/original_source` (`staygoldboy/MYTinyWebServer`), translated
//! into the idioms of the `xitca-web` workspace this crate was built from.

pub mod buffer;
pub mod config;
pub mod connection;
pub mod dbpool;
pub mod error;
pub mod http;
#[macro_use]
pub mod logger;
pub mod queue;
pub mod reactor;
pub mod server;
pub mod threadpool;
pub mod timer;

pub use config::ServerConfig;
pub use error::{Error, Result};
pub use server::Server;

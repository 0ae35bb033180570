//! Server configuration, the ambient layer the reference project left as
//! hardcoded `main()` arguments (`examples/original_source/code/main.cpp`).
//! Defaults match that file; every field is overridable via a `TINYWEB_`-
//! prefixed environment variable for container/systemd deployment, the
//! pattern `Masorubka1-iscsi-client-rs` uses for its own connection config.

use std::path::PathBuf;

use crate::logger::LogLevel;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub trig_mode: u8,
    pub timeout_ms: i32,
    pub graceful_close: bool,

    pub db_host: String,
    pub db_port: u16,
    pub db_user: String,
    pub db_password: String,
    pub db_name: String,
    pub db_pool_size: usize,

    pub thread_count: usize,

    pub open_log: bool,
    pub log_level: LogLevel,
    pub log_dir: PathBuf,
    pub log_queue_size: usize,

    pub src_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 9006,
            trig_mode: 3,
            timeout_ms: 60_000,
            graceful_close: false,
            db_host: "localhost".to_string(),
            db_port: 3306,
            db_user: String::new(),
            db_password: String::new(),
            db_name: "webserver".to_string(),
            db_pool_size: 12,
            thread_count: 8,
            open_log: true,
            log_level: LogLevel::Info,
            log_dir: PathBuf::from("./log"),
            log_queue_size: 1024,
            src_dir: PathBuf::from("./resources"),
        }
    }
}

impl ServerConfig {
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder(Self::default())
    }

    /// Overlays environment overrides atop the current values. Unset or
    /// unparsable variables are left untouched; callers that need a hard
    /// failure on a malformed override should validate afterward.
    pub fn with_env_overrides(mut self) -> Self {
        macro_rules! override_parsed {
            ($field:expr, $var:expr) => {
                if let Ok(v) = std::env::var($var) {
                    if let Ok(parsed) = v.parse() {
                        $field = parsed;
                    }
                }
            };
        }
        override_parsed!(self.port, "TINYWEB_PORT");
        override_parsed!(self.trig_mode, "TINYWEB_TRIG_MODE");
        override_parsed!(self.timeout_ms, "TINYWEB_TIMEOUT_MS");
        override_parsed!(self.graceful_close, "TINYWEB_GRACEFUL_CLOSE");
        override_parsed!(self.db_port, "TINYWEB_DB_PORT");
        override_parsed!(self.db_pool_size, "TINYWEB_DB_POOL_SIZE");
        override_parsed!(self.thread_count, "TINYWEB_THREAD_COUNT");
        override_parsed!(self.open_log, "TINYWEB_OPEN_LOG");
        override_parsed!(self.log_queue_size, "TINYWEB_LOG_QUEUE_SIZE");

        if let Ok(v) = std::env::var("TINYWEB_DB_HOST") {
            self.db_host = v;
        }
        if let Ok(v) = std::env::var("TINYWEB_DB_USER") {
            self.db_user = v;
        }
        if let Ok(v) = std::env::var("TINYWEB_DB_PASSWORD") {
            self.db_password = v;
        }
        if let Ok(v) = std::env::var("TINYWEB_DB_NAME") {
            self.db_name = v;
        }
        if let Ok(v) = std::env::var("TINYWEB_SRC_DIR") {
            self.src_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("TINYWEB_LOG_DIR") {
            self.log_dir = PathBuf::from(v);
        }

        self
    }

    /// Derives `listen_event`/`conn_event` epoll flag masks from
    /// `trig_mode`, mirroring `WebServer::InitEventMode_`.
    pub fn event_modes(&self) -> (u32, u32) {
        use crate::reactor::{EPOLLET, EPOLLONESHOT, EPOLLRDHUP};

        let mut listen_event = EPOLLRDHUP;
        let mut conn_event = EPOLLONESHOT | EPOLLRDHUP;

        match self.trig_mode {
            0 => {}
            1 => conn_event |= EPOLLET,
            2 => listen_event |= EPOLLET,
            3 => {
                listen_event |= EPOLLET;
                conn_event |= EPOLLET;
            }
            _ => {
                listen_event |= EPOLLET;
                conn_event |= EPOLLET;
            }
        }

        (listen_event, conn_event)
    }
}

pub struct ServerConfigBuilder(ServerConfig);

impl ServerConfigBuilder {
    pub fn port(mut self, port: u16) -> Self {
        self.0.port = port;
        self
    }

    pub fn trig_mode(mut self, mode: u8) -> Self {
        self.0.trig_mode = mode;
        self
    }

    pub fn timeout_ms(mut self, ms: i32) -> Self {
        self.0.timeout_ms = ms;
        self
    }

    pub fn graceful_close(mut self, enabled: bool) -> Self {
        self.0.graceful_close = enabled;
        self
    }

    pub fn db(mut self, host: &str, port: u16, user: &str, password: &str, name: &str) -> Self {
        self.0.db_host = host.to_string();
        self.0.db_port = port;
        self.0.db_user = user.to_string();
        self.0.db_password = password.to_string();
        self.0.db_name = name.to_string();
        self
    }

    pub fn db_pool_size(mut self, size: usize) -> Self {
        self.0.db_pool_size = size;
        self
    }

    pub fn thread_count(mut self, count: usize) -> Self {
        self.0.thread_count = count;
        self
    }

    pub fn logging(mut self, open: bool, level: LogLevel, queue_size: usize) -> Self {
        self.0.open_log = open;
        self.0.log_level = level;
        self.0.log_queue_size = queue_size;
        self
    }

    pub fn src_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.0.src_dir = dir.into();
        self
    }

    pub fn build(self) -> ServerConfig {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trig_mode_three_is_et_et() {
        let cfg = ServerConfig::builder().trig_mode(3).build();
        let (listen, conn) = cfg.event_modes();
        assert_ne!(listen & crate::reactor::EPOLLET, 0);
        assert_ne!(conn & crate::reactor::EPOLLET, 0);
    }

    #[test]
    fn trig_mode_zero_is_lt_lt() {
        let cfg = ServerConfig::builder().trig_mode(0).build();
        let (listen, conn) = cfg.event_modes();
        assert_eq!(listen & crate::reactor::EPOLLET, 0);
        assert_eq!(conn & crate::reactor::EPOLLET, 0);
    }

    #[test]
    fn defaults_match_reference_main() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.port, 9006);
        assert_eq!(cfg.trig_mode, 3);
        assert_eq!(cfg.timeout_ms, 60_000);
        assert_eq!(cfg.db_name, "webserver");
        assert_eq!(cfg.db_pool_size, 12);
        assert_eq!(cfg.thread_count, 8);
    }
}

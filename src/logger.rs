//! Asynchronous level-tagged logger with daily/line-count file rotation,
//! grounded on `examples/original_source/code/log/log.cpp`. The drain side
//! reuses [`crate::queue::BlockingQueue`]; the process-wide instance follows
//! the lazy-singleton shape of `mysql::Pool`/`once_cell` usage seen in
//! `elbaro-zero-mysql`.

use std::fs::{self, File, OpenOptions};
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Mutex;
use std::thread::JoinHandle;

use chrono::{Datelike, Local, Timelike};
use once_cell::sync::OnceCell;

use crate::queue::BlockingQueue;

const MAX_LINES: u64 = 50_000;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum LogLevel {
    Debug = 0,
    Info = 1,
    Warn = 2,
    Error = 3,
}

impl LogLevel {
    fn tag(self) -> &'static str {
        match self {
            LogLevel::Debug => "[debug]: ",
            LogLevel::Info => "[info]: ",
            LogLevel::Warn => "[warn]: ",
            LogLevel::Error => "[error]: ",
        }
    }
}

pub struct LoggerConfig {
    pub level: LogLevel,
    pub dir: PathBuf,
    pub suffix: String,
    pub queue_capacity: usize,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            dir: PathBuf::from("./log"),
            suffix: ".log".to_string(),
            queue_capacity: 1024,
        }
    }
}

struct FileState {
    file: Option<File>,
    line_count: u64,
    day: u32,
    dir: PathBuf,
    suffix: String,
}

impl FileState {
    fn open_for(dir: &Path, name: &str) -> std::io::Result<File> {
        let path = dir.join(name);
        match OpenOptions::new().create(true).append(true).open(&path) {
            Ok(f) => Ok(f),
            Err(_) => {
                fs::create_dir_all(dir)?;
                let mut perms = fs::metadata(dir)?.permissions();
                use std::os::unix::fs::PermissionsExt;
                perms.set_mode(0o777);
                let _ = fs::set_permissions(dir, perms);
                OpenOptions::new().create(true).append(true).open(&path)
            }
        }
    }

    fn new(dir: PathBuf, suffix: String) -> std::io::Result<Self> {
        let now = Local::now();
        let name = format!(
            "{:04}_{:02}_{:02}{}",
            now.year(),
            now.month(),
            now.day(),
            suffix
        );
        let file = Self::open_for(&dir, &name)?;
        Ok(Self {
            file: Some(file),
            line_count: 0,
            day: now.day(),
            dir,
            suffix,
        })
    }

    /// Rotates the file if the calendar day changed or the line count just
    /// crossed a `MAX_LINES` boundary within the same day.
    fn maybe_rotate(&mut self) {
        let now = Local::now();
        let day_changed = now.day() != self.day;
        let line_rolled = self.line_count > 0 && self.line_count % MAX_LINES == 0;

        if !day_changed && !line_rolled {
            return;
        }

        let name = if day_changed {
            self.line_count = 0;
            self.day = now.day();
            format!(
                "{:04}_{:02}_{:02}{}",
                now.year(),
                now.month(),
                now.day(),
                self.suffix
            )
        } else {
            format!(
                "{:04}_{:02}_{:02}-{}{}",
                now.year(),
                now.month(),
                now.day(),
                self.line_count / MAX_LINES,
                self.suffix
            )
        };

        if let Some(mut f) = self.file.take() {
            let _ = f.flush();
        }
        self.file = Self::open_for(&self.dir, &name).ok();
    }

    fn write_record(&mut self, record: &str) {
        self.maybe_rotate();
        self.line_count += 1;
        if let Some(f) = self.file.as_mut() {
            let _ = f.write_all(record.as_bytes());
        }
    }
}

pub struct Logger {
    level: AtomicU8,
    state: Mutex<FileState>,
    queue: Option<BlockingQueue<String>>,
}

impl Logger {
    fn new(config: LoggerConfig) -> std::io::Result<Self> {
        let state = FileState::new(config.dir, config.suffix)?;
        let queue = if config.queue_capacity > 0 {
            Some(BlockingQueue::new(config.queue_capacity))
        } else {
            None
        };
        Ok(Self {
            level: AtomicU8::new(config.level as u8),
            state: Mutex::new(state),
            queue,
        })
    }

    pub fn level(&self) -> LogLevel {
        match self.level.load(Ordering::Relaxed) {
            0 => LogLevel::Debug,
            1 => LogLevel::Info,
            2 => LogLevel::Warn,
            _ => LogLevel::Error,
        }
    }

    pub fn set_level(&self, level: LogLevel) {
        self.level.store(level as u8, Ordering::Relaxed);
    }

    pub fn is_enabled(&self, level: LogLevel) -> bool {
        (level as u8) >= self.level.load(Ordering::Relaxed)
    }

    /// Formats a record and either enqueues it for the drain thread or
    /// writes it inline, per §4.3 step 4.
    pub fn write(&self, level: LogLevel, args: std::fmt::Arguments<'_>) {
        let now = Local::now();
        let record = format!(
            "{:04}-{:02}-{:02} {:02}:{:02}:{:02}.{:06} {}{}\n",
            now.year(),
            now.month(),
            now.day(),
            now.hour(),
            now.minute(),
            now.second(),
            now.timestamp_subsec_micros(),
            level.tag(),
            args
        );

        match &self.queue {
            Some(q) => {
                if let Err(record) = q.try_push_back(record) {
                    self.state.lock().unwrap().write_record(&record);
                }
            }
            None => self.state.lock().unwrap().write_record(&record),
        }
    }

    pub fn flush(&self) {
        if let Some(q) = &self.queue {
            q.flush();
        }
        if let Some(f) = self.state.lock().unwrap().file.as_mut() {
            let _ = f.flush();
        }
    }

    fn drain_loop(&self) {
        let queue = self.queue.as_ref().expect("drain_loop requires async mode");
        while let Some(record) = queue.pop() {
            self.state.lock().unwrap().write_record(&record);
        }
    }
}

trait TimestampSubsecMicros {
    fn timestamp_subsec_micros(&self) -> u32;
}

impl TimestampSubsecMicros for chrono::DateTime<Local> {
    fn timestamp_subsec_micros(&self) -> u32 {
        self.timestamp_subsec_nanos() / 1_000
    }
}

static LOGGER: OnceCell<Logger> = OnceCell::new();
static DRAIN_THREAD: OnceCell<Mutex<Option<JoinHandle<()>>>> = OnceCell::new();

/// Lazily initialises the process-wide logger. Calling this more than once
/// is a no-op after the first successful call (matches the reference's
/// `init` being safe to call idempotently from `WebServer`'s constructor).
pub fn init(config: LoggerConfig) -> std::io::Result<()> {
    if LOGGER.get().is_some() {
        return Ok(());
    }
    let logger = Logger::new(config)?;
    let is_async = logger.queue.is_some();
    if LOGGER.set(logger).is_err() {
        return Ok(());
    }
    if is_async {
        let handle = std::thread::Builder::new()
            .name("log-drain".into())
            .spawn(|| instance().drain_loop())
            .expect("failed to spawn log drain thread");
        let _ = DRAIN_THREAD.set(Mutex::new(Some(handle)));
    }
    Ok(())
}

/// Returns the process-wide logger.
///
/// # Panics
/// Panics if [`init`] has not been called; logger initialisation failure is
/// treated as fatal at startup per spec §7.
pub fn instance() -> &'static Logger {
    LOGGER.get().expect("logger not initialised")
}

pub fn is_initialized() -> bool {
    LOGGER.get().is_some()
}

#[doc(hidden)]
pub fn __log(level: LogLevel, args: std::fmt::Arguments<'_>) {
    if is_initialized() {
        instance().write(level, args);
    }
}

#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        if $crate::logger::is_initialized() && $crate::logger::instance().is_enabled($crate::logger::LogLevel::Debug) {
            $crate::logger::__log($crate::logger::LogLevel::Debug, format_args!($($arg)*));
        }
    };
}

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        if $crate::logger::is_initialized() && $crate::logger::instance().is_enabled($crate::logger::LogLevel::Info) {
            $crate::logger::__log($crate::logger::LogLevel::Info, format_args!($($arg)*));
        }
    };
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        if $crate::logger::is_initialized() && $crate::logger::instance().is_enabled($crate::logger::LogLevel::Warn) {
            $crate::logger::__log($crate::logger::LogLevel::Warn, format_args!($($arg)*));
        }
    };
}

#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        if $crate::logger::is_initialized() && $crate::logger::instance().is_enabled($crate::logger::LogLevel::Error) {
            $crate::logger::__log($crate::logger::LogLevel::Error, format_args!($($arg)*));
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_filter_suppresses_below_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let logger = Logger::new(LoggerConfig {
            level: LogLevel::Warn,
            dir: dir.path().to_path_buf(),
            suffix: ".log".into(),
            queue_capacity: 0,
        })
        .unwrap();
        assert!(!logger.is_enabled(LogLevel::Debug));
        assert!(!logger.is_enabled(LogLevel::Info));
        assert!(logger.is_enabled(LogLevel::Warn));
        assert!(logger.is_enabled(LogLevel::Error));
    }

    #[test]
    fn sync_mode_writes_line_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let logger = Logger::new(LoggerConfig {
            level: LogLevel::Debug,
            dir: dir.path().to_path_buf(),
            suffix: ".log".into(),
            queue_capacity: 0,
        })
        .unwrap();
        logger.write(LogLevel::Info, format_args!("hello {}", 42));
        logger.flush();

        let mut entries = fs::read_dir(dir.path()).unwrap();
        let entry = entries.next().unwrap().unwrap();
        let contents = fs::read_to_string(entry.path()).unwrap();
        assert!(contents.contains("[info]: hello 42"));
    }
}

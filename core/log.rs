// Leveled logging with an optional process-wide current logger
use once_cell::sync::Lazy;
use std::fmt;
use std::sync::{Arc, Mutex, RwLock};

// Log levels, least to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum LogLevel {
    Debug = 1,
    Info = 2,
    Warn = 3,
    Error = 4,
    Critical = 5,
    Fatal = 6,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            LogLevel::Debug => write!(f, "DEBUG"),
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Warn => write!(f, "WARN"),
            LogLevel::Error => write!(f, "ERROR"),
            LogLevel::Critical => write!(f, "CRITICAL"),
            LogLevel::Fatal => write!(f, "FATAL"),
        }
    }
}

impl LogLevel {
    /// Parse a level name as found in config files ("warn", "ERROR", ...).
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "debug" => Some(LogLevel::Debug),
            "info" => Some(LogLevel::Info),
            "warn" | "warning" => Some(LogLevel::Warn),
            "error" => Some(LogLevel::Error),
            "critical" => Some(LogLevel::Critical),
            "fatal" => Some(LogLevel::Fatal),
            _ => None,
        }
    }
}

/// Sink for leveled messages. Components only ever write; they never read
/// logger state back.
pub trait Logger: Send + Sync {
    fn log(&self, level: LogLevel, message: &str);

    /// File/line-tagged variant; the default folds the tag into the message.
    fn log_tagged(&self, level: LogLevel, file: &str, line: u32, message: &str) {
        self.log(level, &format!("{}:{}: {}", file, line, message));
    }
}

// Process-wide current logger, installed/cleared explicitly
static CURRENT_LOGGER: Lazy<RwLock<Option<Arc<dyn Logger>>>> = Lazy::new(|| RwLock::new(None));

/// Install the process-wide logger used by components not given an explicit one.
pub fn install_logger(logger: Arc<dyn Logger>) {
    let mut slot = CURRENT_LOGGER.write().unwrap_or_else(|p| p.into_inner());
    *slot = Some(logger);
}

/// Remove the process-wide logger; subsequent fallback logging is dropped.
pub fn clear_logger() {
    let mut slot = CURRENT_LOGGER.write().unwrap_or_else(|p| p.into_inner());
    *slot = None;
}

fn current_logger() -> Option<Arc<dyn Logger>> {
    CURRENT_LOGGER
        .read()
        .unwrap_or_else(|p| p.into_inner())
        .clone()
}

/// Per-component logger reference: an explicit logger when one was given at
/// construction, otherwise whatever process-wide logger is installed at the
/// time of the call.
#[derive(Clone, Default)]
pub struct LogHandle {
    explicit: Option<Arc<dyn Logger>>,
}

impl LogHandle {
    pub fn new(logger: Arc<dyn Logger>) -> Self {
        LogHandle {
            explicit: Some(logger),
        }
    }

    /// Handle that always resolves against the process-wide logger.
    pub fn global() -> Self {
        LogHandle::default()
    }

    pub fn from_option(logger: Option<Arc<dyn Logger>>) -> Self {
        LogHandle { explicit: logger }
    }

    pub fn log(&self, level: LogLevel, message: &str) {
        if let Some(ref logger) = self.explicit {
            logger.log(level, message);
        } else if let Some(logger) = current_logger() {
            logger.log(level, message);
        }
    }

    pub fn log_tagged(&self, level: LogLevel, file: &str, line: u32, message: &str) {
        if let Some(ref logger) = self.explicit {
            logger.log_tagged(level, file, line, message);
        } else if let Some(logger) = current_logger() {
            logger.log_tagged(level, file, line, message);
        }
    }

    pub fn debug(&self, message: &str) {
        self.log(LogLevel::Debug, message);
    }

    pub fn info(&self, message: &str) {
        self.log(LogLevel::Info, message);
    }

    pub fn warn(&self, message: &str) {
        self.log(LogLevel::Warn, message);
    }

    pub fn error(&self, message: &str) {
        self.log(LogLevel::Error, message);
    }

    pub fn critical(&self, message: &str) {
        self.log(LogLevel::Critical, message);
    }

    pub fn fatal(&self, message: &str) {
        self.log(LogLevel::Fatal, message);
    }
}

#[macro_export]
macro_rules! log_debug {
    ($handle:expr, $($arg:tt)*) => {
        $handle.log_tagged($crate::log::LogLevel::Debug, file!(), line!(), &format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_info {
    ($handle:expr, $($arg:tt)*) => {
        $handle.log_tagged($crate::log::LogLevel::Info, file!(), line!(), &format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_warn {
    ($handle:expr, $($arg:tt)*) => {
        $handle.log_tagged($crate::log::LogLevel::Warn, file!(), line!(), &format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_error {
    ($handle:expr, $($arg:tt)*) => {
        $handle.log_tagged($crate::log::LogLevel::Error, file!(), line!(), &format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_critical {
    ($handle:expr, $($arg:tt)*) => {
        $handle.log_tagged($crate::log::LogLevel::Critical, file!(), line!(), &format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_fatal {
    ($handle:expr, $($arg:tt)*) => {
        $handle.log_tagged($crate::log::LogLevel::Fatal, file!(), line!(), &format!($($arg)*))
    };
}

/// Timestamped stderr logger with a minimum-level filter.
pub struct ConsoleLogger {
    min_level: LogLevel,
}

impl ConsoleLogger {
    pub fn new(min_level: LogLevel) -> Self {
        ConsoleLogger { min_level }
    }
}

impl Default for ConsoleLogger {
    fn default() -> Self {
        ConsoleLogger::new(LogLevel::Info)
    }
}

impl Logger for ConsoleLogger {
    fn log(&self, level: LogLevel, message: &str) {
        if level < self.min_level {
            return;
        }
        let now = chrono::Local::now();
        eprintln!("{} [{}] {}", now.format("%Y/%m/%d %H:%M:%S%.3f"), level, message);
    }
}

/// Captures entries in memory so tests can assert on what was logged.
#[derive(Default)]
pub struct MemoryLogger {
    entries: Mutex<Vec<(LogLevel, String)>>,
}

impl MemoryLogger {
    pub fn new() -> Self {
        MemoryLogger::default()
    }

    pub fn entries(&self) -> Vec<(LogLevel, String)> {
        self.entries
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    pub fn contains(&self, level: LogLevel, needle: &str) -> bool {
        self.entries()
            .iter()
            .any(|(l, m)| *l == level && m.contains(needle))
    }
}

impl Logger for MemoryLogger {
    fn log(&self, level: LogLevel, message: &str) {
        self.entries
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push((level, message.to_string()));
    }
}

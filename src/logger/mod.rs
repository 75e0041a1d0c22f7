//! Named loggers with a process-wide level and an optional user handler.
//!
//! Every module that reports swallowed failures owns a `Logger` named after
//! it (for example `@whysoserious/jokes`). Records at or above the effective
//! level go to the default console handler; a user handler installed with
//! [`set_user_log_handler`] additionally receives every record at or above its
//! own threshold.

use chrono::{SecondsFormat, Utc};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, LazyLock, PoisonError, RwLock};

static GLOBAL_LOG_LEVEL: AtomicU8 = AtomicU8::new(LogLevel::Info as u8);
static USER_HANDLER: LazyLock<RwLock<Option<UserHandler>>> = LazyLock::new(|| RwLock::new(None));

const NO_OVERRIDE: u8 = u8::MAX;

type LogCallback = Arc<dyn Fn(LogRecord) + Send + Sync + 'static>;

#[derive(Clone)]
struct UserHandler {
    callback: LogCallback,
    level: Option<LogLevel>,
}

#[derive(Clone)]
pub struct Logger {
    inner: Arc<LoggerInner>,
}

struct LoggerInner {
    name: String,
    level_override: AtomicU8,
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("name", &self.inner.name)
            .field("level", &self.log_level())
            .finish()
    }
}

impl Logger {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(LoggerInner {
                name: name.into(),
                level_override: AtomicU8::new(NO_OVERRIDE),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// The logger's own level if one was set, otherwise the global level.
    pub fn log_level(&self) -> LogLevel {
        match self.inner.level_override.load(Ordering::SeqCst) {
            NO_OVERRIDE => LogLevel::from_u8(GLOBAL_LOG_LEVEL.load(Ordering::SeqCst)),
            level => LogLevel::from_u8(level),
        }
    }

    pub fn set_log_level(&self, level: LogLevel) {
        self.inner
            .level_override
            .store(level as u8, Ordering::SeqCst);
    }

    pub fn debug(&self, message: impl fmt::Display) {
        self.dispatch(LogLevel::Debug, message.to_string());
    }

    pub fn log(&self, message: impl fmt::Display) {
        self.dispatch(LogLevel::Verbose, message.to_string());
    }

    pub fn info(&self, message: impl fmt::Display) {
        self.dispatch(LogLevel::Info, message.to_string());
    }

    pub fn warn(&self, message: impl fmt::Display) {
        self.dispatch(LogLevel::Warn, message.to_string());
    }

    pub fn error(&self, message: impl fmt::Display) {
        self.dispatch(LogLevel::Error, message.to_string());
    }

    fn dispatch(&self, level: LogLevel, message: String) {
        let handler = USER_HANDLER
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(handler) = handler {
            let threshold = handler.level.unwrap_or_else(|| self.log_level());
            if level >= threshold && level != LogLevel::Silent {
                (handler.callback)(LogRecord {
                    level,
                    message: message.clone(),
                    logger_name: self.name().to_owned(),
                });
            }
        }
        default_log_handler(self, level, &message);
    }
}

fn default_log_handler(logger: &Logger, level: LogLevel, message: &str) {
    if level < logger.log_level() || level == LogLevel::Silent {
        return;
    }

    let now = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
    let header = format!("[{}]  {}:", now, logger.name());

    match level {
        LogLevel::Warn | LogLevel::Error => eprintln!("{header} {message}"),
        _ => println!("{header} {message}"),
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum LogLevel {
    Debug = 0,
    Verbose = 1,
    Info = 2,
    Warn = 3,
    Error = 4,
    Silent = 5,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Verbose => "verbose",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
            LogLevel::Silent => "silent",
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => LogLevel::Debug,
            1 => LogLevel::Verbose,
            2 => LogLevel::Info,
            3 => LogLevel::Warn,
            4 => LogLevel::Error,
            _ => LogLevel::Silent,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = LogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "debug" => Ok(LogLevel::Debug),
            "verbose" => Ok(LogLevel::Verbose),
            "info" => Ok(LogLevel::Info),
            "warn" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            "silent" => Ok(LogLevel::Silent),
            _ => Err(LogError::InvalidLogLevel(s.to_owned())),
        }
    }
}

/// A single emitted record as seen by a user handler.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogRecord {
    pub level: LogLevel,
    pub message: String,
    pub logger_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogError {
    InvalidLogLevel(String),
}

impl fmt::Display for LogError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogError::InvalidLogLevel(level) => write!(f, "Invalid log level \"{level}\""),
        }
    }
}

impl std::error::Error for LogError {}

/// Sets the level used by every logger without its own override.
pub fn set_log_level(level: LogLevel) {
    GLOBAL_LOG_LEVEL.store(level as u8, Ordering::SeqCst);
}

/// Installs (or with `None`, removes) the process-wide user handler. With no
/// explicit `level` the handler follows each logger's effective level.
pub fn set_user_log_handler<F>(callback: Option<F>, level: Option<LogLevel>)
where
    F: Fn(LogRecord) + Send + Sync + 'static,
{
    let handler = callback.map(|callback| UserHandler {
        callback: Arc::new(callback),
        level,
    });
    *USER_HANDLER.write().unwrap_or_else(PoisonError::into_inner) = handler;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static TEST_GUARD: LazyLock<Mutex<()>> = LazyLock::new(|| Mutex::new(()));

    fn reset_logging() {
        set_log_level(LogLevel::Info);
        set_user_log_handler(None::<fn(LogRecord)>, None);
    }

    fn capture(name: &'static str) -> Arc<Mutex<Vec<LogRecord>>> {
        let records = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&records);
        set_user_log_handler(
            Some(move |record: LogRecord| {
                if record.logger_name == name {
                    sink.lock().unwrap().push(record);
                }
            }),
            None,
        );
        records
    }

    #[test]
    fn handler_follows_global_level() {
        let _guard = TEST_GUARD.lock().unwrap();
        reset_logging();
        let logger = Logger::new("@whysoserious/logger-global");
        let records = capture("@whysoserious/logger-global");

        set_log_level("warn".parse().unwrap());
        logger.debug("debug message");
        logger.info("info message");
        logger.warn("warn message");
        logger.error("error message");

        let levels: Vec<_> = records.lock().unwrap().iter().map(|r| r.level).collect();
        assert_eq!(levels, [LogLevel::Warn, LogLevel::Error]);
        reset_logging();
    }

    #[test]
    fn logger_override_beats_global_level() {
        let _guard = TEST_GUARD.lock().unwrap();
        reset_logging();
        let logger = Logger::new("@whysoserious/logger-override");
        logger.set_log_level(LogLevel::Debug);
        let records = capture("@whysoserious/logger-override");

        logger.debug("debug message");

        let stored = records.lock().unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].message, "debug message");
        assert_eq!(stored[0].level.as_str(), "debug");
        reset_logging();
    }

    #[test]
    fn handler_with_explicit_level() {
        let _guard = TEST_GUARD.lock().unwrap();
        reset_logging();
        let logger = Logger::new("@whysoserious/logger-explicit");
        let records = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&records);
        set_user_log_handler(
            Some(move |record: LogRecord| {
                if record.logger_name == "@whysoserious/logger-explicit" {
                    sink.lock().unwrap().push(record.level);
                }
            }),
            Some(LogLevel::Error),
        );

        logger.warn("warn message");
        logger.error("error message");

        assert_eq!(records.lock().unwrap().as_slice(), &[LogLevel::Error]);
        reset_logging();
    }

    #[test]
    fn unknown_level_is_rejected() {
        let err = "loud".parse::<LogLevel>().unwrap_err();
        assert_eq!(err, LogError::InvalidLogLevel("loud".into()));
    }
}

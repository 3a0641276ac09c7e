//! A minimal, zero-dependency logging crate for the `Objectively` runtime.
//!
//! Messages carry the module path they were emitted from and are written to a
//! process-wide [`Sink`]: standard error by default, or an in-memory buffer
//! when a test wants to assert on what the runtime reported.
//!
//! # Configuration
//!
//! The threshold defaults to [`Level::Warn`]. It can be changed
//! programmatically with [`set_level`] / [`set_level_from_str`], or read from
//! the `OBJECTIVELY_LOG` environment variable with [`init_from_env`]
//! (`off`, `error`, `warn`, `info`, `debug` or `trace`).
//!
//! # Example
//!
//! ```
//! use objectively_log::{debug, info, Level};
//!
//! objectively_log::set_level(Level::Debug);
//!
//! info!("realized {} classes", 3);
//! debug!("interface block at {:p}", &0u8);
//! ```

use std::fmt::{self, Arguments};
use std::io::Write;
use std::str::FromStr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Mutex, OnceLock, PoisonError};

/// Environment variable consulted by [`init_from_env`].
pub const ENV_VAR: &str = "OBJECTIVELY_LOG";

/// Severity of a log message.
///
/// Ordered from most severe (`Error`) to least severe (`Trace`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Level {
    /// Contract violations about to take the process down.
    Error = 0,
    /// Suspicious but survivable situations.
    Warn = 1,
    /// Lifecycle milestones (teardown and the like).
    Info = 2,
    /// Class realization details.
    Debug = 3,
    /// Per-instance events (allocation, dealloc).
    Trace = 4,
}

impl Level {
    const ALL: [Level; 5] = [
        Level::Error,
        Level::Warn,
        Level::Info,
        Level::Debug,
        Level::Trace,
    ];

    const fn color_code(self) -> &'static str {
        match self {
            Level::Error => "\x1b[31m",
            Level::Warn => "\x1b[33m",
            Level::Info => "\x1b[32m",
            Level::Debug => "\x1b[36m",
            Level::Trace => "\x1b[35m",
        }
    }

    /// Returns the upper-case name of this level.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Level::Error => "ERROR",
            Level::Warn => "WARN",
            Level::Info => "INFO",
            Level::Debug => "DEBUG",
            Level::Trace => "TRACE",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a level name cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseLevelError {
    input: String,
}

impl fmt::Display for ParseLevelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid log level: {}", self.input)
    }
}

impl std::error::Error for ParseLevelError {}

impl FromStr for Level {
    type Err = ParseLevelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Level::ALL
            .into_iter()
            .find(|level| level.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ParseLevelError {
                input: s.to_owned(),
            })
    }
}

/// Threshold filter: `None` disables logging entirely.
///
/// Parses the same names as [`Level`] plus `off`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Filter(Option<Level>);

impl Filter {
    /// Filter that lets nothing through.
    pub const OFF: Filter = Filter(None);

    /// Filter letting through `level` and everything more severe.
    #[must_use]
    pub const fn up_to(level: Level) -> Self {
        Filter(Some(level))
    }

    /// Most verbose level let through, if any.
    #[must_use]
    pub const fn max_level(self) -> Option<Level> {
        self.0
    }

    // Number of levels enabled: 0 = off, 1 = errors only, ..
    const fn encode(self) -> u8 {
        match self.0 {
            None => 0,
            Some(level) => level as u8 + 1,
        }
    }

    const fn decode(raw: u8) -> Self {
        match raw {
            0 => Filter(None),
            1 => Filter(Some(Level::Error)),
            2 => Filter(Some(Level::Warn)),
            3 => Filter(Some(Level::Info)),
            4 => Filter(Some(Level::Debug)),
            _ => Filter(Some(Level::Trace)),
        }
    }
}

impl FromStr for Filter {
    type Err = ParseLevelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case("off") {
            return Ok(Filter::OFF);
        }
        s.parse::<Level>().map(Filter::up_to)
    }
}

/// Destination of formatted log records.
#[derive(Debug, Default)]
pub enum Sink {
    /// Colored output on standard error.
    #[default]
    Stderr,
    /// Plain records appended to an in-memory buffer, one per line.
    Capture(Vec<String>),
}

/// The global logger.
///
/// The threshold lives in an atomic so the level check on the hot path never
/// takes a lock; only emitting a record locks the sink.
pub struct Logger {
    filter: AtomicU8,
    sink: Mutex<Sink>,
}

impl Logger {
    const fn new(filter: Filter) -> Self {
        Logger {
            filter: AtomicU8::new(filter.encode()),
            sink: Mutex::new(Sink::Stderr),
        }
    }

    /// Replaces the threshold filter.
    pub fn set_filter(&self, filter: Filter) {
        self.filter.store(filter.encode(), Ordering::Relaxed);
    }

    /// Returns the current threshold filter.
    pub fn filter(&self) -> Filter {
        Filter::decode(self.filter.load(Ordering::Relaxed))
    }

    /// Checks whether a record at `level` would be emitted.
    pub fn enabled(&self, level: Level) -> bool {
        (level as u8) < self.filter.load(Ordering::Relaxed)
    }

    /// Swaps the sink, returning the previous one.
    pub fn set_sink(&self, sink: Sink) -> Sink {
        let mut guard = self.sink.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *guard, sink)
    }

    fn write(&self, level: Level, target: &str, args: Arguments<'_>) {
        static RESET: &str = "\x1b[0m";

        let mut guard = self.sink.lock().unwrap_or_else(PoisonError::into_inner);
        match &mut *guard {
            Sink::Stderr => {
                let color = level.color_code();
                // A closed stderr is not worth dying over.
                let _ = writeln!(
                    std::io::stderr().lock(),
                    "{color}[{level}]{RESET} {target}: {args}"
                );
            }
            Sink::Capture(lines) => lines.push(format!("[{level}] {target}: {args}")),
        }
    }
}

static LOGGER: OnceLock<Logger> = OnceLock::new();

/// Returns the global logger, creating it with the `Warn` threshold.
pub fn get_logger() -> &'static Logger {
    LOGGER.get_or_init(|| Logger::new(Filter::up_to(Level::Warn)))
}

/// Sets the threshold to `level`.
pub fn set_level(level: Level) {
    get_logger().set_filter(Filter::up_to(level));
}

/// Sets the threshold from a name such as `"debug"` or `"off"`.
///
/// # Errors
///
/// Returns [`ParseLevelError`] if the name is not recognized; the threshold
/// is left untouched.
pub fn set_level_from_str(s: &str) -> Result<(), ParseLevelError> {
    get_logger().set_filter(s.parse()?);
    Ok(())
}

/// Applies `OBJECTIVELY_LOG` if it is set.
///
/// Returns the filter now in effect. An unparsable value is reported once at
/// `Warn` and otherwise ignored.
pub fn init_from_env() -> Filter {
    if let Ok(value) = std::env::var(ENV_VAR) {
        if let Err(err) = set_level_from_str(&value) {
            crate::warn!("ignoring {ENV_VAR}: {err}");
        }
    }
    get_logger().filter()
}

/// Starts capturing records in memory instead of writing them to stderr.
pub fn capture() {
    get_logger().set_sink(Sink::Capture(Vec::new()));
}

/// Drains captured records; empty when not capturing.
pub fn take_captured() -> Vec<String> {
    let mut guard = get_logger()
        .sink
        .lock()
        .unwrap_or_else(PoisonError::into_inner);
    match &mut *guard {
        Sink::Capture(lines) => std::mem::take(lines),
        Sink::Stderr => Vec::new(),
    }
}

#[doc(hidden)]
pub fn __log_with_target(level: Level, target: &str, args: Arguments<'_>) {
    let logger = get_logger();
    if logger.enabled(level) {
        logger.write(level, target, args);
    }
}

/// Logs at an explicit level, tagging the record with `module_path!()`.
///
/// ```
/// use objectively_log::{log, Level};
///
/// log!(level: Level::Info, "answer = {}", 42);
/// ```
#[macro_export]
macro_rules! log {
    (level: $level:expr, $($arg:tt)*) => {
        {
            let __level = $level;
            if $crate::get_logger().enabled(__level) {
                $crate::__log_with_target(
                    __level,
                    module_path!(),
                    format_args!($($arg)*)
                );
            }
        }
    };
}

/// Logs at [`Level::Error`].
#[macro_export]
macro_rules! error {
    ($($arg:tt)*) => {
        $crate::log!(level: $crate::Level::Error, $($arg)*)
    };
}

/// Logs at [`Level::Warn`].
#[macro_export]
macro_rules! warn {
    ($($arg:tt)*) => {
        $crate::log!(level: $crate::Level::Warn, $($arg)*)
    };
}

/// Logs at [`Level::Info`].
#[macro_export]
macro_rules! info {
    ($($arg:tt)*) => {
        $crate::log!(level: $crate::Level::Info, $($arg)*)
    };
}

/// Logs at [`Level::Debug`].
#[macro_export]
macro_rules! debug {
    ($($arg:tt)*) => {
        $crate::log!(level: $crate::Level::Debug, $($arg)*)
    };
}

/// Logs at [`Level::Trace`].
#[macro_export]
macro_rules! trace {
    ($($arg:tt)*) => {
        $crate::log!(level: $crate::Level::Trace, $($arg)*)
    };
}

/// Structured logging for the trigger service.
///
/// Context-rich logging tagged with the originating subsystem and basin.
/// Supports console output and an optional log file for daemon operation.
/// Persistent upstream failure is an alerting concern, not control flow —
/// the helpers here classify failures so the operator channel can separate
/// expected outages from service degradation.

use chrono::Utc;
use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::sync::Mutex;

use crate::model::FetchError;

// ---------------------------------------------------------------------------
// Log levels
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Debug => write!(f, "DEBUG"),
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Warning => write!(f, "WARN"),
            LogLevel::Error => write!(f, "ERROR"),
        }
    }
}

// ---------------------------------------------------------------------------
// Subsystem tags
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogSource {
    Dhm,
    Glofas,
    Gfh,
    Evaluator,
    Dispatch,
    Chain,
    Database,
    System,
}

impl fmt::Display for LogSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogSource::Dhm => write!(f, "DHM"),
            LogSource::Glofas => write!(f, "GLOFAS"),
            LogSource::Gfh => write!(f, "GFH"),
            LogSource::Evaluator => write!(f, "EVAL"),
            LogSource::Dispatch => write!(f, "DISPATCH"),
            LogSource::Chain => write!(f, "CHAIN"),
            LogSource::Database => write!(f, "DB"),
            LogSource::System => write!(f, "SYS"),
        }
    }
}

// ---------------------------------------------------------------------------
// Failure classification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureType {
    /// Expected failure - the upstream routinely has gaps (no forecast
    /// published, station offline for maintenance).
    Expected,
    /// Unexpected failure - indicates service degradation or a contract
    /// change upstream.
    Unexpected,
    /// Unknown - cannot determine from the error alone.
    Unknown,
}

impl fmt::Display for FailureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureType::Expected => write!(f, "EXPECTED"),
            FailureType::Unexpected => write!(f, "UNEXPECTED"),
            FailureType::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

/// Classifies a fetch failure for the operator channel.
///
/// Timeouts are ambiguous (transient congestion vs. a dead endpoint) and
/// stay `Unknown`; a response in the wrong shape means the upstream contract
/// moved and is always `Unexpected`.
pub fn classify_fetch_failure(err: &FetchError) -> FailureType {
    match err {
        FetchError::Timeout => FailureType::Unknown,
        FetchError::Unreachable(_) => FailureType::Unexpected,
        FetchError::UnexpectedFormat(_) => FailureType::Unexpected,
    }
}

// ---------------------------------------------------------------------------
// Logger
// ---------------------------------------------------------------------------

/// Global logger instance
static LOGGER: Mutex<Option<Logger>> = Mutex::new(None);

pub struct Logger {
    /// Minimum log level to emit
    min_level: LogLevel,
    /// Optional file path for daemon logging
    log_file: Option<String>,
}

impl Logger {
    /// Initialize the global logger
    pub fn init(min_level: LogLevel, log_file: Option<String>) {
        let logger = Logger { min_level, log_file };
        if let Ok(mut slot) = LOGGER.lock() {
            *slot = Some(logger);
        }
    }

    fn log(&self, level: LogLevel, source: LogSource, basin: Option<&str>, message: &str) {
        if level < self.min_level {
            return;
        }

        let timestamp = Utc::now().format("%Y-%m-%d %H:%M:%S UTC");
        let basin_part = basin.map(|b| format!(" [{}]", b)).unwrap_or_default();
        let entry = format!("{} {} {}{}: {}", timestamp, level, source, basin_part, message);

        match level {
            LogLevel::Error | LogLevel::Warning => eprintln!("{}", entry),
            LogLevel::Info | LogLevel::Debug => println!("{}", entry),
        }

        if let Some(ref path) = self.log_file {
            if let Err(e) = Self::append_to_file(path, &entry) {
                eprintln!("Failed to write to log file {}: {}", path, e);
            }
        }
    }

    fn append_to_file(path: &str, entry: &str) -> std::io::Result<()> {
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(file, "{}", entry)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Public logging functions
// ---------------------------------------------------------------------------

/// Initialize the global logger
pub fn init_logger(min_level: LogLevel, log_file: Option<&str>) {
    Logger::init(min_level, log_file.map(String::from));
}

fn with_logger(level: LogLevel, source: LogSource, basin: Option<&str>, message: &str) {
    if let Ok(guard) = LOGGER.lock() {
        if let Some(logger) = guard.as_ref() {
            logger.log(level, source, basin, message);
        }
    }
}

/// Log a general informational message
pub fn info(source: LogSource, basin: Option<&str>, message: &str) {
    with_logger(LogLevel::Info, source, basin, message);
}

/// Log a warning message
pub fn warn(source: LogSource, basin: Option<&str>, message: &str) {
    with_logger(LogLevel::Warning, source, basin, message);
}

/// Log an error message
pub fn error(source: LogSource, basin: Option<&str>, message: &str) {
    with_logger(LogLevel::Error, source, basin, message);
}

/// Log a debug message
pub fn debug(source: LogSource, basin: Option<&str>, message: &str) {
    with_logger(LogLevel::Debug, source, basin, message);
}

// ---------------------------------------------------------------------------
// Structured failure logging
// ---------------------------------------------------------------------------

/// Log an upstream fetch failure with automatic classification.
pub fn log_fetch_failure(source: LogSource, basin: &str, operation: &str, err: &FetchError) {
    let failure_type = classify_fetch_failure(err);
    let message = format!("{} failed [{}]: {}", operation, failure_type, err);

    match failure_type {
        FailureType::Expected => debug(source, Some(basin), &message),
        FailureType::Unexpected => error(source, Some(basin), &message),
        FailureType::Unknown => warn(source, Some(basin), &message),
    }
}

/// Log a summary of one evaluation cycle for a basin.
pub fn log_cycle_summary(basin: &str, readings: usize, fired: usize, errors: usize) {
    let message = format!(
        "Cycle complete: {} readings, {} fired, {} evaluation errors",
        readings, fired, errors
    );

    if errors == 0 {
        info(LogSource::Evaluator, Some(basin), &message);
    } else {
        warn(LogSource::Evaluator, Some(basin), &message);
    }
}

/// Log a summary of one reconciliation pass.
pub fn log_reconcile_summary(batches: usize, confirmed: usize, failed_batches: usize) {
    let message = format!(
        "Reconcile pass: {} batches, {} triggers confirmed, {} batches left for retry",
        batches, confirmed, failed_batches
    );

    if failed_batches == 0 {
        info(LogSource::Chain, None, &message);
    } else {
        warn(LogSource::Chain, None, &message);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

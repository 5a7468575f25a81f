/// Structured logging for the air quality reporting service
///
/// Provides context-rich logging with data source tags, location
/// identifiers, timestamps, and severity levels. Supports both console
/// output and file-based logging for scheduled hourly runs.
///
/// Every function is a no-op until `init_logger` has been called, so the
/// computational modules can log data-quality events without requiring a
/// logger in unit tests.

use chrono::Local;
use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::sync::Mutex;

// ---------------------------------------------------------------------------
// Log Levels
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

impl LogLevel {
    /// Parses `debug`, `info`, `warn`/`warning`, `error`.
    pub fn parse(s: &str) -> Option<LogLevel> {
        match s.trim().to_ascii_lowercase().as_str() {
            "debug" => Some(LogLevel::Debug),
            "info" => Some(LogLevel::Info),
            "warn" | "warning" => Some(LogLevel::Warning),
            "error" => Some(LogLevel::Error),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Data Source Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataSource {
    /// National monitoring center publish service.
    Cnemc,
    /// Commercial weather/air quality API.
    Moji,
    /// PostgreSQL reading archive.
    Archive,
    /// Alignment, aggregation and index computation.
    Core,
    /// Renderers and push channels.
    Push,
    System,
}

impl fmt::Display for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataSource::Cnemc => write!(f, "CNEMC"),
            DataSource::Moji => write!(f, "MOJI"),
            DataSource::Archive => write!(f, "ARCHIVE"),
            DataSource::Core => write!(f, "CORE"),
            DataSource::Push => write!(f, "PUSH"),
            DataSource::System => write!(f, "SYS"),
        }
    }
}

// ---------------------------------------------------------------------------
// Failure Classification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureType {
    /// Expected failure - station offline or not covered by this source
    Expected,
    /// Unexpected failure - indicates service degradation or an API change
    Unexpected,
    /// Unknown - cannot determine if this is expected or not
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

// ---------------------------------------------------------------------------
// Logger Configuration
// ---------------------------------------------------------------------------

/// Global logger instance
static LOGGER: Mutex<Option<Logger>> = Mutex::new(None);

pub struct Logger {
    /// Minimum log level to display
    min_level: LogLevel,
    /// Optional file path for logging
    log_file: Option<String>,
    /// Whether to include timestamps in console output
    console_timestamps: bool,
}

impl Logger {
    /// Initialize the global logger
    pub fn init(min_level: LogLevel, log_file: Option<String>, console_timestamps: bool) {
        let logger = Logger {
            min_level,
            log_file,
            console_timestamps,
        };

        if let Ok(mut slot) = LOGGER.lock() {
            *slot = Some(logger);
        }
    }

    fn log(&self, level: LogLevel, source: DataSource, location: Option<&str>, message: &str) {
        if level < self.min_level {
            return;
        }

        let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S");
        let location_part = location.map(|s| format!(" [{}]", s)).unwrap_or_default();
        let log_entry = format!(
            "{} {} {}{}: {}",
            timestamp, level, source, location_part, message
        );

        if self.console_timestamps {
            match level {
                LogLevel::Error | LogLevel::Warning => eprintln!("{}", log_entry),
                LogLevel::Info | LogLevel::Debug => println!("{}", log_entry),
            }
        } else {
            match level {
                LogLevel::Error => eprintln!("   ✗ {}{}: {}", source, location_part, message),
                LogLevel::Warning => eprintln!("   ⚠ {}{}: {}", source, location_part, message),
                LogLevel::Info => println!("   {}", message),
                LogLevel::Debug => println!("   [DEBUG] {}", message),
            }
        }

        if let Some(ref path) = self.log_file {
            if let Err(e) = Self::append_to_file(path, &log_entry) {
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
// Public Logging Functions
// ---------------------------------------------------------------------------

/// Initialize the global logger
pub fn init_logger(min_level: LogLevel, log_file: Option<&str>, console_timestamps: bool) {
    Logger::init(min_level, log_file.map(String::from), console_timestamps);
}

fn emit(level: LogLevel, source: DataSource, location: Option<&str>, message: &str) {
    if let Ok(guard) = LOGGER.lock() {
        if let Some(logger) = guard.as_ref() {
            logger.log(level, source, location, message);
        }
    }
}

pub fn info(source: DataSource, location: Option<&str>, message: &str) {
    emit(LogLevel::Info, source, location, message);
}

pub fn warn(source: DataSource, location: Option<&str>, message: &str) {
    emit(LogLevel::Warning, source, location, message);
}

pub fn error(source: DataSource, location: Option<&str>, message: &str) {
    emit(LogLevel::Error, source, location, message);
}

pub fn debug(source: DataSource, location: Option<&str>, message: &str) {
    emit(LogLevel::Debug, source, location, message);
}

// ---------------------------------------------------------------------------
// Failure Classification Helpers
// ---------------------------------------------------------------------------

/// Classify a source adapter failure from its rendered error message.
pub fn classify_source_failure(error_message: &str) -> FailureType {
    if error_message.starts_with("Unknown location") {
        // The adapter simply does not cover this location
        FailureType::Expected
    } else if error_message.contains("HTTP error") || error_message.contains("Request failed") {
        FailureType::Unexpected
    } else if error_message.contains("Parse error") {
        // Upstream payload shape changed
        FailureType::Unexpected
    } else {
        FailureType::Unknown
    }
}

/// Log a data source failure with automatic classification
pub fn log_source_failure(
    source: DataSource,
    location: &str,
    operation: &str,
    err: &dyn std::error::Error,
) {
    let error_msg = err.to_string();
    let failure_type = classify_source_failure(&error_msg);

    let message = format!("{} failed [{}]: {}", operation, failure_type, error_msg);

    match failure_type {
        FailureType::Expected => debug(source, Some(location), &message),
        FailureType::Unexpected => error(source, Some(location), &message),
        FailureType::Unknown => warn(source, Some(location), &message),
    }
}

/// Log a self-corrected data-quality event (e.g. an inconsistent PM10 value
/// that was discarded).
pub fn log_data_quality(location: &str, message: &str) {
    warn(DataSource::Core, Some(location), &format!("data quality: {}", message));
}

// ---------------------------------------------------------------------------
// Fetch Summary Logging
// ---------------------------------------------------------------------------

/// Log a summary of one fetch pass over all configured locations
pub fn log_fetch_summary(source: DataSource, total: usize, successful: usize, failed: usize) {
    let message = format!(
        "Fetch complete: {}/{} successful, {} failed",
        successful, total, failed
    );

    if failed == 0 {
        info(source, None, &message);
    } else if successful == 0 {
        error(source, None, &message);
    } else {
        warn(source, None, &message);
    }
}

/// Structured logging for the reach tracing service
///
/// Provides context-rich logging with reach identifiers, service tags,
/// timestamps, and severity levels. Supports both console output and
/// file-based logging for batch runs.

use crate::model::ReachError;
use chrono::Utc;
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

// ---------------------------------------------------------------------------
// Service tags
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Service {
    /// EPA WATERS point indexing and navigation
    Waters,
    /// Elevation-derived hydrology geoprocessing
    Hydrology,
    /// Remote geometry service (project, densify, simplify)
    Geometry,
    /// American Whitewater reach descriptions
    Whitewater,
    Store,
    Trace,
    System,
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Service::Waters => write!(f, "WATERS"),
            Service::Hydrology => write!(f, "HYDRO"),
            Service::Geometry => write!(f, "GEOM"),
            Service::Whitewater => write!(f, "AW"),
            Service::Store => write!(f, "STORE"),
            Service::Trace => write!(f, "TRACE"),
            Service::System => write!(f, "SYS"),
        }
    }
}

// ---------------------------------------------------------------------------
// Failure kinds
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureType {
    /// Coverage gap, no flowlines near the point, or a cancelled run
    Expected,
    /// Service degraded, changed its contract, or is misconfigured
    Unexpected,
    /// Not enough information to tell
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
// Logger
// ---------------------------------------------------------------------------

/// Empty until `init_logger`; entries logged before then are dropped.
static LOGGER: Mutex<Option<Logger>> = Mutex::new(None);

pub struct Logger {
    /// Entries below this level are dropped
    min_level: LogLevel,
    /// Append-only log file
    log_file: Option<String>,
    /// Prefix console lines with a UTC timestamp
    console_timestamps: bool,
}

impl Logger {
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

    fn format_entry(level: LogLevel, service: Service, reach_id: Option<&str>, message: &str) -> String {
        let timestamp = Utc::now().format("%Y-%m-%d %H:%M:%S UTC");
        let reach_part = reach_id.map(|id| format!(" [reach {}]", id)).unwrap_or_default();
        format!("{} {} {}{}: {}", timestamp, level, service, reach_part, message)
    }

    fn log(&self, level: LogLevel, service: Service, reach_id: Option<&str>, message: &str) {
        if level < self.min_level {
            return;
        }

        let log_entry = Self::format_entry(level, service, reach_id, message);
        let reach_part = reach_id.map(|id| format!(" [reach {}]", id)).unwrap_or_default();

        if self.console_timestamps {
            match level {
                LogLevel::Error | LogLevel::Warning => eprintln!("{}", log_entry),
                LogLevel::Info | LogLevel::Debug => println!("{}", log_entry),
            }
        } else {
            match level {
                LogLevel::Error => eprintln!("   ✗ {}{}: {}", service, reach_part, message),
                LogLevel::Warning => eprintln!("   ⚠ {}{}: {}", service, reach_part, message),
                LogLevel::Info => println!("   {}{}: {}", service, reach_part, message),
                LogLevel::Debug => println!("   [DEBUG] {}{}: {}", service, reach_part, message),
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
// Entry points
// ---------------------------------------------------------------------------

/// Installs the process-wide logger. Later calls replace it.
pub fn init_logger(min_level: LogLevel, log_file: Option<&str>, console_timestamps: bool) {
    Logger::init(min_level, log_file.map(String::from), console_timestamps);
}

fn dispatch(level: LogLevel, service: Service, reach_id: Option<&str>, message: &str) {
    if let Ok(guard) = LOGGER.lock() {
        if let Some(logger) = guard.as_ref() {
            logger.log(level, service, reach_id, message);
        }
    }
}

pub fn info(service: Service, reach_id: Option<&str>, message: &str) {
    dispatch(LogLevel::Info, service, reach_id, message);
}

pub fn warn(service: Service, reach_id: Option<&str>, message: &str) {
    dispatch(LogLevel::Warning, service, reach_id, message);
}

pub fn error(service: Service, reach_id: Option<&str>, message: &str) {
    dispatch(LogLevel::Error, service, reach_id, message);
}

pub fn debug(service: Service, reach_id: Option<&str>, message: &str) {
    dispatch(LogLevel::Debug, service, reach_id, message);
}

// ---------------------------------------------------------------------------
// Service failures
// ---------------------------------------------------------------------------

/// Classify a service failure by error kind.
///
/// Coverage gaps are routine (the primary network stops at the border), while
/// transport and decoding failures point at a degraded or changed service.
pub fn classify_failure(err: &ReachError) -> FailureType {
    match err {
        ReachError::PutinUnresolved(_)
        | ReachError::TakeoutUnresolved(_)
        | ReachError::NoFlowlinesFound
        | ReachError::UndefinedReference(_)
        | ReachError::Cancelled => FailureType::Expected,
        ReachError::Http(_)
        | ReachError::Json(_)
        | ReachError::Parse(_)
        | ReachError::Config(_)
        | ReachError::Store(_)
        | ReachError::InvalidParameter { .. } => FailureType::Unexpected,
        _ => FailureType::Unknown,
    }
}

/// Log a service failure with automatic classification
pub fn log_failure(service: Service, reach_id: Option<&str>, operation: &str, err: &ReachError) {
    let failure_type = classify_failure(err);
    let message = format!("{} failed [{}]: {}", operation, failure_type, err);

    match failure_type {
        FailureType::Expected => debug(service, reach_id, &message),
        FailureType::Unexpected => error(service, reach_id, &message),
        FailureType::Unknown => warn(service, reach_id, &message),
    }
}

// ---------------------------------------------------------------------------
// Batch Summary Logging
// ---------------------------------------------------------------------------

/// Log a summary of a batch trace run
pub fn log_batch_summary(total: usize, traced: usize, failed: usize) {
    let message = format!(
        "Batch complete: {}/{} traced, {} failed",
        traced, total, failed
    );

    if failed == 0 {
        info(Service::Trace, None, &message);
    } else if traced == 0 {
        error(Service::Trace, None, &message);
    } else {
        warn(Service::Trace, None, &message);
    }
}

//! Unified error handling framework for the shade runtime
//!
//! Every crate in the workspace reports failures through [`ShadeError`].
//! The nested source enums keep the taxonomy flat enough to match on while
//! still grouping errors by the layer that raised them.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Unified error type for all shade components
#[derive(Error, Debug, Clone, Serialize, Deserialize)]
pub enum ShadeError {
    #[error("Configuration error: {message}")]
    Configuration {
        source: ConfigError,
        message: String,
    },

    #[error("Instrumentation error: {message}")]
    Instrumentation {
        source: InstrumentationError,
        message: String,
    },

    #[error("Dispatch error: {message}")]
    Dispatch {
        source: DispatchError,
        message: String,
    },

    #[error("Scheduler error: {message}")]
    Scheduler {
        source: SchedulerError,
        message: String,
    },

    #[error("Parcel error: {message}")]
    Parcel {
        source: ParcelError,
        message: String,
    },

    #[error("I/O error: {message}")]
    Io { message: String },

    #[error("{message}")]
    Generic { message: String },
}

/// Sandbox configuration errors
///
/// These are raised while a sandbox is being brought up, before any test body
/// runs.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigError {
    #[error("Invalid configuration value: {0} = {1}")]
    InvalidValue(String, String),

    #[error("Missing required configuration: {0}")]
    MissingRequired(String),

    #[error("Configuration parsing error: {0}")]
    ParseError(String),

    #[error("Configuration file not found: {0}")]
    FileNotFound(String),

    #[error("Unsupported SDK level {0} (supported {1}..={2})")]
    UnsupportedSdk(i32, i32, i32),

    #[error("Invalid API range: {0}..={1}")]
    InvalidApiRange(i32, i32),

    #[error("Duplicate shadow for {0}: {1} overlaps {2}")]
    DuplicateShadow(String, String, String),

    #[error("Unknown shadow: {0}")]
    UnknownShadow(String),

    #[error("Shadowed class {0} is missing at SDK {1}")]
    MissingShadowTarget(String, i32),
}

/// Class loading and instrumentation errors
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstrumentationError {
    #[error("Class not found: {0}")]
    ClassNotFound(String),

    #[error("Class {0} is not available at SDK {1}")]
    ClassNotAvailableAtSdk(String, i32),

    #[error("Circular class hierarchy through {0}")]
    CircularHierarchy(String),

    #[error("Overlapping definitions of {0}")]
    OverlappingDefinitions(String),

    #[error("Static initializer of {0} failed: {1}")]
    StaticInitializerFailed(String, String),
}

/// Method dispatch errors raised by the engine itself
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DispatchError {
    #[error("No such method: {0}.{1}")]
    NoSuchMethod(String, String),

    #[error("No such field: {0}.{1}")]
    NoSuchField(String, String),

    #[error("Shadow of {0} is not a {1}")]
    ShadowTypeMismatch(String, String),

    #[error("Method {0} requires a receiver")]
    MissingReceiver(String),

    #[error("Argument {1} of {0} has the wrong type")]
    ArgumentType(String, usize),

    #[error("Missing runtime service: {0}")]
    MissingService(String),

    #[error("Runtime for object {0} has been torn down")]
    RuntimeGone(u64),

    #[error("Cannot instantiate abstract class {0}")]
    AbstractInstantiation(String),
}

/// Scheduler and looper errors
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SchedulerError {
    #[error("Looper {0} has quit")]
    LooperQuit(String),

    #[error("Looper thread {0} could not be spawned: {1}")]
    ThreadSpawn(String, String),

    #[error("Looper thread {0} panicked")]
    ThreadPanicked(String),

    #[error("Looper {0} already exists")]
    DuplicateLooper(String),
}

/// Parcel codec errors
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParcelError {
    #[error("Parcel underflow: need {0} bytes at position {1}")]
    Underflow(usize, usize),

    #[error("Invalid UTF-8 string at position {0}")]
    InvalidUtf8(usize),

    #[error("Unknown value tag {0}")]
    UnknownTag(i32),

    #[error("Exception {0} cannot be written to a parcel")]
    Unparcelable(String),

    #[error("Negative length {0}")]
    NegativeLength(i32),
}

impl ShadeError {
    pub fn config(source: ConfigError) -> Self {
        let message = source.to_string();
        ShadeError::Configuration { source, message }
    }

    pub fn instrumentation(source: InstrumentationError) -> Self {
        let message = source.to_string();
        ShadeError::Instrumentation { source, message }
    }

    pub fn dispatch(source: DispatchError) -> Self {
        let message = source.to_string();
        ShadeError::Dispatch { source, message }
    }

    pub fn scheduler(source: SchedulerError) -> Self {
        let message = source.to_string();
        ShadeError::Scheduler { source, message }
    }

    pub fn parcel(source: ParcelError) -> Self {
        let message = source.to_string();
        ShadeError::Parcel { source, message }
    }

    pub fn generic(message: impl Into<String>) -> Self {
        ShadeError::Generic {
            message: message.into(),
        }
    }

    /// Configuration and instrumentation failures abort the whole sandbox;
    /// everything else is scoped to a single test.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            ShadeError::Configuration { .. } | ShadeError::Instrumentation { .. }
        )
    }
}

impl From<ConfigError> for ShadeError {
    fn from(source: ConfigError) -> Self {
        ShadeError::config(source)
    }
}

impl From<InstrumentationError> for ShadeError {
    fn from(source: InstrumentationError) -> Self {
        ShadeError::instrumentation(source)
    }
}

impl From<DispatchError> for ShadeError {
    fn from(source: DispatchError) -> Self {
        ShadeError::dispatch(source)
    }
}

impl From<SchedulerError> for ShadeError {
    fn from(source: SchedulerError) -> Self {
        ShadeError::scheduler(source)
    }
}

impl From<ParcelError> for ShadeError {
    fn from(source: ParcelError) -> Self {
        ShadeError::parcel(source)
    }
}

impl From<std::io::Error> for ShadeError {
    fn from(error: std::io::Error) -> Self {
        ShadeError::Io {
            message: error.to_string(),
        }
    }
}

/// Result type alias for convenience
pub type ShadeResult<T> = Result<T, ShadeError>;

/// Utility functions for error handling
pub mod utils {
    use super::*;

    /// 按严重程度选择日志级别记录错误
    pub fn log_error(operation: &str, error: &ShadeError) {
        let level = match error_severity(error) {
            ErrorSeverity::Critical | ErrorSeverity::Error => log::Level::Error,
            ErrorSeverity::Warning => log::Level::Warn,
            ErrorSeverity::Info => log::Level::Info,
        };
        log::log!(level, "{} failed: {}", operation, error);
    }

    /// Get error severity level
    pub fn error_severity(error: &ShadeError) -> ErrorSeverity {
        match error {
            ShadeError::Configuration { .. } | ShadeError::Instrumentation { .. } => {
                ErrorSeverity::Critical
            }
            ShadeError::Dispatch { .. } | ShadeError::Parcel { .. } => ErrorSeverity::Error,
            ShadeError::Scheduler {
                source: SchedulerError::LooperQuit(..),
                ..
            } => ErrorSeverity::Warning,
            ShadeError::Scheduler { .. } => ErrorSeverity::Error,
            ShadeError::Io { .. } => ErrorSeverity::Warning,
            ShadeError::Generic { .. } => ErrorSeverity::Info,
        }
    }
}

/// How badly an error affects the sandbox that raised it
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    /// Diagnostic only
    Info,
    /// The current operation failed; the sandbox is still usable
    Warning,
    /// The current test failed
    Error,
    /// The sandbox cannot be built or reused
    Critical,
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ErrorSeverity::Info => "info",
            ErrorSeverity::Warning => "warning",
            ErrorSeverity::Error => "error",
            ErrorSeverity::Critical => "critical",
        };
        f.write_str(label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_is_fatal() {
        let error = ShadeError::from(ConfigError::DuplicateShadow(
            "android.os.Build".to_string(),
            "ShadowBuild".to_string(),
            "OtherShadowBuild".to_string(),
        ));

        assert!(error.is_configuration_error());
        assert_eq!(utils::error_severity(&error), ErrorSeverity::Critical);
        assert!(error.to_string().contains("android.os.Build"));
    }

    #[test]
    fn test_dispatch_error_is_not_fatal() {
        let error = ShadeError::from(DispatchError::NoSuchMethod(
            "android.os.Binder".to_string(),
            "frobnicate".to_string(),
        ));

        assert!(!error.is_configuration_error());
        assert_eq!(utils::error_severity(&error), ErrorSeverity::Error);
    }

    #[test]
    fn test_severity_ordering() {
        assert!(ErrorSeverity::Critical > ErrorSeverity::Error);
        assert!(ErrorSeverity::Warning > ErrorSeverity::Info);
        assert_eq!(ErrorSeverity::Critical.to_string(), "critical");
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "shade.toml");
        let error: ShadeError = io.into();
        assert!(matches!(error, ShadeError::Io { .. }));
    }

    #[test]
    fn test_error_serializes() {
        let error = ShadeError::from(SchedulerError::LooperQuit("bg".to_string()));
        let debug = format!("{:?}", error);
        assert!(debug.contains("LooperQuit"));
        assert_eq!(utils::error_severity(&error), ErrorSeverity::Warning);
    }
}

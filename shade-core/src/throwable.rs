//! Framework exceptions
//!
//! A [`Throwable`] is what framework code throws: a class name, a message
//! and an optional cause. It travels through dispatch inside
//! [`InvokeError::Thrown`] without being wrapped or rewritten, so callers see
//! exactly what the shadow or original body raised.

use serde::{Deserialize, Serialize};
use shade_error::{DispatchError, ShadeError};
use std::fmt;
use thiserror::Error;

use crate::value::Value;

/// Well-known exception class names
pub mod classes {
    pub const RUNTIME: &str = "java.lang.RuntimeException";
    pub const SECURITY: &str = "java.lang.SecurityException";
    pub const ILLEGAL_ARGUMENT: &str = "java.lang.IllegalArgumentException";
    pub const ILLEGAL_STATE: &str = "java.lang.IllegalStateException";
    pub const NULL_POINTER: &str = "java.lang.NullPointerException";
    pub const UNSUPPORTED_OPERATION: &str = "java.lang.UnsupportedOperationException";
    pub const ABSTRACT_METHOD: &str = "java.lang.AbstractMethodError";
    pub const UNSATISFIED_LINK: &str = "java.lang.UnsatisfiedLinkError";
    pub const BAD_PARCELABLE: &str = "android.os.BadParcelableException";
    pub const NETWORK_ON_MAIN_THREAD: &str = "android.os.NetworkOnMainThreadException";
    pub const SERVICE_SPECIFIC: &str = "android.os.ServiceSpecificException";
}

/// An exception raised by framework code
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Throwable {
    pub class_name: String,
    pub message: Option<String>,
    pub cause: Option<Box<Throwable>>,
}

impl Throwable {
    pub fn new(class_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            message: Some(message.into()),
            cause: None,
        }
    }

    /// An exception with no message
    pub fn bare(class_name: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            message: None,
            cause: None,
        }
    }

    pub fn with_cause(mut self, cause: Throwable) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        Self::new(classes::RUNTIME, message)
    }

    pub fn security(message: impl Into<String>) -> Self {
        Self::new(classes::SECURITY, message)
    }

    pub fn illegal_argument(message: impl Into<String>) -> Self {
        Self::new(classes::ILLEGAL_ARGUMENT, message)
    }

    pub fn illegal_state(message: impl Into<String>) -> Self {
        Self::new(classes::ILLEGAL_STATE, message)
    }

    pub fn null_pointer(message: impl Into<String>) -> Self {
        Self::new(classes::NULL_POINTER, message)
    }

    pub fn unsupported_operation(message: impl Into<String>) -> Self {
        Self::new(classes::UNSUPPORTED_OPERATION, message)
    }

    pub fn abstract_method(message: impl Into<String>) -> Self {
        Self::new(classes::ABSTRACT_METHOD, message)
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn is(&self, class_name: &str) -> bool {
        self.class_name == class_name
    }
}

impl fmt::Display for Throwable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(message) => write!(f, "{}: {}", self.class_name, message),
            None => write!(f, "{}", self.class_name),
        }
    }
}

impl std::error::Error for Throwable {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_deref()
            .map(|cause| cause as &(dyn std::error::Error + 'static))
    }
}

/// Failure of a dispatched call
#[derive(Error, Debug, Clone)]
pub enum InvokeError {
    /// Framework exception, passed through untouched
    #[error("{0}")]
    Thrown(#[from] Throwable),

    /// The engine could not perform the call
    #[error(transparent)]
    Shade(#[from] ShadeError),
}

impl InvokeError {
    pub fn thrown(&self) -> Option<&Throwable> {
        match self {
            InvokeError::Thrown(t) => Some(t),
            InvokeError::Shade(_) => None,
        }
    }

    pub fn into_thrown(self) -> Result<Throwable, ShadeError> {
        match self {
            InvokeError::Thrown(t) => Ok(t),
            InvokeError::Shade(e) => Err(e),
        }
    }
}

impl From<DispatchError> for InvokeError {
    fn from(error: DispatchError) -> Self {
        InvokeError::Shade(ShadeError::from(error))
    }
}

impl From<shade_error::ParcelError> for InvokeError {
    fn from(error: shade_error::ParcelError) -> Self {
        InvokeError::Shade(ShadeError::from(error))
    }
}

/// Outcome of a method body
pub type CallResult = Result<Value, InvokeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let t = Throwable::security("Halt! Who goes there?");
        assert_eq!(t.to_string(), "java.lang.SecurityException: Halt! Who goes there?");
        assert_eq!(Throwable::bare(classes::RUNTIME).to_string(), classes::RUNTIME);
    }

    #[test]
    fn test_invoke_error_keeps_throwable() {
        let err: InvokeError = Throwable::illegal_argument("bad").into();
        let thrown = err.thrown().expect("thrown");
        assert!(thrown.is(classes::ILLEGAL_ARGUMENT));
        assert_eq!(thrown.message(), Some("bad"));
    }

    #[test]
    fn test_cause_chain() {
        let t = Throwable::runtime("outer").with_cause(Throwable::illegal_state("inner"));
        let source = std::error::Error::source(&t).expect("cause");
        assert_eq!(source.to_string(), "java.lang.IllegalStateException: inner");
    }

    #[test]
    fn test_engine_error_is_not_thrown() {
        let err: InvokeError =
            DispatchError::NoSuchMethod("a.B".to_string(), "c".to_string()).into();
        assert!(err.thrown().is_none());
        assert!(err.into_thrown().is_err());
    }
}

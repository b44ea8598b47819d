//! Object manager status codes
//!
//! Failures are always reported through [`ObResult`]; nothing in the
//! object manager retries an allocation or panics on a recoverable error.
//! Wait timeouts and interruptions are not failures and are reported
//! through [`super::WaitStatus`] instead.

use core::fmt;

/// Object manager result type
pub type ObResult<T> = Result<T, ObError>;

/// Object manager errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObError {
    /// A pool allocation failed
    NoMemory,
    /// A bounded resource (wait block entries, handle slots) is exhausted
    InsufficientResources,
    /// The requested handle is beyond the table's capacity
    TooManyHandles,
    /// The object or name could not be found
    NotFound,
    /// A parameter violated the routine's preconditions
    InvalidParameter,
    /// The handle does not refer to an occupied entry
    InvalidHandle,
    /// The object already has a name
    TooLate,
}

impl ObError {
    /// Short, stable description
    pub const fn as_str(self) -> &'static str {
        match self {
            ObError::NoMemory => "out of memory",
            ObError::InsufficientResources => "insufficient resources",
            ObError::TooManyHandles => "too many handles",
            ObError::NotFound => "not found",
            ObError::InvalidParameter => "invalid parameter",
            ObError::InvalidHandle => "invalid handle",
            ObError::TooLate => "too late",
        }
    }
}

impl fmt::Display for ObError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

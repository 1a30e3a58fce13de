//! Uniform outcome values
//!
//! A [`Status`] is what a node records when the stream retires it and what a
//! stream reports as its aggregate result. It can be built from any
//! [`Result`](crate::Result), so immediate and scheduled calls report
//! failures the same way.

use crate::error::{Error, Result};
use std::fmt;

/// Outcome code of an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCode {
    /// Side effect completed
    Ok,
    /// File could not be read or written
    FileError,
    /// Invalid argument
    InvalidParameter,
    /// Argument not supported by the function
    IncompatibleParameter,
    /// Configuration error
    ConfigurationError,
    /// Register or transfer transport failed
    RegisterIoError,
    /// Operation not implemented by the backend
    NotImplemented,
    /// Missing member
    MemberAbsent,
    /// Resource busy
    ResourceBusy,
    /// Operation could not run
    ExecutionFailed,
    /// Register address misaligned
    RegisterNotAligned,
}

/// Failure category used by retry policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Caller error, detected before any hardware access
    Usage,
    /// Backend transport failure
    Transport,
    /// Shared resource could not be acquired; safe to retry
    Contention,
}

impl StatusCode {
    /// Category of this code, `None` for [`StatusCode::Ok`]
    pub const fn category(self) -> Option<ErrorCategory> {
        match self {
            Self::Ok => None,
            Self::FileError
            | Self::InvalidParameter
            | Self::IncompatibleParameter
            | Self::ConfigurationError
            | Self::NotImplemented
            | Self::MemberAbsent
            | Self::RegisterNotAligned => Some(ErrorCategory::Usage),
            Self::RegisterIoError | Self::ExecutionFailed => Some(ErrorCategory::Transport),
            Self::ResourceBusy => Some(ErrorCategory::Contention),
        }
    }

    /// Stable numeric value of the code
    pub const fn as_i32(self) -> i32 {
        match self {
            Self::Ok => 0,
            Self::FileError => 1,
            Self::InvalidParameter => 2,
            Self::IncompatibleParameter => 3,
            Self::ConfigurationError => 4,
            Self::RegisterIoError => 5,
            Self::NotImplemented => 6,
            Self::MemberAbsent => 7,
            Self::ResourceBusy => 8,
            Self::ExecutionFailed => 9,
            Self::RegisterNotAligned => 10,
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Ok => "OK",
            Self::FileError => "FILE_ERROR",
            Self::InvalidParameter => "INVALID_PARAMETER",
            Self::IncompatibleParameter => "INCOMPATIBLE_PARAMETER",
            Self::ConfigurationError => "CONFIGURATION_ERROR",
            Self::RegisterIoError => "REGISTER_IO_ERROR",
            Self::NotImplemented => "NOT_IMPLEMENTED",
            Self::MemberAbsent => "MEMBER_ABSENT",
            Self::ResourceBusy => "RESOURCE_BUSY",
            Self::ExecutionFailed => "EXECUTION_FAILED",
            Self::RegisterNotAligned => "REGISTER_NOT_ALIGNED",
        };
        f.write_str(name)
    }
}

/// Immutable outcome of an operation
///
/// `code` is [`StatusCode::Ok`] iff the side effect completed. `retval`
/// carries a numeric payload for successful operations that produce one
/// (bytes moved, value read) and is zero otherwise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    code: StatusCode,
    retval: i64,
    error: Option<Error>,
}

impl Status {
    /// Successful outcome without payload
    pub const fn ok() -> Self {
        Self {
            code: StatusCode::Ok,
            retval: 0,
            error: None,
        }
    }

    /// Successful outcome with a numeric payload
    pub const fn ok_with(retval: i64) -> Self {
        Self {
            code: StatusCode::Ok,
            retval,
            error: None,
        }
    }

    /// Failed outcome carrying the error that caused it
    pub fn failed(error: Error) -> Self {
        Self {
            code: error.code(),
            retval: 0,
            error: Some(error),
        }
    }

    pub fn code(&self) -> StatusCode {
        self.code
    }

    pub fn retval(&self) -> i64 {
        self.retval
    }

    pub fn error(&self) -> Option<&Error> {
        self.error.as_ref()
    }

    pub fn is_ok(&self) -> bool {
        self.code == StatusCode::Ok
    }

    /// Failure category, `None` on success
    pub fn category(&self) -> Option<ErrorCategory> {
        self.code.category()
    }

    /// Whether the failure is a contention failure that may be retried
    pub fn is_retryable(&self) -> bool {
        self.category() == Some(ErrorCategory::Contention)
    }

    /// Human-readable description
    pub fn message(&self) -> String {
        match &self.error {
            Some(err) => err.to_string(),
            None => "OK".to_string(),
        }
    }

    /// Convert back into a `Result`, yielding `retval` on success
    pub fn into_result(self) -> Result<i64> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.retval),
        }
    }
}

impl Default for Status {
    fn default() -> Self {
        Self::ok()
    }
}

impl From<Error> for Status {
    fn from(error: Error) -> Self {
        Self::failed(error)
    }
}

impl From<&Error> for Status {
    fn from(error: &Error) -> Self {
        Self::failed(error.clone())
    }
}

impl From<Result<()>> for Status {
    fn from(result: Result<()>) -> Self {
        match result {
            Ok(()) => Self::ok(),
            Err(err) => Self::failed(err),
        }
    }
}

impl From<Result<i64>> for Status {
    fn from(result: Result<i64>) -> Self {
        match result {
            Ok(retval) => Self::ok_with(retval),
            Err(err) => Self::failed(err),
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.error {
            Some(err) => write!(f, "{}: {}", self.code, err),
            None => write!(f, "{} (retval {})", self.code, self.retval),
        }
    }
}

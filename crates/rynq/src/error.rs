//! Error types for accelerator operations

use crate::graph::NodeId;
use crate::status::{ErrorCategory, StatusCode};

/// Result type for accelerator operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while driving an accelerator
///
/// Every variant maps onto exactly one [`StatusCode`], and every code onto
/// one [`ErrorCategory`], so callers can apply a uniform retry policy without
/// matching on individual variants.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// Register address is not a multiple of the backend register width
    #[error("register address {address:#x} is not aligned to {width}-byte registers")]
    RegisterNotAligned { address: u64, width: usize },

    /// Register access runs past the end of the mapped window
    #[error("register access out of bounds: address {address:#x} + size {size} > address space {space:#x}")]
    RegisterOutOfBounds { address: u64, size: usize, space: u64 },

    /// Transfer range exceeds the memory object's extent
    #[error("transfer out of bounds: offset {offset} + size {size} > memory size {memory_size}")]
    TransferOutOfBounds {
        offset: usize,
        size: usize,
        memory_size: usize,
    },

    /// Invalid argument
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// Parameters of the wrong backend variant
    #[error("incompatible parameter: {0}")]
    IncompatibleParameter(String),

    /// Configuration could not be parsed or applied
    #[error("configuration error: {0}")]
    Configuration(String),

    /// File could not be read
    #[error("file error: {0}")]
    File(String),

    /// Dependency id that does not exist in the graph
    #[error("unknown node: {0}")]
    UnknownNode(NodeId),

    /// Edge that would close a dependency cycle
    #[error("dependency {dependency} of node {node} would create a cycle")]
    CycleDetected { node: NodeId, dependency: NodeId },

    /// Memory object used after release
    #[error("memory has been released")]
    MemoryReleased,

    /// Required member is missing
    #[error("member absent: {0}")]
    MemberAbsent(String),

    /// Operation not supported by this backend
    #[error("not implemented: {0}")]
    NotImplemented(String),

    /// Backend transport reported a failure
    #[error("register I/O error: {0}")]
    RegisterIo(String),

    /// Operation could not run to completion
    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    /// Shared resource could not be acquired
    #[error("resource busy: {0}")]
    ResourceBusy(String),
}

impl Error {
    /// Create an invalid parameter error
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidParameter(msg.into())
    }

    /// Create a transport error
    pub fn io(msg: impl Into<String>) -> Self {
        Self::RegisterIo(msg.into())
    }

    /// Create a contention error
    pub fn busy(msg: impl Into<String>) -> Self {
        Self::ResourceBusy(msg.into())
    }

    /// Create an execution error
    pub fn execution(msg: impl Into<String>) -> Self {
        Self::ExecutionFailed(msg.into())
    }

    /// Create an unsupported operation error
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::NotImplemented(msg.into())
    }

    /// Status code this error reports as
    pub fn code(&self) -> StatusCode {
        match self {
            Self::RegisterNotAligned { .. } => StatusCode::RegisterNotAligned,
            Self::RegisterOutOfBounds { .. }
            | Self::TransferOutOfBounds { .. }
            | Self::InvalidParameter(_)
            | Self::UnknownNode(_)
            | Self::CycleDetected { .. } => StatusCode::InvalidParameter,
            Self::IncompatibleParameter(_) => StatusCode::IncompatibleParameter,
            Self::Configuration(_) => StatusCode::ConfigurationError,
            Self::File(_) => StatusCode::FileError,
            Self::MemoryReleased | Self::MemberAbsent(_) => StatusCode::MemberAbsent,
            Self::NotImplemented(_) => StatusCode::NotImplemented,
            Self::RegisterIo(_) => StatusCode::RegisterIoError,
            Self::ExecutionFailed(_) => StatusCode::ExecutionFailed,
            Self::ResourceBusy(_) => StatusCode::ResourceBusy,
        }
    }

    /// Failure category (usage, transport or contention)
    pub fn category(&self) -> ErrorCategory {
        // Every error code has a category; only `Ok` lacks one.
        self.code().category().unwrap_or(ErrorCategory::Usage)
    }

    /// Whether retrying the same call may succeed
    pub fn is_retryable(&self) -> bool {
        self.category() == ErrorCategory::Contention
    }
}

//! Unified error handling for memforge
//!
//! This module provides the crate-wide error type. Errors are categorized as:
//! - User errors (bad configuration, unsupported graphs)
//! - Resource errors (device memory too small for even one execution)
//! - Internal errors (bugs, inconsistent compile artifacts)
//! - Backend errors (device allocation/copy/query failures)
//! - Model errors (the compiled graph has no runnable state)

use std::fmt;

use crate::device::DeviceError;
use crate::memory::BufferId;

// Re-export thiserror for convenience
pub use thiserror;

/// Unified error type for memforge
///
/// Every compile stage (extractor, builders, budget calculator, pool) and the
/// execution driver return this type, so callers can tell a budget failure
/// apart from a graph-structure failure by matching on the variant.
#[derive(Debug, thiserror::Error)]
pub enum MemForgeError {
    // ========== Compile-time Errors ==========
    /// Transient memory model footprint is zero
    #[error("Model is not loaded properly: size of transient tensors for the model is 0")]
    ModelNotLoaded,

    /// Device memory left after the constant block cannot hold a single transient region
    #[error(
        "Not enough device memory even for a single execution: free={free} bytes, \
         constant block={constant_block} bytes, transient region={transient_block} bytes"
    )]
    InsufficientDeviceMemory {
        free: usize,
        constant_block: usize,
        transient_block: usize,
    },

    /// Operation has no registered mapping or no statically known output size
    #[error("Unsupported operation '{node}' of type '{op_type}': {reason}")]
    UnsupportedOperation {
        node: String,
        op_type: String,
        reason: String,
    },

    /// Graph is not a valid ordered operation sequence
    #[error("Invalid graph: {0}")]
    InvalidGraph(String),

    /// Builder misuse (duplicate buffer id, inverted lifespan, bad alignment)
    #[error("Invalid allocation: {0}")]
    InvalidAllocation(String),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    // ========== Execution-time Errors ==========
    /// Buffer id registered by neither the constant block nor the memory model
    #[error("Unknown buffer id: {0}")]
    UnknownBufferId(BufferId),

    /// A graph parameter was not bound for this request
    #[error("Missing input '{0}'")]
    MissingInput(String),

    /// A request bound a name that is not a graph parameter
    #[error("Unknown input '{0}'")]
    UnknownInput(String),

    /// An operation failed while running
    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    // ========== Backend Errors ==========
    /// Device layer failure
    #[error("Device error: {0}")]
    Device(#[from] DeviceError),

    // ========== Internal Errors ==========
    /// Internal error (indicates a bug)
    #[error("Internal error: {0}")]
    InternalError(String),

    /// Lock poisoned (a thread panicked while holding pool state)
    #[error("Internal lock poisoned: {0}")]
    LockPoisoned(String),
}

impl MemForgeError {
    /// Categorize the error for handling decisions
    ///
    /// # Examples
    /// ```ignore
    /// match error.category() {
    ///     ErrorCategory::User => println!("fix the graph or configuration"),
    ///     ErrorCategory::Resource => println!("retry with fewer streams or a bigger device"),
    ///     ErrorCategory::Internal => println!("report this bug"),
    ///     _ => {}
    /// }
    /// ```
    pub fn category(&self) -> ErrorCategory {
        match self {
            MemForgeError::UnsupportedOperation { .. }
            | MemForgeError::InvalidGraph(_)
            | MemForgeError::InvalidConfiguration(_)
            | MemForgeError::MissingInput(_)
            | MemForgeError::UnknownInput(_) => ErrorCategory::User,

            MemForgeError::InsufficientDeviceMemory { .. } => ErrorCategory::Resource,

            MemForgeError::ModelNotLoaded => ErrorCategory::Model,

            MemForgeError::Device(_) | MemForgeError::ExecutionFailed(_) => {
                ErrorCategory::Backend
            }

            MemForgeError::UnknownBufferId(_)
            | MemForgeError::InvalidAllocation(_)
            | MemForgeError::InternalError(_)
            | MemForgeError::LockPoisoned(_) => ErrorCategory::Internal,
        }
    }

    /// Check if the caller may retry, possibly with a different configuration
    ///
    /// Compile-time errors are never retried internally. A resource error can
    /// succeed on a retry with a lower requested stream count or after other
    /// device users free memory; transient device errors may clear up too.
    pub fn is_recoverable(&self) -> bool {
        match self {
            MemForgeError::Device(err) => err.is_recoverable(),
            _ => matches!(self.category(), ErrorCategory::Resource),
        }
    }

    /// Check if this is a user-facing error (actionable by users)
    pub fn is_user_error(&self) -> bool {
        matches!(self.category(), ErrorCategory::User)
    }

    /// Check if this is an internal error (indicates a bug)
    pub fn is_internal_error(&self) -> bool {
        matches!(self.category(), ErrorCategory::Internal)
    }
}

/// Error category for handling decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Invalid input graph or configuration
    User,
    /// Device resources are too small for the requested plan
    Resource,
    /// Indicates a bug
    Internal,
    /// Device failure
    Backend,
    /// The compiled model has no runnable state
    Model,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::User => write!(f, "User"),
            ErrorCategory::Resource => write!(f, "Resource"),
            ErrorCategory::Internal => write!(f, "Internal"),
            ErrorCategory::Backend => write!(f, "Backend"),
            ErrorCategory::Model => write!(f, "Model"),
        }
    }
}

impl<T> From<std::sync::PoisonError<T>> for MemForgeError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        MemForgeError::LockPoisoned(err.to_string())
    }
}

/// Result alias used across the crate
pub type ForgeResult<T> = std::result::Result<T, MemForgeError>;

/// Create an internal error with context
///
/// # Examples
/// ```ignore
/// return Err(internal_error!("buffer {} has no lifespan", id));
/// ```
#[macro_export]
macro_rules! internal_error {
    ($msg:expr) => {
        $crate::error::MemForgeError::InternalError($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::MemForgeError::InternalError(format!($fmt, $($arg)*))
    };
}

/// Create an invalid-graph error with context
#[macro_export]
macro_rules! graph_error {
    ($msg:expr) => {
        $crate::error::MemForgeError::InvalidGraph($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::MemForgeError::InvalidGraph(format!($fmt, $($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_categories() {
        assert_eq!(MemForgeError::ModelNotLoaded.category(), ErrorCategory::Model);
        assert_eq!(
            MemForgeError::InsufficientDeviceMemory {
                free: 100,
                constant_block: 100,
                transient_block: 10,
            }
            .category(),
            ErrorCategory::Resource
        );
        assert_eq!(
            MemForgeError::UnknownBufferId(BufferId(7)).category(),
            ErrorCategory::Internal
        );
        assert_eq!(
            MemForgeError::InvalidConfiguration("x".into()).category(),
            ErrorCategory::User
        );
        assert!(MemForgeError::UnknownInput("X".into()).is_user_error());
        assert_eq!(
            MemForgeError::Device(DeviceError::DeviceNotFound).category(),
            ErrorCategory::Backend
        );
    }

    #[test]
    fn test_insufficient_memory_is_recoverable() {
        let err = MemForgeError::InsufficientDeviceMemory {
            free: 100,
            constant_block: 100,
            transient_block: 10,
        };
        assert!(err.is_recoverable());
        assert!(!err.is_internal_error());
    }

    #[test]
    fn test_unknown_buffer_is_not_recoverable() {
        let err = MemForgeError::UnknownBufferId(BufferId(3));
        assert!(!err.is_recoverable());
        assert!(err.is_internal_error());
        assert_eq!(err.to_string(), "Unknown buffer id: #3");
    }

    #[test]
    fn test_poison_conversion() {
        let lock = std::sync::Mutex::new(0);
        let _ = std::panic::catch_unwind(|| {
            let _guard = lock.lock().unwrap();
            panic!("poison");
        });
        let err: MemForgeError = lock.lock().unwrap_err().into();
        assert!(matches!(err, MemForgeError::LockPoisoned(_)));
    }

    #[test]
    fn test_macros() {
        let err = internal_error!("slot {} missing", 4);
        assert_eq!(err.to_string(), "Internal error: slot 4 missing");
        let err = graph_error!("cycle");
        assert!(matches!(err, MemForgeError::InvalidGraph(_)));
    }

    #[test]
    fn test_category_display() {
        assert_eq!(ErrorCategory::Resource.to_string(), "Resource");
        assert_eq!(ErrorCategory::Backend.to_string(), "Backend");
    }
}

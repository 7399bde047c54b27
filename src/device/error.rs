//! Device error types

use thiserror::Error;

/// Device error types
#[derive(Error, Debug, Clone)]
pub enum DeviceError {
    #[error("Device initialization failed: {0}")]
    InitializationFailed(String),
    #[error("Memory allocation failed: {0}")]
    MemoryAllocationFailed(String),
    #[error("Memory copy failed: {0}")]
    MemoryCopyFailed(String),
    #[error("Memory query failed: {0}")]
    MemoryQueryFailed(String),
    #[error("Invalid device pointer: {0}")]
    InvalidPointer(String),
    #[error("Device not found")]
    DeviceNotFound,
    #[error("Device error: {0}")]
    DeviceFailure(String),
    #[error("Internal lock poisoned - this indicates a bug: {0}")]
    LockPoisoned(String),
}

impl<T> From<std::sync::PoisonError<T>> for DeviceError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        DeviceError::LockPoisoned(format!("Lock poisoned: {}", err))
    }
}

/// Device result type
pub type DeviceResult<T> = Result<T, DeviceError>;

impl DeviceError {
    /// Check if this error is recoverable (temporary condition)
    ///
    /// Allocation, copy and query failures may succeed once other device users
    /// release memory. Missing devices, broken initialization, invalid pointers
    /// and poisoned locks never recover.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            DeviceError::DeviceFailure(_)
                | DeviceError::MemoryAllocationFailed(_)
                | DeviceError::MemoryCopyFailed(_)
                | DeviceError::MemoryQueryFailed(_)
        )
    }

    /// Check if this error is permanent (should never retry)
    pub fn is_permanent(&self) -> bool {
        !self.is_recoverable()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_classification() {
        assert!(DeviceError::MemoryAllocationFailed("oom".into()).is_recoverable());
        assert!(DeviceError::MemoryQueryFailed("busy".into()).is_recoverable());
        assert!(DeviceError::DeviceNotFound.is_permanent());
        assert!(DeviceError::InvalidPointer("0x0".into()).is_permanent());
    }
}

//! Stream budget calculator
//!
//! Decides how many concurrent executions a compiled network gets before any
//! per-execution memory is allocated. This enables:
//! - Pre-flight memory checks (fail fast if even one execution does not fit)
//! - Honoring the device concurrency limit and the caller's request

use crate::config::StreamCount;
use crate::error::{ForgeResult, MemForgeError};

/// Calculate the number of concurrent executions
///
/// # Example
/// ```ignore
/// let calc = StreamBudgetCalculator::new(1000, 100, 150).with_device_max_streams(10);
/// assert_eq!(calc.optimal_streams(StreamCount::Auto)?, 6);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamBudgetCalculator {
    free_memory: usize,
    constant_block_size: usize,
    transient_block_size: usize,
    device_max_streams: usize,
}

impl StreamBudgetCalculator {
    /// Calculator for a device with `free_memory` bytes free
    ///
    /// The device concurrency limit defaults to 1 until set with
    /// [`StreamBudgetCalculator::with_device_max_streams`].
    pub fn new(free_memory: usize, constant_block_size: usize, transient_block_size: usize) -> Self {
        Self {
            free_memory,
            constant_block_size,
            transient_block_size,
            device_max_streams: 1,
        }
    }

    /// Set the device concurrency limit (0 is treated as 1)
    pub fn with_device_max_streams(mut self, streams: usize) -> Self {
        self.device_max_streams = streams.max(1);
        self
    }

    /// How many transient regions fit next to the constant block
    ///
    /// # Errors
    /// - `ModelNotLoaded` if the transient region is empty
    /// - `InsufficientDeviceMemory` if not even one region fits
    pub fn memory_bound(&self) -> ForgeResult<usize> {
        if self.transient_block_size == 0 {
            return Err(MemForgeError::ModelNotLoaded);
        }

        let bound = self.free_memory.saturating_sub(self.constant_block_size)
            / self.transient_block_size;
        if bound == 0 {
            return Err(MemForgeError::InsufficientDeviceMemory {
                free: self.free_memory,
                constant_block: self.constant_block_size,
                transient_block: self.transient_block_size,
            });
        }
        Ok(bound)
    }

    /// Number of streams to allocate for `requested`
    ///
    /// `Auto` takes as many as memory and the device allow; a fixed request is
    /// an upper bound. The result is always at least 1.
    pub fn optimal_streams(&self, requested: StreamCount) -> ForgeResult<usize> {
        let memory_bound = self.memory_bound()?;
        let streams = match requested {
            StreamCount::Auto => self.device_max_streams.min(memory_bound),
            StreamCount::Fixed(n) => self.device_max_streams.min(n.get()).min(memory_bound),
        };

        tracing::debug!(
            "Stream budget: free={} const={} transient={} device_max={} memory_bound={} requested={} -> {}",
            self.free_memory,
            self.constant_block_size,
            self.transient_block_size,
            self.device_max_streams,
            memory_bound,
            requested,
            streams
        );
        Ok(streams)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed(n: usize) -> StreamCount {
        StreamCount::fixed(n).unwrap()
    }

    #[test]
    fn test_auto_bounded_by_memory() {
        let calc = StreamBudgetCalculator::new(1000, 100, 150).with_device_max_streams(10);
        assert_eq!(calc.memory_bound().unwrap(), 6);
        assert_eq!(calc.optimal_streams(StreamCount::Auto).unwrap(), 6);
    }

    #[test]
    fn test_auto_bounded_by_device() {
        let calc = StreamBudgetCalculator::new(1_000_000, 0, 10).with_device_max_streams(4);
        assert_eq!(calc.optimal_streams(StreamCount::Auto).unwrap(), 4);
    }

    #[test]
    fn test_fixed_request_is_upper_bound() {
        let calc = StreamBudgetCalculator::new(1000, 100, 150).with_device_max_streams(10);
        assert_eq!(calc.optimal_streams(fixed(2)).unwrap(), 2);
        assert_eq!(calc.optimal_streams(fixed(8)).unwrap(), 6);

        let calc = StreamBudgetCalculator::new(1_000_000, 0, 10).with_device_max_streams(3);
        assert_eq!(calc.optimal_streams(fixed(8)).unwrap(), 3);
    }

    #[test]
    fn test_constant_block_consumes_all_memory() {
        let calc = StreamBudgetCalculator::new(100, 100, 10).with_device_max_streams(4);
        assert!(matches!(
            calc.optimal_streams(StreamCount::Auto),
            Err(MemForgeError::InsufficientDeviceMemory {
                free: 100,
                constant_block: 100,
                transient_block: 10,
            })
        ));
    }

    #[test]
    fn test_constant_block_larger_than_free_memory() {
        let calc = StreamBudgetCalculator::new(50, 100, 10);
        assert!(matches!(
            calc.memory_bound(),
            Err(MemForgeError::InsufficientDeviceMemory { .. })
        ));
    }

    #[test]
    fn test_empty_model_is_not_loaded() {
        let calc = StreamBudgetCalculator::new(1000, 10, 0).with_device_max_streams(4);
        assert!(matches!(
            calc.optimal_streams(StreamCount::Auto),
            Err(MemForgeError::ModelNotLoaded)
        ));
    }

    #[test]
    fn test_exactly_one_region_fits() {
        let calc = StreamBudgetCalculator::new(250, 100, 150).with_device_max_streams(8);
        assert_eq!(calc.optimal_streams(StreamCount::Auto).unwrap(), 1);
    }

    #[test]
    fn test_zero_device_concurrency_treated_as_one() {
        let calc = StreamBudgetCalculator::new(1000, 0, 10).with_device_max_streams(0);
        assert_eq!(calc.optimal_streams(StreamCount::Auto).unwrap(), 1);
        assert_eq!(calc.optimal_streams(fixed(5)).unwrap(), 1);
    }
}

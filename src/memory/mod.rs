//! Device memory planning
//!
//! Buffers of a compiled graph fall into two kinds:
//!
//! - **Constants** are written once at compile time into a single read-only
//!   device block ([`DeviceMemBlock`]) shared by every concurrent execution.
//! - **Transients** are produced and consumed inside one execution. Their
//!   offsets come from a [`MemoryModel`] in which buffers with disjoint
//!   lifespans share bytes, so each execution needs only one region of
//!   `MemoryModel::device_memory_block_size()` bytes.
//!
//! [`StreamBudgetCalculator`] decides how many of those regions fit on the
//! device, [`MemoryManagerPool`] allocates them once and leases them out as
//! [`MemoryManager`]s.

pub mod budget;
pub mod immutable_block;
pub mod manager;
pub mod model;
pub mod model_builder;
pub mod pool;

use std::fmt;

pub use budget::StreamBudgetCalculator;
pub use immutable_block::{DeviceMemBlock, ImmutableMemoryBlockBuilder};
pub use manager::MemoryManager;
pub use model::MemoryModel;
pub use model_builder::{MemoryModelBuilder, MemoryModelStats};
pub use pool::MemoryManagerPool;

/// Identifier of a buffer in a compiled graph
///
/// Ids are dense and assigned in order of first production.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(pub usize);

impl BufferId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for BufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Align offset up to alignment
///
/// Alignment must be a power of 2.
pub(crate) fn align_up(offset: usize, alignment: usize) -> usize {
    (offset + alignment - 1) & !(alignment - 1)
}

/// [`align_up`] that returns `None` instead of overflowing
pub(crate) fn checked_align_up(offset: usize, alignment: usize) -> Option<usize> {
    offset
        .checked_add(alignment - 1)
        .map(|padded| padded & !(alignment - 1))
}

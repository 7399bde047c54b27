//! Transient memory model builder
//!
//! Places transient buffers inside one per-execution region so that buffers
//! alive at the same time never share bytes, while buffers with disjoint
//! lifespans may.
//!
//! # Strategy
//!
//! - Visit buffers by ascending lifespan start (ties by id)
//! - Retire live ranges whose lifespan ended before the current start
//! - Place the buffer at the lowest (aligned) offset that fits between the
//!   remaining live ranges (first fit)
//! - Region size is the highest end offset reached
//!
//! Offsets depend only on the set of added buffers, never on insertion order.

use std::collections::{HashMap, HashSet};
use std::fmt;

use super::{align_up, checked_align_up, BufferId, MemoryModel};
use crate::error::{ForgeResult, MemForgeError};

/// Transient buffer waiting for placement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Allocation {
    id: BufferId,
    lifespan_start: usize,
    lifespan_end: usize,
    size: usize,
}

/// Placed buffer still alive at the current lifespan position
#[derive(Debug, Clone, Copy)]
struct LiveRange {
    offset: usize,
    size: usize,
    lifespan_end: usize,
}

/// Builder computing a [`MemoryModel`] from lifespan intervals
///
/// # Example
/// ```ignore
/// let mut builder = MemoryModelBuilder::new();
/// builder.add_allocation(BufferId(1), 0, 0, 20)?;
/// builder.add_allocation(BufferId(2), 0, 1, 20)?;
/// builder.add_allocation(BufferId(3), 1, 1, 10)?;
/// let model = builder.build();
/// assert_eq!(model.device_memory_block_size(), 40);
/// ```
#[derive(Debug, Clone)]
pub struct MemoryModelBuilder {
    allocations: Vec<Allocation>,
    ids: HashSet<BufferId>,
    alignment: usize,
    /// Sum of aligned sizes; every offset and end reached by `build` stays below it
    reserved: usize,
}

impl MemoryModelBuilder {
    /// Byte-granular builder
    pub fn new() -> Self {
        Self {
            allocations: Vec::new(),
            ids: HashSet::new(),
            alignment: 1,
            reserved: 0,
        }
    }

    /// Builder rounding every offset up to `alignment` (power of two)
    pub fn with_alignment(alignment: usize) -> ForgeResult<Self> {
        if !alignment.is_power_of_two() {
            return Err(MemForgeError::InvalidAllocation(format!(
                "Alignment must be power of 2, got {}",
                alignment
            )));
        }
        Ok(Self {
            alignment,
            ..Self::new()
        })
    }

    pub fn alignment(&self) -> usize {
        self.alignment
    }

    /// Register a transient buffer alive over `[lifespan_start, lifespan_end]`
    ///
    /// # Errors
    /// - If `id` was already added
    /// - If `lifespan_end < lifespan_start`
    /// - If the aligned sizes added so far no longer fit in `usize`
    pub fn add_allocation(
        &mut self,
        id: BufferId,
        lifespan_start: usize,
        lifespan_end: usize,
        size: usize,
    ) -> ForgeResult<()> {
        if lifespan_end < lifespan_start {
            return Err(MemForgeError::InvalidAllocation(format!(
                "buffer {} ends at {} before it starts at {}",
                id, lifespan_end, lifespan_start
            )));
        }
        if self.ids.contains(&id) {
            return Err(MemForgeError::InvalidAllocation(format!(
                "buffer {} was already added to the memory model",
                id
            )));
        }
        let reserved = checked_align_up(size, self.alignment)
            .and_then(|aligned| self.reserved.checked_add(aligned))
            .filter(|total| total.checked_add(self.alignment).is_some())
            .ok_or_else(|| {
                MemForgeError::InvalidAllocation(format!(
                    "buffer {} of {} bytes overflows the addressable region ({} bytes already added)",
                    id, size, self.reserved
                ))
            })?;

        self.ids.insert(id);
        self.reserved = reserved;
        self.allocations.push(Allocation {
            id,
            lifespan_start,
            lifespan_end,
            size,
        });
        tracing::trace!(
            "MemoryModelBuilder: {} lifespan=[{}, {}] size={}",
            id,
            lifespan_start,
            lifespan_end,
            size
        );
        Ok(())
    }

    /// Number of buffers added so far
    pub fn allocation_count(&self) -> usize {
        self.allocations.len()
    }

    /// Compute the offset table
    pub fn build(&self) -> MemoryModel {
        let mut order = self.allocations.clone();
        order.sort_by_key(|a| (a.lifespan_start, a.id));

        // Sorted by offset
        let mut live: Vec<LiveRange> = Vec::new();
        let mut offsets = HashMap::with_capacity(order.len());
        let mut total = 0usize;

        for alloc in &order {
            live.retain(|range| range.lifespan_end >= alloc.lifespan_start);

            let offset = self.first_fit(&live, alloc.size);
            let insert_at = live.partition_point(|range| range.offset <= offset);
            live.insert(
                insert_at,
                LiveRange {
                    offset,
                    size: alloc.size,
                    lifespan_end: alloc.lifespan_end,
                },
            );

            total = total.max(offset + alloc.size);
            offsets.insert(alloc.id, offset);
        }

        MemoryModel::new(total, offsets)
    }

    /// Compute the offset table together with reuse statistics
    pub fn build_with_stats(&self) -> (MemoryModel, MemoryModelStats) {
        let model = self.build();
        let stats = MemoryModelStats::new(
            self.allocations.len(),
            self.allocations.iter().map(|a| a.size).sum(),
            model.device_memory_block_size(),
        );
        (model, stats)
    }

    /// Lowest aligned offset where `size` bytes fit between `live` ranges
    ///
    /// Every end placed so far is at most the running sum of aligned sizes,
    /// which `add_allocation` keeps below `usize::MAX - alignment`.
    fn first_fit(&self, live: &[LiveRange], size: usize) -> usize {
        let mut candidate = 0usize;
        for range in live {
            if candidate + size <= range.offset {
                break;
            }
            candidate = candidate.max(align_up(range.offset + range.size, self.alignment));
        }
        candidate
    }
}

impl Default for MemoryModelBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Statistics about transient memory reuse
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MemoryModelStats {
    /// Number of transient buffers placed
    pub buffer_count: usize,
    /// Bytes needed without reuse (sum of buffer sizes)
    pub naive_bytes: usize,
    /// Bytes of the computed region
    pub model_bytes: usize,
    /// Fraction of naive bytes saved by reuse (0.0 when nothing was saved)
    pub reuse_ratio: f64,
}

impl MemoryModelStats {
    fn new(buffer_count: usize, naive_bytes: usize, model_bytes: usize) -> Self {
        let reuse_ratio = if naive_bytes > model_bytes {
            (naive_bytes - model_bytes) as f64 / naive_bytes as f64
        } else {
            0.0
        };
        Self {
            buffer_count,
            naive_bytes,
            model_bytes,
            reuse_ratio,
        }
    }
}

impl fmt::Display for MemoryModelStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "MemoryModelStats: {} buffers, naive={}KB, model={}KB ({}% saved)",
            self.buffer_count,
            self.naive_bytes / 1024,
            self.model_bytes / 1024,
            (self.reuse_ratio * 100.0) as u32
        )
    }
}

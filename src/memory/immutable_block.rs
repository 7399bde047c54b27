//! Constant block shared by every execution
//!
//! All constant buffers are packed back to back into a single device
//! allocation, uploaded once at compile time and never written again.

use std::collections::HashMap;

use super::{checked_align_up, BufferId, MemoryModel};
use crate::device::{DeviceBuffer, DevicePtr, SharedDevice};
use crate::error::{ForgeResult, MemForgeError};

/// Builder packing constant host data into one device block
///
/// Offsets are assigned by bump allocation in insertion order; there is no
/// reuse since constants live for the whole lifetime of the network.
#[derive(Debug)]
pub struct ImmutableMemoryBlockBuilder<'a> {
    alignment: usize,
    size: usize,
    offsets: HashMap<BufferId, usize>,
    allocations: Vec<(BufferId, &'a [u8])>,
}

impl<'a> ImmutableMemoryBlockBuilder<'a> {
    /// Byte-granular builder
    pub fn new() -> Self {
        Self {
            alignment: 1,
            size: 0,
            offsets: HashMap::new(),
            allocations: Vec::new(),
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

    /// Reserve space for `data` under `id`
    pub fn add_allocation(&mut self, id: BufferId, data: &'a [u8]) -> ForgeResult<()> {
        if self.offsets.contains_key(&id) {
            return Err(MemForgeError::InvalidAllocation(format!(
                "constant buffer {} was already added",
                id
            )));
        }

        let (offset, size) = checked_align_up(self.size, self.alignment)
            .and_then(|offset| Some((offset, offset.checked_add(data.len())?)))
            .ok_or_else(|| {
                MemForgeError::InvalidAllocation(format!(
                    "constant buffer {} of {} bytes overflows the block ({} bytes already added)",
                    id,
                    data.len(),
                    self.size
                ))
            })?;
        self.size = size;
        self.offsets.insert(id, offset);
        self.allocations.push((id, data));

        tracing::trace!(
            "ImmutableMemoryBlockBuilder: {} at offset {} ({} bytes)",
            id,
            offset,
            data.len()
        );
        Ok(())
    }

    /// Total bytes of the block
    pub fn device_memory_block_size(&self) -> usize {
        self.size
    }

    /// Allocate the block on `device` and upload every constant
    ///
    /// An empty builder produces a block without any device allocation.
    pub fn build(self, device: &SharedDevice) -> ForgeResult<DeviceMemBlock> {
        let model = MemoryModel::new(self.size, self.offsets);
        if self.size == 0 {
            tracing::debug!("Constant block is empty, skipping device allocation");
            return Ok(DeviceMemBlock {
                buffer: None,
                model,
            });
        }

        let buffer = DeviceBuffer::new(device, self.size)?;
        for (id, data) in &self.allocations {
            if data.is_empty() {
                continue;
            }
            let offset = model
                .offset_for_buffer(*id)
                .ok_or_else(|| crate::internal_error!("constant {} lost its offset", id))?;
            buffer.copy_from_host(offset, data)?;
        }

        tracing::info!(
            "Constant block uploaded: {} buffers, {} bytes at {}",
            model.len(),
            self.size,
            buffer.ptr()
        );

        Ok(DeviceMemBlock {
            buffer: Some(buffer),
            model,
        })
    }
}

impl Default for ImmutableMemoryBlockBuilder<'_> {
    fn default() -> Self {
        Self::new()
    }
}

/// Read-only device block holding every constant buffer
#[derive(Debug)]
pub struct DeviceMemBlock {
    buffer: Option<DeviceBuffer>,
    model: MemoryModel,
}

impl DeviceMemBlock {
    /// Block without any constants
    pub fn empty() -> Self {
        Self {
            buffer: None,
            model: MemoryModel::default(),
        }
    }

    /// Device address of constant `id`, `None` if the block does not hold it
    pub fn device_ptr(&self, id: BufferId) -> Option<DevicePtr> {
        let offset = self.model.offset_for_buffer(id)?;
        // Zero-byte constants in an otherwise empty block have no backing memory
        let base = self.buffer.as_ref().map_or(DevicePtr::NULL, DeviceBuffer::ptr);
        Some(base.offset(offset))
    }

    /// Offset table of the block
    pub fn memory_model(&self) -> &MemoryModel {
        &self.model
    }

    /// Total bytes of the block
    pub fn size(&self) -> usize {
        self.model.device_memory_block_size()
    }
}

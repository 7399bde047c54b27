//! Leased view of one execution's memory

use std::fmt;

use super::{BufferId, MemoryManagerPool};
use crate::device::{DeviceBuffer, DevicePtr};
use crate::error::{ForgeResult, MemForgeError};

/// One leased memory manager
///
/// Resolves buffer ids to device addresses: constants into the shared
/// constant block, transients into this lease's private region. The region
/// goes back to the pool when the manager is dropped.
pub struct MemoryManager<'p> {
    pool: &'p MemoryManagerPool,
    slot: usize,
}

impl<'p> MemoryManager<'p> {
    pub(super) fn new(pool: &'p MemoryManagerPool, slot: usize) -> Self {
        Self { pool, slot }
    }

    /// Index of the private region inside the pool
    pub fn slot(&self) -> usize {
        self.slot
    }

    /// Whether this lease was handed out by `pool`
    pub fn belongs_to(&self, pool: &MemoryManagerPool) -> bool {
        std::ptr::eq(self.pool, pool)
    }

    /// Private transient region of this lease
    pub fn region(&self) -> ForgeResult<&'p DeviceBuffer> {
        self.pool
            .region(self.slot)
            .ok_or_else(|| crate::internal_error!("pool has no region for slot {}", self.slot))
    }

    /// Base address of the private region
    pub fn region_ptr(&self) -> DevicePtr {
        self.pool
            .region(self.slot)
            .map_or(DevicePtr::NULL, DeviceBuffer::ptr)
    }

    /// Device address of buffer `id`
    ///
    /// # Errors
    /// `UnknownBufferId` if neither the constant block nor the memory model
    /// holds `id`.
    pub fn resolve(&self, id: BufferId) -> ForgeResult<DevicePtr> {
        if let Some(ptr) = self.pool.constant_block().device_ptr(id) {
            return Ok(ptr);
        }
        match self.pool.memory_model().offset_for_buffer(id) {
            Some(offset) => Ok(self.region()?.ptr().offset(offset)),
            None => Err(MemForgeError::UnknownBufferId(id)),
        }
    }

    /// Addresses of an operation's input buffers
    pub fn input_tensor_pointers(&self, ids: &[BufferId]) -> ForgeResult<Vec<DevicePtr>> {
        ids.iter().map(|&id| self.resolve(id)).collect()
    }

    /// Addresses of an operation's output buffers
    pub fn output_tensor_pointers(&self, ids: &[BufferId]) -> ForgeResult<Vec<DevicePtr>> {
        ids.iter().map(|&id| self.resolve(id)).collect()
    }
}

impl fmt::Debug for MemoryManager<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryManager")
            .field("slot", &self.slot)
            .field("region", &self.region_ptr())
            .finish()
    }
}

impl Drop for MemoryManager<'_> {
    fn drop(&mut self) {
        self.pool.return_slot(self.slot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{HostDevice, SharedDevice};
    use crate::memory::{ImmutableMemoryBlockBuilder, MemoryModelBuilder};
    use std::sync::Arc;

    fn scenario_pool(device: &SharedDevice) -> MemoryManagerPool {
        // A: constant (40 bytes); B [0,0] 20; C [0,1] 20; D [1,1] 10
        static CONSTANT: [u8; 40] = [3u8; 40];
        let mut constants = ImmutableMemoryBlockBuilder::new();
        constants.add_allocation(BufferId(0), &CONSTANT).unwrap();

        let mut transients = MemoryModelBuilder::new();
        transients.add_allocation(BufferId(1), 0, 0, 20).unwrap();
        transients.add_allocation(BufferId(2), 0, 1, 20).unwrap();
        transients.add_allocation(BufferId(3), 1, 1, 10).unwrap();

        MemoryManagerPool::new(
            2,
            constants.build(device).unwrap(),
            transients.build(),
            device,
        )
        .unwrap()
    }

    #[test]
    fn test_belongs_to_issuing_pool_only() {
        let device: SharedDevice = Arc::new(HostDevice::new(1 << 20));
        let first = scenario_pool(&device);
        let second = scenario_pool(&device);
        let manager = first.acquire().unwrap();
        assert!(manager.belongs_to(&first));
        assert!(!manager.belongs_to(&second));
    }

    #[test]
    fn test_resolve_constant_and_transients() {
        let device: SharedDevice = Arc::new(HostDevice::new(1 << 20));
        let pool = scenario_pool(&device);
        let manager = pool.acquire().unwrap();
        let base = manager.region_ptr();

        assert_eq!(manager.resolve(BufferId(1)).unwrap(), base);
        assert_eq!(manager.resolve(BufferId(2)).unwrap(), base.offset(20));
        assert_eq!(manager.resolve(BufferId(3)).unwrap(), base);
        assert_eq!(
            manager.resolve(BufferId(0)).unwrap(),
            pool.constant_block().device_ptr(BufferId(0)).unwrap()
        );
    }

    #[test]
    fn test_constants_shared_between_leases() {
        let device: SharedDevice = Arc::new(HostDevice::new(1 << 20));
        let pool = scenario_pool(&device);
        let a = pool.acquire().unwrap();
        let b = pool.acquire().unwrap();

        assert_eq!(a.resolve(BufferId(0)).unwrap(), b.resolve(BufferId(0)).unwrap());
        assert_ne!(a.resolve(BufferId(2)).unwrap(), b.resolve(BufferId(2)).unwrap());
    }

    #[test]
    fn test_unknown_buffer_id() {
        let device: SharedDevice = Arc::new(HostDevice::new(1 << 20));
        let pool = scenario_pool(&device);
        let manager = pool.acquire().unwrap();

        let err = manager.resolve(BufferId(9)).unwrap_err();
        assert!(matches!(err, MemForgeError::UnknownBufferId(BufferId(9))));
        assert!(manager
            .input_tensor_pointers(&[BufferId(1), BufferId(9)])
            .is_err());
    }

    #[test]
    fn test_tensor_pointer_slices() {
        let device: SharedDevice = Arc::new(HostDevice::new(1 << 20));
        let pool = scenario_pool(&device);
        let manager = pool.acquire().unwrap();
        let base = manager.region_ptr();

        let inputs = manager
            .input_tensor_pointers(&[BufferId(0), BufferId(2)])
            .unwrap();
        assert_eq!(inputs.len(), 2);
        assert_eq!(inputs[1], base.offset(20));

        let outputs = manager.output_tensor_pointers(&[BufferId(3)]).unwrap();
        assert_eq!(outputs, vec![base]);
        assert!(manager.output_tensor_pointers(&[]).unwrap().is_empty());
    }
}

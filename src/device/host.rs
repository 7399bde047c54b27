//! Host-memory simulated accelerator
//!
//! `HostDevice` behaves like a small GPU: it has a fixed memory capacity, a
//! concurrency limit, and its own address space. Allocations are backed by
//! host vectors so copies are real, but addresses are fake and never handed
//! out twice, which makes aliasing bugs visible in tests.
//!
//! # Usage
//!
//! ```rust,ignore
//! use memforge::device::{HostDevice, SharedDevice};
//! use std::sync::Arc;
//!
//! let device: SharedDevice = Arc::new(
//!     HostDevice::new(64 * 1024 * 1024).with_max_concurrent_streams(4),
//! );
//! ```

use std::collections::BTreeMap;
use std::sync::Mutex;

use super::{Device, DeviceError, DevicePtr, DeviceResult, MemoryInfo};

/// First address of the fake address space
const BASE_ADDRESS: u64 = 0x1000_0000;

/// Address alignment of every allocation
const ADDRESS_ALIGNMENT: u64 = 256;

/// Statistics tracked by the host device
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct HostDeviceStats {
    /// Number of allocate() calls that succeeded
    pub alloc_count: usize,
    /// Number of free() calls that succeeded
    pub free_count: usize,
    /// Bytes currently allocated
    pub live_bytes: usize,
    /// Highest value `live_bytes` reached
    pub peak_bytes: usize,
}

#[derive(Debug)]
struct HostDeviceState {
    allocations: BTreeMap<u64, Vec<u8>>,
    next_address: u64,
    stats: HostDeviceStats,
}

/// Simulated accelerator backed by host memory
#[derive(Debug)]
pub struct HostDevice {
    device_id: i32,
    name: String,
    total_memory: usize,
    reserved: usize,
    max_concurrent_streams: usize,
    state: Mutex<HostDeviceState>,
}

impl HostDevice {
    /// Default concurrency limit of the simulated device
    pub const DEFAULT_MAX_CONCURRENT_STREAMS: usize = 8;

    /// Create a device with `total_memory` bytes of capacity
    pub fn new(total_memory: usize) -> Self {
        Self {
            device_id: 0,
            name: "host-simulated".to_string(),
            total_memory,
            reserved: 0,
            max_concurrent_streams: Self::DEFAULT_MAX_CONCURRENT_STREAMS,
            state: Mutex::new(HostDeviceState {
                allocations: BTreeMap::new(),
                next_address: BASE_ADDRESS,
                stats: HostDeviceStats::default(),
            }),
        }
    }

    /// Set the device ordinal
    pub fn with_device_id(mut self, device_id: i32) -> Self {
        self.device_id = device_id;
        self
    }

    /// Set the device name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the concurrency limit
    pub fn with_max_concurrent_streams(mut self, streams: usize) -> Self {
        self.max_concurrent_streams = streams;
        self
    }

    /// Pretend `bytes` are already used by someone else
    pub fn with_reserved(mut self, bytes: usize) -> Self {
        self.reserved = bytes.min(self.total_memory);
        self
    }

    /// Snapshot of allocation statistics
    pub fn stats(&self) -> HostDeviceStats {
        match self.state.lock() {
            Ok(state) => state.stats,
            Err(poisoned) => poisoned.into_inner().stats,
        }
    }

    /// Number of live allocations
    pub fn live_allocations(&self) -> usize {
        match self.state.lock() {
            Ok(state) => state.allocations.len(),
            Err(poisoned) => poisoned.into_inner().allocations.len(),
        }
    }

    fn align_up(value: u64) -> u64 {
        (value + ADDRESS_ALIGNMENT - 1) & !(ADDRESS_ALIGNMENT - 1)
    }

    /// Locate the allocation holding `[ptr, ptr+len)` as (base, offset)
    fn locate(state: &HostDeviceState, ptr: DevicePtr, len: usize) -> DeviceResult<(u64, usize)> {
        let (base, storage) = state
            .allocations
            .range(..=ptr.0)
            .next_back()
            .ok_or_else(|| DeviceError::InvalidPointer(format!("{} is not allocated", ptr)))?;
        let offset = (ptr.0 - base) as usize;
        if offset + len > storage.len() {
            return Err(DeviceError::InvalidPointer(format!(
                "range {}+{} exceeds allocation at 0x{:x} of {} bytes",
                ptr,
                len,
                base,
                storage.len()
            )));
        }
        Ok((*base, offset))
    }
}

impl Device for HostDevice {
    fn device_id(&self) -> i32 {
        self.device_id
    }

    fn name(&self) -> String {
        self.name.clone()
    }

    fn memory_info(&self) -> DeviceResult<MemoryInfo> {
        let state = self.state.lock()?;
        Ok(MemoryInfo {
            free: self.total_memory - self.reserved - state.stats.live_bytes,
            total: self.total_memory,
        })
    }

    fn max_concurrent_streams(&self) -> usize {
        self.max_concurrent_streams
    }

    fn allocate(&self, size: usize) -> DeviceResult<DevicePtr> {
        let mut state = self.state.lock()?;
        let free = self.total_memory - self.reserved - state.stats.live_bytes;
        if size > free {
            return Err(DeviceError::MemoryAllocationFailed(format!(
                "out of device memory: requested {} bytes, {} free",
                size, free
            )));
        }

        let address = state.next_address;
        state.next_address = Self::align_up(address + size.max(1) as u64);
        state.allocations.insert(address, vec![0u8; size]);
        state.stats.alloc_count += 1;
        state.stats.live_bytes += size;
        state.stats.peak_bytes = state.stats.peak_bytes.max(state.stats.live_bytes);

        Ok(DevicePtr(address))
    }

    fn free(&self, ptr: DevicePtr) -> DeviceResult<()> {
        let mut state = self.state.lock()?;
        let storage = state
            .allocations
            .remove(&ptr.0)
            .ok_or_else(|| DeviceError::InvalidPointer(format!("free of unknown pointer {}", ptr)))?;
        state.stats.free_count += 1;
        state.stats.live_bytes -= storage.len();
        Ok(())
    }

    fn copy_from_host(&self, dst: DevicePtr, src: &[u8]) -> DeviceResult<()> {
        let mut state = self.state.lock()?;
        let (base, offset) = Self::locate(&state, dst, src.len())?;
        let storage = state
            .allocations
            .get_mut(&base)
            .ok_or_else(|| DeviceError::InvalidPointer(format!("{} vanished", dst)))?;
        storage[offset..offset + src.len()].copy_from_slice(src);
        Ok(())
    }

    fn copy_to_host(&self, dst: &mut [u8], src: DevicePtr) -> DeviceResult<()> {
        let state = self.state.lock()?;
        let (base, offset) = Self::locate(&state, src, dst.len())?;
        let storage = &state.allocations[&base];
        dst.copy_from_slice(&storage[offset..offset + dst.len()]);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_info_tracks_allocations() {
        let device = HostDevice::new(10_000).with_reserved(1_000);
        assert_eq!(
            device.memory_info().unwrap(),
            MemoryInfo {
                free: 9_000,
                total: 10_000
            }
        );

        let ptr = device.allocate(4_000).unwrap();
        assert_eq!(device.memory_info().unwrap().free, 5_000);

        device.free(ptr).unwrap();
        assert_eq!(device.memory_info().unwrap().free, 9_000);
    }

    #[test]
    fn test_allocation_beyond_capacity_fails() {
        let device = HostDevice::new(1_000);
        assert!(device.allocate(1_001).is_err());
        let _a = device.allocate(600).unwrap();
        assert!(matches!(
            device.allocate(600),
            Err(DeviceError::MemoryAllocationFailed(_))
        ));
    }

    #[test]
    fn test_addresses_are_aligned_and_disjoint() {
        let device = HostDevice::new(1 << 20);
        let a = device.allocate(10).unwrap();
        let b = device.allocate(300).unwrap();
        let c = device.allocate(1).unwrap();
        assert_eq!(a.0 % ADDRESS_ALIGNMENT, 0);
        assert_eq!(b.0 % ADDRESS_ALIGNMENT, 0);
        assert!(b.0 >= a.0 + 10);
        assert!(c.0 >= b.0 + 300);
    }

    #[test]
    fn test_addresses_not_reused_after_free() {
        let device = HostDevice::new(1 << 20);
        let a = device.allocate(64).unwrap();
        device.free(a).unwrap();
        let b = device.allocate(64).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_copy_inside_allocation() {
        let device = HostDevice::new(1 << 20);
        let ptr = device.allocate(32).unwrap();
        device.copy_from_host(ptr.offset(8), &[9, 8, 7]).unwrap();

        let mut out = [0u8; 4];
        device.copy_to_host(&mut out, ptr.offset(7)).unwrap();
        assert_eq!(out, [0, 9, 8, 7]);
    }

    #[test]
    fn test_copy_crossing_allocation_end_fails() {
        let device = HostDevice::new(1 << 20);
        let ptr = device.allocate(16).unwrap();
        assert!(device.copy_from_host(ptr.offset(12), &[0u8; 8]).is_err());
        assert!(device.copy_from_host(DevicePtr(1), &[0u8; 1]).is_err());
    }

    #[test]
    fn test_double_free_fails() {
        let device = HostDevice::new(1 << 20);
        let ptr = device.allocate(16).unwrap();
        device.free(ptr).unwrap();
        assert!(device.free(ptr).is_err());
    }

    #[test]
    fn test_stats() {
        let device = HostDevice::new(1 << 20);
        let a = device.allocate(100).unwrap();
        let _b = device.allocate(50).unwrap();
        device.free(a).unwrap();
        let stats = device.stats();
        assert_eq!(stats.alloc_count, 2);
        assert_eq!(stats.free_count, 1);
        assert_eq!(stats.live_bytes, 50);
        assert_eq!(stats.peak_bytes, 150);
        assert_eq!(device.live_allocations(), 1);
    }
}

//! Accelerator device abstraction
//!
//! The planner only needs a handful of things from a device: how much memory
//! is free, how many executions it can run side by side, raw allocation, and
//! host<->device copies. [`Device`] captures exactly that so the compile
//! pipeline can run against a real GPU ([`HipDevice`], `rocm` feature) or the
//! host-memory simulator ([`HostDevice`]).

mod error;
pub mod host;

#[cfg(feature = "rocm")]
pub mod hip;

use std::fmt;
use std::sync::Arc;

pub use error::{DeviceError, DeviceResult};
pub use host::HostDevice;

#[cfg(feature = "rocm")]
pub use hip::HipDevice;

/// Raw device address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DevicePtr(pub u64);

impl DevicePtr {
    pub const NULL: DevicePtr = DevicePtr(0);

    /// Address `bytes` past this one
    pub fn offset(self, bytes: usize) -> DevicePtr {
        DevicePtr(self.0 + bytes as u64)
    }

    pub fn as_raw(self) -> u64 {
        self.0
    }

    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for DevicePtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

/// Free/total device memory in bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryInfo {
    pub free: usize,
    pub total: usize,
}

/// Device collaborator used by the compiler and the memory pool
///
/// Implementations must be thread-safe: leases on different threads copy into
/// their private regions concurrently.
pub trait Device: Send + Sync + fmt::Debug {
    /// Ordinal of the device on the host
    fn device_id(&self) -> i32;

    /// Human-readable device name
    fn name(&self) -> String;

    /// Current free and total memory
    fn memory_info(&self) -> DeviceResult<MemoryInfo>;

    /// Maximum number of executions the device runs concurrently
    fn max_concurrent_streams(&self) -> usize;

    /// Allocate `size` bytes of device memory
    fn allocate(&self, size: usize) -> DeviceResult<DevicePtr>;

    /// Release memory returned by [`Device::allocate`]
    fn free(&self, ptr: DevicePtr) -> DeviceResult<()>;

    /// Copy host bytes to `dst`
    fn copy_from_host(&self, dst: DevicePtr, src: &[u8]) -> DeviceResult<()>;

    /// Copy `dst.len()` bytes starting at `src` back to the host
    fn copy_to_host(&self, dst: &mut [u8], src: DevicePtr) -> DeviceResult<()>;
}

/// Shared handle to a device
pub type SharedDevice = Arc<dyn Device>;

/// Owned device allocation, freed on drop
///
/// A buffer keeps its device alive, so a compiled network can never outlive
/// the device that holds its memory.
pub struct DeviceBuffer {
    device: SharedDevice,
    ptr: DevicePtr,
    size: usize,
}

impl DeviceBuffer {
    /// Allocate a new device buffer
    pub fn new(device: &SharedDevice, size: usize) -> DeviceResult<Self> {
        if size == 0 {
            return Err(DeviceError::MemoryAllocationFailed(
                "Allocation size cannot be zero".to_string(),
            ));
        }
        let ptr = device.allocate(size)?;
        tracing::trace!("DeviceBuffer::new: {} bytes at {}", size, ptr);
        Ok(Self {
            device: Arc::clone(device),
            ptr,
            size,
        })
    }

    /// Base address of the allocation
    pub fn ptr(&self) -> DevicePtr {
        self.ptr
    }

    /// Size in bytes
    pub fn size(&self) -> usize {
        self.size
    }

    /// Device owning this allocation
    pub fn device(&self) -> &SharedDevice {
        &self.device
    }

    /// Copy host bytes into the buffer at `offset`
    pub fn copy_from_host(&self, offset: usize, data: &[u8]) -> DeviceResult<()> {
        self.check_range(offset, data.len())?;
        self.device.copy_from_host(self.ptr.offset(offset), data)
    }

    /// Copy `dst.len()` bytes starting at `offset` back to the host
    pub fn copy_to_host(&self, offset: usize, dst: &mut [u8]) -> DeviceResult<()> {
        self.check_range(offset, dst.len())?;
        self.device.copy_to_host(dst, self.ptr.offset(offset))
    }

    fn check_range(&self, offset: usize, len: usize) -> DeviceResult<()> {
        match offset.checked_add(len) {
            Some(end) if end <= self.size => Ok(()),
            _ => Err(DeviceError::MemoryCopyFailed(format!(
                "copy out of bounds: offset={} len={} buffer_size={}",
                offset, len, self.size
            ))),
        }
    }
}

impl fmt::Debug for DeviceBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceBuffer")
            .field("device", &self.device.device_id())
            .field("ptr", &self.ptr)
            .field("size", &self.size)
            .finish()
    }
}

impl Drop for DeviceBuffer {
    fn drop(&mut self) {
        if let Err(e) = self.device.free(self.ptr) {
            tracing::error!("DeviceBuffer::drop: failed to free {}: {}", self.ptr, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host() -> SharedDevice {
        Arc::new(HostDevice::new(1 << 20))
    }

    #[test]
    fn test_device_ptr_offset() {
        let ptr = DevicePtr(0x1000);
        assert_eq!(ptr.offset(0x20), DevicePtr(0x1020));
        assert_eq!(ptr.offset(0x20).to_string(), "0x1020");
        assert!(DevicePtr::NULL.is_null());
    }

    #[test]
    fn test_buffer_round_trip_at_offset() {
        let device = host();
        let buffer = DeviceBuffer::new(&device, 64).unwrap();
        buffer.copy_from_host(16, &[1, 2, 3, 4]).unwrap();
        let mut out = [0u8; 4];
        buffer.copy_to_host(16, &mut out).unwrap();
        assert_eq!(out, [1, 2, 3, 4]);
    }

    #[test]
    fn test_buffer_rejects_out_of_bounds_copy() {
        let device = host();
        let buffer = DeviceBuffer::new(&device, 8).unwrap();
        assert!(buffer.copy_from_host(6, &[0u8; 4]).is_err());
        let mut out = [0u8; 9];
        assert!(buffer.copy_to_host(0, &mut out).is_err());
    }

    #[test]
    fn test_zero_size_buffer_fails() {
        let device = host();
        assert!(DeviceBuffer::new(&device, 0).is_err());
    }

    #[test]
    fn test_drop_releases_memory() {
        let device = host();
        let before = device.memory_info().unwrap().free;
        {
            let _buffer = DeviceBuffer::new(&device, 4096).unwrap();
            assert_eq!(device.memory_info().unwrap().free, before - 4096);
        }
        assert_eq!(device.memory_info().unwrap().free, before);
    }
}

//! AMD GPU device through the HIP runtime
//!
//! Enabled with the `rocm` feature. The build script links `amdhip64` from
//! `$ROCM_PATH/lib` (default `/opt/rocm/lib`) only when this feature is on.

mod ffi;

use std::ffi::CStr;
use std::ptr;

use super::{Device, DeviceError, DevicePtr, DeviceResult, MemoryInfo};

/// Environment variable the HIP runtime reads for its hardware queue count
const HW_QUEUES_ENV: &str = "GPU_MAX_HW_QUEUES";

/// HIP runtime default for `GPU_MAX_HW_QUEUES`
const DEFAULT_HW_QUEUES: usize = 4;

// Opaque buffer for hipDeviceProp_t - MUST be exactly 1472 bytes to match C's sizeof(hipDeviceProp_t)
// Fields are read at fixed offsets (ROCm 6.x/7.x layout).
#[repr(C)]
#[derive(Debug, Clone)]
pub struct HipDeviceProp {
    _buffer: [u8; 1472],
}

impl HipDeviceProp {
    // char name[256]
    const NAME_OFFSET: usize = 0;
    // name[256] + uuid(16) + luid[8] + luidDeviceNodeMask(4) + padding(4)
    const TOTAL_GLOBAL_MEM_OFFSET: usize = 288;
    const MULTI_PROCESSOR_COUNT_OFFSET: usize = 388;

    /// Device name (null-terminated C string)
    pub fn name(&self) -> String {
        let name_bytes = &self._buffer[Self::NAME_OFFSET..Self::NAME_OFFSET + 256];
        let len = name_bytes.iter().position(|&c| c == 0).unwrap_or(256);
        String::from_utf8_lossy(&name_bytes[..len]).into_owned()
    }

    /// Total global memory in bytes
    pub fn total_global_mem(&self) -> u64 {
        let bytes = &self._buffer[Self::TOTAL_GLOBAL_MEM_OFFSET..Self::TOTAL_GLOBAL_MEM_OFFSET + 8];
        bytes.try_into().ok().map(u64::from_ne_bytes).unwrap_or(0)
    }

    /// Number of compute units
    pub fn multi_processor_count(&self) -> i32 {
        let bytes = &self._buffer
            [Self::MULTI_PROCESSOR_COUNT_OFFSET..Self::MULTI_PROCESSOR_COUNT_OFFSET + 4];
        bytes.try_into().ok().map(i32::from_ne_bytes).unwrap_or(0)
    }
}

impl Default for HipDeviceProp {
    fn default() -> Self {
        HipDeviceProp {
            _buffer: [0u8; 1472],
        }
    }
}

/// Get HIP error string from error code
fn error_string(error: i32) -> String {
    unsafe {
        let error_ptr = ffi::hipGetErrorString(error);
        if error_ptr.is_null() {
            "Unknown error".to_string()
        } else {
            CStr::from_ptr(error_ptr).to_string_lossy().into_owned()
        }
    }
}

/// HIP device selected by ordinal
#[derive(Debug)]
pub struct HipDevice {
    device_id: i32,
    name: String,
    total_memory: usize,
    compute_units: i32,
    hw_queues: usize,
}

// SAFETY: HipDevice holds only plain data; every FFI call selects the device
// for the calling thread before touching memory.
unsafe impl Send for HipDevice {}
unsafe impl Sync for HipDevice {}

impl HipDevice {
    /// Initialize HIP and open device `device_id`
    pub fn new(device_id: i32) -> DeviceResult<Self> {
        let result = unsafe { ffi::hipInit(0) };
        if result != ffi::HIP_SUCCESS {
            return Err(DeviceError::InitializationFailed(format!(
                "hipInit failed with code {} ({})",
                result,
                error_string(result)
            )));
        }

        let mut count: i32 = 0;
        let result = unsafe { ffi::hipGetDeviceCount(&mut count) };
        if result != ffi::HIP_SUCCESS || device_id < 0 || device_id >= count {
            return Err(DeviceError::DeviceNotFound);
        }

        let mut props = HipDeviceProp::default();
        let result = unsafe { ffi::hipGetDeviceProperties(&mut props, device_id) };
        if result != ffi::HIP_SUCCESS {
            return Err(DeviceError::DeviceFailure(format!(
                "Failed to get device properties: {}",
                error_string(result)
            )));
        }

        let hw_queues = std::env::var(HW_QUEUES_ENV)
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .filter(|&n| n > 0)
            .unwrap_or(DEFAULT_HW_QUEUES);

        let device = HipDevice {
            device_id,
            name: props.name(),
            total_memory: props.total_global_mem() as usize,
            compute_units: props.multi_processor_count(),
            hw_queues,
        };
        tracing::info!(
            "HipDevice {}: {} ({} MB, {} CUs, {} hw queues)",
            device.device_id,
            device.name,
            device.total_memory / (1024 * 1024),
            device.compute_units,
            device.hw_queues
        );
        Ok(device)
    }

    /// Number of compute units
    pub fn compute_units(&self) -> i32 {
        self.compute_units
    }

    fn set_current(&self) -> DeviceResult<()> {
        let result = unsafe { ffi::hipSetDevice(self.device_id) };
        if result != ffi::HIP_SUCCESS {
            return Err(DeviceError::DeviceFailure(format!(
                "hipSetDevice({}) failed: {}",
                self.device_id,
                error_string(result)
            )));
        }
        Ok(())
    }
}

impl Device for HipDevice {
    fn device_id(&self) -> i32 {
        self.device_id
    }

    fn name(&self) -> String {
        self.name.clone()
    }

    fn memory_info(&self) -> DeviceResult<MemoryInfo> {
        self.set_current()?;
        let mut free: usize = 0;
        let mut total: usize = 0;
        let result = unsafe { ffi::hipMemGetInfo(&mut free, &mut total) };
        if result != ffi::HIP_SUCCESS {
            return Err(DeviceError::MemoryQueryFailed(format!(
                "hipMemGetInfo failed with code {} ({})",
                result,
                error_string(result)
            )));
        }
        Ok(MemoryInfo { free, total })
    }

    fn max_concurrent_streams(&self) -> usize {
        self.hw_queues
    }

    fn allocate(&self, size: usize) -> DeviceResult<DevicePtr> {
        self.set_current()?;
        let mut raw: *mut std::ffi::c_void = ptr::null_mut();
        let result = unsafe { ffi::hipMalloc(&mut raw, size) };
        if result != ffi::HIP_SUCCESS || raw.is_null() {
            tracing::error!("hipMalloc failed with code {} for {} bytes", result, size);
            return Err(DeviceError::MemoryAllocationFailed(format!(
                "hipMalloc failed with code {} for {} bytes",
                result, size
            )));
        }
        Ok(DevicePtr(raw as u64))
    }

    fn free(&self, ptr: DevicePtr) -> DeviceResult<()> {
        self.set_current()?;
        let result = unsafe { ffi::hipFree(ptr.0 as *mut std::ffi::c_void) };
        if result != ffi::HIP_SUCCESS {
            return Err(DeviceError::InvalidPointer(format!(
                "hipFree({}) failed: {}",
                ptr,
                error_string(result)
            )));
        }
        Ok(())
    }

    fn copy_from_host(&self, dst: DevicePtr, src: &[u8]) -> DeviceResult<()> {
        self.set_current()?;
        let result = unsafe {
            ffi::hipMemcpy(
                dst.0 as *mut std::ffi::c_void,
                src.as_ptr() as *const std::ffi::c_void,
                src.len(),
                ffi::HIP_MEMCPY_HOST_TO_DEVICE,
            )
        };
        if result != ffi::HIP_SUCCESS {
            return Err(DeviceError::MemoryCopyFailed(format!(
                "hipMemcpyHtoD failed with code {} (ptr={}, size={})",
                result,
                dst,
                src.len()
            )));
        }
        Ok(())
    }

    fn copy_to_host(&self, dst: &mut [u8], src: DevicePtr) -> DeviceResult<()> {
        self.set_current()?;
        let result = unsafe {
            ffi::hipMemcpy(
                dst.as_mut_ptr() as *mut std::ffi::c_void,
                src.0 as *const std::ffi::c_void,
                dst.len(),
                ffi::HIP_MEMCPY_DEVICE_TO_HOST,
            )
        };
        if result != ffi::HIP_SUCCESS {
            return Err(DeviceError::MemoryCopyFailed(format!(
                "hipMemcpyDtoH failed with code {} (ptr={}, size={})",
                result,
                src,
                dst.len()
            )));
        }
        Ok(())
    }
}

//! HIP FFI bindings
//!
//! Only the runtime entry points the planner needs: device selection and
//! properties, raw allocation, blocking copies and the memory query.

use std::ffi::c_void;

#[link(name = "amdhip64")]
extern "C" {
    pub fn hipInit(flags: u32) -> i32;
    pub fn hipGetDeviceCount(count: *mut i32) -> i32;
    pub fn hipGetDeviceProperties(props: *mut super::HipDeviceProp, deviceId: i32) -> i32;
    pub fn hipSetDevice(deviceId: i32) -> i32;
    pub fn hipMalloc(ptr: *mut *mut c_void, size: usize) -> i32;
    pub fn hipFree(ptr: *mut c_void) -> i32;
    pub fn hipMemcpy(dst: *mut c_void, src: *const c_void, count: usize, kind: i32) -> i32;
    pub fn hipMemGetInfo(free: *mut usize, total: *mut usize) -> i32;
    pub fn hipGetErrorString(error: i32) -> *const i8;
}

/// HIP memory copy kinds
pub const HIP_MEMCPY_HOST_TO_DEVICE: i32 = 1;
pub const HIP_MEMCPY_DEVICE_TO_HOST: i32 = 2;

/// HIP success code
pub const HIP_SUCCESS: i32 = 0;

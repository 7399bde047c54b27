//! memforge - graph compilation and multi-stream device memory planning
//!
//! Compiles an ordered operation graph into an execution sequence and a
//! device memory plan: constants go into one shared read-only block,
//! transients into a compact per-execution region, and as many regions are
//! allocated as device memory and device concurrency allow.

#![allow(clippy::type_complexity)] // Factory and kernel closures
#![allow(clippy::new_without_default)]

pub mod config;
pub mod device;
pub mod error;
pub mod extractor;
pub mod graph;
pub mod logging;
pub mod memory;
pub mod network;
pub mod registry;

pub use config::{PlanConfig, StreamCount};
pub use device::{Device, DeviceBuffer, DevicePtr, HostDevice, MemoryInfo, SharedDevice};
pub use error::{ErrorCategory, ForgeResult, MemForgeError};
pub use extractor::OperationBuffersExtractor;
pub use graph::{DType, Dim, Graph, Node, Op, TensorDesc, TensorId};
pub use logging::{init_logging_default, init_logging_from_env, init_with_config, LoggingConfig};
pub use memory::{
    BufferId, DeviceMemBlock, ImmutableMemoryBlockBuilder, MemoryManager, MemoryManagerPool,
    MemoryModel, MemoryModelBuilder, StreamBudgetCalculator,
};
pub use network::CompiledNetwork;
pub use registry::{InferenceContext, Operation, OperationBuffers, OperationRegistry, TensorArg};

#[cfg(feature = "rocm")]
pub use device::HipDevice;

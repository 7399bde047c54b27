//! Compiled networks
//!
//! [`CompiledNetwork::compile`] turns an ordered graph into an execution
//! sequence plus a [`MemoryManagerPool`] sized for the device, and
//! [`CompiledNetwork::infer`] runs one request against it.

mod compiler;
mod infer;

use std::collections::HashMap;
use std::fmt;

use crate::device::SharedDevice;
use crate::memory::{BufferId, MemoryManagerPool, MemoryModelStats};
use crate::registry::Operation;

pub use infer::{InferInputs, InferOutputs};

/// Host-visible graph input or output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TensorBinding {
    pub name: String,
    /// Position of the Parameter or Result node
    pub position: usize,
    pub buffer: BufferId,
    pub size: usize,
}

/// What the driver does at a node position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeRole {
    /// Copy the request input into its buffer
    Parameter(usize),
    /// Copy the buffer back to the host
    Result(usize),
    /// Run the operation
    Operation,
}

/// Graph compiled for one device
///
/// Immutable after compilation; concurrent `infer` calls share it and are
/// limited only by the pool size.
pub struct CompiledNetwork {
    name: String,
    device: SharedDevice,
    exec_sequence: Vec<Box<dyn Operation>>,
    roles: Vec<NodeRole>,
    parameters: Vec<TensorBinding>,
    results: Vec<TensorBinding>,
    input_index: HashMap<String, usize>,
    output_index: HashMap<String, usize>,
    memory_stats: MemoryModelStats,
    pool: MemoryManagerPool,
}

impl CompiledNetwork {
    /// Network (graph) name
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn device(&self) -> &SharedDevice {
        &self.device
    }

    /// Parameter name -> index among the graph parameters
    pub fn input_index(&self) -> &HashMap<String, usize> {
        &self.input_index
    }

    /// Result name -> index among the graph results
    pub fn output_index(&self) -> &HashMap<String, usize> {
        &self.output_index
    }

    pub fn inputs(&self) -> &[TensorBinding] {
        &self.parameters
    }

    pub fn outputs(&self) -> &[TensorBinding] {
        &self.results
    }

    /// Operations in execution order
    pub fn exec_sequence(&self) -> &[Box<dyn Operation>] {
        &self.exec_sequence
    }

    pub fn memory_manager_pool(&self) -> &MemoryManagerPool {
        &self.pool
    }

    /// Reuse statistics of the transient memory model
    pub fn memory_stats(&self) -> &MemoryModelStats {
        &self.memory_stats
    }

    /// Number of requests that can run concurrently
    pub fn optimal_number_of_infer_requests(&self) -> usize {
        self.pool.size()
    }
}

impl fmt::Debug for CompiledNetwork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledNetwork")
            .field("name", &self.name)
            .field("device", &self.device.name())
            .field("operations", &self.exec_sequence.len())
            .field("inputs", &self.input_index)
            .field("outputs", &self.output_index)
            .field("streams", &self.pool.size())
            .finish()
    }
}

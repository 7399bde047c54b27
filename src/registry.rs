//! Operation registry with pluggable implementations
//!
//! Maps an operation type name to a factory building an executable
//! [`Operation`] from a graph node and the buffers the extractor assigned to
//! it. The registry is an ordinary value passed to the compiler, so tests and
//! embedders can build their own set of kernels.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::device::{Device, DevicePtr};
use crate::error::{ForgeResult, MemForgeError};
use crate::graph::{Node, Op};
use crate::memory::BufferId;

/// Buffers assigned to one node, with their byte sizes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OperationBuffers {
    pub inputs: Vec<BufferId>,
    pub outputs: Vec<BufferId>,
    pub input_sizes: Vec<usize>,
    pub output_sizes: Vec<usize>,
}

/// Resolved buffer handed to a kernel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TensorArg {
    pub ptr: DevicePtr,
    pub size: usize,
}

/// What an operation sees while it runs
pub struct InferenceContext<'a> {
    device: &'a dyn Device,
    slot: usize,
}

impl<'a> InferenceContext<'a> {
    pub fn new(device: &'a dyn Device, slot: usize) -> Self {
        Self { device, slot }
    }

    pub fn device(&self) -> &'a dyn Device {
        self.device
    }

    /// Pool slot of the memory manager serving this request
    pub fn slot(&self) -> usize {
        self.slot
    }

    /// Copy `len` bytes at `ptr` back to the host
    pub fn read(&self, ptr: DevicePtr, len: usize) -> ForgeResult<Vec<u8>> {
        let mut data = vec![0u8; len];
        if len > 0 {
            self.device.copy_to_host(&mut data, ptr)?;
        }
        Ok(data)
    }

    /// Copy host bytes to `ptr`
    pub fn write(&self, ptr: DevicePtr, data: &[u8]) -> ForgeResult<()> {
        if !data.is_empty() {
            self.device.copy_from_host(ptr, data)?;
        }
        Ok(())
    }
}

/// Executable form of one graph node
pub trait Operation: Send + Sync + fmt::Debug {
    /// Node name
    fn name(&self) -> &str;

    /// Registry type name
    fn type_name(&self) -> &str;

    fn buffers(&self) -> &OperationBuffers;

    fn input_ids(&self) -> &[BufferId] {
        &self.buffers().inputs
    }

    fn output_ids(&self) -> &[BufferId] {
        &self.buffers().outputs
    }

    /// Run the operation with resolved buffer addresses
    fn execute(
        &self,
        ctx: &InferenceContext<'_>,
        inputs: &[DevicePtr],
        outputs: &[DevicePtr],
    ) -> ForgeResult<()>;
}

/// Factory creating an operation for a node
pub type OperationFactory =
    Arc<dyn Fn(&Node, OperationBuffers) -> ForgeResult<Box<dyn Operation>> + Send + Sync>;

/// Kernel function run by [`KernelOperation`]
pub type KernelFn =
    Arc<dyn Fn(&InferenceContext<'_>, &[TensorArg], &[TensorArg]) -> ForgeResult<()> + Send + Sync>;

/// Operation that does no work at execution time
///
/// Parameters and constants are bound before execution, results are read
/// after it, and view operations alias their input buffer.
#[derive(Debug, Clone)]
pub struct NopOperation {
    name: String,
    type_name: String,
    buffers: OperationBuffers,
}

impl NopOperation {
    pub fn new(node: &Node, buffers: OperationBuffers) -> Self {
        Self {
            name: node.name.clone(),
            type_name: node.op.type_name().to_string(),
            buffers,
        }
    }
}

impl Operation for NopOperation {
    fn name(&self) -> &str {
        &self.name
    }

    fn type_name(&self) -> &str {
        &self.type_name
    }

    fn buffers(&self) -> &OperationBuffers {
        &self.buffers
    }

    fn execute(
        &self,
        _ctx: &InferenceContext<'_>,
        _inputs: &[DevicePtr],
        _outputs: &[DevicePtr],
    ) -> ForgeResult<()> {
        Ok(())
    }
}

/// Operation running a shared kernel function
#[derive(Clone)]
pub struct KernelOperation {
    name: String,
    type_name: String,
    buffers: OperationBuffers,
    kernel: KernelFn,
}

impl fmt::Debug for KernelOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KernelOperation")
            .field("name", &self.name)
            .field("type_name", &self.type_name)
            .field("buffers", &self.buffers)
            .finish()
    }
}

impl Operation for KernelOperation {
    fn name(&self) -> &str {
        &self.name
    }

    fn type_name(&self) -> &str {
        &self.type_name
    }

    fn buffers(&self) -> &OperationBuffers {
        &self.buffers
    }

    fn execute(
        &self,
        ctx: &InferenceContext<'_>,
        inputs: &[DevicePtr],
        outputs: &[DevicePtr],
    ) -> ForgeResult<()> {
        let inputs = tensor_args(inputs, &self.buffers.input_sizes)?;
        let outputs = tensor_args(outputs, &self.buffers.output_sizes)?;
        (self.kernel)(ctx, &inputs, &outputs)
    }
}

fn tensor_args(ptrs: &[DevicePtr], sizes: &[usize]) -> ForgeResult<Vec<TensorArg>> {
    if ptrs.len() != sizes.len() {
        return Err(MemForgeError::ExecutionFailed(format!(
            "kernel expects {} buffers, got {}",
            sizes.len(),
            ptrs.len()
        )));
    }
    Ok(ptrs
        .iter()
        .zip(sizes)
        .map(|(&ptr, &size)| TensorArg { ptr, size })
        .collect())
}

/// Registry of operation factories keyed by type name
#[derive(Clone, Default)]
pub struct OperationRegistry {
    factories: HashMap<String, OperationFactory>,
}

impl OperationRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry knowing the structural operations (parameters, constants,
    /// results and views)
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        for type_name in [
            Op::PARAMETER,
            Op::CONSTANT,
            Op::RESULT,
            Op::RESHAPE,
            Op::SQUEEZE,
            Op::UNSQUEEZE,
        ] {
            registry.register(type_name, |node, buffers| {
                Ok(Box::new(NopOperation::new(node, buffers)) as Box<dyn Operation>)
            });
        }
        registry
    }

    /// Register (or replace) the factory for `type_name`
    pub fn register<F>(&mut self, type_name: impl Into<String>, factory: F)
    where
        F: Fn(&Node, OperationBuffers) -> ForgeResult<Box<dyn Operation>> + Send + Sync + 'static,
    {
        let type_name = type_name.into();
        if self
            .factories
            .insert(type_name.clone(), Arc::new(factory))
            .is_some()
        {
            tracing::debug!("OperationRegistry: replaced factory for '{}'", type_name);
        }
    }

    /// Register a kernel function for `type_name`
    pub fn register_kernel<K>(&mut self, type_name: impl Into<String>, kernel: K)
    where
        K: Fn(&InferenceContext<'_>, &[TensorArg], &[TensorArg]) -> ForgeResult<()>
            + Send
            + Sync
            + 'static,
    {
        let kernel: KernelFn = Arc::new(kernel);
        self.register(type_name, move |node, buffers| {
            Ok(Box::new(KernelOperation {
                name: node.name.clone(),
                type_name: node.op.type_name().to_string(),
                buffers,
                kernel: Arc::clone(&kernel),
            }) as Box<dyn Operation>)
        });
    }

    pub fn has_operation(&self, type_name: &str) -> bool {
        self.factories.contains_key(type_name)
    }

    /// Registered type names, sorted
    pub fn type_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Build the executable operation for `node`
    pub fn create_operation(
        &self,
        node: &Node,
        buffers: OperationBuffers,
    ) -> ForgeResult<Box<dyn Operation>> {
        let type_name = node.op.type_name();
        let factory = self
            .factories
            .get(type_name)
            .ok_or_else(|| MemForgeError::UnsupportedOperation {
                node: node.name.clone(),
                op_type: type_name.to_string(),
                reason: "no registered implementation".to_string(),
            })?;
        factory(node, buffers)
    }
}

impl fmt::Debug for OperationRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationRegistry")
            .field("operations", &self.type_names())
            .finish()
    }
}

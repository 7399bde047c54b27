//! Synchronous request driver

use std::collections::HashMap;
use std::time::Duration;

use super::{CompiledNetwork, NodeRole};
use crate::error::{ForgeResult, MemForgeError};
use crate::memory::MemoryManager;
use crate::registry::InferenceContext;

/// Request inputs by parameter name
pub type InferInputs = HashMap<String, Vec<u8>>;

/// Request outputs by result name
pub type InferOutputs = HashMap<String, Vec<u8>>;

impl CompiledNetwork {
    /// Run one request, waiting for a free memory manager
    ///
    /// The manager returns to the pool on every exit path.
    pub fn infer(&self, inputs: &InferInputs) -> ForgeResult<InferOutputs> {
        self.check_inputs(inputs)?;
        let manager = self.pool.acquire()?;
        self.run(&manager, inputs)
    }

    /// Run one request if a memory manager frees up within `timeout`
    ///
    /// Returns `Ok(None)` when the wait timed out.
    pub fn infer_timeout(
        &self,
        inputs: &InferInputs,
        timeout: Duration,
    ) -> ForgeResult<Option<InferOutputs>> {
        self.check_inputs(inputs)?;
        match self.pool.acquire_timeout(timeout)? {
            Some(manager) => self.run(&manager, inputs).map(Some),
            None => Ok(None),
        }
    }

    /// Run one request with an already leased memory manager
    ///
    /// The manager must come from this network's pool; a lease from another
    /// network resolves buffers against the wrong memory model.
    pub fn execute(
        &self,
        manager: &MemoryManager<'_>,
        inputs: &InferInputs,
    ) -> ForgeResult<InferOutputs> {
        if !manager.belongs_to(&self.pool) {
            return Err(MemForgeError::InvalidConfiguration(format!(
                "memory manager {} was not leased from the pool of '{}'",
                manager.slot(),
                self.name
            )));
        }
        self.check_inputs(inputs)?;
        self.run(manager, inputs)
    }

    /// Execute with a manager from this pool and validated inputs
    fn run(&self, manager: &MemoryManager<'_>, inputs: &InferInputs) -> ForgeResult<InferOutputs> {
        let ctx = InferenceContext::new(self.device.as_ref(), manager.slot());
        let mut outputs = HashMap::with_capacity(self.results.len());

        for (position, (operation, role)) in self.exec_sequence.iter().zip(&self.roles).enumerate() {
            match *role {
                NodeRole::Parameter(index) => {
                    let binding = &self.parameters[index];
                    let data = inputs
                        .get(&binding.name)
                        .ok_or_else(|| MemForgeError::MissingInput(binding.name.clone()))?;
                    ctx.write(manager.resolve(binding.buffer)?, data)?;
                }
                NodeRole::Result(index) => {
                    let binding = &self.results[index];
                    let data = ctx.read(manager.resolve(binding.buffer)?, binding.size)?;
                    outputs.insert(binding.name.clone(), data);
                }
                NodeRole::Operation => {
                    let input_ptrs = manager.input_tensor_pointers(operation.input_ids())?;
                    let output_ptrs = manager.output_tensor_pointers(operation.output_ids())?;
                    operation
                        .execute(&ctx, &input_ptrs, &output_ptrs)
                        .map_err(|e| {
                            tracing::error!(
                                "'{}': operation {} '{}' ({}) failed: {}",
                                self.name,
                                position,
                                operation.name(),
                                operation.type_name(),
                                e
                            );
                            e
                        })?;
                }
            }
        }

        tracing::trace!(
            "'{}': request finished on slot {} ({} outputs)",
            self.name,
            manager.slot(),
            outputs.len()
        );
        Ok(outputs)
    }

    /// Every parameter bound with the right number of bytes, and nothing else
    fn check_inputs(&self, inputs: &InferInputs) -> ForgeResult<()> {
        if let Some(name) = inputs.keys().find(|name| !self.input_index.contains_key(*name)) {
            return Err(MemForgeError::UnknownInput(name.clone()));
        }
        for binding in &self.parameters {
            let data = inputs
                .get(&binding.name)
                .ok_or_else(|| MemForgeError::MissingInput(binding.name.clone()))?;
            if data.len() != binding.size {
                return Err(MemForgeError::ExecutionFailed(format!(
                    "input '{}' has {} bytes, expected {}",
                    binding.name,
                    data.len(),
                    binding.size
                )));
            }
        }
        Ok(())
    }
}

//! Compile pipeline: graph -> buffers -> memory plan -> pool

use std::collections::HashMap;

use super::{CompiledNetwork, NodeRole, TensorBinding};
use crate::config::PlanConfig;
use crate::device::SharedDevice;
use crate::error::{ForgeResult, MemForgeError};
use crate::extractor::OperationBuffersExtractor;
use crate::graph::{Graph, Op};
use crate::memory::{
    ImmutableMemoryBlockBuilder, MemoryManagerPool, MemoryModelBuilder, StreamBudgetCalculator,
};
use crate::registry::OperationRegistry;

impl CompiledNetwork {
    /// Compile `graph` for `device`
    ///
    /// Runs buffer extraction, creates one operation per node through
    /// `registry`, lays out constants and transients, sizes the stream
    /// budget from the device's free memory and allocates the pool. Any
    /// failure aborts compilation; no partially built network is returned.
    pub fn compile(
        graph: &Graph,
        registry: &OperationRegistry,
        device: SharedDevice,
        config: &PlanConfig,
    ) -> ForgeResult<Self> {
        let _span = tracing::info_span!("compile", network = %graph.name).entered();
        config.validate()?;
        if device.device_id() != config.device_id {
            return Err(MemForgeError::InvalidConfiguration(format!(
                "configured device {} but compiling for device {} ({})",
                config.device_id,
                device.device_id(),
                device.name()
            )));
        }

        tracing::info!(
            "Compiling '{}': {} nodes, {} tensors on {}",
            graph.name,
            graph.nodes.len(),
            graph.tensors.len(),
            device.name()
        );

        let extractor = OperationBuffersExtractor::new(graph, registry)?;

        let mut exec_sequence = Vec::with_capacity(graph.nodes.len());
        let mut roles = Vec::with_capacity(graph.nodes.len());
        let mut parameters = Vec::new();
        let mut results = Vec::new();
        for (position, node) in graph.nodes.iter().enumerate() {
            let buffers = extractor
                .operation_buffers(position)
                .cloned()
                .ok_or_else(|| crate::internal_error!("node {} has no buffers", position))?;

            let role = match node.op {
                Op::Parameter => {
                    parameters.push(binding(&extractor, &node.name, position, &buffers.outputs)?);
                    NodeRole::Parameter(parameters.len() - 1)
                }
                Op::Result => {
                    results.push(binding(&extractor, &node.name, position, &buffers.inputs)?);
                    NodeRole::Result(results.len() - 1)
                }
                _ => NodeRole::Operation,
            };
            roles.push(role);
            exec_sequence.push(registry.create_operation(node, buffers)?);
        }

        let input_index = index_by_name(&parameters, "parameter")?;
        let output_index = index_by_name(&results, "result")?;

        let mut constants = ImmutableMemoryBlockBuilder::with_alignment(config.alignment)?;
        for id in extractor.immutable_buffer_indices() {
            constants.add_allocation(id, extractor.immutable_buffer(id)?)?;
        }

        let mut transients = MemoryModelBuilder::with_alignment(config.alignment)?;
        for id in extractor.mutable_buffer_indices() {
            transients.add_allocation(
                id,
                extractor.mutable_buffer_lifespan_start(id)?,
                extractor.mutable_buffer_lifespan_end(id)?,
                extractor.buffer_size(id)?,
            )?;
        }
        let (memory_model, memory_stats) = transients.build_with_stats();
        tracing::info!("{}", memory_stats);

        let memory_info = device.memory_info()?;
        let num_streams = StreamBudgetCalculator::new(
            memory_info.free,
            constants.device_memory_block_size(),
            memory_model.device_memory_block_size(),
        )
        .with_device_max_streams(device.max_concurrent_streams())
        .optimal_streams(config.throughput_streams)?;

        let constant_block = constants.build(&device)?;
        let pool = MemoryManagerPool::new(num_streams, constant_block, memory_model, &device)?;

        tracing::info!(
            "Compiled '{}': {} operations, {} streams (requested {})",
            graph.name,
            exec_sequence.len(),
            num_streams,
            config.throughput_streams
        );

        Ok(CompiledNetwork {
            name: graph.name.clone(),
            device,
            exec_sequence,
            roles,
            parameters,
            results,
            input_index,
            output_index,
            memory_stats,
            pool,
        })
    }
}

fn binding(
    extractor: &OperationBuffersExtractor,
    name: &str,
    position: usize,
    buffers: &[crate::memory::BufferId],
) -> ForgeResult<TensorBinding> {
    let buffer = *buffers
        .first()
        .ok_or_else(|| crate::internal_error!("'{}' has no buffer", name))?;
    Ok(TensorBinding {
        name: name.to_string(),
        position,
        buffer,
        size: extractor.buffer_size(buffer)?,
    })
}

fn index_by_name(bindings: &[TensorBinding], what: &str) -> ForgeResult<HashMap<String, usize>> {
    let mut index = HashMap::with_capacity(bindings.len());
    for (i, binding) in bindings.iter().enumerate() {
        if index.insert(binding.name.clone(), i).is_some() {
            return Err(MemForgeError::InvalidGraph(format!(
                "duplicate {} name '{}'",
                what, binding.name
            )));
        }
    }
    Ok(index)
}

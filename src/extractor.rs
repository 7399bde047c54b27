//! Buffer extraction
//!
//! Walks the ordered graph once, gives every produced tensor a buffer id and
//! classifies the buffer:
//!
//! - outputs of Constant nodes become immutable buffers carrying host data
//! - every other output becomes a mutable (transient) buffer with a lifespan
//!   `[producer position, last reader position]`
//! - outputs of view nodes (Reshape, Squeeze, Unsqueeze) reuse their input's
//!   buffer, so later readers of the view extend the shared lifespan
//!
//! Inputs of Result nodes stay alive until the last position so outputs can
//! be read back after the final operation.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{ForgeResult, MemForgeError};
use crate::graph::{Graph, Node, Op, TensorId};
use crate::graph_error;
use crate::memory::BufferId;
use crate::registry::{OperationBuffers, OperationRegistry};

/// Where a buffer lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BufferKind {
    /// Written once at compile time, shared by all executions
    Immutable { data: Arc<[u8]> },
    /// Produced and consumed inside one execution
    Mutable {
        lifespan_start: usize,
        lifespan_end: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferInfo {
    pub id: BufferId,
    pub size: usize,
    pub kind: BufferKind,
}

/// Buffer assignment for a whole graph
#[derive(Debug, Clone)]
pub struct OperationBuffersExtractor {
    buffers: Vec<BufferInfo>,
    node_buffers: Vec<OperationBuffers>,
    tensor_buffers: HashMap<TensorId, BufferId>,
}

impl OperationBuffersExtractor {
    /// Extract buffers of `graph`
    ///
    /// # Errors
    /// - `InvalidGraph` if the node order is not executable, a constant's data
    ///   does not match its descriptor, or a view changes the byte size
    /// - `UnsupportedOperation` if a node type is not registered or an output
    ///   size is not statically known
    pub fn new(graph: &Graph, registry: &OperationRegistry) -> ForgeResult<Self> {
        graph.validate()?;

        let mut extractor = Self {
            buffers: Vec::new(),
            node_buffers: Vec::with_capacity(graph.nodes.len()),
            tensor_buffers: HashMap::new(),
        };
        let last_position = graph.nodes.len().saturating_sub(1);

        for (position, node) in graph.nodes.iter().enumerate() {
            let type_name = node.op.type_name();
            if !registry.has_operation(type_name) {
                return Err(unsupported(node, "no registered implementation".to_string()));
            }

            let mut inputs = Vec::with_capacity(node.inputs.len());
            let mut input_sizes = Vec::with_capacity(node.inputs.len());
            for tensor in &node.inputs {
                let id = extractor.buffer_for_tensor(*tensor)?;
                input_sizes.push(extractor.info(id)?.size);
                let end = match node.op {
                    Op::Result => last_position,
                    _ => position,
                };
                extractor.extend_lifespan(id, end);
                inputs.push(id);
            }

            let mut outputs = Vec::with_capacity(node.outputs.len());
            let mut output_sizes = Vec::with_capacity(node.outputs.len());
            for tensor in &node.outputs {
                let desc = graph
                    .tensor(*tensor)
                    .ok_or_else(|| graph_error!("node '{}' writes unknown tensor {}", node.name, tensor))?;
                let size = desc.byte_size().ok_or_else(|| {
                    unsupported(
                        node,
                        format!("output {} has no statically known size", tensor),
                    )
                })?;

                let id = match &node.op {
                    op if op.is_view() => extractor.alias(node, inputs[0], size)?,
                    Op::Constant { data } => {
                        if data.len() != size {
                            return Err(graph_error!(
                                "constant '{}' holds {} bytes but its tensor needs {}",
                                node.name,
                                data.len(),
                                size
                            ));
                        }
                        extractor.push_buffer(
                            size,
                            BufferKind::Immutable {
                                data: Arc::clone(data),
                            },
                        )
                    }
                    _ => extractor.push_buffer(
                        size,
                        BufferKind::Mutable {
                            lifespan_start: position,
                            lifespan_end: position,
                        },
                    ),
                };
                extractor.tensor_buffers.insert(*tensor, id);
                outputs.push(id);
                output_sizes.push(size);
            }

            tracing::trace!(
                "Extractor: node {} '{}' ({}) inputs={:?} outputs={:?}",
                position,
                node.name,
                type_name,
                inputs,
                outputs
            );
            extractor.node_buffers.push(OperationBuffers {
                inputs,
                outputs,
                input_sizes,
                output_sizes,
            });
        }

        tracing::debug!(
            "Extractor: {} nodes, {} immutable buffers, {} mutable buffers",
            graph.nodes.len(),
            extractor.immutable_buffer_indices().len(),
            extractor.mutable_buffer_indices().len()
        );
        Ok(extractor)
    }

    fn push_buffer(&mut self, size: usize, kind: BufferKind) -> BufferId {
        let id = BufferId(self.buffers.len());
        self.buffers.push(BufferInfo { id, size, kind });
        id
    }

    fn alias(&self, node: &Node, source: BufferId, size: usize) -> ForgeResult<BufferId> {
        let source_size = self.info(source)?.size;
        if source_size != size {
            return Err(graph_error!(
                "view '{}' changes byte size from {} to {}",
                node.name,
                source_size,
                size
            ));
        }
        Ok(source)
    }

    fn extend_lifespan(&mut self, id: BufferId, position: usize) {
        if let Some(BufferInfo {
            kind: BufferKind::Mutable { lifespan_end, .. },
            ..
        }) = self.buffers.get_mut(id.0)
        {
            *lifespan_end = (*lifespan_end).max(position);
        }
    }

    fn buffer_for_tensor(&self, tensor: TensorId) -> ForgeResult<BufferId> {
        self.tensor_buffers
            .get(&tensor)
            .copied()
            .ok_or_else(|| graph_error!("tensor {} has no buffer", tensor))
    }

    fn info(&self, id: BufferId) -> ForgeResult<&BufferInfo> {
        self.buffers
            .get(id.0)
            .ok_or(MemForgeError::UnknownBufferId(id))
    }

    /// Every buffer, indexed by id
    pub fn buffers(&self) -> &[BufferInfo] {
        &self.buffers
    }

    /// Ids of constant buffers
    pub fn immutable_buffer_indices(&self) -> Vec<BufferId> {
        self.buffers
            .iter()
            .filter(|b| matches!(b.kind, BufferKind::Immutable { .. }))
            .map(|b| b.id)
            .collect()
    }

    /// Ids of transient buffers
    pub fn mutable_buffer_indices(&self) -> Vec<BufferId> {
        self.buffers
            .iter()
            .filter(|b| matches!(b.kind, BufferKind::Mutable { .. }))
            .map(|b| b.id)
            .collect()
    }

    /// Host data of a constant buffer
    pub fn immutable_buffer(&self, id: BufferId) -> ForgeResult<&[u8]> {
        match &self.info(id)?.kind {
            BufferKind::Immutable { data } => Ok(&data[..]),
            BufferKind::Mutable { .. } => Err(MemForgeError::UnknownBufferId(id)),
        }
    }

    /// Position of the operation producing a transient buffer
    pub fn mutable_buffer_lifespan_start(&self, id: BufferId) -> ForgeResult<usize> {
        self.lifespan(id).map(|(start, _)| start)
    }

    /// Position of the last operation reading a transient buffer
    pub fn mutable_buffer_lifespan_end(&self, id: BufferId) -> ForgeResult<usize> {
        self.lifespan(id).map(|(_, end)| end)
    }

    fn lifespan(&self, id: BufferId) -> ForgeResult<(usize, usize)> {
        match self.info(id)?.kind {
            BufferKind::Mutable {
                lifespan_start,
                lifespan_end,
            } => Ok((lifespan_start, lifespan_end)),
            BufferKind::Immutable { .. } => Err(MemForgeError::UnknownBufferId(id)),
        }
    }

    /// Size of any buffer in bytes
    pub fn buffer_size(&self, id: BufferId) -> ForgeResult<usize> {
        self.info(id).map(|b| b.size)
    }

    /// Buffers of the node at `position`
    pub fn operation_buffers(&self, position: usize) -> Option<&OperationBuffers> {
        self.node_buffers.get(position)
    }

    pub fn input_buffer_indices(&self, position: usize) -> &[BufferId] {
        self.node_buffers
            .get(position)
            .map(|b| b.inputs.as_slice())
            .unwrap_or(&[])
    }

    pub fn output_buffer_indices(&self, position: usize) -> &[BufferId] {
        self.node_buffers
            .get(position)
            .map(|b| b.outputs.as_slice())
            .unwrap_or(&[])
    }

    /// Buffer holding graph tensor `tensor`
    pub fn tensor_buffer(&self, tensor: TensorId) -> Option<BufferId> {
        self.tensor_buffers.get(&tensor).copied()
    }
}

fn unsupported(node: &Node, reason: String) -> MemForgeError {
    MemForgeError::UnsupportedOperation {
        node: node.name.clone(),
        op_type: node.op.type_name().to_string(),
        reason,
    }
}

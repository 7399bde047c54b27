//! Graph IR consumed by the compiler.
//!
//! A [`Graph`] is an already ordered operation sequence: node `i` runs at
//! position `i` and may only read tensors produced by nodes before it.

pub mod op;
pub mod tensor;

pub use op::Op;
pub use tensor::{DType, Dim, TensorDesc, TensorId};

use crate::error::ForgeResult;
use crate::graph_error;

#[derive(Debug, Clone)]
pub struct Node {
    pub name: String,
    pub op: Op,
    pub inputs: Vec<TensorId>,
    pub outputs: Vec<TensorId>,
}

#[derive(Debug, Default, Clone)]
pub struct Graph {
    pub name: String,
    pub tensors: Vec<TensorDesc>,
    pub nodes: Vec<Node>,
}

impl Graph {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn add_tensor(&mut self, mut desc: TensorDesc) -> TensorId {
        let id = TensorId(self.tensors.len());
        desc.id = id;
        self.tensors.push(desc);
        id
    }

    pub fn add_node(
        &mut self,
        name: impl Into<String>,
        op: Op,
        inputs: Vec<TensorId>,
        outputs: Vec<TensorId>,
    ) -> usize {
        self.nodes.push(Node {
            name: name.into(),
            op,
            inputs,
            outputs,
        });
        self.nodes.len() - 1
    }

    pub fn tensor(&self, id: TensorId) -> Option<&TensorDesc> {
        self.tensors.get(id.0)
    }

    /// Positions of the Parameter nodes
    pub fn parameters(&self) -> impl Iterator<Item = (usize, &Node)> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| matches!(n.op, Op::Parameter))
    }

    /// Positions of the Result nodes
    pub fn results(&self) -> impl Iterator<Item = (usize, &Node)> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| matches!(n.op, Op::Result))
    }

    /// Check that the node order is executable
    ///
    /// Every input must be produced by an earlier node, every tensor is
    /// produced at most once, and the fixed-arity operations have the
    /// expected number of inputs and outputs.
    pub fn validate(&self) -> ForgeResult<()> {
        let mut produced = vec![false; self.tensors.len()];

        for (position, node) in self.nodes.iter().enumerate() {
            let (inputs, outputs) = match node.op {
                Op::Parameter | Op::Constant { .. } => (Some(0), Some(1)),
                Op::Result => (Some(1), Some(0)),
                Op::Reshape | Op::Squeeze | Op::Unsqueeze => (Some(1), Some(1)),
                Op::Compute { .. } => (None, None),
            };
            if inputs.map_or(false, |n| n != node.inputs.len())
                || outputs.map_or(false, |n| n != node.outputs.len())
            {
                return Err(graph_error!(
                    "node '{}' ({}) has {} inputs and {} outputs",
                    node.name,
                    node.op.type_name(),
                    node.inputs.len(),
                    node.outputs.len()
                ));
            }

            for input in &node.inputs {
                match produced.get(input.0) {
                    Some(true) => {}
                    Some(false) => {
                        return Err(graph_error!(
                            "node '{}' at position {} reads {} before it is produced",
                            node.name,
                            position,
                            input
                        ))
                    }
                    None => {
                        return Err(graph_error!(
                            "node '{}' reads unknown tensor {}",
                            node.name,
                            input
                        ))
                    }
                }
            }

            for output in &node.outputs {
                match produced.get_mut(output.0) {
                    Some(slot) if !*slot => *slot = true,
                    Some(_) => {
                        return Err(graph_error!(
                            "tensor {} is produced twice (again by '{}')",
                            output,
                            node.name
                        ))
                    }
                    None => {
                        return Err(graph_error!(
                            "node '{}' writes unknown tensor {}",
                            node.name,
                            output
                        ))
                    }
                }
            }
        }

        Ok(())
    }
}

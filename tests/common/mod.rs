//! Common test utilities for memforge integration tests
//!
//! Provides:
//! - A kernel registry shared by every test binary
//! - Host device constructors
//! - Graph builders for the small networks the tests compile

#![allow(dead_code)]

use std::sync::Arc;

use once_cell::sync::Lazy;

use memforge::{
    DType, Graph, HostDevice, MemForgeError, Op, OperationRegistry, PlanConfig, SharedDevice,
    TensorDesc,
};

// Re-export serial_test for tests that touch the environment
pub use serial_test::serial;

/// Bytes of every tensor in the test graphs
pub const TENSOR_BYTES: usize = 16;

/// Constant folded into the scenario graph
pub const WEIGHTS: [u8; TENSOR_BYTES] = [1; TENSOR_BYTES];

/// Builtin operations plus byte kernels:
/// - `Add`: elementwise wrapping add of two inputs
/// - `Double`: elementwise wrapping multiply by two
/// - `Fail`: always returns `ExecutionFailed`
pub static TEST_REGISTRY: Lazy<OperationRegistry> = Lazy::new(|| {
    let mut registry = OperationRegistry::with_builtin();

    registry.register_kernel("Add", |ctx, inputs, outputs| {
        let a = ctx.read(inputs[0].ptr, inputs[0].size)?;
        let b = ctx.read(inputs[1].ptr, inputs[1].size)?;
        let sum: Vec<u8> = a.iter().zip(&b).map(|(x, y)| x.wrapping_add(*y)).collect();
        ctx.write(outputs[0].ptr, &sum)
    });

    registry.register_kernel("Double", |ctx, inputs, outputs| {
        let data = ctx.read(inputs[0].ptr, inputs[0].size)?;
        let doubled: Vec<u8> = data.iter().map(|x| x.wrapping_mul(2)).collect();
        ctx.write(outputs[0].ptr, &doubled)
    });

    registry.register_kernel("Fail", |_, _, _| {
        Err(MemForgeError::ExecutionFailed("kernel failed on purpose".to_string()))
    });

    registry
});

/// Host device with `total_memory` bytes and room for `max_streams` executions
pub fn host_device(total_memory: usize, max_streams: usize) -> Arc<HostDevice> {
    Arc::new(HostDevice::new(total_memory).with_max_concurrent_streams(max_streams))
}

pub fn shared(device: &Arc<HostDevice>) -> SharedDevice {
    device.clone()
}

/// Plan configuration with byte-granular placement
pub fn byte_config() -> PlanConfig {
    PlanConfig::new().with_alignment(1)
}

fn u8_tensor(graph: &mut Graph) -> memforge::TensorId {
    graph.add_tensor(TensorDesc::new(&[TENSOR_BYTES], DType::U8))
}

/// `y = Double(x + w)` with `w` a constant
///
/// Positions: 0 Parameter `x`, 1 Constant `w`, 2 Add, 3 Double, 4 Result `y`.
/// With byte-granular placement the transient region holds 32 bytes and the
/// constant block 16.
pub fn scenario_graph() -> Graph {
    let mut graph = Graph::new("scenario");
    let x = u8_tensor(&mut graph);
    let w = u8_tensor(&mut graph);
    let sum = u8_tensor(&mut graph);
    let doubled = u8_tensor(&mut graph);

    graph.add_node("x", Op::Parameter, vec![], vec![x]);
    graph.add_node("w", Op::constant(WEIGHTS.to_vec()), vec![], vec![w]);
    graph.add_node("add", Op::compute("Add"), vec![x, w], vec![sum]);
    graph.add_node("double", Op::compute("Double"), vec![sum], vec![doubled]);
    graph.add_node("y", Op::Result, vec![doubled], vec![]);
    graph
}

/// Expected output of [`scenario_graph`] for input `x`
pub fn scenario_expected(x: &[u8]) -> Vec<u8> {
    x.iter()
        .zip(WEIGHTS.iter())
        .map(|(a, w)| a.wrapping_add(*w).wrapping_mul(2))
        .collect()
}

/// Parameter `x`, `len` Double nodes, Result `y`
pub fn chain_graph(len: usize) -> Graph {
    let mut graph = Graph::new(format!("chain{}", len));
    let mut current = u8_tensor(&mut graph);
    graph.add_node("x", Op::Parameter, vec![], vec![current]);
    for i in 0..len {
        let next = u8_tensor(&mut graph);
        graph.add_node(format!("double{}", i), Op::compute("Double"), vec![current], vec![next]);
        current = next;
    }
    graph.add_node("y", Op::Result, vec![current], vec![]);
    graph
}

/// Graph whose second operation fails at execution time
pub fn failing_graph() -> Graph {
    let mut graph = Graph::new("failing");
    let x = u8_tensor(&mut graph);
    let doubled = u8_tensor(&mut graph);
    let failed = u8_tensor(&mut graph);

    graph.add_node("x", Op::Parameter, vec![], vec![x]);
    graph.add_node("double", Op::compute("Double"), vec![x], vec![doubled]);
    graph.add_node("fail", Op::compute("Fail"), vec![doubled], vec![failed]);
    graph.add_node("y", Op::Result, vec![failed], vec![]);
    graph
}

/// Input map binding `x`
pub fn input_x(data: &[u8]) -> memforge::network::InferInputs {
    let mut inputs = memforge::network::InferInputs::new();
    inputs.insert("x".to_string(), data.to_vec());
    inputs
}

//! Dependency-ordered traversal of the layer graph.
//!
//! Each `predict` call runs on fresh per-run state, so repeated calls with
//! the same inputs produce identical outputs. A node becomes ready when all
//! of its inbound tensors exist; fan-out parents hand each consumer a copy
//! while single-consumer edges move the tensor. Device-resident results stay
//! on the device between pipelined nodes and are read back only when a host
//! consumer or a terminal node needs them.

use std::collections::{HashMap, HashSet, VecDeque};

use tracing::trace;

use crate::device::DeviceContext;
use crate::errors::{InputValidationError, ModelResult, ShapeError};
use crate::model_graph::{ExecutionStrategy, LayerNode, ModelGraph};
use crate::tensor::Tensor;

/// Per-run activation storage, one slot per node.
struct RunState {
    outputs: Vec<Option<Tensor>>,
    remaining_consumers: Vec<usize>,
    pending_parents: Vec<usize>,
}

pub fn execute(
    graph: &ModelGraph,
    mut inputs: HashMap<String, Vec<f32>>,
    device: Option<&DeviceContext>,
    cooperative_yield: bool,
) -> ModelResult<HashMap<String, Vec<f32>>> {
    validate_input_keys(graph, &inputs)?;

    let nodes = graph.nodes();
    let index: HashMap<&str, usize> = nodes
        .iter()
        .enumerate()
        .map(|(i, n)| (n.name.as_str(), i))
        .collect();

    let mut state = RunState {
        outputs: nodes.iter().map(|_| None).collect(),
        remaining_consumers: nodes.iter().map(|n| n.outbound.len()).collect(),
        pending_parents: nodes.iter().map(|n| n.inbound.len()).collect(),
    };

    let mut ready: VecDeque<usize> = nodes
        .iter()
        .enumerate()
        .filter(|(_, n)| n.inbound.is_empty())
        .map(|(i, _)| i)
        .collect();

    while let Some(i) = ready.pop_front() {
        let node = &nodes[i];
        let gathered = gather_inputs(&index, &mut state, node, &mut inputs, device)?;
        let output = run_node(node, gathered, device)?;
        trace!(layer = %node.name, shape = ?output.shape(), "layer evaluated");
        state.outputs[i] = Some(output);

        for child in &node.outbound {
            let child_idx = index[child.as_str()];
            state.pending_parents[child_idx] -= 1;
            if state.pending_parents[child_idx] == 0 {
                ready.push_back(child_idx);
            }
        }

        if cooperative_yield {
            std::thread::yield_now();
        }
    }

    let mut results = HashMap::new();
    for name in graph.output_names() {
        let idx = index[name.as_str()];
        let mut tensor = state.outputs[idx]
            .take()
            .expect("terminal node evaluated by traversal");
        if let Some(ctx) = device {
            tensor.sync_host(ctx)?;
        }
        tensor.release_device();
        results.insert(name.clone(), tensor.into_data());
    }

    // drop device copies of any activations not consumed to exhaustion
    for slot in state.outputs.iter_mut() {
        if let Some(tensor) = slot {
            tensor.release_device();
        }
    }

    Ok(results)
}

/// Both directions of key-set equality between declared inputs and fed data,
/// checked before anything runs.
fn validate_input_keys(
    graph: &ModelGraph,
    inputs: &HashMap<String, Vec<f32>>,
) -> Result<(), InputValidationError> {
    let declared: HashSet<&str> = graph.input_names().iter().map(String::as_str).collect();
    for name in graph.input_names() {
        if !inputs.contains_key(name) {
            return Err(InputValidationError::MissingInput { name: name.clone() });
        }
    }
    for name in inputs.keys() {
        if !declared.contains(name.as_str()) {
            return Err(InputValidationError::UnexpectedInput { name: name.clone() });
        }
    }
    Ok(())
}

fn gather_inputs(
    index: &HashMap<&str, usize>,
    state: &mut RunState,
    node: &LayerNode,
    inputs: &mut HashMap<String, Vec<f32>>,
    device: Option<&DeviceContext>,
) -> ModelResult<Vec<Tensor>> {
    if node.inbound.is_empty() {
        // entry point: shape the fed data against the declared input shape
        let data = inputs.remove(&node.name).unwrap_or_default();
        let shape = node
            .layer
            .declared_shape()
            .map(<[usize]>::to_vec)
            .unwrap_or_else(|| vec![data.len()]);
        let actual = vec![data.len()];
        let tensor = Tensor::from_data(data, shape.clone()).map_err(|_| ShapeError::LayerInput {
            layer: node.name.clone(),
            expected: shape,
            actual,
        })?;
        return Ok(vec![tensor]);
    }

    // the copy decision was made once at build time from the DAG's fan-out
    let mut gathered = Vec::with_capacity(node.inbound.len());
    for parent_name in &node.inbound {
        let parent_idx = index[parent_name.as_str()];

        let tensor = if node.copy_before_call {
            let parent = state.outputs[parent_idx]
                .as_mut()
                .expect("parent evaluated before child in topological order");
            if let Some(ctx) = device {
                parent.sync_host(ctx)?;
            }
            let copy = parent.copy();
            state.remaining_consumers[parent_idx] -= 1;
            if state.remaining_consumers[parent_idx] == 0 {
                if let Some(mut spent) = state.outputs[parent_idx].take() {
                    spent.release_device();
                }
            }
            copy
        } else {
            state.remaining_consumers[parent_idx] -= 1;
            state.outputs[parent_idx]
                .take()
                .expect("parent evaluated before child in topological order")
        };
        gathered.push(tensor);
    }
    Ok(gathered)
}

fn run_node(
    node: &LayerNode,
    mut gathered: Vec<Tensor>,
    device: Option<&DeviceContext>,
) -> ModelResult<Tensor> {
    if let (Some(ctx), ExecutionStrategy::Device | ExecutionStrategy::DevicePipeline) =
        (device, node.strategy)
    {
        let pipeline = node.strategy == ExecutionStrategy::DevicePipeline;
        if let Some(output) = node.layer.call_device(ctx, &mut gathered, pipeline)? {
            release_all(&mut gathered);
            return Ok(output);
        }
        // shader unavailable: fall through to the host path
        for tensor in gathered.iter_mut() {
            tensor.sync_host(ctx)?;
        }
    } else if let Some(ctx) = device {
        for tensor in gathered.iter_mut() {
            tensor.sync_host(ctx)?;
        }
    }

    let output = if node.layer.is_merge() {
        node.layer.call_merge(&gathered)?
    } else {
        node.layer.call(&gathered[0])?
    };
    release_all(&mut gathered);
    Ok(output)
}

fn release_all(tensors: &mut [Tensor]) {
    for tensor in tensors {
        tensor.release_device();
    }
}

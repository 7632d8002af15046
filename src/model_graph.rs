//! Builds the executable layer graph from a parsed topology.
//!
//! Construction is fail-fast: unknown classes, dangling inbound references,
//! duplicate names, cycles, and weight-binding failures all surface as
//! errors before a graph is returned. The builder also decides, per node,
//! whether its inputs must be copied before the call (fan-out safety) and
//! which execution strategy `predict` should use.

use std::collections::{HashMap, VecDeque};

use tracing::debug;

use crate::device::DeviceContext;
use crate::errors::{ConfigurationError, ModelError};
use crate::layers::{create_layer, InputLayer, Layer};
use crate::model_config::{LayerDef, ModelClass, ModelTopology};
use crate::weight_store::WeightStore;

/// How the scheduler runs a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionStrategy {
    /// CPU execution on host buffers.
    Host,
    /// Device execution with the result read back immediately.
    Device,
    /// Device execution leaving the result resident; the host buffer stays
    /// stale until a host consumer or a terminal node forces readback.
    DevicePipeline,
}

pub struct LayerNode {
    pub name: String,
    pub layer: Box<dyn Layer>,
    pub inbound: Vec<String>,
    pub outbound: Vec<String>,
    /// Set when any parent fans out to multiple consumers; this node must
    /// operate on a copy so sibling consumers see the parent's output intact.
    pub copy_before_call: bool,
    pub strategy: ExecutionStrategy,
}

pub struct ModelGraph {
    nodes: Vec<LayerNode>,
    index: HashMap<String, usize>,
    input_names: Vec<String>,
    output_names: Vec<String>,
}

impl ModelGraph {
    pub fn build(
        topology: &ModelTopology,
        weights: &WeightStore,
        device: Option<&DeviceContext>,
        device_acceleration: bool,
    ) -> Result<Self, ModelError> {
        if topology.layers.is_empty() {
            return Err(ConfigurationError::EmptyLayerList.into());
        }

        let mut nodes = Vec::new();
        let mut index = HashMap::new();

        if topology.class == ModelClass::Sequential {
            Self::build_sequential_nodes(&topology.layers, &mut nodes, &mut index)?;
        } else {
            Self::build_graph_nodes(&topology.layers, &mut nodes, &mut index)?;
        }

        // inbound references must name existing nodes
        for node in &nodes {
            for inbound in &node.inbound {
                if !index.contains_key(inbound) {
                    return Err(ConfigurationError::UnknownInboundNode {
                        layer: node.name.clone(),
                        inbound: inbound.clone(),
                    }
                    .into());
                }
            }
        }

        // back-fill outbound edges
        let edges: Vec<(String, String)> = nodes
            .iter()
            .flat_map(|n| n.inbound.iter().map(|i| (i.clone(), n.name.clone())))
            .collect();
        for (parent, child) in edges {
            let parent_idx = index[&parent];
            nodes[parent_idx].outbound.push(child);
        }

        Self::check_acyclic(&nodes, &index)?;

        for node in &mut nodes {
            let params = node.layer.param_names().to_vec();
            if !params.is_empty() {
                let bound = weights.bind(&node.name, &params)?;
                node.layer.set_weights(bound)?;
            }
        }

        let input_names: Vec<String> = nodes
            .iter()
            .filter(|n| n.inbound.is_empty())
            .map(|n| n.name.clone())
            .collect();
        let output_names: Vec<String> = nodes
            .iter()
            .filter(|n| n.outbound.is_empty())
            .map(|n| n.name.clone())
            .collect();

        // a node copies its input when any parent fans out
        let fan_out: HashMap<String, bool> = nodes
            .iter()
            .map(|n| (n.name.clone(), n.outbound.len() > 1))
            .collect();
        for node in &mut nodes {
            node.copy_before_call = node.inbound.iter().any(|i| fan_out[i]);
        }

        let accelerate = device.is_some() && device_acceleration;
        for node in &mut nodes {
            node.strategy = if accelerate && node.layer.supports_device() {
                ExecutionStrategy::Device
            } else {
                ExecutionStrategy::Host
            };
        }
        let device_capable: HashMap<String, bool> = nodes
            .iter()
            .map(|n| (n.name.clone(), n.strategy != ExecutionStrategy::Host))
            .collect();
        for node in &mut nodes {
            if node.strategy == ExecutionStrategy::Device
                && !node.outbound.is_empty()
                && node.outbound.iter().all(|c| device_capable[c])
            {
                node.strategy = ExecutionStrategy::DevicePipeline;
            }
        }

        debug!(
            layers = nodes.len(),
            inputs = input_names.len(),
            outputs = output_names.len(),
            "layer graph constructed"
        );

        Ok(Self {
            nodes,
            index,
            input_names,
            output_names,
        })
    }

    fn build_graph_nodes(
        layers: &[LayerDef],
        nodes: &mut Vec<LayerNode>,
        index: &mut HashMap<String, usize>,
    ) -> Result<(), ConfigurationError> {
        for def in layers {
            let name = def
                .name()
                .ok_or(ConfigurationError::MissingLayerName)?
                .to_string();
            let layer = create_layer(&def.class_name, &def.config)?;
            Self::push_node(nodes, index, name, layer, def.inbound_names())?;
        }
        Ok(())
    }

    /// Sequential models list layers flat with no inbound references; each
    /// layer feeds the next, and an input node is synthesized from the first
    /// layer's declared input shape.
    fn build_sequential_nodes(
        layers: &[LayerDef],
        nodes: &mut Vec<LayerNode>,
        index: &mut HashMap<String, usize>,
    ) -> Result<(), ConfigurationError> {
        let first = &layers[0];
        let first_name = first
            .name()
            .ok_or(ConfigurationError::MissingLayerName)?
            .to_string();

        let mut previous = if first.class_name == "InputLayer" {
            None
        } else {
            let shape = Self::declared_input_shape(first).ok_or(
                ConfigurationError::MissingInputShape {
                    layer: first_name.clone(),
                },
            )?;
            let input_name = format!("{first_name}_input");
            Self::push_node(
                nodes,
                index,
                input_name.clone(),
                Box::new(InputLayer::new(input_name.clone(), shape)),
                Vec::new(),
            )?;
            Some(input_name)
        };

        for def in layers {
            let name = def
                .name()
                .ok_or(ConfigurationError::MissingLayerName)?
                .to_string();
            let layer = create_layer(&def.class_name, &def.config)?;
            let inbound = previous.iter().cloned().collect();
            Self::push_node(nodes, index, name.clone(), layer, inbound)?;
            previous = Some(name);
        }
        Ok(())
    }

    /// The input shape a layer config declares, batch dimension stripped.
    fn declared_input_shape(def: &LayerDef) -> Option<Vec<usize>> {
        if let Some(dims) = def.config.get("batch_input_shape").and_then(|v| v.as_array()) {
            return Some(
                dims.iter()
                    .filter_map(|d| d.as_u64().map(|d| d as usize))
                    .collect(),
            );
        }
        def.config
            .get("input_dim")
            .and_then(|v| v.as_u64())
            .map(|dim| vec![dim as usize])
    }

    fn push_node(
        nodes: &mut Vec<LayerNode>,
        index: &mut HashMap<String, usize>,
        name: String,
        layer: Box<dyn Layer>,
        inbound: Vec<String>,
    ) -> Result<(), ConfigurationError> {
        if index.contains_key(&name) {
            return Err(ConfigurationError::DuplicateLayerName { name });
        }
        index.insert(name.clone(), nodes.len());
        nodes.push(LayerNode {
            name,
            layer,
            inbound,
            outbound: Vec::new(),
            copy_before_call: false,
            strategy: ExecutionStrategy::Host,
        });
        Ok(())
    }

    fn check_acyclic(
        nodes: &[LayerNode],
        index: &HashMap<String, usize>,
    ) -> Result<(), ConfigurationError> {
        let mut in_degree: Vec<usize> = nodes.iter().map(|n| n.inbound.len()).collect();
        let mut queue: VecDeque<usize> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, &d)| d == 0)
            .map(|(i, _)| i)
            .collect();

        let mut visited = 0;
        while let Some(i) = queue.pop_front() {
            visited += 1;
            for child in &nodes[i].outbound {
                let child_idx = index[child];
                in_degree[child_idx] -= 1;
                if in_degree[child_idx] == 0 {
                    queue.push_back(child_idx);
                }
            }
        }

        if visited != nodes.len() {
            return Err(ConfigurationError::CyclicGraph);
        }
        Ok(())
    }

    /// Assembles a graph from pre-built nodes, deriving the name index and
    /// input/output sets. For unit tests that need custom layer impls.
    #[cfg(test)]
    pub(crate) fn from_nodes(nodes: Vec<LayerNode>) -> Self {
        let index = nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.name.clone(), i))
            .collect();
        let input_names = nodes
            .iter()
            .filter(|n| n.inbound.is_empty())
            .map(|n| n.name.clone())
            .collect();
        let output_names = nodes
            .iter()
            .filter(|n| n.outbound.is_empty())
            .map(|n| n.name.clone())
            .collect();
        Self {
            nodes,
            index,
            input_names,
            output_names,
        }
    }

    pub fn node(&self, name: &str) -> Option<&LayerNode> {
        self.index.get(name).map(|&i| &self.nodes[i])
    }

    pub fn nodes(&self) -> &[LayerNode] {
        &self.nodes
    }

    pub fn input_names(&self) -> &[String] {
        &self.input_names
    }

    pub fn output_names(&self) -> &[String] {
        &self.output_names
    }
}

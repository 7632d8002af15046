//! Data structures for the declarative model configuration.
//!
//! Covers the topology JSON (flat Sequential or graph-style Model layer
//! lists), the weights metadata array, and the per-layer attribute structs
//! deserialized from each layer's `config` value.

use serde::{Deserialize, Serialize};

/// Top-level model kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelClass {
    Sequential,
    Model,
}

/// One layer definition from the topology JSON.
///
/// `config` is kept as raw JSON and parsed per class by the layer registry,
/// since every layer class carries a different attribute set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerDef {
    pub class_name: String,
    pub config: serde_json::Value,
    /// Inbound references in the nested `[[["name", 0, 0], ...]]` form.
    #[serde(default)]
    pub inbound_nodes: Vec<Vec<(String, u32, u32)>>,
}

impl LayerDef {
    /// The layer's declared name, if present in its config.
    pub fn name(&self) -> Option<&str> {
        self.config.get("name").and_then(|v| v.as_str())
    }

    /// Flattens the first inbound-node group into plain layer names.
    pub fn inbound_names(&self) -> Vec<String> {
        self.inbound_nodes
            .first()
            .map(|group| group.iter().map(|(name, _, _)| name.clone()).collect())
            .unwrap_or_default()
    }
}

/// Parsed topology JSON: `{ "class": ..., "layers": [...] }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelTopology {
    pub class: ModelClass,
    pub layers: Vec<LayerDef>,
}

/// One entry of the weights metadata array. Offsets and lengths are element
/// counts into the flat little-endian f32 blob.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeightEntry {
    pub weight_name: String,
    pub offset: usize,
    pub length: usize,
    pub shape: Vec<usize>,
}

/// Attributes of an `InputLayer` definition. `batch_input_shape` carries a
/// leading batch dimension slot that is `null` in the config.
#[derive(Debug, Clone, Deserialize)]
pub struct InputLayerConfig {
    pub name: String,
    #[serde(default)]
    pub batch_input_shape: Option<Vec<Option<usize>>>,
}

impl InputLayerConfig {
    /// The declared shape with the batch dimension stripped.
    pub fn shape(&self) -> Option<Vec<usize>> {
        self.batch_input_shape
            .as_ref()
            .map(|dims| dims.iter().filter_map(|d| *d).collect())
    }
}

/// Attributes of a `Dense` layer definition.
#[derive(Debug, Clone, Deserialize)]
pub struct DenseConfig {
    pub name: String,
    pub units: usize,
    #[serde(default)]
    pub activation: Option<String>,
    #[serde(default)]
    pub use_bias: Option<bool>,
    #[serde(default)]
    pub input_dim: Option<usize>,
    #[serde(default)]
    pub batch_input_shape: Option<Vec<Option<usize>>>,
}

/// Attributes of a standalone `Activation` layer definition.
#[derive(Debug, Clone, Deserialize)]
pub struct ActivationConfig {
    pub name: String,
    pub activation: String,
}

/// Attributes shared by the merge-family layer definitions.
#[derive(Debug, Clone, Deserialize)]
pub struct MergeConfig {
    pub name: String,
    /// Concatenation axis; negative counts from the end. Defaults to -1.
    #[serde(default)]
    pub axis: Option<i64>,
}

/// Attributes of layers that carry only a name (e.g. `Flatten`).
#[derive(Debug, Clone, Deserialize)]
pub struct NamedConfig {
    pub name: String,
}

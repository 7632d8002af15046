//! Construction-time and top-level error types.

use thiserror::Error;

use super::{InputValidationError, ShapeError};
use crate::device::DeviceError;

/// Errors in the declarative model configuration detected while building the
/// layer graph.
#[derive(Error, Debug)]
pub enum ConfigurationError {
    #[error("Model configuration must declare at least one layer")]
    EmptyLayerList,

    #[error("Layer class {class} specified in the model configuration is not implemented")]
    UnknownLayerClass { class: String },

    #[error("Layer {layer} declares inbound node {inbound} which does not exist")]
    UnknownInboundNode { layer: String, inbound: String },

    #[error("Layer name {name} is declared more than once")]
    DuplicateLayerName { name: String },

    #[error("Layer graph contains a cycle")]
    CyclicGraph,

    #[error("Sequential model cannot infer the input shape from layer {layer}")]
    MissingInputShape { layer: String },

    #[error("Layer {layer} has an invalid configuration: {message}")]
    InvalidLayerConfig { layer: String, message: String },

    #[error("Layer configuration is missing the required name field")]
    MissingLayerName,

    #[error("Unknown activation function: {name}")]
    UnknownActivation { name: String },
}

/// Errors binding the raw weights blob to per-layer parameter tensors.
#[derive(Error, Debug)]
pub enum WeightBindingError {
    #[error("No weights metadata entry matches lookup key {key}")]
    NoMetadataMatch { key: String },

    #[error(
        "Weights entry {weight_name} covers elements [{offset}, {end}) but the blob holds only {blob_elements}"
    )]
    OutOfBounds {
        weight_name: String,
        offset: usize,
        end: usize,
        blob_elements: usize,
    },

    #[error(
        "Weights entry {weight_name} declares {length} elements but shape {shape:?} requires {expected}"
    )]
    ShapeMismatch {
        weight_name: String,
        length: usize,
        shape: Vec<usize>,
        expected: usize,
    },

    #[error("Weights blob byte length {bytes} is not a multiple of the f32 element size")]
    MisalignedBlob { bytes: usize },
}

/// Errors fetching or decoding model artifacts during construction.
#[derive(Error, Debug)]
pub enum DataLoadError {
    #[error("Failed to read {artifact} artifact: {message}")]
    Io { artifact: String, message: String },

    #[error("Model load was cancelled")]
    Cancelled,

    #[error("Malformed {artifact} artifact: {message}")]
    Malformed { artifact: String, message: String },
}

/// Top-level error type unifying all failure domains of the runtime.
///
/// Construction-time variants (`Configuration`, `WeightBinding`, `DataLoad`)
/// mean no model instance was produced. `InputValidation` and `Shape` surface
/// from `predict` before or during traversal. Shader compilation failures are
/// never propagated here; the device path degrades silently to the host
/// fallback for the affected operation.
#[derive(Error, Debug)]
pub enum ModelError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    WeightBinding(#[from] WeightBindingError),

    #[error(transparent)]
    DataLoad(#[from] DataLoadError),

    #[error(transparent)]
    InputValidation(#[from] InputValidationError),

    #[error(transparent)]
    Shape(#[from] ShapeError),

    #[error(transparent)]
    Device(#[from] DeviceError),
}

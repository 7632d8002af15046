//! Inference runtime for pre-trained models in a declarative graph format.
//!
//! A model is described by a topology JSON (a flat Sequential list or a
//! graph-style layer DAG), a binary weights blob, and a weights metadata
//! JSON. This library loads the three artifacts, builds a validated layer
//! graph, and runs dependency-ordered predictions on the host, optionally
//! accelerating supported layers on a compute device with transparent host
//! fallback.

pub mod activation;
pub mod data_source;
pub mod device;
pub mod errors;
pub mod layers;
pub mod model;
pub mod model_config;
pub mod model_graph;
pub mod scheduler;
pub mod tensor;
pub mod weight_store;

pub use activation::Activation;
pub use data_source::{
    ArtifactKind, BytesSource, CancelToken, DataSource, FileSource, LoadProgress, ModelArtifacts,
};
pub use device::DeviceContext;
pub use errors::{
    ConfigurationError, DataLoadError, InputValidationError, ModelError, ModelResult, ShapeError,
    WeightBindingError,
};
pub use model::{Model, ModelOptions};
pub use model_config::{ModelClass, ModelTopology, WeightEntry};
pub use tensor::{Dtype, Tensor};
pub use weight_store::WeightStore;

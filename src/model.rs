//! Top-level model API: artifact loading, construction, and prediction.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{info, warn};

use crate::data_source::{ArtifactKind, CancelToken, LoadProgress, ModelArtifacts};
use crate::device::DeviceContext;
use crate::errors::{DataLoadError, ModelResult};
use crate::model_config::{ModelTopology, WeightEntry};
use crate::model_graph::ModelGraph;
use crate::scheduler;
use crate::weight_store::WeightStore;

/// Behavior switches for a model instance.
#[derive(Debug, Clone, Default)]
pub struct ModelOptions {
    /// Run device-capable layers on the compute device when one is
    /// available. Falls back to host execution when no adapter is found or
    /// a shader fails to compile.
    pub device_acceleration: bool,
    /// Yield the thread between layer evaluations so co-scheduled work can
    /// interleave with a long traversal.
    pub cooperative_yield: bool,
}

impl ModelOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_device_acceleration(mut self, enabled: bool) -> Self {
        self.device_acceleration = enabled;
        self
    }

    pub fn with_cooperative_yield(mut self, enabled: bool) -> Self {
        self.cooperative_yield = enabled;
        self
    }
}

/// A loaded, ready-to-run model.
///
/// `predict` takes `&mut self`: a model instance runs one prediction at a
/// time. Concurrent serving uses one instance per worker.
pub struct Model {
    graph: ModelGraph,
    device: Option<Arc<DeviceContext>>,
    options: ModelOptions,
}

impl Model {
    /// Loads a model from its artifact trio with default progress and
    /// cancellation handling.
    pub fn load(artifacts: ModelArtifacts, options: ModelOptions) -> ModelResult<Self> {
        Self::load_with(artifacts, options, &LoadProgress::new(), &CancelToken::new())
    }

    /// Loads a model, reporting per-artifact progress and honoring
    /// cancellation between read chunks.
    pub fn load_with(
        artifacts: ModelArtifacts,
        options: ModelOptions,
        progress: &LoadProgress,
        cancel: &CancelToken,
    ) -> ModelResult<Self> {
        let (topology, store) = read_artifacts(artifacts, progress, cancel)?;
        Self::from_parts(&topology, &store, options)
    }

    /// Loads a model onto an existing device context, sharing its compiled
    /// program cache with every other model built on the same context.
    /// Device acceleration is implied by passing a context.
    pub fn load_with_device(
        artifacts: ModelArtifacts,
        options: ModelOptions,
        device: Arc<DeviceContext>,
    ) -> ModelResult<Self> {
        let (topology, store) =
            read_artifacts(artifacts, &LoadProgress::new(), &CancelToken::new())?;
        Self::assemble(&topology, &store, options, Some(device))
    }

    /// Builds a model from already-parsed artifacts.
    pub fn from_parts(
        topology: &ModelTopology,
        weights: &WeightStore,
        options: ModelOptions,
    ) -> ModelResult<Self> {
        let device = if options.device_acceleration {
            let ctx = DeviceContext::create();
            if ctx.is_none() {
                warn!("no compute device available; model will run on the host");
            }
            ctx
        } else {
            None
        };
        Self::assemble(topology, weights, options, device)
    }

    /// Builds a model from already-parsed artifacts on an existing device
    /// context, sharing its compiled program cache.
    pub fn from_parts_with_device(
        topology: &ModelTopology,
        weights: &WeightStore,
        options: ModelOptions,
        device: Arc<DeviceContext>,
    ) -> ModelResult<Self> {
        Self::assemble(topology, weights, options, Some(device))
    }

    fn assemble(
        topology: &ModelTopology,
        weights: &WeightStore,
        options: ModelOptions,
        device: Option<Arc<DeviceContext>>,
    ) -> ModelResult<Self> {
        let graph = ModelGraph::build(topology, weights, device.as_deref(), device.is_some())?;
        info!(
            inputs = graph.input_names().len(),
            outputs = graph.output_names().len(),
            layers = graph.nodes().len(),
            device = device.is_some(),
            "model ready"
        );
        Ok(Self {
            graph,
            device,
            options,
        })
    }

    /// Runs one prediction. `inputs` maps each declared input name to its
    /// flat data; the result maps each output layer name to its flat data.
    pub fn predict(
        &mut self,
        inputs: HashMap<String, Vec<f32>>,
    ) -> ModelResult<HashMap<String, Vec<f32>>> {
        scheduler::execute(
            &self.graph,
            inputs,
            self.device.as_deref(),
            self.options.cooperative_yield,
        )
    }

    pub fn input_names(&self) -> &[String] {
        self.graph.input_names()
    }

    pub fn output_names(&self) -> &[String] {
        self.graph.output_names()
    }

    pub fn graph(&self) -> &ModelGraph {
        &self.graph
    }
}

fn read_artifacts(
    mut artifacts: ModelArtifacts,
    progress: &LoadProgress,
    cancel: &CancelToken,
) -> ModelResult<(ModelTopology, WeightStore)> {
    let topology_bytes = artifacts
        .topology
        .read_all(&mut |f| progress.set(ArtifactKind::Topology, f), cancel)?;
    let weights_bytes = artifacts
        .weights
        .read_all(&mut |f| progress.set(ArtifactKind::Weights, f), cancel)?;
    let metadata_bytes = artifacts
        .metadata
        .read_all(&mut |f| progress.set(ArtifactKind::Metadata, f), cancel)?;

    let topology: ModelTopology = serde_json::from_slice(&topology_bytes)
        .map_err(|e| malformed(ArtifactKind::Topology, e))?;
    let metadata: Vec<WeightEntry> = serde_json::from_slice(&metadata_bytes)
        .map_err(|e| malformed(ArtifactKind::Metadata, e))?;
    let store = WeightStore::new(&weights_bytes, metadata)?;
    Ok((topology, store))
}

fn malformed(kind: ArtifactKind, error: serde_json::Error) -> DataLoadError {
    DataLoadError::Malformed {
        artifact: kind.label().to_string(),
        message: error.to_string(),
    }
}

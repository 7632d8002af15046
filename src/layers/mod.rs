//! Layer implementations and the class-name registry.

pub mod activation_layer;
pub mod dense;
pub mod flatten;
pub mod input_layer;
pub mod merge;

pub use activation_layer::ActivationLayer;
pub use dense::Dense;
pub use flatten::Flatten;
pub use input_layer::InputLayer;
pub use merge::{Merge, MergeMode};

use crate::device::DeviceContext;
use crate::errors::{ConfigurationError, ShapeError, ShapeResult};
use crate::tensor::Tensor;

/// A single graph node's computation.
///
/// Layers own their bound weights; the scheduler owns the activations that
/// flow between them. Single-input layers implement [`Layer::call`]; merge
/// layers implement [`Layer::call_merge`] and report `is_merge`.
pub trait Layer: Send + Sync {
    fn name(&self) -> &str;

    fn class_name(&self) -> &'static str;

    /// Ordered parameter names this layer binds from the weight store.
    fn param_names(&self) -> &[&'static str] {
        &[]
    }

    /// The input shape an entry-point layer declares; `None` for layers that
    /// infer their input shape from the data they receive.
    fn declared_shape(&self) -> Option<&[usize]> {
        None
    }

    /// Receives the tensors bound for [`Layer::param_names`], in order.
    fn set_weights(&mut self, _weights: Vec<Tensor>) -> Result<(), ShapeError> {
        Ok(())
    }

    fn call(&self, input: &Tensor) -> ShapeResult<Tensor>;

    fn is_merge(&self) -> bool {
        false
    }

    fn call_merge(&self, _inputs: &[Tensor]) -> ShapeResult<Tensor> {
        Err(ShapeError::NotMergeLayer {
            layer: self.name().to_string(),
        })
    }

    /// Whether this layer has a device implementation for its current
    /// configuration.
    fn supports_device(&self) -> bool {
        false
    }

    /// Device execution. `Ok(None)` means the device path is unavailable
    /// (shader disabled after a compile failure) and the caller should run
    /// the host path instead. When `pipeline` is set the result's host
    /// buffer is left stale for the next device consumer.
    fn call_device(
        &self,
        _ctx: &DeviceContext,
        _inputs: &mut [Tensor],
        _pipeline: bool,
    ) -> ShapeResult<Option<Tensor>> {
        Ok(None)
    }
}

/// Instantiates a layer from its serialized class name and config block.
pub fn create_layer(
    class_name: &str,
    config: &serde_json::Value,
) -> Result<Box<dyn Layer>, ConfigurationError> {
    match class_name {
        "InputLayer" => Ok(Box::new(InputLayer::from_config(config)?)),
        "Dense" => Ok(Box::new(Dense::from_config(config)?)),
        "Activation" => Ok(Box::new(ActivationLayer::from_config(config)?)),
        "Flatten" => Ok(Box::new(Flatten::from_config(config)?)),
        "Add" => Ok(Box::new(Merge::from_config(MergeMode::Add, config)?)),
        "Subtract" => Ok(Box::new(Merge::from_config(MergeMode::Subtract, config)?)),
        "Multiply" => Ok(Box::new(Merge::from_config(MergeMode::Multiply, config)?)),
        "Average" => Ok(Box::new(Merge::from_config(MergeMode::Average, config)?)),
        "Maximum" => Ok(Box::new(Merge::from_config(MergeMode::Maximum, config)?)),
        "Concatenate" => Ok(Box::new(Merge::from_config(MergeMode::Concatenate, config)?)),
        "Dot" => Ok(Box::new(Merge::from_config(MergeMode::Dot, config)?)),
        other => Err(ConfigurationError::UnknownLayerClass {
            class: other.to_string(),
        }),
    }
}

/// Shared helper for layer constructors: deserializes the config block into
/// the layer's typed config, attributing parse failures to the layer.
pub(crate) fn parse_config<T: serde::de::DeserializeOwned>(
    class_name: &str,
    config: &serde_json::Value,
) -> Result<T, ConfigurationError> {
    serde_json::from_value(config.clone()).map_err(|e| ConfigurationError::InvalidLayerConfig {
        layer: config
            .get("name")
            .and_then(|v| v.as_str())
            .unwrap_or(class_name)
            .to_string(),
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_create_layer_dispatches_by_class() {
        let dense = create_layer(
            "Dense",
            &json!({"name": "d", "units": 4, "activation": "relu"}),
        )
        .unwrap();
        assert_eq!(dense.class_name(), "Dense");
        assert_eq!(dense.param_names(), &["W", "b"]);

        let add = create_layer("Add", &json!({"name": "a"})).unwrap();
        assert!(add.is_merge());
    }

    #[test]
    fn test_create_layer_unknown_class() {
        assert!(matches!(
            create_layer("Conv2D", &json!({"name": "c"})),
            Err(ConfigurationError::UnknownLayerClass { class }) if class == "Conv2D"
        ));
    }

    #[test]
    fn test_create_layer_bad_config_names_layer() {
        let result = create_layer("Dense", &json!({"name": "d"}));
        assert!(matches!(
            result,
            Err(ConfigurationError::InvalidLayerConfig { layer, .. }) if layer == "d"
        ));
    }
}

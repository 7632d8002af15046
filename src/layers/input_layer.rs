//! Graph entry point. Validates that fed data matches the declared shape.

use crate::errors::{ConfigurationError, ShapeError, ShapeResult};
use crate::layers::{parse_config, Layer};
use crate::model_config::InputLayerConfig;
use crate::tensor::Tensor;

pub struct InputLayer {
    name: String,
    shape: Vec<usize>,
}

impl InputLayer {
    pub fn new(name: String, shape: Vec<usize>) -> Self {
        Self { name, shape }
    }

    pub fn from_config(config: &serde_json::Value) -> Result<Self, ConfigurationError> {
        let parsed: InputLayerConfig = parse_config("InputLayer", config)?;
        let shape = parsed
            .shape()
            .ok_or_else(|| ConfigurationError::MissingInputShape {
                layer: parsed.name.clone(),
            })?;
        Ok(Self::new(parsed.name, shape))
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }
}

impl Layer for InputLayer {
    fn name(&self) -> &str {
        &self.name
    }

    fn class_name(&self) -> &'static str {
        "InputLayer"
    }

    fn declared_shape(&self) -> Option<&[usize]> {
        Some(&self.shape)
    }

    fn call(&self, input: &Tensor) -> ShapeResult<Tensor> {
        if input.shape() != self.shape.as_slice() {
            return Err(ShapeError::LayerInput {
                layer: self.name.clone(),
                expected: self.shape.clone(),
                actual: input.shape().to_vec(),
            });
        }
        Ok(input.copy())
    }
}

//! Standalone activation layer: applies a named function elementwise.

use crate::activation::Activation;
use crate::errors::{ConfigurationError, ShapeResult};
use crate::layers::{parse_config, Layer};
use crate::model_config::ActivationConfig;
use crate::tensor::Tensor;

pub struct ActivationLayer {
    name: String,
    activation: Activation,
}

impl ActivationLayer {
    pub fn new(name: String, activation: Activation) -> Self {
        Self { name, activation }
    }

    pub fn from_config(config: &serde_json::Value) -> Result<Self, ConfigurationError> {
        let parsed: ActivationConfig = parse_config("Activation", config)?;
        let activation = Activation::from_name(&parsed.activation).ok_or(
            ConfigurationError::UnknownActivation {
                name: parsed.activation,
            },
        )?;
        Ok(Self::new(parsed.name, activation))
    }
}

impl Layer for ActivationLayer {
    fn name(&self) -> &str {
        &self.name
    }

    fn class_name(&self) -> &'static str {
        "Activation"
    }

    fn call(&self, input: &Tensor) -> ShapeResult<Tensor> {
        let mut out = input.copy();
        self.activation.apply_in_place(out.data_mut());
        Ok(out)
    }
}

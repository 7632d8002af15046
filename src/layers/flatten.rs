//! Collapses any input to rank 1, preserving row-major element order.

use crate::errors::{ConfigurationError, ShapeResult};
use crate::layers::{parse_config, Layer};
use crate::model_config::NamedConfig;
use crate::tensor::Tensor;

pub struct Flatten {
    name: String,
}

impl Flatten {
    pub fn new(name: String) -> Self {
        Self { name }
    }

    pub fn from_config(config: &serde_json::Value) -> Result<Self, ConfigurationError> {
        let parsed: NamedConfig = parse_config("Flatten", config)?;
        Ok(Self::new(parsed.name))
    }
}

impl Layer for Flatten {
    fn name(&self) -> &str {
        &self.name
    }

    fn class_name(&self) -> &'static str {
        "Flatten"
    }

    fn call(&self, input: &Tensor) -> ShapeResult<Tensor> {
        let len = input.len();
        Tensor::from_data(input.data().to_vec(), vec![len])
    }
}

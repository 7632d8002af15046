//! Fully connected layer over rank-1 inputs.
//!
//! Host path computes `y = activation(W^T x + b)` directly; the device path
//! runs the shared dense shader with the activation fused in, except for
//! softmax, which needs the full output vector and is applied host-side
//! after readback.

use std::sync::Mutex;

use tracing::warn;

use crate::activation::Activation;
use crate::device::shaders::{activation_code, DENSE_WGSL};
use crate::device::{DeviceContext, DeviceTensor};
use crate::errors::{ConfigurationError, ShapeError, ShapeResult};
use crate::layers::{parse_config, Layer};
use crate::model_config::DenseConfig;
use crate::tensor::{Dtype, Tensor};

const DENSE_PROGRAM: &str = "dense";

pub struct Dense {
    name: String,
    units: usize,
    activation: Activation,
    use_bias: bool,
    input_shape: Option<Vec<usize>>,
    /// `W` with shape `[input_dim, units]`, bound after construction.
    weights: Option<Tensor>,
    bias: Option<Tensor>,
    /// Device copies of `(W, b)`, uploaded on first device call.
    device_weights: Mutex<Option<(DeviceTensor, DeviceTensor)>>,
}

impl Dense {
    pub fn from_config(config: &serde_json::Value) -> Result<Self, ConfigurationError> {
        let parsed: DenseConfig = parse_config("Dense", config)?;
        let activation = match parsed.activation.as_deref() {
            None => Activation::Linear,
            Some(name) => Activation::from_name(name).ok_or(
                ConfigurationError::UnknownActivation {
                    name: name.to_string(),
                },
            )?,
        };
        let input_shape = parsed
            .batch_input_shape
            .as_ref()
            .map(|dims| dims.iter().filter_map(|d| *d).collect())
            .or_else(|| parsed.input_dim.map(|dim| vec![dim]));
        Ok(Self {
            name: parsed.name,
            units: parsed.units,
            activation,
            use_bias: parsed.use_bias.unwrap_or(true),
            input_shape,
            weights: None,
            bias: None,
            device_weights: Mutex::new(None),
        })
    }

    /// The input shape declared in the config, used by Sequential models to
    /// synthesize the input node.
    pub fn input_shape(&self) -> Option<&[usize]> {
        self.input_shape.as_deref()
    }

    fn bound_weights(&self) -> ShapeResult<(&Tensor, &Tensor)> {
        match (&self.weights, &self.bias) {
            (Some(w), Some(b)) => Ok((w, b)),
            _ => Err(ShapeError::MissingWeights {
                layer: self.name.clone(),
            }),
        }
    }

    fn check_input(&self, input: &Tensor, input_dim: usize) -> ShapeResult<()> {
        if input.shape().len() != 1 || input.len() != input_dim {
            return Err(ShapeError::LayerInput {
                layer: self.name.clone(),
                expected: vec![input_dim],
                actual: input.shape().to_vec(),
            });
        }
        Ok(())
    }
}

impl Layer for Dense {
    fn name(&self) -> &str {
        &self.name
    }

    fn class_name(&self) -> &'static str {
        "Dense"
    }

    fn param_names(&self) -> &[&'static str] {
        if self.use_bias {
            &["W", "b"]
        } else {
            &["W"]
        }
    }

    fn set_weights(&mut self, weights: Vec<Tensor>) -> Result<(), ShapeError> {
        let mut weights = weights.into_iter();
        let w = weights.next().ok_or(ShapeError::MissingWeights {
            layer: self.name.clone(),
        })?;
        if w.shape().len() != 2 || w.shape()[1] != self.units {
            return Err(ShapeError::WeightShape {
                layer: self.name.clone(),
                weight: "W".to_string(),
                expected: vec![w.shape().first().copied().unwrap_or(0), self.units],
                actual: w.shape().to_vec(),
            });
        }
        let b = match weights.next() {
            Some(b) => {
                if b.shape() != [self.units] {
                    return Err(ShapeError::WeightShape {
                        layer: self.name.clone(),
                        weight: "b".to_string(),
                        expected: vec![self.units],
                        actual: b.shape().to_vec(),
                    });
                }
                b
            }
            None => Tensor::zeros(vec![self.units], Dtype::Float32),
        };
        self.weights = Some(w);
        self.bias = Some(b);
        Ok(())
    }

    fn call(&self, input: &Tensor) -> ShapeResult<Tensor> {
        let (w, b) = self.bound_weights()?;
        let input_dim = w.shape()[0];
        self.check_input(input, input_dim)?;

        let x = input.data();
        let wd = w.data();
        let mut out = b.data().to_vec();
        for (k, &xk) in x.iter().enumerate() {
            let row = &wd[k * self.units..(k + 1) * self.units];
            for (o, &wkj) in out.iter_mut().zip(row) {
                *o += wkj * xk;
            }
        }
        self.activation.apply_in_place(&mut out);
        Tensor::from_data(out, vec![self.units])
    }

    fn supports_device(&self) -> bool {
        true
    }

    fn call_device(
        &self,
        ctx: &DeviceContext,
        inputs: &mut [Tensor],
        pipeline: bool,
    ) -> ShapeResult<Option<Tensor>> {
        let (w, b) = self.bound_weights()?;
        let input_dim = w.shape()[0];
        let input = &mut inputs[0];
        self.check_input(input, input_dim)?;

        let program = match ctx.compile_program(DENSE_PROGRAM, DENSE_WGSL) {
            Ok(program) => program,
            Err(_) => return Ok(None),
        };

        {
            let mut cached = self.device_weights.lock().unwrap();
            if cached.is_none() {
                *cached = Some((
                    ctx.upload(w.data(), input_dim, self.units),
                    ctx.upload(b.data(), 1, self.units),
                ));
            }
        }

        input.ensure_device(ctx)?;
        let output = ctx.alloc_output(1, self.units);
        {
            let cached = self.device_weights.lock().unwrap();
            let (w_dev, b_dev) = cached.as_ref().unwrap();
            let input_dev = input.device_tensor().unwrap();
            let fused = activation_code(self.activation).unwrap_or(0);
            ctx.run_program(
                &program,
                &output,
                &[input_dev, w_dev, b_dev],
                &[input_dim as u32, self.units as u32, fused, 0],
            );
        }

        let mut result = Tensor::from_device(vec![self.units], Dtype::Float32, output);
        if activation_code(self.activation).is_none() {
            // softmax runs host-side over the full vector
            if let Err(error) = result.sync_host(ctx) {
                warn!(layer = %self.name, %error, "device readback failed; falling back to host execution");
                result.release_device();
                return Ok(None);
            }
            self.activation.apply_in_place(result.data_mut());
            result.release_device();
        } else if !pipeline {
            if let Err(error) = result.sync_host(ctx) {
                warn!(layer = %self.name, %error, "device readback failed; falling back to host execution");
                result.release_device();
                return Ok(None);
            }
        }
        Ok(Some(result))
    }
}

//! Activation functions applied by layer kernels.
//!
//! The set mirrors the activations declarable in model configurations. Each
//! function is implemented with numerical stability in mind; softmax operates
//! on whole vectors, everything else is element-wise.

use serde::{Deserialize, Serialize};

/// Represents the type of activation function to be applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    /// Identity: f(x) = x.
    Linear,
    /// Rectified Linear Unit: f(x) = max(0, x).
    Relu,
    /// Sigmoid: f(x) = 1 / (1 + exp(-x)).
    Sigmoid,
    /// Hyperbolic tangent: f(x) = tanh(x).
    Tanh,
    /// Numerically stable softmax across the whole vector:
    /// softmax(x_i) = exp(x_i - max(x)) / sum_j exp(x_j - max(x)).
    Softmax,
    /// Softplus: f(x) = ln(1 + exp(x)).
    Softplus,
    /// Softsign: f(x) = x / (1 + |x|).
    Softsign,
    /// Piecewise linear sigmoid approximation: clamp(0.2x + 0.5, 0, 1).
    HardSigmoid,
}

impl Activation {
    /// Get activation by its configuration name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "linear" => Some(Activation::Linear),
            "relu" => Some(Activation::Relu),
            "sigmoid" => Some(Activation::Sigmoid),
            "tanh" => Some(Activation::Tanh),
            "softmax" => Some(Activation::Softmax),
            "softplus" => Some(Activation::Softplus),
            "softsign" => Some(Activation::Softsign),
            "hard_sigmoid" => Some(Activation::HardSigmoid),
            _ => None,
        }
    }

    /// Apply the activation function to a single value.
    ///
    /// Softmax is a vector operation and is only meaningful through
    /// [`Activation::apply_in_place`].
    pub fn apply_single(self, x: f32) -> f32 {
        match self {
            Activation::Linear => x,
            Activation::Relu => x.max(0.0),
            Activation::Sigmoid => 1.0 / (1.0 + (-x).exp()),
            Activation::Tanh => x.tanh(),
            Activation::Softplus => x.exp().ln_1p(),
            Activation::Softsign => x / (1.0 + x.abs()),
            Activation::HardSigmoid => (0.2 * x + 0.5).clamp(0.0, 1.0),
            Activation::Softmax => x.exp(),
        }
    }

    /// Apply the activation function to a slice of values in place.
    pub fn apply_in_place(self, values: &mut [f32]) {
        match self {
            Activation::Linear => {}
            Activation::Softmax => {
                let max_val = values.iter().fold(f32::NEG_INFINITY, |a, &b| a.max(b));
                let mut sum = 0.0f32;
                for val in values.iter_mut() {
                    *val = (*val - max_val).exp();
                    sum += *val;
                }
                for val in values.iter_mut() {
                    *val /= sum;
                }
            }
            _ => {
                for val in values.iter_mut() {
                    *val = self.apply_single(*val);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DELTA: f32 = 0.00005;

    #[test]
    fn test_relu() {
        assert!((Activation::Relu.apply_single(1.0) - 1.0).abs() < DELTA);
        assert!((Activation::Relu.apply_single(-1.0) - 0.0).abs() < DELTA);
    }

    #[test]
    fn test_sigmoid() {
        assert!((Activation::Sigmoid.apply_single(0.0) - 0.5).abs() < DELTA);
        assert!((Activation::Sigmoid.apply_single(1.0) - 0.7311).abs() < DELTA);
    }

    #[test]
    fn test_softmax() {
        let mut values = [1.0, 2.0, 3.0];
        Activation::Softmax.apply_in_place(&mut values);

        assert!((values[0] - 0.09003057).abs() < DELTA);
        assert!((values[1] - 0.24472847).abs() < DELTA);
        assert!((values[2] - 0.66524096).abs() < DELTA);
    }

    #[test]
    fn test_softsign() {
        assert!((Activation::Softsign.apply_single(1.0) - 0.5).abs() < DELTA);
        assert!((Activation::Softsign.apply_single(-1.0) + 0.5).abs() < DELTA);
    }

    #[test]
    fn test_hard_sigmoid_saturates() {
        assert!((Activation::HardSigmoid.apply_single(10.0) - 1.0).abs() < DELTA);
        assert!((Activation::HardSigmoid.apply_single(-10.0) - 0.0).abs() < DELTA);
        assert!((Activation::HardSigmoid.apply_single(0.0) - 0.5).abs() < DELTA);
    }

    #[test]
    fn test_linear_leaves_values_untouched() {
        let mut values = [1.5, -2.0, 0.0];
        Activation::Linear.apply_in_place(&mut values);
        assert_eq!(values, [1.5, -2.0, 0.0]);
    }

    #[test]
    fn test_from_name() {
        assert_eq!(Activation::from_name("relu"), Some(Activation::Relu));
        assert_eq!(
            Activation::from_name("hard_sigmoid"),
            Some(Activation::HardSigmoid)
        );
        assert_eq!(Activation::from_name("swish"), None);
    }
}

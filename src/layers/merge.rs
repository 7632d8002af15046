//! Multi-input merge layers: elementwise combiners, concatenation, and dot.

use tracing::warn;

use crate::device::shaders::merge_wgsl;
use crate::device::DeviceContext;
use crate::errors::{ConfigurationError, ShapeError, ShapeResult};
use crate::layers::{parse_config, Layer};
use crate::model_config::MergeConfig;
use crate::tensor::{Dtype, Tensor};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeMode {
    Add,
    Subtract,
    Multiply,
    Average,
    Maximum,
    Concatenate,
    Dot,
}

impl MergeMode {
    fn class_name(self) -> &'static str {
        match self {
            MergeMode::Add => "Add",
            MergeMode::Subtract => "Subtract",
            MergeMode::Multiply => "Multiply",
            MergeMode::Average => "Average",
            MergeMode::Maximum => "Maximum",
            MergeMode::Concatenate => "Concatenate",
            MergeMode::Dot => "Dot",
        }
    }

    /// The shader op keyword, for modes with an elementwise device kernel.
    fn device_op(self) -> Option<&'static str> {
        match self {
            MergeMode::Add => Some("add"),
            MergeMode::Subtract => Some("subtract"),
            MergeMode::Multiply => Some("multiply"),
            MergeMode::Average => Some("average"),
            MergeMode::Maximum => Some("maximum"),
            MergeMode::Concatenate | MergeMode::Dot => None,
        }
    }
}

pub struct Merge {
    name: String,
    mode: MergeMode,
    concat_axis: i64,
}

impl Merge {
    pub fn from_config(mode: MergeMode, config: &serde_json::Value) -> Result<Self, ConfigurationError> {
        let parsed: MergeConfig = parse_config(mode.class_name(), config)?;
        Ok(Self {
            name: parsed.name,
            mode,
            concat_axis: parsed.axis.unwrap_or(-1),
        })
    }

    fn check_arity(&self, inputs: &[Tensor]) -> ShapeResult<()> {
        if inputs.len() < 2 || (self.mode == MergeMode::Dot && inputs.len() != 2) {
            return Err(ShapeError::MergeArity {
                layer: self.name.clone(),
                expected: 2,
                actual: inputs.len(),
            });
        }
        Ok(())
    }

    fn check_same_shapes(&self, inputs: &[Tensor]) -> ShapeResult<()> {
        let first = inputs[0].shape();
        for other in &inputs[1..] {
            if other.shape() != first {
                return Err(ShapeError::MergeInputMismatch {
                    layer: self.name.clone(),
                    first: first.to_vec(),
                    other: other.shape().to_vec(),
                });
            }
        }
        Ok(())
    }

    fn elementwise(&self, inputs: &[Tensor]) -> ShapeResult<Tensor> {
        self.check_same_shapes(inputs)?;
        let mut out = inputs[0].data().to_vec();
        for input in &inputs[1..] {
            for (o, &v) in out.iter_mut().zip(input.data()) {
                match self.mode {
                    MergeMode::Add | MergeMode::Average => *o += v,
                    MergeMode::Subtract => *o -= v,
                    MergeMode::Multiply => *o *= v,
                    MergeMode::Maximum => *o = o.max(v),
                    MergeMode::Concatenate | MergeMode::Dot => unreachable!(),
                }
            }
        }
        if self.mode == MergeMode::Average {
            let n = inputs.len() as f32;
            for o in &mut out {
                *o /= n;
            }
        }
        Tensor::from_data(out, inputs[0].shape().to_vec())
    }

    fn concatenate(&self, inputs: &[Tensor]) -> ShapeResult<Tensor> {
        let first = inputs[0].shape();
        let rank = first.len();
        let resolved = if self.concat_axis < 0 {
            rank as i64 + self.concat_axis
        } else {
            self.concat_axis
        };
        if resolved < 0 || resolved >= rank as i64 {
            return Err(ShapeError::ConcatAxisOutOfRange {
                axis: self.concat_axis,
                rank,
            });
        }
        let axis = resolved as usize;

        let mut out_shape = first.to_vec();
        for other in &inputs[1..] {
            let shape = other.shape();
            let compatible = shape.len() == rank
                && shape
                    .iter()
                    .enumerate()
                    .all(|(i, &d)| i == axis || d == first[i]);
            if !compatible {
                return Err(ShapeError::MergeInputMismatch {
                    layer: self.name.clone(),
                    first: first.to_vec(),
                    other: shape.to_vec(),
                });
            }
            out_shape[axis] += shape[axis];
        }

        // outer = product of axes before `axis`, inner = product after
        let outer: usize = first[..axis].iter().product();
        let inner: usize = first[axis + 1..].iter().product();
        let mut out = Vec::with_capacity(out_shape.iter().product());
        for block in 0..outer {
            for input in inputs {
                let span = input.shape()[axis] * inner;
                let start = block * span;
                out.extend_from_slice(&input.data()[start..start + span]);
            }
        }
        Tensor::from_data(out, out_shape)
    }

    fn dot(&self, inputs: &[Tensor]) -> ShapeResult<Tensor> {
        let (a, b) = (&inputs[0], &inputs[1]);
        match (a.shape().len(), b.shape().len()) {
            (1, 1) => {
                if a.len() != b.len() {
                    return Err(ShapeError::MergeInputMismatch {
                        layer: self.name.clone(),
                        first: a.shape().to_vec(),
                        other: b.shape().to_vec(),
                    });
                }
                let sum = a.data().iter().zip(b.data()).map(|(x, y)| x * y).sum();
                Tensor::from_data(vec![sum], vec![1])
            }
            (2, 2) => {
                // [m, n] . [p, n] -> [m, p], contracting the shared last axis
                let (m, n) = (a.shape()[0], a.shape()[1]);
                let (p, n2) = (b.shape()[0], b.shape()[1]);
                if n != n2 {
                    return Err(ShapeError::MergeInputMismatch {
                        layer: self.name.clone(),
                        first: a.shape().to_vec(),
                        other: b.shape().to_vec(),
                    });
                }
                let mut out = vec![0.0; m * p];
                for i in 0..m {
                    for j in 0..p {
                        let row_a = &a.data()[i * n..(i + 1) * n];
                        let row_b = &b.data()[j * n..(j + 1) * n];
                        out[i * p + j] = row_a.iter().zip(row_b).map(|(x, y)| x * y).sum();
                    }
                }
                Tensor::from_data(out, vec![m, p])
            }
            _ => Err(ShapeError::MergeInputMismatch {
                layer: self.name.clone(),
                first: a.shape().to_vec(),
                other: b.shape().to_vec(),
            }),
        }
    }
}

impl Layer for Merge {
    fn name(&self) -> &str {
        &self.name
    }

    fn class_name(&self) -> &'static str {
        self.mode.class_name()
    }

    fn call(&self, _input: &Tensor) -> ShapeResult<Tensor> {
        Err(ShapeError::MergeArity {
            layer: self.name.clone(),
            expected: 2,
            actual: 1,
        })
    }

    fn is_merge(&self) -> bool {
        true
    }

    fn call_merge(&self, inputs: &[Tensor]) -> ShapeResult<Tensor> {
        self.check_arity(inputs)?;
        match self.mode {
            MergeMode::Concatenate => self.concatenate(inputs),
            MergeMode::Dot => self.dot(inputs),
            _ => self.elementwise(inputs),
        }
    }

    fn supports_device(&self) -> bool {
        self.mode.device_op().is_some()
    }

    fn call_device(
        &self,
        ctx: &DeviceContext,
        inputs: &mut [Tensor],
        pipeline: bool,
    ) -> ShapeResult<Option<Tensor>> {
        let op = match self.mode.device_op() {
            Some(op) => op,
            None => return Ok(None),
        };
        self.check_arity(inputs)?;
        self.check_same_shapes(inputs)?;

        let key = format!("merge_{}_{}", op, inputs.len());
        let source = merge_wgsl(op, inputs.len());
        let program = match ctx.compile_program(&key, &source) {
            Ok(program) => program,
            Err(_) => return Ok(None),
        };

        for input in inputs.iter_mut() {
            input.ensure_device(ctx)?;
        }
        let shape = inputs[0].shape().to_vec();
        let size = inputs[0].len();
        let device_inputs: Vec<_> = inputs
            .iter()
            .filter_map(|t| t.device_tensor())
            .collect();

        let rows = device_inputs[0].rows();
        let cols = device_inputs[0].cols();
        let output = ctx.alloc_output(rows, cols);
        ctx.run_program(&program, &output, &device_inputs, &[size as u32, 0, 0, 0]);

        let mut result = Tensor::from_device(shape, Dtype::Float32, output);
        if !pipeline {
            if let Err(error) = result.sync_host(ctx) {
                warn!(layer = %self.name, %error, "device readback failed; falling back to host execution");
                result.release_device();
                return Ok(None);
            }
        }
        Ok(Some(result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn merge(mode: MergeMode) -> Merge {
        Merge::from_config(mode, &json!({"name": "merge_1"})).unwrap()
    }

    fn t(data: Vec<f32>, shape: Vec<usize>) -> Tensor {
        Tensor::from_data(data, shape).unwrap()
    }

    #[test]
    fn test_add_and_average() {
        let inputs = [t(vec![1.0, 2.0], vec![2]), t(vec![3.0, 4.0], vec![2])];
        assert_eq!(
            merge(MergeMode::Add).call_merge(&inputs).unwrap().data(),
            &[4.0, 6.0]
        );
        assert_eq!(
            merge(MergeMode::Average).call_merge(&inputs).unwrap().data(),
            &[2.0, 3.0]
        );
    }

    #[test]
    fn test_subtract_multiply_maximum() {
        let inputs = [t(vec![5.0, 2.0], vec![2]), t(vec![3.0, 4.0], vec![2])];
        assert_eq!(
            merge(MergeMode::Subtract).call_merge(&inputs).unwrap().data(),
            &[2.0, -2.0]
        );
        assert_eq!(
            merge(MergeMode::Multiply).call_merge(&inputs).unwrap().data(),
            &[15.0, 8.0]
        );
        assert_eq!(
            merge(MergeMode::Maximum).call_merge(&inputs).unwrap().data(),
            &[5.0, 4.0]
        );
    }

    #[test]
    fn test_arity_below_two_rejected() {
        let result = merge(MergeMode::Add).call_merge(&[t(vec![1.0], vec![1])]);
        assert!(matches!(
            result,
            Err(ShapeError::MergeArity { expected: 2, actual: 1, .. })
        ));
    }

    #[test]
    fn test_elementwise_shape_mismatch() {
        let result = merge(MergeMode::Add).call_merge(&[
            t(vec![1.0, 2.0], vec![2]),
            t(vec![1.0, 2.0, 3.0], vec![3]),
        ]);
        assert!(matches!(
            result,
            Err(ShapeError::MergeInputMismatch { first, other, .. })
                if first == vec![2] && other == vec![3]
        ));
    }

    #[test]
    fn test_concatenate_last_axis() {
        let out = merge(MergeMode::Concatenate)
            .call_merge(&[
                t(vec![1.0, 2.0, 3.0, 4.0], vec![2, 2]),
                t(vec![5.0, 6.0], vec![2, 1]),
            ])
            .unwrap();
        assert_eq!(out.shape(), &[2, 3]);
        assert_eq!(out.data(), &[1.0, 2.0, 5.0, 3.0, 4.0, 6.0]);
    }

    #[test]
    fn test_concatenate_first_axis() {
        let layer = Merge::from_config(
            MergeMode::Concatenate,
            &json!({"name": "merge_1", "axis": 0}),
        )
        .unwrap();
        let out = layer
            .call_merge(&[
                t(vec![1.0, 2.0], vec![1, 2]),
                t(vec![3.0, 4.0], vec![1, 2]),
            ])
            .unwrap();
        assert_eq!(out.shape(), &[2, 2]);
        assert_eq!(out.data(), &[1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_dot_vectors() {
        let out = merge(MergeMode::Dot)
            .call_merge(&[t(vec![1.0, 2.0, 3.0], vec![3]), t(vec![4.0, 5.0, 6.0], vec![3])])
            .unwrap();
        assert_eq!(out.shape(), &[1]);
        assert_eq!(out.data(), &[32.0]);
    }

    #[test]
    fn test_dot_matrices_contract_last_axis() {
        let out = merge(MergeMode::Dot)
            .call_merge(&[
                t(vec![1.0, 0.0, 0.0, 1.0], vec![2, 2]),
                t(vec![1.0, 2.0, 3.0, 4.0], vec![2, 2]),
            ])
            .unwrap();
        assert_eq!(out.shape(), &[2, 2]);
        assert_eq!(out.data(), &[1.0, 3.0, 2.0, 4.0]);
    }

    #[test]
    fn test_dot_requires_exactly_two() {
        let inputs = [
            t(vec![1.0], vec![1]),
            t(vec![1.0], vec![1]),
            t(vec![1.0], vec![1]),
        ];
        assert!(matches!(
            merge(MergeMode::Dot).call_merge(&inputs),
            Err(ShapeError::MergeArity { .. })
        ));
    }

    #[test]
    fn test_single_input_call_rejected() {
        let result = merge(MergeMode::Add).call(&t(vec![1.0], vec![1]));
        assert!(matches!(result, Err(ShapeError::MergeArity { .. })));
    }
}

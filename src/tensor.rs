//! Host/device dual-representation tensor.
//!
//! A [`Tensor`] always owns a host buffer whose length equals the product of
//! its shape. It may additionally carry a device-resident copy, and tiling
//! metadata when it is in the 2-D tiled layout the device substrate requires
//! for tensors beyond rank 3.

use crate::device::{DeviceContext, DeviceResult, DeviceTensor};
use crate::errors::{ShapeError, ShapeResult};

/// Element type tag. Storage is uniformly `f32`; `Int32` marks tensors whose
/// values are integral indices (e.g. embedding index maps).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Dtype {
    #[default]
    Float32,
    Int32,
}

/// Dual-representation numeric buffer with tiling support.
#[derive(Debug, Default)]
pub struct Tensor {
    data: Vec<f32>,
    shape: Vec<usize>,
    dtype: Dtype,
    device: Option<DeviceTensor>,
    untiled_shape: Option<Vec<usize>>,
    tile_axis: usize,
    host_stale: bool,
}

impl Tensor {
    /// Zero-initialized tensor of the given shape.
    pub fn zeros(shape: Vec<usize>, dtype: Dtype) -> Self {
        let len = shape.iter().product();
        Self {
            data: vec![0.0; len],
            shape,
            dtype,
            ..Default::default()
        }
    }

    /// Tensor over an owned host buffer. Fails when the buffer length does
    /// not equal the product of the shape.
    pub fn from_data(data: Vec<f32>, shape: Vec<usize>) -> ShapeResult<Self> {
        let expected: usize = shape.iter().product();
        if data.len() != expected {
            return Err(ShapeError::DataLengthMismatch {
                shape,
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            data,
            shape,
            ..Default::default()
        })
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn dtype(&self) -> Dtype {
        self.dtype
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    /// Consumes the tensor, returning its host buffer.
    pub fn into_data(mut self) -> Vec<f32> {
        self.release_device();
        self.data
    }

    /// The original shape recorded by `to_tiled`, if any.
    pub fn untiled_shape(&self) -> Option<&[usize]> {
        self.untiled_shape.as_deref()
    }

    pub fn is_device_resident(&self) -> bool {
        self.device.is_some()
    }

    pub(crate) fn device_tensor(&self) -> Option<&DeviceTensor> {
        self.device.as_ref()
    }

    /// Defensive duplicate of the host value. The device handle is not
    /// duplicated; the copy starts host-only. The host buffer must be
    /// current (see [`Tensor::sync_host`]).
    pub fn copy(&self) -> Self {
        debug_assert!(!self.host_stale, "copy of a stale device-resident tensor");
        Self {
            data: self.data.clone(),
            shape: self.shape.clone(),
            dtype: self.dtype,
            device: None,
            untiled_shape: self.untiled_shape.clone(),
            tile_axis: self.tile_axis,
            host_stale: false,
        }
    }

    /// Reshapes into the 2-D tiled layout `[rows, tile_axis_len]` with the
    /// default tile axis (the last axis), recording the original shape.
    pub fn to_tiled(&self) -> ShapeResult<Self> {
        let axis = self.shape.len().saturating_sub(1);
        self.to_tiled_axis(axis)
    }

    /// Reshapes into the 2-D tiled layout along `tile_axis`: every other axis
    /// is flattened, in order, into the row axis. A pure data permutation;
    /// `from_tiled` reverses it bit-exactly.
    pub fn to_tiled_axis(&self, tile_axis: usize) -> ShapeResult<Self> {
        let rank = self.shape.len();
        if rank == 0 || tile_axis >= rank {
            return Err(ShapeError::TileAxisOutOfRange {
                axis: tile_axis,
                rank,
            });
        }

        let cols = self.shape[tile_axis];
        let rows: usize = self
            .shape
            .iter()
            .enumerate()
            .filter(|&(i, _)| i != tile_axis)
            .map(|(_, &d)| d)
            .product();

        let data = if tile_axis == rank - 1 {
            // row-major contiguity: the flattened layout is already [rows, cols]
            self.data.clone()
        } else {
            permute_tiled(&self.data, &self.shape, tile_axis, cols, Direction::Tile)
        };

        Ok(Self {
            data,
            shape: vec![rows, cols],
            dtype: self.dtype,
            device: None,
            untiled_shape: Some(self.shape.clone()),
            tile_axis,
            host_stale: false,
        })
    }

    /// Exact inverse of `to_tiled`. Fails when the tensor carries no tiling
    /// metadata.
    pub fn from_tiled(&self) -> ShapeResult<Self> {
        let target = self.untiled_shape.clone().ok_or(ShapeError::NotTiled)?;
        let rank = target.len();
        let cols = target[self.tile_axis];

        let data = if self.tile_axis == rank - 1 {
            self.data.clone()
        } else {
            permute_tiled(&self.data, &target, self.tile_axis, cols, Direction::Untile)
        };

        Ok(Self {
            data,
            shape: target,
            dtype: self.dtype,
            ..Default::default()
        })
    }

    /// Uploads the host buffer to the device, returning a new tensor that
    /// carries the device handle. Tensors beyond rank 3 must be tiled first.
    pub fn to_device(mut self, ctx: &DeviceContext) -> ShapeResult<Self> {
        self.ensure_device(ctx)?;
        Ok(self)
    }

    /// The 2-D layout used for device storage.
    fn device_layout(&self) -> ShapeResult<(usize, usize)> {
        match self.shape.len() {
            0 | 1 => Ok((1, self.len())),
            2 => Ok((self.shape[0], self.shape[1])),
            3 => Ok((self.shape[0] * self.shape[1], self.shape[2])),
            _ if self.untiled_shape.is_some() => Ok((self.shape[0], self.shape[1])),
            _ => Err(ShapeError::RankUnsupportedOnDevice {
                shape: self.shape.clone(),
            }),
        }
    }

    /// Attaches a device copy in place, reusing an existing one if present.
    pub(crate) fn ensure_device(&mut self, ctx: &DeviceContext) -> ShapeResult<()> {
        if self.device.is_some() {
            return Ok(());
        }
        let (rows, cols) = self.device_layout()?;
        self.device = Some(ctx.upload(&self.data, rows, cols));
        Ok(())
    }

    /// Wraps a freshly produced device result; the host buffer is allocated
    /// but stale until [`Tensor::sync_host`] runs.
    pub(crate) fn from_device(shape: Vec<usize>, dtype: Dtype, device: DeviceTensor) -> Self {
        let len = shape.iter().product();
        Self {
            data: vec![0.0; len],
            shape,
            dtype,
            device: Some(device),
            untiled_shape: None,
            tile_axis: 0,
            host_stale: true,
        }
    }

    /// Blocking readback of a stale host buffer from the device copy.
    pub(crate) fn sync_host(&mut self, ctx: &DeviceContext) -> DeviceResult<()> {
        if !self.host_stale {
            return Ok(());
        }
        if let Some(device) = &self.device {
            self.data = ctx.read_data(device)?;
            self.host_stale = false;
        }
        Ok(())
    }

    /// Explicit device-memory teardown. Must be called before a tensor
    /// holding a device handle is discarded; device memory is not garbage
    /// collected.
    pub fn release_device(&mut self) {
        if let Some(device) = self.device.take() {
            device.destroy();
        }
    }
}

enum Direction {
    Tile,
    Untile,
}

/// Gather/scatter between the natural row-major layout of `shape` and the
/// tiled `[rows, cols]` layout along `tile_axis`. Row index = the remaining
/// axes flattened in their original order.
fn permute_tiled(
    src: &[f32],
    shape: &[usize],
    tile_axis: usize,
    cols: usize,
    direction: Direction,
) -> Vec<f32> {
    let mut out = vec![0.0; src.len()];
    let rank = shape.len();

    let mut strides = vec![1usize; rank];
    for i in (0..rank.saturating_sub(1)).rev() {
        strides[i] = strides[i + 1] * shape[i + 1];
    }

    let mut index = vec![0usize; rank];
    for flat in 0..src.len() {
        let mut rem = flat;
        for i in 0..rank {
            index[i] = rem / strides[i];
            rem %= strides[i];
        }

        let mut row = 0usize;
        for i in 0..rank {
            if i != tile_axis {
                row = row * shape[i] + index[i];
            }
        }
        let tiled = row * cols + index[tile_axis];

        match direction {
            Direction::Tile => out[tiled] = src[flat],
            Direction::Untile => out[flat] = src[tiled],
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zeros_matches_shape_product() {
        let t = Tensor::zeros(vec![2, 3, 4], Dtype::Float32);
        assert_eq!(t.len(), 24);
        assert!(t.data().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_from_data_rejects_length_mismatch() {
        let result = Tensor::from_data(vec![1.0, 2.0, 3.0], vec![2, 2]);
        assert!(matches!(
            result,
            Err(ShapeError::DataLengthMismatch {
                expected: 4,
                actual: 3,
                ..
            })
        ));
    }

    #[test]
    fn test_copy_is_independent() {
        let original = Tensor::from_data(vec![1.0, 2.0], vec![2]).unwrap();
        let mut copied = original.copy();
        copied.data_mut()[0] = 9.0;
        assert_eq!(original.data(), &[1.0, 2.0]);
        assert_eq!(copied.data(), &[9.0, 2.0]);
    }

    #[test]
    fn test_tiled_shape_last_axis() {
        let t = Tensor::zeros(vec![2, 3, 4], Dtype::Float32);
        let tiled = t.to_tiled().unwrap();
        assert_eq!(tiled.shape(), &[6, 4]);
        assert_eq!(tiled.untiled_shape(), Some(&[2, 3, 4][..]));
    }

    #[test]
    fn test_tiled_round_trip_is_bit_exact() {
        let data: Vec<f32> = (0..48).map(|i| i as f32 * 0.5 - 7.0).collect();
        let t = Tensor::from_data(data.clone(), vec![4, 4, 3]).unwrap();

        let restored = t.to_tiled().unwrap().from_tiled().unwrap();
        assert_eq!(restored.shape(), &[4, 4, 3]);
        assert_eq!(restored.data(), &data[..]);
    }

    #[test]
    fn test_tiled_round_trip_interior_axis() {
        let data: Vec<f32> = (0..24).map(|i| i as f32).collect();
        let t = Tensor::from_data(data.clone(), vec![2, 3, 4]).unwrap();

        let tiled = t.to_tiled_axis(1).unwrap();
        assert_eq!(tiled.shape(), &[8, 3]);
        // element [i, j, k] lands at row i*4+k, col j
        assert_eq!(tiled.data()[0], 0.0); // [0,0,0]
        assert_eq!(tiled.data()[1], 4.0); // [0,1,0]

        let restored = tiled.from_tiled().unwrap();
        assert_eq!(restored.shape(), &[2, 3, 4]);
        assert_eq!(restored.data(), &data[..]);
    }

    #[test]
    fn test_from_tiled_without_metadata() {
        let t = Tensor::zeros(vec![2, 2], Dtype::Float32);
        assert!(matches!(t.from_tiled(), Err(ShapeError::NotTiled)));
    }

    #[test]
    fn test_tile_axis_out_of_range() {
        let t = Tensor::zeros(vec![2, 2], Dtype::Float32);
        assert!(matches!(
            t.to_tiled_axis(5),
            Err(ShapeError::TileAxisOutOfRange { axis: 5, rank: 2 })
        ));
    }

    #[test]
    fn test_rank_four_requires_tiling_for_device_layout() {
        let t = Tensor::zeros(vec![2, 2, 2, 2], Dtype::Float32);
        assert!(matches!(
            t.device_layout(),
            Err(ShapeError::RankUnsupportedOnDevice { .. })
        ));

        let tiled = t.to_tiled().unwrap();
        assert_eq!(tiled.device_layout().unwrap(), (8, 2));
    }
}

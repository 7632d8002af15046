//! Tensor shape and size mismatch errors.

use thiserror::Error;

/// Errors raised when tensor shapes or sizes disagree, including tiling
/// operand errors. Layer-level variants name the offending layer and both
/// shapes so failures are actionable from the message alone.
#[derive(Error, Debug)]
pub enum ShapeError {
    #[error("Specified shape {shape:?} requires {expected} elements but data holds {actual}")]
    DataLengthMismatch {
        shape: Vec<usize>,
        expected: usize,
        actual: usize,
    },

    #[error("Layer {layer} expected input shape {expected:?} but received {actual:?}")]
    LayerInput {
        layer: String,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("Merge layer {layer} requires at least {expected} inputs but received {actual}")]
    MergeArity {
        layer: String,
        expected: usize,
        actual: usize,
    },

    #[error(
        "Merge layer {layer} requires matching input shapes but received {first:?} and {other:?}"
    )]
    MergeInputMismatch {
        layer: String,
        first: Vec<usize>,
        other: Vec<usize>,
    },

    #[error("Layer {layer} is not a merge layer and accepts exactly one input")]
    NotMergeLayer { layer: String },

    #[error("Layer {layer} was called before its weights were bound")]
    MissingWeights { layer: String },

    #[error("Layer {layer} received weight {weight} with shape {actual:?}, expected {expected:?}")]
    WeightShape {
        layer: String,
        weight: String,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("Tile axis {axis} is out of range for a rank-{rank} tensor")]
    TileAxisOutOfRange { axis: usize, rank: usize },

    #[error("Concatenation axis {axis} is out of range for a rank-{rank} tensor")]
    ConcatAxisOutOfRange { axis: i64, rank: usize },

    #[error("Tensor has no untiled shape recorded; it was not produced by to_tiled")]
    NotTiled,

    #[error("Tensor of shape {shape:?} exceeds rank 3 and must be tiled before device upload")]
    RankUnsupportedOnDevice { shape: Vec<usize> },
}

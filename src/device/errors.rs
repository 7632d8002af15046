//! Device-specific error types.

use thiserror::Error;

/// Shader compile or pipeline link failure for one operation key.
///
/// Never surfaced to `predict` callers: the failing operation is permanently
/// disabled for the device context and execution falls back to the host path.
#[derive(Error, Debug)]
#[error("Shader compilation failed for operation {operation}: {message}")]
pub struct ShaderCompileError {
    pub operation: String,
    pub message: String,
}

/// Errors executing or reading back from the device.
#[derive(Error, Debug)]
pub enum DeviceError {
    #[error(transparent)]
    Compile(#[from] ShaderCompileError),

    #[error("Device readback failed: {message}")]
    ReadbackFailed { message: String },
}

pub type DeviceResult<T> = std::result::Result<T, DeviceError>;

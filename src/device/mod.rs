//! Minimal GPU compute substrate.
//!
//! Wraps a wgpu device/queue pair behind an explicit [`DeviceContext`]:
//! compute programs are compiled from WGSL and cached per operation key,
//! inputs bind to numbered storage buffers with a trailing uniform block, and
//! results are read back through a blocking staging copy.
//!
//! The device path is strictly an accelerator. Every layer has a host
//! implementation, and a shader compile failure silently disables the device
//! path for that operation only.

pub mod context;
pub mod errors;
pub mod shaders;

pub use context::{DeviceContext, DeviceProgram, DeviceTensor};
pub use errors::{DeviceError, DeviceResult, ShaderCompileError};

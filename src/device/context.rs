//! GPU device context: program compilation, binding, dispatch, and readback.

use std::borrow::Cow;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use pollster::FutureExt;
use tracing::{debug, warn};
use wgpu::util::DeviceExt;

use super::errors::{DeviceError, DeviceResult, ShaderCompileError};

/// A compiled and linked compute program, keyed by operation name and cached
/// for the lifetime of the device context.
pub struct DeviceProgram {
    pipeline: wgpu::ComputePipeline,
}

/// A device-resident buffer holding one tensor in its 2-D (possibly tiled)
/// layout. Device memory is not garbage collected; callers must destroy the
/// buffer through `Tensor::release_device` before discarding the handle.
#[derive(Debug)]
pub struct DeviceTensor {
    buffer: wgpu::Buffer,
    rows: usize,
    cols: usize,
}

impl DeviceTensor {
    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn len(&self) -> usize {
        self.rows * self.cols
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Explicitly frees the underlying device allocation.
    pub fn destroy(&self) {
        self.buffer.destroy();
    }
}

/// Explicit, injectable GPU context owned by the runtime.
///
/// Holds the wgpu device/queue pair, the per-operation program cache, and the
/// set of operations disabled by an earlier compile failure. One context can
/// be shared across model instances through an `Arc`; the cache is internally
/// locked.
pub struct DeviceContext {
    device: wgpu::Device,
    queue: wgpu::Queue,
    programs: Mutex<HashMap<String, Arc<DeviceProgram>>>,
    disabled_ops: Mutex<HashSet<String>>,
}

impl DeviceContext {
    /// Initializes a context on the first available adapter, or `None` when
    /// no usable device exists. Never required for correctness; callers fall
    /// back to host execution.
    pub fn create() -> Option<Arc<Self>> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::default());
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions::default())
            .block_on()?;
        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor::default(), None)
            .block_on()
            .ok()?;

        debug!(adapter = %adapter.get_info().name, "device context initialized");

        Some(Arc::new(Self {
            device,
            queue,
            programs: Mutex::new(HashMap::new()),
            disabled_ops: Mutex::new(HashSet::new()),
        }))
    }

    /// Whether `operation` was disabled by an earlier compile failure.
    pub fn op_disabled(&self, operation: &str) -> bool {
        self.disabled_ops.lock().unwrap().contains(operation)
    }

    /// Compiles `source` into a compute program cached under `operation`.
    ///
    /// A compile or link failure permanently disables the operation for this
    /// context and returns `ShaderCompileError`; callers are expected to fall
    /// back to their host implementation.
    pub fn compile_program(
        &self,
        operation: &str,
        source: &str,
    ) -> Result<Arc<DeviceProgram>, ShaderCompileError> {
        if let Some(program) = self.programs.lock().unwrap().get(operation) {
            return Ok(Arc::clone(program));
        }
        if self.op_disabled(operation) {
            return Err(ShaderCompileError {
                operation: operation.to_string(),
                message: "operation disabled by earlier compile failure".to_string(),
            });
        }

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);

        let module = self
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(operation),
                source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(source)),
            });
        let pipeline = self
            .device
            .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(operation),
                layout: None,
                module: &module,
                entry_point: Some("main"),
                compilation_options: wgpu::PipelineCompilationOptions::default(),
                cache: None,
            });

        if let Some(error) = self.device.pop_error_scope().block_on() {
            self.disabled_ops
                .lock()
                .unwrap()
                .insert(operation.to_string());
            warn!(operation, %error, "shader compilation failed; falling back to host execution");
            return Err(ShaderCompileError {
                operation: operation.to_string(),
                message: error.to_string(),
            });
        }

        let program = Arc::new(DeviceProgram { pipeline });
        self.programs
            .lock()
            .unwrap()
            .insert(operation.to_string(), Arc::clone(&program));
        Ok(program)
    }

    /// Uploads host data into a new device tensor with the given 2-D layout.
    pub fn upload(&self, data: &[f32], rows: usize, cols: usize) -> DeviceTensor {
        let buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: None,
                contents: bytemuck::cast_slice(data),
                usage: wgpu::BufferUsages::STORAGE
                    | wgpu::BufferUsages::COPY_SRC
                    | wgpu::BufferUsages::COPY_DST,
            });
        DeviceTensor { buffer, rows, cols }
    }

    /// Allocates a zeroed device tensor to receive a program's output.
    pub fn alloc_output(&self, rows: usize, cols: usize) -> DeviceTensor {
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: None,
            size: (rows * cols * std::mem::size_of::<f32>()) as u64,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        DeviceTensor { buffer, rows, cols }
    }

    /// Runs `program` once per output element.
    ///
    /// Bindings: 0 = output (read-write), 1..=n = inputs in order, n+1 = the
    /// uniform block (`uniforms` packed as 32-bit words; f32 uniforms are
    /// passed bit-cast).
    pub fn run_program(
        &self,
        program: &DeviceProgram,
        output: &DeviceTensor,
        inputs: &[&DeviceTensor],
        uniforms: &[u32],
    ) {
        let uniform_buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: None,
                contents: bytemuck::cast_slice(uniforms),
                usage: wgpu::BufferUsages::UNIFORM,
            });

        let mut entries = vec![wgpu::BindGroupEntry {
            binding: 0,
            resource: output.buffer.as_entire_binding(),
        }];
        for (i, input) in inputs.iter().enumerate() {
            entries.push(wgpu::BindGroupEntry {
                binding: (i + 1) as u32,
                resource: input.buffer.as_entire_binding(),
            });
        }
        entries.push(wgpu::BindGroupEntry {
            binding: (inputs.len() + 1) as u32,
            resource: uniform_buffer.as_entire_binding(),
        });

        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: None,
            layout: &program.pipeline.get_bind_group_layout(0),
            entries: &entries,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: None });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: None,
                timestamp_writes: None,
            });
            pass.set_pipeline(&program.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(output.len().div_ceil(64) as u32, 1, 1);
        }
        self.queue.submit(Some(encoder.finish()));
    }

    /// Blocking readback of a device tensor into a host buffer.
    pub fn read_data(&self, tensor: &DeviceTensor) -> DeviceResult<Vec<f32>> {
        let size = (tensor.len() * std::mem::size_of::<f32>()) as u64;
        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: None,
            size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: None });
        encoder.copy_buffer_to_buffer(&tensor.buffer, 0, &staging, 0, size);
        self.queue.submit(Some(encoder.finish()));

        let slice = staging.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        let _ = self.device.poll(wgpu::Maintain::Wait);

        rx.recv()
            .map_err(|_| DeviceError::ReadbackFailed {
                message: "map callback dropped".to_string(),
            })?
            .map_err(|e| DeviceError::ReadbackFailed {
                message: e.to_string(),
            })?;

        let view = slice.get_mapped_range();
        let data = bytemuck::cast_slice::<u8, f32>(&view).to_vec();
        drop(view);
        staging.unmap();
        Ok(data)
    }
}

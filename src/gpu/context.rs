use pollster::FutureExt as _;

use crate::error::{IblError, Result};
use crate::gpu::state::ResourceStateTable;

/// Six `Rgba16Float` attachments, one per cube face.
pub const MRT_BYTES_PER_SAMPLE: u32 = 6 * 8;
pub const CUBE_FACES: u32 = 6;

pub struct GpuContext {
    pub adapter: wgpu::Adapter,
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub adapter_info: wgpu::AdapterInfo,
}

impl GpuContext {
    /// Accepts Vulkan, Metal, DX12 and WebGPU adapters only. Copies out of layered GL
    /// textures read back as zeros.
    pub fn new() -> Result<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            ..Default::default()
        });
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .block_on()
            .map_err(|e| {
                IblError::DeviceInitializationFailed(format!("no Vulkan, Metal or DX12 adapter: {e}"))
            })?;

        let adapter_info = adapter.get_info();
        let adapter_limits = adapter.limits();
        if adapter_limits.max_color_attachments < CUBE_FACES
            || adapter_limits.max_color_attachment_bytes_per_sample < MRT_BYTES_PER_SAMPLE
        {
            return Err(IblError::DeviceInitializationFailed(format!(
                "adapter {} cannot render to {} color attachments ({} bytes per sample)",
                adapter_info.name, CUBE_FACES, adapter_limits.max_color_attachment_bytes_per_sample
            )));
        }

        let required_limits = wgpu::Limits {
            max_color_attachments: adapter_limits.max_color_attachments,
            max_color_attachment_bytes_per_sample: adapter_limits
                .max_color_attachment_bytes_per_sample,
            ..wgpu::Limits::downlevel_defaults().using_resolution(adapter_limits)
        };

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("IBL Bake Device"),
                required_features: adapter.features()
                    & wgpu::Features::TEXTURE_ADAPTER_SPECIFIC_FORMAT_FEATURES,
                required_limits,
                memory_hints: wgpu::MemoryHints::Performance,
                trace: wgpu::Trace::default(),
            })
            .block_on()
            .map_err(|e| IblError::DeviceInitializationFailed(e.to_string()))?;

        log::info!(
            "using adapter {} ({:?}, {:?})",
            adapter_info.name,
            adapter_info.device_type,
            adapter_info.backend
        );

        Ok(Self {
            adapter,
            device,
            queue,
            adapter_info,
        })
    }

    /// Usages `format` allows on this device, as texture creation validates them.
    pub fn format_features(&self, format: wgpu::TextureFormat) -> wgpu::TextureFormatFeatures {
        let adapter_specific = self
            .device
            .features()
            .contains(wgpu::Features::TEXTURE_ADAPTER_SPECIFIC_FORMAT_FEATURES);
        let downlevel = !self.adapter.get_downlevel_capabilities().is_webgpu_compliant();
        if adapter_specific || downlevel {
            self.adapter.get_texture_format_features(format)
        } else {
            format.guaranteed_format_features(self.device.features())
        }
    }

    pub fn max_texture_dimension(&self) -> u32 {
        self.device.limits().max_texture_dimension_2d
    }

    /// Runs `f` inside validation and out-of-memory error scopes so that device-side
    /// failures of a stage surface as `DeviceOperationFailed` instead of panicking.
    pub fn scoped<T>(&self, stage: &str, f: impl FnOnce() -> Result<T>) -> Result<T> {
        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let result = f();
        let validation = self.device.pop_error_scope().block_on();
        let out_of_memory = self.device.pop_error_scope().block_on();

        let value = result?;
        if let Some(e) = validation.or(out_of_memory) {
            return Err(IblError::device(stage, e));
        }
        Ok(value)
    }

    pub fn wait_idle(&self, stage: &str) -> Result<()> {
        self.device
            .poll(wgpu::PollType::Wait)
            .map(|_| ())
            .map_err(|e| IblError::device(stage, e))
    }
}

/// One command encoder plus the pipeline's state table. Submitted and waited on as a
/// unit; nothing recorded into a later sequence overlaps with it.
pub struct CommandSequence<'a> {
    pub encoder: wgpu::CommandEncoder,
    pub states: &'a mut ResourceStateTable,
    label: &'static str,
}

impl<'a> CommandSequence<'a> {
    pub fn begin(ctx: &GpuContext, states: &'a mut ResourceStateTable, label: &'static str) -> Self {
        let encoder = ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some(label) });
        Self {
            encoder,
            states,
            label,
        }
    }

    pub fn submit_and_wait(self, ctx: &GpuContext) -> Result<()> {
        let Self {
            encoder,
            states,
            label,
        } = self;
        states.end_sequence();
        states
            .validate_log()
            .map_err(|hazard| IblError::device(label, format!("unordered access {hazard:?}")))?;
        ctx.queue.submit(Some(encoder.finish()));
        ctx.wait_idle(label)?;
        log::debug!("{label}: submitted, {} barriers so far", states.barrier_count());
        Ok(())
    }
}

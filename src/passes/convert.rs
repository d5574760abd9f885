use wgpu::util::DeviceExt;

use crate::error::{IblError, Result};
use crate::gpu::{
    shader::ShaderLibrary, AccessState, CommandSequence, GpuContext, GpuImage, ImageDesc, ImageId,
    ResourceStateTable, SubresourceRange,
};
use crate::options::OutputFormat;
use crate::passes::mipmap::{create_linear_sampler, InputTexture};

#[repr(C)]
#[derive(Clone, Copy, Debug, bytemuck::Pod, bytemuck::Zeroable)]
struct BlitLayer {
    layer: u32,
    _padding: [u32; 3],
}

impl BlitLayer {
    fn desc() -> wgpu::BindGroupLayoutDescriptor<'static> {
        wgpu::BindGroupLayoutDescriptor {
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }],
            label: Some("Blit Layer Bind Group Layout"),
        }
    }
}

pub struct ConvertPipeline {
    render_pipeline: wgpu::RenderPipeline,
    texture_bind_group_layout: wgpu::BindGroupLayout,
    layer_bind_groups: Vec<wgpu::BindGroup>,
    sampler: wgpu::Sampler,
}

impl ConvertPipeline {
    pub fn new(
        ctx: &GpuContext,
        shaders: &ShaderLibrary,
        target_format: wgpu::TextureFormat,
        layer_count: u32,
    ) -> Self {
        let device = &ctx.device;
        let texture_bind_group_layout = device.create_bind_group_layout(&InputTexture::desc());
        let layer_bind_group_layout = device.create_bind_group_layout(&BlitLayer::desc());
        let render_pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Format Conversion Pipeline Layout"),
            bind_group_layouts: &[&texture_bind_group_layout, &layer_bind_group_layout],
            push_constant_ranges: &[],
        });
        let render_pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("Format Conversion Render Pipeline"),
            layout: Some(&render_pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shaders.blit,
                entry_point: Some("vs_fullscreen"),
                compilation_options: Default::default(),
                buffers: &[],
            },
            fragment: Some(wgpu::FragmentState {
                module: &shaders.blit,
                entry_point: Some("fs_convert"),
                compilation_options: Default::default(),
                targets: &[Some(target_format.into())],
            }),
            primitive: wgpu::PrimitiveState::default(),
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });

        let layer_bind_groups = (0..layer_count)
            .map(|layer| {
                let buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some("Blit Layer Buffer"),
                    contents: bytemuck::bytes_of(&BlitLayer {
                        layer,
                        _padding: [0; 3],
                    }),
                    usage: wgpu::BufferUsages::UNIFORM,
                });
                device.create_bind_group(&wgpu::BindGroupDescriptor {
                    layout: &layer_bind_group_layout,
                    entries: &[wgpu::BindGroupEntry {
                        binding: 0,
                        resource: buffer.as_entire_binding(),
                    }],
                    label: Some("Blit Layer Bind Group"),
                })
            })
            .collect();

        Self {
            render_pipeline,
            texture_bind_group_layout,
            layer_bind_groups,
            sampler: create_linear_sampler(device),
        }
    }

    fn blit_level(
        &self,
        device: &wgpu::Device,
        encoder: &mut wgpu::CommandEncoder,
        source: &GpuImage,
        target: &GpuImage,
        level: u32,
    ) {
        let source_view = source.level_array_view(level);
        let bind_group = InputTexture::bind_group(
            device,
            &self.texture_bind_group_layout,
            &source_view.view,
            &self.sampler,
        );

        for (face, layer_bind_group) in target
            .layer_views(level)
            .iter()
            .zip(&self.layer_bind_groups)
        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Format Conversion Render Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &face.view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            render_pass.set_pipeline(&self.render_pipeline);
            render_pass.set_bind_group(0, &bind_group, &[]);
            render_pass.set_bind_group(1, layer_bind_group, &[]);
            render_pass.draw(0..3, 0..1);
        }
    }
}

pub(crate) fn declare_conversion(
    states: &mut ResourceStateTable,
    source: ImageId,
    target: ImageId,
    level_count: u32,
    layer_count: u32,
    mut blit: impl FnMut(u32) -> Result<()>,
) -> Result<()> {
    let all = SubresourceRange::levels(0, level_count, layer_count);
    states.access(source, all, AccessState::TransferRead)?;
    states.access(target, all, AccessState::TransferWrite)?;
    for level in 0..level_count {
        blit(level)?;
    }
    Ok(())
}

/// How a conversion target gets written on the current device.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConversionPath {
    /// One fullscreen draw per layer and level into a render attachment.
    Render,
    /// One compute dispatch per level writing all layers of a storage texture.
    Compute,
}

impl ConversionPath {
    fn target_usage(self) -> wgpu::TextureUsages {
        let write = match self {
            ConversionPath::Render => wgpu::TextureUsages::RENDER_ATTACHMENT,
            ConversionPath::Compute => wgpu::TextureUsages::STORAGE_BINDING,
        };
        write | wgpu::TextureUsages::COPY_SRC
    }
}

/// Picks the conversion path `features` allow for `format`, preferring a render pass.
/// Errors when the target can be neither written nor read back.
pub fn conversion_path(
    format: OutputFormat,
    features: &wgpu::TextureFormatFeatures,
) -> Result<ConversionPath> {
    let usages = features.allowed_usages;
    if !usages.contains(wgpu::TextureUsages::COPY_SRC) {
        return Err(IblError::invalid(format!(
            "{format} images cannot be copied back to the host on this device"
        )));
    }
    if usages.contains(wgpu::TextureUsages::RENDER_ATTACHMENT) {
        Ok(ConversionPath::Render)
    } else if usages.contains(wgpu::TextureUsages::STORAGE_BINDING) {
        Ok(ConversionPath::Compute)
    } else {
        Err(IblError::invalid(format!(
            "{format} is neither renderable nor a storage format on this device"
        )))
    }
}

/// Storage binding slot and entry point of the compute conversion into `format`.
fn storage_target(format: OutputFormat) -> (u32, &'static str) {
    match format {
        OutputFormat::Rgba8Unorm => (0, "cs_convert_rgba8unorm"),
        OutputFormat::Rgba16Float => (1, "cs_convert_rgba16float"),
        OutputFormat::Rgba32Float => (2, "cs_convert_rgba32float"),
    }
}

const WORKGROUP_SIZE: u32 = 8;

/// Texel-exact copy into a storage texture, for formats that cannot be rendered to.
pub struct ConvertComputePipeline {
    compute_pipeline: wgpu::ComputePipeline,
    source_layout: wgpu::BindGroupLayout,
    target_layout: wgpu::BindGroupLayout,
    target_binding: u32,
}

impl ConvertComputePipeline {
    pub fn new(ctx: &GpuContext, shaders: &ShaderLibrary, format: OutputFormat) -> Self {
        let device = &ctx.device;
        let (target_binding, entry_point) = storage_target(format);
        let source_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Convert Source Bind Group Layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::Texture {
                    sample_type: wgpu::TextureSampleType::Float { filterable: false },
                    view_dimension: wgpu::TextureViewDimension::D2Array,
                    multisampled: false,
                },
                count: None,
            }],
        });
        let target_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Convert Target Bind Group Layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: target_binding,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::StorageTexture {
                    access: wgpu::StorageTextureAccess::WriteOnly,
                    format: format.texture_format(),
                    view_dimension: wgpu::TextureViewDimension::D2Array,
                },
                count: None,
            }],
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Convert Compute Pipeline Layout"),
            bind_group_layouts: &[&source_layout, &target_layout],
            push_constant_ranges: &[],
        });
        let compute_pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("Convert Compute Pipeline"),
            layout: Some(&pipeline_layout),
            module: &shaders.convert,
            entry_point: Some(entry_point),
            compilation_options: Default::default(),
            cache: None,
        });

        Self {
            compute_pipeline,
            source_layout,
            target_layout,
            target_binding,
        }
    }

    fn convert_level(
        &self,
        device: &wgpu::Device,
        encoder: &mut wgpu::CommandEncoder,
        source: &GpuImage,
        target: &GpuImage,
        level: u32,
    ) {
        let source_view = source.level_array_view(level);
        let target_view = target.level_array_view(level);
        let source_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Convert Source Bind Group"),
            layout: &self.source_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::TextureView(&source_view.view),
            }],
        });
        let target_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Convert Target Bind Group"),
            layout: &self.target_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: self.target_binding,
                resource: wgpu::BindingResource::TextureView(&target_view.view),
            }],
        });

        let (width, height) = target.level_size(level);
        let mut compute_pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("Format Conversion Compute Pass"),
            timestamp_writes: None,
        });
        compute_pass.set_pipeline(&self.compute_pipeline);
        compute_pass.set_bind_group(0, &source_bind_group, &[]);
        compute_pass.set_bind_group(1, &target_bind_group, &[]);
        compute_pass.dispatch_workgroups(
            width.div_ceil(WORKGROUP_SIZE),
            height.div_ceil(WORKGROUP_SIZE),
            target.desc().layer_count,
        );
    }
}

/// Copies every level and layer of `source` into a new image of `format`, written the
/// way `path` says. The copy is left in the transfer-write state.
pub fn convert_format(
    ctx: &GpuContext,
    states: &mut ResourceStateTable,
    shaders: &ShaderLibrary,
    source: &GpuImage,
    format: OutputFormat,
    path: ConversionPath,
) -> Result<GpuImage> {
    let desc = *source.desc();
    let target = GpuImage::new(
        ctx,
        states,
        ImageDesc {
            label: "Converted Cubemap",
            format: format.texture_format(),
            usage: path.target_usage(),
            ..desc
        },
    );

    let mut seq = CommandSequence::begin(ctx, states, "Format Conversion");
    match path {
        ConversionPath::Render => {
            let pipeline =
                ConvertPipeline::new(ctx, shaders, format.texture_format(), desc.layer_count);
            declare_conversion(
                seq.states,
                source.id(),
                target.id(),
                desc.level_count,
                desc.layer_count,
                |level| {
                    pipeline.blit_level(&ctx.device, &mut seq.encoder, source, &target, level);
                    Ok(())
                },
            )?;
        }
        ConversionPath::Compute => {
            let pipeline = ConvertComputePipeline::new(ctx, shaders, format);
            declare_conversion(
                seq.states,
                source.id(),
                target.id(),
                desc.level_count,
                desc.layer_count,
                |level| {
                    pipeline.convert_level(&ctx.device, &mut seq.encoder, source, &target, level);
                    Ok(())
                },
            )?;
        }
    }
    seq.submit_and_wait(ctx)?;

    log::debug!(
        "converted {} ({} levels) to {format} via {path:?}",
        desc.label,
        desc.level_count
    );
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversion_reads_source_and_writes_every_target_level() {
        let mut table = ResourceStateTable::default();
        let source = table.register(4, 6);
        table
            .access(source, SubresourceRange::levels(0, 4, 6), AccessState::ColorAttachmentWrite)
            .unwrap();
        let target = table.register(4, 6);

        let mut levels = Vec::new();
        declare_conversion(&mut table, source, target, 4, 6, |level| {
            levels.push(level);
            Ok(())
        })
        .unwrap();

        assert_eq!(levels, vec![0, 1, 2, 3]);
        assert_eq!(table.state(source, 3, 5), Some(AccessState::TransferRead));
        assert_eq!(table.state(target, 0, 0), Some(AccessState::TransferWrite));
        assert_eq!(table.validate_log(), Ok(()));
    }

    fn features(allowed_usages: wgpu::TextureUsages) -> wgpu::TextureFormatFeatures {
        wgpu::TextureFormatFeatures {
            allowed_usages,
            flags: wgpu::TextureFormatFeatureFlags::empty(),
        }
    }

    #[test]
    fn renderable_targets_use_a_render_pass() {
        let usages = wgpu::TextureUsages::COPY_SRC
            | wgpu::TextureUsages::RENDER_ATTACHMENT
            | wgpu::TextureUsages::STORAGE_BINDING;
        let path = conversion_path(OutputFormat::Rgba8Unorm, &features(usages)).unwrap();
        assert_eq!(path, ConversionPath::Render);
        assert!(path.target_usage().contains(wgpu::TextureUsages::RENDER_ATTACHMENT));
    }

    #[test]
    fn storage_only_targets_use_a_compute_pass() {
        // Rgba32Float on downlevel adapters: sampleable and storage, not renderable.
        let usages = wgpu::TextureUsages::COPY_SRC
            | wgpu::TextureUsages::COPY_DST
            | wgpu::TextureUsages::TEXTURE_BINDING
            | wgpu::TextureUsages::STORAGE_BINDING;
        let path = conversion_path(OutputFormat::Rgba32Float, &features(usages)).unwrap();
        assert_eq!(path, ConversionPath::Compute);
        assert_eq!(
            path.target_usage(),
            wgpu::TextureUsages::STORAGE_BINDING | wgpu::TextureUsages::COPY_SRC
        );
    }

    #[test]
    fn unwritable_targets_are_rejected() {
        let usages = wgpu::TextureUsages::COPY_SRC | wgpu::TextureUsages::TEXTURE_BINDING;
        let err = conversion_path(OutputFormat::Rgba32Float, &features(usages)).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidArgument);

        let not_readable = wgpu::TextureUsages::RENDER_ATTACHMENT;
        assert!(conversion_path(OutputFormat::Rgba8Unorm, &features(not_readable)).is_err());
    }

    #[test]
    fn storage_targets_have_distinct_bindings() {
        let formats = [
            OutputFormat::Rgba8Unorm,
            OutputFormat::Rgba16Float,
            OutputFormat::Rgba32Float,
        ];
        let mut bindings: Vec<u32> = formats.iter().map(|&f| storage_target(f).0).collect();
        bindings.sort_unstable();
        bindings.dedup();
        assert_eq!(bindings.len(), formats.len());
    }
}

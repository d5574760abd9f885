use wgpu::util::DeviceExt;

use crate::error::{IblError, Result};
use crate::gpu::{
    context::CUBE_FACES, shader::ShaderLibrary, AccessState, CommandSequence, GpuContext,
    GpuImage, GpuImageView, ImageDesc, ResourceStateTable,
};
use crate::options::{roughness_for_level, OutputFormat};

/// Per-draw parameters of the convolution shaders.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct FilterConstants {
    pub roughness: f32,
    pub sample_count: u32,
    pub mip_level: u32,
    pub width: u32,
}

impl FilterConstants {
    pub fn specular(level: u32, level_count: u32, sample_count: u32, side: u32) -> Self {
        Self {
            roughness: roughness_for_level(level, level_count),
            sample_count,
            mip_level: level,
            width: side >> level,
        }
    }

    pub fn diffuse(sample_count: u32, side: u32) -> Self {
        Self {
            roughness: 0.0,
            sample_count,
            mip_level: 0,
            width: side,
        }
    }

    pub fn desc() -> wgpu::BindGroupLayoutDescriptor<'static> {
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
            label: Some("Filter Constants Bind Group Layout"),
        }
    }

    pub fn upload(&self, device: &wgpu::Device, layout: &wgpu::BindGroupLayout) -> wgpu::BindGroup {
        let buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Filter Constants Buffer"),
            contents: bytemuck::bytes_of(self),
            usage: wgpu::BufferUsages::UNIFORM,
        });
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: buffer.as_entire_binding(),
            }],
            label: Some("Filter Constants Bind Group"),
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FilterKind {
    /// Equirectangular panorama onto the six cube faces.
    Panorama,
    Specular,
    Diffuse,
}

impl FilterKind {
    fn label(self) -> &'static str {
        match self {
            FilterKind::Panorama => "Panorama To Cubemap",
            FilterKind::Specular => "Specular Filter",
            FilterKind::Diffuse => "Diffuse Filter",
        }
    }

    fn entry_point(self) -> &'static str {
        match self {
            FilterKind::Panorama => "fs_panorama_to_cubemap",
            FilterKind::Specular => "fs_filter_specular",
            FilterKind::Diffuse => "fs_filter_diffuse",
        }
    }

    fn module(self, shaders: &ShaderLibrary) -> &wgpu::ShaderModule {
        match self {
            FilterKind::Panorama => &shaders.panorama,
            FilterKind::Specular | FilterKind::Diffuse => &shaders.filter,
        }
    }

    fn uses_constants(self) -> bool {
        self != FilterKind::Panorama
    }
}

fn source_layout_desc(kind: FilterKind) -> [wgpu::BindGroupLayoutEntry; 2] {
    // The panorama is Rgba32Float, which is not filterable without an optional feature.
    let (sample_type, view_dimension, sampler) = match kind {
        FilterKind::Panorama => (
            wgpu::TextureSampleType::Float { filterable: false },
            wgpu::TextureViewDimension::D2,
            wgpu::SamplerBindingType::NonFiltering,
        ),
        FilterKind::Specular | FilterKind::Diffuse => (
            wgpu::TextureSampleType::Float { filterable: true },
            wgpu::TextureViewDimension::Cube,
            wgpu::SamplerBindingType::Filtering,
        ),
    };
    [
        wgpu::BindGroupLayoutEntry {
            binding: 0,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Texture {
                sample_type,
                view_dimension,
                multisampled: false,
            },
            count: None,
        },
        wgpu::BindGroupLayoutEntry {
            binding: 1,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Sampler(sampler),
            count: None,
        },
    ]
}

fn create_sampler(device: &wgpu::Device, kind: FilterKind) -> wgpu::Sampler {
    match kind {
        FilterKind::Panorama => device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Panorama Sampler"),
            address_mode_u: wgpu::AddressMode::Repeat,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Nearest,
            min_filter: wgpu::FilterMode::Nearest,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        }),
        FilterKind::Specular | FilterKind::Diffuse => device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Cubemap Sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        }),
    }
}

/// Render pipeline writing all six faces of one cube level in a single draw, bound to
/// one source image.
pub struct FilterPipelineState {
    kind: FilterKind,
    render_pipeline: wgpu::RenderPipeline,
    source_bind_group: wgpu::BindGroup,
    source: GpuImageView,
    constants_layout: wgpu::BindGroupLayout,
}

impl FilterPipelineState {
    pub fn new(
        ctx: &GpuContext,
        shaders: &ShaderLibrary,
        kind: FilterKind,
        source: GpuImageView,
        target_format: wgpu::TextureFormat,
    ) -> Self {
        let device = &ctx.device;
        let source_entries = source_layout_desc(kind);
        let source_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            entries: &source_entries,
            label: Some("Filter Source Bind Group Layout"),
        });
        let constants_layout = device.create_bind_group_layout(&FilterConstants::desc());

        let sampler = create_sampler(device, kind);
        let source_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Filter Source Bind Group"),
            layout: &source_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&source.view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&sampler),
                },
            ],
        });

        let bind_group_layouts: Vec<&wgpu::BindGroupLayout> = if kind.uses_constants() {
            vec![&source_layout, &constants_layout]
        } else {
            vec![&source_layout]
        };
        let render_pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(kind.label()),
            bind_group_layouts: &bind_group_layouts,
            push_constant_ranges: &[],
        });

        let targets: Vec<Option<wgpu::ColorTargetState>> = (0..CUBE_FACES)
            .map(|_| {
                Some(wgpu::ColorTargetState {
                    format: target_format,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })
            })
            .collect();

        let module = kind.module(shaders);
        let render_pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some(kind.label()),
            layout: Some(&render_pipeline_layout),
            vertex: wgpu::VertexState {
                module,
                entry_point: Some("vs_fullscreen"),
                compilation_options: Default::default(),
                buffers: &[],
            },
            fragment: Some(wgpu::FragmentState {
                module,
                entry_point: Some(kind.entry_point()),
                compilation_options: Default::default(),
                targets: &targets,
            }),
            primitive: wgpu::PrimitiveState::default(),
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });

        Self {
            kind,
            render_pipeline,
            source_bind_group,
            source,
            constants_layout,
        }
    }

    /// Records one full-screen-triangle draw into all six layers of `level` of `target`.
    pub fn draw(
        &self,
        ctx: &GpuContext,
        seq: &mut CommandSequence,
        target: &GpuImage,
        level: u32,
        constants: Option<&FilterConstants>,
    ) -> Result<()> {
        seq.states
            .expect(self.source.image, self.source.range, AccessState::FragmentShaderRead)?;
        seq.states
            .access(self.source.image, self.source.range, AccessState::FragmentShaderRead)?;
        seq.states
            .access(target.id(), target.level(level), AccessState::ColorAttachmentWrite)?;

        let constants_bind_group = match (self.kind.uses_constants(), constants) {
            (true, Some(c)) => Some(c.upload(&ctx.device, &self.constants_layout)),
            (true, None) => {
                return Err(IblError::invalid(format!(
                    "{} draw needs filter constants",
                    self.kind.label()
                )))
            }
            (false, _) => None,
        };

        let faces = target.layer_views(level);
        let color_attachments: Vec<Option<wgpu::RenderPassColorAttachment>> = faces
            .iter()
            .map(|face| {
                Some(wgpu::RenderPassColorAttachment {
                    view: &face.view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                })
            })
            .collect();

        let mut render_pass = seq.encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some(self.kind.label()),
            color_attachments: &color_attachments,
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        render_pass.set_pipeline(&self.render_pipeline);
        render_pass.set_bind_group(0, &self.source_bind_group, &[]);
        if let Some(bind_group) = &constants_bind_group {
            render_pass.set_bind_group(1, bind_group, &[]);
        }
        render_pass.draw(0..3, 0..1);
        Ok(())
    }
}

/// Convolves every level of a new `level_count` level cube with roughness `level / level_count`.
pub fn filter_specular(
    ctx: &GpuContext,
    states: &mut ResourceStateTable,
    shaders: &ShaderLibrary,
    source: &GpuImage,
    side: u32,
    level_count: u32,
    sample_count: u32,
) -> Result<GpuImage> {
    let output = GpuImage::new(
        ctx,
        states,
        ImageDesc::cube(
            "Specular Cubemap",
            OutputFormat::WORKING.texture_format(),
            side,
            level_count,
            filter_output_usage(),
        ),
    );
    let pipeline = FilterPipelineState::new(
        ctx,
        shaders,
        FilterKind::Specular,
        source.cube_view(),
        output.desc().format,
    );

    let mut seq = CommandSequence::begin(ctx, states, "Specular Filter");
    for level in 0..level_count {
        let constants = FilterConstants::specular(level, level_count, sample_count, side);
        log::debug!(
            "specular level {level}: {}x{} roughness {}",
            constants.width,
            constants.width,
            constants.roughness
        );
        pipeline.draw(ctx, &mut seq, &output, level, Some(&constants))?;
    }
    seq.submit_and_wait(ctx)?;
    Ok(output)
}

/// Cosine-weighted irradiance into a single-level cube.
pub fn filter_diffuse(
    ctx: &GpuContext,
    states: &mut ResourceStateTable,
    shaders: &ShaderLibrary,
    source: &GpuImage,
    side: u32,
    sample_count: u32,
) -> Result<GpuImage> {
    let output = GpuImage::new(
        ctx,
        states,
        ImageDesc::cube(
            "Diffuse Cubemap",
            OutputFormat::WORKING.texture_format(),
            side,
            1,
            filter_output_usage(),
        ),
    );
    let pipeline = FilterPipelineState::new(
        ctx,
        shaders,
        FilterKind::Diffuse,
        source.cube_view(),
        output.desc().format,
    );

    let mut seq = CommandSequence::begin(ctx, states, "Diffuse Filter");
    let constants = FilterConstants::diffuse(sample_count, side);
    pipeline.draw(ctx, &mut seq, &output, 0, Some(&constants))?;
    seq.submit_and_wait(ctx)?;
    Ok(output)
}

pub(crate) fn filter_output_usage() -> wgpu::TextureUsages {
    wgpu::TextureUsages::RENDER_ATTACHMENT
        | wgpu::TextureUsages::TEXTURE_BINDING
        | wgpu::TextureUsages::COPY_SRC
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constants_block_is_sixteen_bytes() {
        assert_eq!(std::mem::size_of::<FilterConstants>(), 16);
    }

    #[test]
    fn specular_constants_follow_level() {
        let side = 256;
        let count = 5;
        for level in 0..count {
            let c = FilterConstants::specular(level, count, 64, side);
            assert_eq!(c.roughness, level as f32 / count as f32);
            assert_eq!(c.mip_level, level);
            assert_eq!(c.width, side >> level);
            assert_eq!(c.sample_count, 64);
        }
    }

    #[test]
    fn diffuse_constants_are_base_level() {
        let c = FilterConstants::diffuse(16, 64);
        assert_eq!(
            c,
            FilterConstants {
                roughness: 0.0,
                sample_count: 16,
                mip_level: 0,
                width: 64,
            }
        );
    }

    #[test]
    fn only_convolutions_take_constants() {
        assert!(!FilterKind::Panorama.uses_constants());
        assert!(FilterKind::Specular.uses_constants());
        assert!(FilterKind::Diffuse.uses_constants());
    }
}

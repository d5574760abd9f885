use crate::error::Result;
use crate::gpu::{
    context::CUBE_FACES, shader::ShaderLibrary, AccessState, CommandSequence, GpuContext,
    GpuImage, ImageId, ResourceStateTable, SubresourceRange,
};

pub struct InputTexture;

impl InputTexture {
    pub fn desc() -> wgpu::BindGroupLayoutDescriptor<'static> {
        wgpu::BindGroupLayoutDescriptor {
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2Array,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
            label: Some("Blit Input Texture Bind Group Layout"),
        }
    }

    pub fn bind_group(
        device: &wgpu::Device,
        layout: &wgpu::BindGroupLayout,
        view: &wgpu::TextureView,
        sampler: &wgpu::Sampler,
    ) -> wgpu::BindGroup {
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(sampler),
                },
            ],
            label: Some("Blit Input Texture Bind Group"),
        })
    }
}

pub fn create_linear_sampler(device: &wgpu::Device) -> wgpu::Sampler {
    device.create_sampler(&wgpu::SamplerDescriptor {
        label: Some("Blit Sampler"),
        address_mode_u: wgpu::AddressMode::ClampToEdge,
        address_mode_v: wgpu::AddressMode::ClampToEdge,
        mag_filter: wgpu::FilterMode::Linear,
        min_filter: wgpu::FilterMode::Linear,
        mipmap_filter: wgpu::FilterMode::Nearest,
        ..Default::default()
    })
}

/// Linear filtered copy from one cube level into the next, all six layers per draw.
pub struct MipmapPipeline {
    render_pipeline: wgpu::RenderPipeline,
    texture_bind_group_layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,
}

impl MipmapPipeline {
    pub fn new(ctx: &GpuContext, shaders: &ShaderLibrary, format: wgpu::TextureFormat) -> Self {
        let device = &ctx.device;
        let texture_bind_group_layout = device.create_bind_group_layout(&InputTexture::desc());
        let render_pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Mipmap Pipeline Layout"),
            bind_group_layouts: &[&texture_bind_group_layout],
            push_constant_ranges: &[],
        });
        let targets: Vec<Option<wgpu::ColorTargetState>> = (0..CUBE_FACES)
            .map(|_| Some(format.into()))
            .collect();
        let render_pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("Mipmap Render Pipeline"),
            layout: Some(&render_pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shaders.blit,
                entry_point: Some("vs_fullscreen"),
                compilation_options: Default::default(),
                buffers: &[],
            },
            fragment: Some(wgpu::FragmentState {
                module: &shaders.blit,
                entry_point: Some("fs_downsample"),
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
            render_pipeline,
            texture_bind_group_layout,
            sampler: create_linear_sampler(device),
        }
    }

    fn blit_level(
        &self,
        device: &wgpu::Device,
        encoder: &mut wgpu::CommandEncoder,
        cube: &GpuImage,
        level: u32,
    ) {
        let source = cube.level_array_view(level - 1);
        let bind_group = InputTexture::bind_group(
            device,
            &self.texture_bind_group_layout,
            &source.view,
            &self.sampler,
        );
        let faces = cube.layer_views(level);
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

        let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Mipmap Render Pass"),
            color_attachments: &color_attachments,
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        render_pass.set_pipeline(&self.render_pipeline);
        render_pass.set_bind_group(0, &bind_group, &[]);
        render_pass.draw(0..3, 0..1);
    }
}

/// Declares the transitions of a mip chain fill and calls `blit` for every level
/// 1..level_count between them. Leaves the whole chain shader-readable.
pub(crate) fn declare_mip_chain(
    states: &mut ResourceStateTable,
    image: ImageId,
    level_count: u32,
    layer_count: u32,
    mut blit: impl FnMut(u32) -> Result<()>,
) -> Result<()> {
    states.transition(
        image,
        SubresourceRange::level(0, layer_count),
        AccessState::TransferRead,
    )?;
    for level in 1..level_count {
        states.access(
            image,
            SubresourceRange::level(level - 1, layer_count),
            AccessState::TransferRead,
        )?;
        states.access(
            image,
            SubresourceRange::level(level, layer_count),
            AccessState::TransferWrite,
        )?;
        blit(level)?;
        states.transition(
            image,
            SubresourceRange::level(level, layer_count),
            AccessState::TransferRead,
        )?;
    }
    states.transition(
        image,
        SubresourceRange::levels(0, level_count, layer_count),
        AccessState::FragmentShaderRead,
    )?;
    Ok(())
}

/// Fills levels 1.. of `cube` from its level 0.
pub fn generate_mipmaps(
    ctx: &GpuContext,
    states: &mut ResourceStateTable,
    shaders: &ShaderLibrary,
    cube: &GpuImage,
) -> Result<()> {
    let desc = *cube.desc();
    let pipeline = MipmapPipeline::new(ctx, shaders, desc.format);

    let mut seq = CommandSequence::begin(ctx, states, "Mip Chain");
    declare_mip_chain(
        seq.states,
        cube.id(),
        desc.level_count,
        desc.layer_count,
        |level| {
            pipeline.blit_level(&ctx.device, &mut seq.encoder, cube, level);
            Ok(())
        },
    )?;
    seq.submit_and_wait(ctx)?;

    log::debug!("generated {} mip levels", desc.level_count);
    Ok(())
}

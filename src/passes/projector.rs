use crate::error::Result;
use crate::gpu::{
    shader::ShaderLibrary, CommandSequence, GpuContext, GpuImage, ImageDesc, ResourceStateTable,
};
use crate::options::OutputFormat;
use crate::passes::filter::{FilterKind, FilterPipelineState};

/// Renders the equirectangular `panorama` onto level 0 of a new cube with `level_count`
/// allocated levels. Level 0 is left in the color-attachment-write state.
pub fn project_to_cubemap(
    ctx: &GpuContext,
    states: &mut ResourceStateTable,
    shaders: &ShaderLibrary,
    panorama: &GpuImage,
    side: u32,
    level_count: u32,
) -> Result<GpuImage> {
    let cube = GpuImage::new(
        ctx,
        states,
        ImageDesc::cube(
            "Projected Cubemap",
            OutputFormat::WORKING.texture_format(),
            side,
            level_count,
            wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
        ),
    );

    let pipeline = FilterPipelineState::new(
        ctx,
        shaders,
        FilterKind::Panorama,
        panorama.sampled_2d_view(),
        cube.desc().format,
    );

    let mut seq = CommandSequence::begin(ctx, states, "Panorama Projection");
    pipeline.draw(ctx, &mut seq, &cube, 0, None)?;
    seq.submit_and_wait(ctx)?;

    log::debug!("projected panorama onto {side}x{side} cube, {level_count} levels");
    Ok(cube)
}

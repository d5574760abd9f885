use std::path::Path;
use std::sync::mpsc::channel;

use crate::container::TextureContainer;
use crate::error::{IblError, Result};
use crate::gpu::{AccessState, CommandSequence, GpuContext, GpuImage, ResourceStateTable};
use crate::options::{ContainerVersion, OutputFormat};

struct StagingBuffer {
    buffer: wgpu::Buffer,
    level: u32,
    face: u32,
    row_size: usize,
    padded_row_size: usize,
    rows: usize,
}

/// Copies every face of every level of `image` to the host. Payloads are returned
/// level-major, faces 0..5 within a level, without row padding.
pub fn read_back(
    ctx: &GpuContext,
    states: &mut ResourceStateTable,
    image: &GpuImage,
    format: OutputFormat,
) -> Result<Vec<Vec<u8>>> {
    let desc = *image.desc();
    let mut seq = CommandSequence::begin(ctx, states, "Readback");
    seq.states
        .access(image.id(), image.all(), AccessState::TransferRead)?;

    let mut staging = Vec::with_capacity((desc.level_count * desc.layer_count) as usize);
    for level in 0..desc.level_count {
        let (width, height) = image.level_size(level);
        let row_size = (width * format.texel_size()) as usize;
        let padded_row_size = crate::align_to_256(row_size);
        for face in 0..desc.layer_count {
            let buffer = ctx.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("Readback Staging Buffer"),
                size: (padded_row_size * height as usize) as u64,
                usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
                mapped_at_creation: false,
            });
            seq.encoder.copy_texture_to_buffer(
                wgpu::TexelCopyTextureInfo {
                    texture: image.texture(),
                    mip_level: level,
                    origin: wgpu::Origin3d {
                        x: 0,
                        y: 0,
                        z: face,
                    },
                    aspect: wgpu::TextureAspect::All,
                },
                wgpu::TexelCopyBufferInfo {
                    buffer: &buffer,
                    layout: wgpu::TexelCopyBufferLayout {
                        offset: 0,
                        bytes_per_row: Some(padded_row_size as u32),
                        rows_per_image: Some(height),
                    },
                },
                wgpu::Extent3d {
                    width,
                    height,
                    depth_or_array_layers: 1,
                },
            );
            staging.push(StagingBuffer {
                buffer,
                level,
                face,
                row_size,
                padded_row_size,
                rows: height as usize,
            });
        }
    }
    seq.submit_and_wait(ctx)?;

    let (tx, rx) = channel();
    for (index, staged) in staging.iter().enumerate() {
        let tx = tx.clone();
        staged
            .buffer
            .slice(..)
            .map_async(wgpu::MapMode::Read, move |result| {
                let _ = tx.send((index, result));
            });
    }
    ctx.wait_idle("Readback")?;

    let mapped: Vec<_> = rx.try_iter().collect();
    if mapped.len() != staging.len() {
        return Err(IblError::device(
            "Readback",
            format!("{} of {} staging buffers mapped", mapped.len(), staging.len()),
        ));
    }
    for (index, result) in mapped {
        result.map_err(|e| {
            IblError::device(
                "Readback",
                format!(
                    "mapping level {} face {} failed: {e}",
                    staging[index].level, staging[index].face
                ),
            )
        })?;
    }

    let payloads = staging
        .iter()
        .map(|staged| {
            let data = staged.buffer.slice(..).get_mapped_range();
            let payload =
                crate::strip_row_padding(&data, staged.row_size, staged.padded_row_size, staged.rows);
            drop(data);
            staged.buffer.unmap();
            payload
        })
        .collect();
    Ok(payloads)
}

/// Reads `image` back and writes it as a texture container at `path`.
pub fn download_cubemap(
    ctx: &GpuContext,
    states: &mut ResourceStateTable,
    image: &GpuImage,
    format: OutputFormat,
    version: ContainerVersion,
    quality: u32,
    path: &Path,
) -> Result<()> {
    let desc = *image.desc();
    let payloads = read_back(ctx, states, image, format)?;

    let mut container = TextureContainer::new(
        version,
        desc.width,
        desc.height,
        format,
        desc.level_count,
        desc.is_cube(),
    );
    let faces = desc.layer_count as usize;
    for (index, payload) in payloads.into_iter().enumerate() {
        container.write_face(payload, (index % faces) as u32, (index / faces) as u32)?;
    }
    if quality > 0 {
        container.compress(quality)?;
    }
    container.save(path)?;
    Ok(())
}

use std::path::Path;

use image::ImageReader;
use wgpu::util::DeviceExt;

use crate::error::{IblError, Result};
use crate::gpu::{AccessState, CommandSequence, GpuContext, GpuImage, ImageDesc, ResourceStateTable};

const TEXEL_SIZE: u32 = 16;

/// Decoded equirectangular panorama, linear RGBA32F.
pub struct Panorama {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<f32>,
}

impl Panorama {
    pub fn load(path: &Path) -> Result<Self> {
        let not_found = |reason: String| IblError::InputPanoramaFileNotFound {
            path: path.to_owned(),
            reason,
        };
        let img = ImageReader::open(path)
            .map_err(|e| not_found(e.to_string()))?
            .with_guessed_format()
            .map_err(|e| not_found(e.to_string()))?
            .decode()
            .map_err(|e| not_found(e.to_string()))?;

        let rgba = img.to_rgba32f();
        let (width, height) = rgba.dimensions();
        log::info!("loaded panorama {} ({width}x{height})", path.display());
        Ok(Self {
            width,
            height,
            pixels: rgba.into_raw(),
        })
    }

    /// Pixel rows padded to the buffer-to-texture copy alignment.
    fn padded_bytes(&self) -> (Vec<u8>, u32) {
        let row_size = (self.width * TEXEL_SIZE) as usize;
        let bytes: &[u8] = bytemuck::cast_slice(&self.pixels);
        let padded_row_size = crate::align_to_256(row_size);
        (
            crate::pad_rows(bytes, row_size, padded_row_size),
            padded_row_size as u32,
        )
    }
}

/// Stages the panorama in a host-visible buffer and copies it into a sampleable image,
/// left in the fragment-shader-read state.
pub fn upload_panorama(
    ctx: &GpuContext,
    states: &mut ResourceStateTable,
    panorama: &Panorama,
) -> Result<GpuImage> {
    let max = ctx.max_texture_dimension();
    if panorama.width > max || panorama.height > max {
        return Err(IblError::invalid(format!(
            "panorama is {}x{}, the device supports at most {max}",
            panorama.width, panorama.height
        )));
    }

    let image = GpuImage::new(
        ctx,
        states,
        ImageDesc::image_2d(
            "Equirectangular Panorama",
            wgpu::TextureFormat::Rgba32Float,
            panorama.width,
            panorama.height,
            wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        ),
    );

    let (bytes, padded_row_size) = panorama.padded_bytes();
    let staging = ctx
        .device
        .create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Panorama Staging Buffer"),
            contents: &bytes,
            usage: wgpu::BufferUsages::COPY_SRC,
        });

    let mut seq = CommandSequence::begin(ctx, states, "Panorama Upload");
    seq.states
        .access(image.id(), image.all(), AccessState::TransferWrite)?;
    seq.encoder.copy_buffer_to_texture(
        wgpu::TexelCopyBufferInfo {
            buffer: &staging,
            layout: wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(padded_row_size),
                rows_per_image: Some(panorama.height),
            },
        },
        wgpu::TexelCopyTextureInfo {
            texture: image.texture(),
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        wgpu::Extent3d {
            width: panorama.width,
            height: panorama.height,
            depth_or_array_layers: 1,
        },
    );
    seq.states
        .transition(image.id(), image.all(), AccessState::FragmentShaderRead)?;
    seq.submit_and_wait(ctx)?;

    Ok(image)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_input_not_found() {
        let err = Panorama::load(Path::new("no/such/panorama.hdr"))
            .err()
            .unwrap();
        assert_eq!(err.kind(), crate::ErrorKind::InputPanoramaFileNotFound);
    }

    #[test]
    fn rows_are_padded_to_copy_alignment() {
        let panorama = Panorama {
            width: 3,
            height: 2,
            pixels: vec![1.0; 3 * 2 * 4],
        };
        let (bytes, padded_row_size) = panorama.padded_bytes();
        assert_eq!(padded_row_size, 256);
        assert_eq!(bytes.len(), 512);
        assert!(bytes[..48]
            .chunks(4)
            .all(|texel| texel == 1.0f32.to_ne_bytes()));
        assert!(bytes[48..256].iter().all(|&b| b == 0));
    }
}

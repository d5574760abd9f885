use block_compression::{half::f16, BC6HSettings, BC7Settings, CompressionVariant};

use crate::options::OutputFormat;

/// Encoder preset for a compression quality in 1..=255.
pub fn compression_variant(format: OutputFormat, quality: u32) -> CompressionVariant {
    let quality = quality.clamp(1, 255);
    if format.is_float() {
        let settings = match quality {
            1..=51 => BC6HSettings::very_fast(),
            52..=102 => BC6HSettings::fast(),
            103..=153 => BC6HSettings::basic(),
            154..=204 => BC6HSettings::slow(),
            _ => BC6HSettings::very_slow(),
        };
        CompressionVariant::BC6H(settings)
    } else {
        let settings = match quality {
            1..=85 => BC7Settings::alpha_fast(),
            86..=170 => BC7Settings::alpha_basic(),
            _ => BC7Settings::alpha_slow(),
        };
        CompressionVariant::BC7(settings)
    }
}

/// zstd level used for KTX2 supercompression.
pub fn zstd_level(quality: u32) -> i32 {
    let quality = quality.clamp(1, 255) as i32;
    1 + (quality - 1) * 18 / 254
}

/// Rounds `width`x`height` up to whole 4x4 blocks, repeating the last column and row.
fn pad_to_blocks<T: Copy>(texels: &[T], width: u32, height: u32, channels: usize) -> (Vec<T>, u32, u32) {
    let padded_width = width.div_ceil(4) * 4;
    let padded_height = height.div_ceil(4) * 4;
    if padded_width == width && padded_height == height {
        return (texels.to_vec(), width, height);
    }
    let mut padded = Vec::with_capacity((padded_width * padded_height) as usize * channels);
    for y in 0..padded_height {
        let src_y = y.min(height - 1);
        for x in 0..padded_width {
            let src_x = x.min(width - 1);
            let start = (src_y * width + src_x) as usize * channels;
            padded.extend_from_slice(&texels[start..start + channels]);
        }
    }
    (padded, padded_width, padded_height)
}

fn to_half_floats(format: OutputFormat, data: &[u8]) -> Vec<f16> {
    match format {
        OutputFormat::Rgba32Float => data
            .chunks_exact(4)
            .map(|b| f16::from_f32(f32::from_le_bytes([b[0], b[1], b[2], b[3]])))
            .collect(),
        _ => data
            .chunks_exact(2)
            .map(|b| f16::from_bits(u16::from_le_bytes([b[0], b[1]])))
            .collect(),
    }
}

/// Block compresses one face of one level.
pub fn compress_face(
    variant: CompressionVariant,
    format: OutputFormat,
    data: &[u8],
    width: u32,
    height: u32,
) -> Vec<u8> {
    let mut blocks_buffer = vec![0u8; variant.blocks_byte_size(width, height)];
    match variant {
        CompressionVariant::BC6H(_) => {
            let half_floats = to_half_floats(format, data);
            let (texels, width, height) = pad_to_blocks(&half_floats, width, height, 4);
            block_compression::encode::compress_rgba16(
                variant,
                &texels,
                &mut blocks_buffer,
                width,
                height,
                width * 4,
            );
        }
        _ => {
            let (texels, width, height) = pad_to_blocks(data, width, height, 4);
            block_compression::encode::compress_rgba8(
                variant,
                &texels,
                &mut blocks_buffer,
                width,
                height,
                width * 4,
            );
        }
    }
    blocks_buffer
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn float_formats_use_bc6h_and_unorm_uses_bc7() {
        assert!(matches!(
            compression_variant(OutputFormat::Rgba16Float, 128),
            CompressionVariant::BC6H(_)
        ));
        assert!(matches!(
            compression_variant(OutputFormat::Rgba32Float, 1),
            CompressionVariant::BC6H(_)
        ));
        assert!(matches!(
            compression_variant(OutputFormat::Rgba8Unorm, 255),
            CompressionVariant::BC7(_)
        ));
    }

    #[test]
    fn zstd_level_spans_quality_range() {
        assert_eq!(zstd_level(1), 1);
        assert_eq!(zstd_level(255), 19);
        assert!(zstd_level(128) > 1 && zstd_level(128) < 19);
        assert_eq!(zstd_level(1000), 19);
    }

    #[test]
    fn small_levels_are_padded_to_one_block() {
        let texels: Vec<u8> = (0..2 * 2 * 4).map(|v| v as u8).collect();
        let (padded, w, h) = pad_to_blocks(&texels, 2, 2, 4);
        assert_eq!((w, h), (4, 4));
        assert_eq!(padded.len(), 64);
        // Column 3 repeats column 1 of the same row.
        assert_eq!(&padded[12..16], &texels[4..8]);
        // Row 3 repeats row 1.
        assert_eq!(&padded[48..52], &texels[8..12]);
    }

    #[test]
    fn compressed_face_has_one_block_per_4x4() {
        let variant = compression_variant(OutputFormat::Rgba8Unorm, 1);
        let data = vec![200u8; 8 * 8 * 4];
        let blocks = compress_face(variant, OutputFormat::Rgba8Unorm, &data, 8, 8);
        assert_eq!(blocks.len(), 4 * 16);

        let tiny = compress_face(variant, OutputFormat::Rgba8Unorm, &[10u8; 4], 1, 1);
        assert_eq!(tiny.len(), 16);
    }

    #[test]
    fn bc6h_output_differs_from_input() {
        let variant = compression_variant(OutputFormat::Rgba16Float, 1);
        let one = f16::from_f32(1.5).to_bits().to_le_bytes();
        let data: Vec<u8> = (0..4 * 4 * 4).flat_map(|_| one).collect();
        let blocks = compress_face(variant, OutputFormat::Rgba16Float, &data, 4, 4);
        assert_eq!(blocks.len(), 16);
        assert_ne!(&blocks[..], &data[..16]);
    }
}

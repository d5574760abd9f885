use byteorder::{LittleEndian, WriteBytesExt};

use super::{PayloadFormat, TextureContainer};
use crate::options::OutputFormat;

pub const IDENTIFIER: [u8; 12] = [
    0xAB, 0x4B, 0x54, 0x58, 0x20, 0x32, 0x30, 0xBB, 0x0D, 0x0A, 0x1A, 0x0A,
];
/// Identifier, header and index, before the level index.
pub const HEADER_SIZE: usize = 80;
pub const LEVEL_INDEX_ENTRY_SIZE: usize = 24;

pub const SUPERCOMPRESSION_NONE: u32 = 0;
pub const SUPERCOMPRESSION_ZSTD: u32 = 2;

const KHR_DF_MODEL_RGBSDA: u32 = 1;
const KHR_DF_MODEL_BC6H: u32 = 133;
const KHR_DF_MODEL_BC7: u32 = 134;
const KHR_DF_PRIMARIES_BT709: u32 = 1;
const KHR_DF_TRANSFER_LINEAR: u32 = 1;
const KHR_DF_SAMPLE_DATATYPE_SIGNED: u32 = 0x40;
const KHR_DF_SAMPLE_DATATYPE_FLOAT: u32 = 0x80;

const FLOAT_ONE: u32 = 0x3F80_0000;
const FLOAT_MINUS_ONE: u32 = 0xBF80_0000;

struct Sample {
    bit_offset: u32,
    bit_length: u32,
    channel: u32,
    lower: u32,
    upper: u32,
}

/// Khronos basic data format descriptor, including the leading total size word.
/// `bytesPlane0` is 0 for supercompressed payloads.
fn data_format_descriptor(format: PayloadFormat, supercompressed: bool) -> std::io::Result<Vec<u8>> {
    let (model, block_dims, bytes_plane0, samples): (u32, [u8; 4], u8, Vec<Sample>) = match format
    {
        PayloadFormat::Uncompressed(f) => {
            let channel_bits = f.texel_size() * 2;
            let (qualifiers, lower, upper) = if f.is_float() {
                (
                    KHR_DF_SAMPLE_DATATYPE_FLOAT | KHR_DF_SAMPLE_DATATYPE_SIGNED,
                    FLOAT_MINUS_ONE,
                    FLOAT_ONE,
                )
            } else {
                (0, 0, 255)
            };
            let samples = [0u32, 1, 2, 15]
                .iter()
                .enumerate()
                .map(|(i, &channel)| Sample {
                    bit_offset: i as u32 * channel_bits,
                    bit_length: channel_bits - 1,
                    channel: channel | qualifiers,
                    lower,
                    upper,
                })
                .collect();
            (KHR_DF_MODEL_RGBSDA, [0; 4], f.texel_size() as u8, samples)
        }
        PayloadFormat::Bc6hUfloat => (
            KHR_DF_MODEL_BC6H,
            [3, 3, 0, 0],
            16,
            vec![Sample {
                bit_offset: 0,
                bit_length: 127,
                channel: KHR_DF_SAMPLE_DATATYPE_FLOAT,
                lower: 0,
                upper: FLOAT_ONE,
            }],
        ),
        PayloadFormat::Bc7Unorm => (
            KHR_DF_MODEL_BC7,
            [3, 3, 0, 0],
            16,
            vec![Sample {
                bit_offset: 0,
                bit_length: 127,
                channel: 0,
                lower: 0,
                upper: u32::MAX,
            }],
        ),
    };

    let bytes_plane0 = if supercompressed { 0 } else { bytes_plane0 };
    let block_size = 24 + 16 * samples.len() as u32;
    let mut out = Vec::with_capacity(4 + block_size as usize);
    out.write_u32::<LittleEndian>(4 + block_size)?;
    out.write_u32::<LittleEndian>(0)?; // vendorId KHRONOS, descriptorType BASICFORMAT
    out.write_u32::<LittleEndian>(2 | (block_size << 16))?; // versionNumber 1.3
    out.write_u32::<LittleEndian>(
        model | (KHR_DF_PRIMARIES_BT709 << 8) | (KHR_DF_TRANSFER_LINEAR << 16),
    )?;
    out.extend_from_slice(&block_dims);
    out.extend_from_slice(&[bytes_plane0, 0, 0, 0, 0, 0, 0, 0]);
    for sample in samples {
        out.write_u32::<LittleEndian>(
            sample.bit_offset | (sample.bit_length << 16) | (sample.channel << 24),
        )?;
        out.write_u32::<LittleEndian>(0)?; // samplePosition
        out.write_u32::<LittleEndian>(sample.lower)?;
        out.write_u32::<LittleEndian>(sample.upper)?;
    }
    Ok(out)
}

/// Level payload alignment without supercompression: lcm(texel block size, 4).
fn level_alignment(format: PayloadFormat) -> usize {
    match format {
        PayloadFormat::Uncompressed(OutputFormat::Rgba8Unorm) => 4,
        PayloadFormat::Uncompressed(OutputFormat::Rgba16Float) => 8,
        _ => 16,
    }
}

pub fn type_size(format: PayloadFormat) -> u32 {
    match format {
        PayloadFormat::Uncompressed(OutputFormat::Rgba16Float) => 2,
        PayloadFormat::Uncompressed(OutputFormat::Rgba32Float) => 4,
        _ => 1,
    }
}

struct LevelEntry {
    offset: u64,
    length: u64,
    uncompressed_length: u64,
}

pub fn encode(container: &TextureContainer, zstd_level: Option<i32>) -> std::io::Result<Vec<u8>> {
    let format = container.payload_format;
    let level_count = container.level_count as usize;
    let dfd = data_format_descriptor(format, zstd_level.is_some())?;

    let dfd_offset = HEADER_SIZE + LEVEL_INDEX_ENTRY_SIZE * level_count;
    let mut data_start = dfd_offset + dfd.len();

    // Each level is its faces back to back, optionally zstd compressed as a whole.
    let mut level_data: Vec<(Vec<u8>, u64)> = Vec::with_capacity(level_count);
    for faces in &container.levels {
        let raw: Vec<u8> = faces.concat();
        let uncompressed_length = raw.len() as u64;
        let stored = match zstd_level {
            Some(level) => zstd::encode_all(&raw[..], level)?,
            None => raw,
        };
        level_data.push((stored, uncompressed_length));
    }

    // Levels are stored smallest first.
    let alignment = if zstd_level.is_some() {
        1
    } else {
        level_alignment(format)
    };
    let mut entries: Vec<LevelEntry> = (0..level_count)
        .map(|_| LevelEntry {
            offset: 0,
            length: 0,
            uncompressed_length: 0,
        })
        .collect();
    let mut payload = Vec::new();
    for level in (0..level_count).rev() {
        while (data_start + payload.len()) % alignment != 0 {
            payload.push(0);
        }
        let (stored, uncompressed_length) = &level_data[level];
        entries[level] = LevelEntry {
            offset: (data_start + payload.len()) as u64,
            length: stored.len() as u64,
            uncompressed_length: *uncompressed_length,
        };
        payload.extend_from_slice(stored);
    }
    data_start += payload.len();

    let mut out = Vec::with_capacity(data_start);
    out.extend_from_slice(&IDENTIFIER);
    out.write_u32::<LittleEndian>(format.vk_format())?;
    out.write_u32::<LittleEndian>(type_size(format))?;
    out.write_u32::<LittleEndian>(container.width)?;
    out.write_u32::<LittleEndian>(container.height)?;
    out.write_u32::<LittleEndian>(0)?; // pixelDepth
    out.write_u32::<LittleEndian>(0)?; // layerCount
    out.write_u32::<LittleEndian>(container.face_count())?;
    out.write_u32::<LittleEndian>(container.level_count)?;
    out.write_u32::<LittleEndian>(if zstd_level.is_some() {
        SUPERCOMPRESSION_ZSTD
    } else {
        SUPERCOMPRESSION_NONE
    })?;

    out.write_u32::<LittleEndian>(dfd_offset as u32)?;
    out.write_u32::<LittleEndian>(dfd.len() as u32)?;
    out.write_u32::<LittleEndian>(0)?; // kvdByteOffset
    out.write_u32::<LittleEndian>(0)?; // kvdByteLength
    out.write_u64::<LittleEndian>(0)?; // sgdByteOffset
    out.write_u64::<LittleEndian>(0)?; // sgdByteLength

    for entry in &entries {
        out.write_u64::<LittleEndian>(entry.offset)?;
        out.write_u64::<LittleEndian>(entry.length)?;
        out.write_u64::<LittleEndian>(entry.uncompressed_length)?;
    }
    out.extend_from_slice(&dfd);
    out.extend_from_slice(&payload);
    debug_assert_eq!(out.len(), data_start);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_sizes() {
        let rgba = data_format_descriptor(PayloadFormat::Uncompressed(OutputFormat::Rgba16Float), false)
            .unwrap();
        assert_eq!(rgba.len(), 4 + 24 + 4 * 16);
        assert_eq!(u32::from_le_bytes([rgba[0], rgba[1], rgba[2], rgba[3]]), rgba.len() as u32);

        let bc6h = data_format_descriptor(PayloadFormat::Bc6hUfloat, false).unwrap();
        assert_eq!(bc6h.len(), 4 + 24 + 16);
        // texelBlockDimension0/1 encode a 4x4 block as 3, 3.
        assert_eq!(&bc6h[16..18], &[3, 3]);
    }

    #[test]
    fn sixteen_bit_channels_are_laid_out_back_to_back() {
        let dfd = data_format_descriptor(PayloadFormat::Uncompressed(OutputFormat::Rgba16Float), false)
            .unwrap();
        let sample = |i: usize| {
            let at = 28 + 16 * i;
            u32::from_le_bytes([dfd[at], dfd[at + 1], dfd[at + 2], dfd[at + 3]])
        };
        for i in 0..4 {
            assert_eq!(sample(i) & 0xFFFF, 16 * i as u32);
            assert_eq!((sample(i) >> 16) & 0xFF, 15);
        }
    }

    #[test]
    fn supercompressed_descriptor_has_no_plane_size() {
        let plain = data_format_descriptor(PayloadFormat::Bc6hUfloat, false).unwrap();
        let zstd = data_format_descriptor(PayloadFormat::Bc6hUfloat, true).unwrap();
        // bytesPlane0 follows the four texelBlockDimension bytes.
        assert_eq!(plain[20], 16);
        assert_eq!(zstd[20], 0);
        assert_eq!(&plain[..20], &zstd[..20]);

        let rgba8 = data_format_descriptor(PayloadFormat::Uncompressed(OutputFormat::Rgba8Unorm), true)
            .unwrap();
        assert_eq!(rgba8[20], 0);
    }
}

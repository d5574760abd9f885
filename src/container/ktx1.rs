use byteorder::{LittleEndian, WriteBytesExt};

use super::{PayloadFormat, TextureContainer};
use crate::options::OutputFormat;

pub const IDENTIFIER: [u8; 12] = [
    0xAB, 0x4B, 0x54, 0x58, 0x20, 0x31, 0x31, 0xBB, 0x0D, 0x0A, 0x1A, 0x0A,
];
pub const ENDIANNESS: u32 = 0x0403_0201;
pub const HEADER_SIZE: usize = 64;

const GL_UNSIGNED_BYTE: u32 = 0x1401;
const GL_HALF_FLOAT: u32 = 0x140B;
const GL_FLOAT: u32 = 0x1406;
const GL_RGB: u32 = 0x1907;
const GL_RGBA: u32 = 0x1908;
const GL_RGBA8: u32 = 0x8058;
const GL_RGBA16F: u32 = 0x881A;
const GL_RGBA32F: u32 = 0x8814;
const GL_COMPRESSED_RGBA_BPTC_UNORM: u32 = 0x8E8C;
const GL_COMPRESSED_RGB_BPTC_UNSIGNED_FLOAT: u32 = 0x8E8F;

/// (glType, glTypeSize, glFormat, glInternalFormat, glBaseInternalFormat)
fn gl_enums(format: PayloadFormat) -> (u32, u32, u32, u32, u32) {
    match format {
        PayloadFormat::Uncompressed(OutputFormat::Rgba8Unorm) => {
            (GL_UNSIGNED_BYTE, 1, GL_RGBA, GL_RGBA8, GL_RGBA)
        }
        PayloadFormat::Uncompressed(OutputFormat::Rgba16Float) => {
            (GL_HALF_FLOAT, 2, GL_RGBA, GL_RGBA16F, GL_RGBA)
        }
        PayloadFormat::Uncompressed(OutputFormat::Rgba32Float) => {
            (GL_FLOAT, 4, GL_RGBA, GL_RGBA32F, GL_RGBA)
        }
        // Compressed payloads have no glType or glFormat.
        PayloadFormat::Bc6hUfloat => (0, 1, 0, GL_COMPRESSED_RGB_BPTC_UNSIGNED_FLOAT, GL_RGB),
        PayloadFormat::Bc7Unorm => (0, 1, 0, GL_COMPRESSED_RGBA_BPTC_UNORM, GL_RGBA),
    }
}

fn pad4(out: &mut Vec<u8>) {
    while out.len() % 4 != 0 {
        out.push(0);
    }
}

pub fn encode(container: &TextureContainer) -> std::io::Result<Vec<u8>> {
    let (gl_type, gl_type_size, gl_format, gl_internal_format, gl_base_internal_format) =
        gl_enums(container.payload_format);

    let mut out = Vec::with_capacity(HEADER_SIZE + container.payload_size());
    out.extend_from_slice(&IDENTIFIER);
    out.write_u32::<LittleEndian>(ENDIANNESS)?;
    out.write_u32::<LittleEndian>(gl_type)?;
    out.write_u32::<LittleEndian>(gl_type_size)?;
    out.write_u32::<LittleEndian>(gl_format)?;
    out.write_u32::<LittleEndian>(gl_internal_format)?;
    out.write_u32::<LittleEndian>(gl_base_internal_format)?;
    out.write_u32::<LittleEndian>(container.width)?;
    out.write_u32::<LittleEndian>(container.height)?;
    out.write_u32::<LittleEndian>(0)?; // pixelDepth
    out.write_u32::<LittleEndian>(0)?; // numberOfArrayElements
    out.write_u32::<LittleEndian>(container.face_count())?;
    out.write_u32::<LittleEndian>(container.level_count)?;
    out.write_u32::<LittleEndian>(0)?; // bytesOfKeyValueData

    for faces in &container.levels {
        // For non-array cubemaps imageSize is the size of one face.
        let image_size = if container.is_cubemap {
            faces.first().map_or(0, Vec::len)
        } else {
            faces.iter().map(Vec::len).sum()
        };
        out.write_u32::<LittleEndian>(image_size as u32)?;
        for face in faces {
            out.extend_from_slice(face);
            pad4(&mut out);
        }
        pad4(&mut out);
    }
    Ok(out)
}

//! KTX texture containers for baked cubemaps.
//!
//! A container is filled one face at a time, faces 0..5 in order for every level, then
//! optionally block compressed and saved. Version 1 writes KTX 1.1, version 2 writes
//! KTX 2.0 (zstd supercompressed when compression is requested).

use std::io::{Cursor, Read};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt};

use crate::error::{IblError, Result};
use crate::options::{ContainerVersion, OutputFormat};

pub mod compress;
pub mod ktx1;
pub mod ktx2;

/// Encoding of the bytes stored per face.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PayloadFormat {
    Uncompressed(OutputFormat),
    Bc6hUfloat,
    Bc7Unorm,
}

impl PayloadFormat {
    pub fn vk_format(self) -> u32 {
        match self {
            PayloadFormat::Uncompressed(f) => f.vk_format(),
            PayloadFormat::Bc6hUfloat => 143,
            PayloadFormat::Bc7Unorm => 145,
        }
    }

    pub fn is_compressed(self) -> bool {
        !matches!(self, PayloadFormat::Uncompressed(_))
    }

    /// Bytes of one `width`x`height` face.
    pub fn face_size(self, width: u32, height: u32) -> usize {
        match self {
            PayloadFormat::Uncompressed(f) => (width * height * f.texel_size()) as usize,
            PayloadFormat::Bc6hUfloat | PayloadFormat::Bc7Unorm => {
                (width.div_ceil(4) * height.div_ceil(4) * 16) as usize
            }
        }
    }
}

pub struct TextureContainer {
    version: ContainerVersion,
    width: u32,
    height: u32,
    format: OutputFormat,
    payload_format: PayloadFormat,
    level_count: u32,
    is_cubemap: bool,
    /// Written faces per level.
    levels: Vec<Vec<Vec<u8>>>,
    quality: u32,
}

impl TextureContainer {
    pub fn new(
        version: ContainerVersion,
        width: u32,
        height: u32,
        format: OutputFormat,
        level_count: u32,
        is_cubemap: bool,
    ) -> Self {
        Self {
            version,
            width,
            height,
            format,
            payload_format: PayloadFormat::Uncompressed(format),
            level_count,
            is_cubemap,
            levels: (0..level_count).map(|_| Vec::new()).collect(),
            quality: 0,
        }
    }

    pub fn face_count(&self) -> u32 {
        if self.is_cubemap {
            6
        } else {
            1
        }
    }

    pub fn payload_format(&self) -> PayloadFormat {
        self.payload_format
    }

    pub fn level_size(&self, level: u32) -> (u32, u32) {
        ((self.width >> level).max(1), (self.height >> level).max(1))
    }

    fn payload_size(&self) -> usize {
        self.levels.iter().flatten().map(Vec::len).sum()
    }

    fn is_complete(&self) -> bool {
        self.levels
            .iter()
            .all(|faces| faces.len() == self.face_count() as usize)
    }

    /// Stores the uncompressed texels of `face` at `level`.
    pub fn write_face(&mut self, data: Vec<u8>, face: u32, level: u32) -> Result<()> {
        if self.payload_format.is_compressed() {
            return Err(IblError::invalid("container is already compressed"));
        }
        if level >= self.level_count || face >= self.face_count() {
            return Err(IblError::invalid(format!(
                "face {face} level {level} outside of {} faces x {} levels",
                self.face_count(),
                self.level_count
            )));
        }
        let written = self.levels[level as usize].len() as u32;
        if face != written {
            return Err(IblError::invalid(format!(
                "level {level}: expected face {written}, got face {face}"
            )));
        }
        let (width, height) = self.level_size(level);
        let expected = self.payload_format.face_size(width, height);
        if data.len() != expected {
            return Err(IblError::invalid(format!(
                "level {level} face {face} has {} bytes, expected {expected}",
                data.len()
            )));
        }
        self.levels[level as usize].push(data);
        Ok(())
    }

    /// Block compresses every payload. Needs every face of every level.
    pub fn compress(&mut self, quality: u32) -> Result<()> {
        if quality == 0 {
            return Ok(());
        }
        if self.payload_format.is_compressed() {
            return Err(IblError::invalid("container is already compressed"));
        }
        if !self.is_complete() {
            return Err(IblError::invalid(
                "every face of every level must be written before compressing",
            ));
        }

        let variant = compress::compression_variant(self.format, quality);
        for (level, faces) in self.levels.iter_mut().enumerate() {
            let width = (self.width >> level).max(1);
            let height = (self.height >> level).max(1);
            for face in faces.iter_mut() {
                *face = compress::compress_face(variant, self.format, face, width, height);
            }
        }
        self.payload_format = if self.format.is_float() {
            PayloadFormat::Bc6hUfloat
        } else {
            PayloadFormat::Bc7Unorm
        };
        self.quality = quality;
        log::debug!(
            "compressed {}x{} container to {:?} at quality {quality}",
            self.width,
            self.height,
            self.payload_format
        );
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        if !self.is_complete() {
            return Err(IblError::invalid(
                "every face of every level must be written before saving",
            ));
        }
        let encoded = match self.version {
            ContainerVersion::Ktx1 => ktx1::encode(self),
            ContainerVersion::Ktx2 => {
                let zstd_level = (self.quality > 0).then(|| compress::zstd_level(self.quality));
                ktx2::encode(self, zstd_level)
            }
        };
        encoded.map_err(|e| IblError::ContainerWriteFailed {
            path: Default::default(),
            reason: e.to_string(),
        })
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let bytes = self.to_bytes().map_err(|e| match e {
            IblError::ContainerWriteFailed { reason, .. } => IblError::ContainerWriteFailed {
                path: path.to_owned(),
                reason,
            },
            other => other,
        })?;
        std::fs::write(path, &bytes).map_err(|e| IblError::ContainerWriteFailed {
            path: path.to_owned(),
            reason: e.to_string(),
        })?;
        log::info!(
            "wrote {} ({} levels, {} bytes)",
            path.display(),
            self.level_count,
            bytes.len()
        );
        Ok(())
    }
}

/// Header fields of a written container.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContainerSummary {
    pub version: ContainerVersion,
    pub width: u32,
    pub height: u32,
    pub face_count: u32,
    pub level_count: u32,
    /// vkFormat for KTX2, glInternalFormat for KTX1.
    pub format_id: u32,
    pub supercompression: u32,
    /// Stored bytes of every level, all faces together.
    pub level_sizes: Vec<u64>,
    /// Bytes of every level before supercompression. Equal to `level_sizes` for KTX 1.1.
    pub uncompressed_level_sizes: Vec<u64>,
}

impl ContainerSummary {
    pub fn read(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)
            .map_err(|e| IblError::invalid(format!("reading {}: {e}", path.display())))?;
        Self::parse(&bytes)
    }

    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let malformed = |e: std::io::Error| IblError::invalid(format!("malformed container: {e}"));
        let mut cursor = Cursor::new(bytes);
        let mut identifier = [0u8; 12];
        cursor.read_exact(&mut identifier).map_err(malformed)?;

        if identifier == ktx1::IDENTIFIER {
            Self::parse_ktx1(&mut cursor).map_err(malformed)
        } else if identifier == ktx2::IDENTIFIER {
            Self::parse_ktx2(&mut cursor).map_err(malformed)
        } else {
            Err(IblError::invalid("not a KTX container"))
        }
    }

    fn parse_ktx1(cursor: &mut Cursor<&[u8]>) -> std::io::Result<Self> {
        let mut header = [0u32; 13];
        cursor.read_u32_into::<LittleEndian>(&mut header)?;
        let [_endianness, _gl_type, _type_size, _gl_format, internal_format, _base, width, height, _depth, _array, face_count, level_count, kvd_bytes] =
            header;
        cursor.set_position(cursor.position() + kvd_bytes as u64);

        let mut level_sizes = Vec::with_capacity(level_count as usize);
        for _ in 0..level_count.max(1) {
            let image_size = cursor.read_u32::<LittleEndian>()? as u64;
            let per_face = (image_size + 3) & !3;
            level_sizes.push(image_size * face_count as u64);
            cursor.set_position(cursor.position() + per_face * face_count as u64);
        }
        Ok(Self {
            version: ContainerVersion::Ktx1,
            width,
            height,
            face_count,
            level_count,
            format_id: internal_format,
            supercompression: 0,
            uncompressed_level_sizes: level_sizes.clone(),
            level_sizes,
        })
    }

    fn parse_ktx2(cursor: &mut Cursor<&[u8]>) -> std::io::Result<Self> {
        let mut header = [0u32; 9];
        cursor.read_u32_into::<LittleEndian>(&mut header)?;
        let [vk_format, _type_size, width, height, _depth, _layers, face_count, level_count, supercompression] =
            header;
        // dfd, kvd and sgd offsets and lengths
        cursor.set_position(cursor.position() + 4 * 4 + 2 * 8);

        let mut level_sizes = Vec::with_capacity(level_count as usize);
        let mut uncompressed_level_sizes = Vec::with_capacity(level_count as usize);
        for _ in 0..level_count.max(1) {
            let _offset = cursor.read_u64::<LittleEndian>()?;
            level_sizes.push(cursor.read_u64::<LittleEndian>()?);
            uncompressed_level_sizes.push(cursor.read_u64::<LittleEndian>()?);
        }
        Ok(Self {
            version: ContainerVersion::Ktx2,
            width,
            height,
            face_count,
            level_count,
            format_id: vk_format,
            supercompression,
            level_sizes,
            uncompressed_level_sizes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled(version: ContainerVersion, format: OutputFormat, side: u32, levels: u32) -> TextureContainer {
        let mut container = TextureContainer::new(version, side, side, format, levels, true);
        for level in 0..levels {
            let (w, h) = container.level_size(level);
            for face in 0..6 {
                let texel = (face * 40 + level) as u8;
                let data = vec![texel; (w * h * format.texel_size()) as usize];
                container.write_face(data, face, level).unwrap();
            }
        }
        container
    }

    #[test]
    fn faces_must_be_written_in_order() {
        let mut container =
            TextureContainer::new(ContainerVersion::Ktx1, 4, 4, OutputFormat::Rgba8Unorm, 1, true);
        let err = container.write_face(vec![0; 64], 1, 0).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::InvalidArgument);
        container.write_face(vec![0; 64], 0, 0).unwrap();
        assert!(container.write_face(vec![0; 64], 0, 0).is_err());
        assert!(container.write_face(vec![0; 63], 1, 0).is_err());
        assert!(container.write_face(vec![0; 64], 1, 1).is_err());
    }

    #[test]
    fn incomplete_container_cannot_be_saved_or_compressed() {
        let mut container =
            TextureContainer::new(ContainerVersion::Ktx2, 4, 4, OutputFormat::Rgba8Unorm, 2, true);
        container.write_face(vec![0; 64], 0, 0).unwrap();
        assert!(container.to_bytes().is_err());
        assert!(container.compress(10).is_err());
    }

    #[test]
    fn ktx1_layout_matches_levels_and_faces() {
        let container = filled(ContainerVersion::Ktx1, OutputFormat::Rgba16Float, 16, 3);
        let bytes = container.to_bytes().unwrap();
        let expected_payload: usize = (0..3)
            .map(|l| 4 + 6 * (16usize >> l).pow(2) * 8)
            .sum();
        assert_eq!(bytes.len(), ktx1::HEADER_SIZE + expected_payload);

        let summary = ContainerSummary::parse(&bytes).unwrap();
        assert_eq!(summary.version, ContainerVersion::Ktx1);
        assert_eq!((summary.width, summary.height), (16, 16));
        assert_eq!(summary.face_count, 6);
        assert_eq!(summary.level_count, 3);
        assert_eq!(summary.format_id, 0x881A);
        assert_eq!(summary.level_sizes, vec![6 * 256 * 8, 6 * 64 * 8, 6 * 16 * 8]);
        assert_eq!(summary.uncompressed_level_sizes, summary.level_sizes);

        // First face of level 0 directly follows its imageSize word.
        assert_eq!(bytes[ktx1::HEADER_SIZE + 4], 0);
        let face1 = ktx1::HEADER_SIZE + 4 + 256 * 8;
        assert_eq!(bytes[face1], 40);
    }

    #[test]
    fn ktx2_stores_smallest_level_first() {
        let container = filled(ContainerVersion::Ktx2, OutputFormat::Rgba32Float, 8, 4);
        let bytes = container.to_bytes().unwrap();
        let summary = ContainerSummary::parse(&bytes).unwrap();
        assert_eq!(summary.version, ContainerVersion::Ktx2);
        assert_eq!(summary.format_id, 109);
        assert_eq!(summary.level_count, 4);
        assert_eq!(summary.supercompression, ktx2::SUPERCOMPRESSION_NONE);
        assert_eq!(
            summary.level_sizes,
            (0..4).map(|l| 6 * (8u64 >> l).pow(2) * 16).collect::<Vec<_>>()
        );

        let offset = |level: usize| {
            let at = ktx2::HEADER_SIZE + level * ktx2::LEVEL_INDEX_ENTRY_SIZE;
            u64::from_le_bytes(bytes[at..at + 8].try_into().unwrap()) as usize
        };
        assert!(offset(3) < offset(2) && offset(2) < offset(1) && offset(1) < offset(0));
        for level in 0..4 {
            assert_eq!(offset(level) % 16, 0);
            assert_eq!(bytes[offset(level)], level as u8);
        }
        assert_eq!(offset(0) + 6 * 64 * 16, bytes.len());
    }

    #[test]
    fn single_level_diffuse_container() {
        let container = filled(ContainerVersion::Ktx1, OutputFormat::Rgba8Unorm, 4, 1);
        let summary = ContainerSummary::parse(&container.to_bytes().unwrap()).unwrap();
        assert_eq!(summary.level_count, 1);
        assert_eq!(summary.face_count, 6);
        assert_eq!(summary.level_sizes, vec![6 * 16 * 4]);
    }

    #[test]
    fn compression_changes_payload_and_format() {
        let plain = filled(ContainerVersion::Ktx1, OutputFormat::Rgba16Float, 8, 4);
        let mut compressed = filled(ContainerVersion::Ktx1, OutputFormat::Rgba16Float, 8, 4);
        compressed.compress(128).unwrap();
        assert_eq!(compressed.payload_format(), PayloadFormat::Bc6hUfloat);

        let plain_bytes = plain.to_bytes().unwrap();
        let compressed_bytes = compressed.to_bytes().unwrap();
        assert_ne!(plain_bytes, compressed_bytes);

        let summary = ContainerSummary::parse(&compressed_bytes).unwrap();
        assert_eq!(summary.format_id, 0x8E8F);
        // 8x8 is 4 blocks, 4x4 one, 2x2 and 1x1 pad up to one block each.
        assert_eq!(summary.level_sizes, vec![6 * 64, 6 * 16, 6 * 16, 6 * 16]);
        assert!(compressed.write_face(vec![0; 16], 0, 0).is_err());
    }

    #[test]
    fn ktx2_compression_uses_zstd() {
        let mut container = filled(ContainerVersion::Ktx2, OutputFormat::Rgba8Unorm, 8, 2);
        container.compress(200).unwrap();
        let bytes = container.to_bytes().unwrap();
        let summary = ContainerSummary::parse(&bytes).unwrap();
        assert_eq!(summary.supercompression, ktx2::SUPERCOMPRESSION_ZSTD);
        assert_eq!(summary.format_id, 145);

        // The level index records the block-compressed size before supercompression.
        let at = ktx2::HEADER_SIZE;
        let offset = u64::from_le_bytes(bytes[at..at + 8].try_into().unwrap()) as usize;
        let length = u64::from_le_bytes(bytes[at + 8..at + 16].try_into().unwrap()) as usize;
        let uncompressed = u64::from_le_bytes(bytes[at + 16..at + 24].try_into().unwrap());
        assert_eq!(uncompressed, 6 * 4 * 16);
        let level0 = zstd::decode_all(&bytes[offset..offset + length]).unwrap();
        assert_eq!(level0.len() as u64, uncompressed);

        // 8x8 is 2x2 blocks, 4x4 a single block, 16 bytes each.
        assert_eq!(summary.uncompressed_level_sizes, vec![6 * 4 * 16, 6 * 16]);
        assert_eq!(summary.level_sizes[0], length as u64);
    }

    #[test]
    fn quality_zero_leaves_payload_untouched() {
        let mut container = filled(ContainerVersion::Ktx2, OutputFormat::Rgba16Float, 4, 1);
        let before = container.to_bytes().unwrap();
        container.compress(0).unwrap();
        assert_eq!(container.to_bytes().unwrap(), before);
    }

    #[test]
    fn rejects_non_ktx_bytes() {
        assert!(ContainerSummary::parse(b"DDS 1234567890123").is_err());
        assert!(ContainerSummary::parse(&ktx2::IDENTIFIER[..8]).is_err());
    }
}

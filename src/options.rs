use std::{
    fmt,
    path::{Path, PathBuf},
    str::FromStr,
};

use crate::error::{IblError, Result};

/// Pixel format of the serialized textures.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OutputFormat {
    Rgba8Unorm,
    Rgba16Float,
    Rgba32Float,
}

impl OutputFormat {
    /// Format every intermediate cubemap is rendered in.
    pub const WORKING: OutputFormat = OutputFormat::Rgba16Float;

    pub fn texture_format(self) -> wgpu::TextureFormat {
        match self {
            OutputFormat::Rgba8Unorm => wgpu::TextureFormat::Rgba8Unorm,
            OutputFormat::Rgba16Float => wgpu::TextureFormat::Rgba16Float,
            OutputFormat::Rgba32Float => wgpu::TextureFormat::Rgba32Float,
        }
    }

    /// Bytes per texel.
    pub fn texel_size(self) -> u32 {
        match self {
            OutputFormat::Rgba8Unorm => 4,
            OutputFormat::Rgba16Float => 8,
            OutputFormat::Rgba32Float => 16,
        }
    }

    pub fn is_float(self) -> bool {
        !matches!(self, OutputFormat::Rgba8Unorm)
    }

    pub fn vk_format(self) -> u32 {
        match self {
            OutputFormat::Rgba8Unorm => 37,
            OutputFormat::Rgba16Float => 97,
            OutputFormat::Rgba32Float => 109,
        }
    }

    pub fn from_vk_format(value: u32) -> Option<Self> {
        match value {
            37 => Some(OutputFormat::Rgba8Unorm),
            97 => Some(OutputFormat::Rgba16Float),
            109 => Some(OutputFormat::Rgba32Float),
            _ => None,
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OutputFormat::Rgba8Unorm => "rgba8",
            OutputFormat::Rgba16Float => "rgba16f",
            OutputFormat::Rgba32Float => "rgba32f",
        };
        f.write_str(name)
    }
}

impl FromStr for OutputFormat {
    type Err = IblError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "rgba8" | "rgba8unorm" | "r8g8b8a8_unorm" => Ok(OutputFormat::Rgba8Unorm),
            "rgba16f" | "rgba16float" | "r16g16b16a16_sfloat" => Ok(OutputFormat::Rgba16Float),
            "rgba32f" | "rgba32float" | "r32g32b32a32_sfloat" => Ok(OutputFormat::Rgba32Float),
            other => other
                .parse::<u32>()
                .ok()
                .and_then(OutputFormat::from_vk_format)
                .ok_or_else(|| IblError::invalid(format!("unknown output format {s:?}"))),
        }
    }
}

/// Texture container flavour. Version 1 is KTX 1.1, version 2 is KTX 2.0.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ContainerVersion {
    Ktx1,
    Ktx2,
}

impl ContainerVersion {
    pub fn extension(self) -> &'static str {
        match self {
            ContainerVersion::Ktx1 => "ktx",
            ContainerVersion::Ktx2 => "ktx2",
        }
    }
}

impl TryFrom<u32> for ContainerVersion {
    type Error = IblError;

    fn try_from(value: u32) -> Result<Self> {
        match value {
            1 => Ok(ContainerVersion::Ktx1),
            2 => Ok(ContainerVersion::Ktx2),
            v => Err(IblError::invalid(format!(
                "container version must be 1 or 2, got {v}"
            ))),
        }
    }
}

#[derive(Clone, Debug)]
pub struct SampleOptions {
    pub input: PathBuf,
    pub specular_output: PathBuf,
    pub diffuse_output: PathBuf,
    pub version: ContainerVersion,
    /// 0 writes uncompressed payloads.
    pub compression_quality: u32,
    pub resolution: u32,
    pub mip_count: u32,
    pub sample_count: u32,
    pub target_format: OutputFormat,
    pub shader_dir: PathBuf,
}

impl SampleOptions {
    /// Options with the default parameters and output paths derived from the input.
    pub fn new(input: impl Into<PathBuf>) -> Self {
        let input = input.into();
        let version = ContainerVersion::Ktx1;
        let (specular_output, diffuse_output) = default_outputs(&input, version);
        Self {
            input,
            specular_output,
            diffuse_output,
            version,
            compression_quality: 0,
            resolution: 1024,
            mip_count: 5,
            sample_count: 1024,
            target_format: OutputFormat::WORKING,
            shader_dir: default_shader_dir(),
        }
    }

    /// Rejects parameter combinations before any device work happens.
    pub fn validate(&self) -> Result<()> {
        if self.resolution == 0 {
            return Err(IblError::invalid("cubemap resolution must be positive"));
        }
        if self.mip_count == 0 {
            return Err(IblError::invalid("mip level count must be positive"));
        }
        if self.sample_count == 0 {
            return Err(IblError::invalid("sample count must be positive"));
        }
        // Shifting by the full width would wrap, treat it as zero.
        if self.mip_count >= u32::BITS || self.resolution >> self.mip_count < 1 {
            return Err(IblError::invalid(format!(
                "resolution {} is too small for {} mip levels",
                self.resolution, self.mip_count
            )));
        }
        Ok(())
    }

    pub fn needs_conversion(&self) -> bool {
        self.target_format != OutputFormat::WORKING
    }
}

/// Number of levels in a full chain for a cube of side `side`: floor(log2(side)) + 1.
pub fn max_mip_levels(side: u32) -> u32 {
    if side == 0 {
        0
    } else {
        u32::BITS - side.leading_zeros()
    }
}

/// Roughness used to filter level `level` of a `level_count` level specular chain.
pub fn roughness_for_level(level: u32, level_count: u32) -> f32 {
    level as f32 / level_count as f32
}

pub fn default_outputs(input: &Path, version: ContainerVersion) -> (PathBuf, PathBuf) {
    let stem = crate::strip_extension(input);
    let ext = version.extension();
    (
        PathBuf::from(format!("{stem}.specular.{ext}")),
        PathBuf::from(format!("{stem}.diffuse.{ext}")),
    )
}

pub fn default_shader_dir() -> PathBuf {
    PathBuf::from(concat!(env!("CARGO_MANIFEST_DIR"), "/shaders"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(resolution: u32, mip_count: u32) -> SampleOptions {
        SampleOptions {
            resolution,
            mip_count,
            ..SampleOptions::new("sky.hdr")
        }
    }

    #[test]
    fn max_mip_levels_is_log2_plus_one() {
        assert_eq!(max_mip_levels(1), 1);
        assert_eq!(max_mip_levels(2), 2);
        assert_eq!(max_mip_levels(64), 7);
        assert_eq!(max_mip_levels(1024), 11);
        assert_eq!(max_mip_levels(1000), 10);
        for side in [1u32, 3, 17, 256, 4096] {
            let levels = max_mip_levels(side);
            assert!(side >> (levels - 1) >= 1);
            assert_eq!(side >> levels, 0);
        }
    }

    #[test]
    fn roughness_is_level_over_count() {
        assert_eq!(roughness_for_level(0, 5), 0.0);
        assert_eq!(roughness_for_level(1, 5), 0.2);
        assert_eq!(roughness_for_level(4, 5), 0.8);
        for m in 0..8 {
            assert!(roughness_for_level(m, 8) < 1.0);
        }
    }

    #[test]
    fn rejects_resolution_too_small_for_mip_count() {
        let err = options(1, 1).validate().unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::InvalidArgument);
        assert!(options(4, 3).validate().is_err());
        assert!(options(4, 2).validate().is_ok());
        assert!(options(64, 1).validate().is_ok());
        assert!(options(256, 5).validate().is_ok());
        assert!(options(256, 40).validate().is_err());
    }

    #[test]
    fn rejects_zero_parameters() {
        assert!(options(0, 1).validate().is_err());
        assert!(options(64, 0).validate().is_err());
        let zero_samples = SampleOptions {
            sample_count: 0,
            ..options(64, 1)
        };
        assert!(zero_samples.validate().is_err());
    }

    #[test]
    fn parses_output_formats() {
        assert_eq!("rgba8".parse::<OutputFormat>().unwrap(), OutputFormat::Rgba8Unorm);
        assert_eq!("RGBA16F".parse::<OutputFormat>().unwrap(), OutputFormat::Rgba16Float);
        assert_eq!("109".parse::<OutputFormat>().unwrap(), OutputFormat::Rgba32Float);
        assert!("bgra8".parse::<OutputFormat>().is_err());
        assert!("12".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn container_version_from_number() {
        assert_eq!(ContainerVersion::try_from(1).unwrap(), ContainerVersion::Ktx1);
        assert_eq!(ContainerVersion::try_from(2).unwrap(), ContainerVersion::Ktx2);
        assert!(ContainerVersion::try_from(3).is_err());
    }

    #[test]
    fn default_outputs_follow_input_stem() {
        let (specular, diffuse) = default_outputs(Path::new("assets/sky.hdr"), ContainerVersion::Ktx2);
        assert_eq!(specular, Path::new("assets/sky.specular.ktx2"));
        assert_eq!(diffuse, Path::new("assets/sky.diffuse.ktx2"));
    }

    #[test]
    fn conversion_only_when_formats_differ() {
        let mut opts = options(64, 1);
        assert!(!opts.needs_conversion());
        opts.target_format = OutputFormat::Rgba8Unorm;
        assert!(opts.needs_conversion());
    }
}

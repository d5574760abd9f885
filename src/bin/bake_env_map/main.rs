use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use ibl_bake::container::ContainerSummary;
use ibl_bake::options::{default_outputs, default_shader_dir};
use ibl_bake::{ContainerVersion, IblError, OutputFormat, SampleOptions};

#[derive(Parser)]
#[command(name = "bake_env_map")]
#[command(about = "Bake specular and diffuse IBL cubemaps from an equirectangular HDR panorama")]
#[command(version)]
struct Cli {
    /// Equirectangular panorama (.hdr, .exr, or anything the image crate decodes)
    input: PathBuf,

    /// Specular output (defaults to <input stem>.specular.ktx[2])
    #[arg(long)]
    specular: Option<PathBuf>,

    /// Diffuse output (defaults to <input stem>.diffuse.ktx[2])
    #[arg(long)]
    diffuse: Option<PathBuf>,

    /// Container version, 1 for KTX 1.1 or 2 for KTX 2.0
    #[arg(long, default_value_t = 1)]
    ktx_version: u32,

    /// Compression quality, 0 writes uncompressed data
    #[arg(short, long, default_value_t = 0)]
    quality: u32,

    /// Cube face side length of the specular base level and the diffuse map
    #[arg(short, long, default_value_t = 1024)]
    resolution: u32,

    /// Number of specular mip levels
    #[arg(short, long, default_value_t = 5)]
    mip_count: u32,

    /// Samples per texel of the convolutions
    #[arg(short, long, default_value_t = 1024)]
    samples: u32,

    /// Output pixel format: rgba8, rgba16f, rgba32f or a Vulkan format number
    #[arg(short, long, default_value = "rgba16f")]
    format: String,

    /// Directory containing the WGSL shaders
    #[arg(long, env = "IBL_SHADER_DIR")]
    shader_dir: Option<PathBuf>,
}

fn run(cli: Cli) -> Result<()> {
    let version = ContainerVersion::try_from(cli.ktx_version)?;
    let target_format: OutputFormat = cli.format.parse()?;
    let (default_specular, default_diffuse) = default_outputs(&cli.input, version);

    let options = SampleOptions {
        specular_output: cli.specular.unwrap_or(default_specular),
        diffuse_output: cli.diffuse.unwrap_or(default_diffuse),
        version,
        compression_quality: cli.quality,
        resolution: cli.resolution,
        mip_count: cli.mip_count,
        sample_count: cli.samples,
        target_format,
        shader_dir: cli.shader_dir.unwrap_or_else(default_shader_dir),
        ..SampleOptions::new(&cli.input)
    };

    ibl_bake::sample(&options)?;

    for path in [&options.specular_output, &options.diffuse_output] {
        let summary = ContainerSummary::read(path)
            .with_context(|| format!("re-reading {}", path.display()))?;
        log::info!(
            "{}: {}x{}, {} faces, {} levels, format {:#x}, supercompression {}",
            path.display(),
            summary.width,
            summary.height,
            summary.face_count,
            summary.level_count,
            summary.format_id,
            summary.supercompression
        );
    }
    Ok(())
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            let code = e
                .downcast_ref::<IblError>()
                .map_or(1, |ibl| ibl.kind().code());
            ExitCode::from(code)
        }
    }
}

use crate::error::{ErrorKind, IblError, Result};
use crate::gpu::{shader::ShaderLibrary, GpuContext, GpuImage, ResourceStateTable};
use crate::options::{max_mip_levels, OutputFormat, SampleOptions};
use crate::passes::{convert, filter, mipmap, projector, readback, upload};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    Init,
    Uploaded,
    Projected,
    MipGenerated,
    SpecularFiltered,
    DiffuseFiltered,
    Converted,
    Serialized,
    Done,
    Failed(ErrorKind),
}

impl Stage {
    /// Stage reached after `self` succeeds. `Converted` is skipped when no conversion runs.
    pub fn next(self, converts: bool) -> Stage {
        match self {
            Stage::Init => Stage::Uploaded,
            Stage::Uploaded => Stage::Projected,
            Stage::Projected => Stage::MipGenerated,
            Stage::MipGenerated => Stage::SpecularFiltered,
            Stage::SpecularFiltered => Stage::DiffuseFiltered,
            Stage::DiffuseFiltered if converts => Stage::Converted,
            Stage::DiffuseFiltered | Stage::Converted => Stage::Serialized,
            Stage::Serialized | Stage::Done => Stage::Done,
            Stage::Failed(kind) => Stage::Failed(kind),
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Done | Stage::Failed(_))
    }
}

/// Runs one bake: upload, project, mip chain, specular and diffuse filtering, optional
/// conversion, then serialization of both cubemaps.
pub struct PipelineDriver {
    options: SampleOptions,
    stage: Stage,
    history: Vec<Stage>,
}

impl PipelineDriver {
    pub fn new(options: SampleOptions) -> Self {
        Self {
            options,
            stage: Stage::Init,
            history: vec![Stage::Init],
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Every stage entered so far, starting with `Init`.
    pub fn history(&self) -> &[Stage] {
        &self.history
    }

    fn advance(&mut self) {
        let next = self.stage.next(self.options.needs_conversion());
        log::info!("{:?} -> {:?}", self.stage, next);
        self.stage = next;
        self.history.push(next);
    }

    /// Runs to completion. On failure the driver ends in `Failed` with the error's kind
    /// and every GPU resource created so far has been released.
    pub fn run(&mut self) -> Result<()> {
        if self.stage.is_terminal() {
            return Err(IblError::invalid("driver has already run"));
        }
        match self.run_stages() {
            Ok(()) => {
                self.advance();
                Ok(())
            }
            Err(e) => {
                log::error!("bake failed in {:?}: {e}", self.stage);
                self.stage = Stage::Failed(e.kind());
                self.history.push(self.stage);
                Err(e)
            }
        }
    }

    fn run_stages(&mut self) -> Result<()> {
        let options = self.options.clone();
        options.validate()?;
        let panorama = upload::Panorama::load(&options.input)?;

        let ctx = GpuContext::new()?;
        if options.resolution > ctx.max_texture_dimension() {
            return Err(IblError::invalid(format!(
                "resolution {} exceeds the device limit {}",
                options.resolution,
                ctx.max_texture_dimension()
            )));
        }
        let conversion = if options.needs_conversion() {
            let format = options.target_format;
            let path = convert::conversion_path(
                format,
                &ctx.format_features(format.texture_format()),
            )?;
            log::debug!("{format} outputs are written through a {path:?} pass");
            Some(path)
        } else {
            None
        };
        let shaders = ShaderLibrary::load(&ctx.device, &options.shader_dir)?;
        let mut states = ResourceStateTable::default();

        let side = options.resolution;
        let source_levels = max_mip_levels(side);

        let panorama_image = ctx.scoped("upload", || {
            upload::upload_panorama(&ctx, &mut states, &panorama)
        })?;
        self.advance();

        let cube = ctx.scoped("projection", || {
            projector::project_to_cubemap(
                &ctx,
                &mut states,
                &shaders,
                &panorama_image,
                side,
                source_levels,
            )
        })?;
        drop(panorama_image);
        self.advance();

        ctx.scoped("mip chain", || {
            mipmap::generate_mipmaps(&ctx, &mut states, &shaders, &cube)
        })?;
        self.advance();

        let specular = ctx.scoped("specular filter", || {
            filter::filter_specular(
                &ctx,
                &mut states,
                &shaders,
                &cube,
                side,
                options.mip_count,
                options.sample_count,
            )
        })?;
        self.advance();

        let diffuse = ctx.scoped("diffuse filter", || {
            filter::filter_diffuse(&ctx, &mut states, &shaders, &cube, side, options.sample_count)
        })?;
        drop(cube);
        self.advance();

        let (specular, diffuse): (GpuImage, GpuImage) = if let Some(path) = conversion {
            let converted = ctx.scoped("format conversion", || {
                let specular = convert::convert_format(
                    &ctx,
                    &mut states,
                    &shaders,
                    &specular,
                    options.target_format,
                    path,
                )?;
                let diffuse = convert::convert_format(
                    &ctx,
                    &mut states,
                    &shaders,
                    &diffuse,
                    options.target_format,
                    path,
                )?;
                Ok((specular, diffuse))
            })?;
            self.advance();
            converted
        } else {
            (specular, diffuse)
        };
        let format = if options.needs_conversion() {
            options.target_format
        } else {
            OutputFormat::WORKING
        };

        // The two outputs are independent: a failure on the second keeps the first.
        for (image, path) in [
            (&specular, &options.specular_output),
            (&diffuse, &options.diffuse_output),
        ] {
            ctx.scoped("serialization", || {
                readback::download_cubemap(
                    &ctx,
                    &mut states,
                    image,
                    format,
                    options.version,
                    options.compression_quality,
                    path,
                )
            })?;
        }
        self.advance();

        log::debug!(
            "{} barriers recorded over the run",
            states.barrier_count()
        );
        Ok(())
    }
}

/// Bakes the specular and diffuse cubemaps described by `options`.
pub fn sample(options: &SampleOptions) -> Result<()> {
    PipelineDriver::new(options.clone()).run()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stages_follow_pipeline_order() {
        let mut stage = Stage::Init;
        let mut seen = vec![stage];
        while stage != Stage::Done {
            stage = stage.next(false);
            seen.push(stage);
        }
        assert_eq!(
            seen,
            vec![
                Stage::Init,
                Stage::Uploaded,
                Stage::Projected,
                Stage::MipGenerated,
                Stage::SpecularFiltered,
                Stage::DiffuseFiltered,
                Stage::Serialized,
                Stage::Done,
            ]
        );
    }

    #[test]
    fn conversion_inserts_converted_stage() {
        assert_eq!(Stage::DiffuseFiltered.next(true), Stage::Converted);
        assert_eq!(Stage::Converted.next(true), Stage::Serialized);
        assert_eq!(Stage::DiffuseFiltered.next(false), Stage::Serialized);
    }

    #[test]
    fn failed_is_terminal() {
        let failed = Stage::Failed(ErrorKind::DeviceOperationFailed);
        assert!(failed.is_terminal());
        assert_eq!(failed.next(true), failed);
        assert!(Stage::Done.is_terminal());
        assert!(!Stage::Serialized.is_terminal());
    }

    #[test]
    fn invalid_resolution_fails_before_device_work() {
        let options = SampleOptions {
            resolution: 1,
            mip_count: 1,
            ..SampleOptions::new("missing.hdr")
        };
        let mut driver = PipelineDriver::new(options);
        let err = driver.run().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert_eq!(driver.stage(), Stage::Failed(ErrorKind::InvalidArgument));
        assert_eq!(driver.history(), &[Stage::Init, driver.stage()]);
    }

    #[test]
    fn missing_panorama_is_reported_before_device_init() {
        let dir = std::env::temp_dir().join("ibl_bake_missing_panorama");
        let _ = std::fs::create_dir_all(&dir);
        let options = SampleOptions {
            specular_output: dir.join("out.specular.ktx"),
            diffuse_output: dir.join("out.diffuse.ktx"),
            resolution: 64,
            mip_count: 1,
            ..SampleOptions::new(dir.join("does_not_exist.hdr"))
        };
        let err = sample(&options).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InputPanoramaFileNotFound);
        assert!(!options.specular_output.exists());
        assert!(!options.diffuse_output.exists());
    }

    #[test]
    fn driver_runs_once() {
        let mut driver = PipelineDriver::new(SampleOptions {
            resolution: 1,
            mip_count: 1,
            ..SampleOptions::new("missing.hdr")
        });
        assert!(driver.run().is_err());
        assert_eq!(driver.run().unwrap_err().kind(), ErrorKind::InvalidArgument);
    }
}

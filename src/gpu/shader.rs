use std::path::Path;

use pollster::FutureExt as _;

use crate::error::{IblError, Result};

pub const PANORAMA_SHADER: &str = "panorama.wgsl";
pub const FILTER_SHADER: &str = "filter.wgsl";
pub const BLIT_SHADER: &str = "blit.wgsl";
pub const CONVERT_SHADER: &str = "convert.wgsl";

fn read_shader(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|inner| IblError::ShaderFileNotFound {
        path: path.to_owned(),
        inner,
    })
}

pub fn create_shader_module(device: &wgpu::Device, path: &Path) -> Result<wgpu::ShaderModule> {
    let source = read_shader(path)?;
    let label = path.file_name().and_then(|n| n.to_str()).unwrap_or("Shader");

    device.push_error_scope(wgpu::ErrorFilter::Validation);
    let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(label),
        source: wgpu::ShaderSource::Wgsl(source.into()),
    });
    match device.pop_error_scope().block_on() {
        Some(e) => Err(IblError::ShaderCompilationFailed {
            path: path.to_owned(),
            reason: e.to_string(),
        }),
        None => Ok(shader),
    }
}

/// Every shader module a bake run needs, compiled up front.
pub struct ShaderLibrary {
    pub panorama: wgpu::ShaderModule,
    pub filter: wgpu::ShaderModule,
    pub blit: wgpu::ShaderModule,
    pub convert: wgpu::ShaderModule,
}

impl ShaderLibrary {
    pub fn load(device: &wgpu::Device, dir: &Path) -> Result<Self> {
        let panorama = create_shader_module(device, &dir.join(PANORAMA_SHADER))?;
        let filter = create_shader_module(device, &dir.join(FILTER_SHADER))?;
        let blit = create_shader_module(device, &dir.join(BLIT_SHADER))?;
        let convert = create_shader_module(device, &dir.join(CONVERT_SHADER))?;
        log::debug!("compiled shaders from {}", dir.display());
        Ok(Self {
            panorama,
            filter,
            blit,
            convert,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_shader_is_reported_with_its_path() {
        let path = Path::new("does/not/exist/filter.wgsl");
        match read_shader(path) {
            Err(IblError::ShaderFileNotFound { path: p, .. }) => assert_eq!(p, path),
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    fn shipped_shaders_are_present() {
        let dir = crate::options::default_shader_dir();
        assert!(read_shader(&dir.join(PANORAMA_SHADER)).is_ok());
        assert!(read_shader(&dir.join(FILTER_SHADER)).is_ok());
        assert!(read_shader(&dir.join(BLIT_SHADER)).is_ok());
        assert!(read_shader(&dir.join(CONVERT_SHADER)).is_ok());
    }
}

use std::path::PathBuf;

/// Coarse failure category of a bake run. `Success` is `Ok(())`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidArgument,
    InputPanoramaFileNotFound,
    ShaderFileNotFound,
    ShaderCompilationFailed,
    DeviceInitializationFailed,
    DeviceOperationFailed,
    ContainerWriteFailed,
}

impl ErrorKind {
    /// Process exit code used by the command-line tool.
    pub fn code(self) -> u8 {
        match self {
            ErrorKind::InvalidArgument => 1,
            ErrorKind::InputPanoramaFileNotFound => 2,
            ErrorKind::ShaderFileNotFound => 3,
            ErrorKind::ShaderCompilationFailed => 4,
            ErrorKind::DeviceInitializationFailed => 5,
            ErrorKind::DeviceOperationFailed => 6,
            ErrorKind::ContainerWriteFailed => 7,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum IblError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Input panorama {path:?} could not be read: {reason}")]
    InputPanoramaFileNotFound { path: PathBuf, reason: String },

    #[error("Shader file {path:?} not found: {inner}")]
    ShaderFileNotFound {
        path: PathBuf,
        inner: std::io::Error,
    },

    #[error("Shader {path:?} failed to compile: {reason}")]
    ShaderCompilationFailed { path: PathBuf, reason: String },

    #[error("Device initialization failed: {0}")]
    DeviceInitializationFailed(String),

    #[error("Device operation failed during {stage}: {reason}")]
    DeviceOperationFailed { stage: String, reason: String },

    #[error("Writing container {path:?} failed: {reason}")]
    ContainerWriteFailed { path: PathBuf, reason: String },
}

impl IblError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            IblError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            IblError::InputPanoramaFileNotFound { .. } => ErrorKind::InputPanoramaFileNotFound,
            IblError::ShaderFileNotFound { .. } => ErrorKind::ShaderFileNotFound,
            IblError::ShaderCompilationFailed { .. } => ErrorKind::ShaderCompilationFailed,
            IblError::DeviceInitializationFailed(_) => ErrorKind::DeviceInitializationFailed,
            IblError::DeviceOperationFailed { .. } => ErrorKind::DeviceOperationFailed,
            IblError::ContainerWriteFailed { .. } => ErrorKind::ContainerWriteFailed,
        }
    }

    pub(crate) fn device(stage: &str, reason: impl ToString) -> Self {
        IblError::DeviceOperationFailed {
            stage: stage.to_owned(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        IblError::InvalidArgument(reason.into())
    }
}

pub type Result<T, E = IblError> = std::result::Result<T, E>;

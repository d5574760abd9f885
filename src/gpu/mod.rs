pub mod context;
pub mod image;
pub mod shader;
pub mod state;

pub use context::{CommandSequence, GpuContext};
pub use image::{GpuImage, GpuImageView, ImageDesc};
pub use state::{AccessState, ImageId, ResourceStateTable, SubresourceRange};

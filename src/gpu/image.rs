use crate::gpu::{
    context::{GpuContext, CUBE_FACES},
    state::{ImageId, ResourceStateTable, SubresourceRange},
};

#[derive(Clone, Copy, Debug)]
pub struct ImageDesc {
    pub label: &'static str,
    pub format: wgpu::TextureFormat,
    pub width: u32,
    pub height: u32,
    pub level_count: u32,
    pub layer_count: u32,
    pub usage: wgpu::TextureUsages,
}

impl ImageDesc {
    pub fn cube(
        label: &'static str,
        format: wgpu::TextureFormat,
        side: u32,
        level_count: u32,
        usage: wgpu::TextureUsages,
    ) -> Self {
        Self {
            label,
            format,
            width: side,
            height: side,
            level_count,
            layer_count: CUBE_FACES,
            usage,
        }
    }

    pub fn image_2d(
        label: &'static str,
        format: wgpu::TextureFormat,
        width: u32,
        height: u32,
        usage: wgpu::TextureUsages,
    ) -> Self {
        Self {
            label,
            format,
            width,
            height,
            level_count: 1,
            layer_count: 1,
            usage,
        }
    }

    pub fn is_cube(&self) -> bool {
        self.layer_count == CUBE_FACES && self.width == self.height
    }
}

/// A texture owned by the pipeline, registered in the state table on creation.
pub struct GpuImage {
    id: ImageId,
    texture: wgpu::Texture,
    desc: ImageDesc,
}

/// A view onto a contiguous subresource range, remembering which range it covers.
pub struct GpuImageView {
    pub view: wgpu::TextureView,
    pub image: ImageId,
    pub range: SubresourceRange,
}

impl GpuImage {
    pub fn new(ctx: &GpuContext, states: &mut ResourceStateTable, desc: ImageDesc) -> Self {
        let texture = ctx.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(desc.label),
            size: wgpu::Extent3d {
                width: desc.width,
                height: desc.height,
                depth_or_array_layers: desc.layer_count,
            },
            mip_level_count: desc.level_count,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: desc.format,
            usage: desc.usage,
            view_formats: &[],
        });
        let id = states.register(desc.level_count, desc.layer_count);
        Self { id, texture, desc }
    }

    pub fn id(&self) -> ImageId {
        self.id
    }

    pub fn texture(&self) -> &wgpu::Texture {
        &self.texture
    }

    pub fn desc(&self) -> &ImageDesc {
        &self.desc
    }

    /// Side length of `level`, never below 1.
    pub fn level_size(&self, level: u32) -> (u32, u32) {
        (
            (self.desc.width >> level).max(1),
            (self.desc.height >> level).max(1),
        )
    }

    pub fn all(&self) -> SubresourceRange {
        SubresourceRange::levels(0, self.desc.level_count, self.desc.layer_count)
    }

    pub fn level(&self, level: u32) -> SubresourceRange {
        SubresourceRange::level(level, self.desc.layer_count)
    }

    fn view(
        &self,
        label: &'static str,
        dimension: wgpu::TextureViewDimension,
        range: SubresourceRange,
    ) -> GpuImageView {
        let view = self.texture.create_view(&wgpu::TextureViewDescriptor {
            label: Some(label),
            dimension: Some(dimension),
            base_mip_level: range.base_mip_level,
            mip_level_count: Some(range.level_count),
            base_array_layer: range.base_array_layer,
            array_layer_count: Some(range.layer_count),
            ..Default::default()
        });
        GpuImageView {
            view,
            image: self.id,
            range,
        }
    }

    /// Whole mip chain as a cube, for sampling.
    pub fn cube_view(&self) -> GpuImageView {
        self.view("Cube View", wgpu::TextureViewDimension::Cube, self.all())
    }

    pub fn sampled_2d_view(&self) -> GpuImageView {
        self.view("Sampled View", wgpu::TextureViewDimension::D2, self.all())
    }

    /// All layers of one level as a 2D array, for sampling a single level.
    pub fn level_array_view(&self, level: u32) -> GpuImageView {
        self.view(
            "Level Array View",
            wgpu::TextureViewDimension::D2Array,
            self.level(level),
        )
    }

    /// One attachment-compatible view per layer of `level`.
    pub fn layer_views(&self, level: u32) -> Vec<GpuImageView> {
        (0..self.desc.layer_count)
            .map(|layer| {
                self.view(
                    "Face View",
                    wgpu::TextureViewDimension::D2,
                    SubresourceRange {
                        base_mip_level: level,
                        level_count: 1,
                        base_array_layer: layer,
                        layer_count: 1,
                    },
                )
            })
            .collect()
    }
}

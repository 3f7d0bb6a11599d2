//! The params structs bound next to the images, laid out as the `Meta`
//! structs of the WGSL programs.

#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub(crate) struct BiasAddMeta {
    pub width: u32,
    pub image_width: u32,
    pub image_height: u32,
    pub _padding: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub(crate) struct ResizeBilinearMeta {
    pub in_height: u32,
    pub in_width: u32,
    pub in_image_width: u32,
    pub out_height: u32,
    pub out_width: u32,
    pub out_image_width: u32,
    pub out_image_height: u32,
    pub _padding: u32,
}

/// one entry of the `xs` / `ys` tables of resize_bilinear
#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub(crate) struct Interpolation {
    pub lower: u32,
    pub upper: u32,
    pub weight: f32,
    pub _padding: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub(crate) struct LayoutMeta {
    pub width: u32,
    pub channels: u32,
    pub image_width: u32,
    pub image_height: u32,
}

mod bias_add;
mod buffer_to_image;
mod meta;
mod resize_bilinear;

use std::sync::Arc;

use super::GpuImage;
use crate::precondition;
use crate::tensor::BufferType;
use crate::tensor::Tensor;

/// The gpu image behind a kernel argument, which must be packed as `buffer_type`.
pub(crate) fn image_arg(t: &Tensor, buffer_type: BufferType, what: &str) -> Arc<GpuImage> {
    precondition!(
        t.buffer_type() == Some(buffer_type),
        "{} must be an image of {:?}, but got {:?}",
        what,
        buffer_type,
        t.buffer_type()
    );
    match t.gpu_image_handle() {
        Some(image) => image,
        None => {
            precondition!(false, "{} must be an image on the gpu", what);
            unreachable!()
        }
    }
}

pub(crate) fn entry(binding: u32, resource: wgpu::BindingResource<'_>) -> wgpu::BindGroupEntry<'_> {
    wgpu::BindGroupEntry { binding, resource }
}

use std::sync::Arc;

use half::f16;

use super::context::GpuContext;
use crate::error::Result;
use crate::precondition;
use crate::tensor::DataType;
use crate::tensor::Image;
use crate::tensor::ImageTexels;

/// An image resident on the gpu: a storage buffer of `width * height` texels,
/// row by row. f32 texels take 16 bytes, f16 texels are packed into 8.
#[derive(Debug)]
pub struct GpuImage {
    width: usize,
    height: usize,
    dtype: DataType,
    buf: wgpu::Buffer,
    ctx: Arc<GpuContext>,
}

fn texel_bytes(dtype: DataType) -> usize {
    dtype.size_of() * 4
}

impl GpuImage {
    pub(crate) fn new(
        ctx: Arc<GpuContext>,
        width: usize,
        height: usize,
        dtype: DataType,
    ) -> Result<Self> {
        precondition!(
            dtype.is_float(),
            "image texels must be f32 or f16, but got {}",
            dtype
        );
        let buf = ctx.alloc_buffer("image", width * height * texel_bytes(dtype))?;
        Ok(Self {
            width,
            height,
            dtype,
            buf,
            ctx,
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn dtype(&self) -> DataType {
        self.dtype
    }

    pub(crate) fn binding(&self) -> wgpu::BindingResource<'_> {
        self.buf.as_entire_binding()
    }

    /// Reads the texels back into a host image. Work still queued on the
    /// device is not waited for, sync it first.
    pub fn read(&self) -> Result<Image> {
        let bytes = self.width * self.height * texel_bytes(self.dtype);
        let dtype = self.dtype;
        let texels = self.ctx.read_buffer(&self.buf, bytes, |b| match dtype {
            DataType::F16 => ImageTexels::F16(bytemuck::pod_collect_to_vec::<u8, [f16; 4]>(b)),
            _ => ImageTexels::F32(bytemuck::pod_collect_to_vec::<u8, [f32; 4]>(b)),
        })?;
        Ok(Image::from_texels(self.width, self.height, texels))
    }

    /// copies the texels into a new image on the gpu.
    pub(crate) fn duplicate(&self) -> Self {
        Self {
            width: self.width,
            height: self.height,
            dtype: self.dtype,
            buf: self.ctx.duplicate_buffer("image", &self.buf),
            ctx: self.ctx.clone(),
        }
    }
}

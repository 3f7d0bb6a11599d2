use std::time::Instant;

use super::primitives;
use super::CpuDevice;
use crate::backends::layout::float_buffer;
use crate::backends::layout::pack_texels;
use crate::backends::layout::unpack_texels;
use crate::backends::BiasAddKernel;
use crate::backends::LayoutKernel;
use crate::backends::ResizeBilinearKernel;
use crate::error::Result;
use crate::future::CallStats;
use crate::future::Completion;
use crate::precondition;
use crate::tensor::image::image_shape;
use crate::tensor::BufferType;
use crate::tensor::DataType;
use crate::tensor::DeviceType;
use crate::tensor::Image;
use crate::tensor::Tensor;

// cpu kernels finish before returning, so every completion is already done.
fn done(started: Instant) -> Completion {
    Completion::ready(CallStats::immediate(started))
}

impl BiasAddKernel for CpuDevice {
    fn bias_add(&self, input: &Tensor, bias: &Tensor, output: &mut Tensor) -> Result<Completion> {
        let started = Instant::now();
        let shape = input.shape().to_vec();
        output.resize(&shape);
        {
            let src = input.map()?;
            let bias = bias.map()?;
            let mut dst = output.map_mut()?;
            primitives::bias_add(
                self.pool(),
                src.as_f32()?,
                bias.as_f32()?,
                dst.as_f32_mut()?,
                shape[2] * shape[3],
            );
        }
        Ok(done(started))
    }
}

impl ResizeBilinearKernel for CpuDevice {
    fn resize_bilinear(
        &self,
        input: &Tensor,
        out_size: [usize; 2],
        align_corners: bool,
        output: &mut Tensor,
    ) -> Result<Completion> {
        let started = Instant::now();
        let in_shape = [input.dim(0), input.dim(1), input.dim(2), input.dim(3)];
        output.resize(&[in_shape[0], out_size[0], out_size[1], in_shape[3]]);
        {
            let src = input.map()?;
            let mut dst = output.map_mut()?;
            primitives::resize_bilinear(
                self.pool(),
                src.as_f32()?,
                in_shape,
                dst.as_f32_mut()?,
                out_size,
                align_corners,
            );
        }
        Ok(done(started))
    }
}

// The host side reference of the layout conversion. It produces the same
// texels as the gpu converter, without going through a command queue.
impl LayoutKernel for CpuDevice {
    fn buffer_to_image(
        &self,
        input: &Tensor,
        buffer_type: BufferType,
        dtype: DataType,
        output: &mut Tensor,
    ) -> Result<Completion> {
        let started = Instant::now();
        let texels = {
            let src = input.map()?;
            pack_texels(self.pool(), &src, input.shape(), buffer_type)
        };
        let [width, height] = image_shape(input.shape(), buffer_type);
        let image = Image::from_f32_texels(width, height, dtype, texels);
        *output = Tensor::from_image(image, buffer_type, input.shape());
        Ok(done(started))
    }

    fn image_to_buffer(
        &self,
        input: &Tensor,
        dtype: DataType,
        output: &mut Tensor,
    ) -> Result<Completion> {
        let started = Instant::now();
        let buffer_type = match input.buffer_type() {
            Some(bt) => bt,
            None => {
                precondition!(false, "image_to_buffer requires an image input");
                unreachable!()
            }
        };
        // a gpu image is read back to the host first
        let image = input.read_image()?;
        let data = unpack_texels(self.pool(), &image, input.shape(), buffer_type);
        *output = Tensor::from_buffer(float_buffer(dtype, data), input.shape(), DeviceType::Cpu)?;
        Ok(done(started))
    }
}

use super::entry;
use super::image_arg;
use super::meta::BiasAddMeta;
use crate::backends::gpu::GpuDevice;
use crate::backends::BiasAddKernel;
use crate::error::Result;
use crate::future::Completion;
use crate::tensor::image::image_shape;
use crate::tensor::image::nhwc_shape;
use crate::tensor::BufferType;
use crate::tensor::Tensor;

impl BiasAddKernel for GpuDevice {
    fn bias_add(&self, input: &Tensor, bias: &Tensor, output: &mut Tensor) -> Result<Completion> {
        let input_image = image_arg(input, BufferType::InOutChannel, "bias_add input");
        let bias_image = image_arg(bias, BufferType::Argument, "bias_add bias");
        let kernel = self.kernel("bias_add", "bias_add", input.dtype())?;

        let [image_width, image_height] = image_shape(input.shape(), BufferType::InOutChannel);
        let output_image = self.alloc_image([image_width, image_height], kernel.dtype())?;
        *output = Tensor::from_gpu_image(output_image.clone(), BufferType::InOutChannel, input.shape());

        let meta = BiasAddMeta {
            width: nhwc_shape(input.shape())[2] as u32,
            image_width: image_width as u32,
            image_height: image_height as u32,
            _padding: 0,
        };
        let ctx = self.context();
        self.enqueue("bias_add", move || {
            let meta_buf = ctx.make_storage_buffer("meta", bytemuck::bytes_of(&meta));
            let entries = &[
                entry(0, input_image.binding()),
                entry(1, bias_image.binding()),
                entry(2, meta_buf.as_entire_binding()),
                entry(3, output_image.binding()),
            ];
            ctx.dispatch(kernel.pipeline(), entries, ctx.workgroups([image_width, image_height])?);
            Ok(())
        })
    }
}

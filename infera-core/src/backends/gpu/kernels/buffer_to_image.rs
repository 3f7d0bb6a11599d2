use super::entry;
use super::image_arg;
use super::meta::LayoutMeta;
use crate::backends::gpu::GpuDevice;
use crate::backends::layout::float_buffer;
use crate::backends::LayoutKernel;
use crate::error::Result;
use crate::future::Completion;
use crate::precondition;
use crate::tensor::image::image_shape;
use crate::tensor::image::nhwc_shape;
use crate::tensor::BufferType;
use crate::tensor::DataType;
use crate::tensor::DeviceType;
use crate::tensor::Tensor;

fn buffer_to_image_entry(buffer_type: BufferType) -> &'static str {
    match buffer_type {
        BufferType::InOutChannel => "in_out_buffer_to_image",
        BufferType::Argument => "arg_buffer_to_image",
    }
}

fn image_to_buffer_entry(buffer_type: BufferType) -> &'static str {
    match buffer_type {
        BufferType::InOutChannel => "in_out_image_to_buffer",
        BufferType::Argument => "arg_image_to_buffer",
    }
}

fn layout_meta(shape: &[usize], buffer_type: BufferType) -> LayoutMeta {
    let [image_width, image_height] = image_shape(shape, buffer_type);
    let [width, channels] = match buffer_type {
        BufferType::InOutChannel => {
            let [_, _, w, c] = nhwc_shape(shape);
            [w, c]
        }
        BufferType::Argument => [1, shape[0]],
    };
    LayoutMeta {
        width: width as u32,
        channels: channels as u32,
        image_width: image_width as u32,
        image_height: image_height as u32,
    }
}

impl LayoutKernel for GpuDevice {
    fn buffer_to_image(
        &self,
        input: &Tensor,
        buffer_type: BufferType,
        dtype: DataType,
        output: &mut Tensor,
    ) -> Result<Completion> {
        let src = match input.buffer_handle() {
            Some(buf) => buf,
            None => {
                precondition!(false, "buffer_to_image requires a buffer input");
                unreachable!()
            }
        };
        let kernel = self.kernel("buffer_to_image", buffer_to_image_entry(buffer_type), dtype)?;

        let shape = input.shape().to_vec();
        let [width, height] = image_shape(&shape, buffer_type);
        let output_image = self.alloc_image([width, height], kernel.dtype())?;
        *output = Tensor::from_gpu_image(output_image.clone(), buffer_type, &shape);

        let meta = layout_meta(&shape, buffer_type);
        let ctx = self.context();
        self.enqueue("buffer_to_image", move || {
            let mut data = src.read().to_f32_vec()?;
            // a binding can not be empty
            data.resize(data.len().max(4), 0.0);
            let buf = ctx.make_storage_buffer("buffer", bytemuck::cast_slice(&data));
            let meta_buf = ctx.make_storage_buffer("meta", bytemuck::bytes_of(&meta));
            let entries = &[
                entry(0, buf.as_entire_binding()),
                entry(1, output_image.binding()),
                entry(2, meta_buf.as_entire_binding()),
            ];
            ctx.dispatch(kernel.pipeline(), entries, ctx.workgroups([width, height])?);
            Ok(())
        })
    }

    fn image_to_buffer(
        &self,
        input: &Tensor,
        dtype: DataType,
        output: &mut Tensor,
    ) -> Result<Completion> {
        let buffer_type = match input.buffer_type() {
            Some(bt) => bt,
            None => {
                precondition!(false, "image_to_buffer requires an image input");
                unreachable!()
            }
        };
        let input_image = image_arg(input, buffer_type, "image_to_buffer input");
        // the program reads texels of the image's own type
        let kernel = self.kernel(
            "buffer_to_image",
            image_to_buffer_entry(buffer_type),
            input_image.dtype(),
        )?;

        let shape = input.shape().to_vec();
        *output = Tensor::zeros(dtype, &shape, DeviceType::Gpu);
        let dst = match output.buffer_handle() {
            Some(buf) => buf,
            None => unreachable!(),
        };

        let meta = layout_meta(&shape, buffer_type);
        let len = input.num_elements();
        let ctx = self.context();
        self.enqueue("image_to_buffer", move || {
            let buf = ctx.alloc_buffer("buffer", len * 4)?;
            let meta_buf = ctx.make_storage_buffer("meta", bytemuck::bytes_of(&meta));
            let entries = &[
                entry(0, buf.as_entire_binding()),
                entry(1, input_image.binding()),
                entry(2, meta_buf.as_entire_binding()),
            ];
            let [w, h] = [meta.image_width as usize, meta.image_height as usize];
            ctx.dispatch(kernel.pipeline(), entries, ctx.workgroups([w, h])?);
            let data = ctx.read_buffer(&buf, len * 4, bytemuck::pod_collect_to_vec::<u8, f32>)?;
            *dst.write() = float_buffer(dtype, data);
            Ok(())
        })
    }
}

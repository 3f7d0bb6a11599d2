use super::entry;
use super::image_arg;
use super::meta::Interpolation;
use super::meta::ResizeBilinearMeta;
use crate::backends::gpu::GpuDevice;
use crate::backends::ResizeBilinearKernel;
use crate::error::Result;
use crate::future::Completion;
use crate::ops::resize_bilinear::compute_interpolation_weights;
use crate::tensor::image::image_shape;
use crate::tensor::BufferType;
use crate::tensor::Tensor;

/// The weights of one axis as the table the program reads.
fn interpolation_table(out_size: usize, in_size: usize, align_corners: bool) -> Vec<Interpolation> {
    compute_interpolation_weights(out_size, in_size, align_corners)
        .into_iter()
        .map(|w| Interpolation {
            lower: w.lower as u32,
            upper: w.upper as u32,
            weight: w.lerp,
            _padding: 0,
        })
        .collect()
}

impl ResizeBilinearKernel for GpuDevice {
    fn resize_bilinear(
        &self,
        input: &Tensor,
        out_size: [usize; 2],
        align_corners: bool,
        output: &mut Tensor,
    ) -> Result<Completion> {
        let input_image = image_arg(input, BufferType::InOutChannel, "resize_bilinear input");
        let kernel = self.kernel("resize_bilinear", "resize_bilinear", input.dtype())?;

        let [batch, in_h, in_w, channels] = [input.dim(0), input.dim(1), input.dim(2), input.dim(3)];
        let [out_h, out_w] = out_size;
        let out_shape = [batch, out_h, out_w, channels];
        let [image_width, image_height] = image_shape(&out_shape, BufferType::InOutChannel);
        let output_image = self.alloc_image([image_width, image_height], kernel.dtype())?;
        *output = Tensor::from_gpu_image(output_image.clone(), BufferType::InOutChannel, &out_shape);

        let meta = ResizeBilinearMeta {
            in_height: in_h as u32,
            in_width: in_w as u32,
            in_image_width: input_image.width() as u32,
            out_height: out_h as u32,
            out_width: out_w as u32,
            out_image_width: image_width as u32,
            out_image_height: image_height as u32,
            _padding: 0,
        };
        let xs = interpolation_table(out_w, in_w, align_corners);
        let ys = interpolation_table(out_h, in_h, align_corners);
        let ctx = self.context();
        self.enqueue("resize_bilinear", move || {
            if xs.is_empty() || ys.is_empty() {
                return Ok(());
            }
            let xs_buf = ctx.make_storage_buffer("xs", bytemuck::cast_slice(&xs));
            let ys_buf = ctx.make_storage_buffer("ys", bytemuck::cast_slice(&ys));
            let meta_buf = ctx.make_storage_buffer("meta", bytemuck::bytes_of(&meta));
            let entries = &[
                entry(0, input_image.binding()),
                entry(1, xs_buf.as_entire_binding()),
                entry(2, ys_buf.as_entire_binding()),
                entry(3, meta_buf.as_entire_binding()),
                entry(4, output_image.binding()),
            ];
            ctx.dispatch(kernel.pipeline(), entries, ctx.workgroups([image_width, image_height])?);
            Ok(())
        })
    }
}

pub mod cpu;
pub mod gpu;
mod layout;

use crate::error::Result;
use crate::future::Completion;
use crate::tensor::BufferType;
use crate::tensor::DataType;
use crate::tensor::DeviceType;
use crate::tensor::Tensor;

/// A compute backend. Kernels are submitted through the per-operator kernel
/// traits below; `finish` is the global sync point of the device.
pub trait Device: Send + Sync {
    fn device_type(&self) -> DeviceType;

    /// blocks until every piece of work submitted so far has completed.
    fn finish(&self) -> Result<()>;
}

/// `output = input + bias[c]` over a NHWC input. The operator has already
/// checked the ranks and the channel count.
pub trait BiasAddKernel: Device {
    fn bias_add(&self, input: &Tensor, bias: &Tensor, output: &mut Tensor) -> Result<Completion>;
}

pub trait ResizeBilinearKernel: Device {
    fn resize_bilinear(
        &self,
        input: &Tensor,
        out_size: [usize; 2],
        align_corners: bool,
        output: &mut Tensor,
    ) -> Result<Completion>;
}

/// Converts between the linear buffer layout and the image layout.
pub trait LayoutKernel: Device {
    fn buffer_to_image(
        &self,
        input: &Tensor,
        buffer_type: BufferType,
        dtype: DataType,
        output: &mut Tensor,
    ) -> Result<Completion>;

    fn image_to_buffer(&self, input: &Tensor, dtype: DataType, output: &mut Tensor)
        -> Result<Completion>;
}

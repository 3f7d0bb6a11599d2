mod buffer;
mod dtype;
pub mod image;
#[allow(clippy::module_inception)]
mod tensor;

use std::fmt;

pub use buffer::TensorBuffer;
pub use dtype::DataType;
pub use image::BufferType;
pub use image::Image;
pub use image::ImageTexels;
pub use tensor::Tensor;

/// The device a tensor lives on, and the device an operator runs on.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum DeviceType {
    Cpu,
    Gpu,
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceType::Cpu => write!(f, "cpu"),
            DeviceType::Gpu => write!(f, "gpu"),
        }
    }
}

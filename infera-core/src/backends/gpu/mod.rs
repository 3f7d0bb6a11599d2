mod context;
mod gpu_device;
mod image;
mod kernels;
mod program;
mod queue;

pub use gpu_device::GpuDevice;
pub use gpu_device::GpuDeviceOptions;
pub use image::GpuImage;
pub use program::Kernel;
pub use program::ProgramCacheStats;
pub use program::PROGRAM_STORAGE_NAME;

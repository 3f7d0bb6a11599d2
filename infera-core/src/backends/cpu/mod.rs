mod cpu_device;
mod kernels;
pub mod primitives;

pub use cpu_device::CpuDevice;

use std::sync::Arc;

use half::f16;
use parking_lot::RwLock;
use parking_lot::RwLockReadGuard;
use parking_lot::RwLockWriteGuard;

use super::image::image_shape;
use super::BufferType;
use super::DataType;
use super::DeviceType;
use super::Image;
use super::TensorBuffer;
use crate::backends::gpu::GpuImage;
use crate::error::ErrorKind;
use crate::error::Result;
use crate::precondition;

#[derive(Debug, Clone)]
pub(crate) enum TensorMemory {
    Buffer(Arc<RwLock<TensorBuffer>>),
    Image {
        image: Arc<RwLock<Image>>,
        buffer_type: BufferType,
    },
    GpuImage {
        image: Arc<GpuImage>,
        buffer_type: BufferType,
    },
}

// A tensor is a handle over shared memory: cloning it gives a view of the same
// data, `copy()` gives an independent one. The memory is shared because a gpu
// command may still be writing into it after the operator that produced the
// tensor has returned. The dtype never changes after creation, and the element
// count of the shape always matches the buffer's length.
#[derive(Debug, Clone)]
pub struct Tensor {
    dtype: DataType,
    shape: Vec<usize>,
    device: DeviceType,
    memory: TensorMemory,
}

impl Tensor {
    /// an empty tensor, with shape `[0]`. call `resize` before writing into it.
    pub fn empty(dtype: DataType, device: DeviceType) -> Self {
        Self::zeros(dtype, &[0], device)
    }

    pub fn zeros(dtype: DataType, shape: &[usize], device: DeviceType) -> Self {
        let len = shape.iter().product();
        Self {
            dtype,
            shape: shape.to_vec(),
            device,
            memory: TensorMemory::Buffer(Arc::new(RwLock::new(TensorBuffer::zeros(dtype, len)))),
        }
    }

    pub fn from_buffer(buf: TensorBuffer, shape: &[usize], device: DeviceType) -> Result<Self> {
        let len: usize = shape.iter().product();
        if buf.len() != len {
            return Err((
                ErrorKind::TensorError,
                format!("invalid shape {:?} for data of length {}", shape, buf.len()),
            )
                .into());
        }
        Ok(Self {
            dtype: buf.dtype(),
            shape: shape.to_vec(),
            device,
            memory: TensorMemory::Buffer(Arc::new(RwLock::new(buf))),
        })
    }

    pub fn from_slice_f32(data: &[f32], shape: &[usize], device: DeviceType) -> Result<Self> {
        Self::from_buffer(TensorBuffer::F32(data.to_vec()), shape, device)
    }

    /// rounds `data` into a f16 tensor.
    pub fn from_slice_f16(data: &[f32], shape: &[usize], device: DeviceType) -> Result<Self> {
        let buf = data.iter().map(|v| f16::from_f32(*v)).collect::<Vec<_>>();
        Self::from_buffer(TensorBuffer::F16(buf), shape, device)
    }

    /// wraps a host image as a cpu tensor of the logical `shape`.
    pub(crate) fn from_image(image: Image, buffer_type: BufferType, shape: &[usize]) -> Self {
        check_image_holds(image.width(), image.height(), buffer_type, shape);
        Self {
            dtype: image.dtype(),
            shape: shape.to_vec(),
            device: DeviceType::Cpu,
            memory: TensorMemory::Image {
                image: Arc::new(RwLock::new(image)),
                buffer_type,
            },
        }
    }

    /// wraps an image on the gpu as a gpu tensor of the logical `shape`.
    pub(crate) fn from_gpu_image(
        image: Arc<GpuImage>,
        buffer_type: BufferType,
        shape: &[usize],
    ) -> Self {
        check_image_holds(image.width(), image.height(), buffer_type, shape);
        Self {
            dtype: image.dtype(),
            shape: shape.to_vec(),
            device: DeviceType::Gpu,
            memory: TensorMemory::GpuImage { image, buffer_type },
        }
    }

    pub fn dtype(&self) -> DataType {
        self.dtype
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn device(&self) -> DeviceType {
        self.device
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    pub fn dim(&self, idx: usize) -> usize {
        self.shape[idx]
    }

    pub fn num_elements(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn is_image(&self) -> bool {
        self.buffer_type().is_some()
    }

    pub fn buffer_type(&self) -> Option<BufferType> {
        match &self.memory {
            TensorMemory::Image { buffer_type, .. } => Some(*buffer_type),
            TensorMemory::GpuImage { buffer_type, .. } => Some(*buffer_type),
            TensorMemory::Buffer(_) => None,
        }
    }

    /// `[width, height]` of the backing image, if the tensor is an image.
    pub fn image_shape(&self) -> Option<[usize; 2]> {
        match &self.memory {
            TensorMemory::Image { image, .. } => {
                let image = image.read();
                Some([image.width(), image.height()])
            }
            TensorMemory::GpuImage { image, .. } => Some([image.width(), image.height()]),
            TensorMemory::Buffer(_) => None,
        }
    }

    /// reallocates a zeroed buffer of `shape`, keeping the dtype. only buffer
    /// tensors can be resized, an image is always allocated by a converter.
    pub fn resize(&mut self, shape: &[usize]) -> &mut Self {
        precondition!(
            !self.is_image(),
            "image tensor can not be resized to {:?}",
            shape
        );
        let len = shape.iter().product();
        self.shape = shape.to_vec();
        self.memory = TensorMemory::Buffer(Arc::new(RwLock::new(TensorBuffer::zeros(
            self.dtype, len,
        ))));
        self
    }

    /// reinterprets the shape, the element count must stay the same. the returned
    /// tensor shares the memory with `self`.
    pub fn reshape(&self, shape: &[usize]) -> Result<Self> {
        if self.is_image() {
            return Err((ErrorKind::TensorError, "image tensor can not be reshaped").into());
        }
        let len: usize = shape.iter().product();
        if len != self.num_elements() {
            return Err((
                ErrorKind::TensorError,
                format!(
                    "invalid shape {:?} for a tensor has a length of {}",
                    shape,
                    self.num_elements()
                ),
            )
                .into());
        }
        Ok(Self {
            dtype: self.dtype,
            shape: shape.to_vec(),
            device: self.device,
            memory: self.memory.clone(),
        })
    }

    /// duplicate the tensor and the underlying storage
    pub fn copy(&self) -> Self {
        let memory = match &self.memory {
            TensorMemory::Buffer(buf) => {
                TensorMemory::Buffer(Arc::new(RwLock::new(buf.read().clone())))
            }
            TensorMemory::Image { image, buffer_type } => TensorMemory::Image {
                image: Arc::new(RwLock::new(image.read().clone())),
                buffer_type: *buffer_type,
            },
            TensorMemory::GpuImage { image, buffer_type } => TensorMemory::GpuImage {
                image: Arc::new(image.duplicate()),
                buffer_type: *buffer_type,
            },
        };
        Self {
            dtype: self.dtype,
            shape: self.shape.clone(),
            device: self.device,
            memory,
        }
    }

    /// whether both tensors are views of the same memory
    pub fn shares_memory(&self, other: &Tensor) -> bool {
        match (&self.memory, &other.memory) {
            (TensorMemory::Buffer(a), TensorMemory::Buffer(b)) => Arc::ptr_eq(a, b),
            (TensorMemory::Image { image: a, .. }, TensorMemory::Image { image: b, .. }) => {
                Arc::ptr_eq(a, b)
            }
            (TensorMemory::GpuImage { image: a, .. }, TensorMemory::GpuImage { image: b, .. }) => {
                Arc::ptr_eq(a, b)
            }
            _ => false,
        }
    }

    /// maps the linear buffer for reading on the host. a gpu tensor written by an
    /// asynchronous command must be synchronized before mapping.
    pub fn map(&self) -> Result<RwLockReadGuard<'_, TensorBuffer>> {
        match &self.memory {
            TensorMemory::Buffer(buf) => Ok(buf.read()),
            TensorMemory::Image { .. } | TensorMemory::GpuImage { .. } => Err((
                ErrorKind::TensorError,
                "an image tensor is opaque, convert it to a buffer before mapping",
            )
                .into()),
        }
    }

    /// copies the backing image to the host. an image on the gpu must be
    /// synchronized before reading.
    pub fn read_image(&self) -> Result<Image> {
        match &self.memory {
            TensorMemory::Image { image, .. } => Ok(image.read().clone()),
            TensorMemory::GpuImage { image, .. } => image.read(),
            TensorMemory::Buffer(_) => Err((
                ErrorKind::TensorError,
                "a buffer tensor has no image to read",
            )
                .into()),
        }
    }

    pub(crate) fn map_mut(&self) -> Result<RwLockWriteGuard<'_, TensorBuffer>> {
        match &self.memory {
            TensorMemory::Buffer(buf) => Ok(buf.write()),
            TensorMemory::Image { .. } | TensorMemory::GpuImage { .. } => Err((
                ErrorKind::TensorError,
                "an image tensor is opaque, it can only be written by a layout kernel",
            )
                .into()),
        }
    }

    pub fn to_vec_f32(&self) -> Result<Vec<f32>> {
        self.map()?.to_f32_vec()
    }

    pub(crate) fn buffer_handle(&self) -> Option<Arc<RwLock<TensorBuffer>>> {
        match &self.memory {
            TensorMemory::Buffer(buf) => Some(buf.clone()),
            _ => None,
        }
    }

    pub(crate) fn gpu_image_handle(&self) -> Option<Arc<GpuImage>> {
        match &self.memory {
            TensorMemory::GpuImage { image, .. } => Some(image.clone()),
            _ => None,
        }
    }
}

fn check_image_holds(width: usize, height: usize, buffer_type: BufferType, shape: &[usize]) {
    let [w, h] = image_shape(shape, buffer_type);
    precondition!(
        width == w && height == h,
        "image of {}x{} does not hold a tensor of shape {:?}",
        width,
        height,
        shape
    );
}

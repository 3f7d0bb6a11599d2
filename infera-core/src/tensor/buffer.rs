use half::f16;

use super::DataType;
use crate::error::ErrorKind;
use crate::error::Result;
use crate::precondition;

/// The linear storage of a tensor. Elements are laid out row-major on the
/// tensor's logical shape.
#[derive(Debug, Clone, PartialEq)]
pub enum TensorBuffer {
    F32(Vec<f32>),
    F16(Vec<f16>),
    I32(Vec<i32>),
    U8(Vec<u8>),
}

impl TensorBuffer {
    pub fn zeros(dtype: DataType, len: usize) -> Self {
        match dtype {
            DataType::F32 => TensorBuffer::F32(vec![0.0; len]),
            DataType::F16 => TensorBuffer::F16(vec![f16::ZERO; len]),
            DataType::I32 => TensorBuffer::I32(vec![0; len]),
            DataType::U8 => TensorBuffer::U8(vec![0; len]),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            TensorBuffer::F32(buf) => buf.len(),
            TensorBuffer::F16(buf) => buf.len(),
            TensorBuffer::I32(buf) => buf.len(),
            TensorBuffer::U8(buf) => buf.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dtype(&self) -> DataType {
        match self {
            TensorBuffer::F32(_) => DataType::F32,
            TensorBuffer::F16(_) => DataType::F16,
            TensorBuffer::I32(_) => DataType::I32,
            TensorBuffer::U8(_) => DataType::U8,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            TensorBuffer::F32(buf) => bytemuck::cast_slice(buf),
            TensorBuffer::F16(buf) => bytemuck::cast_slice(buf),
            TensorBuffer::I32(buf) => bytemuck::cast_slice(buf),
            TensorBuffer::U8(buf) => buf,
        }
    }

    pub fn as_f32(&self) -> Result<&[f32]> {
        match self {
            TensorBuffer::F32(buf) => Ok(buf),
            _ => Err((
                ErrorKind::TensorError,
                format!("expect a f32 buffer, but got {}", self.dtype()),
            )
                .into()),
        }
    }

    pub fn as_f32_mut(&mut self) -> Result<&mut [f32]> {
        match self {
            TensorBuffer::F32(buf) => Ok(buf),
            _ => Err((
                ErrorKind::TensorError,
                format!("expect a f32 buffer, but got {}", self.dtype()),
            )
                .into()),
        }
    }

    /// read the element at `idx` as f32. only float buffers are readable this way.
    pub fn get_f32(&self, idx: usize) -> f32 {
        match self {
            TensorBuffer::F32(buf) => buf[idx],
            TensorBuffer::F16(buf) => buf[idx].to_f32(),
            _ => {
                precondition!(
                    false,
                    "only f32/f16 buffers can be read as f32, but got {}",
                    self.dtype()
                );
                unreachable!()
            }
        }
    }

    pub fn set_f32(&mut self, idx: usize, v: f32) {
        match self {
            TensorBuffer::F32(buf) => buf[idx] = v,
            TensorBuffer::F16(buf) => buf[idx] = f16::from_f32(v),
            _ => {
                precondition!(
                    false,
                    "only f32/f16 buffers can be written as f32, but got {}",
                    self.dtype()
                );
                unreachable!()
            }
        }
    }

    /// convert a float buffer into f32 values, copying the data.
    pub fn to_f32_vec(&self) -> Result<Vec<f32>> {
        match self {
            TensorBuffer::F32(buf) => Ok(buf.clone()),
            TensorBuffer::F16(buf) => Ok(buf.iter().map(|v| v.to_f32()).collect()),
            _ => Err((
                ErrorKind::TensorError,
                format!("{} buffer can not be read as f32", self.dtype()),
            )
                .into()),
        }
    }
}

impl From<Vec<f32>> for TensorBuffer {
    fn from(buf: Vec<f32>) -> Self {
        Self::F32(buf)
    }
}

impl From<Vec<f16>> for TensorBuffer {
    fn from(buf: Vec<f16>) -> Self {
        Self::F16(buf)
    }
}

impl From<Vec<i32>> for TensorBuffer {
    fn from(buf: Vec<i32>) -> Self {
        Self::I32(buf)
    }
}

impl From<Vec<u8>> for TensorBuffer {
    fn from(buf: Vec<u8>) -> Self {
        Self::U8(buf)
    }
}

use half::f16;

use super::DataType;
use crate::error::Error;
use crate::error::ErrorKind;
use crate::precondition;

/// The role of a linear buffer when it is packed into an image. Each role has
/// its own packing so the gpu kernels can address it cheaply.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum BufferType {
    /// activations in NHWC, packed 4 channels per texel:
    /// width = ceil(C/4) * W, height = N * H.
    InOutChannel = 0,

    /// small 1d parameters like a bias, packed 4 elements per texel in one row.
    Argument = 1,
}

impl TryFrom<i64> for BufferType {
    type Error = Error;

    fn try_from(v: i64) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(BufferType::InOutChannel),
            1 => Ok(BufferType::Argument),
            _ => Err((ErrorKind::Unsupported, format!("unknown buffer type {}", v)).into()),
        }
    }
}

/// Pads a rank 1..=4 shape to NHWC: `[C]`, `[N, C]`, `[H, W, C]` or `[N, H, W, C]`.
pub fn nhwc_shape(shape: &[usize]) -> [usize; 4] {
    match *shape {
        [c] => [1, 1, 1, c],
        [n, c] => [n, 1, 1, c],
        [h, w, c] => [1, h, w, c],
        [n, h, w, c] => [n, h, w, c],
        _ => {
            precondition!(
                false,
                "in/out channel image requires a tensor of rank 1 to 4, but got shape {:?}",
                shape
            );
            unreachable!()
        }
    }
}

/// Computes `[width, height]` of the image that holds a buffer of `shape`.
pub fn image_shape(shape: &[usize], buffer_type: BufferType) -> [usize; 2] {
    match buffer_type {
        BufferType::InOutChannel => {
            let [n, h, w, c] = nhwc_shape(shape);
            [c.div_ceil(4) * w, n * h]
        }
        BufferType::Argument => {
            precondition!(
                shape.len() == 1,
                "argument image requires a 1d tensor, but got shape {:?}",
                shape
            );
            [shape[0].div_ceil(4), 1]
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ImageTexels {
    F32(Vec<[f32; 4]>),
    F16(Vec<[f16; 4]>),
}

/// A 2d image of RGBA texels, the gpu's opaque tensor representation. Texels are
/// stored row by row; lanes beyond a tensor's channel count are zero.
#[derive(Debug, Clone, PartialEq)]
pub struct Image {
    width: usize,
    height: usize,
    texels: ImageTexels,
}

impl Image {
    pub fn new(width: usize, height: usize, dtype: DataType) -> Self {
        let n = width * height;
        let texels = match dtype {
            DataType::F32 => ImageTexels::F32(vec![[0.0; 4]; n]),
            DataType::F16 => ImageTexels::F16(vec![[f16::ZERO; 4]; n]),
            _ => {
                precondition!(false, "image texels must be f32 or f16, but got {}", dtype);
                unreachable!()
            }
        };
        Self {
            width,
            height,
            texels,
        }
    }

    /// builds an image from f32 texels, rounding them to `dtype`.
    pub fn from_f32_texels(
        width: usize,
        height: usize,
        dtype: DataType,
        texels: Vec<[f32; 4]>,
    ) -> Self {
        let texels = match dtype {
            DataType::F32 => ImageTexels::F32(texels),
            DataType::F16 => ImageTexels::F16(
                texels
                    .into_iter()
                    .map(|t| t.map(f16::from_f32))
                    .collect(),
            ),
            _ => {
                precondition!(false, "image texels must be f32 or f16, but got {}", dtype);
                unreachable!()
            }
        };
        Self::from_texels(width, height, texels)
    }

    /// wraps texels already packed row by row.
    pub fn from_texels(width: usize, height: usize, texels: ImageTexels) -> Self {
        let len = match &texels {
            ImageTexels::F32(t) => t.len(),
            ImageTexels::F16(t) => t.len(),
        };
        precondition!(
            len == width * height,
            "a {}x{} image needs {} texels, but got {}",
            width,
            height,
            width * height,
            len
        );
        Self {
            width,
            height,
            texels,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn dtype(&self) -> DataType {
        match self.texels {
            ImageTexels::F32(_) => DataType::F32,
            ImageTexels::F16(_) => DataType::F16,
        }
    }

    pub fn texels(&self) -> &ImageTexels {
        &self.texels
    }

    /// reads the texel at `(x, y)`, like `read_imagef` on a clamped sampler.
    pub fn read(&self, x: usize, y: usize) -> [f32; 4] {
        let x = x.min(self.width - 1);
        let y = y.min(self.height - 1);
        let idx = y * self.width + x;
        match &self.texels {
            ImageTexels::F32(t) => t[idx],
            ImageTexels::F16(t) => t[idx].map(|v| v.to_f32()),
        }
    }

    pub fn write(&mut self, x: usize, y: usize, v: [f32; 4]) {
        let idx = y * self.width + x;
        match &mut self.texels {
            ImageTexels::F32(t) => t[idx] = v,
            ImageTexels::F16(t) => t[idx] = v.map(f16::from_f32),
        }
    }
}

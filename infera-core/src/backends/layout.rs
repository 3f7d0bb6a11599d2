use half::f16;
use rayon::prelude::*;
use rayon::ThreadPool;

use crate::precondition;
use crate::tensor::image::image_shape;
use crate::tensor::image::nhwc_shape;
use crate::tensor::BufferType;
use crate::tensor::DataType;
use crate::tensor::Image;
use crate::tensor::TensorBuffer;

/// Packs a linear buffer of the logical `shape` into image texels, one image
/// row per task. Lanes past the channel count stay zero.
pub(crate) fn pack_texels(
    pool: &ThreadPool,
    src: &TensorBuffer,
    shape: &[usize],
    buffer_type: BufferType,
) -> Vec<[f32; 4]> {
    precondition!(
        src.dtype().is_float(),
        "only float buffers can be packed into an image, but got {}",
        src.dtype()
    );
    let [width, height] = image_shape(shape, buffer_type);
    let mut texels = vec![[0.0f32; 4]; width * height];
    if texels.is_empty() {
        return texels;
    }

    pool.install(|| {
        texels
            .par_chunks_mut(width)
            .enumerate()
            .for_each(|(y, row)| match buffer_type {
                BufferType::InOutChannel => pack_in_out_row(src, shape, y, row),
                BufferType::Argument => pack_argument_row(src, shape[0], row),
            });
    });
    texels
}

fn pack_in_out_row(src: &TensorBuffer, shape: &[usize], y: usize, row: &mut [[f32; 4]]) {
    let [_, _, w, c] = nhwc_shape(shape);
    // row y holds the pixels of (n, h) = (y / H, y % H), which are contiguous in
    // the buffer starting at y * W * C
    let base = y * w * c;
    for (x, texel) in row.iter_mut().enumerate() {
        let (cb, wi) = (x / w, x % w);
        for (lane, v) in texel.iter_mut().enumerate() {
            let ch = cb * 4 + lane;
            if ch < c {
                *v = src.get_f32(base + wi * c + ch);
            }
        }
    }
}

fn pack_argument_row(src: &TensorBuffer, c: usize, row: &mut [[f32; 4]]) {
    for (cb, texel) in row.iter_mut().enumerate() {
        for (lane, v) in texel.iter_mut().enumerate() {
            let ch = cb * 4 + lane;
            if ch < c {
                *v = src.get_f32(ch);
            }
        }
    }
}

/// The inverse of `pack_texels`: reads the image back into a linear f32
/// buffer of the logical `shape`.
pub(crate) fn unpack_texels(
    pool: &ThreadPool,
    image: &Image,
    shape: &[usize],
    buffer_type: BufferType,
) -> Vec<f32> {
    let [width, height] = image_shape(shape, buffer_type);
    precondition!(
        image.width() == width && image.height() == height,
        "image of {}x{} does not hold a tensor of shape {:?}",
        image.width(),
        image.height(),
        shape
    );

    let len = shape.iter().product::<usize>();
    let mut dst = vec![0.0f32; len];
    if len == 0 {
        return dst;
    }

    match buffer_type {
        BufferType::InOutChannel => {
            let [_, _, w, c] = nhwc_shape(shape);
            pool.install(|| {
                dst.par_chunks_mut(w * c).enumerate().for_each(|(y, row)| {
                    for (i, v) in row.iter_mut().enumerate() {
                        let (wi, ch) = (i / c, i % c);
                        *v = image.read((ch / 4) * w + wi, y)[ch % 4];
                    }
                });
            });
        }
        BufferType::Argument => {
            for (ch, v) in dst.iter_mut().enumerate() {
                *v = image.read(ch / 4, 0)[ch % 4];
            }
        }
    }
    dst
}

/// Stores f32 values as a buffer of the float `dtype`.
pub(crate) fn float_buffer(dtype: DataType, data: Vec<f32>) -> TensorBuffer {
    match dtype {
        DataType::F32 => TensorBuffer::F32(data),
        DataType::F16 => TensorBuffer::F16(data.into_iter().map(f16::from_f32).collect()),
        _ => {
            precondition!(false, "expect a float data type, but got {}", dtype);
            unreachable!()
        }
    }
}

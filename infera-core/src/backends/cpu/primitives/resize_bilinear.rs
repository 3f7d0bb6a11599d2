use rayon::prelude::*;
use rayon::ThreadPool;

use crate::ops::resize_bilinear::compute_interpolation_weights;
use crate::ops::resize_bilinear::lerp;

/// Bilinear resize of a NHWC f32 buffer into `output`, which must hold
/// `N * out_h * out_w * C` elements. Each task computes one output row.
pub fn resize_bilinear(
    pool: &ThreadPool,
    input: &[f32],
    in_shape: [usize; 4],
    output: &mut [f32],
    out_size: [usize; 2],
    align_corners: bool,
) {
    let [batch, in_h, in_w, channels] = in_shape;
    let [out_h, out_w] = out_size;
    assert_eq!(input.len(), batch * in_h * in_w * channels);
    assert_eq!(output.len(), batch * out_h * out_w * channels);
    if output.is_empty() {
        return;
    }

    let ys = compute_interpolation_weights(out_h, in_h, align_corners);
    let xs = compute_interpolation_weights(out_w, in_w, align_corners);
    let in_row = in_w * channels;

    pool.install(|| {
        output
            .par_chunks_mut(out_w * channels)
            .enumerate()
            .for_each(|(row, out)| {
                let (n, oy) = (row / out_h, row % out_h);
                let y = &ys[oy];
                let top = &input[(n * in_h + y.lower) * in_row..][..in_row];
                let bottom = &input[(n * in_h + y.upper) * in_row..][..in_row];

                for (ox, x) in xs.iter().enumerate() {
                    let (left, right) = (x.lower * channels, x.upper * channels);
                    for c in 0..channels {
                        let t = lerp(top[left + c], top[right + c], x.lerp);
                        let b = lerp(bottom[left + c], bottom[right + c], x.lerp);
                        out[ox * channels + c] = lerp(t, b, y.lerp);
                    }
                }
            });
    });
}

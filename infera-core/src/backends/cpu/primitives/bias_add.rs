use rayon::prelude::*;
use rayon::ThreadPool;

/// `output[.., c] = input[.., c] + bias[c]` over a NHWC buffer, split into rows
/// of `W * C` elements.
pub fn bias_add(
    pool: &ThreadPool,
    input: &[f32],
    bias: &[f32],
    output: &mut [f32],
    row_len: usize,
) {
    assert_eq!(input.len(), output.len());
    if output.is_empty() {
        return;
    }
    assert!(!bias.is_empty() && row_len % bias.len() == 0);

    pool.install(|| {
        output
            .par_chunks_mut(row_len)
            .zip(input.par_chunks(row_len))
            .for_each(|(out, inp)| {
                for ((o, i), b) in out.iter_mut().zip(inp).zip(bias.iter().cycle()) {
                    *o = i + b;
                }
            });
    });
}

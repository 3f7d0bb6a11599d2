use std::sync::Arc;

use super::set_future;
use super::Operator;
use super::OperatorBase;
use super::OperatorDef;
use crate::backends::ResizeBilinearKernel;
use crate::error::Result;
use crate::future::OpFuture;
use crate::precondition;
use crate::tensor::DataType;
use crate::tensor::DeviceType;
use crate::tensor::Tensor;
use crate::workspace::Workspace;

/// The source pixels and the weight of the upper one for one output pixel
/// along an axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct CachedInterpolation {
    pub lower: usize,
    pub upper: usize,
    pub lerp: f32,
}

#[inline]
pub(crate) fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

/// Maps every output index along an axis to its source pixels. Both the cpu
/// and the gpu kernel interpolate with these weights, so they agree exactly.
pub(crate) fn compute_interpolation_weights(
    out_size: usize,
    in_size: usize,
    align_corners: bool,
) -> Vec<CachedInterpolation> {
    let align = align_corners && out_size > 1;
    let scale = if align {
        (in_size - 1) as f32 / (out_size - 1) as f32
    } else {
        in_size as f32 / out_size as f32
    };

    (0..out_size)
        .map(|i| {
            let src = if align {
                i as f32 * scale
            } else {
                ((i as f32 + 0.5) * scale - 0.5).max(0.0)
            };
            let lower = (src.floor() as usize).min(in_size - 1);
            CachedInterpolation {
                lower,
                upper: (lower + 1).min(in_size - 1),
                lerp: src - src.floor(),
            }
        })
        .collect()
}

/// Resizes a NHWC image by bilinear interpolation.
///
/// The output size is the `size` argument (`[height, width]`) when both are
/// positive, otherwise the input size times the `scale` argument, rounded and
/// at least 1.
pub struct ResizeBilinearOp<D> {
    base: OperatorBase,
    device: Arc<D>,
    dtype: DataType,
    size: [i64; 2],
    scale: [f32; 2],
    align_corners: bool,
}

impl<D: ResizeBilinearKernel> ResizeBilinearOp<D> {
    pub fn new(def: &OperatorDef, device: Arc<D>) -> Result<Self> {
        let base = OperatorBase::new(def, 1, 1);
        let size = def.get_ints_arg("size", &[-1, -1]);
        precondition!(
            size.len() == 2,
            "size of op {} must be [height, width], but got {:?}",
            def.name,
            size
        );
        let scale = def.get_floats_arg("scale", &[1.0, 1.0]);
        precondition!(
            scale.len() == 2 && scale.iter().all(|s| *s > 0.0),
            "scale of op {} must be two positive numbers, but got {:?}",
            def.name,
            scale
        );
        let align_corners = def.get_bool_arg("align_corners", false);

        Ok(Self {
            base,
            device,
            dtype: def.data_type()?,
            size: [size[0], size[1]],
            scale: [scale[0], scale[1]],
            align_corners,
        })
    }

    pub fn output_size(&self, in_height: usize, in_width: usize) -> [usize; 2] {
        if self.size[0] > 0 && self.size[1] > 0 {
            return [self.size[0] as usize, self.size[1] as usize];
        }
        let scaled = |v: usize, s: f32| ((v as f32 * s).round() as usize).max(1);
        [
            scaled(in_height, self.scale[0]),
            scaled(in_width, self.scale[1]),
        ]
    }
}

impl<D: ResizeBilinearKernel + 'static> Operator for ResizeBilinearOp<D> {
    fn def(&self) -> &OperatorDef {
        self.base.def()
    }

    fn device_type(&self) -> DeviceType {
        self.device.device_type()
    }

    fn run(&mut self, ws: &mut Workspace, future: Option<&mut OpFuture>) -> Result<()> {
        let input = self.base.input(ws, 0)?;
        let device = self.device.device_type();
        self.base.check_operand("input", &input, self.dtype, device);
        precondition!(
            input.rank() == 4,
            "input must be 4-dimensional, but got shape {:?}",
            input.shape()
        );
        precondition!(
            input.dim(1) > 0 && input.dim(2) > 0,
            "input of op {} has an empty spatial shape {:?}",
            self.base.def().name,
            input.shape()
        );

        let out_size = self.output_size(input.dim(1), input.dim(2));
        let mut output = Tensor::empty(self.dtype, device);
        let completion =
            self.device
                .resize_bilinear(&input, out_size, self.align_corners, &mut output)?;
        ws.put_tensor(self.base.output_name(0), output);
        set_future(future, completion);
        Ok(())
    }
}

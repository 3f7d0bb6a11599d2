mod bias_add;
mod buffer_to_image;
mod def;
mod image_to_buffer;
mod registry;
pub(crate) mod resize_bilinear;

pub use bias_add::BiasAddOp;
pub use buffer_to_image::BufferToImageOp;
pub use def::Argument;
pub use def::OpDefBuilder;
pub use def::OperatorDef;
pub use image_to_buffer::ImageToBufferOp;
pub use registry::Devices;
pub use registry::OpRegistry;
pub use resize_bilinear::ResizeBilinearOp;

use crate::error::Result;
use crate::future::Completion;
use crate::future::OpFuture;
use crate::precondition;
use crate::tensor::DataType;
use crate::tensor::DeviceType;
use crate::tensor::Tensor;
use crate::workspace::Workspace;

/// An executable step of a graph, bound to one device.
///
/// `run` reads its inputs from the workspace by position, checks their
/// structure, and publishes exactly its declared outputs back into the
/// workspace. Inputs are never modified. On a gpu device `run` may return
/// before the work is done: pass a future to wait for exactly this operator's
/// work, or sync the whole device.
pub trait Operator: Send {
    fn def(&self) -> &OperatorDef;

    fn device_type(&self) -> DeviceType;

    fn run(&mut self, ws: &mut Workspace, future: Option<&mut OpFuture>) -> Result<()>;
}

/// The definition an operator was created from, and the lookups every
/// operator shares.
#[derive(Debug, Clone)]
pub struct OperatorBase {
    def: OperatorDef,
}

impl OperatorBase {
    pub fn new(def: &OperatorDef, num_inputs: usize, num_outputs: usize) -> Self {
        precondition!(
            def.inputs.len() == num_inputs && def.outputs.len() == num_outputs,
            "op {} of type {} takes {} inputs and {} outputs, but got {:?} and {:?}",
            def.name,
            def.op_type,
            num_inputs,
            num_outputs,
            def.inputs,
            def.outputs
        );
        Self { def: def.clone() }
    }

    pub fn def(&self) -> &OperatorDef {
        &self.def
    }

    /// a handle of the input tensor at `idx`, sharing its memory.
    pub fn input(&self, ws: &Workspace, idx: usize) -> Result<Tensor> {
        ws.get_tensor(&self.def.inputs[idx]).cloned()
    }

    pub fn output_name(&self, idx: usize) -> &str {
        &self.def.outputs[idx]
    }

    /// Checks that an operand has the data type the op was registered for,
    /// and the layout of `device`: images on the gpu, buffers on the cpu.
    pub fn check_operand(&self, what: &str, t: &Tensor, dtype: DataType, device: DeviceType) {
        precondition!(
            t.dtype() == dtype,
            "{} of op {} must be {}, but got {}",
            what,
            self.def.name,
            dtype,
            t.dtype()
        );
        let want_image = device == DeviceType::Gpu;
        precondition!(
            t.is_image() == want_image,
            "{} of op {} must be {} on {}",
            what,
            self.def.name,
            if want_image { "an image" } else { "a buffer" },
            device
        );
    }
}

pub(crate) fn set_future(future: Option<&mut OpFuture>, completion: Completion) {
    if let Some(future) = future {
        future.set(completion);
    }
}

use std::sync::Arc;

use super::set_future;
use super::Operator;
use super::OperatorBase;
use super::OperatorDef;
use crate::backends::LayoutKernel;
use crate::error::Result;
use crate::future::OpFuture;
use crate::precondition;
use crate::tensor::BufferType;
use crate::tensor::DataType;
use crate::tensor::DeviceType;
use crate::tensor::Tensor;
use crate::workspace::Workspace;

/// Packs a linear buffer into an image. `buffer_type` selects the packing and
/// `"T"` the data type of the image.
pub struct BufferToImageOp<D> {
    base: OperatorBase,
    device: Arc<D>,
    buffer_type: BufferType,
    dtype: DataType,
}

impl<D: LayoutKernel> BufferToImageOp<D> {
    pub fn new(def: &OperatorDef, device: Arc<D>) -> Result<Self> {
        let buffer_type = BufferType::try_from(def.get_int_arg("buffer_type", 0))?;
        Ok(Self {
            base: OperatorBase::new(def, 1, 1),
            device,
            buffer_type,
            dtype: def.data_type()?,
        })
    }
}

impl<D: LayoutKernel + 'static> Operator for BufferToImageOp<D> {
    fn def(&self) -> &OperatorDef {
        self.base.def()
    }

    fn device_type(&self) -> DeviceType {
        self.device.device_type()
    }

    fn run(&mut self, ws: &mut Workspace, future: Option<&mut OpFuture>) -> Result<()> {
        let input = self.base.input(ws, 0)?;
        precondition!(
            !input.is_image(),
            "input of op {} is already an image",
            self.base.def().name
        );
        precondition!(
            input.dtype().is_float(),
            "input of op {} must be a float buffer, but got {}",
            self.base.def().name,
            input.dtype()
        );

        let mut output = Tensor::empty(self.dtype, DeviceType::Gpu);
        let completion =
            self.device
                .buffer_to_image(&input, self.buffer_type, self.dtype, &mut output)?;
        ws.put_tensor(self.base.output_name(0), output);
        set_future(future, completion);
        Ok(())
    }
}

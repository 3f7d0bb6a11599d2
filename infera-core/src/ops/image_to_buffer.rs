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

/// Unpacks an image back into a linear buffer of data type `"T"`.
/// `buffer_type` must match the packing of the input image.
pub struct ImageToBufferOp<D> {
    base: OperatorBase,
    device: Arc<D>,
    buffer_type: BufferType,
    dtype: DataType,
}

impl<D: LayoutKernel> ImageToBufferOp<D> {
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

impl<D: LayoutKernel + 'static> Operator for ImageToBufferOp<D> {
    fn def(&self) -> &OperatorDef {
        self.base.def()
    }

    fn device_type(&self) -> DeviceType {
        self.device.device_type()
    }

    fn run(&mut self, ws: &mut Workspace, future: Option<&mut OpFuture>) -> Result<()> {
        let input = self.base.input(ws, 0)?;
        precondition!(
            input.buffer_type() == Some(self.buffer_type),
            "input of op {} must be an image of {:?}, but got {:?}",
            self.base.def().name,
            self.buffer_type,
            input.buffer_type()
        );

        let mut output = Tensor::empty(self.dtype, self.device.device_type());
        let completion = self.device.image_to_buffer(&input, self.dtype, &mut output)?;
        ws.put_tensor(self.base.output_name(0), output);
        set_future(future, completion);
        Ok(())
    }
}

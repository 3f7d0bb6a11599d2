use std::sync::Arc;

use super::set_future;
use super::Operator;
use super::OperatorBase;
use super::OperatorDef;
use crate::backends::BiasAddKernel;
use crate::error::Result;
use crate::future::OpFuture;
use crate::precondition;
use crate::tensor::DataType;
use crate::tensor::DeviceType;
use crate::tensor::Tensor;
use crate::workspace::Workspace;

/// Adds a per channel bias to a NHWC input: inputs are `[input, bias]`.
pub struct BiasAddOp<D> {
    base: OperatorBase,
    device: Arc<D>,
    dtype: DataType,
}

impl<D: BiasAddKernel> BiasAddOp<D> {
    pub fn new(def: &OperatorDef, device: Arc<D>) -> Result<Self> {
        Ok(Self {
            base: OperatorBase::new(def, 2, 1),
            device,
            dtype: def.data_type()?,
        })
    }
}

impl<D: BiasAddKernel + 'static> Operator for BiasAddOp<D> {
    fn def(&self) -> &OperatorDef {
        self.base.def()
    }

    fn device_type(&self) -> DeviceType {
        self.device.device_type()
    }

    fn run(&mut self, ws: &mut Workspace, future: Option<&mut OpFuture>) -> Result<()> {
        let input = self.base.input(ws, 0)?;
        let bias = self.base.input(ws, 1)?;
        let device = self.device.device_type();
        self.base.check_operand("input", &input, self.dtype, device);
        self.base.check_operand("bias", &bias, self.dtype, device);
        precondition!(
            input.rank() == 4,
            "input must be 4-dimensional, but got shape {:?}",
            input.shape()
        );
        precondition!(
            bias.rank() == 1,
            "bias must be 1-dimensional, but got shape {:?}",
            bias.shape()
        );
        precondition!(
            bias.dim(0) == input.dim(3),
            "bias of {} elements does not match {} input channels",
            bias.dim(0),
            input.dim(3)
        );

        let mut output = Tensor::empty(self.dtype, device);
        let completion = self.device.bias_add(&input, &bias, &mut output)?;
        ws.put_tensor(self.base.output_name(0), output);
        set_future(future, completion);
        Ok(())
    }
}

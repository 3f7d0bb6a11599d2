use std::collections::HashMap;
use std::sync::Arc;

use super::BiasAddOp;
use super::BufferToImageOp;
use super::ImageToBufferOp;
use super::Operator;
use super::OperatorDef;
use super::ResizeBilinearOp;
use crate::backends::cpu::CpuDevice;
use crate::backends::gpu::GpuDevice;
use crate::backends::Device;
use crate::error::ErrorKind;
use crate::error::Result;
use crate::tensor::DataType;
use crate::tensor::DeviceType;

/// The devices operators can be created on. The gpu is optional.
#[derive(Debug, Clone)]
pub struct Devices {
    pub cpu: Arc<CpuDevice>,
    pub gpu: Option<Arc<GpuDevice>>,
}

impl Devices {
    pub fn new(cpu: Arc<CpuDevice>, gpu: Option<Arc<GpuDevice>>) -> Self {
        Self { cpu, gpu }
    }

    pub fn gpu(&self) -> Result<&Arc<GpuDevice>> {
        self.gpu
            .as_ref()
            .ok_or_else(|| (ErrorKind::Unsupported, "no gpu device is available").into())
    }

    /// waits for all the work submitted to `device_type`.
    pub fn sync(&self, device_type: DeviceType) -> Result<()> {
        match device_type {
            DeviceType::Cpu => self.cpu.finish(),
            DeviceType::Gpu => self.gpu()?.finish(),
        }
    }
}

type OpCreator = Box<dyn Fn(&OperatorDef, &Devices) -> Result<Box<dyn Operator>> + Send + Sync>;

/// Maps `(op type, device, data type)` to the constructor of the operator
/// variant for it.
pub struct OpRegistry {
    creators: HashMap<(String, DeviceType, DataType), OpCreator>,
}

impl Default for OpRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl OpRegistry {
    /// a registry of all the builtin operators.
    pub fn new() -> Self {
        let mut registry = Self::empty();
        registry.register_builtin_ops();
        registry
    }

    pub fn empty() -> Self {
        Self {
            creators: HashMap::new(),
        }
    }

    pub fn register<F>(&mut self, op_type: &str, device: DeviceType, dtype: DataType, creator: F)
    where F: Fn(&OperatorDef, &Devices) -> Result<Box<dyn Operator>> + Send + Sync + 'static {
        self.creators
            .insert((op_type.to_string(), device, dtype), Box::new(creator));
    }

    pub fn is_registered(&self, op_type: &str, device: DeviceType, dtype: DataType) -> bool {
        self.creators
            .contains_key(&(op_type.to_string(), device, dtype))
    }

    pub fn create_operator(
        &self,
        def: &OperatorDef,
        device: DeviceType,
        devices: &Devices,
    ) -> Result<Box<dyn Operator>> {
        let dtype = def.data_type()?;
        let creator = self
            .creators
            .get(&(def.op_type.clone(), device, dtype))
            .ok_or_else(|| {
                (
                    ErrorKind::Unsupported,
                    format!(
                        "op {} of type {} is not supported on {} for {}",
                        def.name, def.op_type, device, dtype
                    ),
                )
            })?;
        tracing::debug!(op = %def.name, op_type = %def.op_type, %device, %dtype, "create operator");
        creator(def, devices)
    }

    fn register_builtin_ops(&mut self) {
        self.register("BiasAdd", DeviceType::Cpu, DataType::F32, |def, d| {
            Ok(Box::new(BiasAddOp::new(def, d.cpu.clone())?))
        });
        self.register("ResizeBilinear", DeviceType::Cpu, DataType::F32, |def, d| {
            Ok(Box::new(ResizeBilinearOp::new(def, d.cpu.clone())?))
        });

        for dtype in [DataType::F32, DataType::F16] {
            self.register("BiasAdd", DeviceType::Gpu, dtype, |def, d| {
                Ok(Box::new(BiasAddOp::new(def, d.gpu()?.clone())?))
            });
            self.register("ResizeBilinear", DeviceType::Gpu, dtype, |def, d| {
                Ok(Box::new(ResizeBilinearOp::new(def, d.gpu()?.clone())?))
            });
            self.register("BufferToImage", DeviceType::Gpu, dtype, |def, d| {
                Ok(Box::new(BufferToImageOp::new(def, d.gpu()?.clone())?))
            });
            self.register("ImageToBuffer", DeviceType::Gpu, dtype, |def, d| {
                Ok(Box::new(ImageToBufferOp::new(def, d.gpu()?.clone())?))
            });
        }
    }
}

use std::time::Instant;

use crate::error::Result;
use crate::future::OpFuture;
use crate::ops::Devices;
use crate::ops::OpRegistry;
use crate::ops::Operator;
use crate::ops::OperatorDef;
use crate::tensor::DeviceType;
use crate::workspace::Workspace;

/// The elapsed time of one operator of a net run. For gpu operators this is
/// the time of the enqueued command, measured once the net is synced.
#[derive(Debug, Clone)]
pub struct OpStats {
    pub name: String,
    pub op_type: String,
    pub micros: u64,
}

/// Runs a list of operators on one device in the declared order.
pub struct SerialNet {
    ops: Vec<Box<dyn Operator>>,
    device_type: DeviceType,
    devices: Devices,
}

impl SerialNet {
    pub fn new(
        registry: &OpRegistry,
        defs: &[OperatorDef],
        device_type: DeviceType,
        devices: &Devices,
    ) -> Result<Self> {
        let ops = defs
            .iter()
            .map(|def| registry.create_operator(def, device_type, devices))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            ops,
            device_type,
            devices: devices.clone(),
        })
    }

    pub fn device_type(&self) -> DeviceType {
        self.device_type
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// runs every operator once. gpu work may still be in flight when this
    /// returns, call `sync` before reading the outputs.
    pub fn run(&mut self, ws: &mut Workspace) -> Result<()> {
        for op in self.ops.iter_mut() {
            tracing::debug!(op = %op.def().name, op_type = %op.def().op_type, "run op");
            op.run(ws, None)?;
        }
        Ok(())
    }

    /// runs every operator and waits for each one's work before the next, to
    /// time them one by one.
    pub fn run_with_stats(&mut self, ws: &mut Workspace) -> Result<Vec<OpStats>> {
        let mut stats = Vec::with_capacity(self.ops.len());
        for op in self.ops.iter_mut() {
            let started = Instant::now();
            let mut future = OpFuture::new();
            op.run(ws, Some(&mut future))?;
            let micros = match future.wait()? {
                Some(call) => call.run_time().as_micros() as u64,
                None => started.elapsed().as_micros() as u64,
            };
            stats.push(OpStats {
                name: op.def().name.clone(),
                op_type: op.def().op_type.clone(),
                micros,
            });
        }
        Ok(stats)
    }

    pub fn sync(&self) -> Result<()> {
        self.devices.sync(self.device_type)
    }
}

use rayon::ThreadPool;
use rayon::ThreadPoolBuilder;

use crate::backends::Device;
use crate::error::Error;
use crate::error::ErrorKind;
use crate::error::Result;
use crate::runtime::affinity;
use crate::runtime::CpuThreadConfig;
use crate::runtime::RuntimeConfig;
use crate::tensor::DeviceType;

/// The cpu backend: a fixed size worker pool, pinned once when the device is
/// built. Kernels run synchronously on the pool.
#[derive(Debug)]
pub struct CpuDevice {
    pool: ThreadPool,
    config: CpuThreadConfig,
}

impl CpuDevice {
    pub fn new(conf: &RuntimeConfig) -> Result<Self> {
        let config = conf.cpu_thread_config().clone();
        let cpu_ids = config.cpu_ids.clone();

        let pool = ThreadPoolBuilder::new()
            .num_threads(config.num_threads.max(1))
            .thread_name(|i| format!("infera-cpu-{}", i))
            .start_handler(move |i| {
                if cpu_ids.is_empty() {
                    return;
                }
                if let Err(err) = affinity::pin_current_thread(&cpu_ids) {
                    tracing::warn!(worker = i, "failed to pin cpu worker, runs unpinned: {}", err);
                }
            })
            .build()
            .map_err(|err| {
                Error::from((ErrorKind::ResourceError, "failed to spawn the cpu worker pool"))
                    .with_cause(err)
            })?;

        tracing::debug!(
            num_threads = config.num_threads,
            cpu_ids = ?config.cpu_ids,
            policy = ?config.policy,
            "cpu device created"
        );
        Ok(Self { pool, config })
    }

    pub fn num_threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    pub fn thread_config(&self) -> &CpuThreadConfig {
        &self.config
    }

    /// the effective affinity of every worker thread, in worker order.
    pub fn worker_affinity(&self) -> Result<Vec<Vec<usize>>> {
        self.pool
            .broadcast(|_| affinity::current_thread_affinity())
            .into_iter()
            .collect()
    }

    pub(crate) fn pool(&self) -> &ThreadPool {
        &self.pool
    }
}

impl Device for CpuDevice {
    fn device_type(&self) -> DeviceType {
        DeviceType::Cpu
    }

    fn finish(&self) -> Result<()> {
        Ok(())
    }
}

pub mod affinity;
mod storage;
mod topology;

use std::fmt;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;

pub use storage::FileStorage;
pub use storage::FileStorageFactory;
pub use storage::KvStorage;
pub use storage::KvStorageFactory;
pub(crate) use storage::read_chunk;
pub use topology::query_big_little_core_ids;
pub use topology::BigLittleCores;

use crate::error::Error;
use crate::error::ErrorKind;
use crate::error::Result;

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Default)]
pub enum CpuAffinityPolicy {
    /// let the os schedule the worker threads
    #[default]
    None,
    /// pin the worker threads to the big cores
    HighPerformance,
    /// pin the worker threads to the little cores
    PowerSave,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Default)]
pub enum GpuPerfHint {
    #[default]
    Default,
    Low,
    Normal,
    High,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Default)]
pub enum GpuPriorityHint {
    #[default]
    Default,
    Low,
    Normal,
    High,
}

/// The resolved cpu worker settings: how many threads, and which cores they
/// are pinned to. An empty `cpu_ids` leaves the threads unpinned.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct CpuThreadConfig {
    pub num_threads: usize,
    pub cpu_ids: Vec<usize>,
    pub policy: CpuAffinityPolicy,
}

impl Default for CpuThreadConfig {
    fn default() -> Self {
        Self {
            num_threads: num_cpus::get(),
            cpu_ids: vec![],
            policy: CpuAffinityPolicy::None,
        }
    }
}

/// The process-wide runtime settings, built once at startup and passed by
/// reference into `CpuDevice::new` and `GpuDevice::new`.
///
/// Every device takes a snapshot of the settings when it is constructed, so a
/// setter only affects devices constructed after it. The cpu worker pool is
/// pinned once and never re-pinned; gpu hints and the storage factory are read
/// once when the gpu device is created. Setting them afterwards is accepted
/// and logged, and applies to the next gpu device.
///
/// The config has no internal locking: set it up before inference starts and
/// treat it as read-only afterwards.
pub struct RuntimeConfig {
    cpu: CpuThreadConfig,
    gpu_perf_hint: GpuPerfHint,
    gpu_priority_hint: GpuPriorityHint,
    storage_factory: Option<Arc<dyn KvStorageFactory>>,
    gpu_devices_built: AtomicUsize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RuntimeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeConfig")
            .field("cpu", &self.cpu)
            .field("gpu_perf_hint", &self.gpu_perf_hint)
            .field("gpu_priority_hint", &self.gpu_priority_hint)
            .field("storage_factory", &self.storage_factory.is_some())
            .finish()
    }
}

impl RuntimeConfig {
    pub fn new() -> Self {
        Self {
            cpu: CpuThreadConfig::default(),
            gpu_perf_hint: GpuPerfHint::default(),
            gpu_priority_hint: GpuPriorityHint::default(),
            storage_factory: None,
            gpu_devices_built: AtomicUsize::new(0),
        }
    }

    pub fn set_gpu_hints(&mut self, perf: GpuPerfHint, priority: GpuPriorityHint) {
        tracing::debug!(?perf, ?priority, "set gpu hints");
        if self.gpu_devices_built.load(Ordering::Relaxed) > 0 {
            tracing::warn!(
                "gpu hints are set after a gpu device was created, they only apply to gpu devices created from now on"
            );
        }
        self.gpu_perf_hint = perf;
        self.gpu_priority_hint = priority;
    }

    /// Sets the worker count and affinity policy. A `num_threads_hint` of zero
    /// or less means all cores the policy selects; otherwise it is clamped to
    /// that number of cores. On failure the previous settings stay in effect.
    pub fn set_cpu_thread_policy(
        &mut self,
        num_threads_hint: i32,
        policy: CpuAffinityPolicy,
    ) -> Result<()> {
        tracing::debug!(num_threads_hint, ?policy, "set cpu thread policy");

        let cpu_ids = match policy {
            CpuAffinityPolicy::None => {
                let num_cores = num_cpus::get();
                self.cpu = CpuThreadConfig {
                    num_threads: clamp_threads(num_threads_hint, num_cores),
                    cpu_ids: vec![],
                    policy,
                };
                return Ok(());
            }
            CpuAffinityPolicy::HighPerformance | CpuAffinityPolicy::PowerSave => {
                let cores = query_big_little_core_ids().map_err(|err| {
                    Error::from((
                        ErrorKind::ConfigError,
                        format!(
                            "affinity policy {:?} requires the cpu topology, which is unknown",
                            policy
                        ),
                    ))
                    .with_cause(err)
                })?;
                if policy == CpuAffinityPolicy::HighPerformance {
                    cores.big
                } else {
                    cores.little
                }
            }
        };

        if cpu_ids.is_empty() {
            return Err((
                ErrorKind::ConfigError,
                format!("no core is selected by affinity policy {:?}", policy),
            )
                .into());
        }

        self.cpu = CpuThreadConfig {
            num_threads: clamp_threads(num_threads_hint, cpu_ids.len()),
            cpu_ids,
            policy,
        };
        Ok(())
    }

    /// Pins the worker threads to an explicit list of cores, overriding the
    /// policy. The thread count is clamped to the number of listed cores, zero
    /// means one thread per listed core.
    pub fn set_cpu_thread_affinity(&mut self, num_threads: usize, cpu_ids: &[usize]) -> Result<()> {
        tracing::debug!(num_threads, ?cpu_ids, "set cpu thread affinity");
        if cpu_ids.is_empty() {
            return Err((ErrorKind::ConfigError, "the cpu id list is empty").into());
        }

        let allowed = affinity::current_thread_affinity()?;
        if let Some(id) = cpu_ids.iter().find(|&&id| !allowed.contains(&id)) {
            return Err((
                ErrorKind::ConfigError,
                format!("cpu {} is not available, available cpus: {:?}", id, allowed),
            )
                .into());
        }

        let mut ids = cpu_ids.to_vec();
        ids.sort_unstable();
        ids.dedup();
        self.cpu = CpuThreadConfig {
            num_threads: if num_threads == 0 {
                ids.len()
            } else {
                num_threads.min(ids.len())
            },
            cpu_ids: ids,
            policy: CpuAffinityPolicy::None,
        };
        Ok(())
    }

    /// The big/little partition of the cores, or two empty lists when the
    /// topology is unknown. Use `query_big_little_core_ids` to see the reason.
    pub fn big_little_core_ids(&self) -> BigLittleCores {
        match query_big_little_core_ids() {
            Ok(cores) => cores,
            Err(err) => {
                tracing::warn!("cpu topology is unknown, falling back to no affinity: {}", err);
                BigLittleCores::default()
            }
        }
    }

    pub fn set_kv_storage_factory(&mut self, factory: Arc<dyn KvStorageFactory>) {
        tracing::debug!("set kv storage factory");
        if self.gpu_devices_built.load(Ordering::Relaxed) > 0 {
            tracing::warn!("kv storage factory is set after a gpu device was created");
        }
        self.storage_factory = Some(factory);
    }

    pub fn clear_kv_storage_factory(&mut self) {
        self.storage_factory = None;
    }

    pub fn cpu_thread_config(&self) -> &CpuThreadConfig {
        &self.cpu
    }

    pub fn gpu_hints(&self) -> (GpuPerfHint, GpuPriorityHint) {
        (self.gpu_perf_hint, self.gpu_priority_hint)
    }

    pub fn kv_storage_factory(&self) -> Option<Arc<dyn KvStorageFactory>> {
        self.storage_factory.clone()
    }

    pub(crate) fn mark_gpu_device_built(&self) {
        self.gpu_devices_built.fetch_add(1, Ordering::Relaxed);
    }
}

fn clamp_threads(hint: i32, num_cores: usize) -> usize {
    if hint <= 0 {
        num_cores.max(1)
    } else {
        (hint as usize).min(num_cores).max(1)
    }
}

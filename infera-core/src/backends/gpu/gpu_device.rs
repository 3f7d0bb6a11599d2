use std::sync::Arc;

use parking_lot::Mutex;

use super::context::GpuContext;
use super::image::GpuImage;
use super::program::Kernel;
use super::program::ProgramCache;
use super::program::ProgramCacheStats;
use super::program::PROGRAM_STORAGE_NAME;
use super::queue::CommandQueue;
use crate::backends::Device;
use crate::error::Result;
use crate::future::Completion;
use crate::precondition;
use crate::runtime::GpuPerfHint;
use crate::runtime::GpuPriorityHint;
use crate::runtime::KvStorage;
use crate::runtime::RuntimeConfig;
use crate::tensor::DataType;
use crate::tensor::DeviceType;

#[derive(Debug, Clone)]
pub struct GpuDeviceOptions {
    /// the largest width or height of an image the device can allocate.
    pub max_image_size: usize,
}

impl Default for GpuDeviceOptions {
    fn default() -> Self {
        Self {
            max_image_size: 16384,
        }
    }
}

impl GpuDeviceOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_image_size(mut self, v: usize) -> Self {
        self.max_image_size = v;
        self
    }
}

/// Opens the program storage of the configured factory. A storage that fails
/// to load is replaced by an empty one, the programs are rebuilt into it.
pub(crate) fn load_program_storage(conf: &RuntimeConfig) -> Option<Box<dyn KvStorage>> {
    let factory = conf.kv_storage_factory()?;
    let mut storage = factory.create_storage(PROGRAM_STORAGE_NAME);
    if let Err(err) = storage.load() {
        tracing::warn!("failed to load the program storage, start with an empty one: {}", err);
        storage = factory.create_storage(PROGRAM_STORAGE_NAME);
    }
    Some(storage)
}

/// The gpu backend on wgpu. Kernels are compute pipelines built from the WGSL
/// programs under `shaders/`, dispatched in order from one command queue
/// thread. `run` of a gpu operator returns as soon as its command is enqueued;
/// `finish` waits for all of them.
pub struct GpuDevice {
    opts: GpuDeviceOptions,
    perf_hint: GpuPerfHint,
    priority_hint: GpuPriorityHint,
    queue: CommandQueue,
    programs: Mutex<ProgramCache>,
    ctx: Arc<GpuContext>,
}

impl GpuDevice {
    /// Fails with a `ResourceError` when there is no adapter able to run
    /// compute shaders.
    pub fn new(conf: &RuntimeConfig) -> Result<Self> {
        Self::with_options(conf, GpuDeviceOptions::default())
    }

    pub fn with_options(conf: &RuntimeConfig, opts: GpuDeviceOptions) -> Result<Self> {
        let (perf_hint, priority_hint) = conf.gpu_hints();
        let storage = load_program_storage(conf);
        let has_storage = storage.is_some();

        let ctx = Arc::new(GpuContext::new(perf_hint)?);
        let queue = CommandQueue::new(priority_hint)?;

        conf.mark_gpu_device_built();
        tracing::debug!(
            ?perf_hint,
            ?priority_hint,
            adapter = %ctx.adapter_info.name,
            has_storage,
            max_image_size = opts.max_image_size,
            "gpu device created"
        );

        Ok(Self {
            opts,
            perf_hint,
            priority_hint,
            queue,
            programs: Mutex::new(ProgramCache::new(ctx.clone(), storage)),
            ctx,
        })
    }

    pub fn options(&self) -> &GpuDeviceOptions {
        &self.opts
    }

    pub fn hints(&self) -> (GpuPerfHint, GpuPriorityHint) {
        (self.perf_hint, self.priority_hint)
    }

    pub fn adapter_name(&self) -> &str {
        &self.ctx.adapter_info.name
    }

    /// Submits `work` to the command queue. The returned completion is
    /// signalled once the work has run, or abandoned if it fails.
    pub fn enqueue<F>(&self, name: &'static str, work: F) -> Result<Completion>
    where F: FnOnce() -> Result<()> + Send + 'static {
        self.queue.enqueue(name, Box::new(work))
    }

    pub fn program_cache_stats(&self) -> ProgramCacheStats {
        self.programs.lock().stats()
    }

    /// writes the compiled programs into the storage now, instead of waiting
    /// for the device to drop.
    pub fn flush_program_storage(&self) -> Result<()> {
        self.programs.lock().flush()
    }

    pub(crate) fn kernel(&self, program: &str, entry: &str, dtype: DataType) -> Result<Arc<Kernel>> {
        self.programs.lock().kernel(program, entry, dtype)
    }

    pub(crate) fn context(&self) -> Arc<GpuContext> {
        self.ctx.clone()
    }

    /// Allocates an image of `[width, height]` texels, which must fit the max
    /// image size.
    pub(crate) fn alloc_image(&self, [width, height]: [usize; 2], dtype: DataType) -> Result<Arc<GpuImage>> {
        self.check_image_size([width, height]);
        Ok(Arc::new(GpuImage::new(self.ctx.clone(), width, height, dtype)?))
    }

    pub(crate) fn check_image_size(&self, [width, height]: [usize; 2]) {
        precondition!(
            width <= self.opts.max_image_size && height <= self.opts.max_image_size,
            "image of {}x{} exceeds the max image size {}",
            width,
            height,
            self.opts.max_image_size
        );
    }
}

impl Device for GpuDevice {
    fn device_type(&self) -> DeviceType {
        DeviceType::Gpu
    }

    fn finish(&self) -> Result<()> {
        self.queue.finish()
    }
}

impl Drop for GpuDevice {
    fn drop(&mut self) {
        if let Err(err) = self.programs.get_mut().flush() {
            tracing::error!("failed to flush the program storage: {}", err);
        }
    }
}

impl std::fmt::Debug for GpuDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpuDevice")
            .field("opts", &self.opts)
            .field("perf_hint", &self.perf_hint)
            .field("priority_hint", &self.priority_hint)
            .field("adapter", &self.ctx.adapter_info.name)
            .finish()
    }
}

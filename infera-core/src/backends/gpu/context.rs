use wgpu::util::DeviceExt;

use crate::error::Error;
use crate::error::ErrorKind;
use crate::error::Result;
use crate::runtime::GpuPerfHint;

/// The adapter a perf hint asks for.
pub(crate) fn power_preference(hint: GpuPerfHint) -> wgpu::PowerPreference {
    match hint {
        GpuPerfHint::Low => wgpu::PowerPreference::LowPower,
        GpuPerfHint::Normal => wgpu::PowerPreference::None,
        GpuPerfHint::High | GpuPerfHint::Default => wgpu::PowerPreference::HighPerformance,
    }
}

/// The wgpu device and queue shared by a `GpuDevice`, its programs and the
/// images it allocates.
#[derive(Debug)]
pub(crate) struct GpuContext {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub adapter_info: wgpu::AdapterInfo,
    pub limits: wgpu::Limits,
    /// the driver can serialize compiled pipelines
    pub pipeline_cache: bool,
}

impl GpuContext {
    pub fn new(perf_hint: GpuPerfHint) -> Result<Self> {
        pollster::block_on(Self::init_wgpu(power_preference(perf_hint)))
    }

    async fn init_wgpu(power_preference: wgpu::PowerPreference) -> Result<Self> {
        let instance = wgpu::Instance::default();
        let mut adapter = None;
        // a software adapter is better than none
        for force_fallback_adapter in [false, true] {
            adapter = instance
                .request_adapter(&wgpu::RequestAdapterOptions {
                    power_preference,
                    force_fallback_adapter,
                    compatible_surface: None,
                })
                .await;
            if adapter.is_some() {
                break;
            }
        }
        let adapter = adapter
            .ok_or_else(|| Error::from((ErrorKind::ResourceError, "no gpu adapter is available")))?;

        let adapter_info = adapter.get_info();
        let downlevel = adapter.get_downlevel_capabilities();
        if !downlevel
            .flags
            .contains(wgpu::DownlevelFlags::COMPUTE_SHADERS)
        {
            return Err((
                ErrorKind::ResourceError,
                format!("gpu adapter {} can not run compute shaders", adapter_info.name),
            )
                .into());
        }

        let pipeline_cache = adapter.features().contains(wgpu::Features::PIPELINE_CACHE);
        let required_features = if pipeline_cache {
            wgpu::Features::PIPELINE_CACHE
        } else {
            wgpu::Features::empty()
        };
        let limits = adapter.limits();
        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("infera gpu device"),
                    required_features,
                    required_limits: limits.clone(),
                    memory_hints: wgpu::MemoryHints::Performance,
                },
                None,
            )
            .await
            .map_err(|err| {
                Error::from((
                    ErrorKind::ResourceError,
                    format!("failed to open gpu adapter {}: {}", adapter_info.name, err),
                ))
            })?;
        device.on_uncaptured_error(Box::new(|err| {
            tracing::error!("uncaptured gpu error: {}", err);
        }));

        tracing::info!(
            adapter = %adapter_info.name,
            backend = ?adapter_info.backend,
            driver = %adapter_info.driver,
            pipeline_cache,
            "gpu adapter ready"
        );
        Ok(Self {
            device,
            queue,
            adapter_info,
            limits,
            pipeline_cache,
        })
    }

    /// Identifies the adapter and driver a compiled program is only valid for.
    pub fn cache_key(&self) -> String {
        let info = &self.adapter_info;
        format!(
            "{:?}-{:04x}-{:04x}-{}-{}",
            info.backend, info.vendor, info.device, info.driver, info.driver_info
        )
    }

    pub fn make_storage_buffer(&self, name: &'static str, content: &[u8]) -> wgpu::Buffer {
        self.device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(name),
                contents: content,
                usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
            })
    }

    /// A zeroed storage buffer of at least `bytes`. Bindings can not be empty, so
    /// the size is rounded up to one texel.
    pub fn alloc_buffer(&self, name: &'static str, bytes: usize) -> Result<wgpu::Buffer> {
        let size = (bytes.max(16) as u64).next_multiple_of(wgpu::COPY_BUFFER_ALIGNMENT);
        if size > self.limits.max_storage_buffer_binding_size as u64 {
            return Err((
                ErrorKind::ResourceError,
                format!(
                    "{} of {} bytes exceeds the storage buffer limit {} of the gpu",
                    name, size, self.limits.max_storage_buffer_binding_size
                ),
            )
                .into());
        }
        Ok(self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(name),
            size,
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_SRC
                | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        }))
    }

    /// The workgroups covering a `width` x `height` grid with the 8x8 groups all
    /// the programs are declared with.
    pub fn workgroups(&self, [width, height]: [usize; 2]) -> Result<[u32; 2]> {
        let groups = [width.div_ceil(8), height.div_ceil(8)];
        let max = self.limits.max_compute_workgroups_per_dimension as usize;
        if groups[0] > max || groups[1] > max {
            return Err((
                ErrorKind::ResourceError,
                format!(
                    "a grid of {}x{} needs more than {} workgroups per dimension",
                    width, height, max
                ),
            )
                .into());
        }
        Ok([groups[0] as u32, groups[1] as u32])
    }

    /// Encodes one dispatch of `pipeline`, submits it and waits for the gpu to
    /// finish it. An empty grid dispatches nothing.
    pub fn dispatch(
        &self,
        pipeline: &wgpu::ComputePipeline,
        entries: &[wgpu::BindGroupEntry],
        [x, y]: [u32; 2],
    ) {
        if x == 0 || y == 0 {
            return;
        }
        let bind_group_layout = pipeline.get_bind_group_layout(0);
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: None,
            layout: &bind_group_layout,
            entries,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: None });
        {
            let mut cpass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor::default());
            cpass.set_pipeline(pipeline);
            cpass.set_bind_group(0, &bind_group, &[]);
            cpass.dispatch_workgroups(x, y, 1);
        }
        let idx = self.queue.submit(Some(encoder.finish()));
        self.device.poll(wgpu::Maintain::WaitForSubmissionIndex(idx));
    }

    /// Copies `src` into a new buffer of the same size on the gpu.
    pub fn duplicate_buffer(&self, name: &'static str, src: &wgpu::Buffer) -> wgpu::Buffer {
        let dst = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(name),
            size: src.size(),
            usage: src.usage() | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: None });
        encoder.copy_buffer_to_buffer(src, 0, &dst, 0, src.size());
        let idx = self.queue.submit(Some(encoder.finish()));
        self.device.poll(wgpu::Maintain::WaitForSubmissionIndex(idx));
        dst
    }

    /// Reads the first `bytes` of `src` back to the host through a staging
    /// buffer, handing the mapped bytes to `f`.
    pub fn read_buffer<T>(
        &self,
        src: &wgpu::Buffer,
        bytes: usize,
        f: impl FnOnce(&[u8]) -> T,
    ) -> Result<T> {
        if bytes == 0 {
            return Ok(f(&[]));
        }
        let size = bytes as u64;
        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("staging buffer"),
            size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: None });
        encoder.copy_buffer_to_buffer(src, 0, &staging, 0, size);
        let idx = self.queue.submit(Some(encoder.finish()));

        let (tx, rx) = crossbeam_channel::bounded(1);
        let slice = staging.slice(..);
        slice.map_async(wgpu::MapMode::Read, move |v| {
            let _ = tx.send(v);
        });
        self.device.poll(wgpu::Maintain::WaitForSubmissionIndex(idx));

        match rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                return Err((
                    ErrorKind::ResourceError,
                    format!("failed to map the gpu buffer for reading: {}", err),
                )
                    .into())
            }
            Err(_) => {
                return Err((ErrorKind::ResourceError, "the gpu buffer was never mapped").into())
            }
        }
        let out = {
            let data = slice.get_mapped_range();
            f(&data[..])
        };
        staging.unmap();
        Ok(out)
    }
}

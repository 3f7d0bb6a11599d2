use std::borrow::Cow;
use std::collections::HashMap;
use std::io::Cursor;
use std::io::Write;
use std::sync::Arc;

use byteorder::LittleEndian;
use byteorder::ReadBytesExt;
use byteorder::WriteBytesExt;
use xxhash_rust::xxh3::xxh3_64;
use xxhash_rust::xxh3::Xxh3;

use super::context::GpuContext;
use crate::error::Error;
use crate::error::ErrorKind;
use crate::error::Result;
use crate::runtime::read_chunk;
use crate::runtime::KvStorage;
use crate::tensor::DataType;

/// The storage every gpu device keeps its compiled programs in.
pub const PROGRAM_STORAGE_NAME: &str = "infera_wgsl_compiled_program.bin";

const PROGRAM_SOURCES: &[(&str, &str)] = &[
    ("bias_add", include_str!("shaders/bias_add.wgsl")),
    ("resize_bilinear", include_str!("shaders/resize_bilinear.wgsl")),
    ("buffer_to_image", include_str!("shaders/buffer_to_image.wgsl")),
];

const TEXEL_F32: &str = include_str!("shaders/texel_f32.wgsl");
const TEXEL_F16: &str = include_str!("shaders/texel_f16.wgsl");

const BINARY_MAGIC: &[u8; 4] = b"IWGB";
const BINARY_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgramCacheStats {
    /// programs compiled from source
    pub built: usize,
    /// programs loaded from the kv storage
    pub storage_hits: usize,
    /// programs found in the in-memory cache of the device
    pub memory_hits: usize,
}

/// A built program: the compute pipeline of one entry point, specialized for
/// the texel type of `dtype`.
#[derive(Debug)]
pub struct Kernel {
    entry: String,
    dtype: DataType,
    pipeline: wgpu::ComputePipeline,
}

impl Kernel {
    pub fn entry(&self) -> &str {
        &self.entry
    }

    pub fn dtype(&self) -> DataType {
        self.dtype
    }

    pub(crate) fn pipeline(&self) -> &wgpu::ComputePipeline {
        &self.pipeline
    }
}

/// What the kv storage keeps for a program: enough to tell that it was built
/// from the same source, and the driver's serialized pipeline, which is empty
/// when the driver can not serialize one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ProgramBinary {
    fingerprint: u64,
    dtype: DataType,
    entry: String,
    source_hash: u64,
    pipeline_data: Vec<u8>,
}

impl ProgramBinary {
    fn to_binary(&self) -> Result<Vec<u8>> {
        let mut w = Vec::with_capacity(40 + self.entry.len() + self.pipeline_data.len());
        w.write_all(BINARY_MAGIC)?;
        w.write_u32::<LittleEndian>(BINARY_VERSION)?;
        w.write_u64::<LittleEndian>(self.fingerprint)?;
        w.write_u8(self.dtype as u8)?;
        w.write_u64::<LittleEndian>(self.source_hash)?;
        w.write_u32::<LittleEndian>(self.entry.len() as u32)?;
        w.write_all(self.entry.as_bytes())?;
        w.write_u32::<LittleEndian>(self.pipeline_data.len() as u32)?;
        w.write_all(&self.pipeline_data)?;
        Ok(w)
    }

    fn from_binary(buf: &[u8]) -> Result<Self> {
        let corrupted = |what: &str| {
            Error::from((
                ErrorKind::ProgramBuildError,
                format!("corrupted program binary: {}", what),
            ))
        };

        let mut r = Cursor::new(buf);
        let magic = buf.get(..4).ok_or_else(|| corrupted("missing header"))?;
        r.set_position(4);
        let version = r
            .read_u32::<LittleEndian>()
            .map_err(|_| corrupted("missing version"))?;
        if magic != BINARY_MAGIC || version != BINARY_VERSION {
            return Err((
                ErrorKind::ProgramBuildError,
                format!("unknown program binary format, version {}", version),
            )
                .into());
        }
        let fingerprint = r
            .read_u64::<LittleEndian>()
            .map_err(|_| corrupted("missing fingerprint"))?;
        let dtype = r.read_u8().map_err(|_| corrupted("missing data type"))?;
        let dtype = DataType::try_from(dtype as i64)
            .map_err(|err| corrupted("unknown data type").with_cause(err))?;
        let source_hash = r
            .read_u64::<LittleEndian>()
            .map_err(|_| corrupted("missing source hash"))?;
        let entry = read_chunk(&mut r).ok_or_else(|| corrupted("truncated entry"))?;
        let entry = String::from_utf8(entry.to_vec())
            .map_err(|err| corrupted("invalid entry name").with_cause(err))?;
        let pipeline_data =
            read_chunk(&mut r).ok_or_else(|| corrupted("truncated pipeline data"))?;
        Ok(Self {
            fingerprint,
            dtype,
            entry,
            source_hash,
            pipeline_data: pipeline_data.to_vec(),
        })
    }
}

/// The source of `program` with the texel type of `dtype` declared in front.
pub(crate) fn specialize(program: &str, dtype: DataType) -> Result<String> {
    let source = PROGRAM_SOURCES
        .iter()
        .find(|(name, _)| *name == program)
        .map(|(_, source)| *source)
        .ok_or_else(|| {
            Error::from((
                ErrorKind::ProgramBuildError,
                format!("program {} is not found", program),
            ))
        })?;
    let texel = match dtype {
        DataType::F32 => TEXEL_F32,
        DataType::F16 => TEXEL_F16,
        _ => {
            return Err((
                ErrorKind::ProgramBuildError,
                format!("program {} has no {} variant", program, dtype),
            )
                .into())
        }
    };
    Ok(format!("{}\n{}", texel, source))
}

/// Identifies a program: the specialized source, the entry point, and the
/// adapter it is compiled for.
pub(crate) fn fingerprint(source: &str, entry: &str, adapter_key: &str) -> u64 {
    let mut hasher = Xxh3::new();
    hasher.update(source.as_bytes());
    hasher.update(&[0]);
    hasher.update(entry.as_bytes());
    hasher.update(&[0]);
    hasher.update(adapter_key.as_bytes());
    hasher.digest()
}

/// Compiles `entry` of `source` into a compute pipeline. With `pipeline_data`
/// from an earlier build the driver may skip compiling; returns the pipeline
/// data to keep for the next build.
fn build_pipeline(
    ctx: &GpuContext,
    source: &str,
    entry: &str,
    pipeline_data: Option<&[u8]>,
) -> Result<(wgpu::ComputePipeline, Vec<u8>)> {
    let cache = if ctx.pipeline_cache {
        // SAFETY: the data was produced by `get_data` of a pipeline cache on an
        // adapter with the same backend, device and driver, which the program
        // fingerprint covers. invalid data falls back to an empty cache.
        Some(unsafe {
            ctx.device
                .create_pipeline_cache(&wgpu::PipelineCacheDescriptor {
                    label: Some(entry),
                    data: pipeline_data,
                    fallback: true,
                })
        })
    } else {
        None
    };

    ctx.device.push_error_scope(wgpu::ErrorFilter::Validation);
    let module = ctx
        .device
        .create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(entry),
            source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(source)),
        });
    let pipeline = ctx
        .device
        .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some(entry),
            layout: None,
            module: &module,
            entry_point: entry,
            compilation_options: wgpu::PipelineCompilationOptions::default(),
            cache: cache.as_ref(),
        });
    if let Some(err) = pollster::block_on(ctx.device.pop_error_scope()) {
        return Err((
            ErrorKind::ProgramBuildError,
            format!("failed to build kernel {}: {}", entry, err),
        )
            .into());
    }

    let data = cache.and_then(|c| c.get_data()).unwrap_or_default();
    Ok((pipeline, data))
}

pub(crate) struct ProgramCache {
    ctx: Arc<GpuContext>,
    adapter_key: String,
    kernels: HashMap<u64, Arc<Kernel>>,
    storage: Option<Box<dyn KvStorage>>,
    stats: ProgramCacheStats,
}

impl ProgramCache {
    pub fn new(ctx: Arc<GpuContext>, storage: Option<Box<dyn KvStorage>>) -> Self {
        Self {
            adapter_key: ctx.cache_key(),
            ctx,
            kernels: HashMap::new(),
            storage,
            stats: ProgramCacheStats::default(),
        }
    }

    pub fn stats(&self) -> ProgramCacheStats {
        self.stats
    }

    /// Looks the kernel up in memory, then in the storage, and builds it from
    /// source if neither has it.
    pub fn kernel(&mut self, program: &str, entry: &str, dtype: DataType) -> Result<Arc<Kernel>> {
        let source = specialize(program, dtype)?;
        let fp = fingerprint(&source, entry, &self.adapter_key);

        if let Some(kernel) = self.kernels.get(&fp) {
            self.stats.memory_hits += 1;
            return Ok(kernel.clone());
        }

        let key = format!("{:016x}", fp);
        let source_hash = xxh3_64(source.as_bytes());
        let cached = self
            .storage
            .as_ref()
            .and_then(|s| s.find(&key))
            .map(ProgramBinary::from_binary);
        let pipeline = match cached {
            Some(Ok(binary))
                if binary.fingerprint == fp
                    && binary.source_hash == source_hash
                    && binary.entry == entry
                    && binary.dtype == dtype =>
            {
                let (pipeline, _) =
                    build_pipeline(&self.ctx, &source, entry, Some(&binary.pipeline_data))?;
                self.stats.storage_hits += 1;
                tracing::debug!(program, entry, %dtype, "loaded gpu program from storage");
                pipeline
            }
            cached => {
                if let Some(Err(err)) = &cached {
                    tracing::warn!(program, entry, "rebuild the program, cached binary is unusable: {}", err);
                }
                let (pipeline, pipeline_data) = build_pipeline(&self.ctx, &source, entry, None)?;
                self.stats.built += 1;
                tracing::debug!(
                    program,
                    entry,
                    %dtype,
                    pipeline_bytes = pipeline_data.len(),
                    "built gpu program"
                );
                if let Some(storage) = self.storage.as_mut() {
                    let binary = ProgramBinary {
                        fingerprint: fp,
                        dtype,
                        entry: entry.to_string(),
                        source_hash,
                        pipeline_data,
                    };
                    storage.insert(&key, binary.to_binary()?);
                }
                pipeline
            }
        };

        let kernel = Arc::new(Kernel {
            entry: entry.to_string(),
            dtype,
            pipeline,
        });
        self.kernels.insert(fp, kernel.clone());
        Ok(kernel)
    }

    pub fn flush(&mut self) -> Result<()> {
        match self.storage.as_mut() {
            Some(storage) => storage.flush(),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::FileStorage;
    use crate::runtime::GpuPerfHint;

    fn test_context() -> Option<Arc<GpuContext>> {
        match GpuContext::new(GpuPerfHint::Default) {
            Ok(ctx) => Some(Arc::new(ctx)),
            Err(err) => {
                eprintln!("skipped, {}", err);
                None
            }
        }
    }

    #[test]
    fn test_specialize_declares_texel_type() -> Result<()> {
        let f32_source = specialize("bias_add", DataType::F32)?;
        let f16_source = specialize("bias_add", DataType::F16)?;
        assert!(f32_source.starts_with(TEXEL_F32));
        assert!(f16_source.contains("alias Texel = vec2<u32>;"));
        assert!(f16_source.contains("fn bias_add("));

        let err = specialize("softmax", DataType::F32).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ProgramBuildError);
        let err = specialize("bias_add", DataType::I32).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ProgramBuildError);
        Ok(())
    }

    #[test]
    fn test_fingerprint_covers_source_entry_and_adapter() -> Result<()> {
        let source = specialize("buffer_to_image", DataType::F32)?;
        let fp = fingerprint(&source, "arg_buffer_to_image", "vulkan-1");
        assert_eq!(fp, fingerprint(&source, "arg_buffer_to_image", "vulkan-1"));
        assert_ne!(fp, fingerprint(&source, "arg_image_to_buffer", "vulkan-1"));
        assert_ne!(fp, fingerprint(&source, "arg_buffer_to_image", "vulkan-2"));

        let half = specialize("buffer_to_image", DataType::F16)?;
        assert_ne!(fp, fingerprint(&half, "arg_buffer_to_image", "vulkan-1"));
        Ok(())
    }

    #[test]
    fn test_program_binary_round_trip() -> Result<()> {
        let binary = ProgramBinary {
            fingerprint: 0xdead_beef,
            dtype: DataType::F16,
            entry: "bias_add".to_string(),
            source_hash: 42,
            pipeline_data: vec![1, 2, 3],
        };
        let buf = binary.to_binary()?;
        assert_eq!(ProgramBinary::from_binary(&buf)?, binary);
        assert!(ProgramBinary::from_binary(&buf[..10]).is_err());
        assert!(ProgramBinary::from_binary(&buf[..buf.len() - 1]).is_err());
        Ok(())
    }

    #[test]
    fn test_program_binary_rejects_oversized_lengths() {
        let mut buf = BINARY_MAGIC.to_vec();
        buf.extend_from_slice(&BINARY_VERSION.to_le_bytes());
        buf.extend_from_slice(&7u64.to_le_bytes());
        buf.push(DataType::F32 as u8);
        buf.extend_from_slice(&9u64.to_le_bytes());
        // an entry name claiming 4GB
        buf.extend_from_slice(&[0xff; 4]);
        buf.extend_from_slice(b"bias_add");

        let err = ProgramBinary::from_binary(&buf).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ProgramBuildError);
        let err = ProgramBinary::from_binary(&[0xff; 4]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ProgramBuildError);
    }

    #[test]
    fn test_invalid_source_fails_to_build() {
        let Some(ctx) = test_context() else {
            return;
        };
        let source = format!("{}\nfn bias_add( {{", TEXEL_F32);
        let err = build_pipeline(&ctx, &source, "bias_add", None).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ProgramBuildError);

        // a valid program without the requested entry point
        let source = specialize("bias_add", DataType::F32).unwrap();
        let err = build_pipeline(&ctx, &source, "resize_bilinear", None).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ProgramBuildError);
    }

    #[test]
    fn test_every_program_builds() -> Result<()> {
        let Some(ctx) = test_context() else {
            return Ok(());
        };
        let entries = [
            ("bias_add", "bias_add"),
            ("resize_bilinear", "resize_bilinear"),
            ("buffer_to_image", "in_out_buffer_to_image"),
            ("buffer_to_image", "in_out_image_to_buffer"),
            ("buffer_to_image", "arg_buffer_to_image"),
            ("buffer_to_image", "arg_image_to_buffer"),
        ];
        let mut cache = ProgramCache::new(ctx, None);
        for dtype in [DataType::F32, DataType::F16] {
            for (program, entry) in entries {
                let kernel = cache.kernel(program, entry, dtype)?;
                assert_eq!(kernel.entry(), entry);
                assert_eq!(kernel.dtype(), dtype);
            }
        }
        assert_eq!(cache.stats().built, 12);
        Ok(())
    }

    #[test]
    fn test_program_cache_hits() -> Result<()> {
        let Some(ctx) = test_context() else {
            return Ok(());
        };
        let dir = tempfile::tempdir()?;
        let path = dir.path().join(PROGRAM_STORAGE_NAME);

        let mut cache = ProgramCache::new(ctx.clone(), Some(Box::new(FileStorage::new(&path))));
        cache.kernel("bias_add", "bias_add", DataType::F32)?;
        cache.kernel("bias_add", "bias_add", DataType::F32)?;
        cache.kernel("bias_add", "bias_add", DataType::F16)?;
        assert_eq!(cache.stats(), ProgramCacheStats {
            built: 2,
            storage_hits: 0,
            memory_hits: 1,
        });
        cache.flush()?;

        let mut storage = FileStorage::new(&path);
        storage.load()?;
        assert_eq!(storage.len(), 2);
        let mut cache = ProgramCache::new(ctx, Some(Box::new(storage)));
        cache.kernel("bias_add", "bias_add", DataType::F16)?;
        assert_eq!(cache.stats(), ProgramCacheStats {
            built: 0,
            storage_hits: 1,
            memory_hits: 0,
        });
        Ok(())
    }

    #[test]
    fn test_program_cache_rebuilds_mismatched_binary() -> Result<()> {
        let Some(ctx) = test_context() else {
            return Ok(());
        };
        let source = specialize("bias_add", DataType::F32)?;
        let fp = fingerprint(&source, "bias_add", &ctx.cache_key());
        let stale = ProgramBinary {
            fingerprint: fp,
            dtype: DataType::F32,
            entry: "bias_add".to_string(),
            source_hash: 0,
            pipeline_data: vec![],
        };

        let dir = tempfile::tempdir()?;
        let mut storage = FileStorage::new(dir.path().join(PROGRAM_STORAGE_NAME));
        storage.insert(&format!("{:016x}", fp), stale.to_binary()?);
        let mut cache = ProgramCache::new(ctx, Some(Box::new(storage)));
        cache.kernel("bias_add", "bias_add", DataType::F32)?;
        assert_eq!(cache.stats().built, 1);
        assert_eq!(cache.stats().storage_hits, 0);
        Ok(())
    }
}

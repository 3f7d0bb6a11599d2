use std::sync::Arc;
use std::time::Instant;

use clap::Parser;
use clap::ValueEnum;
use infera::backends::cpu::CpuDevice;
use infera::backends::gpu::GpuDevice;
use infera::error::Result;
use infera::net::OpStats;
use infera::net::SerialNet;
use infera::ops::Devices;
use infera::ops::OpDefBuilder;
use infera::ops::OpRegistry;
use infera::ops::OperatorDef;
use infera::runtime::CpuAffinityPolicy;
use infera::runtime::FileStorageFactory;
use infera::runtime::GpuPerfHint;
use infera::runtime::GpuPriorityHint;
use infera::runtime::RuntimeConfig;
use infera::tensor::BufferType;
use infera::tensor::DataType;
use infera::tensor::DeviceType;
use infera::tensor::Tensor;
use infera::workspace::Workspace;
use rand::Rng;
use rand::SeedableRng;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Affinity {
    None,
    Big,
    Little,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Hint {
    Default,
    Low,
    Normal,
    High,
}

#[derive(Parser, Debug)]
struct CommandArgs {
    /// The number of cpu worker threads, 0 for all the selected cores
    #[arg(short = 'T', long, default_value_t = 0)]
    threads: i32,

    #[arg(long, value_enum, default_value_t = Affinity::None)]
    affinity: Affinity,

    /// Pin the cpu workers to these cores, overrides --affinity
    #[arg(long, value_delimiter = ',')]
    cpus: Vec<usize>,

    #[arg(long, value_enum, default_value_t = Hint::Default)]
    gpu_perf: Hint,

    #[arg(long, value_enum, default_value_t = Hint::Default)]
    gpu_priority: Hint,

    /// The directory to keep the compiled gpu programs in
    #[arg(long)]
    program_cache: Option<String>,

    /// Run the gpu net in half precision
    #[arg(long, default_value_t = false)]
    half: bool,

    #[arg(long, default_value_t = 64)]
    height: usize,

    #[arg(long, default_value_t = 64)]
    width: usize,

    #[arg(short, long, default_value_t = 32)]
    channels: usize,

    #[arg(short, long, default_value_t = 2.0)]
    scale: f32,

    #[arg(long, default_value_t = false)]
    align_corners: bool,

    // The number of timed runs per device
    #[arg(short, long, default_value_t = 3)]
    runs: usize,
}

fn perf_hint(h: Hint) -> GpuPerfHint {
    match h {
        Hint::Default => GpuPerfHint::Default,
        Hint::Low => GpuPerfHint::Low,
        Hint::Normal => GpuPerfHint::Normal,
        Hint::High => GpuPerfHint::High,
    }
}

fn priority_hint(h: Hint) -> GpuPriorityHint {
    match h {
        Hint::Default => GpuPriorityHint::Default,
        Hint::Low => GpuPriorityHint::Low,
        Hint::Normal => GpuPriorityHint::Normal,
        Hint::High => GpuPriorityHint::High,
    }
}

fn runtime_config(args: &CommandArgs) -> Result<RuntimeConfig> {
    let mut conf = RuntimeConfig::new();
    if args.cpus.is_empty() {
        let policy = match args.affinity {
            Affinity::None => CpuAffinityPolicy::None,
            Affinity::Big => CpuAffinityPolicy::HighPerformance,
            Affinity::Little => CpuAffinityPolicy::PowerSave,
        };
        conf.set_cpu_thread_policy(args.threads, policy)?;
    } else {
        conf.set_cpu_thread_affinity(args.threads.max(0) as usize, &args.cpus)?;
    }
    conf.set_gpu_hints(perf_hint(args.gpu_perf), priority_hint(args.gpu_priority));
    if let Some(dir) = &args.program_cache {
        std::fs::create_dir_all(dir)?;
        conf.set_kv_storage_factory(Arc::new(FileStorageFactory::new(dir)));
    }
    Ok(conf)
}

// resize then bias add, wrapped in the layout converters on the gpu
fn build_net(args: &CommandArgs, device: DeviceType) -> Vec<OperatorDef> {
    let dtype = if device == DeviceType::Gpu && args.half {
        DataType::F16
    } else {
        DataType::F32
    };
    let (input, bias, resized, output) = match device {
        DeviceType::Cpu => ("input", "bias", "resized", "output"),
        DeviceType::Gpu => ("input_image", "bias_image", "resized_image", "output_image"),
    };

    let mut defs = vec![];
    if device == DeviceType::Gpu {
        defs.push(
            OpDefBuilder::new("BufferToImage", "input_to_image")
                .input("input")
                .output(input)
                .add_int_arg("buffer_type", BufferType::InOutChannel as i64)
                .data_type(dtype)
                .build(),
        );
        defs.push(
            OpDefBuilder::new("BufferToImage", "bias_to_image")
                .input("bias")
                .output(bias)
                .add_int_arg("buffer_type", BufferType::Argument as i64)
                .data_type(dtype)
                .build(),
        );
    }
    defs.push(
        OpDefBuilder::new("ResizeBilinear", "resize")
            .input(input)
            .output(resized)
            .add_floats_arg("scale", &[args.scale, args.scale])
            .add_bool_arg("align_corners", args.align_corners)
            .data_type(dtype)
            .build(),
    );
    defs.push(
        OpDefBuilder::new("BiasAdd", "bias_add")
            .input(resized)
            .input(bias)
            .output(output)
            .data_type(dtype)
            .build(),
    );
    if device == DeviceType::Gpu {
        defs.push(
            OpDefBuilder::new("ImageToBuffer", "output_to_buffer")
                .input(output)
                .output("output")
                .add_int_arg("buffer_type", BufferType::InOutChannel as i64)
                .data_type(DataType::F32)
                .build(),
        );
    }
    defs
}

fn random_tensor(rng: &mut impl Rng, shape: &[usize]) -> Result<Tensor> {
    let data = (0..shape.iter().product::<usize>())
        .map(|_| rng.gen_range(-1.0..1.0))
        .collect::<Vec<f32>>();
    Tensor::from_slice_f32(&data, shape, DeviceType::Cpu)
}

fn print_stats(device: DeviceType, stats: &[OpStats]) {
    for s in stats {
        println!("  {} {:<18} {:<14} {}us", device, s.name, s.op_type, s.micros);
    }
}

fn run_device(
    args: &CommandArgs,
    devices: &Devices,
    device: DeviceType,
    input: &Tensor,
    bias: &Tensor,
) -> Result<Vec<f32>> {
    let registry = OpRegistry::new();
    let mut net = SerialNet::new(&registry, &build_net(args, device), device, devices)?;
    let mut ws = Workspace::new();
    ws.put_tensor("input", input.clone());
    ws.put_tensor("bias", bias.clone());

    // the first run builds the gpu programs
    net.run(&mut ws)?;
    net.sync()?;

    for i in 0..args.runs {
        let start = Instant::now();
        let stats = net.run_with_stats(&mut ws)?;
        net.sync()?;
        println!(
            "{} run {}: {}us",
            device,
            i,
            start.elapsed().as_micros()
        );
        print_stats(device, &stats);
    }
    ws.get_tensor("output")?.to_vec_f32()
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = CommandArgs::parse();
    let conf = runtime_config(&args)?;

    let cpu = Arc::new(CpuDevice::new(&conf)?);
    let gpu = match GpuDevice::new(&conf) {
        Ok(gpu) => Some(Arc::new(gpu)),
        Err(err) => {
            tracing::warn!("no gpu device, running on the cpu only: {}", err);
            None
        }
    };
    tracing::info!(
        cpu_threads = cpu.num_threads(),
        gpu_adapter = gpu.as_ref().map(|g| g.adapter_name()).unwrap_or("none"),
        "devices ready"
    );
    let devices = Devices::new(cpu, gpu.clone());

    let mut rng = rand::rngs::StdRng::seed_from_u64(0);
    let input = random_tensor(&mut rng, &[1, args.height, args.width, args.channels])?;
    let bias = random_tensor(&mut rng, &[args.channels])?;

    let cpu_out = run_device(&args, &devices, DeviceType::Cpu, &input, &bias)?;
    let Some(gpu) = gpu else {
        return Ok(());
    };
    let gpu_out = run_device(&args, &devices, DeviceType::Gpu, &input, &bias)?;

    let max_diff = cpu_out
        .iter()
        .zip(gpu_out.iter())
        .map(|(a, b)| (a - b).abs())
        .fold(0.0f32, f32::max);
    println!("max difference between cpu and gpu: {}", max_diff);

    let stats = gpu.program_cache_stats();
    println!(
        "gpu programs: {} built, {} from storage, {} from memory",
        stats.built, stats.storage_hits, stats.memory_hits
    );
    if args.program_cache.is_some() {
        gpu.flush_program_storage()?;
    }
    Ok(())
}

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use approx::assert_abs_diff_eq;
use infera::backends::cpu::CpuDevice;
use infera::backends::gpu::GpuDevice;
use infera::backends::gpu::GpuDeviceOptions;
use infera::backends::gpu::PROGRAM_STORAGE_NAME;
use infera::error::ErrorKind;
use infera::error::Result;
use infera::future::OpFuture;
use infera::net::SerialNet;
use infera::ops::BufferToImageOp;
use infera::ops::Devices;
use infera::ops::OpDefBuilder;
use infera::ops::OpRegistry;
use infera::ops::Operator;
use infera::ops::OperatorDef;
use infera::runtime::FileStorageFactory;
use infera::runtime::RuntimeConfig;
use infera::tensor::DataType;
use infera::tensor::DeviceType;
use infera::tensor::Tensor;
use infera::workspace::Workspace;
use rand::Rng;
use rand::SeedableRng;

const IN_OUT_CHANNEL: i64 = 0;
const ARGUMENT: i64 = 1;

fn cpu_devices(conf: &RuntimeConfig) -> Result<Devices> {
    Ok(Devices::new(Arc::new(CpuDevice::new(conf)?), None))
}

/// Both devices, or None on a machine without a gpu adapter.
fn devices_with(conf: &RuntimeConfig, opts: GpuDeviceOptions) -> Result<Option<Devices>> {
    let cpu = Arc::new(CpuDevice::new(conf)?);
    match GpuDevice::with_options(conf, opts) {
        Ok(gpu) => Ok(Some(Devices::new(cpu, Some(Arc::new(gpu))))),
        Err(err) if err.kind == ErrorKind::ResourceError => {
            eprintln!("skipped, {}", err);
            Ok(None)
        }
        Err(err) => Err(err),
    }
}

fn devices(conf: &RuntimeConfig) -> Result<Option<Devices>> {
    devices_with(conf, GpuDeviceOptions::new())
}

/// The message `f` panics with.
fn panic_message(f: impl FnOnce()) -> String {
    let payload = match std::panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(()) => panic!("expected a panic"),
        Err(payload) => payload,
    };
    match payload.downcast::<String>() {
        Ok(msg) => *msg,
        Err(payload) => payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .unwrap_or_default(),
    }
}

fn random_tensor(shape: &[usize], seed: u64) -> Result<Tensor> {
    let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
    let data = (0..shape.iter().product::<usize>())
        .map(|_| rng.gen_range(-1.0..1.0))
        .collect::<Vec<f32>>();
    Tensor::from_slice_f32(&data, shape, DeviceType::Cpu)
}

fn to_image(buffer: &str, image: &str, buffer_type: i64, dtype: DataType) -> OperatorDef {
    OpDefBuilder::new("BufferToImage", &format!("{}_to_image", buffer))
        .input(buffer)
        .output(image)
        .add_int_arg("buffer_type", buffer_type)
        .data_type(dtype)
        .build()
}

fn to_buffer(image: &str, buffer: &str, buffer_type: i64) -> OperatorDef {
    OpDefBuilder::new("ImageToBuffer", &format!("{}_to_buffer", image))
        .input(image)
        .output(buffer)
        .add_int_arg("buffer_type", buffer_type)
        .data_type(DataType::F32)
        .build()
}

fn bias_add_defs(device: DeviceType, dtype: DataType) -> Vec<OperatorDef> {
    match device {
        DeviceType::Cpu => vec![OpDefBuilder::new("BiasAdd", "bias_add")
            .input("input")
            .input("bias")
            .output("output")
            .build()],
        DeviceType::Gpu => vec![
            to_image("input", "input_image", IN_OUT_CHANNEL, dtype),
            to_image("bias", "bias_image", ARGUMENT, dtype),
            OpDefBuilder::new("BiasAdd", "bias_add")
                .input("input_image")
                .input("bias_image")
                .output("output_image")
                .data_type(dtype)
                .build(),
            to_buffer("output_image", "output", IN_OUT_CHANNEL),
        ],
    }
}

fn resize_defs(
    device: DeviceType,
    dtype: DataType,
    size: [i64; 2],
    align_corners: bool,
) -> Vec<OperatorDef> {
    let (input, output) = match device {
        DeviceType::Cpu => ("input", "output"),
        DeviceType::Gpu => ("input_image", "output_image"),
    };
    let resize = OpDefBuilder::new("ResizeBilinear", "resize")
        .input(input)
        .output(output)
        .add_ints_arg("size", &size)
        .add_bool_arg("align_corners", align_corners)
        .data_type(dtype)
        .build();
    match device {
        DeviceType::Cpu => vec![resize],
        DeviceType::Gpu => vec![
            to_image("input", "input_image", IN_OUT_CHANNEL, dtype),
            resize,
            to_buffer("output_image", "output", IN_OUT_CHANNEL),
        ],
    }
}

fn run_net(
    devices: &Devices,
    defs: &[OperatorDef],
    device: DeviceType,
    inputs: &[(&str, &Tensor)],
) -> Result<Tensor> {
    let mut ws = Workspace::new();
    for (name, tensor) in inputs {
        ws.put_tensor(name, (*tensor).clone());
    }
    let mut net = SerialNet::new(&OpRegistry::new(), defs, device, devices)?;
    net.run(&mut ws)?;
    net.sync()?;
    Ok(ws.get_tensor("output")?.clone())
}

#[test]
fn test_bias_add_on_cpu_and_gpu() -> Result<()> {
    let Some(devices) = devices(&RuntimeConfig::new())? else {
        return Ok(());
    };
    let data = [5.0, 5.0, 7.0, 7.0, 9.0, 9.0, 11.0, 11.0, 13.0, 13.0, 15.0, 15.0];
    let input = Tensor::from_slice_f32(&data, &[1, 6, 2, 1], DeviceType::Cpu)?;
    let bias = Tensor::from_slice_f32(&[0.5], &[1], DeviceType::Cpu)?;
    let expected = data.iter().map(|v| v + 0.5).collect::<Vec<_>>();

    for device in [DeviceType::Cpu, DeviceType::Gpu] {
        let defs = bias_add_defs(device, DataType::F32);
        let output = run_net(&devices, &defs, device, &[("input", &input), ("bias", &bias)])?;
        assert_eq!(output.shape(), &[1, 6, 2, 1]);
        assert_eq!(output.device(), device);
        assert_eq!(output.to_vec_f32()?, expected);
    }
    Ok(())
}

#[test]
fn test_resize_identity_on_cpu_and_gpu() -> Result<()> {
    let Some(devices) = devices(&RuntimeConfig::new())? else {
        return Ok(());
    };
    let data = [5.0, 5.0, 7.0, 7.0, 9.0, 9.0, 11.0, 11.0, 13.0, 13.0, 15.0, 15.0];
    let input = Tensor::from_slice_f32(&data, &[1, 6, 2, 1], DeviceType::Cpu)?;

    for device in [DeviceType::Cpu, DeviceType::Gpu] {
        let defs = resize_defs(device, DataType::F32, [6, 2], false);
        let output = run_net(&devices, &defs, device, &[("input", &input)])?;
        assert_eq!(output.shape(), &[1, 6, 2, 1]);
        assert_eq!(output.to_vec_f32()?, data.to_vec());
    }
    Ok(())
}

#[test]
fn test_cpu_gpu_equivalence() -> Result<()> {
    let Some(devices) = devices(&RuntimeConfig::new())? else {
        return Ok(());
    };
    let input = random_tensor(&[2, 7, 5, 6], 1)?;
    let bias = random_tensor(&[6], 2)?;

    let cpu = run_net(
        &devices,
        &bias_add_defs(DeviceType::Cpu, DataType::F32),
        DeviceType::Cpu,
        &[("input", &input), ("bias", &bias)],
    )?;
    let gpu = run_net(
        &devices,
        &bias_add_defs(DeviceType::Gpu, DataType::F32),
        DeviceType::Gpu,
        &[("input", &input), ("bias", &bias)],
    )?;
    assert_abs_diff_eq!(&cpu.to_vec_f32()?[..], &gpu.to_vec_f32()?[..], epsilon = 1e-5);

    for (size, align_corners) in [([11, 3], false), ([11, 3], true), ([3, 9], false), ([1, 1], true)] {
        let cpu = run_net(
            &devices,
            &resize_defs(DeviceType::Cpu, DataType::F32, size, align_corners),
            DeviceType::Cpu,
            &[("input", &input)],
        )?;
        let gpu = run_net(
            &devices,
            &resize_defs(DeviceType::Gpu, DataType::F32, size, align_corners),
            DeviceType::Gpu,
            &[("input", &input)],
        )?;
        assert_eq!(cpu.shape(), &[2, size[0] as usize, size[1] as usize, 6]);
        assert_eq!(cpu.shape(), gpu.shape());
        assert_abs_diff_eq!(&cpu.to_vec_f32()?[..], &gpu.to_vec_f32()?[..], epsilon = 1e-5);
    }
    Ok(())
}

#[test]
fn test_gpu_f16_is_close_to_cpu() -> Result<()> {
    let Some(devices) = devices(&RuntimeConfig::new())? else {
        return Ok(());
    };
    let input = random_tensor(&[1, 8, 8, 5], 3)?;
    let bias = random_tensor(&[5], 4)?;

    let cpu = run_net(
        &devices,
        &bias_add_defs(DeviceType::Cpu, DataType::F32),
        DeviceType::Cpu,
        &[("input", &input), ("bias", &bias)],
    )?;
    let gpu = run_net(
        &devices,
        &bias_add_defs(DeviceType::Gpu, DataType::F16),
        DeviceType::Gpu,
        &[("input", &input), ("bias", &bias)],
    )?;
    assert_abs_diff_eq!(&cpu.to_vec_f32()?[..], &gpu.to_vec_f32()?[..], epsilon = 1e-2);

    let cpu = run_net(
        &devices,
        &resize_defs(DeviceType::Cpu, DataType::F32, [13, 4], false),
        DeviceType::Cpu,
        &[("input", &input)],
    )?;
    let gpu = run_net(
        &devices,
        &resize_defs(DeviceType::Gpu, DataType::F16, [13, 4], false),
        DeviceType::Gpu,
        &[("input", &input)],
    )?;
    assert_abs_diff_eq!(&cpu.to_vec_f32()?[..], &gpu.to_vec_f32()?[..], epsilon = 1e-2);
    Ok(())
}

#[test]
fn test_resize_scale_argument() -> Result<()> {
    let devices = cpu_devices(&RuntimeConfig::new())?;
    let input = random_tensor(&[1, 5, 4, 2], 5)?;
    let def = OpDefBuilder::new("ResizeBilinear", "resize")
        .input("input")
        .output("output")
        .add_floats_arg("scale", &[2.0, 0.1])
        .build();
    let output = run_net(&devices, &[def], DeviceType::Cpu, &[("input", &input)])?;
    // round(5 * 2) = 10, round(4 * 0.1) = 0 is lifted to 1
    assert_eq!(output.shape(), &[1, 10, 1, 2]);
    Ok(())
}

#[test]
#[should_panic(expected = "structural precondition failed: input must be 4-dimensional")]
fn test_bias_add_rejects_rank_3_input() {
    let devices = cpu_devices(&RuntimeConfig::new()).unwrap();
    let input = Tensor::from_slice_f32(&[1.0; 12], &[6, 2, 1], DeviceType::Cpu).unwrap();
    let bias = Tensor::from_slice_f32(&[0.5], &[1], DeviceType::Cpu).unwrap();
    let defs = bias_add_defs(DeviceType::Cpu, DataType::F32);
    run_net(&devices, &defs, DeviceType::Cpu, &[("input", &input), ("bias", &bias)]).unwrap();
}

#[test]
fn test_resize_rejects_rank_3_input_on_gpu() -> Result<()> {
    let Some(devices) = devices(&RuntimeConfig::new())? else {
        return Ok(());
    };
    let input = Tensor::from_slice_f32(&[1.0; 12], &[6, 2, 1], DeviceType::Cpu)?;
    let defs = resize_defs(DeviceType::Gpu, DataType::F32, [-1, -1], false);
    let msg = panic_message(|| {
        let _ = run_net(&devices, &defs, DeviceType::Gpu, &[("input", &input)]);
    });
    assert_eq!(msg, "structural precondition failed: input must be 4-dimensional, but got shape [6, 2, 1]");
    Ok(())
}

#[test]
#[should_panic(expected = "structural precondition failed: input of op bias_add must be f32, but got f16")]
fn test_cpu_bias_add_rejects_half_input() {
    let devices = cpu_devices(&RuntimeConfig::new()).unwrap();
    let input = Tensor::from_slice_f16(&[1.0; 4], &[1, 2, 2, 1], DeviceType::Cpu).unwrap();
    let bias = Tensor::from_slice_f32(&[0.5], &[1], DeviceType::Cpu).unwrap();
    let defs = bias_add_defs(DeviceType::Cpu, DataType::F32);
    run_net(&devices, &defs, DeviceType::Cpu, &[("input", &input), ("bias", &bias)]).unwrap();
}

#[test]
#[should_panic(expected = "structural precondition failed: bias of op bias_add must be f32, but got f16")]
fn test_cpu_bias_add_rejects_half_bias() {
    let devices = cpu_devices(&RuntimeConfig::new()).unwrap();
    let input = Tensor::from_slice_f32(&[1.0; 4], &[1, 2, 2, 1], DeviceType::Cpu).unwrap();
    let bias = Tensor::from_slice_f16(&[0.5], &[1], DeviceType::Cpu).unwrap();
    let defs = bias_add_defs(DeviceType::Cpu, DataType::F32);
    run_net(&devices, &defs, DeviceType::Cpu, &[("input", &input), ("bias", &bias)]).unwrap();
}

#[test]
#[should_panic(expected = "structural precondition failed: input of op resize must be a buffer on cpu")]
fn test_cpu_resize_rejects_image_input() {
    let devices = cpu_devices(&RuntimeConfig::new()).unwrap();
    let input = Tensor::from_slice_f32(&[1.0; 8], &[1, 2, 2, 2], DeviceType::Cpu).unwrap();
    let mut ws = Workspace::new();
    ws.put_tensor("input", input);
    // the cpu device packs images on the host
    let def = to_image("input", "input_image", IN_OUT_CHANNEL, DataType::F32);
    let mut op = BufferToImageOp::new(&def, devices.cpu.clone()).unwrap();
    op.run(&mut ws, None).unwrap();
    assert!(ws.get_tensor("input_image").unwrap().is_image());

    let resize = OpDefBuilder::new("ResizeBilinear", "resize")
        .input("input_image")
        .output("output")
        .build();
    let mut net = SerialNet::new(&OpRegistry::new(), &[resize], DeviceType::Cpu, &devices).unwrap();
    net.run(&mut ws).unwrap();
}

#[test]
#[should_panic(expected = "structural precondition failed: input of op input_to_image must be a float buffer, but got i32")]
fn test_buffer_to_image_rejects_int_input() {
    let devices = cpu_devices(&RuntimeConfig::new()).unwrap();
    let mut ws = Workspace::new();
    ws.put_tensor("input", Tensor::zeros(DataType::I32, &[1, 2, 2, 4], DeviceType::Cpu));
    let def = to_image("input", "input_image", IN_OUT_CHANNEL, DataType::F32);
    let mut op = BufferToImageOp::new(&def, devices.cpu.clone()).unwrap();
    let _ = op.run(&mut ws, None);
}

#[test]
#[should_panic(expected = "structural precondition failed: input of op resize must be f32, but got i32")]
fn test_resize_rejects_int_input() {
    let devices = cpu_devices(&RuntimeConfig::new()).unwrap();
    let input = Tensor::zeros(DataType::I32, &[1, 2, 2, 4], DeviceType::Cpu);
    let defs = resize_defs(DeviceType::Cpu, DataType::F32, [4, 4], false);
    let _ = run_net(&devices, &defs, DeviceType::Cpu, &[("input", &input)]);
}

#[test]
fn test_gpu_ops_reject_images_over_the_max_size() -> Result<()> {
    let conf = RuntimeConfig::new();
    let Some(devices) = devices_with(&conf, GpuDeviceOptions::new().with_max_image_size(8))? else {
        return Ok(());
    };

    // 4 channels make one texel per pixel: a 9 pixel wide input is 9 texels wide
    let wide = Tensor::from_slice_f32(&[1.0; 72], &[1, 2, 9, 4], DeviceType::Cpu)?;
    let defs = [to_image("input", "input_image", IN_OUT_CHANNEL, DataType::F32)];
    let msg = panic_message(|| {
        let _ = run_net(&devices, &defs, DeviceType::Gpu, &[("input", &wide)]);
    });
    assert_eq!(msg, "structural precondition failed: image of 9x2 exceeds the max image size 8");

    // the input fits, the resized output does not
    let small = Tensor::from_slice_f32(&[1.0; 16], &[1, 2, 2, 4], DeviceType::Cpu)?;
    let defs = resize_defs(DeviceType::Gpu, DataType::F32, [2, 9], false);
    let msg = panic_message(|| {
        let _ = run_net(&devices, &defs, DeviceType::Gpu, &[("input", &small)]);
    });
    assert_eq!(msg, "structural precondition failed: image of 9x2 exceeds the max image size 8");

    // a buffer fed to a gpu op
    let resize = OpDefBuilder::new("ResizeBilinear", "resize")
        .input("input")
        .output("output")
        .data_type(DataType::F32)
        .build();
    let msg = panic_message(|| {
        let _ = run_net(&devices, &[resize], DeviceType::Gpu, &[("input", &small)]);
    });
    assert_eq!(msg, "structural precondition failed: input of op resize must be an image on gpu");
    Ok(())
}

#[test]
fn test_create_operator_errors() -> Result<()> {
    let conf = RuntimeConfig::new();
    let cpu_only = Devices::new(Arc::new(CpuDevice::new(&conf)?), None);
    let registry = OpRegistry::new();

    let def = OpDefBuilder::new("BiasAdd", "b")
        .input("input")
        .input("bias")
        .output("output")
        .data_type(DataType::F16)
        .build();
    let err = registry
        .create_operator(&def, DeviceType::Cpu, &cpu_only)
        .err()
        .unwrap();
    assert_eq!(err.kind, ErrorKind::Unsupported);

    let err = registry
        .create_operator(&def, DeviceType::Gpu, &cpu_only)
        .err()
        .unwrap();
    assert_eq!(err.kind, ErrorKind::Unsupported);

    let def = OpDefBuilder::new("Softmax", "s").build();
    let err = registry
        .create_operator(&def, DeviceType::Cpu, &cpu_only)
        .err()
        .unwrap();
    assert_eq!(err.kind, ErrorKind::Unsupported);
    Ok(())
}

#[test]
fn test_missing_input_is_not_found() -> Result<()> {
    let devices = cpu_devices(&RuntimeConfig::new())?;
    let defs = bias_add_defs(DeviceType::Cpu, DataType::F32);
    let mut net = SerialNet::new(&OpRegistry::new(), &defs, DeviceType::Cpu, &devices)?;
    let mut ws = Workspace::new();
    let err = net.run(&mut ws).unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotFound);
    assert!(!ws.has_tensor("output"));
    Ok(())
}

#[test]
fn test_op_future_waits_for_gpu_work() -> Result<()> {
    let Some(devices) = devices(&RuntimeConfig::new())? else {
        return Ok(());
    };
    let registry = OpRegistry::new();
    let input = random_tensor(&[1, 16, 16, 8], 6)?;
    let mut ws = Workspace::new();
    ws.put_tensor("input", input.clone());

    let defs = [
        to_image("input", "input_image", IN_OUT_CHANNEL, DataType::F32),
        to_buffer("input_image", "output", IN_OUT_CHANNEL),
    ];
    let mut futures = vec![];
    for def in defs.iter() {
        let mut op = registry.create_operator(def, DeviceType::Gpu, &devices)?;
        let mut future = OpFuture::new();
        op.run(&mut ws, Some(&mut future))?;
        assert!(future.is_set());
        futures.push(future);
    }

    // waiting for the last op is enough, the queue runs in order
    let stats = futures[1].wait()?;
    assert!(stats.is_some());
    assert!(futures[0].is_complete());
    assert_eq!(ws.get_tensor("output")?.to_vec_f32()?, input.to_vec_f32()?);

    // a cpu op hands back an already completed future
    let def = OpDefBuilder::new("ResizeBilinear", "resize")
        .input("input")
        .output("resized")
        .build();
    let mut op = registry.create_operator(&def, DeviceType::Cpu, &devices)?;
    let mut future = OpFuture::new();
    op.run(&mut ws, Some(&mut future))?;
    assert!(future.is_complete());
    Ok(())
}

#[test]
fn test_program_storage_hits_on_second_device() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut conf = RuntimeConfig::new();
    conf.set_kv_storage_factory(Arc::new(FileStorageFactory::new(dir.path())));

    let input = random_tensor(&[1, 4, 4, 3], 7)?;
    let bias = random_tensor(&[3], 8)?;
    let inputs = [("input", &input), ("bias", &bias)];
    let defs = bias_add_defs(DeviceType::Gpu, DataType::F32);

    let (first_output, first_stats) = {
        let Some(devices) = devices(&conf)? else {
            return Ok(());
        };
        let output = run_net(&devices, &defs, DeviceType::Gpu, &inputs)?;
        let stats = devices.gpu()?.program_cache_stats();
        (output.to_vec_f32()?, stats)
    };
    assert_eq!(first_stats.built, 4);
    assert_eq!(first_stats.storage_hits, 0);
    // dropping the device flushed the storage
    assert!(dir.path().join(PROGRAM_STORAGE_NAME).exists());

    let devices = devices(&conf)?.unwrap();
    let output = run_net(&devices, &defs, DeviceType::Gpu, &inputs)?;
    let stats = devices.gpu()?.program_cache_stats();
    assert_eq!(stats.built, 0);
    assert_eq!(stats.storage_hits, first_stats.built);
    assert_eq!(output.to_vec_f32()?, first_output);
    Ok(())
}

#[test]
fn test_programs_built_every_time_without_storage() -> Result<()> {
    let conf = RuntimeConfig::new();
    let input = random_tensor(&[1, 4, 4, 3], 9)?;
    let bias = random_tensor(&[3], 10)?;
    let inputs = [("input", &input), ("bias", &bias)];
    let defs = bias_add_defs(DeviceType::Gpu, DataType::F32);

    let mut outputs = vec![];
    for _ in 0..2 {
        let Some(devices) = devices(&conf)? else {
            return Ok(());
        };
        let output = run_net(&devices, &defs, DeviceType::Gpu, &inputs)?;
        let stats = devices.gpu()?.program_cache_stats();
        assert_eq!(stats.built, 4);
        assert_eq!(stats.storage_hits, 0);
        outputs.push(output.to_vec_f32()?);
    }
    assert_eq!(outputs[0], outputs[1]);
    Ok(())
}

use std::sync::Arc;
use std::sync::OnceLock;

use infera::backends::cpu::CpuDevice;
use infera::backends::gpu::GpuDevice;
use infera::backends::LayoutKernel;
use infera::runtime::RuntimeConfig;
use infera::tensor::image::nhwc_shape;
use infera::tensor::BufferType;
use infera::tensor::DataType;
use infera::tensor::DeviceType;
use infera::tensor::Tensor;
use proptest::prelude::*;

struct TestDevices {
    cpu: Arc<CpuDevice>,
    gpu: Arc<GpuDevice>,
}

/// The shared devices, or None on a machine without a gpu adapter.
fn test_devices() -> Option<&'static TestDevices> {
    static DEVICES: OnceLock<Option<TestDevices>> = OnceLock::new();
    DEVICES
        .get_or_init(|| {
            let conf = RuntimeConfig::new();
            let gpu = match GpuDevice::new(&conf) {
                Ok(gpu) => gpu,
                Err(err) => {
                    eprintln!("skipped, {}", err);
                    return None;
                }
            };
            Some(TestDevices {
                cpu: Arc::new(CpuDevice::new(&conf).unwrap()),
                gpu: Arc::new(gpu),
            })
        })
        .as_ref()
}

fn to_image<K: LayoutKernel>(kernel: &K, input: &Tensor, bt: BufferType, dtype: DataType) -> Tensor {
    let mut image = Tensor::empty(dtype, DeviceType::Gpu);
    kernel
        .buffer_to_image(input, bt, dtype, &mut image)
        .unwrap()
        .wait()
        .unwrap();
    image
}

fn to_buffer<K: LayoutKernel>(kernel: &K, image: &Tensor) -> Tensor {
    let mut buffer = Tensor::empty(DataType::F32, DeviceType::Gpu);
    kernel
        .image_to_buffer(image, DataType::F32, &mut buffer)
        .unwrap()
        .wait()
        .unwrap();
    buffer
}

fn shape_and_data(max_rank: usize) -> impl Strategy<Value = (Vec<usize>, Vec<f32>)> {
    prop::collection::vec(1usize..6, 1..=max_rank).prop_flat_map(|shape| {
        let n = shape.iter().product::<usize>();
        (Just(shape), prop::collection::vec(-100.0f32..100.0, n))
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn test_in_out_channel_round_trip((shape, data) in shape_and_data(4)) {
        let Some(d) = test_devices() else {
            return Ok(());
        };
        let input = Tensor::from_slice_f32(&data, &shape, DeviceType::Cpu).unwrap();

        let image = to_image(d.gpu.as_ref(), &input, BufferType::InOutChannel, DataType::F32);
        prop_assert!(image.is_image());
        prop_assert_eq!(image.shape(), &shape[..]);

        let output = to_buffer(d.gpu.as_ref(), &image);
        prop_assert_eq!(output.shape(), &shape[..]);
        prop_assert_eq!(output.to_vec_f32().unwrap(), data);
    }

    #[test]
    fn test_argument_round_trip((shape, data) in shape_and_data(1)) {
        let Some(d) = test_devices() else {
            return Ok(());
        };
        let input = Tensor::from_slice_f32(&data, &shape, DeviceType::Cpu).unwrap();

        let image = to_image(d.gpu.as_ref(), &input, BufferType::Argument, DataType::F32);
        prop_assert_eq!(image.image_shape(), Some([shape[0].div_ceil(4), 1]));

        let output = to_buffer(d.gpu.as_ref(), &image);
        prop_assert_eq!(output.to_vec_f32().unwrap(), data);
    }

    #[test]
    fn test_image_round_trip_keeps_texels((shape, data) in shape_and_data(4)) {
        let Some(d) = test_devices() else {
            return Ok(());
        };
        let input = Tensor::from_slice_f32(&data, &shape, DeviceType::Cpu).unwrap();
        let image = to_image(d.gpu.as_ref(), &input, BufferType::InOutChannel, DataType::F32);
        let buffer = to_buffer(d.gpu.as_ref(), &image);
        let again = to_image(d.gpu.as_ref(), &buffer, BufferType::InOutChannel, DataType::F32);

        let before = image.read_image().unwrap();
        let after = again.read_image().unwrap();
        prop_assert_eq!(&before, &after);

        // lanes past the channel count stay zero
        let [_, _, w, c] = nhwc_shape(&shape);
        if c % 4 != 0 {
            let last_block = c.div_ceil(4) - 1;
            for y in 0..after.height() {
                for x in 0..after.width() {
                    if x / w == last_block {
                        let texel = after.read(x, y);
                        for lane in c % 4..4 {
                            prop_assert_eq!(texel[lane], 0.0);
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn test_cpu_layout_matches_gpu((shape, data) in shape_and_data(4)) {
        let Some(d) = test_devices() else {
            return Ok(());
        };
        let input = Tensor::from_slice_f32(&data, &shape, DeviceType::Cpu).unwrap();
        let cpu = to_image(d.cpu.as_ref(), &input, BufferType::InOutChannel, DataType::F32);
        let gpu = to_image(d.gpu.as_ref(), &input, BufferType::InOutChannel, DataType::F32);
        prop_assert_eq!(cpu.read_image().unwrap(), gpu.read_image().unwrap());

        let cpu = to_buffer(d.cpu.as_ref(), &gpu);
        prop_assert_eq!(cpu.to_vec_f32().unwrap(), data);
    }
}

#[test]
fn test_half_image_round_trip() {
    let Some(d) = test_devices() else {
        return;
    };
    // exactly representable in f16
    let data = (0..30).map(|i| i as f32 * 0.25 - 3.0).collect::<Vec<_>>();
    let input = Tensor::from_slice_f32(&data, &[1, 2, 3, 5], DeviceType::Cpu).unwrap();

    let image = to_image(d.gpu.as_ref(), &input, BufferType::InOutChannel, DataType::F16);
    assert_eq!(image.dtype(), DataType::F16);
    assert_eq!(image.image_shape(), Some([6, 2]));

    let output = to_buffer(d.gpu.as_ref(), &image);
    assert_eq!(output.dtype(), DataType::F32);
    assert_eq!(output.to_vec_f32().unwrap(), data);
}

#[test]
fn test_half_buffer_input() {
    let Some(d) = test_devices() else {
        return;
    };
    let data = [1.5, -2.0, 0.125, 4.0, 8.0];
    let input = Tensor::from_slice_f16(&data, &[5], DeviceType::Cpu).unwrap();
    assert_eq!(input.dtype(), DataType::F16);

    let image = to_image(d.gpu.as_ref(), &input, BufferType::Argument, DataType::F32);
    let output = to_buffer(d.gpu.as_ref(), &image);
    assert_eq!(output.to_vec_f32().unwrap(), data.to_vec());
}

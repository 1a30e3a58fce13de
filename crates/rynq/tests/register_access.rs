//! Register access through both platforms

mod common;

use common::{mmio_platform, SpyBus, ACCEL_BASE};
use rynq::platform::{SimulatedMapper, SimulatedMemory, SimulatedRuntime};
use rynq::{
    Accelerator, AcceleratorParameters, DeviceStatus, Error, ExecutionGraph, ExecutionStream, Hardware,
    HardwareParameters, StartMode, StreamParameters, VendorPlatform,
};
use std::sync::Arc;
use std::time::Duration;

fn spy_platform(bus: Arc<SpyBus>) -> rynq::MmioPlatform {
    let mapper = Arc::new(SimulatedMapper::new());
    mapper.insert(ACCEL_BASE, bus);
    mmio_platform(mapper, Arc::new(SimulatedMemory::new()))
}

fn vendor_platform() -> VendorPlatform<SimulatedRuntime> {
    let runtime = Arc::new(SimulatedRuntime::new("u250").with_kernel("vadd").with_kernel("vmul"));
    let params = HardwareParameters::Vendor {
        xclbin: "kernels.xclbin".to_string(),
        device_index: 0,
    };
    VendorPlatform::new(&params, runtime).unwrap()
}

#[test]
fn test_write_then_read_on_embedded_platform() {
    common::init_tracing();
    let bus = Arc::new(SpyBus::new(0x1_0000));
    let platform = spy_platform(bus.clone());
    let accel = platform.accelerator(&AcceleratorParameters::mmio(ACCEL_BASE)).unwrap();

    accel.write_value(0x10, 0xABu32).unwrap();
    assert_eq!(accel.read_value::<u32>(0x10).unwrap(), 0xAB);
    assert_eq!(bus.peek(0x10, 4), vec![0xAB, 0, 0, 0]);
}

#[test]
fn test_write_then_read_on_vendor_platform() {
    common::init_tracing();
    let platform = vendor_platform();
    let vadd = platform.accelerator(&AcceleratorParameters::vendor("vadd")).unwrap();
    let vmul = platform.accelerator(&AcceleratorParameters::vendor("vmul")).unwrap();

    vadd.write_value(0x10, 0xABu32).unwrap();
    assert_eq!(vadd.read_value::<u32>(0x10).unwrap(), 0xAB);
    // Kernels have separate register spaces
    assert_eq!(vmul.read_value::<u32>(0x10).unwrap(), 0);
}

#[test]
fn test_unknown_kernel_is_member_absent() {
    let platform = vendor_platform();
    let err = platform.accelerator(&AcceleratorParameters::vendor("fft")).unwrap_err();
    assert!(matches!(err, Error::MemberAbsent(_)));
}

#[test]
fn test_misaligned_access_never_reaches_the_bus() {
    let bus = Arc::new(SpyBus::new(0x100));
    let accel = Accelerator::from_bus(bus.clone());

    let err = accel.write_register(0x11, &[1, 2, 3, 4]).unwrap_err();
    assert_eq!(err, Error::RegisterNotAligned { address: 0x11, width: 4 });
    let mut buf = [0u8; 4];
    assert!(matches!(
        accel.read_register(0x02, &mut buf),
        Err(Error::RegisterNotAligned { .. })
    ));

    let graph = ExecutionGraph::new();
    assert!(accel.enqueue_write(&graph, 0x03, &[0], &[]).is_err());
    assert!(graph.is_empty());
    assert_eq!(bus.calls(), 0);
}

#[test]
fn test_out_of_window_access_never_reaches_the_bus() {
    let bus = Arc::new(SpyBus::new(0x100));
    let accel = Accelerator::from_bus(bus.clone());

    let err = accel.write_register(0xFC, &[0; 8]).unwrap_err();
    assert_eq!(
        err,
        Error::RegisterOutOfBounds {
            address: 0xFC,
            size: 8,
            space: 0x100
        }
    );
    assert!(accel.write_register(u64::MAX - 3, &[0; 4]).is_err());
    assert_eq!(bus.calls(), 0);

    // The last register of the window is still reachable
    accel.write_register(0xFC, &[0; 4]).unwrap();
    assert_eq!(bus.calls(), 1);
}

#[test]
fn test_wide_values_are_split_into_register_accesses() {
    let bus = Arc::new(SpyBus::new(0x100));
    let accel = Accelerator::from_bus(bus.clone());

    accel.write_value(0x20, 0x1122_3344_5566_7788u64).unwrap();
    assert_eq!(bus.calls(), 2);
    assert_eq!(accel.read_value::<u64>(0x20).unwrap(), 0x1122_3344_5566_7788);
}

#[test]
fn test_concurrent_accelerators_on_one_window_never_overlap() {
    common::init_tracing();
    let bus = Arc::new(SpyBus::with_hold(0x1_0000, Duration::from_micros(50)));
    let platform = spy_platform(bus.clone());

    let handles: Vec<_> = (0..4u64)
        .map(|t| {
            let accel = platform.accelerator(&AcceleratorParameters::mmio(ACCEL_BASE)).unwrap();
            std::thread::spawn(move || {
                for i in 0..25u64 {
                    let address = 0x100 * t + 4 * (i % 16);
                    accel.write_value(address, (t * 100 + i) as u32).unwrap();
                    let _ = accel.read_value::<u32>(address).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(bus.calls(), 4 * 25 * 2);
    assert_eq!(bus.overlaps(), 0);
    assert_eq!(bus.max_in_flight(), 1);
}

#[test]
fn test_scheduled_write_then_read() {
    common::init_tracing();
    let bus = Arc::new(SpyBus::new(0x1_0000));
    let platform = spy_platform(bus);
    let accel = platform.accelerator(&AcceleratorParameters::mmio(ACCEL_BASE)).unwrap();
    let stream = platform.execution_stream("registers").unwrap();

    let write = accel
        .enqueue_write(stream.graph(), 0x10, &0xABu32.to_le_bytes(), &[])
        .unwrap();
    let (read, value) = accel.enqueue_read(stream.graph(), 0x10, 4, &[write]).unwrap();

    let status = stream.sync();
    assert!(status.is_ok(), "{}", status.message());
    assert_eq!(status.retval(), 2);
    assert_eq!(value.value::<u32>().unwrap(), 0xAB);
    assert_eq!(stream.graph().issue_order(), vec![write, read]);
}

#[test]
fn test_start_and_status_follow_the_control_register() {
    let bus = Arc::new(SpyBus::new(0x100));
    let accel = Accelerator::from_bus(bus.clone());

    assert_eq!(accel.status(), DeviceStatus::Unknown);
    accel.write_value(0, 0x04u32).unwrap();
    assert_eq!(accel.status(), DeviceStatus::Idle);
    accel.start(StartMode::Once).unwrap();
    assert_eq!(bus.peek(0, 4), vec![0x01, 0, 0, 0]);
    assert_eq!(accel.status(), DeviceStatus::Running);
    accel.start(StartMode::Continuous).unwrap();
    assert_eq!(bus.peek(0, 4), vec![0x81, 0, 0, 0]);
    accel.stop().unwrap();
    assert_eq!(bus.peek(0, 4), vec![0, 0, 0, 0]);
}

#[test]
fn test_second_stream_on_same_graph_is_busy() {
    let graph = ExecutionGraph::new();
    let first = ExecutionStream::new(graph.clone(), StreamParameters::named("first")).unwrap();
    let err = ExecutionStream::new(graph.clone(), StreamParameters::named("second")).unwrap_err();
    assert!(matches!(err, Error::ResourceBusy(_)));
    drop(first);
    assert!(ExecutionStream::new(graph, StreamParameters::named("second")).is_ok());
}

//! End-to-end behaviour of sessions, paired devices and the enumerator
//! against the in-process simulator.

use iohal_engine::hw::mask::ChannelMask;
use iohal_engine::hw::{
    AudioHardware, AudioIoCallback, AudioIoDevice, DeviceEnumerator, DeviceId, DeviceLayout,
    DeviceSession, DeviceSnapshot, Direction, HwError, HwOptions, InputBuffers, OutputBuffers,
    RetryPolicy, SimDeviceSpec, SimulatedHardware,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

const OUTPUT_LEVEL: f32 = 0.25;
const SENTINEL: f32 = 9.0;

fn fast_options() -> HwOptions {
    HwOptions {
        settle: RetryPolicy::fixed(20, 1),
        stop: RetryPolicy::fixed(20, 1),
        refresh_debounce_ms: 10,
        ..HwOptions::default()
    }
}

#[derive(Default)]
struct Recorder {
    announced: Mutex<Option<DeviceSnapshot>>,
    stopped: AtomicUsize,
    cycles: AtomicUsize,
    input_peak: AtomicU32,
}

impl Recorder {
    fn input_peak(&self) -> f32 {
        f32::from_bits(self.input_peak.load(Ordering::Acquire))
    }
}

impl AudioIoCallback for Recorder {
    fn about_to_start(&self, device: &DeviceSnapshot) {
        *self.announced.lock() = Some(device.clone());
    }

    fn process(&self, inputs: &InputBuffers<'_>, outputs: &mut OutputBuffers<'_>, _frames: usize) {
        let peak = inputs
            .iter()
            .flat_map(|ch| ch.iter())
            .fold(0.0f32, |acc, s| acc.max(s.abs()));
        self.input_peak.store(peak.to_bits(), Ordering::Release);
        outputs.fill(OUTPUT_LEVEL);
        self.cycles.fetch_add(1, Ordering::AcqRel);
    }

    fn stopped(&self) {
        self.stopped.fetch_add(1, Ordering::AcqRel);
    }
}

fn single(sim: &Arc<SimulatedHardware>, id: DeviceId, options: HwOptions) -> AudioIoDevice {
    let hw: Arc<dyn AudioHardware> = sim.clone();
    AudioIoDevice::new("test", DeviceLayout::single(hw, id, options))
}

fn wait_for(mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    done()
}

#[test]
fn buffer_size_round_trip() {
    let sim = Arc::new(SimulatedHardware::new());
    let id = sim.add_device(SimDeviceSpec::duplex("Duplex", 2, 2).with_settle_reads(3));
    let mut device = single(&sim, id, fast_options());

    assert!(device.available_buffer_sizes().contains(&256));
    device
        .open(&ChannelMask::first(2), &ChannelMask::first(2), 44_100.0, 256)
        .unwrap();
    assert_eq!(device.current_buffer_size(), 256);
    assert_eq!(device.current_sample_rate(), 44_100.0);
    assert_eq!(device.current_bit_depth(), 32);
    assert_eq!(sim.size_writes(id), 2);
}

#[test]
fn zero_buffer_size_opens_at_default() {
    let sim = Arc::new(SimulatedHardware::new());
    let id = sim.add_device(SimDeviceSpec::output("Out", 2).with_format(48_000.0, 128));
    let mut device = single(&sim, id, fast_options());
    device
        .open(&ChannelMask::new(), &ChannelMask::first(2), 48_000.0, 0)
        .unwrap();
    assert_eq!(device.current_buffer_size(), 512);
}

#[test]
fn starting_twice_registers_one_io_proc() {
    let sim = Arc::new(SimulatedHardware::new());
    let id = sim.add_device(SimDeviceSpec::duplex("Duplex", 2, 2));
    let hw: Arc<dyn AudioHardware> = sim.clone();
    let session = DeviceSession::new(hw, id, fast_options());
    session
        .open(&ChannelMask::first(2), &ChannelMask::first(2), 48_000.0, 512)
        .unwrap();

    let recorder = Arc::new(Recorder::default());
    session.start(recorder.clone()).unwrap();
    session.start(recorder.clone()).unwrap();
    assert_eq!(sim.io_procs_created(id), 1);
    assert_eq!(sim.start_calls(id), 1);

    session.stop(false);
    assert_eq!(sim.io_proc_count(id), 0);
    assert!(!session.is_started());
}

#[test]
fn start_stop_under_a_running_clock() {
    let sim = Arc::new(SimulatedHardware::new());
    let id = sim.add_device(SimDeviceSpec::duplex("Duplex", 2, 2).with_format(48_000.0, 64));
    let mut device = single(&sim, id, fast_options());
    device
        .open(&ChannelMask::first(2), &ChannelMask::first(2), 48_000.0, 64)
        .unwrap();

    let mut clock = sim.spawn_clock(id, Duration::from_micros(200));
    let recorder = Arc::new(Recorder::default());
    for _ in 0..50 {
        device.start(recorder.clone()).unwrap();
        thread::sleep(Duration::from_micros(500));
        device.stop();
    }
    device.close();
    clock.stop();

    assert_eq!(recorder.stopped.load(Ordering::Acquire), 50);
    assert_eq!(sim.io_proc_count(id), 0);
    let cycles = recorder.cycles.load(Ordering::Acquire);
    sim.fire_interrupt(id);
    assert_eq!(recorder.cycles.load(Ordering::Acquire), cycles);
}

#[test]
fn only_routed_outputs_are_written() {
    let sim = Arc::new(SimulatedHardware::new());
    let id = sim.add_device(
        SimDeviceSpec::output("Two streams", 4)
            .with_streams(vec![], vec![2, 2])
            .with_format(48_000.0, 32),
    );
    let mut device = single(&sim, id, fast_options());
    device
        .open(&ChannelMask::new(), &ChannelMask::first(1), 48_000.0, 32)
        .unwrap();

    let recorder = Arc::new(Recorder::default());
    device.start(recorder.clone()).unwrap();
    let mut outputs = vec![vec![SENTINEL; 64], vec![SENTINEL; 64]];
    assert_eq!(sim.fire_interrupt_with(id, &[], &mut outputs), 1);
    for frame in 0..32 {
        assert_eq!(outputs[0][frame * 2], OUTPUT_LEVEL);
        assert_eq!(outputs[0][frame * 2 + 1], SENTINEL);
    }
    assert!(outputs[1].iter().all(|&s| s == SENTINEL));

    // Stopped but still clocked: routed channels go silent.
    device.stop();
    let mut outputs = vec![vec![SENTINEL; 64], vec![SENTINEL; 64]];
    sim.fire_interrupt_with(id, &[], &mut outputs);
    for frame in 0..32 {
        assert_eq!(outputs[0][frame * 2], 0.0);
        assert_eq!(outputs[0][frame * 2 + 1], SENTINEL);
    }
    assert!(outputs[1].iter().all(|&s| s == SENTINEL));
}

#[test]
fn paired_devices_stream_slave_input_through_primary() {
    let sim = Arc::new(SimulatedHardware::new());
    let output = sim.add_device(SimDeviceSpec::output("Out", 2).with_latency(0, 10));
    let input = sim.add_device(SimDeviceSpec::input("In", 2).with_latency(20, 0));
    let hw: Arc<dyn AudioHardware> = sim.clone();
    let layout = DeviceLayout::for_devices(hw, output, input, fast_options());
    assert!(layout.is_paired());
    let mut device = AudioIoDevice::new("Out", layout);
    device
        .open(&ChannelMask::first(2), &ChannelMask::first(2), 48_000.0, 512)
        .unwrap();
    assert_eq!(device.active_input_channels().count(), 2);
    assert_eq!(device.input_latency(), 20 + 2 * 512);
    assert_eq!(device.output_latency(), 10 + 2 * 512);

    let recorder = Arc::new(Recorder::default());
    device.start(recorder.clone()).unwrap();
    let announced = recorder.announced.lock().clone().unwrap();
    assert_eq!(announced.input_channels, 2);
    assert_eq!(announced.output_channels, 2);

    sim.set_input_level(input, 0.5);
    sim.fire_interrupt(input);
    let outputs = sim.fire_interrupt(output);
    assert_eq!(recorder.input_peak(), 0.5);
    assert!(outputs[0].iter().all(|&s| s == OUTPUT_LEVEL));

    device.close();
    assert_eq!(sim.io_proc_count(output), 0);
    assert_eq!(sim.io_proc_count(input), 0);
}

#[test]
fn stuck_device_times_out() {
    let sim = Arc::new(SimulatedHardware::new());
    let id = sim.add_device(SimDeviceSpec::output("Stuck", 2).stuck());
    let options = HwOptions {
        settle: RetryPolicy::fixed(3, 1),
        ..fast_options()
    };
    let mut device = single(&sim, id, options);
    let err = device
        .open(&ChannelMask::new(), &ChannelMask::first(2), 44_100.0, 256)
        .unwrap_err();
    assert_eq!(
        err,
        HwError::ConfigurationTimeout {
            sample_rate: 44_100.0,
            buffer_size: 256
        }
    );
    assert!(!device.is_open());
    assert!(device.last_error_text().contains("couldn't change sample rate"));
}

#[test]
fn external_buffer_size_change_drops_the_callback() {
    let sim = Arc::new(SimulatedHardware::new());
    let id = sim.add_device(SimDeviceSpec::duplex("Duplex", 2, 2));
    let mut device = single(&sim, id, fast_options());
    device
        .open(&ChannelMask::first(2), &ChannelMask::first(2), 48_000.0, 512)
        .unwrap();
    let recorder = Arc::new(Recorder::default());
    device.start(recorder.clone()).unwrap();
    assert!(device.is_playing());

    for _ in 0..5 {
        sim.set_external_buffer_size(id, 1024);
    }
    assert!(wait_for(|| !device.is_playing()));
    assert!(wait_for(|| recorder.stopped.load(Ordering::Acquire) == 1));
    assert_eq!(device.current_buffer_size(), 1024);
    assert!(device.available_buffer_sizes().contains(&1024));
}

#[test]
fn data_sources_select_by_index() {
    let sim = Arc::new(SimulatedHardware::with_default_devices());
    let hw: Arc<dyn AudioHardware> = sim.clone();
    let mut enumerator = DeviceEnumerator::new(hw, fast_options());
    enumerator.scan().unwrap();
    let device = enumerator
        .create_device("Built-in Audio", "Built-in Audio")
        .unwrap();
    assert!(!device.layout().is_paired());

    assert_eq!(
        device.data_source_names(Direction::Input),
        vec!["Internal Microphone".to_string(), "Line In".to_string()]
    );
    assert_eq!(device.current_data_source(Direction::Input), Some(0));
    device.set_data_source(Direction::Input, 1).unwrap();
    assert_eq!(device.current_data_source(Direction::Input), Some(1));
    device.set_data_source(Direction::Input, 7).unwrap();
    assert_eq!(device.current_data_source(Direction::Input), Some(1));
}

#[test]
fn rescans_are_stable_and_deduplicated() {
    let sim = Arc::new(SimulatedHardware::with_default_devices());
    let hw: Arc<dyn AudioHardware> = sim.clone();
    let mut enumerator = DeviceEnumerator::new(hw, fast_options());
    let first = enumerator.scan().unwrap();
    let defaults = (
        enumerator.default_index(Direction::Input).unwrap(),
        enumerator.default_index(Direction::Output).unwrap(),
    );
    assert_eq!(enumerator.scan().unwrap(), first);
    assert_eq!(
        (
            enumerator.default_index(Direction::Input).unwrap(),
            enumerator.default_index(Direction::Output).unwrap(),
        ),
        defaults
    );

    sim.add_device(SimDeviceSpec::input("USB Microphone", 1));
    let (inputs, _) = enumerator.scan().unwrap();
    assert!(inputs.contains(&"USB Microphone (1)".to_string()));
    assert!(inputs.contains(&"USB Microphone (2)".to_string()));
    assert!(!inputs.contains(&"USB Microphone".to_string()));

    let device = enumerator
        .create_device("", "USB Microphone (2)")
        .unwrap();
    assert_eq!(
        enumerator.index_of(&device, Direction::Input).unwrap(),
        inputs.iter().position(|n| n == "USB Microphone (2)")
    );
    assert_eq!(enumerator.index_of(&device, Direction::Output).unwrap(), None);
}

//! In-process audio hardware.
//!
//! Devices behave like slow real hardware: sample-rate and buffer-size
//! writes only show up after a configurable number of reads, the running
//! flag lags behind a stop, and notifications are delivered from whatever
//! thread triggered them. Interrupts are fired by hand or by a clock thread.

use super::error::{HwError, HwResult};
use super::error_fmt::{BAD_DEVICE, ILLEGAL_OPERATION, UNSUPPORTED_FORMAT};
use super::traits::{AudioHardware, DeviceListener, HardwareListener, IoHandler};
use super::types::{
    DataSource, DeviceId, Direction, HardwareChange, InterleavedStream, InterleavedStreamMut,
    IoProcId, ListenerId, PropertyChange, StreamLayout, ValueRange,
};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::debug;

/// Most streams a simulated device delivers per cycle.
const MAX_SIM_STREAMS: usize = 8;

#[derive(Debug, Clone)]
pub struct SimDeviceSpec {
    pub name: String,
    pub input_streams: Vec<usize>,
    pub output_streams: Vec<usize>,
    pub sample_rate: f64,
    pub buffer_size: u32,
    pub sample_rate_ranges: Vec<ValueRange>,
    pub buffer_size_ranges: Vec<ValueRange>,
    pub input_latency: u32,
    pub output_latency: u32,
    pub input_sources: Vec<DataSource>,
    pub output_sources: Vec<DataSource>,
    /// Reads of the written property before the new value is reported.
    pub settle_reads: u32,
    /// Accepts writes but never applies them.
    pub stuck: bool,
    /// `is_running` reads that still report true after the last stop.
    pub stop_lag_reads: u32,
}

impl SimDeviceSpec {
    pub fn duplex(name: &str, inputs: usize, outputs: usize) -> Self {
        Self {
            name: name.to_string(),
            input_streams: if inputs > 0 { vec![inputs] } else { vec![] },
            output_streams: if outputs > 0 { vec![outputs] } else { vec![] },
            sample_rate: 48_000.0,
            buffer_size: 512,
            sample_rate_ranges: vec![
                ValueRange::single(44_100.0),
                ValueRange::single(48_000.0),
                ValueRange::single(96_000.0),
            ],
            buffer_size_ranges: vec![ValueRange::new(32.0, 4096.0)],
            input_latency: 0,
            output_latency: 0,
            input_sources: Vec::new(),
            output_sources: Vec::new(),
            settle_reads: 0,
            stuck: false,
            stop_lag_reads: 0,
        }
    }

    pub fn input(name: &str, channels: usize) -> Self {
        Self::duplex(name, channels, 0)
    }

    pub fn output(name: &str, channels: usize) -> Self {
        Self::duplex(name, 0, channels)
    }

    pub fn with_streams(mut self, inputs: Vec<usize>, outputs: Vec<usize>) -> Self {
        self.input_streams = inputs;
        self.output_streams = outputs;
        self
    }

    pub fn with_format(mut self, sample_rate: f64, buffer_size: u32) -> Self {
        self.sample_rate = sample_rate;
        self.buffer_size = buffer_size;
        self
    }

    pub fn with_ranges(mut self, rates: Vec<ValueRange>, sizes: Vec<ValueRange>) -> Self {
        self.sample_rate_ranges = rates;
        self.buffer_size_ranges = sizes;
        self
    }

    pub fn with_latency(mut self, input: u32, output: u32) -> Self {
        self.input_latency = input;
        self.output_latency = output;
        self
    }

    pub fn with_sources(mut self, direction: Direction, names: &[&str]) -> Self {
        let sources = names
            .iter()
            .enumerate()
            .map(|(i, name)| DataSource {
                id: i as u32 + 1,
                name: name.to_string(),
            })
            .collect();
        match direction {
            Direction::Input => self.input_sources = sources,
            Direction::Output => self.output_sources = sources,
        }
        self
    }

    pub fn with_settle_reads(mut self, reads: u32) -> Self {
        self.settle_reads = reads;
        self
    }

    pub fn stuck(mut self) -> Self {
        self.stuck = true;
        self
    }

    pub fn with_stop_lag(mut self, reads: u32) -> Self {
        self.stop_lag_reads = reads;
        self
    }

    fn streams(&self, direction: Direction) -> &[usize] {
        match direction {
            Direction::Input => &self.input_streams,
            Direction::Output => &self.output_streams,
        }
    }

    fn sources(&self, direction: Direction) -> &[DataSource] {
        match direction {
            Direction::Input => &self.input_sources,
            Direction::Output => &self.output_sources,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Pending<T> {
    value: T,
    reads_left: u32,
}

struct IoProcSlot {
    handler: Arc<dyn IoHandler>,
    started: bool,
}

struct SimDevice {
    spec: SimDeviceSpec,
    sample_rate: f64,
    buffer_size: u32,
    pending_rate: Option<Pending<f64>>,
    pending_size: Option<Pending<u32>>,
    stop_lag_left: u32,
    procs: BTreeMap<IoProcId, IoProcSlot>,
    listeners: Vec<(ListenerId, DeviceListener)>,
    related: Vec<DeviceId>,
    current_source: [u32; 2],
    input_level: f32,
    delivered_frames: Option<usize>,
    dispatch: Arc<Mutex<()>>,
    io_procs_created: usize,
    start_calls: usize,
    rate_writes: usize,
    size_writes: usize,
}

impl SimDevice {
    fn new(spec: SimDeviceSpec) -> Self {
        let first_source = |d| spec.sources(d).first().map(|s| s.id).unwrap_or(0);
        let current_source = [first_source(Direction::Input), first_source(Direction::Output)];
        Self {
            sample_rate: spec.sample_rate,
            buffer_size: spec.buffer_size,
            spec,
            pending_rate: None,
            pending_size: None,
            stop_lag_left: 0,
            procs: BTreeMap::new(),
            listeners: Vec::new(),
            related: Vec::new(),
            current_source,
            input_level: 0.0,
            delivered_frames: None,
            dispatch: Arc::new(Mutex::new(())),
            io_procs_created: 0,
            start_calls: 0,
            rate_writes: 0,
            size_writes: 0,
        }
    }

    fn any_started(&self) -> bool {
        self.procs.values().any(|p| p.started)
    }

    fn listeners(&self) -> Vec<DeviceListener> {
        self.listeners.iter().map(|(_, l)| Arc::clone(l)).collect()
    }

    fn source_slot(direction: Direction) -> usize {
        match direction {
            Direction::Input => 0,
            Direction::Output => 1,
        }
    }
}

/// Settles a pending write on read. Returns true when it just took effect.
fn settle<T: Copy>(pending: &mut Option<Pending<T>>, current: &mut T, stuck: bool) -> bool {
    let Some(p) = pending.as_mut() else {
        return false;
    };
    if stuck {
        return false;
    }
    if p.reads_left > 0 {
        p.reads_left -= 1;
        return false;
    }
    *current = p.value;
    *pending = None;
    true
}

struct SimState {
    devices: BTreeMap<DeviceId, SimDevice>,
    default_input: DeviceId,
    default_output: DeviceId,
    hardware_listeners: Vec<(ListenerId, HardwareListener)>,
    next_device: u32,
    next_proc: u64,
    next_listener: u64,
}

impl SimState {
    fn device(&self, id: DeviceId) -> HwResult<&SimDevice> {
        self.devices
            .get(&id)
            .ok_or(HwError::status("device lookup", BAD_DEVICE))
    }

    fn device_mut(&mut self, id: DeviceId) -> HwResult<&mut SimDevice> {
        self.devices
            .get_mut(&id)
            .ok_or(HwError::status("device lookup", BAD_DEVICE))
    }

    fn hardware_listeners(&self) -> Vec<HardwareListener> {
        self.hardware_listeners
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect()
    }
}

pub struct SimulatedHardware {
    state: Mutex<SimState>,
}

impl Default for SimulatedHardware {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedHardware {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SimState {
                devices: BTreeMap::new(),
                default_input: DeviceId::INVALID,
                default_output: DeviceId::INVALID,
                hardware_listeners: Vec::new(),
                next_device: 1,
                next_proc: 1,
                next_listener: 1,
            }),
        }
    }

    /// A built-in duplex device plus a USB microphone and a pair of
    /// interfaces that report each other as related.
    pub fn with_default_devices() -> Self {
        let hw = Self::new();
        hw.add_device(
            SimDeviceSpec::duplex("Built-in Audio", 2, 2)
                .with_latency(32, 48)
                .with_sources(Direction::Input, &["Internal Microphone", "Line In"])
                .with_sources(Direction::Output, &["Internal Speakers", "Headphones"]),
        );
        hw.add_device(SimDeviceSpec::input("USB Microphone", 1).with_latency(64, 0));
        let out = hw.add_device(SimDeviceSpec::output("Studio Interface", 8).with_latency(0, 24));
        let inp = hw.add_device(SimDeviceSpec::input("Studio Interface", 8).with_latency(24, 0));
        hw.set_related(out, &[inp]);
        hw
    }

    /// Adds a device and announces it. The first input/output capable
    /// devices become the defaults.
    pub fn add_device(&self, spec: SimDeviceSpec) -> DeviceId {
        let (id, listeners) = {
            let mut state = self.state.lock();
            let id = DeviceId(state.next_device);
            state.next_device += 1;
            if !spec.input_streams.is_empty() && !state.default_input.is_valid() {
                state.default_input = id;
            }
            if !spec.output_streams.is_empty() && !state.default_output.is_valid() {
                state.default_output = id;
            }
            debug!("sim: added device {} '{}'", id, spec.name);
            state.devices.insert(id, SimDevice::new(spec));
            (id, state.hardware_listeners())
        };
        for listener in listeners {
            listener(HardwareChange::DevicesChanged);
        }
        id
    }

    pub fn remove_device(&self, id: DeviceId) {
        let (device_listeners, hardware_listeners) = {
            let mut state = self.state.lock();
            let Some(device) = state.devices.remove(&id) else {
                return;
            };
            if state.default_input == id {
                state.default_input = DeviceId::INVALID;
            }
            if state.default_output == id {
                state.default_output = DeviceId::INVALID;
            }
            (device.listeners(), state.hardware_listeners())
        };
        for listener in device_listeners {
            listener(id, PropertyChange::DeviceIsAlive);
        }
        for listener in hardware_listeners {
            listener(HardwareChange::DevicesChanged);
        }
    }

    pub fn set_default(&self, direction: Direction, id: DeviceId) {
        let listeners = {
            let mut state = self.state.lock();
            match direction {
                Direction::Input => state.default_input = id,
                Direction::Output => state.default_output = id,
            }
            state.hardware_listeners()
        };
        let change = match direction {
            Direction::Input => HardwareChange::DefaultInputChanged,
            Direction::Output => HardwareChange::DefaultOutputChanged,
        };
        for listener in listeners {
            listener(change);
        }
    }

    /// Marks every device in `group` as related to every other.
    pub fn set_related(&self, id: DeviceId, others: &[DeviceId]) {
        let mut state = self.state.lock();
        let mut group = vec![id];
        group.extend_from_slice(others);
        for &member in &group {
            if let Some(device) = state.devices.get_mut(&member) {
                device.related = group.iter().copied().filter(|&d| d != member).collect();
            }
        }
    }

    /// Changes the sample rate as if another application did it.
    pub fn set_external_sample_rate(&self, id: DeviceId, rate: f64) {
        let listeners = {
            let mut state = self.state.lock();
            let Ok(device) = state.device_mut(id) else {
                return;
            };
            device.sample_rate = rate;
            device.pending_rate = None;
            device.listeners()
        };
        for listener in listeners {
            listener(id, PropertyChange::NominalSampleRate);
        }
    }

    pub fn set_external_buffer_size(&self, id: DeviceId, frames: u32) {
        let listeners = {
            let mut state = self.state.lock();
            let Ok(device) = state.device_mut(id) else {
                return;
            };
            device.buffer_size = frames;
            device.pending_size = None;
            device.listeners()
        };
        for listener in listeners {
            listener(id, PropertyChange::BufferFrameSize);
        }
    }

    /// Replaces the channel count of every stream in `direction`, as when
    /// an interface switches its channel mode.
    pub fn set_external_streams(&self, id: DeviceId, direction: Direction, streams: Vec<usize>) {
        let listeners = {
            let mut state = self.state.lock();
            let Ok(device) = state.device_mut(id) else {
                return;
            };
            match direction {
                Direction::Input => device.spec.input_streams = streams,
                Direction::Output => device.spec.output_streams = streams,
            }
            device.listeners()
        };
        for listener in listeners {
            listener(id, PropertyChange::StreamConfiguration);
        }
    }

    /// Delivers a property notification without changing anything.
    pub fn notify(&self, id: DeviceId, change: PropertyChange) {
        let listeners = match self.state.lock().device(id) {
            Ok(device) => device.listeners(),
            Err(_) => return,
        };
        for listener in listeners {
            listener(id, change);
        }
    }

    pub fn notify_hardware(&self, change: HardwareChange) {
        let listeners = self.state.lock().hardware_listeners();
        for listener in listeners {
            listener(change);
        }
    }

    /// Constant value delivered on every input channel.
    pub fn set_input_level(&self, id: DeviceId, level: f32) {
        if let Ok(device) = self.state.lock().device_mut(id) {
            device.input_level = level;
        }
    }

    /// Overrides the frames delivered per cycle, simulating hardware that
    /// runs at a different size than the one last reported.
    pub fn set_delivered_frames(&self, id: DeviceId, frames: Option<usize>) {
        if let Ok(device) = self.state.lock().device_mut(id) {
            device.delivered_frames = frames;
        }
    }

    pub fn io_procs_created(&self, id: DeviceId) -> usize {
        self.with_device(id, |d| d.io_procs_created)
    }

    pub fn io_proc_count(&self, id: DeviceId) -> usize {
        self.with_device(id, |d| d.procs.len())
    }

    pub fn start_calls(&self, id: DeviceId) -> usize {
        self.with_device(id, |d| d.start_calls)
    }

    pub fn rate_writes(&self, id: DeviceId) -> usize {
        self.with_device(id, |d| d.rate_writes)
    }

    pub fn size_writes(&self, id: DeviceId) -> usize {
        self.with_device(id, |d| d.size_writes)
    }

    pub fn device_listener_count(&self, id: DeviceId) -> usize {
        self.with_device(id, |d| d.listeners.len())
    }

    pub fn hardware_listener_count(&self) -> usize {
        self.state.lock().hardware_listeners.len()
    }

    fn with_device<T: Default>(&self, id: DeviceId, f: impl FnOnce(&SimDevice) -> T) -> T {
        self.state.lock().device(id).map(f).unwrap_or_default()
    }

    /// Runs one hardware cycle on `id` with caller-provided buffers, one
    /// vector per stream. Returns how many handlers ran.
    pub fn fire_interrupt_with(
        &self,
        id: DeviceId,
        inputs: &[Vec<f32>],
        outputs: &mut [Vec<f32>],
    ) -> usize {
        let (dispatch, in_streams, out_streams) = {
            let state = self.state.lock();
            let Ok(device) = state.device(id) else {
                return 0;
            };
            (
                Arc::clone(&device.dispatch),
                device.spec.input_streams.clone(),
                device.spec.output_streams.clone(),
            )
        };
        let _cycle = dispatch.lock();
        let handlers: Vec<Arc<dyn IoHandler>> = {
            let state = self.state.lock();
            match state.device(id) {
                Ok(device) => device
                    .procs
                    .values()
                    .filter(|p| p.started)
                    .map(|p| Arc::clone(&p.handler))
                    .collect(),
                Err(_) => return 0,
            }
        };
        if handlers.is_empty() {
            return 0;
        }

        let mut in_views = [InterleavedStream::EMPTY; MAX_SIM_STREAMS];
        let in_count = inputs.len().min(MAX_SIM_STREAMS);
        for (i, samples) in inputs.iter().take(in_count).enumerate() {
            let channels = in_streams.get(i).copied().unwrap_or(1);
            in_views[i] = InterleavedStream::new(channels, samples);
        }
        let mut out_views: [InterleavedStreamMut<'_>; MAX_SIM_STREAMS] =
            std::array::from_fn(|_| InterleavedStreamMut::empty());
        let out_count = outputs.len().min(MAX_SIM_STREAMS);
        for (i, samples) in outputs.iter_mut().take(out_count).enumerate() {
            let channels = out_streams.get(i).copied().unwrap_or(1);
            out_views[i] = InterleavedStreamMut::new(channels, samples);
        }

        for handler in &handlers {
            handler.on_interrupt(&in_views[..in_count], &mut out_views[..out_count]);
        }
        handlers.len()
    }

    /// Runs one hardware cycle with buffers sized from the device's current
    /// geometry and returns the output streams.
    pub fn fire_interrupt(&self, id: DeviceId) -> Vec<Vec<f32>> {
        let Some((frames, level, in_streams, out_streams)) = ({
            let state = self.state.lock();
            state.device(id).ok().map(|d| {
                (
                    d.delivered_frames.unwrap_or(d.buffer_size as usize),
                    d.input_level,
                    d.spec.input_streams.clone(),
                    d.spec.output_streams.clone(),
                )
            })
        }) else {
            return Vec::new();
        };
        let inputs: Vec<Vec<f32>> = in_streams
            .iter()
            .map(|&channels| vec![level; channels * frames])
            .collect();
        let mut outputs: Vec<Vec<f32>> = out_streams
            .iter()
            .map(|&channels| vec![0.0; channels * frames])
            .collect();
        self.fire_interrupt_with(id, &inputs, &mut outputs);
        outputs
    }

    /// Fires interrupts on `id` every `period` until the returned clock is
    /// dropped.
    pub fn spawn_clock(self: &Arc<Self>, id: DeviceId, period: Duration) -> SimClock {
        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);
        let hw = Arc::clone(self);
        let handle = thread::Builder::new()
            .name(format!("iohal-sim-clock-{}", id.0))
            .spawn(move || {
                while flag.load(Ordering::Acquire) {
                    hw.fire_interrupt(id);
                    thread::sleep(period);
                }
            })
            .ok();
        SimClock { running, handle }
    }
}

pub struct SimClock {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl SimClock {
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for SimClock {
    fn drop(&mut self) {
        self.stop();
    }
}

impl AudioHardware for SimulatedHardware {
    fn device_ids(&self) -> HwResult<Vec<DeviceId>> {
        Ok(self.state.lock().devices.keys().copied().collect())
    }

    fn default_device(&self, direction: Direction) -> HwResult<DeviceId> {
        let state = self.state.lock();
        Ok(match direction {
            Direction::Input => state.default_input,
            Direction::Output => state.default_output,
        })
    }

    fn device_name(&self, id: DeviceId) -> HwResult<String> {
        Ok(self.state.lock().device(id)?.spec.name.clone())
    }

    fn stream_layout(&self, id: DeviceId, direction: Direction) -> HwResult<StreamLayout> {
        let state = self.state.lock();
        Ok(StreamLayout::new(
            state.device(id)?.spec.streams(direction).to_vec(),
        ))
    }

    fn sample_rate(&self, id: DeviceId) -> HwResult<f64> {
        let (rate, listeners) = {
            let mut state = self.state.lock();
            let device = state.device_mut(id)?;
            let stuck = device.spec.stuck;
            let changed = settle(&mut device.pending_rate, &mut device.sample_rate, stuck);
            let listeners = if changed { device.listeners() } else { Vec::new() };
            (device.sample_rate, listeners)
        };
        for listener in listeners {
            listener(id, PropertyChange::NominalSampleRate);
        }
        Ok(rate)
    }

    fn set_sample_rate(&self, id: DeviceId, _direction: Direction, rate: f64) -> HwResult<()> {
        let mut state = self.state.lock();
        let device = state.device_mut(id)?;
        device.rate_writes += 1;
        let supported = device
            .spec
            .sample_rate_ranges
            .iter()
            .any(|r| r.contains_within(rate, 2.0));
        if !supported {
            return Err(HwError::status("set sample rate", UNSUPPORTED_FORMAT));
        }
        if rate != device.sample_rate {
            device.pending_rate = Some(Pending {
                value: rate,
                reads_left: device.spec.settle_reads,
            });
        }
        Ok(())
    }

    fn buffer_size(&self, id: DeviceId) -> HwResult<u32> {
        let (size, listeners) = {
            let mut state = self.state.lock();
            let device = state.device_mut(id)?;
            let stuck = device.spec.stuck;
            let changed = settle(&mut device.pending_size, &mut device.buffer_size, stuck);
            let listeners = if changed { device.listeners() } else { Vec::new() };
            (device.buffer_size, listeners)
        };
        for listener in listeners {
            listener(id, PropertyChange::BufferFrameSize);
        }
        Ok(size)
    }

    fn set_buffer_size(&self, id: DeviceId, _direction: Direction, frames: u32) -> HwResult<()> {
        let mut state = self.state.lock();
        let device = state.device_mut(id)?;
        device.size_writes += 1;
        let supported = device
            .spec
            .buffer_size_ranges
            .iter()
            .any(|r| r.contains_within(frames as f64, 0.0));
        if !supported {
            return Err(HwError::status("set buffer size", UNSUPPORTED_FORMAT));
        }
        if frames != device.buffer_size {
            device.pending_size = Some(Pending {
                value: frames,
                reads_left: device.spec.settle_reads,
            });
        }
        Ok(())
    }

    fn sample_rate_ranges(&self, id: DeviceId) -> HwResult<Vec<ValueRange>> {
        Ok(self.state.lock().device(id)?.spec.sample_rate_ranges.clone())
    }

    fn buffer_size_ranges(&self, id: DeviceId) -> HwResult<Vec<ValueRange>> {
        Ok(self.state.lock().device(id)?.spec.buffer_size_ranges.clone())
    }

    fn latency(&self, id: DeviceId, direction: Direction) -> HwResult<u32> {
        let state = self.state.lock();
        let spec = &state.device(id)?.spec;
        Ok(match direction {
            Direction::Input => spec.input_latency,
            Direction::Output => spec.output_latency,
        })
    }

    fn is_running(&self, id: DeviceId) -> HwResult<bool> {
        let mut state = self.state.lock();
        let device = state.device_mut(id)?;
        if device.any_started() {
            return Ok(true);
        }
        if device.stop_lag_left > 0 {
            device.stop_lag_left -= 1;
            return Ok(true);
        }
        Ok(false)
    }

    fn related_devices(&self, id: DeviceId) -> HwResult<Vec<DeviceId>> {
        Ok(self.state.lock().device(id)?.related.clone())
    }

    fn data_sources(&self, id: DeviceId, direction: Direction) -> HwResult<Vec<DataSource>> {
        Ok(self.state.lock().device(id)?.spec.sources(direction).to_vec())
    }

    fn current_data_source(&self, id: DeviceId, direction: Direction) -> HwResult<u32> {
        let state = self.state.lock();
        Ok(state.device(id)?.current_source[SimDevice::source_slot(direction)])
    }

    fn set_data_source(&self, id: DeviceId, direction: Direction, source: u32) -> HwResult<()> {
        let listeners = {
            let mut state = self.state.lock();
            let device = state.device_mut(id)?;
            if !device.spec.sources(direction).iter().any(|s| s.id == source) {
                return Err(HwError::status("set data source", ILLEGAL_OPERATION));
            }
            device.current_source[SimDevice::source_slot(direction)] = source;
            device.listeners()
        };
        for listener in listeners {
            listener(id, PropertyChange::DataSource);
        }
        Ok(())
    }

    fn create_io_proc(&self, id: DeviceId, handler: Arc<dyn IoHandler>) -> HwResult<IoProcId> {
        let mut state = self.state.lock();
        let proc_id = IoProcId(state.next_proc);
        state.next_proc += 1;
        let device = state.device_mut(id)?;
        device.io_procs_created += 1;
        device.procs.insert(
            proc_id,
            IoProcSlot {
                handler,
                started: false,
            },
        );
        Ok(proc_id)
    }

    fn destroy_io_proc(&self, id: DeviceId, proc_id: IoProcId) -> HwResult<()> {
        let dispatch = Arc::clone(&self.state.lock().device(id)?.dispatch);
        // Wait out a cycle in progress so the handler is idle once we return.
        let _cycle = dispatch.lock();
        let mut state = self.state.lock();
        let device = state.device_mut(id)?;
        if device.procs.remove(&proc_id).is_none() {
            return Err(HwError::status("destroy io proc", ILLEGAL_OPERATION));
        }
        Ok(())
    }

    fn start(&self, id: DeviceId, proc_id: IoProcId) -> HwResult<()> {
        let mut state = self.state.lock();
        let device = state.device_mut(id)?;
        device.start_calls += 1;
        let slot = device
            .procs
            .get_mut(&proc_id)
            .ok_or(HwError::status("start device", ILLEGAL_OPERATION))?;
        slot.started = true;
        Ok(())
    }

    fn stop(&self, id: DeviceId, proc_id: IoProcId) -> HwResult<()> {
        let mut state = self.state.lock();
        let device = state.device_mut(id)?;
        let slot = device
            .procs
            .get_mut(&proc_id)
            .ok_or(HwError::status("stop device", ILLEGAL_OPERATION))?;
        let was_started = std::mem::replace(&mut slot.started, false);
        if was_started && !device.any_started() {
            device.stop_lag_left = device.spec.stop_lag_reads;
        }
        Ok(())
    }

    fn add_device_listener(&self, id: DeviceId, listener: DeviceListener) -> HwResult<ListenerId> {
        let mut state = self.state.lock();
        let listener_id = ListenerId(state.next_listener);
        state.next_listener += 1;
        state.device_mut(id)?.listeners.push((listener_id, listener));
        Ok(listener_id)
    }

    fn remove_device_listener(&self, id: DeviceId, listener: ListenerId) -> HwResult<()> {
        let mut state = self.state.lock();
        let device = state.device_mut(id)?;
        device.listeners.retain(|(l, _)| *l != listener);
        Ok(())
    }

    fn add_hardware_listener(&self, listener: HardwareListener) -> HwResult<ListenerId> {
        let mut state = self.state.lock();
        let listener_id = ListenerId(state.next_listener);
        state.next_listener += 1;
        state.hardware_listeners.push((listener_id, listener));
        Ok(listener_id)
    }

    fn remove_hardware_listener(&self, listener: ListenerId) -> HwResult<()> {
        self.state
            .lock()
            .hardware_listeners
            .retain(|(l, _)| *l != listener);
        Ok(())
    }
}

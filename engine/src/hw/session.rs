//! One hardware device: its negotiated configuration, routing and lifecycle.

use super::channel_map::{MAX_CHANNELS, compute_routing};
use super::error::{HwError, HwResult};
use super::formats::{available_buffer_sizes, available_sample_rates};
use super::ioproc::{BridgeRole, IoBridge};
use super::latency::reported_latency;
use super::mask::ChannelMask;
use super::options::HwOptions;
use super::refresh::RefreshWorker;
use super::retry::{poll_until, sleep_then_poll};
use super::traits::{AudioHardware, AudioIoCallback, IoHandler};
use super::types::{
    DeviceId, DeviceSnapshot, Direction, HardwareChange, IoProcId, ListenerId, PropertyChange,
    StreamLayout,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Configured,
    Running,
    /// Constructed with an invalid device; every operation is refused.
    Failed,
}

/// What the hardware last reported for a device.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceDetails {
    pub name: String,
    pub sample_rate: f64,
    pub buffer_size: usize,
    pub sample_rates: Vec<f64>,
    pub buffer_sizes: Vec<usize>,
    pub input_latency: usize,
    pub output_latency: usize,
    pub input_layout: StreamLayout,
    pub output_layout: StreamLayout,
    pub input_names: Vec<String>,
    pub output_names: Vec<String>,
}

impl DeviceDetails {
    pub fn names(&self, direction: Direction) -> &[String] {
        match direction {
            Direction::Input => &self.input_names,
            Direction::Output => &self.output_names,
        }
    }

    fn geometry(&self) -> (f64, usize, usize, usize) {
        (
            self.sample_rate,
            self.buffer_size,
            self.input_layout.total_channels(),
            self.output_layout.total_channels(),
        )
    }
}

fn best_effort<T>(id: DeviceId, what: &str, result: HwResult<T>, fallback: T) -> T {
    match result {
        Ok(value) => value,
        Err(e) => {
            debug!("device {}: {} query failed: {}", id, what, e);
            fallback
        }
    }
}

/// Re-reads everything about `id`, keeping previous values for queries
/// that fail.
fn read_details(
    hw: &dyn AudioHardware,
    id: DeviceId,
    options: &HwOptions,
    previous: &DeviceDetails,
) -> DeviceDetails {
    let name = best_effort(id, "name", hw.device_name(id), previous.name.clone());
    let sample_rate = best_effort(id, "sample rate", hw.sample_rate(id), previous.sample_rate);
    let buffer_size = best_effort(
        id,
        "buffer size",
        hw.buffer_size(id).map(|f| f as usize),
        previous.buffer_size,
    );
    let rate_ranges = best_effort(
        id,
        "sample rate ranges",
        hw.sample_rate_ranges(id),
        Vec::new(),
    );
    let size_ranges = best_effort(
        id,
        "buffer size ranges",
        hw.buffer_size_ranges(id),
        Vec::new(),
    );
    let device_latency = |direction: Direction| {
        best_effort(id, "latency", hw.latency(id, direction), 0)
    };
    let layout = |direction: Direction, fallback: &StreamLayout| {
        best_effort(
            id,
            "stream layout",
            hw.stream_layout(id, direction),
            fallback.clone(),
        )
    };
    let input_layout = layout(Direction::Input, &previous.input_layout);
    let output_layout = layout(Direction::Output, &previous.output_layout);
    let empty = ChannelMask::new();

    DeviceDetails {
        sample_rates: available_sample_rates(&rate_ranges, sample_rate),
        buffer_sizes: available_buffer_sizes(&size_ranges, buffer_size, options.max_buffer_size),
        input_latency: reported_latency(device_latency(Direction::Input), buffer_size),
        output_latency: reported_latency(device_latency(Direction::Output), buffer_size),
        input_names: compute_routing(&input_layout, &empty, Direction::Input).names,
        output_names: compute_routing(&output_layout, &empty, Direction::Output).names,
        input_layout,
        output_layout,
        name,
        sample_rate,
        buffer_size,
    }
}

struct SessionInner {
    hw: Arc<dyn AudioHardware>,
    id: DeviceId,
    options: HwOptions,
    bridge: Arc<IoBridge>,
    details: DeviceDetails,
    active_inputs: ChannelMask,
    active_outputs: ChannelMask,
    opened: bool,
    failed: bool,
    io_proc: Option<IoProcId>,
    /// Held here so the real-time thread never drops the last reference.
    callback: Option<Arc<dyn AudioIoCallback>>,
    /// A slave's clock is feeding its primary.
    capturing: bool,
    /// Set on a slave: the session that reads its captured input.
    primary: Option<Weak<Mutex<SessionInner>>>,
    last_error: Option<HwError>,
    callbacks_allowed: Arc<AtomicBool>,
}

impl SessionInner {
    fn state(&self) -> SessionState {
        if self.failed {
            SessionState::Failed
        } else if !self.opened {
            SessionState::Uninitialized
        } else if self.is_playing() {
            SessionState::Running
        } else {
            SessionState::Configured
        }
    }

    fn is_playing(&self) -> bool {
        self.callback.is_some() || self.capturing
    }

    fn update_details(&mut self) {
        self.details = read_details(self.hw.as_ref(), self.id, &self.options, &self.details);
    }

    fn clamp_masks(&mut self) {
        for (mask, names) in [
            (&mut self.active_inputs, &self.details.input_names),
            (&mut self.active_outputs, &self.details.output_names),
        ] {
            let before = mask.count();
            mask.truncate(names.len());
            mask.keep_lowest(MAX_CHANNELS);
            if mask.count() != before {
                warn!(
                    "device {}: {} requested channels clamped to {}",
                    self.id,
                    before,
                    mask.count()
                );
            }
        }
    }

    /// Recomputes routing and resizes scratch storage. Waits for any cycle
    /// in flight before touching the bridge.
    fn rebuild_routing(&mut self) {
        self.clamp_masks();
        let inputs = compute_routing(
            &self.details.input_layout,
            &self.active_inputs,
            Direction::Input,
        );
        let outputs = compute_routing(
            &self.details.output_layout,
            &self.active_outputs,
            Direction::Output,
        );
        let (input_routing, input_channels) = match self.bridge.slave() {
            Some(slave) => {
                let slave_inputs = slave.state().scratch().inputs();
                (Default::default(), slave_inputs)
            }
            None => {
                let count = inputs.active_channels();
                (inputs.routing, count)
            }
        };
        let output_channels = outputs.active_channels();
        let reallocated = self.bridge.state().configure(
            input_routing,
            outputs.routing,
            input_channels,
            self.details.buffer_size,
        );
        debug!(
            "device {}: routing {} in / {} out at {} frames{}",
            self.id,
            input_channels,
            output_channels,
            self.details.buffer_size,
            if reallocated { " (reallocated)" } else { "" }
        );
    }

    /// Detaches the callback and returns it. Once this returns the bridge
    /// will not run it again.
    fn stop(&mut self, leave_running: bool) -> Option<Arc<dyn AudioIoCallback>> {
        let previous = self.bridge.publish(None);
        self.bridge.set_capturing(false);
        self.capturing = false;
        if !leave_running && let Some(proc_id) = self.io_proc.take() {
            if let Err(e) = self.hw.stop(self.id, proc_id) {
                warn!("device {}: {}", self.id, e);
            }
            if let Err(e) = self.hw.destroy_io_proc(self.id, proc_id) {
                warn!("device {}: {}", self.id, e);
            }
            let (hw, id) = (Arc::clone(&self.hw), self.id);
            let polled = sleep_then_poll(&self.options.stop, || {
                !hw.is_running(id).unwrap_or(false)
            });
            if !polled.settled() {
                warn!(
                    "device {} still reports running after {:?}",
                    id,
                    self.options.stop.total_budget()
                );
            }
            info!("device {} stopped", id);
        }
        self.bridge.flush();
        drop(previous);
        self.callback.take()
    }

    fn open(
        &mut self,
        inputs: &ChannelMask,
        outputs: &ChannelMask,
        sample_rate: f64,
        buffer_size: usize,
    ) -> HwResult<()> {
        if self.failed {
            return Err(self.stored_error());
        }
        info!(
            "opening device {} at {} Hz, {} frames",
            self.id, sample_rate, buffer_size
        );
        self.callbacks_allowed.store(false, Ordering::Release);
        let detached = self.stop(false);
        if detached.is_some() {
            debug!("device {}: reopened while running", self.id);
        }

        self.active_inputs = inputs.clone();
        self.active_outputs = outputs.clone();
        self.clamp_masks();

        let mut errors = Vec::new();
        for direction in [Direction::Output, Direction::Input] {
            if let Err(e) = self.hw.set_sample_rate(self.id, direction, sample_rate) {
                errors.push(e);
            }
        }
        for direction in [Direction::Output, Direction::Input] {
            if let Err(e) = self.hw.set_buffer_size(self.id, direction, buffer_size as u32) {
                errors.push(e);
            }
        }

        let settle = self.options.settle;
        let polled = poll_until(&settle, || {
            self.update_details();
            self.details.sample_rate == sample_rate && self.details.buffer_size == buffer_size
        });
        if !polled.settled() {
            warn!(
                "device {} did not reach {} Hz / {} frames within {:?}",
                self.id,
                sample_rate,
                buffer_size,
                settle.total_budget()
            );
            errors.push(HwError::ConfigurationTimeout {
                sample_rate,
                buffer_size,
            });
        }
        if self.details.sample_rates.is_empty() {
            errors.push(HwError::NoSampleRates);
        }
        if self.details.buffer_sizes.is_empty() {
            errors.push(HwError::NoBufferSizes);
        }

        self.rebuild_routing();
        self.opened = true;
        self.callbacks_allowed.store(true, Ordering::Release);

        self.last_error = HwError::collect(errors);
        match &self.last_error {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }

    /// Registers the IOProc and starts the clock unless already running.
    fn run_clock(&mut self) -> HwResult<()> {
        if self.failed {
            return Err(self.stored_error());
        }
        if !self.opened {
            return Err(HwError::NotOpen);
        }
        if self.io_proc.is_none() {
            let handler: Arc<dyn IoHandler> = self.bridge.clone();
            let proc_id = self
                .hw
                .create_io_proc(self.id, handler)
                .inspect_err(|e| self.last_error = Some(e.clone()))?;
            if let Err(e) = self.hw.start(self.id, proc_id) {
                if let Err(destroy) = self.hw.destroy_io_proc(self.id, proc_id) {
                    debug!("device {}: {}", self.id, destroy);
                }
                self.last_error = Some(e.clone());
                return Err(e);
            }
            self.io_proc = Some(proc_id);
            info!("device {} started", self.id);
        }
        Ok(())
    }

    fn start(&mut self, callback: Arc<dyn AudioIoCallback>) -> HwResult<()> {
        self.run_clock()?;
        self.callback = Some(Arc::clone(&callback));
        self.bridge.publish(Some(callback));
        Ok(())
    }

    fn start_capture(&mut self) -> HwResult<()> {
        self.run_clock()?;
        self.bridge.set_capturing(true);
        self.capturing = true;
        Ok(())
    }

    /// Reacts to a hardware change by re-reading the device and, when its
    /// geometry moved, stopping it and rebuilding its routing.
    fn refresh(&mut self) -> Refreshed {
        if self.failed {
            return Refreshed::default();
        }
        let before = self.details.geometry();
        self.update_details();
        if self.details.geometry() == before {
            return Refreshed::default();
        }
        info!(
            "device {} changed to {} Hz, {} frames",
            self.id, self.details.sample_rate, self.details.buffer_size
        );
        self.callbacks_allowed.store(false, Ordering::Release);
        let was_playing = self.is_playing();
        let dropped = self.stop(false);
        self.update_details();
        if self.opened {
            self.rebuild_routing();
        }
        self.callbacks_allowed.store(true, Ordering::Release);
        Refreshed {
            changed: true,
            was_playing,
            dropped,
        }
    }

    /// Follows a geometry change on this session's slave. A slave that was
    /// capturing has stopped, which ends this session's stream too.
    fn slave_changed(&mut self, slave_was_playing: bool) -> Option<Arc<dyn AudioIoCallback>> {
        if self.failed {
            return None;
        }
        self.callbacks_allowed.store(false, Ordering::Release);
        let dropped = if slave_was_playing && self.callback.is_some() {
            info!("device {}: input device changed, stopping", self.id);
            self.stop(false)
        } else {
            None
        };
        if self.opened {
            self.rebuild_routing();
        }
        self.callbacks_allowed.store(true, Ordering::Release);
        dropped
    }

    fn stored_error(&self) -> HwError {
        self.last_error
            .clone()
            .unwrap_or(HwError::InvalidDevice(self.id))
    }
}

#[derive(Default)]
struct Refreshed {
    changed: bool,
    was_playing: bool,
    dropped: Option<Arc<dyn AudioIoCallback>>,
}

/// Applies a refresh and notifies outside every session lock. A slave's
/// change is handed on to its primary, which owns the application callback.
fn run_refresh(inner: &Mutex<SessionInner>) {
    let (refreshed, primary) = {
        let mut inner = inner.lock();
        (inner.refresh(), inner.primary.clone())
    };
    if let Some(callback) = refreshed.dropped {
        callback.stopped();
    }
    if !refreshed.changed {
        return;
    }
    if let Some(primary) = primary.and_then(|p| p.upgrade()) {
        let dropped = primary.lock().slave_changed(refreshed.was_playing);
        if let Some(callback) = dropped {
            callback.stopped();
        }
    }
}

/// Owner of one hardware device.
///
/// Hardware notifications only flag a refresh; a worker thread applies it
/// once the burst has settled. Dropping the session unregisters the
/// notifications and fully stops the device before anything is freed.
pub struct DeviceSession {
    inner: Arc<Mutex<SessionInner>>,
    hw: Arc<dyn AudioHardware>,
    id: DeviceId,
    device_listener: Option<ListenerId>,
    hardware_listener: Option<ListenerId>,
    refresh: Option<RefreshWorker>,
}

impl DeviceSession {
    pub fn new(hw: Arc<dyn AudioHardware>, id: DeviceId, options: HwOptions) -> Self {
        Self::with_bridge(hw, id, options, IoBridge::new(BridgeRole::Primary))
    }

    /// A session that only captures input for a primary session.
    pub fn slave(hw: Arc<dyn AudioHardware>, id: DeviceId, options: HwOptions) -> Self {
        Self::with_bridge(hw, id, options, IoBridge::new(BridgeRole::Slave))
    }

    /// A session whose callback reads its inputs from `slave`.
    pub fn primary_with_slave(
        hw: Arc<dyn AudioHardware>,
        id: DeviceId,
        options: HwOptions,
        slave: &DeviceSession,
    ) -> Self {
        let bridge = IoBridge::with_slave(slave.bridge());
        let primary = Self::with_bridge(hw, id, options, bridge);
        slave.inner.lock().primary = Some(Arc::downgrade(&primary.inner));
        primary
    }

    fn with_bridge(
        hw: Arc<dyn AudioHardware>,
        id: DeviceId,
        options: HwOptions,
        bridge: IoBridge,
    ) -> Self {
        let callbacks_allowed = Arc::new(AtomicBool::new(true));
        let mut inner = SessionInner {
            hw: Arc::clone(&hw),
            id,
            options,
            bridge: Arc::new(bridge),
            details: DeviceDetails::default(),
            active_inputs: ChannelMask::new(),
            active_outputs: ChannelMask::new(),
            opened: false,
            failed: !id.is_valid(),
            io_proc: None,
            callback: None,
            capturing: false,
            primary: None,
            last_error: None,
            callbacks_allowed: Arc::clone(&callbacks_allowed),
        };
        if inner.failed {
            warn!("device {} is invalid", id);
            inner.last_error = Some(HwError::InvalidDevice(id));
            return Self {
                inner: Arc::new(Mutex::new(inner)),
                hw,
                id,
                device_listener: None,
                hardware_listener: None,
                refresh: None,
            };
        }

        inner.update_details();
        let inner = Arc::new(Mutex::new(inner));
        let mut session = Self {
            inner: Arc::clone(&inner),
            hw: Arc::clone(&hw),
            id,
            device_listener: None,
            hardware_listener: None,
            refresh: None,
        };

        let weak: Weak<Mutex<SessionInner>> = Arc::downgrade(&inner);
        let worker = RefreshWorker::spawn(&id.0.to_string(), options.refresh_debounce(), move || {
            match weak.upgrade() {
                Some(inner) => {
                    run_refresh(&inner);
                    true
                }
                None => false,
            }
        });
        let worker = match worker {
            Ok(worker) => worker,
            Err(e) => {
                warn!("device {}: no refresh worker, changes will be missed: {}", id, e);
                return session;
            }
        };

        let notifier = worker.notifier();
        let allowed = Arc::clone(&callbacks_allowed);
        let device_listener = hw.add_device_listener(
            id,
            Arc::new(move |_: DeviceId, change: PropertyChange| {
                if change.needs_refresh() && allowed.load(Ordering::Acquire) {
                    notifier.notify();
                }
            }),
        );
        let notifier = worker.notifier();
        let allowed = callbacks_allowed;
        let hardware_listener = hw.add_hardware_listener(Arc::new(move |_: HardwareChange| {
            if allowed.load(Ordering::Acquire) {
                notifier.notify();
            }
        }));
        session.device_listener = device_listener
            .inspect_err(|e| warn!("device {}: property listener not installed: {}", id, e))
            .ok();
        session.hardware_listener = hardware_listener
            .inspect_err(|e| warn!("device {}: hardware listener not installed: {}", id, e))
            .ok();
        session.refresh = Some(worker);
        session
    }

    pub fn id(&self) -> DeviceId {
        self.id
    }

    pub fn hardware(&self) -> &Arc<dyn AudioHardware> {
        &self.hw
    }

    pub(crate) fn bridge(&self) -> Arc<IoBridge> {
        Arc::clone(&self.inner.lock().bridge)
    }

    pub fn state(&self) -> SessionState {
        self.inner.lock().state()
    }

    /// True while an IOProc is registered and the hardware clock runs,
    /// whether or not a callback is attached.
    pub fn is_started(&self) -> bool {
        self.inner.lock().io_proc.is_some()
    }

    /// True while a callback is attached, or for a slave, while it captures.
    pub fn is_playing(&self) -> bool {
        self.inner.lock().is_playing()
    }

    pub fn last_error(&self) -> Option<HwError> {
        self.inner.lock().last_error.clone()
    }

    pub fn open(
        &self,
        inputs: &ChannelMask,
        outputs: &ChannelMask,
        sample_rate: f64,
        buffer_size: usize,
    ) -> HwResult<()> {
        self.inner
            .lock()
            .open(inputs, outputs, sample_rate, buffer_size)
    }

    /// Registers the IOProc and starts the clock if not already running,
    /// then publishes `callback`.
    pub fn start(&self, callback: Arc<dyn AudioIoCallback>) -> HwResult<()> {
        self.inner.lock().start(callback)
    }

    /// Starts the clock of a slave session so its input reaches the
    /// primary. No application callback is attached.
    pub fn start_capture(&self) -> HwResult<()> {
        self.inner.lock().start_capture()
    }

    /// Detaches the callback and hands it back. Unless `leave_running`, also
    /// stops the hardware and waits for it to confirm.
    pub fn stop(&self, leave_running: bool) -> Option<Arc<dyn AudioIoCallback>> {
        self.inner.lock().stop(leave_running)
    }

    /// Applies a pending hardware change immediately instead of waiting for
    /// the debounce window.
    pub fn refresh_now(&self) {
        run_refresh(&self.inner);
    }

    pub(crate) fn rebuild_routing(&self) {
        self.inner.lock().rebuild_routing();
    }

    pub fn details(&self) -> DeviceDetails {
        self.inner.lock().details.clone()
    }

    pub fn name(&self) -> String {
        self.inner.lock().details.name.clone()
    }

    pub fn sample_rate(&self) -> f64 {
        self.inner.lock().details.sample_rate
    }

    pub fn buffer_size(&self) -> usize {
        self.inner.lock().details.buffer_size
    }

    pub fn active_channels(&self, direction: Direction) -> ChannelMask {
        let inner = self.inner.lock();
        match direction {
            Direction::Input => inner.active_inputs.clone(),
            Direction::Output => inner.active_outputs.clone(),
        }
    }

    pub fn snapshot(&self) -> DeviceSnapshot {
        let inner = self.inner.lock();
        DeviceSnapshot {
            name: inner.details.name.clone(),
            sample_rate: inner.details.sample_rate,
            buffer_size: inner.details.buffer_size,
            input_channels: inner.active_inputs.count(),
            output_channels: inner.active_outputs.count(),
            input_latency: inner.details.input_latency,
            output_latency: inner.details.output_latency,
        }
    }

    pub fn data_source_names(&self, direction: Direction) -> Vec<String> {
        if !self.id.is_valid() {
            return Vec::new();
        }
        best_effort(
            self.id,
            "data sources",
            self.hw.data_sources(self.id, direction),
            Vec::new(),
        )
        .into_iter()
        .map(|s| s.name)
        .collect()
    }

    pub fn current_data_source(&self, direction: Direction) -> Option<usize> {
        if !self.id.is_valid() {
            return None;
        }
        let sources = self.hw.data_sources(self.id, direction).ok()?;
        let current = self.hw.current_data_source(self.id, direction).ok()?;
        sources.iter().position(|s| s.id == current)
    }

    /// Selects a source by its index in `data_source_names`. Out-of-range
    /// indices are ignored.
    pub fn set_data_source(&self, direction: Direction, index: usize) -> HwResult<()> {
        if !self.id.is_valid() {
            return Err(HwError::InvalidDevice(self.id));
        }
        let sources = self.hw.data_sources(self.id, direction)?;
        match sources.get(index) {
            Some(source) => self.hw.set_data_source(self.id, direction, source.id),
            None => {
                debug!("device {}: no data source {}", self.id, index);
                Ok(())
            }
        }
    }

    /// A related input-only device that can act as this output-only
    /// device's slave input.
    pub fn related_input(&self) -> Option<DeviceId> {
        related_input_for(self.hw.as_ref(), self.id)
    }
}

/// Finds a related device to pair with `id` as its input. Only an
/// output-only device is paired, and only with an input-only device;
/// anything with matching directionality is skipped.
pub fn related_input_for(hw: &dyn AudioHardware, id: DeviceId) -> Option<DeviceId> {
    if !id.is_valid() {
        return None;
    }
    let channels = |id: DeviceId, direction: Direction| {
        hw.stream_layout(id, direction)
            .map(|l| l.total_channels())
            .unwrap_or(0)
    };
    if channels(id, Direction::Output) == 0 || channels(id, Direction::Input) != 0 {
        return None;
    }
    let related = best_effort(id, "related devices", hw.related_devices(id), Vec::new());
    related.into_iter().find(|&candidate| {
        candidate != id
            && candidate.is_valid()
            && channels(candidate, Direction::Input) > 0
            && channels(candidate, Direction::Output) == 0
    })
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        if let Some(listener) = self.device_listener.take()
            && let Err(e) = self.hw.remove_device_listener(self.id, listener)
        {
            debug!("device {}: {}", self.id, e);
        }
        if let Some(listener) = self.hardware_listener.take()
            && let Err(e) = self.hw.remove_hardware_listener(listener)
        {
            debug!("device {}: {}", self.id, e);
        }
        {
            let mut inner = self.inner.lock();
            inner.callbacks_allowed.store(false, Ordering::Release);
            if !inner.failed {
                drop(inner.stop(false));
            }
        }
        if let Some(mut worker) = self.refresh.take() {
            worker.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hw::options::RetryPolicy;
    use crate::hw::sim::{SimDeviceSpec, SimulatedHardware};

    fn quick_options() -> HwOptions {
        HwOptions {
            settle: RetryPolicy::fixed(5, 1),
            stop: RetryPolicy::fixed(5, 1),
            refresh_debounce_ms: 5,
            ..HwOptions::default()
        }
    }

    #[test]
    fn invalid_device_is_permanently_failed() {
        let hw: Arc<dyn AudioHardware> = Arc::new(SimulatedHardware::new());
        let session = DeviceSession::new(hw, DeviceId::INVALID, quick_options());
        assert_eq!(session.state(), SessionState::Failed);
        let err = session
            .open(&ChannelMask::first(2), &ChannelMask::first(2), 48_000.0, 512)
            .unwrap_err();
        assert_eq!(err, HwError::InvalidDevice(DeviceId::INVALID));
        assert_eq!(session.last_error(), Some(err));
    }

    #[test]
    fn masks_are_clamped_to_named_channels() {
        let sim = Arc::new(SimulatedHardware::new());
        let id = sim.add_device(SimDeviceSpec::duplex("d", 2, 4));
        let session = DeviceSession::new(sim, id, quick_options());
        let inputs: ChannelMask = [0, 1, 5, 70].into_iter().collect();
        session
            .open(&inputs, &ChannelMask::first(200), 48_000.0, 512)
            .unwrap();
        assert_eq!(session.active_channels(Direction::Input), ChannelMask::first(2));
        assert_eq!(session.active_channels(Direction::Output), ChannelMask::first(4));
        assert_eq!(session.snapshot().input_latency, 1024);
    }

    #[test]
    fn pairs_output_only_with_input_only() {
        let sim = Arc::new(SimulatedHardware::new());
        let out = sim.add_device(SimDeviceSpec::output("out", 2));
        let dup = sim.add_device(SimDeviceSpec::duplex("dup", 2, 2));
        let inp = sim.add_device(SimDeviceSpec::input("in", 2));
        sim.set_related(out, &[dup, inp]);
        let hw: Arc<dyn AudioHardware> = sim;

        let session = DeviceSession::new(Arc::clone(&hw), out, quick_options());
        assert_eq!(session.related_input(), Some(inp));
        let duplex = DeviceSession::new(Arc::clone(&hw), dup, quick_options());
        assert_eq!(duplex.related_input(), None);
    }

    #[test]
    fn dropping_unregisters_listeners() {
        let sim = Arc::new(SimulatedHardware::new());
        let id = sim.add_device(SimDeviceSpec::duplex("d", 2, 2));
        let session = DeviceSession::new(Arc::clone(&sim) as Arc<dyn AudioHardware>, id, quick_options());
        assert_eq!(sim.device_listener_count(id), 1);
        assert_eq!(sim.hardware_listener_count(), 1);
        drop(session);
        assert_eq!(sim.device_listener_count(id), 0);
        assert_eq!(sim.hardware_listener_count(), 0);
    }
}

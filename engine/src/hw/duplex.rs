//! Composes one or two device sessions into a single logical I/O device.

use super::error::{HwError, HwResult};
use super::formats::default_buffer_size;
use super::mask::ChannelMask;
use super::options::HwOptions;
use super::session::DeviceSession;
use super::traits::{AudioHardware, AudioIoCallback};
use super::types::{DeviceId, Direction};
use std::sync::Arc;
use tracing::{info, warn};

/// A single duplex-capable device, or an output device driven together
/// with a separate input-only device.
pub enum DeviceLayout {
    Single(DeviceSession),
    /// `secondary` only captures; `primary` runs the callback and reads
    /// its inputs from the secondary's scratch buffers.
    Paired {
        primary: DeviceSession,
        secondary: DeviceSession,
    },
}

impl DeviceLayout {
    pub fn single(hw: Arc<dyn AudioHardware>, id: DeviceId, options: HwOptions) -> Self {
        DeviceLayout::Single(DeviceSession::new(hw, id, options))
    }

    /// Picks the composition for an output/input selection. Either id may
    /// be invalid when that direction is unused.
    pub fn for_devices(
        hw: Arc<dyn AudioHardware>,
        output: DeviceId,
        input: DeviceId,
        options: HwOptions,
    ) -> Self {
        if !output.is_valid() || output == input {
            return Self::single(hw, input, options);
        }
        if !input.is_valid() {
            return Self::single(hw, output, options);
        }
        let secondary = DeviceSession::slave(Arc::clone(&hw), input, options);
        let primary = DeviceSession::primary_with_slave(hw, output, options, &secondary);
        DeviceLayout::Paired { primary, secondary }
    }

    pub fn primary(&self) -> &DeviceSession {
        match self {
            DeviceLayout::Single(session) => session,
            DeviceLayout::Paired { primary, .. } => primary,
        }
    }

    pub fn secondary(&self) -> Option<&DeviceSession> {
        match self {
            DeviceLayout::Single(_) => None,
            DeviceLayout::Paired { secondary, .. } => Some(secondary),
        }
    }

    pub fn is_paired(&self) -> bool {
        matches!(self, DeviceLayout::Paired { .. })
    }

    /// Opens both sessions with the same request and merges their errors.
    pub fn open(
        &self,
        inputs: &ChannelMask,
        outputs: &ChannelMask,
        sample_rate: f64,
        buffer_size: usize,
    ) -> HwResult<()> {
        match self {
            DeviceLayout::Single(session) => {
                session.open(inputs, outputs, sample_rate, buffer_size)
            }
            DeviceLayout::Paired { primary, secondary } => {
                let mut errors = Vec::new();
                if let Err(e) = primary.open(inputs, outputs, sample_rate, buffer_size) {
                    errors.push(e);
                }
                if let Err(e) = secondary.open(inputs, outputs, sample_rate, buffer_size) {
                    errors.push(e);
                }
                // The primary sizes its inputs from the slave's routing.
                primary.rebuild_routing();
                match HwError::collect(errors) {
                    Some(e) => Err(e),
                    None => Ok(()),
                }
            }
        }
    }

    /// Starts every session. Paired devices must agree on buffer size; the
    /// secondary only captures and never sees `callback`.
    pub fn start(&self, callback: Arc<dyn AudioIoCallback>) -> HwResult<()> {
        match self {
            DeviceLayout::Single(session) => session.start(callback),
            DeviceLayout::Paired { primary, secondary } => {
                let (output, input) = (primary.buffer_size(), secondary.buffer_size());
                if output != input {
                    warn!(
                        "refusing to start {} + {}: buffer sizes {} and {} differ",
                        primary.id(),
                        secondary.id(),
                        output,
                        input
                    );
                    return Err(HwError::BufferSizeMismatch { output, input });
                }
                secondary.start_capture()?;
                if let Err(e) = primary.start(callback) {
                    drop(secondary.stop(false));
                    return Err(e);
                }
                Ok(())
            }
        }
    }

    /// Stops every session and returns the callback the primary detached.
    pub fn stop(&self, leave_running: bool) -> Option<Arc<dyn AudioIoCallback>> {
        let detached = self.primary().stop(leave_running);
        if let Some(secondary) = self.secondary() {
            drop(secondary.stop(leave_running));
        }
        detached
    }

    /// A secondary's refresh is handed on to the primary.
    pub fn refresh_now(&self) {
        self.primary().refresh_now();
        if let Some(secondary) = self.secondary() {
            secondary.refresh_now();
        }
    }

    /// Session supplying input channels.
    pub fn input_session(&self) -> &DeviceSession {
        self.secondary().unwrap_or(self.primary())
    }
}

/// The device surface applications and configuration UIs talk to.
pub struct AudioIoDevice {
    name: String,
    layout: DeviceLayout,
    output_index: Option<usize>,
    input_index: Option<usize>,
    open: bool,
    started: bool,
    last_error: Option<HwError>,
}

impl AudioIoDevice {
    pub fn new(name: impl Into<String>, layout: DeviceLayout) -> Self {
        let last_error = layout.primary().last_error();
        Self {
            name: name.into(),
            layout,
            output_index: None,
            input_index: None,
            open: false,
            started: false,
            last_error,
        }
    }

    pub(crate) fn with_indices(mut self, output: Option<usize>, input: Option<usize>) -> Self {
        self.output_index = output;
        self.input_index = input;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn layout(&self) -> &DeviceLayout {
        &self.layout
    }

    /// Position in the enumerator's list for `direction`, when created
    /// through it.
    pub fn index(&self, direction: Direction) -> Option<usize> {
        match direction {
            Direction::Input => self.input_index,
            Direction::Output => self.output_index,
        }
    }

    /// Opens with the requested configuration. A buffer size of zero picks
    /// the default size. A started device is stopped first.
    pub fn open(
        &mut self,
        inputs: &ChannelMask,
        outputs: &ChannelMask,
        sample_rate: f64,
        buffer_size: usize,
    ) -> HwResult<()> {
        self.stop();
        let buffer_size = if buffer_size == 0 {
            self.default_buffer_size()
        } else {
            buffer_size
        };
        let result = self.layout.open(inputs, outputs, sample_rate, buffer_size);
        self.open = result.is_ok();
        self.last_error = result.as_ref().err().cloned();
        if self.open {
            info!("{} open at {} Hz, {} frames", self.name, sample_rate, buffer_size);
        }
        result
    }

    pub fn close(&mut self) {
        self.stop();
        drop(self.layout.stop(false));
        self.open = false;
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Announces the negotiated configuration to `callback`, then starts
    /// streaming into it. A no-op while already playing.
    pub fn start(&mut self, callback: Arc<dyn AudioIoCallback>) -> HwResult<()> {
        if self.is_playing() {
            return Ok(());
        }
        let mut snapshot = self.layout.primary().snapshot();
        snapshot.name = self.name.clone();
        snapshot.input_channels = self.active_input_channels().count();
        snapshot.input_latency = self.input_latency();
        callback.about_to_start(&snapshot);

        let result = self.layout.start(callback);
        self.started = result.is_ok();
        if let Err(e) = &result {
            self.last_error = Some(e.clone());
        }
        result
    }

    /// Detaches the callback, leaving the hardware clock running, and tells
    /// the callback it has stopped.
    pub fn stop(&mut self) {
        if !self.started {
            return;
        }
        self.started = false;
        if let Some(callback) = self.layout.stop(true) {
            callback.stopped();
        }
    }

    /// False once a hardware change dropped the callback.
    pub fn is_playing(&mut self) -> bool {
        if !self.layout.primary().is_playing() {
            self.started = false;
        }
        self.started
    }

    pub fn last_error(&self) -> Option<&HwError> {
        self.last_error.as_ref()
    }

    pub fn last_error_text(&self) -> String {
        self.last_error
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_default()
    }

    pub fn output_channel_names(&self) -> Vec<String> {
        self.layout.primary().details().output_names
    }

    pub fn input_channel_names(&self) -> Vec<String> {
        self.layout.input_session().details().input_names
    }

    pub fn available_sample_rates(&self) -> Vec<f64> {
        self.layout.primary().details().sample_rates
    }

    pub fn available_buffer_sizes(&self) -> Vec<usize> {
        self.layout.primary().details().buffer_sizes
    }

    /// First available size of at least 512 frames.
    pub fn default_buffer_size(&self) -> usize {
        default_buffer_size(&self.available_buffer_sizes())
    }

    pub fn current_sample_rate(&self) -> f64 {
        self.layout.primary().sample_rate()
    }

    pub fn current_buffer_size(&self) -> usize {
        self.layout.primary().buffer_size()
    }

    pub fn current_bit_depth(&self) -> u32 {
        32
    }

    pub fn active_output_channels(&self) -> ChannelMask {
        self.layout.primary().active_channels(Direction::Output)
    }

    pub fn active_input_channels(&self) -> ChannelMask {
        let mut mask = self.layout.primary().active_channels(Direction::Input);
        if let Some(secondary) = self.layout.secondary() {
            mask.or_with(&secondary.active_channels(Direction::Input));
        }
        mask
    }

    pub fn output_latency(&self) -> usize {
        self.layout.primary().details().output_latency
    }

    pub fn input_latency(&self) -> usize {
        self.layout.input_session().details().input_latency
    }

    pub fn data_source_names(&self, direction: Direction) -> Vec<String> {
        self.session_for(direction).data_source_names(direction)
    }

    pub fn current_data_source(&self, direction: Direction) -> Option<usize> {
        self.session_for(direction).current_data_source(direction)
    }

    pub fn set_data_source(&self, direction: Direction, index: usize) -> HwResult<()> {
        self.session_for(direction).set_data_source(direction, index)
    }

    fn session_for(&self, direction: Direction) -> &DeviceSession {
        match direction {
            Direction::Input => self.layout.input_session(),
            Direction::Output => self.layout.primary(),
        }
    }
}

impl Drop for AudioIoDevice {
    fn drop(&mut self) {
        self.stop();
    }
}

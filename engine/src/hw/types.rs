use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque hardware device handle. Zero is reserved as the invalid sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct DeviceId(pub u32);

impl DeviceId {
    pub const INVALID: DeviceId = DeviceId(0);

    pub fn is_valid(self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Input,
    Output,
}

impl Direction {
    pub fn label(self) -> &'static str {
        match self {
            Direction::Input => "input",
            Direction::Output => "output",
        }
    }

    pub fn is_input(self) -> bool {
        self == Direction::Input
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValueRange {
    pub minimum: f64,
    pub maximum: f64,
}

impl ValueRange {
    pub fn new(minimum: f64, maximum: f64) -> Self {
        Self { minimum, maximum }
    }

    pub fn single(value: f64) -> Self {
        Self::new(value, value)
    }

    pub fn contains_within(&self, value: f64, tolerance: f64) -> bool {
        value >= self.minimum - tolerance && value <= self.maximum + tolerance
    }
}

/// Channels per interleaved hardware stream, in stream order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamLayout {
    pub streams: Vec<usize>,
}

impl StreamLayout {
    pub fn new(streams: Vec<usize>) -> Self {
        Self { streams }
    }

    pub fn total_channels(&self) -> usize {
        self.streams.iter().sum()
    }
}

/// Device-level properties the hardware reports changes for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyChange {
    BufferFrameSize,
    NominalSampleRate,
    StreamFormat,
    StreamConfiguration,
    DeviceIsAlive,
    DeviceIsRunning,
    DataSource,
    Volume,
    Other(u32),
}

impl PropertyChange {
    /// Changes that can alter buffer geometry and need a refresh.
    pub fn needs_refresh(self) -> bool {
        matches!(
            self,
            PropertyChange::BufferFrameSize
                | PropertyChange::NominalSampleRate
                | PropertyChange::StreamFormat
                | PropertyChange::StreamConfiguration
                | PropertyChange::DeviceIsAlive
        )
    }
}

/// System-level changes, not tied to one device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HardwareChange {
    DevicesChanged,
    DefaultInputChanged,
    DefaultOutputChanged,
    Other(u32),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataSource {
    pub id: u32,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IoProcId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ListenerId(pub u64);

/// One interleaved input stream as delivered by the hardware for a cycle.
#[derive(Debug, Clone, Copy)]
pub struct InterleavedStream<'a> {
    pub channels: usize,
    pub samples: &'a [f32],
}

impl<'a> InterleavedStream<'a> {
    pub const EMPTY: InterleavedStream<'static> = InterleavedStream {
        channels: 0,
        samples: &[],
    };

    pub fn new(channels: usize, samples: &'a [f32]) -> Self {
        Self { channels, samples }
    }
}

/// One interleaved output stream the hardware expects filled for a cycle.
#[derive(Debug)]
pub struct InterleavedStreamMut<'a> {
    pub channels: usize,
    pub samples: &'a mut [f32],
}

impl<'a> InterleavedStreamMut<'a> {
    pub fn new(channels: usize, samples: &'a mut [f32]) -> Self {
        Self { channels, samples }
    }

    pub fn empty() -> InterleavedStreamMut<'static> {
        InterleavedStreamMut {
            channels: 0,
            samples: &mut [],
        }
    }
}

/// Negotiated configuration handed to `AudioIoCallback::about_to_start`.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceSnapshot {
    pub name: String,
    pub sample_rate: f64,
    pub buffer_size: usize,
    pub input_channels: usize,
    pub output_channels: usize,
    pub input_latency: usize,
    pub output_latency: usize,
}

use super::error::HwResult;
use super::scratch::{InputBuffers, OutputBuffers};
use super::types::{
    DataSource, DeviceId, DeviceSnapshot, Direction, HardwareChange, InterleavedStream,
    InterleavedStreamMut, IoProcId, ListenerId, PropertyChange, StreamLayout, ValueRange,
};
use std::sync::Arc;

/// Invoked from the hardware notification context. Must only flag work.
pub type DeviceListener = Arc<dyn Fn(DeviceId, PropertyChange) + Send + Sync>;
pub type HardwareListener = Arc<dyn Fn(HardwareChange) + Send + Sync>;

/// Entry point the hardware calls on its real-time I/O thread.
pub trait IoHandler: Send + Sync {
    fn on_interrupt(
        &self,
        inputs: &[InterleavedStream<'_>],
        outputs: &mut [InterleavedStreamMut<'_>],
    );
}

/// Application audio callback.
pub trait AudioIoCallback: Send + Sync {
    fn about_to_start(&self, _device: &DeviceSnapshot) {}

    /// Runs on the real-time thread: no allocation, no blocking.
    fn process(&self, inputs: &InputBuffers<'_>, outputs: &mut OutputBuffers<'_>, frames: usize);

    fn stopped(&self) {}
}

/// Hardware query/set surface of one audio backend.
pub trait AudioHardware: Send + Sync {
    fn device_ids(&self) -> HwResult<Vec<DeviceId>>;
    fn default_device(&self, direction: Direction) -> HwResult<DeviceId>;
    fn device_name(&self, id: DeviceId) -> HwResult<String>;
    fn stream_layout(&self, id: DeviceId, direction: Direction) -> HwResult<StreamLayout>;

    fn sample_rate(&self, id: DeviceId) -> HwResult<f64>;
    fn set_sample_rate(&self, id: DeviceId, direction: Direction, rate: f64) -> HwResult<()>;
    fn buffer_size(&self, id: DeviceId) -> HwResult<u32>;
    fn set_buffer_size(&self, id: DeviceId, direction: Direction, frames: u32) -> HwResult<()>;
    fn sample_rate_ranges(&self, id: DeviceId) -> HwResult<Vec<ValueRange>>;
    fn buffer_size_ranges(&self, id: DeviceId) -> HwResult<Vec<ValueRange>>;
    fn latency(&self, id: DeviceId, direction: Direction) -> HwResult<u32>;
    fn is_running(&self, id: DeviceId) -> HwResult<bool>;
    fn related_devices(&self, id: DeviceId) -> HwResult<Vec<DeviceId>>;

    fn data_sources(&self, id: DeviceId, direction: Direction) -> HwResult<Vec<DataSource>>;
    fn current_data_source(&self, id: DeviceId, direction: Direction) -> HwResult<u32>;
    fn set_data_source(&self, id: DeviceId, direction: Direction, source: u32) -> HwResult<()>;

    fn create_io_proc(&self, id: DeviceId, handler: Arc<dyn IoHandler>) -> HwResult<IoProcId>;
    fn destroy_io_proc(&self, id: DeviceId, proc_id: IoProcId) -> HwResult<()>;
    fn start(&self, id: DeviceId, proc_id: IoProcId) -> HwResult<()>;
    fn stop(&self, id: DeviceId, proc_id: IoProcId) -> HwResult<()>;

    fn add_device_listener(&self, id: DeviceId, listener: DeviceListener) -> HwResult<ListenerId>;
    fn remove_device_listener(&self, id: DeviceId, listener: ListenerId) -> HwResult<()>;
    fn add_hardware_listener(&self, listener: HardwareListener) -> HwResult<ListenerId>;
    fn remove_hardware_listener(&self, listener: ListenerId) -> HwResult<()>;
}

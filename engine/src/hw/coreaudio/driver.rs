#![cfg(target_os = "macos")]

use super::device;
use super::ioproc::IoProcRegistration;
use super::latency::device_latency;
use super::listener::ListenerRegistration;
use crate::hw::error::{HwError, HwResult};
use crate::hw::error_fmt::BAD_OBJECT;
use crate::hw::traits::{AudioHardware, DeviceListener, HardwareListener, IoHandler};
use crate::hw::types::{
    DataSource, DeviceId, Direction, IoProcId, ListenerId, StreamLayout, ValueRange,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// The system's CoreAudio HAL.
#[derive(Default)]
pub struct CoreAudioHardware {
    io_procs: Mutex<HashMap<IoProcId, IoProcRegistration>>,
    listeners: Mutex<HashMap<ListenerId, ListenerRegistration>>,
    next_id: AtomicU64,
}

impl CoreAudioHardware {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn with_proc<R>(
        &self,
        proc_id: IoProcId,
        f: impl FnOnce(&IoProcRegistration) -> HwResult<R>,
    ) -> HwResult<R> {
        let procs = self.io_procs.lock();
        let registration = procs
            .get(&proc_id)
            .ok_or(HwError::status("io proc", BAD_OBJECT))?;
        f(registration)
    }
}

impl AudioHardware for CoreAudioHardware {
    fn device_ids(&self) -> HwResult<Vec<DeviceId>> {
        Ok(device::device_ids()?.into_iter().map(DeviceId).collect())
    }

    fn default_device(&self, direction: Direction) -> HwResult<DeviceId> {
        device::default_device(direction).map(DeviceId)
    }

    fn device_name(&self, id: DeviceId) -> HwResult<String> {
        device::device_name(id.0)
    }

    fn stream_layout(&self, id: DeviceId, direction: Direction) -> HwResult<StreamLayout> {
        device::stream_layout(id.0, direction)
    }

    fn sample_rate(&self, id: DeviceId) -> HwResult<f64> {
        device::sample_rate(id.0)
    }

    fn set_sample_rate(&self, id: DeviceId, direction: Direction, rate: f64) -> HwResult<()> {
        device::set_sample_rate(id.0, direction, rate)
    }

    fn buffer_size(&self, id: DeviceId) -> HwResult<u32> {
        device::buffer_size(id.0)
    }

    fn set_buffer_size(&self, id: DeviceId, direction: Direction, frames: u32) -> HwResult<()> {
        device::set_buffer_size(id.0, direction, frames)
    }

    fn sample_rate_ranges(&self, id: DeviceId) -> HwResult<Vec<ValueRange>> {
        device::sample_rate_ranges(id.0)
    }

    fn buffer_size_ranges(&self, id: DeviceId) -> HwResult<Vec<ValueRange>> {
        device::buffer_size_ranges(id.0)
    }

    fn latency(&self, id: DeviceId, direction: Direction) -> HwResult<u32> {
        device_latency(id.0, direction)
    }

    fn is_running(&self, id: DeviceId) -> HwResult<bool> {
        device::is_running(id.0)
    }

    fn related_devices(&self, id: DeviceId) -> HwResult<Vec<DeviceId>> {
        Ok(device::related_devices(id.0)?
            .into_iter()
            .map(DeviceId)
            .collect())
    }

    fn data_sources(&self, id: DeviceId, direction: Direction) -> HwResult<Vec<DataSource>> {
        device::data_sources(id.0, direction)
    }

    fn current_data_source(&self, id: DeviceId, direction: Direction) -> HwResult<u32> {
        device::current_data_source(id.0, direction)
    }

    fn set_data_source(&self, id: DeviceId, direction: Direction, source: u32) -> HwResult<()> {
        device::set_data_source(id.0, direction, source)
    }

    fn create_io_proc(&self, id: DeviceId, handler: Arc<dyn IoHandler>) -> HwResult<IoProcId> {
        let registration = IoProcRegistration::create(id.0, handler)?;
        let proc_id = IoProcId(self.next_id());
        self.io_procs.lock().insert(proc_id, registration);
        debug!("device {}: created io proc {:?}", id, proc_id);
        Ok(proc_id)
    }

    fn destroy_io_proc(&self, id: DeviceId, proc_id: IoProcId) -> HwResult<()> {
        let registration = self.io_procs.lock().remove(&proc_id);
        match registration {
            // Destroying blocks on the I/O thread, so it happens outside the lock.
            Some(registration) => {
                drop(registration);
                debug!("device {}: destroyed io proc {:?}", id, proc_id);
                Ok(())
            }
            None => Err(HwError::status("destroy io proc", BAD_OBJECT)),
        }
    }

    fn start(&self, _id: DeviceId, proc_id: IoProcId) -> HwResult<()> {
        self.with_proc(proc_id, IoProcRegistration::start)
    }

    fn stop(&self, _id: DeviceId, proc_id: IoProcId) -> HwResult<()> {
        self.with_proc(proc_id, IoProcRegistration::stop)
    }

    fn add_device_listener(&self, id: DeviceId, listener: DeviceListener) -> HwResult<ListenerId> {
        let registration = ListenerRegistration::device(id, listener)?;
        let listener_id = ListenerId(self.next_id());
        self.listeners.lock().insert(listener_id, registration);
        Ok(listener_id)
    }

    fn remove_device_listener(&self, _id: DeviceId, listener: ListenerId) -> HwResult<()> {
        self.remove_hardware_listener(listener)
    }

    fn add_hardware_listener(&self, listener: HardwareListener) -> HwResult<ListenerId> {
        let registration = ListenerRegistration::hardware(listener)?;
        let listener_id = ListenerId(self.next_id());
        self.listeners.lock().insert(listener_id, registration);
        Ok(listener_id)
    }

    fn remove_hardware_listener(&self, listener: ListenerId) -> HwResult<()> {
        let registration = self.listeners.lock().remove(&listener);
        match registration {
            Some(registration) => {
                drop(registration);
                Ok(())
            }
            None => Err(HwError::status("remove listener", BAD_OBJECT)),
        }
    }
}

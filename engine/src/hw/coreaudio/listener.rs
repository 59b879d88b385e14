#![cfg(target_os = "macos")]

//! Wildcard property listeners on devices and on the system object.

use super::device::check;
use crate::hw::error::HwResult;
use crate::hw::traits::{DeviceListener, HardwareListener};
use crate::hw::types::{DeviceId, HardwareChange, PropertyChange};
use coreaudio_sys::{
    AudioObjectAddPropertyListener, AudioObjectID, AudioObjectPropertyAddress,
    AudioObjectRemovePropertyListener, OSStatus, UInt32, kAudioDevicePropertyBufferFrameSize,
    kAudioDevicePropertyDataSource, kAudioDevicePropertyDeviceIsAlive,
    kAudioDevicePropertyDeviceIsRunning, kAudioDevicePropertyNominalSampleRate,
    kAudioDevicePropertyStreamConfiguration, kAudioDevicePropertyVolumeScalar,
    kAudioHardwarePropertyDefaultInputDevice, kAudioHardwarePropertyDefaultOutputDevice,
    kAudioHardwarePropertyDevices, kAudioObjectPropertyElementWildcard,
    kAudioObjectPropertyScopeWildcard, kAudioObjectPropertySelectorWildcard,
    kAudioObjectSystemObject, kAudioStreamPropertyPhysicalFormat,
    kAudioStreamPropertyVirtualFormat,
};
use std::os::raw::c_void;
use tracing::warn;

const WILDCARD: AudioObjectPropertyAddress = AudioObjectPropertyAddress {
    mSelector: kAudioObjectPropertySelectorWildcard,
    mScope: kAudioObjectPropertyScopeWildcard,
    mElement: kAudioObjectPropertyElementWildcard,
};

pub fn property_change(selector: u32) -> PropertyChange {
    match selector {
        kAudioDevicePropertyBufferFrameSize => PropertyChange::BufferFrameSize,
        kAudioDevicePropertyNominalSampleRate => PropertyChange::NominalSampleRate,
        kAudioStreamPropertyVirtualFormat | kAudioStreamPropertyPhysicalFormat => {
            PropertyChange::StreamFormat
        }
        kAudioDevicePropertyStreamConfiguration => PropertyChange::StreamConfiguration,
        kAudioDevicePropertyDeviceIsAlive => PropertyChange::DeviceIsAlive,
        kAudioDevicePropertyDeviceIsRunning => PropertyChange::DeviceIsRunning,
        kAudioDevicePropertyDataSource => PropertyChange::DataSource,
        kAudioDevicePropertyVolumeScalar => PropertyChange::Volume,
        other => PropertyChange::Other(other),
    }
}

pub fn hardware_change(selector: u32) -> HardwareChange {
    match selector {
        kAudioHardwarePropertyDevices => HardwareChange::DevicesChanged,
        kAudioHardwarePropertyDefaultInputDevice => HardwareChange::DefaultInputChanged,
        kAudioHardwarePropertyDefaultOutputDevice => HardwareChange::DefaultOutputChanged,
        other => HardwareChange::Other(other),
    }
}

struct DeviceClient {
    device: DeviceId,
    listener: DeviceListener,
}

struct HardwareClient {
    listener: HardwareListener,
}

unsafe fn addresses<'a>(
    count: UInt32,
    addresses: *const AudioObjectPropertyAddress,
) -> &'a [AudioObjectPropertyAddress] {
    if addresses.is_null() {
        &[]
    } else {
        unsafe { std::slice::from_raw_parts(addresses, count as usize) }
    }
}

unsafe extern "C" fn device_proc(
    _object: AudioObjectID,
    count: UInt32,
    changed: *const AudioObjectPropertyAddress,
    client_data: *mut c_void,
) -> OSStatus {
    let client = unsafe { &*(client_data as *const DeviceClient) };
    for address in unsafe { addresses(count, changed) } {
        (client.listener)(client.device, property_change(address.mSelector));
    }
    0
}

unsafe extern "C" fn hardware_proc(
    _object: AudioObjectID,
    count: UInt32,
    changed: *const AudioObjectPropertyAddress,
    client_data: *mut c_void,
) -> OSStatus {
    let client = unsafe { &*(client_data as *const HardwareClient) };
    for address in unsafe { addresses(count, changed) } {
        (client.listener)(hardware_change(address.mSelector));
    }
    0
}

enum Client {
    Device(*mut DeviceClient),
    Hardware(*mut HardwareClient),
}

/// A listener installed on an audio object, removed on drop.
pub struct ListenerRegistration {
    object: AudioObjectID,
    client: Client,
}

unsafe impl Send for ListenerRegistration {}

type ListenerProc = unsafe extern "C" fn(
    AudioObjectID,
    UInt32,
    *const AudioObjectPropertyAddress,
    *mut c_void,
) -> OSStatus;

impl ListenerRegistration {
    pub fn device(device: DeviceId, listener: DeviceListener) -> HwResult<Self> {
        let client = Box::into_raw(Box::new(DeviceClient { device, listener }));
        Self::install(device.0, Client::Device(client))
    }

    pub fn hardware(listener: HardwareListener) -> HwResult<Self> {
        let client = Box::into_raw(Box::new(HardwareClient { listener }));
        Self::install(kAudioObjectSystemObject, Client::Hardware(client))
    }

    fn install(object: AudioObjectID, client: Client) -> HwResult<Self> {
        let registration = Self { object, client };
        let status = unsafe {
            AudioObjectAddPropertyListener(
                object,
                &WILDCARD,
                Some(registration.proc()),
                registration.client_ptr(),
            )
        };
        if let Err(e) = check("add property listener", status) {
            registration.free();
            std::mem::forget(registration);
            return Err(e);
        }
        Ok(registration)
    }

    fn proc(&self) -> ListenerProc {
        match self.client {
            Client::Device(_) => device_proc,
            Client::Hardware(_) => hardware_proc,
        }
    }

    fn client_ptr(&self) -> *mut c_void {
        match self.client {
            Client::Device(p) => p as *mut c_void,
            Client::Hardware(p) => p as *mut c_void,
        }
    }

    fn free(&self) {
        match self.client {
            Client::Device(p) => drop(unsafe { Box::from_raw(p) }),
            Client::Hardware(p) => drop(unsafe { Box::from_raw(p) }),
        }
    }
}

impl Drop for ListenerRegistration {
    fn drop(&mut self) {
        let status = unsafe {
            AudioObjectRemovePropertyListener(
                self.object,
                &WILDCARD,
                Some(self.proc()),
                self.client_ptr(),
            )
        };
        if let Err(e) = check("remove property listener", status) {
            warn!("object {}: {}", self.object, e);
        }
        self.free();
    }
}

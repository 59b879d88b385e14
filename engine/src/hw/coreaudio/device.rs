#![cfg(target_os = "macos")]

//! Typed property access on CoreAudio objects.

use crate::hw::error::{HwError, HwResult};
use crate::hw::types::{DataSource, Direction, StreamLayout, ValueRange};
use coreaudio_sys::{
    AudioBufferList, AudioDeviceID, AudioObjectGetPropertyData, AudioObjectGetPropertyDataSize,
    AudioObjectID, AudioObjectPropertyAddress, AudioObjectSetPropertyData, AudioValueRange,
    AudioValueTranslation, CFRelease, CFStringGetCString, CFStringRef, OSStatus, UInt32,
    kAudioDevicePropertyAvailableNominalSampleRates, kAudioDevicePropertyBufferFrameSize,
    kAudioDevicePropertyBufferFrameSizeRange, kAudioDevicePropertyDataSource,
    kAudioDevicePropertyDataSourceNameForIDCFString, kAudioDevicePropertyDataSources,
    kAudioDevicePropertyDeviceIsRunning, kAudioDevicePropertyDeviceNameCFString,
    kAudioDevicePropertyNominalSampleRate, kAudioDevicePropertyRelatedDevices,
    kAudioDevicePropertyStreamConfiguration, kAudioHardwareNoError,
    kAudioHardwarePropertyDefaultInputDevice, kAudioHardwarePropertyDefaultOutputDevice,
    kAudioHardwarePropertyDevices, kAudioObjectPropertyElementMain,
    kAudioObjectPropertyScopeGlobal, kAudioObjectPropertyScopeInput,
    kAudioObjectPropertyScopeOutput, kAudioObjectSystemObject,
};
use std::mem::{self, MaybeUninit};
use std::os::raw::c_void;
use std::ptr;

const UTF8_ENCODING: u32 = 0x0800_0100;

pub(super) fn address(selector: u32, scope: u32) -> AudioObjectPropertyAddress {
    AudioObjectPropertyAddress {
        mSelector: selector,
        mScope: scope,
        mElement: kAudioObjectPropertyElementMain,
    }
}

pub(super) fn scope(direction: Direction) -> u32 {
    match direction {
        Direction::Input => kAudioObjectPropertyScopeInput,
        Direction::Output => kAudioObjectPropertyScopeOutput,
    }
}

pub(super) fn check(operation: &'static str, status: OSStatus) -> HwResult<()> {
    if status == kAudioHardwareNoError as OSStatus {
        Ok(())
    } else {
        Err(HwError::status(operation, status))
    }
}

/// Reads a fixed-size plain-data property.
pub(super) fn get<T: Copy>(
    object: AudioObjectID,
    address: &AudioObjectPropertyAddress,
    operation: &'static str,
) -> HwResult<T> {
    let mut value = MaybeUninit::<T>::zeroed();
    let mut size = mem::size_of::<T>() as UInt32;
    let status = unsafe {
        AudioObjectGetPropertyData(
            object,
            address,
            0,
            ptr::null(),
            &mut size,
            value.as_mut_ptr() as *mut c_void,
        )
    };
    check(operation, status)?;
    Ok(unsafe { value.assume_init() })
}

/// Reads a property holding an array of plain-data elements.
pub(super) fn get_vec<T: Copy>(
    object: AudioObjectID,
    address: &AudioObjectPropertyAddress,
    operation: &'static str,
) -> HwResult<Vec<T>> {
    let mut size: UInt32 = 0;
    let status =
        unsafe { AudioObjectGetPropertyDataSize(object, address, 0, ptr::null(), &mut size) };
    check(operation, status)?;
    let count = size as usize / mem::size_of::<T>();
    if count == 0 {
        return Ok(Vec::new());
    }
    let mut values: Vec<T> = Vec::with_capacity(count);
    let status = unsafe {
        AudioObjectGetPropertyData(
            object,
            address,
            0,
            ptr::null(),
            &mut size,
            values.as_mut_ptr() as *mut c_void,
        )
    };
    check(operation, status)?;
    let written = (size as usize / mem::size_of::<T>()).min(count);
    unsafe { values.set_len(written) };
    Ok(values)
}

pub(super) fn set<T>(
    object: AudioObjectID,
    address: &AudioObjectPropertyAddress,
    value: &T,
    operation: &'static str,
) -> HwResult<()> {
    let status = unsafe {
        AudioObjectSetPropertyData(
            object,
            address,
            0,
            ptr::null(),
            mem::size_of::<T>() as UInt32,
            value as *const T as *const c_void,
        )
    };
    check(operation, status)
}

/// Copies and releases a CFString returned by the HAL.
fn take_cfstring(cf: CFStringRef) -> Option<String> {
    if cf.is_null() {
        return None;
    }
    let mut buf = [0i8; 256];
    let ok = unsafe { CFStringGetCString(cf, buf.as_mut_ptr(), buf.len() as _, UTF8_ENCODING) };
    unsafe { CFRelease(cf as *const c_void) };
    if ok == 0 {
        return None;
    }
    let c_str = unsafe { std::ffi::CStr::from_ptr(buf.as_ptr()) };
    c_str.to_str().ok().map(|s| s.to_owned())
}

pub fn device_ids() -> HwResult<Vec<AudioDeviceID>> {
    get_vec(
        kAudioObjectSystemObject,
        &address(kAudioHardwarePropertyDevices, kAudioObjectPropertyScopeGlobal),
        "list devices",
    )
}

pub fn default_device(direction: Direction) -> HwResult<AudioDeviceID> {
    let selector = match direction {
        Direction::Input => kAudioHardwarePropertyDefaultInputDevice,
        Direction::Output => kAudioHardwarePropertyDefaultOutputDevice,
    };
    get(
        kAudioObjectSystemObject,
        &address(selector, kAudioObjectPropertyScopeGlobal),
        "default device",
    )
}

pub fn device_name(id: AudioDeviceID) -> HwResult<String> {
    let cf: CFStringRef = get(
        id,
        &address(
            kAudioDevicePropertyDeviceNameCFString,
            kAudioObjectPropertyScopeGlobal,
        ),
        "device name",
    )?;
    Ok(take_cfstring(cf).unwrap_or_else(|| format!("Unknown ({id})")))
}

/// Channels per interleaved stream for one direction.
pub fn stream_layout(id: AudioDeviceID, direction: Direction) -> HwResult<StreamLayout> {
    let address = address(kAudioDevicePropertyStreamConfiguration, scope(direction));
    let mut size: UInt32 = 0;
    let status = unsafe { AudioObjectGetPropertyDataSize(id, &address, 0, ptr::null(), &mut size) };
    check("stream configuration", status)?;
    if size == 0 {
        return Ok(StreamLayout::default());
    }

    // u64 storage keeps the list aligned for its pointer members.
    let mut storage: Vec<u64> = vec![0; (size as usize).div_ceil(mem::size_of::<u64>())];
    let status = unsafe {
        AudioObjectGetPropertyData(
            id,
            &address,
            0,
            ptr::null(),
            &mut size,
            storage.as_mut_ptr() as *mut c_void,
        )
    };
    check("stream configuration", status)?;

    let list = storage.as_ptr() as *const AudioBufferList;
    let buffers = unsafe {
        std::slice::from_raw_parts((*list).mBuffers.as_ptr(), (*list).mNumberBuffers as usize)
    };
    Ok(StreamLayout::new(
        buffers.iter().map(|b| b.mNumberChannels as usize).collect(),
    ))
}

pub fn sample_rate(id: AudioDeviceID) -> HwResult<f64> {
    get(
        id,
        &address(
            kAudioDevicePropertyNominalSampleRate,
            kAudioObjectPropertyScopeGlobal,
        ),
        "get sample rate",
    )
}

pub fn set_sample_rate(id: AudioDeviceID, direction: Direction, rate: f64) -> HwResult<()> {
    set(
        id,
        &address(kAudioDevicePropertyNominalSampleRate, scope(direction)),
        &rate,
        "set sample rate",
    )
}

pub fn sample_rate_ranges(id: AudioDeviceID) -> HwResult<Vec<ValueRange>> {
    let ranges: Vec<AudioValueRange> = get_vec(
        id,
        &address(
            kAudioDevicePropertyAvailableNominalSampleRates,
            kAudioObjectPropertyScopeGlobal,
        ),
        "sample rate ranges",
    )?;
    Ok(ranges
        .iter()
        .map(|r| ValueRange::new(r.mMinimum, r.mMaximum))
        .collect())
}

pub fn buffer_size(id: AudioDeviceID) -> HwResult<u32> {
    get(
        id,
        &address(
            kAudioDevicePropertyBufferFrameSize,
            kAudioObjectPropertyScopeGlobal,
        ),
        "get buffer size",
    )
}

pub fn set_buffer_size(id: AudioDeviceID, direction: Direction, frames: u32) -> HwResult<()> {
    set(
        id,
        &address(kAudioDevicePropertyBufferFrameSize, scope(direction)),
        &frames,
        "set buffer size",
    )
}

pub fn buffer_size_ranges(id: AudioDeviceID) -> HwResult<Vec<ValueRange>> {
    let range: AudioValueRange = get(
        id,
        &address(
            kAudioDevicePropertyBufferFrameSizeRange,
            kAudioObjectPropertyScopeGlobal,
        ),
        "buffer size range",
    )?;
    Ok(vec![ValueRange::new(range.mMinimum, range.mMaximum)])
}

pub fn is_running(id: AudioDeviceID) -> HwResult<bool> {
    let running: UInt32 = get(
        id,
        &address(
            kAudioDevicePropertyDeviceIsRunning,
            kAudioObjectPropertyScopeGlobal,
        ),
        "is running",
    )?;
    Ok(running != 0)
}

pub fn related_devices(id: AudioDeviceID) -> HwResult<Vec<AudioDeviceID>> {
    let related: Vec<AudioDeviceID> = get_vec(
        id,
        &address(
            kAudioDevicePropertyRelatedDevices,
            kAudioObjectPropertyScopeGlobal,
        ),
        "related devices",
    )?;
    Ok(related.into_iter().filter(|&d| d != id && d != 0).collect())
}

fn data_source_name(id: AudioDeviceID, direction: Direction, source: u32) -> Option<String> {
    let mut source_id = source;
    let mut name: CFStringRef = ptr::null();
    let mut translation = AudioValueTranslation {
        mInputData: &mut source_id as *mut u32 as *mut c_void,
        mInputDataSize: mem::size_of::<u32>() as UInt32,
        mOutputData: &mut name as *mut CFStringRef as *mut c_void,
        mOutputDataSize: mem::size_of::<CFStringRef>() as UInt32,
    };
    let address = address(kAudioDevicePropertyDataSourceNameForIDCFString, scope(direction));
    let mut size = mem::size_of::<AudioValueTranslation>() as UInt32;
    let status = unsafe {
        AudioObjectGetPropertyData(
            id,
            &address,
            0,
            ptr::null(),
            &mut size,
            &mut translation as *mut AudioValueTranslation as *mut c_void,
        )
    };
    if status != kAudioHardwareNoError as OSStatus {
        return None;
    }
    take_cfstring(name)
}

pub fn data_sources(id: AudioDeviceID, direction: Direction) -> HwResult<Vec<DataSource>> {
    let ids: Vec<u32> = get_vec(
        id,
        &address(kAudioDevicePropertyDataSources, scope(direction)),
        "data sources",
    )?;
    Ok(ids
        .into_iter()
        .map(|source| DataSource {
            id: source,
            name: data_source_name(id, direction, source)
                .unwrap_or_else(|| format!("source {source}")),
        })
        .collect())
}

pub fn current_data_source(id: AudioDeviceID, direction: Direction) -> HwResult<u32> {
    get(
        id,
        &address(kAudioDevicePropertyDataSource, scope(direction)),
        "current data source",
    )
}

pub fn set_data_source(id: AudioDeviceID, direction: Direction, source: u32) -> HwResult<()> {
    set(
        id,
        &address(kAudioDevicePropertyDataSource, scope(direction)),
        &source,
        "set data source",
    )
}

#![cfg(target_os = "macos")]

//! Hardware latency for one scope of a device: the device latency plus the
//! HAL safety offset plus the latency of the scope's first stream.

use super::device::{address, get, get_vec, scope};
use crate::hw::error::HwResult;
use crate::hw::types::Direction;
use coreaudio_sys::{
    AudioDeviceID, AudioStreamID, UInt32, kAudioDevicePropertyLatency,
    kAudioDevicePropertySafetyOffset, kAudioDevicePropertyStreams, kAudioStreamPropertyLatency,
};
use tracing::trace;

pub fn device_latency(id: AudioDeviceID, direction: Direction) -> HwResult<u32> {
    let scope = scope(direction);
    let device: UInt32 = get(id, &address(kAudioDevicePropertyLatency, scope), "latency")?;
    let safety: UInt32 =
        get(id, &address(kAudioDevicePropertySafetyOffset, scope), "safety offset").unwrap_or(0);
    let stream = first_stream_latency(id, scope);
    trace!(
        "device {} {} latency: device={} safety={} stream={}",
        id,
        direction.label(),
        device,
        safety,
        stream
    );
    Ok(device.saturating_add(safety).saturating_add(stream))
}

fn first_stream_latency(id: AudioDeviceID, scope: u32) -> u32 {
    let streams: Vec<AudioStreamID> =
        match get_vec(id, &address(kAudioDevicePropertyStreams, scope), "streams") {
            Ok(streams) => streams,
            Err(_) => return 0,
        };
    let Some(&first) = streams.first() else {
        return 0;
    };
    get::<UInt32>(first, &address(kAudioStreamPropertyLatency, scope), "stream latency")
        .unwrap_or(0)
}

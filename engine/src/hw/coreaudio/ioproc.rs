#![cfg(target_os = "macos")]

//! IOProc registration and the C trampoline into `IoHandler`.
//!
//! The HAL hands each cycle an `AudioBufferList` per direction; every buffer
//! is one interleaved f32 stream. The trampoline wraps them in borrowed
//! `InterleavedStream`s on the stack and calls the handler. Nothing here
//! allocates on the real-time thread.

use super::device::check;
use crate::hw::error::HwResult;
use crate::hw::traits::IoHandler;
use crate::hw::types::{InterleavedStream, InterleavedStreamMut};
use coreaudio_sys::{
    AudioBuffer, AudioBufferList, AudioDeviceCreateIOProcID, AudioDeviceDestroyIOProcID,
    AudioDeviceID, AudioDeviceIOProcID, AudioDeviceStart, AudioDeviceStop, AudioTimeStamp,
    OSStatus,
};
use std::os::raw::c_void;
use std::sync::Arc;
use tracing::warn;

/// Streams per direction the trampoline can present in one cycle.
pub const MAX_STREAMS: usize = 32;

struct ClientData {
    handler: Arc<dyn IoHandler>,
}

unsafe fn buffers<'a>(list: *const AudioBufferList) -> &'a [AudioBuffer] {
    if list.is_null() {
        return &[];
    }
    unsafe {
        std::slice::from_raw_parts((*list).mBuffers.as_ptr(), (*list).mNumberBuffers as usize)
    }
}

fn sample_count(buffer: &AudioBuffer) -> usize {
    if buffer.mData.is_null() {
        0
    } else {
        buffer.mDataByteSize as usize / std::mem::size_of::<f32>()
    }
}

unsafe extern "C" fn io_proc(
    _device: AudioDeviceID,
    _now: *const AudioTimeStamp,
    input_data: *const AudioBufferList,
    _input_time: *const AudioTimeStamp,
    output_data: *mut AudioBufferList,
    _output_time: *const AudioTimeStamp,
    client_data: *mut c_void,
) -> OSStatus {
    if client_data.is_null() {
        return 0;
    }
    let client = unsafe { &*(client_data as *const ClientData) };

    let mut inputs = [InterleavedStream::EMPTY; MAX_STREAMS];
    let mut input_count = 0;
    for buffer in unsafe { buffers(input_data) }.iter().take(MAX_STREAMS) {
        let len = sample_count(buffer);
        let samples: &[f32] = if len == 0 {
            &[]
        } else {
            unsafe { std::slice::from_raw_parts(buffer.mData as *const f32, len) }
        };
        inputs[input_count] = InterleavedStream::new(buffer.mNumberChannels as usize, samples);
        input_count += 1;
    }

    let mut outputs: [InterleavedStreamMut<'_>; MAX_STREAMS] =
        std::array::from_fn(|_| InterleavedStreamMut::empty());
    let mut output_count = 0;
    for buffer in unsafe { buffers(output_data) }.iter().take(MAX_STREAMS) {
        let len = sample_count(buffer);
        let samples: &mut [f32] = if len == 0 {
            &mut []
        } else {
            unsafe { std::slice::from_raw_parts_mut(buffer.mData as *mut f32, len) }
        };
        outputs[output_count] = InterleavedStreamMut::new(buffer.mNumberChannels as usize, samples);
        output_count += 1;
    }

    client
        .handler
        .on_interrupt(&inputs[..input_count], &mut outputs[..output_count]);
    0
}

/// An IOProc installed on a device. Dropping it destroys the IOProc, which
/// blocks until any in-flight cycle has returned, then frees the client data.
pub struct IoProcRegistration {
    device: AudioDeviceID,
    proc_id: AudioDeviceIOProcID,
    client: *mut ClientData,
}

// The raw pointers are only touched through HAL calls that are thread-safe.
unsafe impl Send for IoProcRegistration {}

impl IoProcRegistration {
    pub fn create(device: AudioDeviceID, handler: Arc<dyn IoHandler>) -> HwResult<Self> {
        let client = Box::into_raw(Box::new(ClientData { handler }));
        let mut proc_id: AudioDeviceIOProcID = None;
        let status = unsafe {
            AudioDeviceCreateIOProcID(device, Some(io_proc), client as *mut c_void, &mut proc_id)
        };
        if let Err(e) = check("create IOProc", status) {
            drop(unsafe { Box::from_raw(client) });
            return Err(e);
        }
        Ok(Self {
            device,
            proc_id,
            client,
        })
    }

    pub fn start(&self) -> HwResult<()> {
        check("start", unsafe { AudioDeviceStart(self.device, self.proc_id) })
    }

    pub fn stop(&self) -> HwResult<()> {
        check("stop", unsafe { AudioDeviceStop(self.device, self.proc_id) })
    }
}

impl Drop for IoProcRegistration {
    fn drop(&mut self) {
        let status = unsafe { AudioDeviceDestroyIOProcID(self.device, self.proc_id) };
        if let Err(e) = check("destroy IOProc", status) {
            warn!("device {}: {}", self.device, e);
        }
        drop(unsafe { Box::from_raw(self.client) });
    }
}

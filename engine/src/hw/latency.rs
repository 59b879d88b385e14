/// Buffers of scheduling slack added on top of what the hardware reports.
pub const SAFETY_BUFFERS: usize = 2;

/// Latency in frames reported for one direction of an open device.
pub fn reported_latency(device_frames: u32, buffer_size: usize) -> usize {
    device_frames as usize + SAFETY_BUFFERS * buffer_size
}

/// Round trip through an input and an output device, in frames.
pub fn round_trip(input: usize, output: usize) -> usize {
    input + output
}

pub fn frames_to_ms(frames: usize, sample_rate: f64) -> f64 {
    if sample_rate <= 0.0 {
        return 0.0;
    }
    frames as f64 * 1000.0 / sample_rate
}

use iohal_engine::hw::{AudioIoCallback, DeviceSnapshot, InputBuffers, OutputBuffers};
use std::f64::consts::TAU;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use tracing::info;

/// Plays a sine on every active output and meters the inputs.
pub struct ToneCallback {
    frequency: f64,
    gain: f32,
    sample_rate: AtomicU64,
    phase: AtomicU64,
    input_peak: AtomicU32,
    stops: AtomicUsize,
}

impl ToneCallback {
    pub fn new(frequency: f64, gain: f32) -> Self {
        Self {
            frequency,
            gain,
            sample_rate: AtomicU64::new(48_000f64.to_bits()),
            phase: AtomicU64::new(0f64.to_bits()),
            input_peak: AtomicU32::new(0),
            stops: AtomicUsize::new(0),
        }
    }

    /// Highest absolute input sample since the last call.
    pub fn take_input_peak(&self) -> f32 {
        f32::from_bits(self.input_peak.swap(0, Ordering::AcqRel))
    }

    pub fn stop_count(&self) -> usize {
        self.stops.load(Ordering::Acquire)
    }
}

impl AudioIoCallback for ToneCallback {
    fn about_to_start(&self, device: &DeviceSnapshot) {
        info!(
            "{}: {} in / {} out at {} Hz, {} frames",
            device.name,
            device.input_channels,
            device.output_channels,
            device.sample_rate,
            device.buffer_size
        );
        if device.sample_rate > 0.0 {
            self.sample_rate
                .store(device.sample_rate.to_bits(), Ordering::Release);
        }
    }

    fn process(&self, inputs: &InputBuffers<'_>, outputs: &mut OutputBuffers<'_>, frames: usize) {
        let peak = inputs
            .iter()
            .flat_map(|ch| ch.iter())
            .fold(0.0f32, |acc, s| acc.max(s.abs()));
        self.input_peak.fetch_max(peak.to_bits(), Ordering::AcqRel);

        let rate = f64::from_bits(self.sample_rate.load(Ordering::Acquire));
        let step = TAU * self.frequency / rate;
        let start = f64::from_bits(self.phase.load(Ordering::Relaxed));
        for channel in outputs.iter_mut() {
            for (i, sample) in channel.iter_mut().enumerate() {
                *sample = (start + step * i as f64).sin() as f32 * self.gain;
            }
        }
        self.phase
            .store(((start + step * frames as f64) % TAU).to_bits(), Ordering::Relaxed);
    }

    fn stopped(&self) {
        self.stops.fetch_add(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use iohal_engine::hw::scratch::ScratchBuffers;

    #[test]
    fn writes_a_continuous_sine() {
        let tone = ToneCallback::new(1_000.0, 0.5);
        let mut scratch = ScratchBuffers::new();
        scratch.configure(1, 2, 48);
        scratch.input_mut(0)[3] = -0.75;

        let (inputs, mut outputs) = scratch.split();
        tone.process(&inputs, &mut outputs, 48);
        assert_eq!(outputs.channel(0), outputs.channel(1));
        assert_eq!(outputs.channel(0)[0], 0.0);
        assert!((outputs.channel(0)[12] - 0.5).abs() < 1e-6);
        assert_eq!(tone.take_input_peak(), 0.75);
        assert_eq!(tone.take_input_peak(), 0.0);

        // 48 frames of 1 kHz at 48 kHz is one full period.
        tone.process(&inputs, &mut outputs, 48);
        assert!(outputs.channel(0)[0].abs() < 1e-6);
    }
}

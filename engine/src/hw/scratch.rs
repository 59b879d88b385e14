//! De-interleaved scratch storage shared between the hardware interrupt and
//! the application callback.
//!
//! One contiguous allocation holds every input channel followed by every
//! output channel, each `frames` samples long. It is sized on the control
//! thread when the device is (re)configured and only indexed afterwards.

#[derive(Debug, Default)]
pub struct ScratchBuffers {
    data: Vec<f32>,
    inputs: usize,
    outputs: usize,
    frames: usize,
}

impl ScratchBuffers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resizes for a new geometry. Returns true when storage was reallocated.
    pub fn configure(&mut self, inputs: usize, outputs: usize, frames: usize) -> bool {
        if self.inputs == inputs && self.outputs == outputs && self.frames == frames {
            return false;
        }
        self.inputs = inputs;
        self.outputs = outputs;
        self.frames = frames;
        self.data = vec![0.0; (inputs + outputs) * frames];
        true
    }

    pub fn inputs(&self) -> usize {
        self.inputs
    }

    pub fn outputs(&self) -> usize {
        self.outputs
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn input(&self, channel: usize) -> &[f32] {
        let start = channel * self.frames;
        &self.data[start..start + self.frames]
    }

    pub fn input_mut(&mut self, channel: usize) -> &mut [f32] {
        let start = channel * self.frames;
        &mut self.data[start..start + self.frames]
    }

    pub fn output(&self, channel: usize) -> &[f32] {
        let start = (self.inputs + channel) * self.frames;
        &self.data[start..start + self.frames]
    }

    pub fn output_mut(&mut self, channel: usize) -> &mut [f32] {
        let start = (self.inputs + channel) * self.frames;
        &mut self.data[start..start + self.frames]
    }

    pub fn clear_inputs(&mut self) {
        let end = self.inputs * self.frames;
        self.data[..end].fill(0.0);
    }

    pub fn clear_outputs(&mut self) {
        let start = self.inputs * self.frames;
        self.data[start..].fill(0.0);
    }

    /// Borrows the arena as the pair of views handed to the application.
    pub fn split(&mut self) -> (InputBuffers<'_>, OutputBuffers<'_>) {
        let (ins, outs) = self.data.split_at_mut(self.inputs * self.frames);
        (
            InputBuffers {
                data: ins,
                channels: self.inputs,
                frames: self.frames,
            },
            OutputBuffers {
                data: outs,
                channels: self.outputs,
                frames: self.frames,
            },
        )
    }
}

/// Read-only per-channel input samples for one cycle.
#[derive(Debug)]
pub struct InputBuffers<'a> {
    data: &'a [f32],
    channels: usize,
    frames: usize,
}

impl<'a> InputBuffers<'a> {
    pub fn num_channels(&self) -> usize {
        self.channels
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn channel(&self, index: usize) -> &[f32] {
        &self.data[index * self.frames..(index + 1) * self.frames]
    }

    pub fn iter(&self) -> impl Iterator<Item = &[f32]> + '_ {
        (0..self.channels).map(move |c| self.channel(c))
    }
}

/// Writable per-channel output samples for one cycle.
#[derive(Debug)]
pub struct OutputBuffers<'a> {
    data: &'a mut [f32],
    channels: usize,
    frames: usize,
}

impl<'a> OutputBuffers<'a> {
    pub fn num_channels(&self) -> usize {
        self.channels
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn channel(&self, index: usize) -> &[f32] {
        &self.data[index * self.frames..(index + 1) * self.frames]
    }

    pub fn channel_mut(&mut self, index: usize) -> &mut [f32] {
        &mut self.data[index * self.frames..(index + 1) * self.frames]
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut [f32]> + '_ {
        let frames = self.frames.max(1);
        self.data.chunks_mut(frames).take(self.channels)
    }

    pub fn fill(&mut self, value: f32) {
        self.data.fill(value);
    }
}

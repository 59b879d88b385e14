//! Real-time bridge between the hardware interrupt and the application.
//!
//! `IoBridge` is registered with the hardware as the `IoHandler` of one
//! device. On every cycle it de-interleaves the routed input channels into
//! the scratch arena, runs the application callback, and interleaves the
//! scratch outputs back into the hardware streams. Nothing here allocates,
//! logs, or blocks: the callback slot lives inside the routing state, which
//! the interrupt only ever `try_lock`s.

use super::channel_map::RoutingTable;
use super::scratch::ScratchBuffers;
use super::traits::{AudioIoCallback, IoHandler};
use super::types::{InterleavedStream, InterleavedStreamMut};
use parking_lot::{Mutex, MutexGuard};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeRole {
    /// Runs the application callback.
    Primary,
    /// Only captures input for a primary to pick up.
    Slave,
}

#[derive(Default)]
pub struct BridgeState {
    inputs: RoutingTable,
    outputs: RoutingTable,
    scratch: ScratchBuffers,
    buffer_size: usize,
    /// Only read by the interrupt while it holds this state, so replacing
    /// it under the lock fences every cycle that could still call it.
    callback: Option<Arc<dyn AudioIoCallback>>,
    /// Set on a slave while its clock feeds a primary.
    capturing: bool,
}

impl BridgeState {
    /// Installs new routing and sizes the scratch arena. Control thread only,
    /// with callbacks disabled. Returns true when the arena was reallocated.
    pub fn configure(
        &mut self,
        inputs: RoutingTable,
        outputs: RoutingTable,
        input_channels: usize,
        buffer_size: usize,
    ) -> bool {
        let output_channels = outputs.len();
        self.inputs = inputs;
        self.outputs = outputs;
        self.buffer_size = buffer_size;
        self.scratch
            .configure(input_channels, output_channels, buffer_size)
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    pub fn input_routing(&self) -> &RoutingTable {
        &self.inputs
    }

    pub fn output_routing(&self) -> &RoutingTable {
        &self.outputs
    }

    pub fn scratch(&self) -> &ScratchBuffers {
        &self.scratch
    }

    /// Copies every routed input channel out of the interleaved streams.
    pub fn capture(&mut self, streams: &[InterleavedStream<'_>]) {
        let frames = self.scratch.frames();
        let channels = self.inputs.len().min(self.scratch.inputs());
        for (channel, entry) in self.inputs.entries()[..channels].iter().enumerate() {
            let dst = self.scratch.input_mut(channel);
            let copied = match streams.get(entry.stream) {
                Some(stream) if entry.is_populated() => {
                    let n = entry.frames_in(stream.samples.len(), frames);
                    for (frame, sample) in dst[..n].iter_mut().enumerate() {
                        *sample = stream.samples[entry.offset + frame * entry.stride];
                    }
                    n
                }
                _ => 0,
            };
            dst[copied..].fill(0.0);
        }
    }

    /// Takes input channels from a slave device's captured scratch.
    pub fn pull_inputs_from(&mut self, source: &BridgeState) {
        let channels = self.scratch.inputs();
        let frames = self.scratch.frames().min(source.scratch.frames());
        for channel in 0..channels {
            let dst = self.scratch.input_mut(channel);
            if channel < source.scratch.inputs() {
                dst[..frames].copy_from_slice(&source.scratch.input(channel)[..frames]);
                dst[frames..].fill(0.0);
            } else {
                dst.fill(0.0);
            }
        }
    }

    /// Writes every routed output channel into the interleaved streams.
    pub fn scatter(&self, streams: &mut [InterleavedStreamMut<'_>]) {
        let frames = self.scratch.frames();
        let channels = self.outputs.len().min(self.scratch.outputs());
        for (channel, entry) in self.outputs.entries()[..channels].iter().enumerate() {
            if !entry.is_populated() {
                continue;
            }
            let Some(stream) = streams.get_mut(entry.stream) else {
                continue;
            };
            let n = entry.frames_in(stream.samples.len(), frames);
            let src = self.scratch.output(channel);
            for (frame, &sample) in src[..n].iter().enumerate() {
                stream.samples[entry.offset + frame * entry.stride] = sample;
            }
        }
    }

    /// Zeroes the routed output locations and nothing else.
    pub fn silence(&self, streams: &mut [InterleavedStreamMut<'_>]) {
        for entry in self.outputs.entries() {
            if !entry.is_populated() {
                continue;
            }
            let Some(stream) = streams.get_mut(entry.stream) else {
                continue;
            };
            let n = entry.frames_in(stream.samples.len(), self.buffer_size);
            for frame in 0..n {
                stream.samples[entry.offset + frame * entry.stride] = 0.0;
            }
        }
    }

    /// Runs the published callback over the scratch arena. False when
    /// there is none.
    fn run(&mut self) -> bool {
        let Some(callback) = self.callback.as_deref() else {
            return false;
        };
        self.scratch.clear_outputs();
        let frames = self.scratch.frames();
        let (inputs, mut outputs) = self.scratch.split();
        callback.process(&inputs, &mut outputs, frames);
        true
    }
}

pub struct IoBridge {
    role: BridgeRole,
    state: Mutex<BridgeState>,
    slave: Option<Arc<IoBridge>>,
    interrupts: AtomicU64,
    callbacks_run: AtomicU64,
}

impl IoBridge {
    pub fn new(role: BridgeRole) -> Self {
        Self {
            role,
            state: Mutex::new(BridgeState::default()),
            slave: None,
            interrupts: AtomicU64::new(0),
            callbacks_run: AtomicU64::new(0),
        }
    }

    /// Primary bridge whose inputs come from `slave`'s captured scratch.
    pub fn with_slave(slave: Arc<IoBridge>) -> Self {
        Self {
            slave: Some(slave),
            ..Self::new(BridgeRole::Primary)
        }
    }

    pub fn role(&self) -> BridgeRole {
        self.role
    }

    pub fn slave(&self) -> Option<&Arc<IoBridge>> {
        self.slave.as_ref()
    }

    /// Replaces the published callback, returning the previous one. Waits
    /// for an in-flight cycle, so once this returns the previous callback
    /// is no longer running and never will be again.
    pub fn publish(
        &self,
        callback: Option<Arc<dyn AudioIoCallback>>,
    ) -> Option<Arc<dyn AudioIoCallback>> {
        std::mem::replace(&mut self.state.lock().callback, callback)
    }

    pub fn callback(&self) -> Option<Arc<dyn AudioIoCallback>> {
        self.state.lock().callback.clone()
    }

    /// Turns input capture on or off for a slave bridge.
    pub fn set_capturing(&self, capturing: bool) {
        self.state.lock().capturing = capturing;
    }

    pub fn is_capturing(&self) -> bool {
        self.state.lock().capturing
    }

    /// Locks the routing state from the control thread. Waits for an
    /// in-flight cycle to finish.
    pub fn state(&self) -> MutexGuard<'_, BridgeState> {
        self.state.lock()
    }

    /// Blocks until no cycle is inside the bridge.
    pub fn flush(&self) {
        drop(self.state.lock());
    }

    pub fn interrupts(&self) -> u64 {
        self.interrupts.load(Ordering::Relaxed)
    }

    pub fn callbacks_run(&self) -> u64 {
        self.callbacks_run.load(Ordering::Relaxed)
    }

    fn fill_inputs_from_slave(&self, state: &mut BridgeState) {
        let Some(slave) = &self.slave else {
            return;
        };
        match slave.state.try_lock() {
            Some(source) if source.capturing && source.buffer_size == state.buffer_size => {
                state.pull_inputs_from(&source);
            }
            _ => state.scratch.clear_inputs(),
        }
    }
}

impl IoHandler for IoBridge {
    fn on_interrupt(
        &self,
        inputs: &[InterleavedStream<'_>],
        outputs: &mut [InterleavedStreamMut<'_>],
    ) {
        self.interrupts.fetch_add(1, Ordering::Relaxed);

        let Some(mut state) = self.state.try_lock() else {
            // Control thread is reconfiguring: nothing consistent to route.
            for stream in outputs.iter_mut() {
                stream.samples.fill(0.0);
            }
            return;
        };
        if state.buffer_size == 0 {
            state.silence(outputs);
            return;
        }

        match self.role {
            BridgeRole::Slave => {
                if state.capturing {
                    state.capture(inputs);
                }
                state.silence(outputs);
            }
            BridgeRole::Primary => {
                if state.callback.is_none() {
                    state.silence(outputs);
                    return;
                }
                if self.slave.is_some() {
                    self.fill_inputs_from_slave(&mut state);
                } else {
                    state.capture(inputs);
                }
                if state.run() {
                    self.callbacks_run.fetch_add(1, Ordering::Relaxed);
                }
                state.scatter(outputs);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hw::channel_map::{RoutingEntry, compute_routing};
    use crate::hw::mask::ChannelMask;
    use crate::hw::scratch::{InputBuffers, OutputBuffers};
    use crate::hw::types::{Direction, StreamLayout};
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize};

    const SENTINEL: f32 = 7.0;

    /// Copies input channel `c` to output channel `c`, scaled by 2.
    struct Doubler;

    impl AudioIoCallback for Doubler {
        fn process(&self, inputs: &InputBuffers<'_>, outputs: &mut OutputBuffers<'_>, _: usize) {
            for c in 0..outputs.num_channels().min(inputs.num_channels()) {
                for (o, i) in outputs.channel_mut(c).iter_mut().zip(inputs.channel(c)) {
                    *o = i * 2.0;
                }
            }
        }
    }

    fn configured_bridge(role: BridgeRole, layout: &[usize], frames: usize) -> Arc<IoBridge> {
        let layout = StreamLayout::new(layout.to_vec());
        let all = ChannelMask::first(layout.total_channels());
        let ins = compute_routing(&layout, &all, Direction::Input);
        let outs = compute_routing(&layout, &all, Direction::Output);
        let bridge = Arc::new(IoBridge::new(role));
        let in_count = ins.active_channels();
        bridge
            .state()
            .configure(ins.routing, outs.routing, in_count, frames);
        bridge
    }

    fn interleaved(channels: usize, frames: usize) -> Vec<f32> {
        (0..channels * frames)
            .map(|i| ((i % channels) * 100 + i / channels) as f32)
            .collect()
    }

    #[test]
    fn routes_through_callback() {
        let bridge = configured_bridge(BridgeRole::Primary, &[2, 1], 4);
        bridge.publish(Some(Arc::new(Doubler)));

        let in0 = interleaved(2, 4);
        let in1 = interleaved(1, 4);
        let inputs = [InterleavedStream::new(2, &in0), InterleavedStream::new(1, &in1)];
        let mut out0 = vec![SENTINEL; 8];
        let mut out1 = vec![SENTINEL; 4];
        let mut outputs = [
            InterleavedStreamMut::new(2, &mut out0),
            InterleavedStreamMut::new(1, &mut out1),
        ];
        bridge.on_interrupt(&inputs, &mut outputs);

        assert_eq!(out0, vec![0.0, 200.0, 2.0, 202.0, 4.0, 204.0, 6.0, 206.0]);
        assert_eq!(out1, vec![0.0, 2.0, 4.0, 6.0]);
        assert_eq!(bridge.callbacks_run(), 1);
    }

    #[test]
    fn silences_only_routed_outputs_without_callback() {
        let layout = StreamLayout::new(vec![3]);
        let mask: ChannelMask = [0, 2].into_iter().collect();
        let outs = compute_routing(&layout, &mask, Direction::Output);
        let bridge = IoBridge::new(BridgeRole::Primary);
        bridge
            .state()
            .configure(RoutingTable::new(), outs.routing, 0, 4);

        let mut out = vec![SENTINEL; 12];
        bridge.on_interrupt(&[], &mut [InterleavedStreamMut::new(3, &mut out)]);

        for (i, sample) in out.iter().enumerate() {
            let expected = if i % 3 == 1 { SENTINEL } else { 0.0 };
            assert_eq!(*sample, expected, "sample {i}");
        }
        assert_eq!(bridge.callbacks_run(), 0);
    }

    #[test]
    fn short_hardware_buffers_are_not_overrun() {
        let bridge = configured_bridge(BridgeRole::Primary, &[2], 8);
        bridge.publish(Some(Arc::new(Doubler)));

        let input = interleaved(2, 3);
        let mut out = vec![SENTINEL; 6];
        bridge.on_interrupt(
            &[InterleavedStream::new(2, &input)],
            &mut [InterleavedStreamMut::new(2, &mut out)],
        );
        assert_eq!(out, vec![0.0, 200.0, 2.0, 202.0, 4.0, 204.0]);
    }

    #[test]
    fn missing_streams_are_skipped() {
        let bridge = configured_bridge(BridgeRole::Primary, &[1, 1], 2);
        bridge.publish(Some(Arc::new(Doubler)));
        let input = vec![1.0, 2.0];
        let mut out = vec![SENTINEL; 2];
        bridge.on_interrupt(
            &[InterleavedStream::new(1, &input)],
            &mut [InterleavedStreamMut::new(1, &mut out)],
        );
        assert_eq!(out, vec![2.0, 4.0]);
    }

    #[test]
    fn primary_reads_slave_scratch() {
        let slave = configured_bridge(BridgeRole::Slave, &[1], 2);
        slave.set_capturing(true);
        let primary = Arc::new(IoBridge::with_slave(Arc::clone(&slave)));
        {
            let layout = StreamLayout::new(vec![1]);
            let outs = compute_routing(&layout, &ChannelMask::first(1), Direction::Output);
            primary.state().configure(RoutingTable::new(), outs.routing, 1, 2);
        }
        primary.publish(Some(Arc::new(Doubler)));

        let mic = vec![0.25, 0.5];
        let mut ignored = vec![SENTINEL; 2];
        slave.on_interrupt(
            &[InterleavedStream::new(1, &mic)],
            &mut [InterleavedStreamMut::new(1, &mut ignored)],
        );
        assert_eq!(ignored, vec![0.0, 0.0]);
        assert_eq!(slave.callbacks_run(), 0);

        let mut out = vec![SENTINEL; 2];
        primary.on_interrupt(&[], &mut [InterleavedStreamMut::new(1, &mut out)]);
        assert_eq!(out, vec![0.5, 1.0]);
    }

    #[test]
    fn stopped_slave_feeds_silence() {
        let slave = configured_bridge(BridgeRole::Slave, &[1], 2);
        let primary = IoBridge::with_slave(Arc::clone(&slave));
        {
            let layout = StreamLayout::new(vec![1]);
            let outs = compute_routing(&layout, &ChannelMask::first(1), Direction::Output);
            primary.state().configure(RoutingTable::new(), outs.routing, 1, 2);
        }
        slave.state().scratch.input_mut(0).fill(9.0);
        primary.publish(Some(Arc::new(Doubler)));

        let mut out = vec![SENTINEL; 2];
        primary.on_interrupt(&[], &mut [InterleavedStreamMut::new(1, &mut out)]);
        assert_eq!(out, vec![0.0, 0.0]);
    }

    #[test]
    fn idle_slave_captures_nothing() {
        let slave = configured_bridge(BridgeRole::Slave, &[1], 2);
        let mic = vec![0.25, 0.5];
        slave.on_interrupt(&[InterleavedStream::new(1, &mic)], &mut []);
        assert_eq!(slave.state().scratch().input(0), &[0.0, 0.0]);

        slave.set_capturing(true);
        slave.on_interrupt(&[InterleavedStream::new(1, &mic)], &mut []);
        assert_eq!(slave.state().scratch().input(0), &[0.25, 0.5]);
    }

    /// Counts `process` calls made after it was told it had been detached.
    #[derive(Default)]
    struct DetachWatch {
        detached: AtomicBool,
        late: AtomicUsize,
    }

    impl AudioIoCallback for DetachWatch {
        fn process(&self, _: &InputBuffers<'_>, _: &mut OutputBuffers<'_>, _: usize) {
            if self.detached.load(Ordering::SeqCst) {
                self.late.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    #[test]
    fn detached_callbacks_are_never_run_again() {
        let bridge = configured_bridge(BridgeRole::Primary, &[1], 4);
        let running = Arc::new(AtomicBool::new(true));
        let interrupt = {
            let bridge = Arc::clone(&bridge);
            let running = Arc::clone(&running);
            std::thread::spawn(move || {
                let mut out = vec![0.0; 4];
                while running.load(Ordering::Acquire) {
                    bridge.on_interrupt(&[], &mut [InterleavedStreamMut::new(1, &mut out)]);
                }
            })
        };

        let mut watches = Vec::new();
        for _ in 0..2_000 {
            let watch = Arc::new(DetachWatch::default());
            let callback: Arc<dyn AudioIoCallback> = watch.clone();
            bridge.publish(Some(callback));
            std::thread::yield_now();
            drop(bridge.publish(None));
            watch.detached.store(true, Ordering::SeqCst);
            watches.push(watch);
        }
        running.store(false, Ordering::Release);
        interrupt.join().unwrap();

        for watch in &watches {
            assert_eq!(watch.late.load(Ordering::SeqCst), 0);
        }
    }

    #[test]
    fn contended_state_zeroes_everything() {
        let bridge = configured_bridge(BridgeRole::Primary, &[2], 2);
        bridge.publish(Some(Arc::new(Doubler)));
        let _held = bridge.state();
        let mut out = vec![SENTINEL; 4];
        bridge.on_interrupt(&[], &mut [InterleavedStreamMut::new(2, &mut out)]);
        assert_eq!(out, vec![0.0; 4]);
    }

    fn arbitrary_entry() -> impl Strategy<Value = RoutingEntry> {
        (0usize..4, 0usize..4, 0usize..12, prop_oneof![Just(0usize), 1usize..5]).prop_map(
            |(source_channel, stream, offset, stride)| RoutingEntry {
                source_channel,
                stream,
                offset,
                stride,
            },
        )
    }

    proptest! {
        #[test]
        fn fuzzed_routing_never_escapes_its_entries(
            in_entries in proptest::collection::vec(arbitrary_entry(), 0..8),
            out_entries in proptest::collection::vec(arbitrary_entry(), 0..8),
            stream_lens in proptest::collection::vec(0usize..40, 0..4),
            frames in 0usize..16,
            with_callback in any::<bool>(),
        ) {
            let mut ins = RoutingTable::new();
            for e in &in_entries {
                ins.push(*e).unwrap();
            }
            let mut outs = RoutingTable::new();
            for e in &out_entries {
                outs.push(*e).unwrap();
            }
            let bridge = IoBridge::new(BridgeRole::Primary);
            bridge.state().configure(ins, outs.clone(), in_entries.len(), frames);
            if with_callback {
                bridge.publish(Some(Arc::new(Doubler)));
            }

            let in_bufs: Vec<Vec<f32>> = stream_lens.iter().map(|&n| vec![1.0; n]).collect();
            let mut out_bufs: Vec<Vec<f32>> = stream_lens.iter().map(|&n| vec![SENTINEL; n]).collect();
            let inputs: Vec<InterleavedStream<'_>> =
                in_bufs.iter().map(|b| InterleavedStream::new(1, b)).collect();
            {
                let mut outputs: Vec<InterleavedStreamMut<'_>> = out_bufs
                    .iter_mut()
                    .map(|b| InterleavedStreamMut::new(1, b))
                    .collect();
                bridge.on_interrupt(&inputs, &mut outputs);
            }

            // Every changed sample must be reachable through a populated entry.
            for (s, buf) in out_bufs.iter().enumerate() {
                for (i, &v) in buf.iter().enumerate() {
                    if v != SENTINEL {
                        let reachable = outs.entries().iter().any(|e| {
                            e.is_populated()
                                && e.stream == s
                                && i >= e.offset
                                && (i - e.offset) % e.stride == 0
                                && (i - e.offset) / e.stride < frames
                        });
                        prop_assert!(reachable, "stream {} sample {} written", s, i);
                    }
                }
            }
        }
    }
}

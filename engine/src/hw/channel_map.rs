//! Maps a device's interleaved stream layout onto flat logical channels.
//!
//! Every physical channel gets a display name, whether or not it is active.
//! Active channels (bits set in the activation mask) are assigned sequential
//! logical indices and a routing entry telling the real-time bridge where
//! its samples live inside the hardware buffers.

use super::mask::ChannelMask;
use super::types::{Direction, StreamLayout};

/// Most channels routed per direction. Routing tables never grow past this.
pub const MAX_CHANNELS: usize = 96;

/// Location of one logical channel inside the hardware's interleaved streams.
///
/// A stride of zero marks an unpopulated entry and is never dereferenced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RoutingEntry {
    pub source_channel: usize,
    pub stream: usize,
    pub offset: usize,
    pub stride: usize,
}

impl RoutingEntry {
    pub fn is_populated(&self) -> bool {
        self.stride != 0
    }

    /// Frames addressable in a stream of `len` samples, capped at `frames`.
    pub fn frames_in(&self, len: usize, frames: usize) -> usize {
        if !self.is_populated() || self.offset >= len {
            return 0;
        }
        ((len - self.offset).div_ceil(self.stride)).min(frames)
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct RoutingTable {
    entries: [RoutingEntry; MAX_CHANNELS],
    len: usize,
}

impl RoutingTable {
    pub const fn new() -> Self {
        Self {
            entries: [RoutingEntry {
                source_channel: 0,
                stream: 0,
                offset: 0,
                stride: 0,
            }; MAX_CHANNELS],
            len: 0,
        }
    }

    /// Appends an entry, handing it back when the table is full.
    pub fn push(&mut self, entry: RoutingEntry) -> Result<(), RoutingEntry> {
        if self.len == MAX_CHANNELS {
            return Err(entry);
        }
        self.entries[self.len] = entry;
        self.len += 1;
        Ok(())
    }

    pub fn clear(&mut self) {
        self.entries = [RoutingEntry::default(); MAX_CHANNELS];
        self.len = 0;
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn entries(&self) -> &[RoutingEntry] {
        &self.entries[..self.len]
    }
}

impl Default for RoutingTable {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RoutingTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.entries()).finish()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelMap {
    pub routing: RoutingTable,
    /// One name per physical channel, active or not.
    pub names: Vec<String>,
}

impl ChannelMap {
    pub fn active_channels(&self) -> usize {
        self.routing.len()
    }
}

pub fn channel_name(direction: Direction, physical_index: usize) -> String {
    format!("{} {}", direction.label(), physical_index + 1)
}

/// Builds the routing for one direction. Pure: identical inputs give
/// identical maps.
pub fn compute_routing(
    layout: &StreamLayout,
    active: &ChannelMask,
    direction: Direction,
) -> ChannelMap {
    let mut map = ChannelMap {
        routing: RoutingTable::new(),
        names: Vec::with_capacity(layout.total_channels()),
    };
    let mut physical = 0usize;
    let mut dropped = 0usize;

    for (stream, &channels) in layout.streams.iter().enumerate() {
        for offset in 0..channels {
            if active.get(physical) {
                let entry = RoutingEntry {
                    source_channel: physical,
                    stream,
                    offset,
                    stride: channels,
                };
                if map.routing.push(entry).is_err() {
                    dropped += 1;
                }
            }
            map.names.push(channel_name(direction, physical));
            physical += 1;
        }
    }

    if dropped > 0 {
        tracing::warn!(
            "{} routing full: {} active channels beyond {} ignored",
            direction.label(),
            dropped,
            MAX_CHANNELS
        );
    }
    map
}

// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
use crate::error::StreamError;
use crate::properties::AudioProperties;

use super::RenderSource;

/// A source that renders frames held in memory.
///
/// Samples are stored interleaved, the same way they are rendered. When `wrap` is set and the
/// properties carry a loop, rendering jumps from the loop end back to the loop start the way a
/// looping decoder would.
pub struct MemorySource {
    samples: Vec<i16>,
    properties: AudioProperties,
    position: usize,
    wrap: bool,
}

impl MemorySource {
    /// Creates a source from interleaved samples. The total sample count is derived from
    /// the buffer length.
    pub fn new(samples: Vec<i16>, channel_count: u8, sample_rate: u32) -> MemorySource {
        let frames = samples.len() / channel_count.max(1) as usize;
        MemorySource {
            samples,
            properties: AudioProperties::new(sample_rate, frames as i32, channel_count),
            position: 0,
            wrap: false,
        }
    }

    /// Marks the source as carrying loop metadata.
    pub fn with_loop(mut self, loop_start: i32, loop_end: i32) -> MemorySource {
        self.properties.loop_enabled = true;
        self.properties.loop_start = loop_start;
        self.properties.loop_end = loop_end;
        self
    }

    /// Makes the source wrap at its loop end while rendering.
    pub fn wrapping(mut self) -> MemorySource {
        self.wrap = true;
        self
    }

    /// Creates a source where every channel carries a ramp. Sample `i` of channel `c` is
    /// `(i + 1) * (c + 1)` truncated to 16 bits, which never renders as silence for small
    /// inputs and makes misplaced or stale samples easy to spot.
    pub fn ramp(frames: usize, channel_count: u8, sample_rate: u32) -> MemorySource {
        let channels = channel_count as usize;
        let mut samples = Vec::with_capacity(frames * channels);
        for i in 0..frames {
            for c in 0..channels {
                samples.push(((i + 1) * (c + 1)) as i16);
            }
        }
        MemorySource::new(samples, channel_count, sample_rate)
    }

    fn frame_count(&self) -> usize {
        self.samples.len() / self.channels()
    }

    fn channels(&self) -> usize {
        self.properties.channel_count.max(1) as usize
    }
}

impl RenderSource for MemorySource {
    fn properties(&self) -> AudioProperties {
        self.properties
    }

    fn render(&mut self, buffer: &mut [i16], frames: usize) -> Result<usize, StreamError> {
        let channels = self.channels();
        let mut rendered = 0;

        while rendered < frames {
            let end = if self.wrap && self.properties.loop_enabled {
                self.properties.loop_end as usize
            } else {
                self.frame_count()
            };

            if self.position >= end {
                if self.wrap && self.properties.loop_enabled {
                    self.position = self.properties.loop_start as usize;
                    continue;
                }
                break;
            }

            let count = (end - self.position).min(frames - rendered);
            let src = &self.samples[self.position * channels..(self.position + count) * channels];
            buffer[rendered * channels..(rendered + count) * channels].copy_from_slice(src);
            self.position += count;
            rendered += count;
        }

        Ok(rendered)
    }

    fn seek(&mut self, frame: u64) -> Result<(), StreamError> {
        self.position = (frame as usize).min(self.frame_count());
        Ok(())
    }

    fn wraps_at_loop_end(&self) -> bool {
        self.wrap
    }
}

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
use std::fmt;

/// The maximum number of channels a stream set or sequence can carry.
pub const MAX_CHANNELS: usize = u16::BITS as usize;

/// Sample counts in the container are always padded to a multiple of this.
pub const SAMPLE_BLOCK: u32 = 0x400;

/// Audio facts for one conversion run: what the source reports before overrides,
/// and what will be declared after them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioProperties {
    pub sample_rate: u32,
    pub total_samples: i32,
    pub loop_enabled: bool,
    pub loop_start: i32,
    pub loop_end: i32,
    pub channel_count: u8,
}

impl AudioProperties {
    /// Properties for a source without loop metadata.
    pub fn new(sample_rate: u32, total_samples: i32, channel_count: u8) -> AudioProperties {
        AudioProperties {
            sample_rate,
            total_samples,
            loop_enabled: false,
            loop_start: 0,
            loop_end: 0,
            channel_count,
        }
    }

    /// Properties for a source that loops between the given points.
    pub fn looping(
        sample_rate: u32,
        total_samples: i32,
        loop_start: i32,
        loop_end: i32,
        channel_count: u8,
    ) -> AudioProperties {
        AudioProperties {
            sample_rate,
            total_samples,
            loop_enabled: true,
            loop_start,
            loop_end,
            channel_count,
        }
    }

    /// The total sample count rounded up to the container's block multiple.
    pub fn padded_samples(&self) -> u32 {
        round_up_to_block(self.total_samples.max(0) as u32)
    }

    /// The channels carried by these properties.
    pub fn channels(&self) -> ChannelSet {
        ChannelSet::from_count(self.channel_count)
    }
}

impl fmt::Display for AudioProperties {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} Hz, {} channel(s), {} samples ({})",
            self.sample_rate,
            self.channel_count,
            self.total_samples,
            samples_to_time(self.sample_rate, self.total_samples as i64)
        )?;
        if self.loop_enabled {
            write!(
                f,
                ", loop {}..{} ({}..{})",
                self.loop_start,
                self.loop_end,
                samples_to_time(self.sample_rate, self.loop_start as i64),
                samples_to_time(self.sample_rate, self.loop_end as i64)
            )?;
        }
        Ok(())
    }
}

/// Rounds a sample count up to the next block multiple.
pub fn round_up_to_block(samples: u32) -> u32 {
    match samples % SAMPLE_BLOCK {
        0 => samples,
        rem => samples + (SAMPLE_BLOCK - rem),
    }
}

/// Converts a microsecond offset to a sample offset at the given rate.
pub fn micros_to_samples(sample_rate: u32, micros: i64) -> i64 {
    (sample_rate as f64 * micros as f64 / 1_000_000.0).round() as i64
}

/// Converts a sample offset to microseconds at the given rate.
pub fn samples_to_micros(sample_rate: u32, samples: i64) -> i64 {
    if sample_rate == 0 {
        return 0;
    }
    (samples as f64 * 1_000_000.0 / sample_rate as f64).round() as i64
}

/// Formats a sample offset as h:mm:ss.uuuuuu.
pub fn samples_to_time(sample_rate: u32, samples: i64) -> String {
    let micros = samples_to_micros(sample_rate, samples);
    let sign = if micros < 0 { "-" } else { "" };
    let micros = micros.unsigned_abs();
    let secs = micros / 1_000_000;
    format!(
        "{}{}:{:02}:{:02}.{:06}",
        sign,
        secs / 3600,
        (secs / 60) % 60,
        secs % 60,
        micros % 1_000_000
    )
}

/// A set of enabled channel indices, at most 16.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelSet(u16);

impl ChannelSet {
    /// Creates a set with channels `0..count` enabled. Counts above the maximum are capped.
    pub fn from_count(count: u8) -> ChannelSet {
        let count = (count as usize).min(MAX_CHANNELS);
        if count == MAX_CHANNELS {
            ChannelSet(u16::MAX)
        } else {
            ChannelSet((1u16 << count) - 1)
        }
    }

    /// Creates a set from a raw bitmask.
    pub fn from_bits(bits: u16) -> ChannelSet {
        ChannelSet(bits)
    }

    /// Returns the raw bitmask.
    pub fn bits(&self) -> u16 {
        self.0
    }

    /// Enables the given channel index.
    pub fn insert(&mut self, index: usize) {
        if index < MAX_CHANNELS {
            self.0 |= 1 << index;
        }
    }

    pub fn contains(&self, index: usize) -> bool {
        index < MAX_CHANNELS && self.0 & (1 << index) != 0
    }

    /// The number of enabled channels.
    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Iterates over the enabled channel indices in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        (0..MAX_CHANNELS).filter(move |&i| self.contains(i))
    }

    /// The set of the `count` highest channel indices, e.g. 14 and 15 for a count of 2.
    pub fn upper(count: usize) -> ChannelSet {
        let count = count.min(MAX_CHANNELS);
        let mut set = ChannelSet::default();
        for i in MAX_CHANNELS - count..MAX_CHANNELS {
            set.insert(i);
        }
        set
    }
}

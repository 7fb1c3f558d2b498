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
use std::time::Duration;

use crate::properties::micros_to_samples;

/// A position in the stream, either as a sample index or a time offset.
/// Negative values count backwards from the end of the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleOffset {
    Samples(i64),
    Micros(i64),
}

impl SampleOffset {
    /// Whether the offset counts back from the end. The sign is the one given, before any
    /// rounding to samples.
    pub fn is_relative(self) -> bool {
        match self {
            SampleOffset::Samples(v) | SampleOffset::Micros(v) => v < 0,
        }
    }

    /// Resolves the offset to a sample index at the given rate.
    pub fn to_samples(self, sample_rate: u32) -> i64 {
        match self {
            SampleOffset::Samples(samples) => samples,
            SampleOffset::Micros(micros) => micros_to_samples(sample_rate, micros),
        }
    }
}

/// The user's overrides for one conversion run. Built once before any work starts
/// and never mutated afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversionRequest {
    /// Replaces the reported sample rate without resampling.
    pub sample_rate: Option<u32>,
    /// Resamples the audio to this rate.
    pub resample_rate: Option<u32>,
    /// Forces looping on or off.
    pub loop_enabled: Option<bool>,
    pub loop_start: Option<SampleOffset>,
    /// The loop end, which is also the total stream length.
    pub loop_end: Option<SampleOffset>,
}

/// How long the sequence keeps its channels alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DurationMode {
    /// Hold forever and branch back if the wait ever elapses.
    Infinite,
    /// Stop after the given wall-clock time.
    Finite(Duration),
}

pub const MUTE_SCALE_DEFAULT: i8 = 0x3F;
pub const MASTER_VOLUME_DEFAULT: u8 = 0x7F;

/// Sequence-level settings that don't depend on the audio itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceSettings {
    pub mute_scale: i8,
    pub master_volume: u8,
    /// Pans every channel to the center.
    pub force_mono: bool,
    /// Overrides the duration derived from the stream.
    pub duration: Option<DurationMode>,
}

impl Default for SequenceSettings {
    fn default() -> Self {
        SequenceSettings {
            mute_scale: MUTE_SCALE_DEFAULT,
            master_volume: MASTER_VOLUME_DEFAULT,
            force_mono: false,
            duration: None,
        }
    }
}

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
//! The `.m64` sequence that plays a set of streams: a sequence header enabling one sequence
//! channel per stream, one channel header per stream and a single shared track holding one
//! long note.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{error, info};

use crate::error::StreamError;
use crate::properties::{ChannelSet, MAX_CHANNELS};
use crate::request::{DurationMode, SequenceSettings};

// Sequence commands.
const SEQ_MUTE_BEHAVIOR: u8 = 0xD3;
const SEQ_MUTE_SCALE: u8 = 0xD5;
const SEQ_CHANNEL_DISABLE: u8 = 0xD6;
const SEQ_CHANNEL_ENABLE: u8 = 0xD7;
const SEQ_VOLUME: u8 = 0xDB;
const SEQ_TEMPO: u8 = 0xDD;
const SEQ_BRANCH_ABS_ALWAYS: u8 = 0xFB;
const SEQ_TIMESTAMP: u8 = 0xFD;
const SEQ_END_OF_DATA: u8 = 0xFF;
const SEQ_CHANNEL_POINTER: u8 = 0x90;

// Channel commands.
const CHN_TRACK_POINTER: u8 = 0x90;
const CHN_PRIORITY_MAX: u8 = 0x6F;
const CHN_INSTRUMENT: u8 = 0xC1;
const CHN_START: u8 = 0xC4;
const CHN_PITCH_BEND: u8 = 0xD3;
const CHN_EFFECT: u8 = 0xD4;
const CHN_PAN: u8 = 0xDD;
const CHN_VOLUME: u8 = 0xDF;
const CHN_TIMESTAMP: u8 = 0xFD;
const CHN_END_OF_DATA: u8 = 0xFF;

// Track commands.
const TRK_NOTE_TV: u8 = 0x40;
const TRK_TIMESTAMP: u8 = 0xC0;
const TRK_TRANSPOSE: u8 = 0xC2;
const TRK_END_OF_DATA: u8 = 0xFF;

const MIDDLE_C: u8 = 0x27;
const MUTE_BEHAVIOR_SOFTEN: u8 = 0x20;
const CHANNEL_VOLUME_MAX: u8 = 0x7F;
const NOTE_VELOCITY: u8 = 0x7F;

pub const PAN_LEFT: u8 = 0x00;
pub const PAN_CENTER: u8 = 0x3F;
pub const PAN_RIGHT: u8 = 0x7F;

const SEQ_HEADER_SIZE_LOOPING: usize = 0x19;
const SEQ_HEADER_SIZE_FINITE: usize = 0x16;
pub const CHN_HEADER_SIZE: usize = 0x13;
pub const TRK_HEADER_SIZE: usize = 0x09;
const ABS_PTR_SIZE: usize = 0x03;

/// Offset of the first channel pointer event, where the loop branch lands.
pub const BRANCH_TARGET: u16 = 0x0009;

/// Priming tempo and delay set before the real tempo takes over.
const PRIMING_TEMPO: u8 = 0x30;
const PRIMING_DELAY: u16 = 0x06;
/// Track delay before the note starts.
const TRACK_DELAY: u8 = 0x05;

/// Longest wait a long-form timestamp can hold.
const MAX_TIMESTAMP: u16 = 0x7FFF;
/// Longest main wait, leaving room for the priming delay in the channel timestamp.
pub const MAX_WAIT_TICKS: u16 = MAX_TIMESTAMP - PRIMING_DELAY;

const REFERENCE_TEMPO: u32 = 120;
const TICKS_PER_BEAT: u32 = 48;

/// Byte layout of a sequence, derived from its channel count and whether it loops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceLayout {
    pub channel_count: usize,
    pub looping: bool,
}

impl SequenceLayout {
    pub fn new(channel_count: usize, looping: bool) -> SequenceLayout {
        SequenceLayout {
            channel_count,
            looping,
        }
    }

    /// Size of the sequence header including its channel pointers.
    pub fn header_size(&self) -> usize {
        let base = if self.looping {
            SEQ_HEADER_SIZE_LOOPING
        } else {
            SEQ_HEADER_SIZE_FINITE
        };
        base + self.channel_count * ABS_PTR_SIZE
    }

    /// Absolute offset of the given channel's header.
    pub fn channel_pointer(&self, index: usize) -> u16 {
        (self.header_size() + index * CHN_HEADER_SIZE) as u16
    }

    /// Absolute offset of the shared track.
    pub fn track_pointer(&self) -> u16 {
        (self.header_size() + self.channel_count * CHN_HEADER_SIZE) as u16
    }

    pub fn total_size(&self) -> usize {
        self.track_pointer() as usize + TRK_HEADER_SIZE
    }
}

/// Tempo and tick counts realizing a duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceTiming {
    /// Whether the sequence holds forever and branches back.
    pub looping: bool,
    pub tempo: u8,
    /// Main wait after priming, in ticks at `tempo`.
    pub wait_ticks: u16,
    /// How long each channel stays alive, priming included.
    pub channel_ticks: u16,
    /// How long the note is held after the track delay.
    pub note_ticks: u16,
}

impl SequenceTiming {
    fn infinite() -> SequenceTiming {
        SequenceTiming {
            looping: true,
            tempo: 0,
            wait_ticks: MAX_WAIT_TICKS,
            channel_ticks: MAX_TIMESTAMP,
            note_ticks: MAX_TIMESTAMP - TRACK_DELAY as u16,
        }
    }

    /// Computes the tempo and waits for a duration mode.
    ///
    /// Durations that fit in the longest wait at the reference tempo use it directly. Longer
    /// ones scale the tempo down until they fit, and a duration too long for even the slowest
    /// tempo becomes an infinite loop.
    pub fn new(mode: DurationMode) -> SequenceTiming {
        let duration = match mode {
            DurationMode::Infinite => return SequenceTiming::infinite(),
            DurationMode::Finite(duration) => duration,
        };

        let reference_ticks = duration_to_ticks(duration, REFERENCE_TEMPO);
        let tempo = if reference_ticks <= MAX_WAIT_TICKS as u64 {
            REFERENCE_TEMPO
        } else {
            ((REFERENCE_TEMPO as u64 * MAX_WAIT_TICKS as u64) / reference_ticks) as u32
        };
        if tempo == 0 {
            info!(
                duration = ?duration,
                "Sequence duration is too long to encode, looping indefinitely instead"
            );
            return SequenceTiming::infinite();
        }

        let wait_ticks = duration_to_ticks(duration, tempo).clamp(1, MAX_WAIT_TICKS as u64) as u16;
        let channel_ticks = PRIMING_DELAY + wait_ticks;
        SequenceTiming {
            looping: false,
            tempo: tempo as u8,
            wait_ticks,
            channel_ticks,
            note_ticks: channel_ticks - TRACK_DELAY as u16,
        }
    }
}

fn duration_to_ticks(duration: Duration, tempo: u32) -> u64 {
    let micros = duration.as_micros() as f64;
    (micros * tempo as f64 * TICKS_PER_BEAT as f64 / 60_000_000.0).round() as u64
}

fn long_timestamp(ticks: u16) -> [u8; 2] {
    (0x8000 | ticks.min(MAX_TIMESTAMP)).to_be_bytes()
}

/// The pan for a channel. Odd channels are right, even channels are left, and a trailing
/// channel with no partner is centered.
pub fn channel_pan(index: usize, channel_count: usize, force_mono: bool) -> u8 {
    if force_mono {
        PAN_CENTER
    } else if index % 2 == 1 {
        PAN_RIGHT
    } else if index + 1 == channel_count {
        PAN_CENTER
    } else {
        PAN_LEFT
    }
}

/// Encoded sequence bytes and any self-check warnings raised while building them.
#[derive(Debug)]
pub struct EncodedSequence {
    pub bytes: Vec<u8>,
    pub warnings: Vec<StreamError>,
}

/// A sequence playing one instrument per enabled channel.
#[derive(Debug, Clone)]
pub struct SequenceFile {
    instruments: Vec<u8>,
    settings: SequenceSettings,
    timing: SequenceTiming,
    layout: SequenceLayout,
}

impl SequenceFile {
    /// Creates a sequence for the given instruments, one per enabled index.
    pub fn new(
        channels: ChannelSet,
        settings: SequenceSettings,
        mode: DurationMode,
    ) -> Result<SequenceFile, StreamError> {
        if channels.is_empty() {
            error!("No channels to generate a sequence for");
            return Err(StreamError::NoChannels);
        }

        let instruments: Vec<u8> = channels.iter().map(|i| i as u8).collect();
        let timing = SequenceTiming::new(mode);
        let layout = SequenceLayout::new(instruments.len(), timing.looping);

        Ok(SequenceFile {
            instruments,
            settings,
            timing,
            layout,
        })
    }

    pub fn layout(&self) -> SequenceLayout {
        self.layout
    }

    pub fn timing(&self) -> SequenceTiming {
        self.timing
    }

    /// The sequence channels in use: the top `n` of the 16.
    fn enabled_channels(&self) -> ChannelSet {
        ChannelSet::upper(self.instruments.len())
    }

    fn sequence_header(&self) -> Vec<u8> {
        let mask = self.enabled_channels().bits().to_be_bytes();
        let mut header = Vec::with_capacity(self.layout.header_size());

        header.extend_from_slice(&[SEQ_MUTE_BEHAVIOR, MUTE_BEHAVIOR_SOFTEN]);
        header.extend_from_slice(&[SEQ_MUTE_SCALE, self.settings.mute_scale as u8]);
        header.extend_from_slice(&[SEQ_CHANNEL_ENABLE, mask[0], mask[1]]);
        header.extend_from_slice(&[SEQ_VOLUME, self.settings.master_volume]);

        let first = MAX_CHANNELS - self.instruments.len();
        for (index, channel) in (first..MAX_CHANNELS).enumerate() {
            let pointer = self.layout.channel_pointer(index).to_be_bytes();
            header.extend_from_slice(&[
                SEQ_CHANNEL_POINTER + channel as u8,
                pointer[0],
                pointer[1],
            ]);
        }

        // A short wait at a nonzero tempo so a restarted sequence stays in sync and muted
        // channels don't sound before they're silenced.
        header.extend_from_slice(&[SEQ_TEMPO, PRIMING_TEMPO]);
        header.extend_from_slice(&[SEQ_TIMESTAMP, PRIMING_DELAY as u8]);

        header.extend_from_slice(&[SEQ_TEMPO, self.timing.tempo]);
        header.push(SEQ_TIMESTAMP);
        header.extend_from_slice(&long_timestamp(self.timing.wait_ticks));

        if self.timing.looping {
            let target = BRANCH_TARGET.to_be_bytes();
            header.extend_from_slice(&[SEQ_BRANCH_ABS_ALWAYS, target[0], target[1]]);
        }

        header.extend_from_slice(&[SEQ_CHANNEL_DISABLE, mask[0], mask[1]]);
        header.push(SEQ_END_OF_DATA);
        header
    }

    fn channel_header(&self, index: usize) -> Vec<u8> {
        let track = self.layout.track_pointer().to_be_bytes();
        let pan = channel_pan(index, self.instruments.len(), self.settings.force_mono);
        let mut header = Vec::with_capacity(CHN_HEADER_SIZE);

        header.push(CHN_START);
        header.extend_from_slice(&[CHN_TRACK_POINTER, track[0], track[1]]);
        header.extend_from_slice(&[CHN_PAN, pan]);
        header.extend_from_slice(&[CHN_VOLUME, CHANNEL_VOLUME_MAX]);
        header.extend_from_slice(&[CHN_PITCH_BEND, 0x00]);
        header.extend_from_slice(&[CHN_EFFECT, 0x00]);
        // Sound effects never take this channel over.
        header.push(CHN_PRIORITY_MAX);
        header.extend_from_slice(&[CHN_INSTRUMENT, self.instruments[index]]);
        header.push(CHN_TIMESTAMP);
        header.extend_from_slice(&long_timestamp(self.timing.channel_ticks));
        header.push(CHN_END_OF_DATA);
        header
    }

    fn track(&self) -> Vec<u8> {
        let length = long_timestamp(self.timing.note_ticks);
        vec![
            TRK_TRANSPOSE,
            0x00,
            TRK_TIMESTAMP,
            TRACK_DELAY,
            TRK_NOTE_TV + MIDDLE_C,
            length[0],
            length[1],
            NOTE_VELOCITY,
            TRK_END_OF_DATA,
        ]
    }

    /// Encodes the whole sequence. Every block is checked against its precomputed size.
    pub fn encode(&self) -> EncodedSequence {
        let mut bytes = Vec::with_capacity(self.layout.total_size());
        let mut warnings = Vec::new();

        let header = self.sequence_header();
        check_size("sequence header", self.layout.header_size(), header.len(), &mut warnings);
        bytes.extend_from_slice(&header);

        for index in 0..self.instruments.len() {
            let channel = self.channel_header(index);
            check_size("channel header", CHN_HEADER_SIZE, channel.len(), &mut warnings);
            bytes.extend_from_slice(&channel);
        }

        let track = self.track();
        check_size("track data", TRK_HEADER_SIZE, track.len(), &mut warnings);
        bytes.extend_from_slice(&track);

        EncodedSequence { bytes, warnings }
    }

    /// Encodes the sequence and writes it to the given path. Returns the self-check warnings.
    pub fn write<P: AsRef<Path>>(&self, path: P) -> Result<Vec<StreamError>, StreamError> {
        let path = path.as_ref();
        let encoded = self.encode();

        let file = File::create(path).map_err(|e| {
            error!(path = ?path, err = %e, "Could not open sequence file for writing");
            StreamError::CannotCreateFile {
                path: path.to_path_buf(),
                source: e,
            }
        })?;
        let mut writer = BufWriter::new(file);
        writer.write_all(&encoded.bytes)?;
        writer.flush()?;

        info!(
            path = ?path,
            channels = self.instruments.len(),
            looping = self.timing.looping,
            tempo = self.timing.tempo,
            ticks = self.timing.wait_ticks,
            "Wrote sequence"
        );
        Ok(encoded.warnings)
    }
}

fn check_size(what: &'static str, expected: usize, actual: usize, warnings: &mut Vec<StreamError>) {
    if expected != actual {
        error!(
            expected,
            actual,
            "FATAL WARNING! Precalculated {} size does not match output! Your output sequence may not work!",
            what
        );
        warnings.push(StreamError::LayoutMismatch {
            what,
            expected,
            actual,
        });
    }
}

/// The sequence path for an output base name: `<dir>/XX_<name>.m64`.
pub fn sequence_path(base: &Path) -> PathBuf {
    prefixed_path(base, "m64")
}

/// `<dir>/XX_<name>.<extension>` for an output base name.
pub fn prefixed_path(base: &Path, extension: &str) -> PathBuf {
    let name = base
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let file = format!("XX_{}.{}", name, extension);
    match base.parent() {
        Some(dir) => dir.join(file),
        None => PathBuf::from(file),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sequence(count: u8, mode: DurationMode) -> SequenceFile {
        SequenceFile::new(ChannelSet::from_count(count), SequenceSettings::default(), mode)
            .unwrap()
    }

    #[test]
    fn test_layout_matches_output() {
        for count in 1..=16u8 {
            for mode in [
                DurationMode::Infinite,
                DurationMode::Finite(Duration::from_secs(90)),
            ] {
                let seq = sequence(count, mode);
                let encoded = seq.encode();
                assert!(encoded.warnings.is_empty(), "count {} mode {:?}", count, mode);

                let layout = seq.layout();
                assert_eq!(layout.total_size(), encoded.bytes.len());
                let n = count as usize;
                let header = (if layout.looping { 0x19 } else { 0x16 }) + 3 * n;
                assert_eq!(header, layout.header_size());
                assert_eq!((header + 0x13 * n) as u16, layout.track_pointer());

                // Every channel pointer lands on a channel start command.
                for index in 0..n {
                    let at = layout.channel_pointer(index) as usize;
                    assert_eq!(CHN_START, encoded.bytes[at]);
                    let pointer_event = 9 + index * 3;
                    assert_eq!(
                        SEQ_CHANNEL_POINTER + (16 - n + index) as u8,
                        encoded.bytes[pointer_event]
                    );
                    assert_eq!(
                        layout.channel_pointer(index).to_be_bytes(),
                        [encoded.bytes[pointer_event + 1], encoded.bytes[pointer_event + 2]]
                    );
                }
                assert_eq!(
                    TRK_TRANSPOSE,
                    encoded.bytes[layout.track_pointer() as usize]
                );
            }
        }
    }

    #[test]
    fn test_stereo_loop_bytes() {
        let encoded = sequence(2, DurationMode::Infinite).encode();
        assert_eq!(
            vec![
                0xD3, 0x20, 0xD5, 0x3F, 0xD7, 0xC0, 0x00, 0xDB, 0x7F, // settings
                0x9E, 0x00, 0x1F, 0x9F, 0x00, 0x32, // channel pointers
                0xDD, 0x30, 0xFD, 0x06, // priming
                0xDD, 0x00, 0xFD, 0xFF, 0xF9, // hold
                0xFB, 0x00, 0x09, // branch
                0xD6, 0xC0, 0x00, 0xFF,
            ],
            encoded.bytes[..0x1F].to_vec()
        );
        assert_eq!(
            vec![
                0xC4, 0x90, 0x00, 0x45, 0xDD, 0x00, 0xDF, 0x7F, 0xD3, 0x00, 0xD4, 0x00, 0x6F,
                0xC1, 0x00, 0xFD, 0xFF, 0xFF, 0xFF,
            ],
            encoded.bytes[0x1F..0x32].to_vec()
        );
        assert_eq!(0x7F, encoded.bytes[0x32 + 5]);
        assert_eq!(0x01, encoded.bytes[0x32 + 14]);
        assert_eq!(
            vec![0xC2, 0x00, 0xC0, 0x05, 0x67, 0xFF, 0xFA, 0x7F, 0xFF],
            encoded.bytes[0x45..].to_vec()
        );
    }

    #[test]
    fn test_finite_duration_bytes() {
        let seq = sequence(1, DurationMode::Finite(Duration::from_secs(10)));
        let timing = seq.timing();
        assert!(!timing.looping);
        assert_eq!(120, timing.tempo);
        assert_eq!(960, timing.wait_ticks);
        assert_eq!(966, timing.channel_ticks);
        assert_eq!(961, timing.note_ticks);

        let encoded = seq.encode();
        assert_eq!(
            vec![
                0xD3, 0x20, 0xD5, 0x3F, 0xD7, 0x80, 0x00, 0xDB, 0x7F, 0x9F, 0x00, 0x19, 0xDD,
                0x30, 0xFD, 0x06, 0xDD, 0x78, 0xFD, 0x83, 0xC0, 0xD6, 0x80, 0x00, 0xFF,
            ],
            encoded.bytes[..0x19].to_vec()
        );
        // No branch in finite mode.
        assert!(!encoded.bytes[..0x19].contains(&SEQ_BRANCH_ABS_ALWAYS));
        assert_eq!(&[0x83, 0xC6], &encoded.bytes[0x19 + 16..0x19 + 18]);
        assert_eq!(&[0x83, 0xC1], &encoded.bytes[0x19 + 0x13 + 5..0x19 + 0x13 + 7]);
    }

    #[test]
    fn test_long_duration_scales_tempo() {
        // One hour: 345600 ticks at the reference tempo, too many for one wait.
        let timing = SequenceTiming::new(DurationMode::Finite(Duration::from_secs(3600)));
        assert!(!timing.looping);
        assert_eq!(11, timing.tempo);
        assert_eq!(31680, timing.wait_ticks);
        assert!(timing.wait_ticks <= MAX_WAIT_TICKS);
    }

    #[test]
    fn test_very_long_duration_loops() {
        let seq = sequence(2, DurationMode::Finite(Duration::from_secs(12 * 3600)));
        let timing = seq.timing();
        assert!(timing.looping);
        assert_eq!(0, timing.tempo);
        assert_eq!(MAX_WAIT_TICKS, timing.wait_ticks);
        let encoded = seq.encode();
        assert!(encoded.warnings.is_empty());
        assert_eq!(&[0xFB, 0x00, 0x09], &encoded.bytes[24..27]);
    }

    #[test]
    fn test_zero_duration_waits_one_tick() {
        let timing = SequenceTiming::new(DurationMode::Finite(Duration::ZERO));
        assert!(!timing.looping);
        assert_eq!(1, timing.wait_ticks);
        assert_eq!(7, timing.channel_ticks);
    }

    #[test]
    fn test_pan() {
        assert_eq!(PAN_CENTER, channel_pan(0, 1, false));
        assert_eq!(PAN_LEFT, channel_pan(0, 2, false));
        assert_eq!(PAN_RIGHT, channel_pan(1, 2, false));
        assert_eq!(PAN_LEFT, channel_pan(0, 3, false));
        assert_eq!(PAN_RIGHT, channel_pan(1, 3, false));
        assert_eq!(PAN_CENTER, channel_pan(2, 3, false));
        assert_eq!(PAN_LEFT, channel_pan(14, 16, false));
        assert_eq!(PAN_RIGHT, channel_pan(15, 16, false));
        for index in 0..4 {
            assert_eq!(PAN_CENTER, channel_pan(index, 4, true));
        }
    }

    #[test]
    fn test_mono_setting_centers_every_channel() {
        let settings = SequenceSettings {
            force_mono: true,
            ..Default::default()
        };
        let seq = SequenceFile::new(ChannelSet::from_count(2), settings, DurationMode::Infinite)
            .unwrap();
        let encoded = seq.encode();
        let layout = seq.layout();
        for index in 0..2 {
            let at = layout.channel_pointer(index) as usize;
            assert_eq!(&[CHN_PAN, PAN_CENTER], &encoded.bytes[at + 4..at + 6]);
        }
    }

    #[test]
    fn test_settings_are_encoded() {
        let settings = SequenceSettings {
            mute_scale: -1,
            master_volume: 0xC8,
            ..Default::default()
        };
        let encoded = SequenceFile::new(ChannelSet::from_count(1), settings, DurationMode::Infinite)
            .unwrap()
            .encode();
        assert_eq!(&[0xD5, 0xFF], &encoded.bytes[2..4]);
        assert_eq!(&[0xDB, 0xC8], &encoded.bytes[7..9]);
    }

    #[test]
    fn test_instruments_follow_enabled_channels() {
        let seq = SequenceFile::new(
            ChannelSet::from_bits(0b1010),
            SequenceSettings::default(),
            DurationMode::Infinite,
        )
        .unwrap();
        let encoded = seq.encode();
        let layout = seq.layout();
        assert_eq!(0x01, encoded.bytes[layout.channel_pointer(0) as usize + 14]);
        assert_eq!(0x03, encoded.bytes[layout.channel_pointer(1) as usize + 14]);
    }

    #[test]
    fn test_no_channels() {
        assert!(matches!(
            SequenceFile::new(
                ChannelSet::default(),
                SequenceSettings::default(),
                DurationMode::Infinite
            ),
            Err(StreamError::NoChannels)
        ));
    }

    #[test]
    fn test_paths() {
        assert_eq!(
            PathBuf::from("out/XX_song.m64"),
            sequence_path(Path::new("out/song"))
        );
        assert_eq!(PathBuf::from("XX_song.json"), prefixed_path(Path::new("song"), "json"));
    }

    #[test]
    fn test_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = sequence_path(&dir.path().join("song"));
        let seq = sequence(2, DurationMode::Infinite);
        let warnings = seq.write(&path).unwrap();
        assert!(warnings.is_empty());
        assert_eq!(seq.encode().bytes, std::fs::read(&path).unwrap());
    }
}

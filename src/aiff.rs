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
//! Streamed-audio container output. Each channel of the source is written to its own
//! single-channel, 16-bit, big-endian AIFF file whose sample count is padded to a whole
//! number of blocks.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, error, info};

use crate::error::StreamError;
use crate::properties::{samples_to_time, AudioProperties, SAMPLE_BLOCK};
use crate::resample::{ResampledProperties, ResampledRenderer};
use crate::source::{RenderSource, StreamCursor};

pub const FORM_HEADER_SIZE: u32 = 0x0C;
pub const COMM_HEADER_SIZE: u32 = 0x1A;
pub const MARK_HEADER_SIZE: u32 = 0x20;
pub const INST_HEADER_SIZE: u32 = 0x1C;
pub const SSND_PRE_HEADER_SIZE: u32 = 0x10;

/// Bytes per sample. Output is always 16-bit.
pub const SAMPLE_WIDTH: u32 = 2;

const SAMPLE_RATE_EXPONENT: u16 = 0x400E;
const STREAM_EXTENSION: &str = "aiff";

/// The exact size of one channel's container file.
pub fn container_size(props: &AudioProperties) -> u32 {
    let mut size = FORM_HEADER_SIZE + COMM_HEADER_SIZE;
    if props.loop_enabled {
        size += MARK_HEADER_SIZE + INST_HEADER_SIZE;
    }
    size + SSND_PRE_HEADER_SIZE + props.padded_samples() * SAMPLE_WIDTH
}

/// Encodes a sample rate as an 80-bit extended-precision float.
///
/// The rate is shifted into a 16-bit window with the top bit set, adjusting the exponent
/// by one for each shift. Bits shifted out on the right become the top of the 48-bit
/// remainder of the mantissa.
pub fn encode_sample_rate(sample_rate: u32) -> [u8; 10] {
    let mut encoded = [0u8; 10];
    if sample_rate == 0 {
        return encoded;
    }

    let mut exponent = SAMPLE_RATE_EXPONENT;
    let mut mantissa = sample_rate as u64;
    let mut remainder: u64 = 0;
    while mantissa < 0x8000 {
        exponent -= 1;
        mantissa <<= 1;
    }
    while mantissa > 0xFFFF {
        exponent += 1;
        remainder = (remainder >> 1) | ((mantissa & 1) << 47);
        mantissa >>= 1;
    }

    encoded[0..2].copy_from_slice(&exponent.to_be_bytes());
    encoded[2..4].copy_from_slice(&(mantissa as u16).to_be_bytes());
    encoded[4..10].copy_from_slice(&remainder.to_be_bytes()[2..8]);
    encoded
}

/// Builds the chunk headers shared by every channel's file, up to the first sample.
pub fn stream_headers(props: &AudioProperties) -> Vec<u8> {
    let data_size = props.padded_samples() * SAMPLE_WIDTH;
    let mut header = Vec::with_capacity((container_size(props) - data_size) as usize);
    let padded = props.padded_samples();

    // FORM
    header.extend_from_slice(b"FORM");
    header.extend_from_slice(&(container_size(props) - 8).to_be_bytes());
    header.extend_from_slice(b"AIFF");

    // COMM: one channel, padded frame count, 16 bits, extended sample rate.
    header.extend_from_slice(b"COMM");
    header.extend_from_slice(&(COMM_HEADER_SIZE - 8).to_be_bytes());
    header.extend_from_slice(&1u16.to_be_bytes());
    header.extend_from_slice(&padded.to_be_bytes());
    header.extend_from_slice(&((SAMPLE_WIDTH * 8) as u16).to_be_bytes());
    header.extend_from_slice(&encode_sample_rate(props.sample_rate));

    if props.loop_enabled {
        // MARK: marker 1 "start" and marker 2 "end".
        header.extend_from_slice(b"MARK");
        header.extend_from_slice(&(MARK_HEADER_SIZE - 8).to_be_bytes());
        header.extend_from_slice(&2u16.to_be_bytes());
        header.extend_from_slice(&1u16.to_be_bytes());
        header.extend_from_slice(&(props.loop_start as u32).to_be_bytes());
        header.push(5);
        header.extend_from_slice(b"start");
        header.extend_from_slice(&2u16.to_be_bytes());
        header.extend_from_slice(&(props.loop_end as u32).to_be_bytes());
        header.push(3);
        header.extend_from_slice(b"end");

        // INST: no note or velocity mapping, sustain loop forward over markers 1..2.
        header.extend_from_slice(b"INST");
        header.extend_from_slice(&(INST_HEADER_SIZE - 8).to_be_bytes());
        header.extend_from_slice(&[0u8; 6]);
        header.extend_from_slice(&0u16.to_be_bytes());
        header.extend_from_slice(&1u16.to_be_bytes());
        header.extend_from_slice(&1u16.to_be_bytes());
        header.extend_from_slice(&2u16.to_be_bytes());
        header.extend_from_slice(&[0u8; 6]);
    }

    // SSND: offset and block size are always zero.
    header.extend_from_slice(b"SSND");
    header.extend_from_slice(&(SSND_PRE_HEADER_SIZE + padded * SAMPLE_WIDTH - 8).to_be_bytes());
    header.extend_from_slice(&0u32.to_be_bytes());
    header.extend_from_slice(&0u32.to_be_bytes());

    header
}

/// Produces planar 16-bit blocks for the container writer.
pub trait BlockRenderer {
    /// Fills each channel's buffer with up to `frames` frames. Returns the number of frames
    /// produced; fewer than requested means the rest of the block is silence.
    fn next_block(&mut self, planar: &mut [Vec<i16>], frames: usize) -> Result<usize, StreamError>;
}

/// Renders blocks straight from the source at its own rate. A looping stream repeats its loop
/// window up to the declared total, the same as the resampled path.
pub struct DirectRenderer<'a, S: RenderSource + ?Sized> {
    cursor: StreamCursor<'a, S>,
    interleaved: Vec<i16>,
}

impl<'a, S: RenderSource + ?Sized> DirectRenderer<'a, S> {
    pub fn new(source: &'a mut S, resolved: &AudioProperties) -> DirectRenderer<'a, S> {
        DirectRenderer {
            cursor: StreamCursor::new(source, resolved),
            interleaved: Vec::new(),
        }
    }
}

impl<S: RenderSource + ?Sized> BlockRenderer for DirectRenderer<'_, S> {
    fn next_block(&mut self, planar: &mut [Vec<i16>], frames: usize) -> Result<usize, StreamError> {
        let channels = planar.len();
        self.interleaved.resize(frames * channels, 0);

        let mut rendered = 0;
        while rendered < frames {
            let count = self.cursor.read(
                &mut self.interleaved[rendered * channels..frames * channels],
                frames - rendered,
            )?;
            if count == 0 {
                break;
            }
            rendered += count;
        }

        for (ch, out) in planar.iter_mut().enumerate() {
            out.clear();
            out.extend(
                self.interleaved[..rendered * channels]
                    .iter()
                    .skip(ch)
                    .step_by(channels),
            );
        }
        Ok(rendered)
    }
}

/// The outcome of writing a set of files.
#[derive(Debug, Default)]
pub struct WriteReport {
    /// Bytes written to each file.
    pub bytes_written: Vec<u64>,
    /// Non-fatal self-check failures.
    pub warnings: Vec<StreamError>,
}

/// Writes the headers and rendered samples for every channel. Each writer receives exactly
/// `container_size(declared)` bytes.
pub fn write_stream_data<R: BlockRenderer + ?Sized, W: Write>(
    declared: &AudioProperties,
    renderer: &mut R,
    writers: &mut [W],
) -> Result<WriteReport, StreamError> {
    let channels = declared.channel_count as usize;
    if channels == 0 {
        return Err(StreamError::NoChannels);
    }
    if writers.len() != channels {
        return Err(StreamError::InvalidParameters(format!(
            "{} output files for {} channels",
            writers.len(),
            channels
        )));
    }

    let expected = container_size(declared) as u64;
    let mut counts = vec![0u64; channels];

    let header = stream_headers(declared);
    for (writer, count) in writers.iter_mut().zip(counts.iter_mut()) {
        writer.write_all(&header)?;
        *count += header.len() as u64;
    }

    let block = SAMPLE_BLOCK as usize;
    let total = declared.total_samples.max(0) as usize;
    let padded = declared.padded_samples() as usize;
    let mut planar: Vec<Vec<i16>> = vec![Vec::with_capacity(block); channels];
    let mut bytes = Vec::with_capacity(block * SAMPLE_WIDTH as usize);
    let mut written = 0;

    while written < padded {
        let rendered = renderer.next_block(&mut planar, block)?;
        // Anything past the declared end is silence, whatever the renderer produced.
        let valid = rendered.min(total.saturating_sub(written));
        let frames = block.min(padded - written);

        for ((writer, count), samples) in writers.iter_mut().zip(counts.iter_mut()).zip(&planar) {
            bytes.clear();
            for i in 0..frames {
                let sample = if i < valid { samples[i] } else { 0 };
                bytes.extend_from_slice(&sample.to_be_bytes());
            }
            writer.write_all(&bytes)?;
            *count += bytes.len() as u64;
        }
        written += frames;
    }

    for writer in writers.iter_mut() {
        writer.flush()?;
    }

    let mut warnings = Vec::new();
    for (index, &actual) in counts.iter().enumerate() {
        if actual != expected {
            error!(
                channel = index,
                expected,
                actual,
                "FATAL WARNING! Precalculated stream file size does not match output! Your output stream may not work!"
            );
            warnings.push(StreamError::LayoutMismatch {
                what: "stream file",
                expected: expected as usize,
                actual: actual as usize,
            });
        }
    }

    Ok(WriteReport {
        bytes_written: counts,
        warnings,
    })
}

/// The suffix that distinguishes one channel's file from the others.
pub fn channel_suffix(index: usize, channel_count: usize) -> String {
    match channel_count {
        1 => String::new(),
        2 if index == 0 => "_L".to_string(),
        2 => "_R".to_string(),
        _ => format!("_{:X}", index),
    }
}

/// The output paths for a stream set, with any renames made to avoid the source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamNames {
    pub paths: Vec<PathBuf>,
    /// Whether each channel's name was changed to avoid overwriting the source.
    pub renamed: Vec<bool>,
}

impl StreamNames {
    /// Computes the per-channel paths `<base>[_L|_R|_<hex>][_0...].aiff`. A path that would
    /// overwrite the source gets `_0` appended until it no longer does.
    pub fn new(base: &Path, channel_count: usize, source: &Path) -> StreamNames {
        let mut paths = Vec::with_capacity(channel_count);
        let mut renamed = Vec::with_capacity(channel_count);

        for index in 0..channel_count {
            let mut stem = format!("{}{}", base.display(), channel_suffix(index, channel_count));
            let mut path = PathBuf::from(format!("{}.{}", stem, STREAM_EXTENSION));
            let mut was_renamed = false;
            while same_file(&path, source) {
                stem.push_str("_0");
                path = PathBuf::from(format!("{}.{}", stem, STREAM_EXTENSION));
                was_renamed = true;
            }
            if was_renamed {
                info!(
                    channel = index,
                    path = ?path,
                    "Renamed stream to avoid overwriting the source file"
                );
            }
            paths.push(path);
            renamed.push(was_renamed);
        }

        StreamNames { paths, renamed }
    }

    /// The sound names for the soundbank: each file's name without its extension.
    pub fn sound_names(&self) -> Vec<String> {
        self.paths
            .iter()
            .map(|p| {
                p.file_stem()
                    .map(|s| s.to_string_lossy().to_string())
                    .unwrap_or_default()
            })
            .collect()
    }
}

fn same_file(a: &Path, b: &Path) -> bool {
    if a == b {
        return true;
    }
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// The open output files for one stream set. Opened together, closed together on drop.
pub struct StreamFileSet {
    files: Vec<BufWriter<File>>,
}

impl StreamFileSet {
    /// Opens every path for writing. If any fails, the files opened so far are closed and
    /// the whole set fails.
    pub fn create(paths: &[PathBuf]) -> Result<StreamFileSet, StreamError> {
        let mut files = Vec::with_capacity(paths.len());
        for path in paths {
            match File::create(path) {
                Ok(file) => files.push(BufWriter::new(file)),
                Err(e) => {
                    error!(path = ?path, err = %e, "Could not open stream file for writing");
                    drop(files);
                    return Err(StreamError::CannotCreateFile {
                        path: path.clone(),
                        source: e,
                    });
                }
            }
        }
        Ok(StreamFileSet { files })
    }

    pub fn writers_mut(&mut self) -> &mut [BufWriter<File>] {
        &mut self.files
    }
}

/// Renders the source and writes one container file per channel.
///
/// When `resampled` is given the audio is converted to its target rate and the resampled
/// loop points are declared; otherwise the resolved properties are written as-is.
pub fn write_streams<S: RenderSource + ?Sized>(
    source: &mut S,
    resolved: &AudioProperties,
    resampled: Option<&ResampledProperties>,
    names: &StreamNames,
) -> Result<WriteReport, StreamError> {
    let declared = resampled.map(|r| r.declared()).unwrap_or(*resolved);
    if declared.channel_count == 0 {
        error!("No channels to write streams for");
        return Err(StreamError::NoChannels);
    }

    print_header_info(&declared);

    // The converter is allocated before any file is touched so a failure leaves nothing behind.
    let report = match resampled {
        Some(plan) => {
            let mut renderer = ResampledRenderer::new(source, plan)?;
            let mut files = StreamFileSet::create(&names.paths)?;
            write_stream_data(&declared, &mut renderer, files.writers_mut())?
        }
        None => {
            let mut renderer = DirectRenderer::new(source, resolved);
            let mut files = StreamFileSet::create(&names.paths)?;
            write_stream_data(&declared, &mut renderer, files.writers_mut())?
        }
    };

    debug!(files = names.paths.len(), "Finished writing streams");
    Ok(report)
}

fn print_header_info(declared: &AudioProperties) {
    info!(
        sample_rate = declared.sample_rate,
        channels = declared.channel_count,
        samples = declared.total_samples,
        length = %samples_to_time(declared.sample_rate, declared.total_samples as i64),
        file_size = container_size(declared),
        "Generating streamed file(s)"
    );
    if declared.loop_enabled {
        info!(
            loop_start = declared.loop_start,
            loop_start_time = %samples_to_time(declared.sample_rate, declared.loop_start as i64),
            loop_end = declared.loop_end,
            loop_end_time = %samples_to_time(declared.sample_rate, declared.loop_end as i64),
            "Stream loop"
        );
    }
}

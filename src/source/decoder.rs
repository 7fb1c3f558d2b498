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
use std::fs::File;
use std::io::{Seek, SeekFrom};
use std::path::Path;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, Packet, SeekMode, SeekTo};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::default::{get_codecs, get_probe};
use tracing::{debug, info};

use super::smpl::read_sample_loop;
use super::RenderSource;
use crate::error::StreamError;
use crate::properties::AudioProperties;

/// A source that decodes audio files (WAV, FLAC, MP3, Ogg/Vorbis, etc.) with symphonia and
/// renders them as interleaved 16-bit frames.
pub struct SymphoniaSource {
    format_reader: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    properties: AudioProperties,
    // Decoded samples that haven't been rendered yet, interleaved.
    pending: Vec<i16>,
    pending_position: usize,
    // Frames to drop after a seek that landed before the requested frame.
    skip_frames: u64,
    is_finished: bool,
}

impl SymphoniaSource {
    /// Opens an audio file and reads its properties. Loop points are taken from a WAV `smpl`
    /// chunk when the file has one.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<SymphoniaSource, StreamError> {
        let path = path.as_ref();
        let mut file = File::open(path).map_err(|e| {
            StreamError::IoError(std::io::Error::new(
                e.kind(),
                format!("{}: {}", path.display(), e),
            ))
        })?;

        let sample_loop = read_sample_loop(&mut file)?;
        file.seek(SeekFrom::Start(0))?;

        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(extension) = path.extension().and_then(|ext| ext.to_str()) {
            hint.with_extension(extension);
        }

        let meta_opts: MetadataOptions = Default::default();
        let fmt_opts: FormatOptions = Default::default();
        let probed = get_probe().format(&hint, mss, &fmt_opts, &meta_opts)?;
        let format_reader = probed.format;

        let track = format_reader
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| {
                StreamError::InvalidParameters(format!(
                    "{}: no audio track found",
                    path.display()
                ))
            })?;

        let track_id = track.id;
        let params = &track.codec_params;

        let sample_rate = params.sample_rate.unwrap_or(0);
        let channel_count = params.channels.map(|c| c.count()).unwrap_or(0);
        let total_samples = params.n_frames.unwrap_or(0);
        if total_samples > i32::MAX as u64 {
            return Err(StreamError::InvalidParameters(format!(
                "{}: {} samples is more than a stream can hold",
                path.display(),
                total_samples
            )));
        }

        let decoder_opts: DecoderOptions = Default::default();
        let decoder = get_codecs().make(params, &decoder_opts)?;

        let mut properties = AudioProperties::new(
            sample_rate,
            total_samples as i32,
            channel_count.min(u8::MAX as usize) as u8,
        );
        if let Some(sample_loop) = sample_loop {
            if (sample_loop.end as u64) <= total_samples {
                properties.loop_enabled = true;
                properties.loop_start = sample_loop.start as i32;
                properties.loop_end = sample_loop.end as i32;
            } else {
                debug!(
                    loop_end = sample_loop.end,
                    total_samples, "Ignoring smpl loop past the end of the stream"
                );
            }
        }

        info!(path = ?path, properties = %properties, "Opened audio source");

        Ok(SymphoniaSource {
            format_reader,
            decoder,
            track_id,
            properties,
            pending: Vec::new(),
            pending_position: 0,
            skip_frames: 0,
            is_finished: false,
        })
    }

    fn channels(&self) -> usize {
        self.properties.channel_count.max(1) as usize
    }

    /// Reads the next packet. End of stream is `Ok(None)`. ResetRequired is propagated so the
    /// caller can reset the decoder.
    fn read_next_packet(
        format_reader: &mut dyn FormatReader,
    ) -> Result<Option<Packet>, StreamError> {
        match format_reader.next_packet() {
            Ok(packet) => Ok(Some(packet)),
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                Ok(None)
            }
            // Some demuxers report a decode error at the end of the stream.
            Err(SymphoniaError::DecodeError(_)) => Ok(None),
            Err(e) => Err(StreamError::AudioError(e)),
        }
    }

    /// Decodes packets until one yields samples for our track and returns them interleaved.
    fn decode_next(&mut self) -> Result<Option<Vec<i16>>, StreamError> {
        loop {
            let packet = match Self::read_next_packet(self.format_reader.as_mut()) {
                Ok(Some(packet)) => packet,
                Ok(None) => return Ok(None),
                Err(StreamError::AudioError(SymphoniaError::ResetRequired)) => {
                    self.decoder.reset();
                    continue;
                }
                Err(e) => return Err(e),
            };
            if packet.track_id() != self.track_id {
                continue;
            }

            let decoded = match self.decoder.decode(&packet) {
                Ok(decoded) => decoded,
                Err(SymphoniaError::ResetRequired) => {
                    self.decoder.reset();
                    self.decoder.decode(&packet)?
                }
                Err(e) => return Err(StreamError::AudioError(e)),
            };

            if decoded.frames() == 0 {
                continue;
            }

            let spec = *decoded.spec();
            let mut buffer = SampleBuffer::<i16>::new(decoded.capacity() as u64, spec);
            buffer.copy_interleaved_ref(decoded);
            return Ok(Some(buffer.samples().to_vec()));
        }
    }
}

impl RenderSource for SymphoniaSource {
    fn properties(&self) -> AudioProperties {
        self.properties
    }

    fn render(&mut self, buffer: &mut [i16], frames: usize) -> Result<usize, StreamError> {
        let channels = self.channels();
        let mut rendered = 0;

        while rendered < frames {
            if self.pending_position >= self.pending.len() {
                if self.is_finished {
                    break;
                }
                match self.decode_next()? {
                    Some(samples) => {
                        self.pending = samples;
                        self.pending_position = 0;
                    }
                    None => self.is_finished = true,
                }
                continue;
            }

            let available = (self.pending.len() - self.pending_position) / channels;
            if available == 0 {
                self.pending_position = self.pending.len();
                continue;
            }

            if self.skip_frames > 0 {
                let skipped = (self.skip_frames as usize).min(available);
                self.pending_position += skipped * channels;
                self.skip_frames -= skipped as u64;
                continue;
            }

            let count = available.min(frames - rendered);
            let end = self.pending_position + count * channels;
            let src = &self.pending[self.pending_position..end];
            buffer[rendered * channels..(rendered + count) * channels].copy_from_slice(src);
            self.pending_position += count * channels;
            rendered += count;
        }

        Ok(rendered)
    }

    fn seek(&mut self, frame: u64) -> Result<(), StreamError> {
        let seeked = self.format_reader.seek(
            SeekMode::Accurate,
            SeekTo::TimeStamp {
                ts: frame,
                track_id: self.track_id,
            },
        )?;
        self.decoder.reset();
        self.pending.clear();
        self.pending_position = 0;
        self.is_finished = false;
        self.skip_frames = seeked.required_ts.saturating_sub(seeked.actual_ts);
        debug!(
            frame,
            actual = seeked.actual_ts,
            skip = self.skip_frames,
            "Seeked audio source"
        );
        Ok(())
    }
}

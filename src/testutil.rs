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

use std::{error::Error, fs, fs::File, path::Path};

use hound::{SampleFormat, WavSpec, WavWriter};

/// Writes a 16-bit WAV file. `samples` holds one buffer per channel; all must be the same length.
pub fn write_wav(
    path: &Path,
    samples: &[Vec<i16>],
    sample_rate: u32,
) -> Result<(), Box<dyn Error>> {
    let num_channels = samples.len();
    assert!(num_channels <= u16::MAX.into(), "Too many channels!");
    let frames = samples.first().map(|s| s.len()).unwrap_or(0);
    assert!(
        samples.iter().all(|s| s.len() == frames),
        "Channels must be the same length!"
    );

    let mut writer = WavWriter::new(
        File::create(path)?,
        WavSpec {
            channels: num_channels as u16,
            sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        },
    )?;

    for frame in 0..frames {
        for channel_samples in samples {
            writer.write_sample(channel_samples[frame])?;
        }
    }
    writer.finalize()?;

    Ok(())
}

/// Builds a `smpl` chunk holding one forward loop. `end` is exclusive.
pub fn smpl_chunk(start: u32, end: u32) -> Vec<u8> {
    // 36 bytes of sampler fields, then one 24-byte loop record.
    let mut body = vec![0u8; 36 + 24];
    body[28..32].copy_from_slice(&1u32.to_le_bytes());
    body[36 + 8..36 + 12].copy_from_slice(&start.to_le_bytes());
    body[36 + 12..36 + 16].copy_from_slice(&(end - 1).to_le_bytes());

    let mut chunk = Vec::with_capacity(8 + body.len());
    chunk.extend_from_slice(b"smpl");
    chunk.extend_from_slice(&(body.len() as u32).to_le_bytes());
    chunk.extend_from_slice(&body);
    chunk
}

/// Writes a 16-bit WAV file carrying a loop in a `smpl` chunk after the sample data.
pub fn write_wav_with_loop(
    path: &Path,
    samples: &[Vec<i16>],
    sample_rate: u32,
    loop_start: u32,
    loop_end: u32,
) -> Result<(), Box<dyn Error>> {
    write_wav(path, samples, sample_rate)?;

    let mut data = fs::read(path)?;
    if data.len() % 2 == 1 {
        data.push(0);
    }
    data.extend_from_slice(&smpl_chunk(loop_start, loop_end));
    let riff_size = (data.len() - 8) as u32;
    data[4..8].copy_from_slice(&riff_size.to_le_bytes());
    fs::write(path, data)?;

    Ok(())
}

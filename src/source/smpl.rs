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
use std::io::{self, Read, Seek, SeekFrom};

// Offset of the loop count within the smpl chunk body, and the size of one loop record.
const LOOP_COUNT_OFFSET: usize = 28;
const LOOP_TABLE_OFFSET: usize = 36;
const LOOP_RECORD_SIZE: usize = 24;
// Only the first loop record is read.
const SMPL_READ_LIMIT: u64 = (LOOP_TABLE_OFFSET + LOOP_RECORD_SIZE) as u64;

/// A loop window read from a WAV `smpl` chunk. The end is exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleLoop {
    pub start: u32,
    pub end: u32,
}

/// Scans a RIFF/WAVE stream for a `smpl` chunk and returns its first loop, if any.
/// Streams that aren't RIFF/WAVE return `Ok(None)`.
pub fn read_sample_loop<R: Read + Seek>(reader: &mut R) -> io::Result<Option<SampleLoop>> {
    reader.seek(SeekFrom::Start(0))?;

    let mut riff = [0u8; 12];
    if read_full(reader, &mut riff)? < riff.len()
        || &riff[0..4] != b"RIFF"
        || &riff[8..12] != b"WAVE"
    {
        return Ok(None);
    }

    let mut header = [0u8; 8];
    loop {
        if read_full(reader, &mut header)? < header.len() {
            return Ok(None);
        }
        let size = u32::from_le_bytes([header[4], header[5], header[6], header[7]]) as u64;

        if &header[0..4] != b"smpl" {
            // Chunks are word aligned.
            reader.seek(SeekFrom::Current((size + (size & 1)) as i64))?;
            continue;
        }

        let mut body = Vec::with_capacity(SMPL_READ_LIMIT as usize);
        reader.by_ref().take(size.min(SMPL_READ_LIMIT)).read_to_end(&mut body)?;
        return Ok(parse_smpl(&body));
    }
}

fn parse_smpl(body: &[u8]) -> Option<SampleLoop> {
    let loops = le_u32(body, LOOP_COUNT_OFFSET)?;
    if loops == 0 {
        return None;
    }

    let record = LOOP_TABLE_OFFSET;
    if body.len() < record + LOOP_RECORD_SIZE {
        return None;
    }
    let start = le_u32(body, record + 8)?;
    // The stored end is the last sample played, inclusive.
    let end = le_u32(body, record + 12)?.checked_add(1)?;
    if end <= start {
        return None;
    }

    Some(SampleLoop { start, end })
}

fn le_u32(data: &[u8], offset: usize) -> Option<u32> {
    let bytes = data.get(offset..offset + 4)?;
    Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

fn read_full<R: Read>(reader: &mut R, buffer: &mut [u8]) -> io::Result<usize> {
    let mut read = 0;
    while read < buffer.len() {
        match reader.read(&mut buffer[read..]) {
            Ok(0) => break,
            Ok(n) => read += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(read)
}

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
use tracing::{debug, warn};

use crate::error::StreamError;
use crate::properties::AudioProperties;

use super::RenderSource;

/// Whether the resolved loop window differs from the loop the source reports, so the source's
/// own loop wrap can't be used.
pub fn loop_differs(source: &AudioProperties, resolved: &AudioProperties) -> bool {
    resolved.loop_enabled
        && !(source.loop_enabled
            && source.loop_start == resolved.loop_start
            && source.loop_end == resolved.loop_end)
}

/// Reads a source in stream order under the resolved properties.
///
/// A looping stream continues from the loop start once the loop end is reached. If the source
/// can't wrap there itself, the cursor seeks back. A non-looping stream ends at its total.
pub struct StreamCursor<'a, S: RenderSource + ?Sized> {
    source: &'a mut S,
    resolved: AudioProperties,
    manual_loop: bool,
    position: i64,
    finished: bool,
    ended_early: bool,
}

impl<'a, S: RenderSource + ?Sized> StreamCursor<'a, S> {
    pub fn new(source: &'a mut S, resolved: &AudioProperties) -> StreamCursor<'a, S> {
        let manual_loop = resolved.loop_enabled
            && (!source.wraps_at_loop_end() || loop_differs(&source.properties(), resolved));
        StreamCursor {
            source,
            resolved: *resolved,
            manual_loop,
            position: 0,
            finished: false,
            ended_early: false,
        }
    }

    /// Whether the cursor seeks back to the loop start itself.
    pub fn manual_loop(&self) -> bool {
        self.manual_loop
    }

    /// Reads up to `frames` interleaved frames. Returns 0 once the stream has no more audio.
    pub fn read(&mut self, buffer: &mut [i16], frames: usize) -> Result<usize, StreamError> {
        let limit = if self.manual_loop {
            Some(self.resolved.loop_end as i64)
        } else if !self.resolved.loop_enabled {
            Some(self.resolved.total_samples as i64)
        } else {
            None
        };

        loop {
            if self.finished || frames == 0 {
                return Ok(0);
            }

            let request = match limit {
                Some(limit) if limit <= self.position => {
                    if self.manual_loop {
                        self.wrap()?;
                        continue;
                    }
                    self.finished = true;
                    return Ok(0);
                }
                Some(limit) => frames.min((limit - self.position) as usize),
                None => frames,
            };

            let rendered = self.source.render(buffer, request)?;
            if rendered == 0 {
                // The source reported more audio than it holds.
                if self.manual_loop && self.position > self.resolved.loop_start as i64 {
                    if !self.ended_early {
                        warn!(
                            position = self.position,
                            loop_end = self.resolved.loop_end,
                            "Source ended before the loop end, looping back early"
                        );
                        self.ended_early = true;
                    }
                    self.wrap()?;
                    continue;
                }
                debug!(position = self.position, "Source finished");
                self.finished = true;
                return Ok(0);
            }

            self.position += rendered as i64;
            return Ok(rendered);
        }
    }

    fn wrap(&mut self) -> Result<(), StreamError> {
        self.source.seek(self.resolved.loop_start as u64)?;
        self.position = self.resolved.loop_start as i64;
        Ok(())
    }
}
